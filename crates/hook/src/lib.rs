#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`point`]: 훅 포인트 열거형과 숫자 변환
//! - [`verdict`]: verdict 열거형과 숫자 코드 어댑터
//! - [`dispatcher`]: 훅 등록/해제/호출, 포인트별 통계

pub mod dispatcher;
pub mod point;
pub mod verdict;

pub use dispatcher::{HookContext, HookDispatcher, HookHandle, HookStats, PacketHook, RawHook};
pub use point::HookPoint;
pub use verdict::{RawVerdict, Verdict};
