#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`class`]: 클래스 ID, 이름, DSCP 기본 매핑
//! - [`queue`]: 클래스별 bounded FIFO 큐
//! - [`rule`]: QoS 룰과 TOML 룰 파일 로딩
//! - [`engine`]: 분류/큐잉/스케줄링/통계를 묶은 QoS 엔진

pub mod class;
pub mod engine;
pub mod queue;
pub mod rule;

pub use class::{ClassId, TrafficClass, dscp_fallback};
pub use engine::{ClassStats, QosEngine, QosStats};
pub use queue::{ClassQueue, EnqueueOutcome};
pub use rule::{QosRule, QosRuleSpec, load_rules, parse_rules};
