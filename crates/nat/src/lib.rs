#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`rule`]: NAT 룰, 매칭, TOML 룰 파일 로딩
//! - [`port`]: SNAT 포트 할당기
//! - [`table`]: 버킷 락 기반 연결 테이블
//! - [`engine`]: 변환/통계/덤프를 묶은 NAT 엔진
//! - [`aging`]: 주기적 에이징 태스크

pub mod aging;
pub mod engine;
pub mod port;
pub mod rule;
pub mod table;

pub use aging::spawn_aging_task;
pub use engine::{NatEngine, NatStats, NatTimeouts};
pub use port::PortAllocator;
pub use rule::{NatRule, NatRuleSpec, NatType, load_rules, parse_rules};
pub use table::{ConnState, ConnTable, FindOrCreate, NatConnection};
