#![doc = include_str!("../README.md")]

pub mod checksum;
pub mod config;
pub mod error;
pub mod metrics;
pub mod net;
pub mod packet;
pub mod rules;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, HookError, IronGateError, NatError, PacketError, QosError};

// 설정
pub use config::IronGateConfig;

// 패킷
pub use packet::{Ipv4Header, L4Header, NetDevice, Packet, PacketBuilder};

// 매칭 타입
pub use net::{FlowKey, PortRange};

// 룰 저장소
pub use rules::{RuleEntry, RuleId, RuleList, RuleSnapshot};
