//! 에러 타입 — 도메인별 에러 정의
//!
//! 데이터 경로(패킷 처리)는 에러를 반환하지 않고 통과/기본 클래스로 후퇴합니다.
//! 여기 정의된 에러는 제어 경로(룰 추가, 설정 로드, 클래스 설정)와
//! 패킷 파싱 내부에서만 사용됩니다.

/// Irongate 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum IronGateError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 패킷 파싱 에러
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// 훅 디스패처 에러
    #[error("hook error: {0}")]
    Hook(#[from] HookError),

    /// NAT 엔진 에러
    #[error("nat error: {0}")]
    Nat(#[from] NatError),

    /// QoS 엔진 에러
    #[error("qos error: {0}")]
    Qos(#[from] QosError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 잘못된 형식의 패킷
///
/// 헤더가 버퍼 길이보다 길거나 IPv4가 아닌 경우 등.
/// 호출자는 이 에러를 "분류/변환 불가"로 취급합니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// 버퍼가 헤더를 담기에 너무 짧음
    #[error("packet truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    /// IPv4 패킷이 아님
    #[error("not an ipv4 packet (version {version})")]
    NotIpv4 { version: u8 },

    /// IHL 필드가 최소값(5) 미만
    #[error("bad ipv4 header length: ihl={ihl}")]
    BadHeaderLength { ihl: u8 },

    /// TCP/UDP가 아닌 프로토콜에서 L4 헤더를 요청함
    #[error("unsupported l4 protocol: {0}")]
    UnsupportedProtocol(u8),
}

/// 훅 디스패처 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    /// 정의되지 않은 훅 포인트 번호
    #[error("unknown hook point: {0}")]
    UnknownHookPoint(u32),

    /// 정의되지 않은 verdict 코드
    #[error("unknown verdict code: {0}")]
    UnknownVerdict(u32),
}

/// NAT 엔진 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NatError {
    /// 유효하지 않은 룰
    #[error("invalid nat rule: {reason}")]
    InvalidRule { reason: String },

    /// 룰 ID가 존재하지 않음
    #[error("nat rule not found: {id}")]
    RuleNotFound { id: u64 },

    /// 연결 테이블이 가득 참
    #[error("connection table full ({capacity} entries)")]
    TableFull { capacity: usize },
}

/// QoS 엔진 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QosError {
    /// 트래픽 클래스 ID 범위 초과 (0..=7)
    #[error("invalid traffic class: {0}")]
    InvalidClass(u8),

    /// 우선순위 범위 초과 (0..=7)
    #[error("invalid priority {priority} (expected 0..=7)")]
    InvalidPriority { priority: u8 },

    /// 유효하지 않은 룰
    #[error("invalid qos rule: {reason}")]
    InvalidRule { reason: String },

    /// 룰 ID가 존재하지 않음
    #[error("qos rule not found: {id}")]
    RuleNotFound { id: u64 },
}
