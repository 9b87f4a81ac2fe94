//! 설정 관리 — irongate.toml 파싱 및 런타임 설정
//!
//! [`IronGateConfig`]는 모든 엔진의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`IRONGATE_NAT_BUCKET_COUNT=1024` 형식)
//! 3. 설정 파일 (`irongate.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), irongate_core::error::IronGateError> {
//! use irongate_core::config::IronGateConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = IronGateConfig::load("irongate.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = IronGateConfig::parse("[nat]\nbucket_count = 1024")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, IronGateError};

/// TCP 연결 기본 타임아웃 (ms)
pub const DEFAULT_TCP_TIMEOUT_MS: u64 = 300_000;
/// UDP 연결 기본 타임아웃 (ms)
pub const DEFAULT_UDP_TIMEOUT_MS: u64 = 30_000;
/// 클래스 큐 기본 용량 (패킷 수)
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
/// 트래픽 클래스 수
pub const NUM_TRAFFIC_CLASSES: u8 = 8;

/// Irongate 통합 설정
///
/// `irongate.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 엔진은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IronGateConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 훅 디스패처 설정
    #[serde(default)]
    pub hook: HookConfig,
    /// NAT 엔진 설정
    #[serde(default)]
    pub nat: NatConfig,
    /// QoS 엔진 설정
    #[serde(default)]
    pub qos: QosConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl IronGateConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IronGateError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    ///
    /// 검증하지 않습니다. 오버라이드를 모두 적용한 뒤 [`validate`](Self::validate)를
    /// 호출해야 합니다.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, IronGateError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IronGateError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                IronGateError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, IronGateError> {
        toml::from_str(toml_str).map_err(|e| {
            IronGateError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `IRONGATE_{SECTION}_{FIELD}`
    /// 예: `IRONGATE_NAT_TCP_TIMEOUT_MS=600000`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "IRONGATE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "IRONGATE_GENERAL_LOG_FORMAT");

        // Hook
        override_u32(&mut self.hook.max_repeats, "IRONGATE_HOOK_MAX_REPEATS");

        // NAT
        override_bool(&mut self.nat.enabled, "IRONGATE_NAT_ENABLED");
        override_usize(&mut self.nat.bucket_count, "IRONGATE_NAT_BUCKET_COUNT");
        override_usize(
            &mut self.nat.max_connections,
            "IRONGATE_NAT_MAX_CONNECTIONS",
        );
        override_u64(&mut self.nat.tcp_timeout_ms, "IRONGATE_NAT_TCP_TIMEOUT_MS");
        override_u64(&mut self.nat.udp_timeout_ms, "IRONGATE_NAT_UDP_TIMEOUT_MS");
        override_u64(
            &mut self.nat.aging_interval_secs,
            "IRONGATE_NAT_AGING_INTERVAL_SECS",
        );
        override_opt_string(&mut self.nat.rules_path, "IRONGATE_NAT_RULES_PATH");
        override_opt_string(&mut self.nat.wan_interface, "IRONGATE_NAT_WAN_INTERFACE");

        // QoS
        override_bool(&mut self.qos.enabled, "IRONGATE_QOS_ENABLED");
        override_usize(&mut self.qos.queue_capacity, "IRONGATE_QOS_QUEUE_CAPACITY");
        override_opt_string(&mut self.qos.rules_path, "IRONGATE_QOS_RULES_PATH");

        // Metrics
        override_bool(&mut self.metrics.enabled, "IRONGATE_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "IRONGATE_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "IRONGATE_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IronGateError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.hook.max_repeats == 0 {
            return Err(invalid("hook.max_repeats", "must be at least 1".to_owned()));
        }

        if self.nat.enabled {
            if self.nat.bucket_count == 0 {
                return Err(invalid("nat.bucket_count", "must be greater than 0".to_owned()));
            }
            if self.nat.max_connections == 0 {
                return Err(invalid(
                    "nat.max_connections",
                    "must be greater than 0".to_owned(),
                ));
            }
            if self.nat.tcp_timeout_ms == 0 || self.nat.udp_timeout_ms == 0 {
                return Err(invalid(
                    "nat.tcp_timeout_ms/udp_timeout_ms",
                    "timeouts must be greater than 0".to_owned(),
                ));
            }
            if self.nat.aging_interval_secs == 0 {
                return Err(invalid(
                    "nat.aging_interval_secs",
                    "must be greater than 0".to_owned(),
                ));
            }
            if self.nat.wan_interface.as_deref().is_some_and(str::is_empty) {
                return Err(invalid(
                    "nat.wan_interface",
                    "must not be empty".to_owned(),
                ));
            }
        }

        // QoS가 꺼져 있어도 송신 경로는 BEST_EFFORT 큐를 사용함
        if self.qos.queue_capacity == 0 {
            return Err(invalid(
                "qos.queue_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.qos.enabled {
            for (i, class) in self.qos.classes.iter().enumerate() {
                if class.class >= NUM_TRAFFIC_CLASSES {
                    return Err(invalid(
                        &format!("qos.classes[{i}].class"),
                        format!("must be in 0..{NUM_TRAFFIC_CLASSES}"),
                    ));
                }
                if let Some(priority) = class.priority
                    && priority >= NUM_TRAFFIC_CLASSES
                {
                    return Err(invalid(
                        &format!("qos.classes[{i}].priority"),
                        format!("must be in 0..{NUM_TRAFFIC_CLASSES}"),
                    ));
                }
            }
        }

        if self.metrics.enabled && self.metrics.endpoint != "/metrics" {
            return Err(invalid(
                "metrics.endpoint",
                "only '/metrics' is supported".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> IronGateError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

// Default는 derive 매크로로 자동 생성 (각 필드가 Default를 구현하므로)

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 훅 디스패처 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// 한 훅이 연속으로 REPEAT를 반환할 수 있는 최대 횟수
    ///
    /// 초과하면 패킷을 DROP합니다.
    pub max_repeats: u32,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self { max_repeats: 8 }
    }
}

/// NAT 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 연결 해시 테이블 버킷 수
    pub bucket_count: usize,
    /// 최대 연결 수 (초과 시 새 연결은 변환 없이 통과)
    pub max_connections: usize,
    /// TCP 연결 타임아웃 (ms)
    pub tcp_timeout_ms: u64,
    /// UDP 연결 타임아웃 (ms)
    pub udp_timeout_ms: u64,
    /// 에이징 스윕 주기 (초)
    pub aging_interval_secs: u64,
    /// NAT 룰 파일 경로 (TOML, `[[rules]]`)
    pub rules_path: Option<String>,
    /// 응답 역변환을 시도할 수신 인터페이스 이름 (없으면 모든 인터페이스)
    pub wan_interface: Option<String>,
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket_count: 256,
            max_connections: 65_536,
            tcp_timeout_ms: DEFAULT_TCP_TIMEOUT_MS,
            udp_timeout_ms: DEFAULT_UDP_TIMEOUT_MS,
            aging_interval_secs: 10,
            rules_path: None,
            wan_interface: None,
        }
    }
}

/// QoS 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QosConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 클래스별 큐 용량 (패킷 수)
    pub queue_capacity: usize,
    /// QoS 룰 파일 경로 (TOML, `[[rules]]`)
    pub rules_path: Option<String>,
    /// 클래스별 설정 오버라이드
    pub classes: Vec<ClassOverride>,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rules_path: None,
            classes: Vec::new(),
        }
    }
}

/// 트래픽 클래스 설정 오버라이드
///
/// 지정하지 않은 필드는 기본값을 유지합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassOverride {
    /// 클래스 ID (0~7)
    pub class: u8,
    /// 스케줄링 우선순위 (0~7, 클수록 먼저)
    pub priority: Option<u8>,
    /// 대역폭 (bytes/sec, 저장만 되고 강제되지 않음)
    pub bandwidth: Option<u64>,
    /// 버스트 크기 (bytes, 저장만 되고 강제되지 않음)
    pub burst: Option<u64>,
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리스닝 주소
    pub listen_addr: String,
    /// 리스닝 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9108,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_opt_string(target: &mut Option<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = if val.is_empty() { None } else { Some(val) };
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = IronGateConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.hook.max_repeats, 8);
        assert!(config.nat.enabled);
        assert_eq!(config.nat.tcp_timeout_ms, 300_000);
        assert_eq!(config.nat.udp_timeout_ms, 30_000);
        assert_eq!(config.qos.queue_capacity, 256);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        IronGateConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let config = IronGateConfig::parse("").unwrap();
        assert_eq!(config.nat.bucket_count, 256);
        assert!(config.qos.classes.is_empty());
    }

    #[test]
    fn parse_partial_toml_merges_with_defaults() {
        let toml = r#"
[nat]
bucket_count = 1024
rules_path = "/etc/irongate/nat.toml"

[[qos.classes]]
class = 5
priority = 7
bandwidth = 1000000
"#;
        let config = IronGateConfig::parse(toml).unwrap();
        assert_eq!(config.nat.bucket_count, 1024);
        // 나머지는 기본값 유지
        assert_eq!(config.nat.udp_timeout_ms, 30_000);
        assert_eq!(config.nat.rules_path.as_deref(), Some("/etc/irongate/nat.toml"));
        assert_eq!(config.qos.classes.len(), 1);
        assert_eq!(config.qos.classes[0].priority, Some(7));
        assert_eq!(config.qos.classes[0].burst, None);
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let err = IronGateConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            IronGateError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = IronGateConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_zero_max_repeats() {
        let mut config = IronGateConfig::default();
        config.hook.max_repeats = 0;
        assert!(config.validate().unwrap_err().to_string().contains("max_repeats"));
    }

    #[test]
    fn validate_rejects_zero_buckets_when_nat_enabled() {
        let mut config = IronGateConfig::default();
        config.nat.bucket_count = 0;
        assert!(config.validate().unwrap_err().to_string().contains("bucket_count"));

        // NAT 비활성화 시 검증 건너뜀
        config.nat.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_queue_capacity_even_when_qos_disabled() {
        let config = IronGateConfig::parse("[qos]\nenabled = false\nqueue_capacity = 0\n").unwrap();
        assert!(config.validate().unwrap_err().to_string().contains("queue_capacity"));
    }

    #[test]
    fn validate_rejects_out_of_range_class_override() {
        let mut config = IronGateConfig::default();
        config.qos.classes.push(ClassOverride {
            class: 8,
            priority: None,
            bandwidth: None,
            burst: None,
        });
        assert!(config.validate().unwrap_err().to_string().contains("classes[0].class"));

        config.qos.classes[0].class = 3;
        config.qos.classes[0].priority = Some(9);
        assert!(config.validate().unwrap_err().to_string().contains("priority"));
    }

    #[test]
    fn validate_rejects_custom_metrics_endpoint() {
        let mut config = IronGateConfig::default();
        config.metrics.enabled = true;
        config.metrics.endpoint = "/custom".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_take_precedence() {
        // SAFETY: serial 테스트에서만 환경변수를 수정합니다.
        unsafe {
            std::env::set_var("IRONGATE_NAT_BUCKET_COUNT", "4096");
            std::env::set_var("IRONGATE_HOOK_MAX_REPEATS", "3");
            std::env::set_var("IRONGATE_QOS_RULES_PATH", "/tmp/qos.toml");
        }

        let mut config = IronGateConfig::default();
        config.apply_env_overrides();

        unsafe {
            std::env::remove_var("IRONGATE_NAT_BUCKET_COUNT");
            std::env::remove_var("IRONGATE_HOOK_MAX_REPEATS");
            std::env::remove_var("IRONGATE_QOS_RULES_PATH");
        }

        assert_eq!(config.nat.bucket_count, 4096);
        assert_eq!(config.hook.max_repeats, 3);
        assert_eq!(config.qos.rules_path.as_deref(), Some("/tmp/qos.toml"));
    }

    #[test]
    #[serial]
    fn unparsable_env_value_is_ignored() {
        unsafe {
            std::env::set_var("IRONGATE_NAT_TCP_TIMEOUT_MS", "forever");
        }
        let mut config = IronGateConfig::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("IRONGATE_NAT_TCP_TIMEOUT_MS");
        }
        assert_eq!(config.nat.tcp_timeout_ms, DEFAULT_TCP_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn from_file_reports_missing_file() {
        let err = IronGateConfig::from_file("/nonexistent/irongate.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IronGateError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
