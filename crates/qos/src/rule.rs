//! QoS 룰 — 분류 조건과 대상 클래스
//!
//! 룰 파일 형식은 NAT 룰 파일과 같습니다 (`[[rules]]` 배열, CIDR 문자열, 프로토콜 이름).
//! 포트 범위는 `"80"`, `"1000-2000"`, `"any"` 문자열로 적습니다.
//!
//! ```toml
//! [[rules]]
//! protocol = "udp"
//! dst_ports = "5060-5061"
//! target_class = 5
//! set_dscp = 46
//! ```

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

use irongate_core::error::{ConfigError, IronGateError, QosError};
use irongate_core::net::{FlowKey, PortRange, addr_matches, parse_cidr, parse_protocol};
use irongate_core::packet::protocol_name;
use serde::{Deserialize, Serialize};

use crate::class::ClassId;

/// DSCP 최댓값 (6비트)
pub const DSCP_MAX: u8 = 63;

/// QoS 룰
///
/// 모든 조건을 만족하면 매칭됩니다. `protocol` 0, 마스크 0.0.0.0, [`PortRange::ANY`],
/// `dscp_match: None`은 와일드카드입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QosRule {
    pub src_ip: Ipv4Addr,
    pub src_mask: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub dst_mask: Ipv4Addr,
    /// IP 프로토콜 (0 = 모두)
    pub protocol: u8,
    pub src_ports: PortRange,
    pub dst_ports: PortRange,
    /// 매칭할 DSCP 값
    pub dscp_match: Option<u8>,
    /// 매칭 시 분류될 클래스
    pub target_class: ClassId,
    /// 매칭 시 패킷에 기록할 DSCP 값
    pub set_dscp: Option<u8>,
}

impl QosRule {
    /// 모든 트래픽을 `target_class`로 보내는 룰
    pub fn new(target_class: ClassId) -> Self {
        Self {
            src_ip: Ipv4Addr::UNSPECIFIED,
            src_mask: Ipv4Addr::UNSPECIFIED,
            dst_ip: Ipv4Addr::UNSPECIFIED,
            dst_mask: Ipv4Addr::UNSPECIFIED,
            protocol: 0,
            src_ports: PortRange::ANY,
            dst_ports: PortRange::ANY,
            dscp_match: None,
            target_class,
            set_dscp: None,
        }
    }

    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_src(mut self, ip: Ipv4Addr, mask: Ipv4Addr) -> Self {
        self.src_ip = ip;
        self.src_mask = mask;
        self
    }

    pub fn with_dst(mut self, ip: Ipv4Addr, mask: Ipv4Addr) -> Self {
        self.dst_ip = ip;
        self.dst_mask = mask;
        self
    }

    pub fn with_src_ports(mut self, ports: PortRange) -> Self {
        self.src_ports = ports;
        self
    }

    pub fn with_dst_ports(mut self, ports: PortRange) -> Self {
        self.dst_ports = ports;
        self
    }

    pub fn with_dscp_match(mut self, dscp: u8) -> Self {
        self.dscp_match = Some(dscp);
        self
    }

    /// 매칭된 패킷의 DSCP를 `dscp`로 다시 씁니다.
    pub fn with_set_dscp(mut self, dscp: u8) -> Self {
        self.set_dscp = Some(dscp);
        self
    }

    /// 플로우와 DSCP 값이 이 룰의 조건을 만족하는지 확인합니다.
    pub fn matches(&self, flow: &FlowKey, dscp: u8) -> bool {
        (self.protocol == 0 || self.protocol == flow.protocol)
            && addr_matches(flow.src_ip, self.src_ip, self.src_mask)
            && addr_matches(flow.dst_ip, self.dst_ip, self.dst_mask)
            && self.src_ports.contains(flow.src_port)
            && self.dst_ports.contains(flow.dst_port)
            && self.dscp_match.is_none_or(|d| d == dscp)
    }

    /// 룰 필드의 일관성을 검증합니다.
    pub fn validate(&self) -> Result<(), QosError> {
        for (field, range) in [("src_ports", self.src_ports), ("dst_ports", self.dst_ports)] {
            if !range.is_valid() {
                return Err(QosError::InvalidRule {
                    reason: format!("{field} start exceeds end ({range:?})"),
                });
            }
        }
        for (field, value) in [("dscp", self.dscp_match), ("set_dscp", self.set_dscp)] {
            if let Some(v) = value.filter(|v| *v > DSCP_MAX) {
                return Err(QosError::InvalidRule {
                    reason: format!("{field} {v} exceeds {DSCP_MAX}"),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for QosRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} src={}/{}:{} dst={}/{}:{}",
            protocol_name(self.protocol),
            self.src_ip,
            self.src_mask,
            self.src_ports,
            self.dst_ip,
            self.dst_mask,
            self.dst_ports
        )?;
        if let Some(d) = self.dscp_match {
            write!(f, " dscp={d}")?;
        }
        write!(f, " -> {}", self.target_class)?;
        if let Some(d) = self.set_dscp {
            write!(f, " set_dscp={d}")?;
        }
        Ok(())
    }
}

// =============================================================================
// 룰 파일
// =============================================================================

/// 룰 파일의 `[[rules]]` 항목
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosRuleSpec {
    /// 출발지 CIDR (생략 시 any)
    #[serde(default)]
    pub src: Option<String>,
    /// 목적지 CIDR (생략 시 any)
    #[serde(default)]
    pub dst: Option<String>,
    /// 프로토콜 이름 또는 번호 (생략 시 any)
    #[serde(default)]
    pub protocol: Option<String>,
    /// 출발지 포트 범위 (생략 시 any)
    #[serde(default)]
    pub src_ports: Option<String>,
    /// 목적지 포트 범위 (생략 시 any)
    #[serde(default)]
    pub dst_ports: Option<String>,
    /// 매칭할 DSCP (생략 시 any)
    #[serde(default)]
    pub dscp: Option<u8>,
    /// 대상 클래스 (0~7)
    pub target_class: u8,
    /// 다시 쓸 DSCP (생략 시 유지)
    #[serde(default)]
    pub set_dscp: Option<u8>,
}

impl TryFrom<QosRuleSpec> for QosRule {
    type Error = QosError;

    fn try_from(spec: QosRuleSpec) -> Result<Self, Self::Error> {
        let invalid = |reason: String| QosError::InvalidRule { reason };
        let (src_ip, src_mask) = parse_cidr(spec.src.as_deref().unwrap_or("any")).map_err(invalid)?;
        let (dst_ip, dst_mask) = parse_cidr(spec.dst.as_deref().unwrap_or("any")).map_err(invalid)?;
        let protocol = parse_protocol(spec.protocol.as_deref().unwrap_or("any")).map_err(invalid)?;
        let src_ports = spec
            .src_ports
            .as_deref()
            .unwrap_or("any")
            .parse::<PortRange>()
            .map_err(invalid)?;
        let dst_ports = spec
            .dst_ports
            .as_deref()
            .unwrap_or("any")
            .parse::<PortRange>()
            .map_err(invalid)?;

        let rule = QosRule {
            src_ip,
            src_mask,
            dst_ip,
            dst_mask,
            protocol,
            src_ports,
            dst_ports,
            dscp_match: spec.dscp,
            target_class: ClassId::new(spec.target_class)?,
            set_dscp: spec.set_dscp,
        };
        rule.validate()?;
        Ok(rule)
    }
}

#[derive(Debug, Deserialize)]
struct QosRuleFile {
    #[serde(default)]
    rules: Vec<QosRuleSpec>,
}

/// TOML 문자열에서 룰 목록을 파싱합니다 (파일 순서 유지).
pub fn parse_rules(toml_str: &str) -> Result<Vec<QosRule>, IronGateError> {
    let file: QosRuleFile = toml::from_str(toml_str).map_err(|e| ConfigError::ParseFailed {
        reason: e.to_string(),
    })?;
    file.rules
        .into_iter()
        .enumerate()
        .map(|(idx, spec)| {
            QosRule::try_from(spec).map_err(|e| {
                IronGateError::from(ConfigError::InvalidValue {
                    field: format!("rules[{idx}]"),
                    reason: e.to_string(),
                })
            })
        })
        .collect()
}

/// 룰 파일을 읽어 파싱합니다.
pub async fn load_rules(path: impl AsRef<Path>) -> Result<Vec<QosRule>, IronGateError> {
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
    parse_rules(&content)
}
