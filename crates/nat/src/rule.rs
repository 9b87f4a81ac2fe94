//! NAT 룰 — 매칭 조건과 변환 지시
//!
//! 룰 파일은 TOML `[[rules]]` 배열입니다. 네트워크는 CIDR 문자열,
//! 프로토콜은 이름 또는 번호로 적습니다. 생략한 필드는 와일드카드입니다.
//!
//! ```toml
//! [[rules]]
//! nat_type = "snat"
//! src = "192.168.1.0/24"
//! nat_ip = "203.0.113.1"
//! ```

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

use irongate_core::error::{ConfigError, IronGateError, NatError};
use irongate_core::net::{FlowKey, addr_matches, parse_cidr, parse_protocol};
use irongate_core::packet::protocol_name;
use serde::{Deserialize, Serialize};

/// 변환 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatType {
    /// 출발지 주소/포트 변환
    Snat,
    /// 목적지 주소/포트 변환
    Dnat,
}

impl NatType {
    /// 로그/덤프용 이름
    pub fn as_str(self) -> &'static str {
        match self {
            NatType::Snat => "SNAT",
            NatType::Dnat => "DNAT",
        }
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NAT 룰
///
/// 매칭: `protocol`이 0이거나 같고, 출발지/목적지가 각 마스크 아래에서 일치.
/// 변환: SNAT은 `nat_ip` + 할당 포트, DNAT은 `nat_ip:nat_port_min`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NatRule {
    /// 출발지 네트워크
    pub src_ip: Ipv4Addr,
    /// 출발지 마스크
    pub src_mask: Ipv4Addr,
    /// 목적지 네트워크
    pub dst_ip: Ipv4Addr,
    /// 목적지 마스크
    pub dst_mask: Ipv4Addr,
    /// IP 프로토콜 (0 = 모두)
    pub protocol: u8,
    /// 변환 종류
    pub nat_type: NatType,
    /// 변환 주소
    pub nat_ip: Ipv4Addr,
    /// 변환 포트 범위 시작
    pub nat_port_min: u16,
    /// 변환 포트 범위 끝
    pub nat_port_max: u16,
}

impl NatRule {
    /// 출발지 네트워크를 `nat_ip`로 변환하는 SNAT 룰
    pub fn snat(src_ip: Ipv4Addr, src_mask: Ipv4Addr, nat_ip: Ipv4Addr) -> Self {
        Self {
            src_ip,
            src_mask,
            dst_ip: Ipv4Addr::UNSPECIFIED,
            dst_mask: Ipv4Addr::UNSPECIFIED,
            protocol: 0,
            nat_type: NatType::Snat,
            nat_ip,
            nat_port_min: 0,
            nat_port_max: 0,
        }
    }

    /// 목적지 네트워크를 `nat_ip:nat_port`로 변환하는 DNAT 룰
    pub fn dnat(dst_ip: Ipv4Addr, dst_mask: Ipv4Addr, nat_ip: Ipv4Addr, nat_port: u16) -> Self {
        Self {
            src_ip: Ipv4Addr::UNSPECIFIED,
            src_mask: Ipv4Addr::UNSPECIFIED,
            dst_ip,
            dst_mask,
            protocol: 0,
            nat_type: NatType::Dnat,
            nat_ip,
            nat_port_min: nat_port,
            nat_port_max: nat_port,
        }
    }

    /// 프로토콜 조건을 지정합니다.
    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    /// 출발지 조건을 지정합니다.
    pub fn with_src(mut self, ip: Ipv4Addr, mask: Ipv4Addr) -> Self {
        self.src_ip = ip;
        self.src_mask = mask;
        self
    }

    /// 목적지 조건을 지정합니다.
    pub fn with_dst(mut self, ip: Ipv4Addr, mask: Ipv4Addr) -> Self {
        self.dst_ip = ip;
        self.dst_mask = mask;
        self
    }

    /// 변환 포트 범위를 지정합니다.
    pub fn with_ports(mut self, min: u16, max: u16) -> Self {
        self.nat_port_min = min;
        self.nat_port_max = max;
        self
    }

    /// 플로우가 이 룰의 매칭 조건을 만족하는지 확인합니다.
    pub fn matches(&self, flow: &FlowKey) -> bool {
        (self.protocol == 0 || self.protocol == flow.protocol)
            && addr_matches(flow.src_ip, self.src_ip, self.src_mask)
            && addr_matches(flow.dst_ip, self.dst_ip, self.dst_mask)
    }

    /// 룰 필드의 일관성을 검증합니다.
    pub fn validate(&self) -> Result<(), NatError> {
        if self.nat_port_min > self.nat_port_max {
            return Err(NatError::InvalidRule {
                reason: format!(
                    "nat_port_min ({}) exceeds nat_port_max ({})",
                    self.nat_port_min, self.nat_port_max
                ),
            });
        }
        if self.nat_type == NatType::Dnat && self.nat_port_min == 0 {
            return Err(NatError::InvalidRule {
                reason: "dnat rule requires a non-zero nat_port_min".to_owned(),
            });
        }
        if self.nat_ip.is_unspecified() {
            return Err(NatError::InvalidRule {
                reason: "nat_ip must not be 0.0.0.0".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for NatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} src={}/{} dst={}/{} -> {}",
            self.nat_type,
            protocol_name(self.protocol),
            self.src_ip,
            self.src_mask,
            self.dst_ip,
            self.dst_mask,
            self.nat_ip
        )?;
        if self.nat_type == NatType::Dnat || self.nat_port_max > 0 {
            write!(f, ":{}-{}", self.nat_port_min, self.nat_port_max)?;
        }
        Ok(())
    }
}

// =============================================================================
// 룰 파일
// =============================================================================

/// 룰 파일의 `[[rules]]` 항목
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatRuleSpec {
    /// `snat` 또는 `dnat`
    pub nat_type: NatType,
    /// 출발지 CIDR (생략 시 any)
    #[serde(default)]
    pub src: Option<String>,
    /// 목적지 CIDR (생략 시 any)
    #[serde(default)]
    pub dst: Option<String>,
    /// 프로토콜 이름 또는 번호 (생략 시 any)
    #[serde(default)]
    pub protocol: Option<String>,
    /// 변환 주소
    pub nat_ip: Ipv4Addr,
    /// 변환 포트 범위 시작
    #[serde(default)]
    pub nat_port_min: u16,
    /// 변환 포트 범위 끝 (생략 시 `nat_port_min`)
    #[serde(default)]
    pub nat_port_max: Option<u16>,
}

impl TryFrom<NatRuleSpec> for NatRule {
    type Error = NatError;

    fn try_from(spec: NatRuleSpec) -> Result<Self, Self::Error> {
        let invalid = |reason: String| NatError::InvalidRule { reason };
        let (src_ip, src_mask) = parse_cidr(spec.src.as_deref().unwrap_or("any")).map_err(invalid)?;
        let (dst_ip, dst_mask) = parse_cidr(spec.dst.as_deref().unwrap_or("any")).map_err(invalid)?;
        let protocol = parse_protocol(spec.protocol.as_deref().unwrap_or("any")).map_err(invalid)?;

        let rule = NatRule {
            src_ip,
            src_mask,
            dst_ip,
            dst_mask,
            protocol,
            nat_type: spec.nat_type,
            nat_ip: spec.nat_ip,
            nat_port_min: spec.nat_port_min,
            nat_port_max: spec.nat_port_max.unwrap_or(spec.nat_port_min),
        };
        rule.validate()?;
        Ok(rule)
    }
}

#[derive(Debug, Deserialize)]
struct NatRuleFile {
    #[serde(default)]
    rules: Vec<NatRuleSpec>,
}

/// TOML 문자열에서 룰 목록을 파싱합니다 (파일 순서 유지).
pub fn parse_rules(toml_str: &str) -> Result<Vec<NatRule>, IronGateError> {
    let file: NatRuleFile = toml::from_str(toml_str).map_err(|e| ConfigError::ParseFailed {
        reason: e.to_string(),
    })?;
    let mut rules = Vec::with_capacity(file.rules.len());
    for (idx, spec) in file.rules.into_iter().enumerate() {
        let rule = NatRule::try_from(spec).map_err(|e| ConfigError::InvalidValue {
            field: format!("rules[{idx}]"),
            reason: e.to_string(),
        })?;
        rules.push(rule);
    }
    Ok(rules)
}

/// 룰 파일을 읽어 파싱합니다.
pub async fn load_rules(path: impl AsRef<Path>) -> Result<Vec<NatRule>, IronGateError> {
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
