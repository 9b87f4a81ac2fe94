//! 네트워크 매칭 타입 — 5-tuple, 주소/마스크, 포트 범위
//!
//! NAT/QoS 룰은 모두 `(addr & mask) == (rule_addr & mask)` 형태의
//! 마스크 매칭을 사용합니다. 설정 파일에서는 CIDR 표기를 쓰고
//! [`parse_cidr`]로 `(주소, 마스크)` 쌍으로 변환합니다.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::packet::{PROTO_ICMP, PROTO_TCP, PROTO_UDP, protocol_name};

/// 5-tuple 플로우 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    /// 출발지 IP
    pub src_ip: Ipv4Addr,
    /// 목적지 IP
    pub dst_ip: Ipv4Addr,
    /// 출발지 포트 (TCP/UDP 외 프로토콜은 0)
    pub src_port: u16,
    /// 목적지 포트 (TCP/UDP 외 프로토콜은 0)
    pub dst_port: u16,
    /// IP 프로토콜 번호
    pub protocol: u8,
}

impl FlowKey {
    /// 새 플로우 키를 생성합니다.
    pub fn new(
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
    ) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }

    /// 출발지/목적지를 뒤바꾼 응답 방향 키를 반환합니다.
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }

    /// 대칭 XOR 해시
    ///
    /// 출발지/목적지를 뒤바꿔도 같은 값이 나옵니다.
    pub fn symmetric_hash(&self) -> u32 {
        u32::from(self.src_ip)
            ^ u32::from(self.dst_ip)
            ^ u32::from(self.src_port)
            ^ u32::from(self.dst_port)
            ^ u32::from(self.protocol)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{}",
            protocol_name(self.protocol),
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port
        )
    }
}

/// 마스크 매칭: `(addr & mask) == (net & mask)`
pub fn addr_matches(addr: Ipv4Addr, net: Ipv4Addr, mask: Ipv4Addr) -> bool {
    let m = u32::from(mask);
    (u32::from(addr) & m) == (u32::from(net) & m)
}

/// 프리픽스 길이를 넷마스크로 변환합니다 (`24` → `255.255.255.0`).
pub fn prefix_to_mask(prefix: u8) -> Ipv4Addr {
    match prefix {
        0 => Ipv4Addr::UNSPECIFIED,
        p if p >= 32 => Ipv4Addr::BROADCAST,
        p => Ipv4Addr::from(u32::MAX << (32 - u32::from(p))),
    }
}

/// CIDR 문자열을 `(네트워크 주소, 마스크)`로 파싱합니다.
///
/// - `"192.168.1.0/24"` → `(192.168.1.0, 255.255.255.0)`
/// - `"10.0.0.1"` → `(10.0.0.1, 255.255.255.255)`
/// - `"any"` → `(0.0.0.0, 0.0.0.0)`
pub fn parse_cidr(s: &str) -> Result<(Ipv4Addr, Ipv4Addr), String> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("any") {
        return Ok((Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED));
    }
    let (addr, prefix) = match s.split_once('/') {
        Some((a, p)) => {
            let prefix: u8 = p
                .parse()
                .map_err(|_| format!("invalid prefix length in '{s}'"))?;
            if prefix > 32 {
                return Err(format!("prefix length {prefix} exceeds 32 in '{s}'"));
            }
            (a, prefix)
        }
        None => (s, 32),
    };
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| format!("invalid ipv4 address in '{s}'"))?;
    Ok((addr, prefix_to_mask(prefix)))
}

/// 프로토콜 이름 또는 번호를 파싱합니다. `"any"`는 0 (와일드카드).
pub fn parse_protocol(s: &str) -> Result<u8, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "any" | "all" | "" => Ok(0),
        "tcp" => Ok(PROTO_TCP),
        "udp" => Ok(PROTO_UDP),
        "icmp" => Ok(PROTO_ICMP),
        other => other
            .parse::<u8>()
            .map_err(|_| format!("unknown protocol '{s}'")),
    }
}

/// 포함 범위 포트 구간 `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// 시작 포트 (포함)
    pub start: u16,
    /// 끝 포트 (포함)
    pub end: u16,
}

impl PortRange {
    /// 전체 포트 범위 (와일드카드)
    pub const ANY: PortRange = PortRange {
        start: 0,
        end: u16::MAX,
    };

    /// 새 범위를 생성합니다.
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// 단일 포트 범위
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    /// 포트가 범위에 포함되는지 확인합니다.
    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    /// `start <= end`인지 확인합니다.
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::ANY
    }
}

impl FromStr for PortRange {
    type Err = String;

    /// `"80"`, `"1000-2000"`, `"any"` 형식을 파싱합니다.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("any") {
            return Ok(Self::ANY);
        }
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| format!("invalid port '{p}' in '{s}'"))
        };
        let range = match s.split_once('-') {
            Some((a, b)) => Self::new(parse(a)?, parse(b)?),
            None => Self::single(parse(s)?),
        };
        if !range.is_valid() {
            return Err(format!("port range start exceeds end in '{s}'"));
        }
        Ok(range)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}
