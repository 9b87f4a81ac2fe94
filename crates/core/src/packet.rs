//! 패킷 디스크립터 — IPv4 / TCP / UDP 헤더 접근자
//!
//! [`Packet`]은 IP 계층이 소유한 가변 버퍼를 감쌉니다.
//! 한 번의 파이프라인 통과 동안 호출자가 소유하며,
//! 훅/NAT/QoS는 `&mut Packet`으로 헤더를 읽고 재작성합니다.
//!
//! # 레이아웃
//! ```text
//! 0          ihl*4                ihl*4 + l4_len
//! ├─ IPv4 ───┼─ TCP/UDP ─────────┼─ payload ─┤
//! ```
//!
//! 재작성 메서드는 체크섬을 자동으로 갱신하지 않습니다.
//! 필드를 모두 바꾼 뒤 [`Packet::update_l4_checksum`], [`Packet::update_ip_checksum`]
//! 순서로 호출해야 합니다.

use std::fmt;
use std::net::Ipv4Addr;

use bytes::BytesMut;

use crate::checksum;
use crate::error::PacketError;
use crate::net::FlowKey;

// =============================================================================
// 프로토콜 상수
// =============================================================================

/// ICMP 프로토콜 번호
pub const PROTO_ICMP: u8 = 1;
/// TCP 프로토콜 번호
pub const PROTO_TCP: u8 = 6;
/// UDP 프로토콜 번호
pub const PROTO_UDP: u8 = 17;

/// IPv4 최소 헤더 길이 (옵션 없음)
pub const IPV4_MIN_HEADER_LEN: usize = 20;
/// TCP 최소 헤더 길이
pub const TCP_MIN_HEADER_LEN: usize = 20;
/// UDP 헤더 길이
pub const UDP_HEADER_LEN: usize = 8;

/// 프로토콜 번호를 사람이 읽을 수 있는 이름으로 변환합니다.
pub fn protocol_name(protocol: u8) -> &'static str {
    match protocol {
        0 => "any",
        PROTO_ICMP => "icmp",
        PROTO_TCP => "tcp",
        PROTO_UDP => "udp",
        _ => "other",
    }
}

// =============================================================================
// 디바이스
// =============================================================================

/// 패킷이 들어오거나 나가는 네트워크 디바이스
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetDevice {
    /// 인터페이스 인덱스
    pub ifindex: u32,
    /// 인터페이스 이름 (예: `"eth0"`)
    pub name: String,
}

impl NetDevice {
    /// 새 디바이스 디스크립터를 생성합니다.
    pub fn new(ifindex: u32, name: impl Into<String>) -> Self {
        Self {
            ifindex,
            name: name.into(),
        }
    }
}

impl fmt::Display for NetDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.ifindex)
    }
}

// =============================================================================
// 헤더 뷰
// =============================================================================

/// 파싱된 IPv4 헤더 (읽기 전용 사본)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// IHL (32비트 워드 단위)
    pub ihl: u8,
    /// TOS 바이트 (DSCP 6비트 + ECN 2비트)
    pub tos: u8,
    /// total length 필드
    pub total_length: u16,
    /// 프로토콜 번호
    pub protocol: u8,
    /// 헤더 체크섬
    pub checksum: u16,
    /// 출발지 주소
    pub src: Ipv4Addr,
    /// 목적지 주소
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// 옵션을 포함한 헤더 길이 (바이트)
    pub fn header_len(&self) -> usize {
        usize::from(self.ihl) * 4
    }

    /// TOS 바이트에서 DSCP 6비트를 추출합니다.
    pub fn dscp(&self) -> u8 {
        self.tos >> 2
    }
}

/// 파싱된 TCP/UDP 헤더의 공통 필드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L4Header {
    /// 출발지 포트
    pub src_port: u16,
    /// 목적지 포트
    pub dst_port: u16,
    /// L4 체크섬
    pub checksum: u16,
}

// =============================================================================
// Packet
// =============================================================================

/// 가변 패킷 버퍼
///
/// 버퍼는 IPv4 헤더로 시작해야 합니다 (L2 헤더는 IP 계층이 이미 제거).
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    data: BytesMut,
}

impl Packet {
    /// 바이트 슬라이스를 복사하여 패킷을 생성합니다.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: BytesMut::from(data),
        }
    }

    /// 기존 버퍼의 소유권을 가져와 패킷을 생성합니다.
    pub fn from_buf(data: BytesMut) -> Self {
        Self { data }
    }

    /// 버퍼 길이 (바이트)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 버퍼가 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 버퍼를 지정 길이로 자릅니다.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// 원시 바이트 뷰
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// 가변 원시 바이트 뷰
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 내부 버퍼를 반환합니다.
    pub fn into_inner(self) -> BytesMut {
        self.data
    }

    /// IPv4 헤더를 파싱합니다.
    ///
    /// # 에러
    /// - `Truncated`: 버퍼가 20바이트 또는 IHL이 가리키는 길이보다 짧음
    /// - `NotIpv4`: 버전 필드가 4가 아님
    /// - `BadHeaderLength`: IHL < 5
    pub fn ipv4(&self) -> Result<Ipv4Header, PacketError> {
        let d = &self.data;
        ensure_len(d.len(), IPV4_MIN_HEADER_LEN)?;

        let version = d[0] >> 4;
        if version != 4 {
            return Err(PacketError::NotIpv4 { version });
        }
        let ihl = d[0] & 0x0F;
        if ihl < 5 {
            return Err(PacketError::BadHeaderLength { ihl });
        }
        ensure_len(d.len(), usize::from(ihl) * 4)?;

        Ok(Ipv4Header {
            ihl,
            tos: d[1],
            total_length: u16::from_be_bytes([d[2], d[3]]),
            protocol: d[9],
            checksum: u16::from_be_bytes([d[10], d[11]]),
            src: Ipv4Addr::new(d[12], d[13], d[14], d[15]),
            dst: Ipv4Addr::new(d[16], d[17], d[18], d[19]),
        })
    }

    /// TCP 또는 UDP 헤더를 파싱합니다.
    ///
    /// 다른 프로토콜이면 `UnsupportedProtocol`을 반환합니다.
    pub fn l4(&self) -> Result<L4Header, PacketError> {
        let ip = self.ipv4()?;
        let off = self.l4_offset(&ip)?;
        let d = &self.data;
        let checksum_at = match ip.protocol {
            PROTO_TCP => off + 16,
            PROTO_UDP => off + 6,
            other => return Err(PacketError::UnsupportedProtocol(other)),
        };
        Ok(L4Header {
            src_port: u16::from_be_bytes([d[off], d[off + 1]]),
            dst_port: u16::from_be_bytes([d[off + 2], d[off + 3]]),
            checksum: u16::from_be_bytes([d[checksum_at], d[checksum_at + 1]]),
        })
    }

    /// 5-tuple 플로우 키를 추출합니다.
    ///
    /// TCP/UDP가 아닌 프로토콜은 포트를 0으로 채웁니다.
    pub fn flow(&self) -> Result<FlowKey, PacketError> {
        let ip = self.ipv4()?;
        let (src_port, dst_port) = match ip.protocol {
            PROTO_TCP | PROTO_UDP => {
                let l4 = self.l4()?;
                (l4.src_port, l4.dst_port)
            }
            _ => (0, 0),
        };
        Ok(FlowKey {
            src_ip: ip.src,
            dst_ip: ip.dst,
            src_port,
            dst_port,
            protocol: ip.protocol,
        })
    }

    /// 출발지 주소를 재작성합니다 (체크섬 미갱신).
    pub fn set_src_addr(&mut self, addr: Ipv4Addr) -> Result<(), PacketError> {
        self.ipv4()?;
        self.data[12..16].copy_from_slice(&addr.octets());
        Ok(())
    }

    /// 목적지 주소를 재작성합니다 (체크섬 미갱신).
    pub fn set_dst_addr(&mut self, addr: Ipv4Addr) -> Result<(), PacketError> {
        self.ipv4()?;
        self.data[16..20].copy_from_slice(&addr.octets());
        Ok(())
    }

    /// 출발지 포트를 재작성합니다 (체크섬 미갱신).
    pub fn set_src_port(&mut self, port: u16) -> Result<(), PacketError> {
        let off = self.ported_l4_offset()?;
        self.data[off..off + 2].copy_from_slice(&port.to_be_bytes());
        Ok(())
    }

    /// 목적지 포트를 재작성합니다 (체크섬 미갱신).
    pub fn set_dst_port(&mut self, port: u16) -> Result<(), PacketError> {
        let off = self.ported_l4_offset()?;
        self.data[off + 2..off + 4].copy_from_slice(&port.to_be_bytes());
        Ok(())
    }

    /// DSCP 6비트를 재작성합니다. ECN 2비트는 보존됩니다 (체크섬 미갱신).
    pub fn set_dscp(&mut self, dscp: u8) -> Result<(), PacketError> {
        self.ipv4()?;
        self.data[1] = ((dscp & 0x3F) << 2) | (self.data[1] & 0x03);
        Ok(())
    }

    /// IPv4 헤더 체크섬을 다시 계산하여 기록합니다.
    pub fn update_ip_checksum(&mut self) -> Result<(), PacketError> {
        let ip = self.ipv4()?;
        let hlen = ip.header_len();
        let c = checksum::ip_checksum(&self.data[..hlen]);
        self.data[10..12].copy_from_slice(&c.to_be_bytes());
        Ok(())
    }

    /// TCP/UDP 체크섬을 다시 계산하여 기록합니다.
    ///
    /// 세그먼트 범위는 IPv4 total length를 따르되 버퍼 길이를 넘지 않습니다.
    pub fn update_l4_checksum(&mut self) -> Result<(), PacketError> {
        let ip = self.ipv4()?;
        let off = self.l4_offset(&ip)?;
        let end = usize::from(ip.total_length).clamp(off, self.data.len());
        let segment = &self.data[off..end];
        let (c, at) = match ip.protocol {
            PROTO_TCP => (checksum::tcp_checksum(ip.src, ip.dst, segment), off + 16),
            PROTO_UDP => (checksum::udp_checksum(ip.src, ip.dst, segment), off + 6),
            other => return Err(PacketError::UnsupportedProtocol(other)),
        };
        self.data[at..at + 2].copy_from_slice(&c.to_be_bytes());
        Ok(())
    }

    /// L4 헤더 시작 오프셋 (최소 헤더 길이 검증 포함)
    fn l4_offset(&self, ip: &Ipv4Header) -> Result<usize, PacketError> {
        let off = ip.header_len();
        match ip.protocol {
            PROTO_TCP => {
                ensure_len(self.data.len(), off + TCP_MIN_HEADER_LEN)?;
                let data_offset = self.data[off + 12] >> 4;
                if data_offset < 5 {
                    return Err(PacketError::BadHeaderLength { ihl: data_offset });
                }
                ensure_len(self.data.len(), off + usize::from(data_offset) * 4)?;
            }
            PROTO_UDP => ensure_len(self.data.len(), off + UDP_HEADER_LEN)?,
            other => return Err(PacketError::UnsupportedProtocol(other)),
        }
        Ok(off)
    }

    fn ported_l4_offset(&self) -> Result<usize, PacketError> {
        let ip = self.ipv4()?;
        self.l4_offset(&ip)
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.flow() {
            Ok(flow) => write!(f, "Packet({flow}, {} bytes)", self.data.len()),
            Err(_) => write!(f, "Packet(<malformed>, {} bytes)", self.data.len()),
        }
    }
}

fn ensure_len(actual: usize, needed: usize) -> Result<(), PacketError> {
    if actual < needed {
        Err(PacketError::Truncated { needed, actual })
    } else {
        Ok(())
    }
}

// =============================================================================
// 테스트용 패킷 빌더
// =============================================================================

/// 테스트와 벤치마크에서 사용하는 IPv4 + TCP/UDP 패킷 빌더
///
/// 생성된 패킷은 IP/L4 체크섬이 모두 올바르게 채워져 있습니다.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    flow: FlowKey,
    tos: u8,
    payload: Vec<u8>,
}

impl PacketBuilder {
    /// 플로우 키로 빌더를 생성합니다.
    pub fn new(flow: FlowKey) -> Self {
        Self {
            flow,
            tos: 0,
            payload: Vec::new(),
        }
    }

    /// TCP 패킷 빌더
    pub fn tcp(src: Ipv4Addr, src_port: u16, dst: Ipv4Addr, dst_port: u16) -> Self {
        Self::new(FlowKey::new(src, dst, src_port, dst_port, PROTO_TCP))
    }

    /// UDP 패킷 빌더
    pub fn udp(src: Ipv4Addr, src_port: u16, dst: Ipv4Addr, dst_port: u16) -> Self {
        Self::new(FlowKey::new(src, dst, src_port, dst_port, PROTO_UDP))
    }

    /// DSCP 값을 지정합니다.
    pub fn dscp(mut self, dscp: u8) -> Self {
        self.tos = (dscp & 0x3F) << 2;
        self
    }

    /// 페이로드를 지정합니다.
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// 패킷을 생성합니다.
    pub fn build(self) -> Packet {
        let l4_len = match self.flow.protocol {
            PROTO_TCP => TCP_MIN_HEADER_LEN,
            PROTO_UDP => UDP_HEADER_LEN,
            _ => 0,
        };
        let total = IPV4_MIN_HEADER_LEN + l4_len + self.payload.len();
        let mut buf = vec![0u8; total];

        buf[0] = 0x45;
        buf[1] = self.tos;
        // 테스트 패킷은 u16 범위를 넘지 않음
        buf[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        buf[6] = 0x40; // DF
        buf[8] = 64;
        buf[9] = self.flow.protocol;
        buf[12..16].copy_from_slice(&self.flow.src_ip.octets());
        buf[16..20].copy_from_slice(&self.flow.dst_ip.octets());

        let l4 = IPV4_MIN_HEADER_LEN;
        if l4_len > 0 {
            buf[l4..l4 + 2].copy_from_slice(&self.flow.src_port.to_be_bytes());
            buf[l4 + 2..l4 + 4].copy_from_slice(&self.flow.dst_port.to_be_bytes());
        }
        match self.flow.protocol {
            PROTO_TCP => {
                buf[l4 + 12] = 5 << 4;
                buf[l4 + 13] = 0x18; // PSH|ACK
                buf[l4 + 14..l4 + 16].copy_from_slice(&64240u16.to_be_bytes());
            }
            PROTO_UDP => {
                let udp_len = (UDP_HEADER_LEN + self.payload.len()) as u16;
                buf[l4 + 4..l4 + 6].copy_from_slice(&udp_len.to_be_bytes());
            }
            _ => {}
        }
        buf[l4 + l4_len..].copy_from_slice(&self.payload);

        let mut packet = Packet::from_slice(&buf);
        if l4_len > 0 {
            // 위에서 만든 헤더는 항상 유효
            let _ = packet.update_l4_checksum();
        }
        let _ = packet.update_ip_checksum();
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{verify, verify_l4};

    fn sample_tcp() -> Packet {
        PacketBuilder::tcp(
            Ipv4Addr::new(192, 168, 1, 50),
            40000,
            Ipv4Addr::new(93, 184, 216, 34),
            443,
        )
        .payload(b"hello")
        .build()
    }

    fn checksums_valid(p: &Packet) -> bool {
        let ip = p.ipv4().unwrap();
        let hlen = ip.header_len();
        let bytes = p.as_bytes();
        verify(&bytes[..hlen]) && verify_l4(ip.src, ip.dst, ip.protocol, &bytes[hlen..])
    }

    #[test]
    fn builder_produces_valid_checksums() {
        let p = sample_tcp();
        assert!(checksums_valid(&p));

        let u = PacketBuilder::udp(
            Ipv4Addr::new(10, 0, 0, 1),
            5353,
            Ipv4Addr::new(10, 0, 0, 2),
            53,
        )
        .payload(b"query")
        .build();
        assert!(checksums_valid(&u));
    }

    #[test]
    fn parses_ipv4_and_ports() {
        let p = sample_tcp();
        let ip = p.ipv4().unwrap();
        assert_eq!(ip.src, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(ip.dst, Ipv4Addr::new(93, 184, 216, 34));
        assert_eq!(ip.protocol, PROTO_TCP);
        assert_eq!(ip.header_len(), 20);

        let l4 = p.l4().unwrap();
        assert_eq!(l4.src_port, 40000);
        assert_eq!(l4.dst_port, 443);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let p = Packet::from_slice(&[0x45, 0, 0, 20]);
        assert_eq!(
            p.ipv4(),
            Err(PacketError::Truncated {
                needed: 20,
                actual: 4
            })
        );
    }

    #[test]
    fn ihl_beyond_buffer_is_truncated() {
        let mut bytes = sample_tcp().as_bytes()[..20].to_vec();
        bytes[0] = 0x4F; // IHL=15 → 60바이트 필요
        let p = Packet::from_slice(&bytes);
        assert!(matches!(p.ipv4(), Err(PacketError::Truncated { needed: 60, .. })));
    }

    #[test]
    fn non_ipv4_is_rejected() {
        let mut bytes = sample_tcp().as_bytes().to_vec();
        bytes[0] = 0x65;
        let p = Packet::from_slice(&bytes);
        assert_eq!(p.ipv4(), Err(PacketError::NotIpv4 { version: 6 }));
    }

    #[test]
    fn short_ihl_is_rejected() {
        let mut bytes = sample_tcp().as_bytes().to_vec();
        bytes[0] = 0x44;
        let p = Packet::from_slice(&bytes);
        assert_eq!(p.ipv4(), Err(PacketError::BadHeaderLength { ihl: 4 }));
    }

    #[test]
    fn missing_tcp_header_is_truncated() {
        let bytes = sample_tcp().as_bytes()[..30].to_vec();
        let p = Packet::from_slice(&bytes);
        assert!(p.ipv4().is_ok());
        assert!(matches!(p.l4(), Err(PacketError::Truncated { .. })));
    }

    #[test]
    fn icmp_flow_has_zero_ports() {
        let p = PacketBuilder::new(FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            0,
            0,
            PROTO_ICMP,
        ))
        .payload(&[8, 0, 0, 0, 0, 1, 0, 1])
        .build();
        let flow = p.flow().unwrap();
        assert_eq!(flow.src_port, 0);
        assert_eq!(flow.dst_port, 0);
        assert_eq!(p.l4(), Err(PacketError::UnsupportedProtocol(PROTO_ICMP)));
    }

    #[test]
    fn rewrite_then_update_keeps_checksums_valid() {
        let mut p = sample_tcp();
        p.set_src_addr(Ipv4Addr::new(10, 0, 0, 1)).unwrap();
        p.set_src_port(1024).unwrap();
        p.update_l4_checksum().unwrap();
        p.update_ip_checksum().unwrap();

        assert!(checksums_valid(&p));
        let flow = p.flow().unwrap();
        assert_eq!(flow.src_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(flow.src_port, 1024);
        // 나머지 필드는 그대로
        assert_eq!(flow.dst_port, 443);
    }

    #[test]
    fn rewrite_without_update_breaks_checksum() {
        let mut p = sample_tcp();
        p.set_dst_port(8443).unwrap();
        assert!(!checksums_valid(&p));
    }

    #[test]
    fn set_dscp_preserves_ecn() {
        let mut bytes = sample_tcp().as_bytes().to_vec();
        bytes[1] = 0b0000_0011; // ECN=CE
        let mut p = Packet::from_slice(&bytes);
        p.set_dscp(46).unwrap();
        let ip = p.ipv4().unwrap();
        assert_eq!(ip.dscp(), 46);
        assert_eq!(ip.tos & 0x03, 0b11);
    }

    #[test]
    fn debug_shows_flow() {
        let p = sample_tcp();
        let s = format!("{p:?}");
        assert!(s.contains("192.168.1.50:40000"));
        let bad = Packet::from_slice(&[0u8; 3]);
        assert!(format!("{bad:?}").contains("malformed"));
    }
}
