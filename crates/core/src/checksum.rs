//! 인터넷 체크섬 (RFC 1071)
//!
//! IPv4 헤더, TCP/UDP 세그먼트(의사 헤더 포함) 체크섬을 계산합니다.
//! 모든 함수는 체크섬 필드 자체를 건너뛰고 합산하므로
//! 호출자가 필드를 미리 0으로 만들 필요가 없습니다.

use std::net::Ipv4Addr;

use crate::packet::{PROTO_TCP, PROTO_UDP};

/// IPv4 헤더 내 체크섬 필드 오프셋
const IP_CHECKSUM_OFFSET: usize = 10;
/// TCP 헤더 내 체크섬 필드 오프셋
const TCP_CHECKSUM_OFFSET: usize = 16;
/// UDP 헤더 내 체크섬 필드 오프셋
const UDP_CHECKSUM_OFFSET: usize = 6;

/// 16비트 단위 1의 보수 합 (지정한 오프셋의 2바이트는 제외)
fn ones_complement_sum(mut sum: u32, data: &[u8], skip: Option<usize>) -> u32 {
    let mut chunks = data.chunks_exact(2);
    let mut offset = 0;
    for word in &mut chunks {
        if skip != Some(offset) {
            sum = sum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
        }
        offset += 2;
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([*last, 0])));
    }
    sum
}

/// 32비트 합을 16비트로 접고 보수를 취합니다.
fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    // fold 이후 sum <= 0xFFFF
    !(sum as u16)
}

fn pseudo_header_sum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, l4_len: usize) -> u32 {
    let s = src.octets();
    let d = dst.octets();
    let mut sum: u32 = 0;
    sum = sum.wrapping_add(u32::from(u16::from_be_bytes([s[0], s[1]])));
    sum = sum.wrapping_add(u32::from(u16::from_be_bytes([s[2], s[3]])));
    sum = sum.wrapping_add(u32::from(u16::from_be_bytes([d[0], d[1]])));
    sum = sum.wrapping_add(u32::from(u16::from_be_bytes([d[2], d[3]])));
    sum = sum.wrapping_add(u32::from(protocol));
    // L4 길이는 IPv4 total_length(u16) 이하이므로 u32로 안전
    sum.wrapping_add(l4_len as u32)
}

/// IPv4 헤더 체크섬을 계산합니다.
///
/// `header`는 옵션을 포함한 전체 헤더(IHL * 4 바이트)여야 합니다.
pub fn ip_checksum(header: &[u8]) -> u16 {
    fold(ones_complement_sum(0, header, Some(IP_CHECKSUM_OFFSET)))
}

/// TCP 체크섬을 계산합니다 (의사 헤더 포함).
///
/// `segment`는 TCP 헤더 + 페이로드입니다.
pub fn tcp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let sum = pseudo_header_sum(src, dst, PROTO_TCP, segment.len());
    fold(ones_complement_sum(sum, segment, Some(TCP_CHECKSUM_OFFSET)))
}

/// UDP 체크섬을 계산합니다 (의사 헤더 포함).
///
/// 계산 결과가 0이면 RFC 768에 따라 `0xFFFF`를 반환합니다.
/// (0은 "체크섬 없음"을 의미하기 때문)
pub fn udp_checksum(src: Ipv4Addr, dst: Ipv4Addr, datagram: &[u8]) -> u16 {
    let sum = pseudo_header_sum(src, dst, PROTO_UDP, datagram.len());
    match fold(ones_complement_sum(sum, datagram, Some(UDP_CHECKSUM_OFFSET))) {
        0 => 0xFFFF,
        c => c,
    }
}

/// 체크섬 필드를 포함한 전체 합이 유효한지 검증합니다.
///
/// 올바른 체크섬이 기록된 헤더는 전체 합의 보수가 0이 됩니다.
pub fn verify(data: &[u8]) -> bool {
    fold(ones_complement_sum(0, data, None)) == 0
}

/// 의사 헤더를 포함한 L4 세그먼트 체크섬이 유효한지 검증합니다.
pub fn verify_l4(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> bool {
    let sum = pseudo_header_sum(src, dst, protocol, segment.len());
    fold(ones_complement_sum(sum, segment, None)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wikipedia IPv4 체크섬 예제 헤더
    const SAMPLE_HEADER: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8, 0x00,
        0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn ip_checksum_matches_known_value() {
        assert_eq!(ip_checksum(&SAMPLE_HEADER), 0xb861);
    }

    #[test]
    fn ip_checksum_ignores_existing_field() {
        let mut header = SAMPLE_HEADER;
        header[10] = 0xde;
        header[11] = 0xad;
        assert_eq!(ip_checksum(&header), 0xb861);
    }

    #[test]
    fn verify_accepts_correct_header() {
        assert!(verify(&SAMPLE_HEADER));
    }

    #[test]
    fn verify_rejects_corrupted_header() {
        let mut header = SAMPLE_HEADER;
        header[15] ^= 0x01;
        assert!(!verify(&header));
    }

    #[test]
    fn odd_length_is_zero_padded() {
        // 홀수 길이: 마지막 바이트는 상위 8비트로 취급
        let sum = ones_complement_sum(0, &[0x01, 0x02, 0x03], None);
        assert_eq!(sum, 0x0102 + 0x0300);
    }

    #[test]
    fn tcp_checksum_roundtrips_through_verify() {
        let src = Ipv4Addr::new(192, 168, 1, 50);
        let dst = Ipv4Addr::new(93, 184, 216, 34);
        let mut segment = vec![0u8; 24];
        segment[0..2].copy_from_slice(&40000u16.to_be_bytes());
        segment[2..4].copy_from_slice(&443u16.to_be_bytes());
        segment[12] = 5 << 4;
        segment[20..24].copy_from_slice(b"ping");

        let c = tcp_checksum(src, dst, &segment);
        segment[16..18].copy_from_slice(&c.to_be_bytes());
        assert!(verify_l4(src, dst, PROTO_TCP, &segment));
    }

    #[test]
    fn udp_checksum_never_returns_zero() {
        // 어떤 입력이든 결과는 0이 아니어야 함
        let src = Ipv4Addr::new(0, 0, 0, 0);
        let dst = Ipv4Addr::new(0, 0, 0, 0);
        for len in [8usize, 9, 16] {
            let datagram = vec![0u8; len];
            assert_ne!(udp_checksum(src, dst, &datagram), 0);
        }
    }
}
