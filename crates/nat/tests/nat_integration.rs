//! NAT 엔진 통합 테스트
//!
//! - 룰 매칭 / 순서
//! - 포트 할당 순환
//! - 에이징 경계
//! - 왕복 변환 (outbound → inbound)
//! - 동시 조회-또는-생성
//! - 용량 초과 시 통과

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;

use irongate_core::checksum::{verify, verify_l4};
use irongate_core::net::FlowKey;
use irongate_core::packet::{PROTO_TCP, PROTO_UDP, Packet, PacketBuilder};
use irongate_nat::{ConnState, NatEngine, NatRule, NatTimeouts, NatType, parse_rules};
use proptest::prelude::*;

const LAN_NET: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 0);
const LAN_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
const WAN_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const HOST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);
const SERVER: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

fn snat_engine() -> NatEngine {
    let engine = NatEngine::default();
    engine
        .add_rule(NatRule::snat(LAN_NET, LAN_MASK, WAN_IP))
        .expect("valid rule");
    engine
}

fn checksums_valid(p: &Packet) -> bool {
    let ip = p.ipv4().unwrap();
    let hlen = ip.header_len();
    let bytes = p.as_bytes();
    verify(&bytes[..hlen]) && verify_l4(ip.src, ip.dst, ip.protocol, &bytes[hlen..])
}

// =============================================================================
// 룰 매칭
// =============================================================================

#[test]
fn rule_mask_matches_subnet_only() {
    let engine = snat_engine();

    let mut inside = PacketBuilder::udp(HOST, 5000, SERVER, 53).build();
    assert!(engine.translate_outbound(&mut inside));

    let mut outside = PacketBuilder::udp(Ipv4Addr::new(192, 168, 2, 50), 5000, SERVER, 53).build();
    let before = outside.clone();
    assert!(!engine.translate_outbound(&mut outside));
    assert_eq!(outside, before, "unmatched packet must be untouched");
    assert_eq!(engine.stats().rule_misses, 1);
}

#[test]
fn most_recent_rule_wins() {
    let engine = snat_engine();
    let override_ip = Ipv4Addr::new(10, 0, 0, 99);
    engine
        .add_rule(NatRule::snat(HOST, Ipv4Addr::BROADCAST, override_ip))
        .unwrap();

    let mut pkt = PacketBuilder::tcp(HOST, 40000, SERVER, 443).build();
    assert!(engine.translate_outbound(&mut pkt));
    assert_eq!(pkt.ipv4().unwrap().src, override_ip);
}

#[test]
fn deleted_rule_no_longer_matches() {
    let engine = NatEngine::default();
    let id = engine
        .add_rule(NatRule::snat(LAN_NET, LAN_MASK, WAN_IP))
        .unwrap();
    engine.delete_rule(id).unwrap();
    assert!(engine.delete_rule(id).is_err());

    let mut pkt = PacketBuilder::udp(HOST, 5000, SERVER, 53).build();
    assert!(!engine.translate_outbound(&mut pkt));
}

#[test]
fn flush_rules_keeps_existing_connections() {
    let engine = snat_engine();
    let mut first = PacketBuilder::udp(HOST, 5000, SERVER, 53).build();
    assert!(engine.translate_outbound(&mut first));

    assert_eq!(engine.flush_rules(), 1);
    // 기존 연결은 룰 없이도 계속 변환됨
    let mut second = PacketBuilder::udp(HOST, 5000, SERVER, 53).build();
    assert!(engine.translate_outbound(&mut second));
    assert_eq!(first.as_bytes(), second.as_bytes());
    // 새 플로우는 룰이 없으므로 통과
    let mut other = PacketBuilder::udp(HOST, 5001, SERVER, 53).build();
    assert!(!engine.translate_outbound(&mut other));
}

// =============================================================================
// 포트 할당
// =============================================================================

#[test]
fn port_allocation_never_below_1024_and_wraps() {
    let engine = NatEngine::default();
    let mut saw_wrap = false;
    let mut prev = 0u16;
    for _ in 0..65_000 {
        let p = engine.allocate_port();
        assert!(p >= 1024);
        if prev == 65535 {
            assert_eq!(p, 1024);
            saw_wrap = true;
        }
        prev = p;
    }
    assert!(saw_wrap);
}

#[test]
fn each_new_flow_gets_next_port() {
    let engine = snat_engine();
    for (i, sport) in [5000u16, 5001, 5002].into_iter().enumerate() {
        let mut pkt = PacketBuilder::udp(HOST, sport, SERVER, 53).build();
        assert!(engine.translate_outbound(&mut pkt));
        assert_eq!(pkt.l4().unwrap().src_port, 1024 + i as u16);
    }
}

// =============================================================================
// 에이징
// =============================================================================

#[test]
fn aging_boundary_for_udp() {
    let engine = snat_engine();
    let key = FlowKey::new(HOST, SERVER, 5000, 53, PROTO_UDP);
    let conn = engine.create_entry(&key, NatType::Snat).unwrap();
    assert_eq!(conn.timeout_ms, 30_000);
    let t = conn.last_seen_ms;

    assert_eq!(engine.age_connections_at(t + 29_999), 0);
    assert!(engine.find_entry(&key).is_some());

    assert_eq!(engine.age_connections_at(t + 30_001), 1);
    assert!(engine.find_entry(&key).is_none());

    let stats = engine.stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.active_connections, 0);
}

#[test]
fn tcp_entries_use_longer_timeout() {
    let engine = snat_engine();
    let key = FlowKey::new(HOST, SERVER, 40000, 443, PROTO_TCP);
    let conn = engine.create_entry(&key, NatType::Snat).unwrap();
    let t = conn.last_seen_ms;

    assert_eq!(engine.age_connections_at(t + 30_001), 0);
    assert_eq!(engine.age_connections_at(t + 300_001), 1);
}

#[test]
fn custom_timeouts_from_constructor() {
    let engine = NatEngine::new(
        8,
        8,
        NatTimeouts {
            tcp_ms: 10,
            udp_ms: 5,
        },
    );
    engine
        .add_rule(NatRule::snat(LAN_NET, LAN_MASK, WAN_IP))
        .unwrap();
    let key = FlowKey::new(HOST, SERVER, 1, 2, 47);
    // 기타 프로토콜은 UDP 타임아웃
    let conn = engine.create_entry(&key, NatType::Snat).unwrap();
    assert_eq!(conn.timeout_ms, 5);
}

// =============================================================================
// 왕복 변환
// =============================================================================

#[test]
fn outbound_then_inbound_restores_original_destination() {
    let engine = snat_engine();

    let mut out = PacketBuilder::tcp(HOST, 40000, SERVER, 443)
        .payload(b"GET / HTTP/1.1\r\n")
        .build();
    assert!(engine.translate_outbound(&mut out));
    assert!(checksums_valid(&out));
    let translated = out.flow().unwrap();
    assert_eq!(translated.src_ip, WAN_IP);
    assert_eq!(translated.dst_ip, SERVER);
    assert_eq!(translated.dst_port, 443);

    // 서버 응답: SERVER:443 -> WAN_IP:allocated
    let original_reply = PacketBuilder::tcp(SERVER, 443, HOST, 40000)
        .payload(b"HTTP/1.1 200 OK\r\n")
        .build();
    let mut reply = PacketBuilder::tcp(SERVER, 443, WAN_IP, translated.src_port)
        .payload(b"HTTP/1.1 200 OK\r\n")
        .build();
    assert!(engine.translate_inbound(&mut reply));
    assert!(checksums_valid(&reply));

    let restored = reply.flow().unwrap();
    assert_eq!(restored.dst_ip, HOST);
    assert_eq!(restored.dst_port, 40000);
    // 재작성된 필드 외에는 원래 응답과 바이트 단위로 같음
    assert_eq!(reply.as_bytes(), original_reply.as_bytes());

    let stats = engine.stats();
    assert_eq!(stats.translations_outbound, 1);
    assert_eq!(stats.translations_inbound, 1);
    assert_eq!(stats.packets, 2);
}

#[test]
fn first_translation_marks_entry_established() {
    let engine = snat_engine();
    let key = FlowKey::new(HOST, SERVER, 5000, 53, PROTO_UDP);
    assert_eq!(
        engine.create_entry(&key, NatType::Snat).unwrap().state,
        ConnState::New
    );

    let mut pkt = PacketBuilder::udp(HOST, 5000, SERVER, 53).build();
    let len = pkt.len() as u64;
    assert!(engine.translate_outbound(&mut pkt));
    let conn = engine.find_entry(&key).unwrap();
    assert_eq!(conn.state, ConnState::Established);
    assert_eq!(conn.packets, 1);
    assert_eq!(conn.bytes, len);
}

#[test]
fn inbound_from_wrong_peer_is_not_translated() {
    let engine = snat_engine();
    let mut out = PacketBuilder::udp(HOST, 5000, SERVER, 53).build();
    assert!(engine.translate_outbound(&mut out));
    let port = out.l4().unwrap().src_port;

    let mut spoofed = PacketBuilder::udp(Ipv4Addr::new(6, 6, 6, 6), 53, WAN_IP, port).build();
    assert!(!engine.translate_inbound(&mut spoofed));
    assert_eq!(spoofed.ipv4().unwrap().dst, WAN_IP);
}

#[test]
fn dnat_entries_are_applied_outbound_but_not_reversed() {
    let engine = NatEngine::default();
    let public = Ipv4Addr::new(203, 0, 113, 1);
    let web = Ipv4Addr::new(192, 168, 1, 10);
    engine
        .add_rule(NatRule::dnat(public, Ipv4Addr::BROADCAST, web, 8080).with_protocol(PROTO_TCP))
        .unwrap();

    let client = Ipv4Addr::new(198, 51, 100, 7);
    let key = FlowKey::new(client, public, 50000, 80, PROTO_TCP);
    engine.create_entry(&key, NatType::Dnat).unwrap();

    let mut inbound = PacketBuilder::tcp(client, 50000, public, 80).build();
    assert!(engine.translate_outbound(&mut inbound));
    let flow = inbound.flow().unwrap();
    assert_eq!((flow.dst_ip, flow.dst_port), (web, 8080));
    assert_eq!((flow.src_ip, flow.src_port), (client, 50000));
    assert!(checksums_valid(&inbound));

    // 웹 서버 응답은 되돌리지 않음
    let mut reply = PacketBuilder::tcp(web, 8080, client, 50000).build();
    assert!(!engine.translate_inbound(&mut reply));
}

// =============================================================================
// 동시성 / 용량
// =============================================================================

#[test]
fn concurrent_first_packets_create_single_entry() {
    let engine = Arc::new(snat_engine());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut pkt = PacketBuilder::udp(HOST, 6000, SERVER, 53).build();
                assert!(engine.translate_outbound(&mut pkt));
                pkt.l4().unwrap().src_port
            })
        })
        .collect();

    let ports: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ports.windows(2).all(|w| w[0] == w[1]), "ports diverged: {ports:?}");
    assert_eq!(engine.connection_count(), 1);
    assert_eq!(engine.stats().connections_created, 1);
}

#[test]
fn full_table_passes_new_flows_through() {
    let engine = NatEngine::new(4, 2, NatTimeouts::default());
    engine
        .add_rule(NatRule::snat(LAN_NET, LAN_MASK, WAN_IP))
        .unwrap();

    for sport in [1u16, 2] {
        let mut pkt = PacketBuilder::udp(HOST, sport, SERVER, 53).build();
        assert!(engine.translate_outbound(&mut pkt));
    }
    let mut third = PacketBuilder::udp(HOST, 3, SERVER, 53).build();
    assert!(!engine.translate_outbound(&mut third));
    assert_eq!(third.ipv4().unwrap().src, HOST);

    let stats = engine.stats();
    assert_eq!(stats.creation_failures, 1);
    assert_eq!(stats.active_connections, 2);

    // 기존 연결은 계속 변환됨
    let mut again = PacketBuilder::udp(HOST, 1, SERVER, 53).build();
    assert!(engine.translate_outbound(&mut again));
}

#[test]
fn table_full_non_matching_counts_rule_miss() {
    // Given: 용량 1 테이블이 SNAT 연결 하나로 가득 참
    let engine = NatEngine::new(4, 1, NatTimeouts::default());
    engine
        .add_rule(NatRule::snat(LAN_NET, LAN_MASK, WAN_IP))
        .unwrap();
    let mut first = PacketBuilder::udp(HOST, 1, SERVER, 53).build();
    assert!(engine.translate_outbound(&mut first));

    // When: 어떤 룰과도 매칭되지 않는 WAN 출발 패킷
    let mut stray = PacketBuilder::udp(SERVER, 443, Ipv4Addr::new(8, 8, 8, 8), 53).build();
    assert!(!engine.translate_outbound(&mut stray));

    // Then: 용량 초과가 아니라 룰 미스로 집계됨
    let stats = engine.stats();
    assert_eq!(stats.rule_misses, 1);
    assert_eq!(stats.creation_failures, 0);
    assert_eq!(stats.active_connections, 1);
}

#[test]
fn malformed_packet_passes_through() {
    let engine = snat_engine();
    let mut bytes = PacketBuilder::tcp(HOST, 1, SERVER, 2).build().as_bytes().to_vec();
    bytes.truncate(24);
    let mut pkt = Packet::from_slice(&bytes);
    assert!(!engine.translate_outbound(&mut pkt));
    assert!(!engine.translate_inbound(&mut pkt));
    assert_eq!(engine.stats().malformed, 2);
}

#[test]
fn remove_entry_frees_slot() {
    let engine = snat_engine();
    let key = FlowKey::new(HOST, SERVER, 5000, 53, PROTO_UDP);
    engine.create_entry(&key, NatType::Snat).unwrap();
    assert!(engine.remove_entry(&key).is_some());
    assert!(engine.remove_entry(&key).is_none());
    assert_eq!(engine.connection_count(), 0);
}

// =============================================================================
// 룰 파일 / 통계
// =============================================================================

#[test]
fn demo_rule_file_parses() {
    let content = include_str!("../../../demos/nat-rules.toml");
    let rules = parse_rules(content).expect("demo rules should parse");
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].nat_type, NatType::Snat);
    assert_eq!(rules[1].nat_port_min, 8080);
}

#[tokio::test]
async fn load_rules_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nat.toml");
    tokio::fs::write(
        &path,
        "[[rules]]\nnat_type = \"snat\"\nsrc = \"10.1.0.0/16\"\nnat_ip = \"198.51.100.1\"\n",
    )
    .await
    .unwrap();

    let rules = irongate_nat::load_rules(&path).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].src_mask, Ipv4Addr::new(255, 255, 0, 0));

    assert!(irongate_nat::load_rules(dir.path().join("missing.toml")).await.is_err());
}

#[test]
fn stats_serialize_to_json() {
    let engine = snat_engine();
    let mut pkt = PacketBuilder::udp(HOST, 5000, SERVER, 53).build();
    engine.translate_outbound(&mut pkt);
    let json = serde_json::to_value(engine.stats()).unwrap();
    assert_eq!(json["translations_outbound"], 1);
    assert_eq!(json["active_connections"], 1);
}

proptest! {
    #[test]
    fn translated_packets_keep_valid_checksums(
        host in 1u8..255,
        sport in 1u16..,
        dport in 1u16..,
        payload in proptest::collection::vec(any::<u8>(), 0..64),
        tcp in any::<bool>(),
    ) {
        let engine = snat_engine();
        let src = Ipv4Addr::new(192, 168, 1, host);
        let builder = if tcp {
            PacketBuilder::tcp(src, sport, SERVER, dport)
        } else {
            PacketBuilder::udp(src, sport, SERVER, dport)
        };
        let mut pkt = builder.payload(&payload).build();
        prop_assert!(engine.translate_outbound(&mut pkt));
        prop_assert!(checksums_valid(&pkt));
    }
}
