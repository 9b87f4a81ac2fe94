//! NAT 엔진 — 룰, 연결 테이블, 포트 할당기를 묶어 패킷을 변환합니다.
//!
//! # 데이터 경로 정책
//! 변환 함수는 에러를 반환하지 않습니다. 잘못된 형식의 패킷, 매칭 룰 없음,
//! 테이블 용량 초과는 모두 "변환 없이 통과"(`false`)로 처리하고 카운터만 올립니다.
//!
//! # 시간
//! 엔진은 생성 시점의 [`Instant`]를 기준으로 한 밀리초 시계를 사용합니다.
//! 테스트는 [`NatEngine::age_connections_at`]으로 임의 시각의 스윕을 실행할 수 있습니다.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use irongate_core::config::{DEFAULT_TCP_TIMEOUT_MS, DEFAULT_UDP_TIMEOUT_MS, NatConfig};
use irongate_core::error::{NatError, PacketError};
use irongate_core::metrics as m;
use irongate_core::net::FlowKey;
use irongate_core::packet::{PROTO_TCP, PROTO_UDP, Packet};
use irongate_core::rules::{RuleId, RuleList, RuleSnapshot};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::port::PortAllocator;
use crate::rule::{NatRule, NatType};
use crate::table::{ConnState, ConnTable, FindOrCreate, NatConnection};

/// 테이블 포화 경고 로그 간격 (실패 횟수)
const TABLE_FULL_WARN_EVERY: u64 = 1024;

/// 프로토콜별 유휴 타임아웃
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatTimeouts {
    /// TCP (ms)
    pub tcp_ms: u64,
    /// UDP 및 기타 프로토콜 (ms)
    pub udp_ms: u64,
}

impl NatTimeouts {
    /// 프로토콜에 해당하는 타임아웃
    pub fn for_protocol(&self, protocol: u8) -> u64 {
        match protocol {
            PROTO_TCP => self.tcp_ms,
            _ => self.udp_ms,
        }
    }
}

impl Default for NatTimeouts {
    fn default() -> Self {
        Self {
            tcp_ms: DEFAULT_TCP_TIMEOUT_MS,
            udp_ms: DEFAULT_UDP_TIMEOUT_MS,
        }
    }
}

/// NAT 통계 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NatStats {
    /// 현재 연결 수
    pub active_connections: u64,
    /// 생성된 연결 누계
    pub connections_created: u64,
    /// 출발 방향 변환 수
    pub translations_outbound: u64,
    /// 응답 방향 변환 수
    pub translations_inbound: u64,
    /// 변환된 패킷 수
    pub packets: u64,
    /// 변환된 바이트 수
    pub bytes: u64,
    /// 에이징으로 제거된 연결 수
    pub timeouts: u64,
    /// 매칭 룰/엔트리가 없어 통과한 패킷 수
    pub rule_misses: u64,
    /// 형식 오류 또는 비 TCP/UDP로 통과한 패킷 수
    pub malformed: u64,
    /// 용량 초과로 연결 생성에 실패한 횟수
    pub creation_failures: u64,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    outbound: AtomicU64,
    inbound: AtomicU64,
    packets: AtomicU64,
    bytes: AtomicU64,
    timeouts: AtomicU64,
    rule_misses: AtomicU64,
    malformed: AtomicU64,
    creation_failures: AtomicU64,
}

/// NAT 엔진
pub struct NatEngine {
    rules: RuleList<NatRule>,
    table: ConnTable,
    ports: PortAllocator,
    timeouts: NatTimeouts,
    epoch: Instant,
    counters: Counters,
}

impl NatEngine {
    /// 버킷 수, 최대 연결 수, 타임아웃으로 엔진을 생성합니다.
    pub fn new(bucket_count: usize, max_connections: usize, timeouts: NatTimeouts) -> Self {
        Self {
            rules: RuleList::new(),
            table: ConnTable::new(bucket_count, max_connections),
            ports: PortAllocator::new(),
            timeouts,
            epoch: Instant::now(),
            counters: Counters::default(),
        }
    }

    /// 설정에서 엔진을 생성합니다.
    pub fn from_config(config: &NatConfig) -> Self {
        Self::new(
            config.bucket_count,
            config.max_connections,
            NatTimeouts {
                tcp_ms: config.tcp_timeout_ms,
                udp_ms: config.udp_timeout_ms,
            },
        )
    }

    /// 엔진 시계 (생성 이후 경과 ms)
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// 프로토콜별 타임아웃
    pub fn timeouts(&self) -> NatTimeouts {
        self.timeouts
    }

    // ─── 룰 관리 ────────────────────────────────────────────────────

    /// 룰을 검증 후 리스트 맨 앞에 추가합니다.
    pub fn add_rule(&self, rule: NatRule) -> Result<RuleId, NatError> {
        rule.validate()?;
        let desc = rule.to_string();
        let id = self.rules.add(rule);
        info!(%id, rule = desc.as_str(), "nat rule added");
        Ok(id)
    }

    /// 룰을 삭제합니다.
    pub fn delete_rule(&self, id: RuleId) -> Result<(), NatError> {
        match self.rules.delete(id) {
            Some(_) => {
                info!(%id, "nat rule deleted");
                Ok(())
            }
            None => Err(NatError::RuleNotFound { id: id.0 }),
        }
    }

    /// 모든 룰을 삭제하고 삭제된 개수를 반환합니다.
    pub fn flush_rules(&self) -> usize {
        let n = self.rules.flush();
        info!(removed = n, "nat rules flushed");
        n
    }

    /// 현재 룰 스냅샷 (매칭 순서)
    pub fn rules(&self) -> RuleSnapshot<NatRule> {
        self.rules.snapshot()
    }

    // ─── 연결 관리 ──────────────────────────────────────────────────

    /// 원본 5-tuple로 연결을 조회합니다.
    pub fn find_entry(&self, key: &FlowKey) -> Option<NatConnection> {
        self.table.get(key)
    }

    /// 지정한 변환 종류의 룰과 매칭되면 연결을 생성합니다.
    ///
    /// 이미 같은 5-tuple의 연결이 있으면 그 연결을 반환합니다.
    /// 매칭 룰이 없거나 테이블이 가득 차면 `None`입니다.
    pub fn create_entry(&self, key: &FlowKey, nat_type: NatType) -> Option<NatConnection> {
        let now = self.now_ms();
        match self
            .table
            .find_or_create(key, || self.build_entry(key, nat_type, now), |_| {})
        {
            FindOrCreate::Found(conn) => Some(conn),
            FindOrCreate::Created(conn) => {
                self.on_created(&conn);
                Some(conn)
            }
            FindOrCreate::NoMatch => None,
            FindOrCreate::TableFull => {
                self.on_table_full(key);
                None
            }
        }
    }

    /// 연결을 명시적으로 제거합니다.
    pub fn remove_entry(&self, key: &FlowKey) -> Option<NatConnection> {
        let removed = self.table.remove(key);
        if removed.is_some() {
            self.publish_connection_gauge();
            debug!(flow = %key, "nat connection removed");
        }
        removed
    }

    /// SNAT 포트를 할당합니다.
    pub fn allocate_port(&self) -> u16 {
        self.ports.allocate()
    }

    /// 현재 연결 수
    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    fn build_entry(&self, key: &FlowKey, nat_type: NatType, now: u64) -> Option<NatConnection> {
        let hit = self
            .rules
            .find_first(|r| r.nat_type == nat_type && r.matches(key))?;
        let rule = &hit.rule;

        let (nat_src_ip, nat_src_port, nat_dst_ip, nat_dst_port) = match nat_type {
            NatType::Snat => (rule.nat_ip, self.ports.allocate(), key.dst_ip, key.dst_port),
            // 포트 범위 중 첫 포트만 사용
            NatType::Dnat => (key.src_ip, key.src_port, rule.nat_ip, rule.nat_port_min),
        };

        Some(NatConnection {
            orig: *key,
            nat_src_ip,
            nat_dst_ip,
            nat_src_port,
            nat_dst_port,
            nat_type,
            state: ConnState::New,
            timeout_ms: self.timeouts.for_protocol(key.protocol),
            last_seen_ms: now,
            packets: 0,
            bytes: 0,
        })
    }

    fn on_created(&self, conn: &NatConnection) {
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        self.publish_connection_gauge();
        debug!(
            flow = %conn.orig,
            translated = %conn.translated(),
            nat_type = conn.nat_type.as_str(),
            "nat connection created"
        );
    }

    fn on_table_full(&self, key: &FlowKey) {
        let prev = self.counters.creation_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::NAT_PASSTHROUGH_TOTAL, m::LABEL_REASON => "table_full").increment(1);
        let err = NatError::TableFull {
            capacity: self.table.capacity(),
        };
        // 첫 실패와 이후 TABLE_FULL_WARN_EVERY 번마다 warn, 나머지는 debug
        if prev % TABLE_FULL_WARN_EVERY == 0 {
            warn!(flow = %key, error = %err, failures = prev + 1, "passing packet untranslated");
        } else {
            debug!(flow = %key, error = %err, "passing packet untranslated");
        }
    }

    // ─── 변환 ───────────────────────────────────────────────────────

    /// 출발 방향 패킷을 변환합니다.
    ///
    /// 5-tuple의 연결을 찾거나 SNAT 룰로 새로 만들고, 연결에 저장된 변환 튜플로
    /// 주소/포트를 재작성한 뒤 L4, IP 체크섬 순으로 재계산합니다.
    /// 변환했으면 `true`.
    pub fn translate_outbound(&self, packet: &mut Packet) -> bool {
        let Some(flow) = self.parse(packet) else {
            return false;
        };
        let now = self.now_ms();
        let len = packet.len() as u64;

        let outcome = self.table.find_or_create(
            &flow,
            || self.build_entry(&flow, NatType::Snat, now),
            |c| touch(c, now, len),
        );
        let conn = match outcome {
            FindOrCreate::Found(conn) => conn,
            FindOrCreate::Created(conn) => {
                self.on_created(&conn);
                conn
            }
            FindOrCreate::NoMatch => {
                self.counters.rule_misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::NAT_PASSTHROUGH_TOTAL, m::LABEL_REASON => "no_rule")
                    .increment(1);
                trace!(flow = %flow, "no nat rule matched");
                return false;
            }
            FindOrCreate::TableFull => {
                self.on_table_full(&flow);
                return false;
            }
        };

        if !self.rewrite(packet, &conn.translated()) {
            return false;
        }
        self.counters.outbound.fetch_add(1, Ordering::Relaxed);
        self.count_translated(len, "outbound");
        trace!(flow = %flow, translated = %conn.translated(), "outbound translated");
        true
    }

    /// 응답 방향 패킷을 되돌립니다.
    ///
    /// 연결 테이블 전체를 선형 탐색하여, 패킷의 목적지가 SNAT 연결의 변환 출발지와
    /// 같고 패킷의 출발지가 원본 목적지와 같은 연결을 찾습니다. 찾으면 목적지를
    /// 원본 출발지 주소/포트로 재작성합니다. DNAT 연결은 되돌리지 않습니다.
    pub fn translate_inbound(&self, packet: &mut Packet) -> bool {
        let Some(flow) = self.parse(packet) else {
            return false;
        };
        let now = self.now_ms();
        let len = packet.len() as u64;

        let hit = self.table.scan_update(
            |c| {
                c.nat_type == NatType::Snat
                    && c.orig.protocol == flow.protocol
                    && c.nat_src_ip == flow.dst_ip
                    && c.nat_src_port == flow.dst_port
                    && c.orig.dst_ip == flow.src_ip
                    && c.orig.dst_port == flow.src_port
            },
            |c| touch(c, now, len),
        );
        let Some(conn) = hit else {
            self.counters.rule_misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::NAT_PASSTHROUGH_TOTAL, m::LABEL_REASON => "no_entry")
                .increment(1);
            trace!(flow = %flow, "no nat entry for inbound packet");
            return false;
        };

        let mut restored = flow;
        restored.dst_ip = conn.orig.src_ip;
        restored.dst_port = conn.orig.src_port;
        if !self.rewrite(packet, &restored) {
            return false;
        }
        self.counters.inbound.fetch_add(1, Ordering::Relaxed);
        self.count_translated(len, "inbound");
        trace!(flow = %flow, restored = %restored, "inbound translated");
        true
    }

    fn parse(&self, packet: &Packet) -> Option<FlowKey> {
        match packet.flow() {
            Ok(flow) if matches!(flow.protocol, PROTO_TCP | PROTO_UDP) => Some(flow),
            Ok(flow) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::NAT_PASSTHROUGH_TOTAL, m::LABEL_REASON => "unsupported")
                    .increment(1);
                trace!(protocol = flow.protocol, "non tcp/udp packet, not translated");
                None
            }
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::NAT_PASSTHROUGH_TOTAL, m::LABEL_REASON => "malformed")
                    .increment(1);
                debug!(error = %e, "malformed packet, not translated");
                None
            }
        }
    }

    fn rewrite(&self, packet: &mut Packet, to: &FlowKey) -> bool {
        match apply_tuple(packet, to) {
            Ok(()) => true,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "packet rewrite failed");
                false
            }
        }
    }

    fn count_translated(&self, len: u64, direction: &'static str) {
        self.counters.packets.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(len, Ordering::Relaxed);
        metrics::counter!(m::NAT_TRANSLATIONS_TOTAL, m::LABEL_DIRECTION => direction).increment(1);
    }

    // ─── 에이징 ─────────────────────────────────────────────────────

    /// 현재 시각 기준으로 만료된 연결을 제거합니다.
    pub fn age_connections(&self) -> usize {
        self.age_connections_at(self.now_ms())
    }

    /// `now_ms` 시각 기준으로 `now - last_seen > timeout`인 연결을 제거합니다.
    pub fn age_connections_at(&self, now_ms: u64) -> usize {
        let removed = self.table.expire(now_ms);
        if removed > 0 {
            self.counters
                .timeouts
                .fetch_add(removed as u64, Ordering::Relaxed);
            metrics::counter!(m::NAT_TIMEOUTS_TOTAL).increment(removed as u64);
            debug!(removed, remaining = self.table.len(), "nat connections aged out");
        }
        self.publish_connection_gauge();
        removed
    }

    fn publish_connection_gauge(&self) {
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(m::NAT_CONNECTIONS).set(self.table.len() as f64);
    }

    // ─── 통계 / 덤프 ────────────────────────────────────────────────

    /// 통계 스냅샷
    pub fn stats(&self) -> NatStats {
        let c = &self.counters;
        NatStats {
            active_connections: self.table.len() as u64,
            connections_created: c.created.load(Ordering::Relaxed),
            translations_outbound: c.outbound.load(Ordering::Relaxed),
            translations_inbound: c.inbound.load(Ordering::Relaxed),
            packets: c.packets.load(Ordering::Relaxed),
            bytes: c.bytes.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            rule_misses: c.rule_misses.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            creation_failures: c.creation_failures.load(Ordering::Relaxed),
        }
    }

    /// 사람이 읽을 수 있는 통계 텍스트
    pub fn dump_stats(&self) -> String {
        let s = self.stats();
        let mut out = String::from("NAT statistics:\n");
        let rows: [(&str, u64); 10] = [
            ("active connections", s.active_connections),
            ("connections created", s.connections_created),
            ("outbound translations", s.translations_outbound),
            ("inbound translations", s.translations_inbound),
            ("packets", s.packets),
            ("bytes", s.bytes),
            ("timeouts", s.timeouts),
            ("rule misses", s.rule_misses),
            ("malformed", s.malformed),
            ("creation failures", s.creation_failures),
        ];
        for (label, value) in rows {
            let _ = writeln!(out, "  {label:<22} {value}");
        }
        let _ = writeln!(out, "  {:<22} {}", "rules", self.rules.len());
        out
    }

    /// 연결 테이블 텍스트 덤프 (연결당 한 줄)
    pub fn dump_table(&self) -> String {
        let now = self.now_ms();
        let entries = self.table.entries();
        let mut out = format!(
            "NAT connection table ({} entries, {} buckets):\n",
            entries.len(),
            self.table.bucket_count()
        );
        for c in &entries {
            let _ = writeln!(
                out,
                "  {} => {} {} {} idle={}ms timeout={}ms packets={} bytes={}",
                c.orig,
                c.translated(),
                c.nat_type,
                c.state.as_str(),
                now.saturating_sub(c.last_seen_ms),
                c.timeout_ms,
                c.packets,
                c.bytes
            );
        }
        out
    }
}

impl Default for NatEngine {
    fn default() -> Self {
        Self::from_config(&NatConfig::default())
    }
}

/// 주소/포트를 `to`로 바꾸고 L4, IP 순서로 체크섬을 재계산합니다.
fn apply_tuple(packet: &mut Packet, to: &FlowKey) -> Result<(), PacketError> {
    packet.set_src_addr(to.src_ip)?;
    packet.set_dst_addr(to.dst_ip)?;
    packet.set_src_port(to.src_port)?;
    packet.set_dst_port(to.dst_port)?;
    packet.update_l4_checksum()?;
    packet.update_ip_checksum()
}

fn touch(conn: &mut NatConnection, now: u64, len: u64) {
    conn.state = ConnState::Established;
    conn.last_seen_ms = now;
    conn.packets += 1;
    conn.bytes += len;
}
