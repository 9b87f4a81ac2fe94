//! QoS 엔진 — 분류, 클래스 큐, strict-priority 스케줄러
//!
//! 룰 리스트는 제어 평면에서 copy-on-write로 교체되고, 패킷 경로의 분류는
//! 스냅샷을 락 없이 순회합니다. 클래스 큐는 각자 락을 가지며
//! 우선순위/대역폭/버스트 값은 원자 변수로 보관합니다.
//!
//! 대역폭과 버스트는 저장만 되고 enqueue/dequeue 경로에서 적용되지 않습니다.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use irongate_core::config::QosConfig;
use irongate_core::error::QosError;
use irongate_core::metrics as m;
use irongate_core::packet::Packet;
use irongate_core::rules::{RuleId, RuleList, RuleSnapshot};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::class::{ClassId, dscp_fallback};
use crate::queue::{ClassQueue, EnqueueOutcome};
use crate::rule::QosRule;

/// 클래스별 통계 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    /// 클래스 번호 (0..8)
    pub class: u8,
    /// 클래스 이름
    pub name: &'static str,
    /// 스케줄링 우선순위 (클수록 먼저)
    pub priority: u8,
    /// 대역폭 (bytes/sec, 저장만 됨)
    pub bandwidth: u64,
    /// 버스트 (bytes, 저장만 됨)
    pub burst: u64,
    /// 현재 큐 길이
    pub queue_len: usize,
    /// 큐 용량
    pub capacity: usize,
    /// 큐에 들어간 패킷 수
    pub enqueued_packets: u64,
    /// 큐에 들어간 바이트 수
    pub enqueued_bytes: u64,
    /// 큐에서 나간 패킷 수
    pub dequeued_packets: u64,
    /// 큐에서 나간 바이트 수
    pub dequeued_bytes: u64,
    /// tail-drop된 패킷 수
    pub dropped_packets: u64,
    /// tail-drop된 바이트 수
    pub dropped_bytes: u64,
}

/// 엔진 전체 통계 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QosStats {
    /// 분류된 패킷 수
    pub classified: u64,
    /// 룰 매칭으로 분류된 패킷 수
    pub rule_matches: u64,
    /// DSCP 기본 매핑으로 분류된 패킷 수
    pub fallback: u64,
    /// 헤더를 읽지 못해 best-effort로 분류된 패킷 수
    pub malformed: u64,
    /// DSCP를 다시 쓴 패킷 수
    pub dscp_rewrites: u64,
    /// 큐에 들어간 패킷 수 (전 클래스 합)
    pub enqueued_packets: u64,
    /// 큐에 들어간 바이트 수
    pub enqueued_bytes: u64,
    /// 큐에서 나간 패킷 수
    pub dequeued_packets: u64,
    /// 큐에서 나간 바이트 수
    pub dequeued_bytes: u64,
    /// tail-drop된 패킷 수
    pub dropped_packets: u64,
    /// tail-drop된 바이트 수
    pub dropped_bytes: u64,
    /// 현재 큐에 있는 패킷 수 (전 클래스 합)
    pub queued: usize,
}

#[derive(Default)]
struct Counters {
    classified: AtomicU64,
    rule_matches: AtomicU64,
    fallback: AtomicU64,
    malformed: AtomicU64,
    dscp_rewrites: AtomicU64,
}

struct ClassSlot {
    queue: ClassQueue,
    priority: AtomicU8,
    bandwidth: AtomicU64,
    burst: AtomicU64,
}

/// QoS 엔진
pub struct QosEngine {
    rules: RuleList<QosRule>,
    classes: [ClassSlot; ClassId::COUNT],
    counters: Counters,
}

impl QosEngine {
    /// 클래스별 큐 용량으로 엔진을 생성합니다. 클래스 *i*의 기본 우선순위는 *i*입니다.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            rules: RuleList::new(),
            classes: std::array::from_fn(|i| ClassSlot {
                queue: ClassQueue::new(queue_capacity),
                priority: AtomicU8::new(i as u8),
                bandwidth: AtomicU64::new(0),
                burst: AtomicU64::new(0),
            }),
            counters: Counters::default(),
        }
    }

    /// 설정에서 엔진을 생성하고 `[[qos.classes]]` 오버라이드를 적용합니다.
    pub fn from_config(config: &QosConfig) -> Self {
        let engine = Self::new(config.queue_capacity);
        for ov in &config.classes {
            let class = match ClassId::new(ov.class) {
                Ok(class) => class,
                Err(e) => {
                    warn!(error = %e, "ignoring class override");
                    continue;
                }
            };
            if let Some(priority) = ov.priority
                && let Err(e) = engine.set_class_priority(class, priority)
            {
                warn!(%class, error = %e, "ignoring priority override");
            }
            if ov.bandwidth.is_some() || ov.burst.is_some() {
                let slot = engine.slot(class);
                engine.set_class_bandwidth(
                    class,
                    ov.bandwidth.unwrap_or_else(|| slot.bandwidth.load(Ordering::Relaxed)),
                    ov.burst.unwrap_or_else(|| slot.burst.load(Ordering::Relaxed)),
                );
            }
        }
        engine
    }

    fn slot(&self, class: ClassId) -> &ClassSlot {
        &self.classes[class.index()]
    }

    // ─── 룰 관리 ────────────────────────────────────────────────────

    /// 룰을 검증 후 리스트 맨 앞에 추가합니다.
    pub fn add_rule(&self, rule: QosRule) -> Result<RuleId, QosError> {
        rule.validate()?;
        let desc = rule.to_string();
        let id = self.rules.add(rule);
        info!(%id, rule = desc.as_str(), "qos rule added");
        Ok(id)
    }

    /// 룰을 삭제합니다.
    pub fn delete_rule(&self, id: RuleId) -> Result<(), QosError> {
        match self.rules.delete(id) {
            Some(_) => {
                info!(%id, "qos rule deleted");
                Ok(())
            }
            None => Err(QosError::RuleNotFound { id: id.0 }),
        }
    }

    /// 모든 룰을 삭제하고 삭제된 개수를 반환합니다.
    pub fn flush_rules(&self) -> usize {
        let n = self.rules.flush();
        info!(removed = n, "qos rules flushed");
        n
    }

    /// 현재 룰 스냅샷 (매칭 순서)
    pub fn rules(&self) -> RuleSnapshot<QosRule> {
        self.rules.snapshot()
    }

    // ─── 분류 ───────────────────────────────────────────────────────

    /// 패킷을 트래픽 클래스로 분류합니다.
    ///
    /// 룰을 앞에서부터 검사하여 첫 매칭 룰의 클래스를 반환합니다. 룰에 `set_dscp`가
    /// 있으면 DSCP를 다시 쓰고 IP 체크섬을 재계산합니다. 매칭 룰이 없으면
    /// DSCP 기본 매핑을, IPv4 헤더를 읽을 수 없으면 best-effort를 사용합니다.
    pub fn classify(&self, packet: &mut Packet) -> ClassId {
        self.counters.classified.fetch_add(1, Ordering::Relaxed);
        let parsed = packet
            .ipv4()
            .and_then(|ip| packet.flow().map(|flow| (flow, ip.dscp())));
        let (flow, dscp) = match parsed {
            Ok(v) => v,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "unclassifiable packet, using best-effort");
                return ClassId::BEST_EFFORT;
            }
        };

        let rules = self.rules.snapshot();
        let Some(entry) = rules.iter().find(|e| e.rule.matches(&flow, dscp)) else {
            self.counters.fallback.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::QOS_FALLBACK_CLASSIFICATIONS_TOTAL).increment(1);
            let class = dscp_fallback(dscp);
            trace!(flow = %flow, dscp, %class, "classified by dscp");
            return class;
        };

        self.counters.rule_matches.fetch_add(1, Ordering::Relaxed);
        let rule = &entry.rule;
        if let Some(new_dscp) = rule.set_dscp {
            match packet
                .set_dscp(new_dscp)
                .and_then(|()| packet.update_ip_checksum())
            {
                Ok(()) => {
                    self.counters.dscp_rewrites.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!(error = %e, "dscp rewrite failed"),
            }
        }
        trace!(flow = %flow, rule = %entry.id, class = %rule.target_class, "classified by rule");
        rule.target_class
    }

    // ─── 큐잉 / 스케줄링 ────────────────────────────────────────────

    /// 패킷을 클래스 큐 끝에 넣습니다. 큐가 가득 차면 새 패킷을 버립니다.
    pub fn enqueue(&self, packet: Packet, class: ClassId) -> EnqueueOutcome {
        let queue = &self.slot(class).queue;
        let outcome = queue.push(packet);
        let label = class.traffic_class().as_str();
        match outcome {
            EnqueueOutcome::Queued => {
                metrics::counter!(m::QOS_ENQUEUED_TOTAL, m::LABEL_CLASS => label).increment(1);
            }
            EnqueueOutcome::TailDropped => {
                metrics::counter!(m::QOS_DROPPED_TOTAL, m::LABEL_CLASS => label).increment(1);
                debug!(%class, capacity = queue.capacity(), "queue full, packet dropped");
            }
        }
        publish_depth(class, queue);
        outcome
    }

    /// 비어있지 않은 클래스 중 우선순위가 가장 높은 클래스에서 패킷을 꺼냅니다.
    ///
    /// 같은 우선순위면 번호가 작은 클래스가 선택됩니다.
    pub fn dequeue(&self) -> Option<Packet> {
        loop {
            let class = self.select_class()?;
            if let Some(packet) = self.dequeue_class(class) {
                return Some(packet);
            }
            // 선택과 pop 사이에 다른 소비자가 비웠음
        }
    }

    /// 스케줄링 없이 지정 클래스에서 바로 꺼냅니다.
    pub fn dequeue_class(&self, class: ClassId) -> Option<Packet> {
        let queue = &self.slot(class).queue;
        let packet = queue.pop()?;
        metrics::counter!(m::QOS_DEQUEUED_TOTAL, m::LABEL_CLASS => class.traffic_class().as_str())
            .increment(1);
        publish_depth(class, queue);
        Some(packet)
    }

    fn select_class(&self) -> Option<ClassId> {
        let mut best: Option<(ClassId, u8)> = None;
        for class in ClassId::all() {
            let slot = self.slot(class);
            if slot.queue.is_empty() {
                continue;
            }
            let priority = slot.priority.load(Ordering::Relaxed);
            if best.is_none_or(|(_, p)| priority > p) {
                best = Some((class, priority));
            }
        }
        best.map(|(class, _)| class)
    }

    // ─── 클래스 설정 ────────────────────────────────────────────────

    /// 클래스 우선순위를 바꿉니다 (0~7, 클수록 먼저).
    pub fn set_class_priority(&self, class: ClassId, priority: u8) -> Result<(), QosError> {
        if usize::from(priority) >= ClassId::COUNT {
            return Err(QosError::InvalidPriority { priority });
        }
        self.slot(class).priority.store(priority, Ordering::Relaxed);
        info!(%class, priority, "qos class priority set");
        Ok(())
    }

    /// 클래스 대역폭과 버스트를 저장합니다. 속도 제한은 적용되지 않습니다.
    pub fn set_class_bandwidth(&self, class: ClassId, bandwidth: u64, burst: u64) {
        let slot = self.slot(class);
        slot.bandwidth.store(bandwidth, Ordering::Relaxed);
        slot.burst.store(burst, Ordering::Relaxed);
        info!(%class, bandwidth, burst, "qos class bandwidth set");
    }

    /// 클래스 우선순위
    pub fn class_priority(&self, class: ClassId) -> u8 {
        self.slot(class).priority.load(Ordering::Relaxed)
    }

    /// 클래스 큐 길이
    pub fn queue_len(&self, class: ClassId) -> usize {
        self.slot(class).queue.len()
    }

    /// 전체 클래스 큐 길이 합
    pub fn total_queued(&self) -> usize {
        self.classes.iter().map(|s| s.queue.len()).sum()
    }

    // ─── 통계 / 덤프 ────────────────────────────────────────────────

    /// 클래스 통계 스냅샷
    pub fn class_stats(&self, class: ClassId) -> ClassStats {
        let slot = self.slot(class);
        let (enqueued_packets, enqueued_bytes) = slot.queue.enqueued.load();
        let (dequeued_packets, dequeued_bytes) = slot.queue.dequeued.load();
        let (dropped_packets, dropped_bytes) = slot.queue.dropped.load();
        ClassStats {
            class: class.get(),
            name: class.traffic_class().as_str(),
            priority: slot.priority.load(Ordering::Relaxed),
            bandwidth: slot.bandwidth.load(Ordering::Relaxed),
            burst: slot.burst.load(Ordering::Relaxed),
            queue_len: slot.queue.len(),
            capacity: slot.queue.capacity(),
            enqueued_packets,
            enqueued_bytes,
            dequeued_packets,
            dequeued_bytes,
            dropped_packets,
            dropped_bytes,
        }
    }

    /// 엔진 전체 통계 스냅샷 (클래스 카운터 합산)
    pub fn stats(&self) -> QosStats {
        let c = &self.counters;
        let mut s = QosStats {
            classified: c.classified.load(Ordering::Relaxed),
            rule_matches: c.rule_matches.load(Ordering::Relaxed),
            fallback: c.fallback.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            dscp_rewrites: c.dscp_rewrites.load(Ordering::Relaxed),
            ..QosStats::default()
        };
        for class in ClassId::all() {
            let cs = self.class_stats(class);
            s.enqueued_packets += cs.enqueued_packets;
            s.enqueued_bytes += cs.enqueued_bytes;
            s.dequeued_packets += cs.dequeued_packets;
            s.dequeued_bytes += cs.dequeued_bytes;
            s.dropped_packets += cs.dropped_packets;
            s.dropped_bytes += cs.dropped_bytes;
            s.queued += cs.queue_len;
        }
        s
    }

    /// 사람이 읽을 수 있는 통계 텍스트 (전체 + 클래스별 한 줄)
    pub fn dump_stats(&self) -> String {
        let s = self.stats();
        let mut out = String::from("QoS statistics:\n");
        let rows: [(&str, u64); 11] = [
            ("classified", s.classified),
            ("rule matches", s.rule_matches),
            ("dscp fallback", s.fallback),
            ("malformed", s.malformed),
            ("dscp rewrites", s.dscp_rewrites),
            ("enqueued packets", s.enqueued_packets),
            ("enqueued bytes", s.enqueued_bytes),
            ("dequeued packets", s.dequeued_packets),
            ("dequeued bytes", s.dequeued_bytes),
            ("dropped packets", s.dropped_packets),
            ("dropped bytes", s.dropped_bytes),
        ];
        for (label, value) in rows {
            let _ = writeln!(out, "  {label:<18} {value}");
        }
        let _ = writeln!(out, "  {:<18} {}", "queued", s.queued);
        let _ = writeln!(out, "  {:<18} {}", "rules", self.rules.len());
        for class in ClassId::all() {
            let cs = self.class_stats(class);
            let _ = writeln!(
                out,
                "  [{}] {:<22} prio={} queue={}/{} enq={} deq={} drop={}",
                cs.class,
                cs.name,
                cs.priority,
                cs.queue_len,
                cs.capacity,
                cs.enqueued_packets,
                cs.dequeued_packets,
                cs.dropped_packets
            );
        }
        out
    }

    /// 한 클래스의 상세 통계 텍스트
    pub fn dump_class_stats(&self, class: ClassId) -> String {
        let cs = self.class_stats(class);
        let mut out = format!("QoS class {class}:\n");
        let rows: [(&str, u64); 11] = [
            ("priority", u64::from(cs.priority)),
            ("bandwidth", cs.bandwidth),
            ("burst", cs.burst),
            ("queue length", cs.queue_len as u64),
            ("capacity", cs.capacity as u64),
            ("enqueued packets", cs.enqueued_packets),
            ("enqueued bytes", cs.enqueued_bytes),
            ("dequeued packets", cs.dequeued_packets),
            ("dequeued bytes", cs.dequeued_bytes),
            ("dropped packets", cs.dropped_packets),
            ("dropped bytes", cs.dropped_bytes),
        ];
        for (label, value) in rows {
            let _ = writeln!(out, "  {label:<18} {value}");
        }
        out
    }
}

impl Default for QosEngine {
    fn default() -> Self {
        Self::from_config(&QosConfig::default())
    }
}

fn publish_depth(class: ClassId, queue: &ClassQueue) {
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::QOS_QUEUE_DEPTH, m::LABEL_CLASS => class.traffic_class().as_str())
        .set(queue.len() as f64);
}
