//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 엔진은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다. 전역 레코더가 설치되지 않았으면 no-op입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `irongate_`
//! - 모듈명: `hook_`, `nat_`, `qos_`
//! - 접미어: `_total` (counter), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 훅 포인트 레이블 키 (pre_routing, local_in, forward, local_out, post_routing)
pub const LABEL_HOOK: &str = "hook";

/// verdict 레이블 키 (accept, drop, stolen, queue)
pub const LABEL_VERDICT: &str = "verdict";

/// 변환 방향 레이블 키 (outbound, inbound)
pub const LABEL_DIRECTION: &str = "direction";

/// 통과 사유 레이블 키 (no_rule, no_entry, malformed, table_full, unsupported)
pub const LABEL_REASON: &str = "reason";

/// 트래픽 클래스 레이블 키 (0~7)
pub const LABEL_CLASS: &str = "class";

// ─── Hook Dispatcher 메트릭 ─────────────────────────────────────────

/// Hook: verdict별 최종 판정 수 (counter, labels: hook, verdict)
pub const HOOK_VERDICTS_TOTAL: &str = "irongate_hook_verdicts_total";

/// Hook: REPEAT 상한 초과로 드롭된 횟수 (counter, label: hook)
pub const HOOK_REPEAT_LIMIT_TOTAL: &str = "irongate_hook_repeat_limit_total";

/// Hook: 정의되지 않은 verdict 코드 수 (counter)
pub const HOOK_UNKNOWN_VERDICTS_TOTAL: &str = "irongate_hook_unknown_verdicts_total";

/// Hook: 등록된 훅 수 (gauge, label: hook)
pub const HOOK_REGISTERED: &str = "irongate_hook_registered";

// ─── NAT Engine 메트릭 ──────────────────────────────────────────────

/// NAT: 변환된 패킷 수 (counter, label: direction)
pub const NAT_TRANSLATIONS_TOTAL: &str = "irongate_nat_translations_total";

/// NAT: 활성 연결 수 (gauge)
pub const NAT_CONNECTIONS: &str = "irongate_nat_connections";

/// NAT: 에이징으로 제거된 연결 수 (counter)
pub const NAT_TIMEOUTS_TOTAL: &str = "irongate_nat_timeouts_total";

/// NAT: 변환 없이 통과한 패킷 수 (counter, label: reason)
pub const NAT_PASSTHROUGH_TOTAL: &str = "irongate_nat_passthrough_total";

// ─── QoS Engine 메트릭 ──────────────────────────────────────────────

/// QoS: 큐에 들어간 패킷 수 (counter, label: class)
pub const QOS_ENQUEUED_TOTAL: &str = "irongate_qos_enqueued_total";

/// QoS: 큐에서 나간 패킷 수 (counter, label: class)
pub const QOS_DEQUEUED_TOTAL: &str = "irongate_qos_dequeued_total";

/// QoS: tail-drop된 패킷 수 (counter, label: class)
pub const QOS_DROPPED_TOTAL: &str = "irongate_qos_dropped_total";

/// QoS: 클래스별 큐 깊이 (gauge, label: class)
pub const QOS_QUEUE_DEPTH: &str = "irongate_qos_queue_depth";

/// QoS: 룰 없이 DSCP 기본 매핑으로 분류된 패킷 수 (counter)
pub const QOS_FALLBACK_CLASSIFICATIONS_TOTAL: &str = "irongate_qos_fallback_classifications_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "irongate_daemon_uptime_seconds";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `irongate-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Hook Dispatcher
    describe_counter!(
        HOOK_VERDICTS_TOTAL,
        "Final verdicts returned by hook chain invocations"
    );
    describe_counter!(
        HOOK_REPEAT_LIMIT_TOTAL,
        "Packets dropped because a hook exceeded the REPEAT bound"
    );
    describe_counter!(
        HOOK_UNKNOWN_VERDICTS_TOTAL,
        "Undefined verdict codes returned by hook callbacks (treated as DROP)"
    );
    describe_gauge!(HOOK_REGISTERED, "Number of hooks registered per hook point");

    // NAT Engine
    describe_counter!(
        NAT_TRANSLATIONS_TOTAL,
        "Packets rewritten by the NAT engine"
    );
    describe_gauge!(NAT_CONNECTIONS, "Live entries in the NAT connection table");
    describe_counter!(
        NAT_TIMEOUTS_TOTAL,
        "NAT connections removed by the aging sweep"
    );
    describe_counter!(
        NAT_PASSTHROUGH_TOTAL,
        "Packets passed through without NAT translation"
    );

    // QoS Engine
    describe_counter!(QOS_ENQUEUED_TOTAL, "Packets accepted into a QoS class queue");
    describe_counter!(QOS_DEQUEUED_TOTAL, "Packets scheduled out of a QoS class queue");
    describe_counter!(
        QOS_DROPPED_TOTAL,
        "Packets tail-dropped because the class queue was full"
    );
    describe_gauge!(QOS_QUEUE_DEPTH, "Current number of packets queued per class");
    describe_counter!(
        QOS_FALLBACK_CLASSIFICATIONS_TOTAL,
        "Packets classified by the DSCP fallback ladder"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
}
