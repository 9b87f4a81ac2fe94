//! 훅 디스패처 — 포인트별 우선순위 체인 관리 및 호출
//!
//! # 동시성
//! 등록/해제는 드물게 일어나는 제어 경로 연산이므로 포인트별 `RwLock` 아래에서
//! 체인을 통째로 복사해 교체합니다 (copy-on-write).
//! 패킷 경로([`HookDispatcher::invoke`])는 `Arc` 스냅샷만 잡고 락 없이 순회하므로
//! 여러 코어에서 동시에 호출해도 서로를 막지 않습니다.
//!
//! # 정렬 규칙
//! 체인은 `priority` 오름차순입니다 (작을수록 먼저 실행).
//! 새 훅은 기존 항목 중 `priority >= new.priority`인 첫 위치 앞에 삽입되므로,
//! 같은 우선순위끼리는 나중에 등록한 훅이 먼저 실행됩니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use irongate_core::metrics as m;
use irongate_core::packet::{NetDevice, Packet};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::point::HookPoint;
use crate::verdict::{RawVerdict, Verdict};

/// 기본 REPEAT 상한
pub const DEFAULT_MAX_REPEATS: u32 = 8;

// ─── 콜백 trait ─────────────────────────────────────────────────────

/// 콜백에 전달되는 호출 문맥
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// 현재 훅 포인트
    pub point: HookPoint,
    /// 수신 디바이스 (로컬 생성 패킷이면 `None`)
    pub in_dev: Option<&'a NetDevice>,
    /// 송신 디바이스 (아직 라우팅 전이면 `None`)
    pub out_dev: Option<&'a NetDevice>,
}

/// 패킷 필터 콜백
///
/// 콜백이 필요로 하는 상태(private data)는 구현 타입의 필드로 둡니다.
/// 클로저 `Fn(&mut Packet, &HookContext) -> V` (`V: Into<RawVerdict>`)는
/// 블랭킷 구현으로 바로 사용할 수 있습니다.
pub trait PacketHook: Send + Sync {
    /// 패킷 한 개를 판정합니다.
    fn on_packet(&self, packet: &mut Packet, ctx: &HookContext<'_>) -> RawVerdict;

    /// 로그용 이름
    fn name(&self) -> &str {
        "anonymous"
    }
}

impl<F, V> PacketHook for F
where
    F: Fn(&mut Packet, &HookContext<'_>) -> V + Send + Sync,
    V: Into<RawVerdict>,
{
    fn on_packet(&self, packet: &mut Packet, ctx: &HookContext<'_>) -> RawVerdict {
        self(packet, ctx).into()
    }
}

/// 숫자 verdict 코드를 반환하는 콜백 어댑터
///
/// 외부 드라이버처럼 verdict를 `u32`로 돌려주는 콜백을 감쌉니다.
pub struct RawHook<F> {
    name: String,
    callback: F,
}

impl<F> RawHook<F>
where
    F: Fn(&mut Packet, &HookContext<'_>) -> u32 + Send + Sync,
{
    /// 이름과 콜백으로 어댑터를 생성합니다.
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

impl<F> PacketHook for RawHook<F>
where
    F: Fn(&mut Packet, &HookContext<'_>) -> u32 + Send + Sync,
{
    fn on_packet(&self, packet: &mut Packet, ctx: &HookContext<'_>) -> RawVerdict {
        RawVerdict((self.callback)(packet, ctx))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ─── 등록 핸들 ──────────────────────────────────────────────────────

/// 등록된 훅의 식별자
///
/// [`HookDispatcher::unregister`]에 전달하여 정확히 그 등록만 제거합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle {
    id: u64,
    point: HookPoint,
}

impl HookHandle {
    /// 등록된 훅 포인트
    pub fn point(&self) -> HookPoint {
        self.point
    }
}

struct Registration {
    id: u64,
    priority: i32,
    hook: Arc<dyn PacketHook>,
}

impl Clone for Registration {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            priority: self.priority,
            hook: Arc::clone(&self.hook),
        }
    }
}

// ─── 통계 ───────────────────────────────────────────────────────────

/// 훅 포인트별 통계 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HookStats {
    /// 체인 호출 횟수
    pub invocations: u64,
    /// 최종 ACCEPT
    pub accepted: u64,
    /// 최종 DROP (REPEAT 상한/미정의 verdict 포함)
    pub dropped: u64,
    /// 최종 STOLEN
    pub stolen: u64,
    /// 최종 QUEUE
    pub queued: u64,
    /// REPEAT로 인한 재호출 횟수
    pub repeats: u64,
    /// REPEAT 상한 초과 횟수
    pub repeat_limit_hits: u64,
    /// 미정의 verdict 코드 수
    pub unknown_verdicts: u64,
}

#[derive(Default)]
struct PointCounters {
    invocations: AtomicU64,
    accepted: AtomicU64,
    dropped: AtomicU64,
    stolen: AtomicU64,
    queued: AtomicU64,
    repeats: AtomicU64,
    repeat_limit_hits: AtomicU64,
    unknown_verdicts: AtomicU64,
}

impl PointCounters {
    fn snapshot(&self) -> HookStats {
        HookStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            stolen: self.stolen.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            repeats: self.repeats.load(Ordering::Relaxed),
            repeat_limit_hits: self.repeat_limit_hits.load(Ordering::Relaxed),
            unknown_verdicts: self.unknown_verdicts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct Chain {
    hooks: RwLock<Arc<Vec<Registration>>>,
    counters: PointCounters,
}

// ─── 디스패처 ───────────────────────────────────────────────────────

/// 훅 디스패처
///
/// 5개 훅 포인트의 체인을 소유합니다. 프로세스당 하나를 만들어
/// `Arc`로 공유하거나 게이트웨이 핸들의 필드로 둡니다.
pub struct HookDispatcher {
    chains: [Chain; HookPoint::COUNT],
    next_id: AtomicU64,
    max_repeats: u32,
    unknown_points: AtomicU64,
}

impl HookDispatcher {
    /// REPEAT 상한을 지정하여 디스패처를 생성합니다.
    ///
    /// `max_repeats`가 0이면 1로 올립니다.
    pub fn new(max_repeats: u32) -> Self {
        Self {
            chains: Default::default(),
            next_id: AtomicU64::new(1),
            max_repeats: max_repeats.max(1),
            unknown_points: AtomicU64::new(0),
        }
    }

    /// 설정에서 디스패처를 생성합니다.
    pub fn from_config(config: &irongate_core::config::HookConfig) -> Self {
        Self::new(config.max_repeats)
    }

    /// REPEAT 상한
    pub fn max_repeats(&self) -> u32 {
        self.max_repeats
    }

    /// 훅을 등록합니다.
    ///
    /// 중복 검사는 하지 않습니다. 같은 콜백을 두 번 등록하면 두 번 실행됩니다.
    pub fn register<H>(&self, point: HookPoint, priority: i32, hook: H) -> HookHandle
    where
        H: PacketHook + 'static,
    {
        self.register_arc(point, priority, Arc::new(hook))
    }

    /// 클로저를 훅으로 등록합니다.
    pub fn register_fn<F, V>(&self, point: HookPoint, priority: i32, f: F) -> HookHandle
    where
        F: Fn(&mut Packet, &HookContext<'_>) -> V + Send + Sync + 'static,
        V: Into<RawVerdict>,
    {
        self.register(point, priority, f)
    }

    /// 이미 공유 중인 훅을 등록합니다.
    pub fn register_arc(
        &self,
        point: HookPoint,
        priority: i32,
        hook: Arc<dyn PacketHook>,
    ) -> HookHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = hook.name().to_owned();
        let chain = &self.chains[point.index()];

        let count = {
            let mut guard = chain.hooks.write();
            let pos = guard
                .iter()
                .position(|r| r.priority >= priority)
                .unwrap_or(guard.len());
            let mut next: Vec<Registration> = Vec::with_capacity(guard.len() + 1);
            next.extend(guard[..pos].iter().cloned());
            next.push(Registration { id, priority, hook });
            next.extend(guard[pos..].iter().cloned());
            let count = next.len();
            *guard = Arc::new(next);
            count
        };

        metrics::gauge!(m::HOOK_REGISTERED, m::LABEL_HOOK => point.as_str()).set(count as f64);
        info!(hook = point.as_str(), priority, name = name.as_str(), id, "hook registered");
        HookHandle { id, point }
    }

    /// 등록을 해제합니다. 이미 해제된 핸들이면 `false` (no-op).
    pub fn unregister(&self, handle: HookHandle) -> bool {
        let point = handle.point;
        let chain = &self.chains[point.index()];

        let remaining = {
            let mut guard = chain.hooks.write();
            let Some(pos) = guard.iter().position(|r| r.id == handle.id) else {
                debug!(hook = point.as_str(), id = handle.id, "unregister: handle not found");
                return false;
            };
            let mut next: Vec<Registration> = guard.iter().cloned().collect();
            next.remove(pos);
            let remaining = next.len();
            *guard = Arc::new(next);
            remaining
        };

        metrics::gauge!(m::HOOK_REGISTERED, m::LABEL_HOOK => point.as_str())
            .set(remaining as f64);
        info!(hook = point.as_str(), id = handle.id, "hook unregistered");
        true
    }

    /// 훅 포인트의 등록 수
    pub fn hook_count(&self, point: HookPoint) -> usize {
        self.chains[point.index()].hooks.read().len()
    }

    /// 훅 포인트의 체인을 실행하고 최종 verdict를 반환합니다.
    ///
    /// 등록된 훅이 없거나 모든 훅이 ACCEPT를 반환하면 `Accept`입니다.
    /// `Stolen`이 반환되면 호출자는 패킷을 더 이상 사용하지 않아야 합니다.
    pub fn invoke(
        &self,
        point: HookPoint,
        packet: &mut Packet,
        in_dev: Option<&NetDevice>,
        out_dev: Option<&NetDevice>,
    ) -> Verdict {
        let chain = &self.chains[point.index()];
        chain.counters.invocations.fetch_add(1, Ordering::Relaxed);

        let snapshot = Arc::clone(&chain.hooks.read());
        let ctx = HookContext {
            point,
            in_dev,
            out_dev,
        };

        for reg in snapshot.iter() {
            let mut repeats: u32 = 0;
            loop {
                let verdict = self.decode(point, reg, reg.hook.on_packet(packet, &ctx));
                match verdict {
                    Verdict::Accept => break,
                    Verdict::Repeat => {
                        repeats += 1;
                        chain.counters.repeats.fetch_add(1, Ordering::Relaxed);
                        if repeats > self.max_repeats {
                            chain
                                .counters
                                .repeat_limit_hits
                                .fetch_add(1, Ordering::Relaxed);
                            metrics::counter!(m::HOOK_REPEAT_LIMIT_TOTAL, m::LABEL_HOOK => point.as_str())
                                .increment(1);
                            warn!(
                                hook = point.as_str(),
                                name = reg.hook.name(),
                                max_repeats = self.max_repeats,
                                "repeat bound exceeded, dropping packet"
                            );
                            return self.finish(point, Verdict::Drop);
                        }
                    }
                    terminal => return self.finish(point, terminal),
                }
            }
        }

        self.finish(point, Verdict::Accept)
    }

    /// 숫자 훅 포인트로 체인을 실행합니다.
    ///
    /// 알 수 없는 번호는 경고를 남기고 `Accept`를 반환합니다 (fail-open).
    pub fn invoke_raw(
        &self,
        point: u32,
        packet: &mut Packet,
        in_dev: Option<&NetDevice>,
        out_dev: Option<&NetDevice>,
    ) -> Verdict {
        match HookPoint::try_from(point) {
            Ok(point) => self.invoke(point, packet, in_dev, out_dev),
            Err(e) => {
                self.unknown_points.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "invoke on unknown hook point, accepting packet");
                Verdict::Accept
            }
        }
    }

    /// 훅 포인트별 통계 스냅샷
    pub fn stats(&self, point: HookPoint) -> HookStats {
        self.chains[point.index()].counters.snapshot()
    }

    /// 알 수 없는 훅 포인트 번호로 호출된 횟수
    pub fn unknown_hook_points(&self) -> u64 {
        self.unknown_points.load(Ordering::Relaxed)
    }

    fn decode(&self, point: HookPoint, reg: &Registration, raw: RawVerdict) -> Verdict {
        match Verdict::try_from(raw) {
            Ok(v) => v,
            Err(e) => {
                self.chains[point.index()]
                    .counters
                    .unknown_verdicts
                    .fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::HOOK_UNKNOWN_VERDICTS_TOTAL).increment(1);
                warn!(
                    hook = point.as_str(),
                    name = reg.hook.name(),
                    error = %e,
                    "undefined verdict, dropping packet"
                );
                Verdict::Drop
            }
        }
    }

    fn finish(&self, point: HookPoint, verdict: Verdict) -> Verdict {
        let c = &self.chains[point.index()].counters;
        let counter = match verdict {
            Verdict::Accept => &c.accepted,
            Verdict::Drop => &c.dropped,
            Verdict::Stolen => &c.stolen,
            Verdict::Queue => &c.queued,
            // finish()에는 REPEAT가 전달되지 않음
            Verdict::Repeat => return verdict,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            m::HOOK_VERDICTS_TOTAL,
            m::LABEL_HOOK => point.as_str(),
            m::LABEL_VERDICT => verdict.as_str()
        )
        .increment(1);
        if verdict != Verdict::Accept {
            debug!(hook = point.as_str(), verdict = verdict.as_str(), "chain stopped");
        }
        verdict
    }
}

impl Default for HookDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REPEATS)
    }
}
