//! 주기적 에이징 태스크

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::NatEngine;

/// `interval`마다 [`NatEngine::age_connections`]를 호출하는 태스크를 시작합니다.
///
/// `cancel`이 취소되면 루프를 빠져나옵니다.
pub fn spawn_aging_task(
    engine: Arc<NatEngine>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // 첫 tick은 즉시 완료되므로 건너뜀
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = engine.age_connections();
                    debug!(removed, active = engine.connection_count(), "nat aging sweep");
                }
                _ = cancel.cancelled() => {
                    debug!("nat aging task shutting down");
                    break;
                }
            }
        }
    })
}
