//! 룰 리스트 — head-prepend, first-match-wins, 안정 핸들
//!
//! NAT 룰과 QoS 룰이 공유하는 저장소입니다.
//!
//! - 추가는 항상 리스트 맨 앞에 삽입 (가장 최근 룰이 먼저 매칭)
//! - 삭제는 [`RuleId`] 핸들로 수행 (O(n))
//! - 패킷 경로는 [`RuleList::snapshot`]으로 `Arc` 스냅샷을 받아
//!   락 없이 순회합니다 (copy-on-write)

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// 룰 핸들
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub u64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// 리스트에 저장된 룰 한 개
#[derive(Debug)]
pub struct RuleEntry<R> {
    /// 룰 핸들
    pub id: RuleId,
    /// 룰 본체
    pub rule: Arc<R>,
}

impl<R> Clone for RuleEntry<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            rule: Arc::clone(&self.rule),
        }
    }
}

/// 패킷 경로에서 순회하는 불변 스냅샷
pub type RuleSnapshot<R> = Arc<Vec<RuleEntry<R>>>;

/// head-prepend 룰 리스트
pub struct RuleList<R> {
    rules: RwLock<RuleSnapshot<R>>,
    next_id: AtomicU64,
}

impl<R> RuleList<R> {
    /// 빈 리스트를 생성합니다.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// 룰을 리스트 맨 앞에 추가하고 핸들을 반환합니다.
    pub fn add(&self, rule: R) -> RuleId {
        let id = RuleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = RuleEntry {
            id,
            rule: Arc::new(rule),
        };

        let mut guard = self.rules.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.push(entry);
        next.extend(guard.iter().cloned());
        *guard = Arc::new(next);
        id
    }

    /// 핸들로 룰을 삭제합니다. 존재하지 않으면 `None`.
    pub fn delete(&self, id: RuleId) -> Option<Arc<R>> {
        let mut guard = self.rules.write();
        let pos = guard.iter().position(|e| e.id == id)?;
        let mut next: Vec<RuleEntry<R>> = guard.iter().cloned().collect();
        let removed = next.remove(pos);
        *guard = Arc::new(next);
        Some(removed.rule)
    }

    /// 모든 룰을 삭제하고 삭제된 개수를 반환합니다.
    pub fn flush(&self) -> usize {
        let mut guard = self.rules.write();
        let count = guard.len();
        *guard = Arc::new(Vec::new());
        count
    }

    /// 현재 룰 스냅샷 (매칭 순서대로)
    pub fn snapshot(&self) -> RuleSnapshot<R> {
        Arc::clone(&self.rules.read())
    }

    /// 조건을 만족하는 첫 번째 룰을 반환합니다 (first-match-wins).
    pub fn find_first(&self, mut pred: impl FnMut(&R) -> bool) -> Option<RuleEntry<R>> {
        self.snapshot().iter().find(|e| pred(&e.rule)).cloned()
    }

    /// 룰 개수
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// 리스트가 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

impl<R> Default for RuleList<R> {
    fn default() -> Self {
        Self::new()
    }
}
