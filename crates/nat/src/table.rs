//! 연결 테이블 — 버킷별 락을 가진 고정 크기 해시 테이블
//!
//! 키는 원본 5-tuple이고, 버킷은 [`FlowKey::symmetric_hash`] % 버킷 수로 정합니다.
//! 조회-또는-생성([`ConnTable::find_or_create`])은 버킷 락을 잡은 채 한 번에 수행되므로
//! 같은 새 플로우의 패킷 두 개가 동시에 들어와도 엔트리는 하나만 생깁니다.
//! 에이징 스윕도 같은 버킷 락을 사용합니다.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};

use irongate_core::net::FlowKey;
use parking_lot::Mutex;
use serde::Serialize;

use crate::rule::NatType;

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    /// 생성만 되고 아직 변환된 패킷이 없음
    New,
    /// 한 번 이상 변환됨
    Established,
}

impl ConnState {
    /// 덤프용 이름
    pub fn as_str(self) -> &'static str {
        match self {
            ConnState::New => "NEW",
            ConnState::Established => "ESTABLISHED",
        }
    }
}

/// 추적 중인 NAT 연결
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NatConnection {
    /// 원본 5-tuple (테이블 키)
    pub orig: FlowKey,
    /// 변환 후 출발지 주소
    pub nat_src_ip: Ipv4Addr,
    /// 변환 후 목적지 주소
    pub nat_dst_ip: Ipv4Addr,
    /// 변환 후 출발지 포트
    pub nat_src_port: u16,
    /// 변환 후 목적지 포트
    pub nat_dst_port: u16,
    /// 변환 종류
    pub nat_type: NatType,
    /// 상태
    pub state: ConnState,
    /// 유휴 타임아웃 (ms)
    pub timeout_ms: u64,
    /// 마지막 패킷 시각 (엔진 기준 ms)
    pub last_seen_ms: u64,
    /// 변환된 패킷 수
    pub packets: u64,
    /// 변환된 바이트 수
    pub bytes: u64,
}

impl NatConnection {
    /// 변환 후 5-tuple
    pub fn translated(&self) -> FlowKey {
        FlowKey::new(
            self.nat_src_ip,
            self.nat_dst_ip,
            self.nat_src_port,
            self.nat_dst_port,
            self.orig.protocol,
        )
    }

    /// `now_ms` 시점에 만료되었는지 확인합니다 (`now - last_seen > timeout`).
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) > self.timeout_ms
    }
}

/// [`ConnTable::find_or_create`] 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindOrCreate {
    /// 기존 엔트리 (갱신 후 사본)
    Found(NatConnection),
    /// 새로 생성된 엔트리 (갱신 후 사본)
    Created(NatConnection),
    /// 생성 콜백이 엔트리를 만들지 않음 (매칭 룰 없음)
    NoMatch,
    /// 테이블 용량 초과
    TableFull,
}

/// 버킷 락 연결 테이블
pub struct ConnTable {
    buckets: Box<[Mutex<Vec<NatConnection>>]>,
    len: AtomicUsize,
    capacity: usize,
}

impl ConnTable {
    /// 버킷 수와 최대 연결 수로 테이블을 생성합니다.
    ///
    /// 버킷 수가 0이면 1로 올립니다.
    pub fn new(bucket_count: usize, capacity: usize) -> Self {
        let buckets = (0..bucket_count.max(1))
            .map(|_| Mutex::new(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buckets,
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    fn bucket(&self, key: &FlowKey) -> &Mutex<Vec<NatConnection>> {
        let idx = key.symmetric_hash() as usize % self.buckets.len();
        &self.buckets[idx]
    }

    fn reserve_slot(&self) -> bool {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    /// 정확히 일치하는 엔트리의 사본을 반환합니다.
    pub fn get(&self, key: &FlowKey) -> Option<NatConnection> {
        self.bucket(key).lock().iter().find(|c| c.orig == *key).cloned()
    }

    /// 엔트리를 찾고, 없으면 `create`로 만들어 삽입합니다.
    ///
    /// 조회, 생성, `update` 적용이 모두 같은 버킷 락 아래에서 수행됩니다.
    /// `create`가 `None`이면 테이블이 가득 찼더라도 [`FindOrCreate::NoMatch`]입니다.
    /// `create`가 반환한 엔트리의 `orig`는 `key`와 같아야 합니다.
    pub fn find_or_create<C, U>(&self, key: &FlowKey, create: C, update: U) -> FindOrCreate
    where
        C: FnOnce() -> Option<NatConnection>,
        U: FnOnce(&mut NatConnection),
    {
        let mut bucket = self.bucket(key).lock();
        if let Some(conn) = bucket.iter_mut().find(|c| c.orig == *key) {
            update(conn);
            return FindOrCreate::Found(conn.clone());
        }

        // 룰 매칭이 먼저, 용량 확인은 매칭된 경우에만
        let Some(mut conn) = create() else {
            return FindOrCreate::NoMatch;
        };
        if !self.reserve_slot() {
            return FindOrCreate::TableFull;
        }
        update(&mut conn);
        bucket.push(conn.clone());
        FindOrCreate::Created(conn)
    }

    /// 조건을 만족하는 첫 엔트리를 전체 버킷에서 선형 탐색하여 갱신합니다.
    pub fn scan_update<P, U>(&self, mut pred: P, update: U) -> Option<NatConnection>
    where
        P: FnMut(&NatConnection) -> bool,
        U: FnOnce(&mut NatConnection),
    {
        for bucket in self.buckets.iter() {
            let mut guard = bucket.lock();
            if let Some(conn) = guard.iter_mut().find(|c| pred(c)) {
                update(conn);
                return Some(conn.clone());
            }
        }
        None
    }

    /// 엔트리를 제거합니다.
    pub fn remove(&self, key: &FlowKey) -> Option<NatConnection> {
        let mut bucket = self.bucket(key).lock();
        let pos = bucket.iter().position(|c| c.orig == *key)?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(bucket.swap_remove(pos))
    }

    /// 만료된 엔트리를 모두 제거하고 제거한 수를 반환합니다.
    pub fn expire(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        for bucket in self.buckets.iter() {
            let mut guard = bucket.lock();
            let before = guard.len();
            guard.retain(|c| !c.is_expired(now_ms));
            removed += before - guard.len();
        }
        if removed > 0 {
            self.len.fetch_sub(removed, Ordering::AcqRel);
        }
        removed
    }

    /// 모든 엔트리의 사본 (버킷 순서)
    pub fn entries(&self) -> Vec<NatConnection> {
        let mut out = Vec::with_capacity(self.len());
        for bucket in self.buckets.iter() {
            out.extend(bucket.lock().iter().cloned());
        }
        out
    }

    /// 엔트리 수
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 최대 연결 수
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 버킷 수
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
