//! 클래스 큐 — bounded FIFO, tail-drop
//!
//! 큐마다 자체 락을 가지므로 서로 다른 클래스의 enqueue/dequeue는 경합하지 않습니다.
//! 가득 찬 큐에 들어온 새 패킷은 버려집니다 (가장 오래된 패킷을 밀어내지 않음).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use irongate_core::packet::Packet;
use parking_lot::Mutex;

/// [`ClassQueue::push`] 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// 큐 끝에 추가됨
    Queued,
    /// 큐가 가득 차 버려짐
    TailDropped,
}

/// 패킷/바이트 카운터 쌍
#[derive(Debug, Default)]
pub(crate) struct Tally {
    pub(crate) packets: AtomicU64,
    pub(crate) bytes: AtomicU64,
}

impl Tally {
    pub(crate) fn add(&self, bytes: u64) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn load(&self) -> (u64, u64) {
        (
            self.packets.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }
}

/// 한 트래픽 클래스의 bounded FIFO 큐
pub struct ClassQueue {
    buffer: Mutex<VecDeque<Packet>>,
    capacity: usize,
    pub(crate) enqueued: Tally,
    pub(crate) dequeued: Tally,
    pub(crate) dropped: Tally,
}

impl ClassQueue {
    /// 지정 용량의 빈 큐를 생성합니다.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            enqueued: Tally::default(),
            dequeued: Tally::default(),
            dropped: Tally::default(),
        }
    }

    /// 패킷을 큐 끝에 추가합니다. 가득 찼으면 패킷을 버립니다.
    pub fn push(&self, packet: Packet) -> EnqueueOutcome {
        let bytes = packet.len() as u64;
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            drop(buffer);
            self.dropped.add(bytes);
            return EnqueueOutcome::TailDropped;
        }
        buffer.push_back(packet);
        drop(buffer);
        self.enqueued.add(bytes);
        EnqueueOutcome::Queued
    }

    /// 큐 맨 앞 패킷을 꺼냅니다.
    pub fn pop(&self) -> Option<Packet> {
        let packet = self.buffer.lock().pop_front()?;
        self.dequeued.add(packet.len() as u64);
        Some(packet)
    }

    /// 현재 큐 길이
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// 최대 용량
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
