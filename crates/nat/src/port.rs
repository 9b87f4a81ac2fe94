//! SNAT 포트 할당기
//!
//! 1024부터 호출마다 1씩 증가하는 단일 카운터입니다.
//! 65535를 반환한 다음 호출은 다시 1024를 반환합니다.
//! 사용 중인 포트를 추적하지 않으므로 순환 후에는 충돌이 생길 수 있습니다.

use std::sync::atomic::{AtomicU16, Ordering};

/// 할당 가능한 가장 작은 포트
pub const PORT_MIN: u16 = 1024;

/// 순환 카운터 포트 할당기
#[derive(Debug)]
pub struct PortAllocator {
    next: AtomicU16,
}

impl PortAllocator {
    /// 1024에서 시작하는 할당기를 생성합니다.
    pub fn new() -> Self {
        Self {
            next: AtomicU16::new(PORT_MIN),
        }
    }

    /// 다음 포트를 할당합니다.
    pub fn allocate(&self) -> u16 {
        let step = |p: u16| Some(if p == u16::MAX { PORT_MIN } else { p + 1 });
        match self.next.fetch_update(Ordering::Relaxed, Ordering::Relaxed, step) {
            Ok(port) | Err(port) => port,
        }
    }

    /// 다음에 반환될 포트 (할당하지 않음)
    pub fn peek(&self) -> u16 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_1024_and_increments() {
        let ports = PortAllocator::new();
        assert_eq!(ports.allocate(), 1024);
        assert_eq!(ports.allocate(), 1025);
        assert_eq!(ports.peek(), 1026);
    }

    #[test]
    fn wraps_after_65535() {
        let ports = PortAllocator {
            next: AtomicU16::new(65534),
        };
        assert_eq!(ports.allocate(), 65534);
        assert_eq!(ports.allocate(), 65535);
        assert_eq!(ports.allocate(), 1024);
    }

    #[test]
    fn sixty_five_thousand_allocations_stay_in_range_and_wrap() {
        let ports = PortAllocator::new();
        let mut prev = None;
        let mut wrapped = false;
        for _ in 0..65_000 {
            let p = ports.allocate();
            assert!(p >= PORT_MIN, "allocated {p}");
            if prev == Some(u16::MAX) {
                assert_eq!(p, PORT_MIN);
                wrapped = true;
            }
            prev = Some(p);
        }
        // 1024..=65535는 64512개이므로 65000번 안에 반드시 순환
        assert!(wrapped);
    }
}
