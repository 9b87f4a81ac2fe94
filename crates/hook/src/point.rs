//! 훅 포인트 — 패킷 라우팅 경로의 5개 지점

use std::fmt;

use irongate_core::error::HookError;
use serde::{Deserialize, Serialize};

/// 패킷 라우팅 중 훅 체인이 실행되는 지점
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    /// 라우팅 결정 전 (수신 직후)
    PreRouting,
    /// 로컬 호스트로 전달되는 패킷
    LocalIn,
    /// 다른 인터페이스로 포워딩되는 패킷
    Forward,
    /// 로컬 호스트가 생성한 패킷
    LocalOut,
    /// 라우팅 결정 후 (송신 직전)
    PostRouting,
}

impl HookPoint {
    /// 훅 포인트 개수
    pub const COUNT: usize = 5;

    /// 모든 훅 포인트 (라우팅 순서)
    pub const ALL: [HookPoint; Self::COUNT] = [
        HookPoint::PreRouting,
        HookPoint::LocalIn,
        HookPoint::Forward,
        HookPoint::LocalOut,
        HookPoint::PostRouting,
    ];

    /// 체인 배열 인덱스
    pub fn index(self) -> usize {
        match self {
            HookPoint::PreRouting => 0,
            HookPoint::LocalIn => 1,
            HookPoint::Forward => 2,
            HookPoint::LocalOut => 3,
            HookPoint::PostRouting => 4,
        }
    }

    /// 메트릭 레이블 및 로그용 이름
    pub fn as_str(self) -> &'static str {
        match self {
            HookPoint::PreRouting => "pre_routing",
            HookPoint::LocalIn => "local_in",
            HookPoint::Forward => "forward",
            HookPoint::LocalOut => "local_out",
            HookPoint::PostRouting => "post_routing",
        }
    }
}

impl TryFrom<u32> for HookPoint {
    type Error = HookError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(HookPoint::PreRouting),
            1 => Ok(HookPoint::LocalIn),
            2 => Ok(HookPoint::Forward),
            3 => Ok(HookPoint::LocalOut),
            4 => Ok(HookPoint::PostRouting),
            other => Err(HookError::UnknownHookPoint(other)),
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_numbers_round_trip_through_index() {
        for point in HookPoint::ALL {
            let raw = point.index() as u32;
            assert_eq!(HookPoint::try_from(raw).unwrap(), point);
        }
    }

    #[test]
    fn unknown_number_is_rejected() {
        assert_eq!(
            HookPoint::try_from(5),
            Err(HookError::UnknownHookPoint(5))
        );
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&HookPoint::PostRouting).unwrap();
        assert_eq!(json, "\"post_routing\"");
    }
}
