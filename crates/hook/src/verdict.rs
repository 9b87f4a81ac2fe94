//! verdict — 훅 콜백이 반환하는 최종 판정
//!
//! 숫자 코드를 반환하는 콜백은 [`RawVerdict`]로 감싸서 전달되고,
//! 디스패처가 [`Verdict::try_from`]으로 해석합니다.
//! 정의되지 않은 코드는 디스패처에서 `Drop`으로 처리됩니다.

use std::fmt;

use irongate_core::error::HookError;
use serde::{Deserialize, Serialize};

/// 훅 콜백의 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// 패킷 폐기
    Drop,
    /// 다음 훅으로 진행
    Accept,
    /// 훅이 패킷 소유권을 가져감
    Stolen,
    /// 외부 소비자(userspace)로 전달 대상
    Queue,
    /// 같은 훅을 다시 호출
    Repeat,
}

impl Verdict {
    /// 체인 순회를 멈추는 판정인지 확인합니다.
    pub fn is_terminal(self) -> bool {
        matches!(self, Verdict::Drop | Verdict::Stolen | Verdict::Queue)
    }

    /// 메트릭 레이블 및 로그용 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Drop => "drop",
            Verdict::Accept => "accept",
            Verdict::Stolen => "stolen",
            Verdict::Queue => "queue",
            Verdict::Repeat => "repeat",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 숫자 verdict 코드
///
/// `0=Drop, 1=Accept, 2=Stolen, 3=Queue, 4=Repeat`. 그 외 값은 정의되지 않음.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawVerdict(pub u32);

impl From<Verdict> for RawVerdict {
    fn from(verdict: Verdict) -> Self {
        RawVerdict(match verdict {
            Verdict::Drop => 0,
            Verdict::Accept => 1,
            Verdict::Stolen => 2,
            Verdict::Queue => 3,
            Verdict::Repeat => 4,
        })
    }
}

impl From<u32> for RawVerdict {
    fn from(code: u32) -> Self {
        RawVerdict(code)
    }
}

impl TryFrom<RawVerdict> for Verdict {
    type Error = HookError;

    fn try_from(raw: RawVerdict) -> Result<Self, Self::Error> {
        match raw.0 {
            0 => Ok(Verdict::Drop),
            1 => Ok(Verdict::Accept),
            2 => Ok(Verdict::Stolen),
            3 => Ok(Verdict::Queue),
            4 => Ok(Verdict::Repeat),
            other => Err(HookError::UnknownVerdict(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_decode() {
        for v in [
            Verdict::Drop,
            Verdict::Accept,
            Verdict::Stolen,
            Verdict::Queue,
            Verdict::Repeat,
        ] {
            assert_eq!(Verdict::try_from(RawVerdict::from(v)).unwrap(), v);
        }
    }

    #[test]
    fn undefined_code_is_an_error() {
        assert_eq!(
            Verdict::try_from(RawVerdict(42)),
            Err(HookError::UnknownVerdict(42))
        );
    }

    #[test]
    fn only_drop_stolen_queue_are_terminal() {
        assert!(Verdict::Drop.is_terminal());
        assert!(Verdict::Stolen.is_terminal());
        assert!(Verdict::Queue.is_terminal());
        assert!(!Verdict::Accept.is_terminal());
        assert!(!Verdict::Repeat.is_terminal());
    }
}
