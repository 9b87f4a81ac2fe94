//! 트래픽 클래스 — 0~7 고정 슬롯과 DSCP 기본 매핑

use std::fmt;

use irongate_core::error::QosError;
use serde::{Deserialize, Serialize};

/// 트래픽 클래스 번호 (0~7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ClassId(u8);

impl ClassId {
    /// 클래스 개수
    pub const COUNT: usize = 8;

    /// 0: 기본 클래스, DSCP 매핑 실패 시 폴백
    pub const BEST_EFFORT: ClassId = ClassId(0);
    /// 1: 백그라운드
    pub const BACKGROUND: ClassId = ClassId(1);
    /// 2: 우수 노력
    pub const EXCELLENT_EFFORT: ClassId = ClassId(2);
    /// 3: 중요 애플리케이션
    pub const CRITICAL_APPLICATIONS: ClassId = ClassId(3);
    /// 4: 비디오
    pub const VIDEO: ClassId = ClassId(4);
    /// 5: 음성
    pub const VOICE: ClassId = ClassId(5);
    /// 6: 인터네트워크 제어
    pub const INTERNETWORK_CONTROL: ClassId = ClassId(6);
    /// 7: 네트워크 제어
    pub const NETWORK_CONTROL: ClassId = ClassId(7);

    /// 범위를 검사하여 클래스 ID를 만듭니다.
    pub fn new(id: u8) -> Result<Self, QosError> {
        if usize::from(id) < Self::COUNT {
            Ok(ClassId(id))
        } else {
            Err(QosError::InvalidClass(id))
        }
    }

    /// 숫자 값
    pub fn get(self) -> u8 {
        self.0
    }

    /// 배열 인덱스
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// 0부터 7까지 모든 클래스
    pub fn all() -> impl Iterator<Item = ClassId> {
        (0..Self::COUNT as u8).map(ClassId)
    }

    /// 클래스 이름
    pub fn traffic_class(self) -> TrafficClass {
        TrafficClass::ALL[self.index()]
    }
}

impl TryFrom<u8> for ClassId {
    type Error = QosError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        ClassId::new(id)
    }
}

impl From<ClassId> for u8 {
    fn from(id: ClassId) -> u8 {
        id.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.traffic_class(), self.0)
    }
}

/// 클래스 이름 (IEEE 802.1p 트래픽 타입 순서)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficClass {
    BestEffort,
    Background,
    ExcellentEffort,
    CriticalApplications,
    Video,
    Voice,
    InternetworkControl,
    NetworkControl,
}

impl TrafficClass {
    /// 클래스 번호 순서
    pub const ALL: [TrafficClass; ClassId::COUNT] = [
        TrafficClass::BestEffort,
        TrafficClass::Background,
        TrafficClass::ExcellentEffort,
        TrafficClass::CriticalApplications,
        TrafficClass::Video,
        TrafficClass::Voice,
        TrafficClass::InternetworkControl,
        TrafficClass::NetworkControl,
    ];

    /// 클래스 ID
    pub fn id(self) -> ClassId {
        ClassId(self as u8)
    }

    /// 표시 이름
    pub fn as_str(self) -> &'static str {
        match self {
            TrafficClass::BestEffort => "best-effort",
            TrafficClass::Background => "background",
            TrafficClass::ExcellentEffort => "excellent-effort",
            TrafficClass::CriticalApplications => "critical-applications",
            TrafficClass::Video => "video",
            TrafficClass::Voice => "voice",
            TrafficClass::InternetworkControl => "internetwork-control",
            TrafficClass::NetworkControl => "network-control",
        }
    }
}

impl From<TrafficClass> for ClassId {
    fn from(tc: TrafficClass) -> Self {
        tc.id()
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// DSCP 코드 포인트
const DSCP_CS1: u8 = 8;
const DSCP_CS2: u8 = 16;
const DSCP_CS3: u8 = 24;
const DSCP_CS4: u8 = 32;
const DSCP_EF: u8 = 46;
const DSCP_CS6: u8 = 48;

/// 매칭 룰이 없을 때 DSCP 값으로 클래스를 정합니다.
pub fn dscp_fallback(dscp: u8) -> ClassId {
    match dscp {
        d if d >= DSCP_CS6 => ClassId::NETWORK_CONTROL,
        d if d >= DSCP_EF => ClassId::VOICE,
        d if d >= DSCP_CS4 => ClassId::VIDEO,
        d if d >= DSCP_CS3 => ClassId::CRITICAL_APPLICATIONS,
        d if d >= DSCP_CS2 => ClassId::EXCELLENT_EFFORT,
        DSCP_CS1 => ClassId::BACKGROUND,
        _ => ClassId::BEST_EFFORT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_id_range_is_checked() {
        assert!(ClassId::new(7).is_ok());
        assert_eq!(ClassId::new(8), Err(QosError::InvalidClass(8)));
        assert_eq!(ClassId::all().count(), 8);
    }

    #[test]
    fn names_follow_class_numbers() {
        assert_eq!(ClassId::VOICE.traffic_class(), TrafficClass::Voice);
        assert_eq!(TrafficClass::Video.id(), ClassId::VIDEO);
        assert_eq!(ClassId::BACKGROUND.to_string(), "background(1)");
    }

    #[test]
    fn dscp_ladder() {
        let cases = [
            (63, 7),
            (48, 7),
            (47, 5),
            (46, 5),
            (45, 4),
            (34, 4),
            (32, 4),
            (26, 3),
            (24, 3),
            (18, 2),
            (16, 2),
            (10, 0),
            (8, 1),
            (4, 0),
            (0, 0),
        ];
        for (dscp, class) in cases {
            assert_eq!(dscp_fallback(dscp).get(), class, "dscp {dscp}");
        }
    }

    #[test]
    fn serde_rejects_out_of_range() {
        assert_eq!(serde_json::from_str::<ClassId>("5").unwrap(), ClassId::VOICE);
        assert!(serde_json::from_str::<ClassId>("9").is_err());
    }
}
