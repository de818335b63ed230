use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::Kind;

/// A typed view over one document kind. The document id lives outside the
/// body in the store and is attached after decoding.
pub trait Record: serde::de::DeserializeOwned {
    const KIND: Kind;
    fn set_id(&mut self, id: String);
}

macro_rules! record_kind {
    ($ty:ty, $kind:expr) => {
        impl Record for $ty {
            const KIND: Kind = $kind;
            fn set_id(&mut self, id: String) {
                self.id = id;
            }
        }
    };
}

/// One of the four grading periods of a school year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BimesterNumber {
    First,
    Second,
    Third,
    Fourth,
}

impl BimesterNumber {
    pub const ALL: [BimesterNumber; 4] = [
        BimesterNumber::First,
        BimesterNumber::Second,
        BimesterNumber::Third,
        BimesterNumber::Fourth,
    ];

    pub fn number(self) -> u8 {
        match self {
            BimesterNumber::First => 1,
            BimesterNumber::Second => 2,
            BimesterNumber::Third => 3,
            BimesterNumber::Fourth => 4,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(BimesterNumber::First),
            2 => Some(BimesterNumber::Second),
            3 => Some(BimesterNumber::Third),
            4 => Some(BimesterNumber::Fourth),
            _ => None,
        }
    }

    /// Bimesters from the first up to and including `self`.
    pub fn up_to(self) -> impl Iterator<Item = BimesterNumber> {
        Self::ALL.into_iter().filter(move |b| *b <= self)
    }
}

impl TryFrom<u8> for BimesterNumber {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        BimesterNumber::from_number(n).ok_or_else(|| format!("bimester must be 1..=4, got {}", n))
    }
}

impl From<BimesterNumber> for u8 {
    fn from(b: BimesterNumber) -> u8 {
        b.number()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[serde(alias = "PRESENT")]
    Present,
    #[serde(alias = "ABSENT")]
    Absent,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(default)]
    pub id: String,
    pub date: NaiveDate,
    pub unit: String,
    pub grade_level: String,
    pub school_class: String,
    #[serde(default)]
    pub shift: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub student_status: BTreeMap<String, AttendanceStatus>,
    #[serde(default)]
    pub lesson_count: Option<u32>,
    #[serde(default)]
    pub student_absence_count: BTreeMap<String, u32>,
}
record_kind!(AttendanceRecord, Kind::Attendance);

impl AttendanceRecord {
    /// A placeholder log with no student lines at all.
    pub fn is_ghost(&self) -> bool {
        self.student_status.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterSlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nota: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recuperacao: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faltas: Option<u32>,
}

impl BimesterSlot {
    pub fn cached_absences(&self) -> u32 {
        self.faltas.unwrap_or(0)
    }
}

/// The four bimester slots of a report card. Keyed on the wire as
/// `bimester1`..`bimester4`; in code only reachable through
/// [`BimesterNumber`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bimesters {
    #[serde(default)]
    bimester1: BimesterSlot,
    #[serde(default)]
    bimester2: BimesterSlot,
    #[serde(default)]
    bimester3: BimesterSlot,
    #[serde(default)]
    bimester4: BimesterSlot,
}

impl Bimesters {
    pub fn get(&self, b: BimesterNumber) -> &BimesterSlot {
        match b {
            BimesterNumber::First => &self.bimester1,
            BimesterNumber::Second => &self.bimester2,
            BimesterNumber::Third => &self.bimester3,
            BimesterNumber::Fourth => &self.bimester4,
        }
    }

    pub fn get_mut(&mut self, b: BimesterNumber) -> &mut BimesterSlot {
        match b {
            BimesterNumber::First => &mut self.bimester1,
            BimesterNumber::Second => &mut self.bimester2,
            BimesterNumber::Third => &mut self.bimester3,
            BimesterNumber::Fourth => &mut self.bimester4,
        }
    }

    pub fn wire_key(b: BimesterNumber) -> &'static str {
        match b {
            BimesterNumber::First => "bimester1",
            BimesterNumber::Second => "bimester2",
            BimesterNumber::Third => "bimester3",
            BimesterNumber::Fourth => "bimester4",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardEntry {
    #[serde(default)]
    pub id: String,
    pub student_id: String,
    pub subject: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub grade_level: Option<String>,
    #[serde(default)]
    pub school_class: Option<String>,
    #[serde(default)]
    pub bimesters: Bimesters,
}
record_kind!(ReportCardEntry, Kind::Grades);

impl ReportCardEntry {
    pub fn has_teacher(&self) -> bool {
        self.teacher_id
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem {
    pub subject: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSchedule {
    #[serde(default)]
    pub id: String,
    pub unit: String,
    pub grade_level: String,
    pub school_class: String,
    #[serde(default)]
    pub shift: Option<String>,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    #[serde(default)]
    pub items: Vec<ScheduleItem>,
}
record_kind!(ClassSchedule, Kind::ClassSchedules);

impl ClassSchedule {
    pub fn is_ghost(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    HolidayNational,
    HolidayState,
    HolidayMunicipal,
    Holiday,
    Vacation,
    Recess,
    SchoolDay,
    Substitution,
    Meeting,
    Exam,
    #[serde(other)]
    Other,
}

impl EventType {
    /// Holidays, vacations and recesses cancel every session they cover.
    pub fn cancels_sessions(self) -> bool {
        matches!(
            self,
            EventType::HolidayNational
                | EventType::HolidayState
                | EventType::HolidayMunicipal
                | EventType::Holiday
                | EventType::Vacation
                | EventType::Recess
        )
    }

    pub fn is_substitution(self) -> bool {
        matches!(self, EventType::SchoolDay | EventType::Substitution)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub units: Vec<String>,
    #[serde(default)]
    pub grade_levels: Vec<String>,
    #[serde(default)]
    pub school_classes: Vec<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub substitute_day_of_week: Option<u8>,
}
record_kind!(CalendarEvent, Kind::CalendarEvents);

impl CalendarEvent {
    pub fn covers(&self, date: NaiveDate) -> bool {
        let end = self.end_date.unwrap_or(self.start_date);
        self.start_date <= date && date <= end
    }
}

/// Empty scope lists and the literal `all` are wildcards.
pub fn scope_matches(scope: &[String], value: &str) -> bool {
    scope.is_empty() || scope.iter().any(|s| s == "all" || s == value)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterWindow {
    pub number: BimesterNumber,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicSettings {
    #[serde(default)]
    pub id: String,
    pub year: i32,
    pub unit: String,
    #[serde(default)]
    pub current_bimester: Option<BimesterNumber>,
    #[serde(default)]
    pub bimesters: Vec<BimesterWindow>,
}
record_kind!(AcademicSettings, Kind::AcademicSettings);

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicSubject {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub weekly_hours: BTreeMap<String, u32>,
    #[serde(default = "default_true")]
    pub active: bool,
}
record_kind!(AcademicSubject, Kind::AcademicSubjects);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub unit: String,
    pub grade_level: String,
    pub school_class: String,
    #[serde(default)]
    pub shift: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}
record_kind!(StudentRecord, Kind::Students);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherAssignment {
    pub subject: String,
    #[serde(default)]
    pub grade_level: Option<String>,
    #[serde(default)]
    pub school_class: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub assignments: Vec<TeacherAssignment>,
}
record_kind!(TeacherRecord, Kind::Teachers);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Coordinator,
    Secretary,
    Teacher,
    #[serde(other)]
    Other,
}

/// Who is asking and for which unit. Passed into every engine entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub unit: String,
    pub role: Role,
    #[serde(default)]
    pub selected_unit: Option<String>,
}

impl SessionContext {
    /// Admins look at whichever unit they selected (default: the whole
    /// network); everyone else is pinned to their own unit.
    pub fn effective_unit(&self) -> &str {
        match self.role {
            Role::Admin => self.selected_unit.as_deref().unwrap_or("all"),
            _ => &self.unit,
        }
    }

    pub fn unit_in_scope(&self, unit: &str) -> bool {
        let effective = self.effective_unit();
        effective == "all" || effective == unit
    }

    pub fn can_apply_fixes(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Coordinator)
    }
}
