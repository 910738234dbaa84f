use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::gender::Sex;
use crate::grading::{parse_class_number, UnresolvedReason};

/// A numeric grade on the 2..=5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Grade(u8);

impl Grade {
    pub const TWO: Grade = Grade(2);
    pub const THREE: Grade = Grade(3);
    pub const FOUR: Grade = Grade(4);
    pub const FIVE: Grade = Grade(5);
    pub const ALL: [Grade; 4] = [Grade::FIVE, Grade::FOUR, Grade::THREE, Grade::TWO];

    pub fn new(n: u8) -> Option<Grade> {
        (2..=5).contains(&n).then_some(Grade(n))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Grade {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Grade::new(n).ok_or_else(|| format!("grade must be 2..=5, got {}", n))
    }
}

impl From<Grade> for u8 {
    fn from(g: Grade) -> u8 {
        g.0
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const UNSET_GRADE_CODE: &str = "—";

/// What ends up in a result's grade column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GradeCode {
    Grade(Grade),
    Exempt,
    Absent,
    Sick,
    Unset,
}

impl GradeCode {
    pub fn as_code(&self) -> String {
        match self {
            GradeCode::Grade(g) => g.to_string(),
            GradeCode::Exempt => "exempt".to_string(),
            GradeCode::Absent => "absent".to_string(),
            GradeCode::Sick => "sick".to_string(),
            GradeCode::Unset => UNSET_GRADE_CODE.to_string(),
        }
    }

    /// Parses a stored or submitted code. An empty string and `"-"` are read
    /// as the unset sentinel.
    pub fn parse(raw: &str) -> Option<GradeCode> {
        let t = raw.trim();
        match t.to_ascii_lowercase().as_str() {
            "" | "-" | UNSET_GRADE_CODE => Some(GradeCode::Unset),
            "exempt" => Some(GradeCode::Exempt),
            "absent" => Some(GradeCode::Absent),
            "sick" => Some(GradeCode::Sick),
            other => other
                .parse::<u8>()
                .ok()
                .and_then(Grade::new)
                .map(GradeCode::Grade),
        }
    }
}

impl TryFrom<String> for GradeCode {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        GradeCode::parse(&raw).ok_or_else(|| format!("unknown grade code: {}", raw))
    }
}

impl From<GradeCode> for String {
    fn from(code: GradeCode) -> String {
        code.as_code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeSource {
    Auto,
    Manual,
}

impl GradeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeSource::Auto => "auto",
            GradeSource::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<GradeSource> {
        match raw {
            "auto" => Some(GradeSource::Auto),
            "manual" => Some(GradeSource::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    LowerIsBetter,
    HigherIsBetter,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::LowerIsBetter => "LOWER_IS_BETTER",
            Direction::HigherIsBetter => "HIGHER_IS_BETTER",
        }
    }

    pub fn parse(raw: &str) -> Option<Direction> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOWER_IS_BETTER" => Some(Direction::LowerIsBetter),
            "HIGHER_IS_BETTER" => Some(Direction::HigherIsBetter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SexScope {
    All,
    Male,
    Female,
}

impl SexScope {
    pub fn as_str(self) -> &'static str {
        match self {
            SexScope::All => "ALL",
            SexScope::Male => "MALE",
            SexScope::Female => "FEMALE",
        }
    }

    pub fn parse(raw: &str) -> Option<SexScope> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ALL" => Some(SexScope::All),
            "MALE" => Some(SexScope::Male),
            "FEMALE" => Some(SexScope::Female),
            _ => None,
        }
    }

    pub fn admits(self, sex: Option<Sex>) -> bool {
        match self {
            SexScope::All => true,
            SexScope::Male => sex == Some(Sex::Male),
            SexScope::Female => sex == Some(Sex::Female),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Period {
    Regular,
    StartOfYear,
    EndOfYear,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Regular => "REGULAR",
            Period::StartOfYear => "START_OF_YEAR",
            Period::EndOfYear => "END_OF_YEAR",
        }
    }

    pub fn parse(raw: &str) -> Option<Period> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "REGULAR" => Some(Period::Regular),
            "START_OF_YEAR" => Some(Period::StartOfYear),
            "END_OF_YEAR" => Some(Period::EndOfYear),
            _ => None,
        }
    }
}

/// A school year identified by the calendar year it starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcademicYear {
    pub start_year: i32,
}

impl AcademicYear {
    pub fn new(start_year: i32) -> Self {
        Self { start_year }
    }

    /// The year a test date falls into, given the month school starts in.
    pub fn containing(date: NaiveDate, start_month: u32) -> Self {
        let start_month = start_month.clamp(1, 12);
        if date.month() >= start_month {
            Self::new(date.year())
        } else {
            Self::new(date.year() - 1)
        }
    }

    /// Accepts `"2024/2025"`, `"2024-2025"` or a bare `"2024"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let t = raw.trim();
        let (first, second) = match t.split_once(['/', '-']) {
            Some((a, b)) => (a.trim(), Some(b.trim())),
            None => (t, None),
        };
        let start: i32 = first.parse().ok()?;
        if let Some(end) = second {
            let end: i32 = end.parse().ok()?;
            if end != start + 1 {
                return None;
            }
        }
        Some(Self::new(start))
    }
}

impl fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start_year, self.start_year + 1)
    }
}

impl TryFrom<String> for AcademicYear {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        AcademicYear::parse(&raw).ok_or_else(|| format!("bad academic year: {}", raw))
    }
}

impl From<AcademicYear> for String {
    fn from(y: AcademicYear) -> String {
        y.to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub class_from: i64,
    pub class_to: i64,
    pub direction: Direction,
    /// `None` falls through to `ALL`.
    pub sex_scope: Option<SexScope>,
    /// `None` for shared templates.
    pub owner_trainer_id: Option<String>,
}

impl Template {
    pub fn applies_to_class(&self, class_number: i64) -> bool {
        class_number >= self.class_from && class_number <= self.class_to
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub academic_year: AcademicYear,
    pub class_label: Option<String>,
}

impl Group {
    pub fn class_number(&self) -> Option<i64> {
        self.class_label.as_deref().and_then(parse_class_number)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub full_name: String,
    pub sex: Option<Sex>,
    pub group_id: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementInstance {
    pub id: String,
    pub template_id: String,
    pub group_id: String,
    pub test_date: NaiveDate,
    pub period: Period,
    pub academic_year: AcademicYear,
    pub name_override: Option<String>,
    pub unit_override: Option<String>,
    pub sex_scope_override: Option<SexScope>,
    pub use_custom_boundaries: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub id: String,
    pub student_id: String,
    /// `None` for ad-hoc entries recorded outside any instance.
    pub instance_id: Option<String>,
    pub template_id: String,
    pub test_date: Option<NaiveDate>,
    pub value: Option<f64>,
    pub grade: GradeCode,
    pub grade_source: GradeSource,
    pub unresolved_reason: Option<UnresolvedReason>,
    pub updated_at: String,
}
