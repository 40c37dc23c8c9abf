use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of grading periods in an academic year.
pub const BIMESTERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalStatus {
    #[default]
    Pending,
    Submitted,
    Returned,
    Finalized,
}

impl JournalStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::Returned => "RETURNED",
            Self::Finalized => "FINALIZED",
        }
    }
}

impl fmt::Display for JournalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JournalStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SUBMITTED" => Ok(Self::Submitted),
            "RETURNED" => Ok(Self::Returned),
            "FINALIZED" => Ok(Self::Finalized),
            other => anyhow::bail!("unknown journal status {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Teacher,
    Coordinator,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Teacher => "TEACHER",
            Self::Coordinator => "COORDINATOR",
            Self::Admin => "ADMIN",
        };
        f.write_str(label)
    }
}

/// The identity supplied by the session layer for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn teacher(id: Uuid) -> Self {
        Self { id, role: Role::Teacher }
    }

    pub fn coordinator(id: Uuid) -> Self {
        Self { id, role: Role::Coordinator }
    }

    pub fn owns(&self, journal: &Journal) -> bool {
        self.role == Role::Teacher && journal.teacher_id == self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestOrigin {
    /// Teacher asked the coordinator to hand the journal back.
    Teacher,
    /// Coordinator returned the journal with an observation.
    Coordinator,
}

impl RequestOrigin {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Teacher => "TEACHER",
            Self::Coordinator => "COORDINATOR",
        }
    }
}

impl FromStr for RequestOrigin {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "TEACHER" => Ok(Self::Teacher),
            "COORDINATOR" => Ok(Self::Coordinator),
            other => anyhow::bail!("unknown request origin {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub comment: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub origin: RequestOrigin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub subject_name: String,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    pub bimester: u8,
    pub academic_year: i32,
    pub status: JournalStatus,
    pub return_request: Option<ReturnRequest>,
    /// Bumped on every persisted transition; used for compare-and-swap.
    pub revision: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Uuid,
    pub journal_id: Uuid,
    pub date: NaiveDate,
    pub content: String,
    /// 1 for a single period, 2 for a double period.
    pub lesson_count: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub journal_id: Uuid,
    pub bimester: u8,
    pub weight: f64,
    pub title: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub id: Uuid,
    pub evaluation_id: Uuid,
    pub student_id: Uuid,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Excused,
}

impl AttendanceStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "PRESENT",
            Self::Absent => "ABSENT",
            Self::Excused => "EXCUSED",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "PRESENT" => Ok(Self::Present),
            "ABSENT" => Ok(Self::Absent),
            "EXCUSED" => Ok(Self::Excused),
            other => anyhow::bail!("unknown attendance status {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceMark {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub student_id: Uuid,
    /// Period index inside a double lesson, when recorded separately.
    pub sequence: Option<u8>,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub full_name: String,
    pub class_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: Uuid,
    pub student_id: Uuid,
    pub journal_id: Option<Uuid>,
    pub description: String,
    pub occurred_at: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Situation {
    #[serde(rename = "Bom Desempenho")]
    GoodStanding,
    #[serde(rename = "Atenção Necessária")]
    NeedsAttention,
    #[serde(rename = "Em Andamento")]
    InProgress,
}

impl Situation {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::GoodStanding => "Bom Desempenho",
            Self::NeedsAttention => "Atenção Necessária",
            Self::InProgress => "Em Andamento",
        }
    }
}

impl fmt::Display for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Derived figures for one student in one journal. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceResult {
    pub student_id: Uuid,
    pub journal_id: Uuid,
    pub bimester_averages: [Option<f64>; BIMESTERS],
    pub final_average: f64,
    pub attendance: f64,
    pub situation: Situation,
    pub total_lessons: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub excused_count: usize,
    pub graded_evaluations: usize,
    pub graded_bimesters: usize,
}

impl PerformanceResult {
    pub fn has_grades(&self) -> bool {
        self.graded_evaluations > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCardRow {
    pub journal_id: Uuid,
    pub subject_name: String,
    pub bimester: u8,
    pub performance: PerformanceResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCard {
    pub student_id: Uuid,
    pub student_name: Option<String>,
    pub rows: Vec<ReportCardRow>,
    pub overall_average: f64,
    pub overall_attendance: f64,
    pub contributing_journals: usize,
    pub occurrence_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_attendance_literals_parse_back() {
        for status in [
            AttendanceStatus::Present,
            AttendanceStatus::Absent,
            AttendanceStatus::Excused,
        ] {
            assert_eq!(status.as_str().parse::<AttendanceStatus>().unwrap(), status);
        }
        assert_eq!("present".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::Present);
        assert!("LATE".parse::<AttendanceStatus>().is_err());
    }
}
