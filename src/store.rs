//! Contracts for the record store the core reads from and writes status to.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::lifecycle::JournalAction;
use crate::models::{
    Actor, AttendanceMark, Evaluation, Grade, Journal, JournalStatus, Lesson, Occurrence,
    ReturnRequest, Student,
};

/// A conditional status write: applied only if the stored journal still has
/// `expected_status` at `expected_revision`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub journal_id: Uuid,
    pub expected_status: JournalStatus,
    pub expected_revision: i64,
    pub status: JournalStatus,
    pub return_request: Option<ReturnRequest>,
    pub action: JournalAction,
    pub actor: Actor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    Conflict,
}

#[allow(async_fn_in_trait)]
pub trait JournalStore {
    async fn fetch_journal(&self, id: Uuid) -> anyhow::Result<Option<Journal>>;

    /// Compare-and-swap on status and revision. Bumps the revision when applied.
    async fn update_journal_status(&self, update: &StatusUpdate) -> anyhow::Result<UpdateOutcome>;
}

#[allow(async_fn_in_trait)]
pub trait RecordSource {
    async fn fetch_student(&self, id: Uuid) -> anyhow::Result<Option<Student>>;
    async fn fetch_lessons_by_journal(&self, journal_id: Uuid) -> anyhow::Result<Vec<Lesson>>;
    async fn fetch_evaluations_by_journal(
        &self,
        journal_id: Uuid,
    ) -> anyhow::Result<Vec<Evaluation>>;
    async fn fetch_grades_by_student(&self, student_id: Uuid) -> anyhow::Result<Vec<Grade>>;
    async fn fetch_attendance_by_student(
        &self,
        student_id: Uuid,
    ) -> anyhow::Result<Vec<AttendanceMark>>;
    async fn fetch_journals_by_student_enrollment(
        &self,
        student_id: Uuid,
    ) -> anyhow::Result<Vec<Journal>>;
    async fn fetch_occurrences_by_student(
        &self,
        student_id: Uuid,
    ) -> anyhow::Result<Vec<Occurrence>>;
}

#[derive(Debug, Default)]
struct Records {
    journals: HashMap<Uuid, Journal>,
    students: HashMap<Uuid, Student>,
    lessons: Vec<Lesson>,
    evaluations: Vec<Evaluation>,
    grades: Vec<Grade>,
    attendance: Vec<AttendanceMark>,
    occurrences: Vec<Occurrence>,
}

/// In-process store for tests and local demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }

    pub fn insert_journal(&self, journal: Journal) -> anyhow::Result<()> {
        self.lock()?.journals.insert(journal.id, journal);
        Ok(())
    }

    pub fn insert_student(&self, student: Student) -> anyhow::Result<()> {
        self.lock()?.students.insert(student.id, student);
        Ok(())
    }

    pub fn insert_lesson(&self, lesson: Lesson) -> anyhow::Result<()> {
        self.lock()?.lessons.push(lesson);
        Ok(())
    }

    pub fn insert_evaluation(&self, evaluation: Evaluation) -> anyhow::Result<()> {
        self.lock()?.evaluations.push(evaluation);
        Ok(())
    }

    /// Replaces any grade already recorded for the same evaluation and student.
    pub fn insert_grade(&self, grade: Grade) -> anyhow::Result<()> {
        let mut records = self.lock()?;
        records.grades.retain(|g| {
            !(g.evaluation_id == grade.evaluation_id && g.student_id == grade.student_id)
        });
        records.grades.push(grade);
        Ok(())
    }

    pub fn insert_attendance(&self, mark: AttendanceMark) -> anyhow::Result<()> {
        self.lock()?.attendance.push(mark);
        Ok(())
    }

    pub fn insert_occurrence(&self, occurrence: Occurrence) -> anyhow::Result<()> {
        self.lock()?.occurrences.push(occurrence);
        Ok(())
    }
}

impl JournalStore for MemoryStore {
    async fn fetch_journal(&self, id: Uuid) -> anyhow::Result<Option<Journal>> {
        Ok(self.lock()?.journals.get(&id).cloned())
    }

    async fn update_journal_status(&self, update: &StatusUpdate) -> anyhow::Result<UpdateOutcome> {
        let mut records = self.lock()?;
        let Some(journal) = records.journals.get_mut(&update.journal_id) else {
            return Ok(UpdateOutcome::Conflict);
        };

        if journal.status != update.expected_status || journal.revision != update.expected_revision
        {
            return Ok(UpdateOutcome::Conflict);
        }

        journal.status = update.status;
        journal.return_request = update.return_request.clone();
        journal.revision += 1;
        Ok(UpdateOutcome::Applied)
    }
}

impl RecordSource for MemoryStore {
    async fn fetch_student(&self, id: Uuid) -> anyhow::Result<Option<Student>> {
        Ok(self.lock()?.students.get(&id).cloned())
    }

    async fn fetch_lessons_by_journal(&self, journal_id: Uuid) -> anyhow::Result<Vec<Lesson>> {
        let records = self.lock()?;
        Ok(records
            .lessons
            .iter()
            .filter(|l| l.journal_id == journal_id)
            .cloned()
            .collect())
    }

    async fn fetch_evaluations_by_journal(
        &self,
        journal_id: Uuid,
    ) -> anyhow::Result<Vec<Evaluation>> {
        let records = self.lock()?;
        Ok(records
            .evaluations
            .iter()
            .filter(|e| e.journal_id == journal_id)
            .cloned()
            .collect())
    }

    async fn fetch_grades_by_student(&self, student_id: Uuid) -> anyhow::Result<Vec<Grade>> {
        let records = self.lock()?;
        Ok(records
            .grades
            .iter()
            .filter(|g| g.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn fetch_attendance_by_student(
        &self,
        student_id: Uuid,
    ) -> anyhow::Result<Vec<AttendanceMark>> {
        let records = self.lock()?;
        Ok(records
            .attendance
            .iter()
            .filter(|a| a.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn fetch_journals_by_student_enrollment(
        &self,
        student_id: Uuid,
    ) -> anyhow::Result<Vec<Journal>> {
        let records = self.lock()?;
        let Some(student) = records.students.get(&student_id) else {
            return Ok(Vec::new());
        };
        let mut journals: Vec<Journal> = records
            .journals
            .values()
            .filter(|j| j.class_id == student.class_id)
            .cloned()
            .collect();
        journals.sort_by(|a, b| a.subject_name.cmp(&b.subject_name).then(a.id.cmp(&b.id)));
        Ok(journals)
    }

    async fn fetch_occurrences_by_student(
        &self,
        student_id: Uuid,
    ) -> anyhow::Result<Vec<Occurrence>> {
        let records = self.lock()?;
        Ok(records
            .occurrences
            .iter()
            .filter(|o| o.student_id == student_id)
            .cloned()
            .collect())
    }
}
