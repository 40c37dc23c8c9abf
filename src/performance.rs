//! Report-card aggregation over already-fetched records.
//!
//! Everything here is a pure function of its inputs. Records that point at
//! parents outside the supplied set are logged and skipped; the engine never
//! fails and never produces NaN.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::config::PerformancePolicy;
use crate::error::{InconsistentReference, RecordKind};
use crate::models::{
    AttendanceMark, AttendanceStatus, Evaluation, Grade, Journal, Lesson, Occurrence,
    PerformanceResult, ReportCard, ReportCardRow, Situation, BIMESTERS,
};
use crate::store::{JournalStore, RecordSource};

/// Borrowed record collections for one aggregation call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordSet<'a> {
    pub lessons: &'a [Lesson],
    pub evaluations: &'a [Evaluation],
    pub grades: &'a [Grade],
    pub attendance: &'a [AttendanceMark],
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// First match wins.
pub fn situation(
    final_average: f64,
    attendance: f64,
    graded_bimesters: usize,
    policy: &PerformancePolicy,
) -> Situation {
    if graded_bimesters < policy.min_graded_bimesters && final_average == 0.0 {
        Situation::InProgress
    } else if final_average >= policy.good_average && attendance >= policy.good_attendance {
        Situation::GoodStanding
    } else if final_average < policy.attention_average || attendance < policy.attention_attendance {
        Situation::NeedsAttention
    } else {
        Situation::InProgress
    }
}

/// Grades of `student_id` keyed by evaluation. Duplicates and non-finite values are skipped.
fn grade_index(student_id: Uuid, grades: &[Grade]) -> HashMap<Uuid, f64> {
    let mut index = HashMap::new();

    for grade in grades {
        if grade.student_id != student_id {
            InconsistentReference::new(
                RecordKind::Grade,
                grade.id,
                format!("belongs to student {}", grade.student_id),
            )
            .report();
            continue;
        }
        if !grade.value.is_finite() {
            InconsistentReference::new(RecordKind::Grade, grade.id, "value is not a number")
                .report();
            continue;
        }
        if index.contains_key(&grade.evaluation_id) {
            InconsistentReference::new(
                RecordKind::Grade,
                grade.id,
                format!("second grade for evaluation {}", grade.evaluation_id),
            )
            .report();
            continue;
        }
        index.insert(grade.evaluation_id, grade.value);
    }

    index
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct AttendanceTally {
    total_lessons: usize,
    present: usize,
    absent: usize,
    excused: usize,
}

impl AttendanceTally {
    fn percentage(&self, policy: &PerformancePolicy) -> f64 {
        let denominator = if policy.attendance.exclude_excused_from_denominator {
            self.total_lessons - self.excused
        } else {
            self.total_lessons
        };

        if denominator == 0 {
            0.0
        } else {
            round_to(self.present as f64 / denominator as f64 * 100.0, 1)
        }
    }
}

/// One resolved status per lesson; the lowest period index decides double lessons.
fn tally_attendance(
    student_id: Uuid,
    journal: &Journal,
    lessons: &[Lesson],
    marks: &[AttendanceMark],
) -> AttendanceTally {
    let mut lesson_ids = HashSet::new();
    for lesson in lessons {
        if lesson.journal_id != journal.id {
            InconsistentReference::new(
                RecordKind::Lesson,
                lesson.id,
                format!("belongs to journal {}, not {}", lesson.journal_id, journal.id),
            )
            .report();
            continue;
        }
        lesson_ids.insert(lesson.id);
    }

    let mut resolved: HashMap<Uuid, (u8, AttendanceStatus)> = HashMap::new();
    for mark in marks {
        if mark.student_id != student_id {
            InconsistentReference::new(
                RecordKind::AttendanceMark,
                mark.id,
                format!("belongs to student {}", mark.student_id),
            )
            .report();
            continue;
        }
        // Marks for lessons of other journals are expected when fetched per student.
        if !lesson_ids.contains(&mark.lesson_id) {
            continue;
        }
        let sequence = mark.sequence.unwrap_or(0);
        resolved
            .entry(mark.lesson_id)
            .and_modify(|current| {
                if sequence < current.0 {
                    *current = (sequence, mark.status);
                }
            })
            .or_insert((sequence, mark.status));
    }

    let mut tally = AttendanceTally {
        total_lessons: lesson_ids.len(),
        ..AttendanceTally::default()
    };
    for (_, status) in resolved.values() {
        match status {
            AttendanceStatus::Present => tally.present += 1,
            AttendanceStatus::Absent => tally.absent += 1,
            AttendanceStatus::Excused => tally.excused += 1,
        }
    }
    tally
}

pub fn compute_student_journal_performance(
    student_id: Uuid,
    journal: &Journal,
    records: RecordSet<'_>,
    policy: &PerformancePolicy,
) -> PerformanceResult {
    let grades = grade_index(student_id, records.grades);

    let mut by_bimester: [Vec<f64>; BIMESTERS] = Default::default();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut graded_evaluations = 0usize;

    for evaluation in records.evaluations {
        if evaluation.journal_id != journal.id {
            InconsistentReference::new(
                RecordKind::Evaluation,
                evaluation.id,
                format!(
                    "belongs to journal {}, not {}",
                    evaluation.journal_id, journal.id
                ),
            )
            .report();
            continue;
        }

        let Some(&value) = grades.get(&evaluation.id) else {
            continue;
        };
        graded_evaluations += 1;

        match usize::from(evaluation.bimester).checked_sub(1) {
            Some(slot) if slot < BIMESTERS => by_bimester[slot].push(value),
            _ => InconsistentReference::new(
                RecordKind::Evaluation,
                evaluation.id,
                format!("bimester {} outside 1..=4", evaluation.bimester),
            )
            .report(),
        }

        if evaluation.weight.is_finite() && evaluation.weight > 0.0 {
            weighted_sum += value * evaluation.weight;
            weight_total += evaluation.weight;
        }
    }

    let bimester_averages: [Option<f64>; BIMESTERS] =
        std::array::from_fn(|slot| mean(&by_bimester[slot]).map(|avg| round_to(avg, 1)));
    let graded_bimesters = bimester_averages.iter().filter(|avg| avg.is_some()).count();

    let final_average = if weight_total > 0.0 {
        round_to(weighted_sum / weight_total, 2)
    } else {
        0.0
    };

    let tally = tally_attendance(student_id, journal, records.lessons, records.attendance);
    let attendance = tally.percentage(policy);

    let result = PerformanceResult {
        student_id,
        journal_id: journal.id,
        bimester_averages,
        final_average,
        attendance,
        situation: situation(final_average, attendance, graded_bimesters, policy),
        total_lessons: tally.total_lessons,
        present_count: tally.present,
        absent_count: tally.absent,
        excused_count: tally.excused,
        graded_evaluations,
        graded_bimesters,
    };

    tracing::debug!(
        student_id = %student_id,
        journal_id = %journal.id,
        final_average = result.final_average,
        attendance = result.attendance,
        situation = %result.situation,
        "journal performance computed"
    );

    result
}

fn group_by_journal<'a, T, F>(
    items: &'a [T],
    journal_ids: &HashSet<Uuid>,
    kind: RecordKind,
    ids: F,
) -> HashMap<Uuid, Vec<T>>
where
    T: Clone,
    F: Fn(&'a T) -> (Uuid, Uuid),
{
    let mut grouped: HashMap<Uuid, Vec<T>> = HashMap::new();
    for item in items {
        let (record_id, journal_id) = ids(item);
        if journal_ids.contains(&journal_id) {
            grouped.entry(journal_id).or_default().push(item.clone());
        } else {
            InconsistentReference::new(kind, record_id, format!("journal {journal_id} not found"))
                .report();
        }
    }
    grouped
}

/// Builds the multi-subject boletim from records spanning every journal the
/// student is enrolled in.
pub fn compute_student_report_card(
    student_id: Uuid,
    journals: &[Journal],
    records: RecordSet<'_>,
    occurrences: &[Occurrence],
    policy: &PerformancePolicy,
) -> ReportCard {
    let journal_ids: HashSet<Uuid> = journals.iter().map(|j| j.id).collect();
    let lessons = group_by_journal(records.lessons, &journal_ids, RecordKind::Lesson, |l| {
        (l.id, l.journal_id)
    });
    let evaluations = group_by_journal(
        records.evaluations,
        &journal_ids,
        RecordKind::Evaluation,
        |e| (e.id, e.journal_id),
    );

    let known_evaluations: HashSet<Uuid> = evaluations.values().flatten().map(|e| e.id).collect();
    let grades: Vec<Grade> = records
        .grades
        .iter()
        .filter(|grade| {
            let known = known_evaluations.contains(&grade.evaluation_id);
            if !known {
                InconsistentReference::new(
                    RecordKind::Grade,
                    grade.id,
                    format!("evaluation {} not found", grade.evaluation_id),
                )
                .report();
            }
            known
        })
        .cloned()
        .collect();

    let known_lessons: HashSet<Uuid> = lessons.values().flatten().map(|l| l.id).collect();
    let attendance: Vec<AttendanceMark> = records
        .attendance
        .iter()
        .filter(|mark| {
            let known = known_lessons.contains(&mark.lesson_id);
            if !known {
                InconsistentReference::new(
                    RecordKind::AttendanceMark,
                    mark.id,
                    format!("lesson {} not found", mark.lesson_id),
                )
                .report();
            }
            known
        })
        .cloned()
        .collect();

    let mut ordered: Vec<&Journal> = journals.iter().collect();
    ordered.sort_by(|a, b| {
        a.subject_name
            .cmp(&b.subject_name)
            .then(a.bimester.cmp(&b.bimester))
            .then(a.id.cmp(&b.id))
    });

    let rows: Vec<ReportCardRow> = ordered
        .into_iter()
        .map(|journal| {
            let journal_records = RecordSet {
                lessons: lessons.get(&journal.id).map(Vec::as_slice).unwrap_or_default(),
                evaluations: evaluations
                    .get(&journal.id)
                    .map(Vec::as_slice)
                    .unwrap_or_default(),
                grades: &grades,
                attendance: &attendance,
            };
            ReportCardRow {
                journal_id: journal.id,
                subject_name: journal.subject_name.clone(),
                bimester: journal.bimester,
                performance: compute_student_journal_performance(
                    student_id,
                    journal,
                    journal_records,
                    policy,
                ),
            }
        })
        .collect();

    let contributing: Vec<&ReportCardRow> = rows
        .iter()
        .filter(|row| row.performance.has_grades() && row.performance.final_average != 0.0)
        .collect();
    let averages: Vec<f64> = contributing
        .iter()
        .map(|row| row.performance.final_average)
        .collect();
    let attendances: Vec<f64> = contributing
        .iter()
        .map(|row| row.performance.attendance)
        .collect();

    let occurrence_count = occurrences
        .iter()
        .filter(|o| o.student_id == student_id)
        .count();

    ReportCard {
        student_id,
        student_name: None,
        overall_average: mean(&averages).map_or(0.0, |avg| round_to(avg, 2)),
        overall_attendance: mean(&attendances).map_or(0.0, |avg| round_to(avg, 1)),
        contributing_journals: contributing.len(),
        occurrence_count,
        rows,
    }
}

/// Fetches one journal's records and computes the student's figures for it.
pub async fn load_journal_performance<S>(
    source: &S,
    student_id: Uuid,
    journal_id: Uuid,
    policy: &PerformancePolicy,
) -> anyhow::Result<Option<PerformanceResult>>
where
    S: JournalStore + RecordSource,
{
    let Some(journal) = source.fetch_journal(journal_id).await? else {
        return Ok(None);
    };
    let lessons = source.fetch_lessons_by_journal(journal_id).await?;
    let evaluations = source.fetch_evaluations_by_journal(journal_id).await?;
    let grades = source.fetch_grades_by_student(student_id).await?;
    let attendance = source.fetch_attendance_by_student(student_id).await?;

    let records = RecordSet {
        lessons: &lessons,
        evaluations: &evaluations,
        grades: &grades,
        attendance: &attendance,
    };
    Ok(Some(compute_student_journal_performance(
        student_id, &journal, records, policy,
    )))
}

/// Fetches everything the student's boletim needs and builds it.
pub async fn load_report_card<S: RecordSource>(
    source: &S,
    student_id: Uuid,
    policy: &PerformancePolicy,
) -> anyhow::Result<ReportCard> {
    let student = source.fetch_student(student_id).await?;
    let journals = source.fetch_journals_by_student_enrollment(student_id).await?;

    let mut lessons = Vec::new();
    let mut evaluations = Vec::new();
    for journal in &journals {
        lessons.extend(source.fetch_lessons_by_journal(journal.id).await?);
        evaluations.extend(source.fetch_evaluations_by_journal(journal.id).await?);
    }
    let grades = source.fetch_grades_by_student(student_id).await?;
    let attendance = source.fetch_attendance_by_student(student_id).await?;
    let occurrences = source.fetch_occurrences_by_student(student_id).await?;

    let records = RecordSet {
        lessons: &lessons,
        evaluations: &evaluations,
        grades: &grades,
        attendance: &attendance,
    };
    let mut card =
        compute_student_report_card(student_id, &journals, records, &occurrences, policy);
    card.student_name = student.map(|s| s.full_name);
    Ok(card)
}
