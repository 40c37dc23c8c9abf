use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use uuid::Uuid;

use diario::lifecycle::{JournalAction, JournalLifecycle, TransitionRecord, TransitionRequest};
use diario::models::{
    Actor, AttendanceMark, AttendanceStatus, Evaluation, Grade, Journal, JournalStatus, Lesson,
    Occurrence, RequestOrigin, Situation, Student,
};
use diario::performance::{load_journal_performance, load_report_card};
use diario::store::{JournalStore, MemoryStore, StatusUpdate, UpdateOutcome};
use diario::{LifecycleError, PerformancePolicy, ViolationReason};

fn pending_journal(teacher_id: Uuid, class_id: Uuid, subject: &str) -> Journal {
    Journal {
        id: Uuid::new_v4(),
        subject_id: Uuid::new_v4(),
        subject_name: subject.to_string(),
        class_id,
        teacher_id,
        bimester: 1,
        academic_year: 2026,
        status: JournalStatus::Pending,
        return_request: None,
        revision: 0,
    }
}

/// Serves a fixed snapshot on fetch while writes go to the live store.
struct StaleReads {
    snapshot: Journal,
    live: MemoryStore,
}

impl JournalStore for StaleReads {
    async fn fetch_journal(&self, _id: Uuid) -> anyhow::Result<Option<Journal>> {
        Ok(Some(self.snapshot.clone()))
    }

    async fn update_journal_status(&self, update: &StatusUpdate) -> anyhow::Result<UpdateOutcome> {
        self.live.update_journal_status(update).await
    }
}

#[tokio::test]
async fn journal_walks_submit_return_submit_finalize() {
    let store = MemoryStore::new();
    let teacher = Actor::teacher(Uuid::new_v4());
    let coordinator = Actor::coordinator(Uuid::new_v4());
    let journal = pending_journal(teacher.id, Uuid::new_v4(), "Matemática");
    let journal_id = journal.id;
    store.insert_journal(journal).unwrap();

    let seen: Arc<Mutex<Vec<TransitionRecord>>> = Arc::default();
    let mut lifecycle = JournalLifecycle::default();
    let sink = Arc::clone(&seen);
    lifecycle.on_transition(move |record| sink.lock().unwrap().push(record.clone()));

    let submitted = lifecycle
        .apply(&store, journal_id, &TransitionRequest::new(JournalAction::Submit, teacher))
        .await
        .unwrap();
    assert_eq!(submitted.status, JournalStatus::Submitted);
    assert!(submitted.return_request.is_none());
    assert_eq!(submitted.revision, 1);

    let returned = lifecycle
        .apply(
            &store,
            journal_id,
            &TransitionRequest::new(JournalAction::Return, coordinator)
                .with_comment("ajustar notas"),
        )
        .await
        .unwrap();
    assert_eq!(returned.status, JournalStatus::Returned);
    let pending = returned.return_request.clone().unwrap();
    assert_eq!(pending.comment.as_deref(), Some("ajustar notas"));
    assert_eq!(pending.origin, RequestOrigin::Coordinator);

    let stored = store.fetch_journal(journal_id).await.unwrap().unwrap();
    assert_eq!(stored, returned);

    let resubmitted = lifecycle
        .apply(&store, journal_id, &TransitionRequest::new(JournalAction::Submit, teacher))
        .await
        .unwrap();
    assert_eq!(resubmitted.status, JournalStatus::Submitted);
    assert!(resubmitted.return_request.is_none());

    let finalized = lifecycle
        .apply(&store, journal_id, &TransitionRequest::new(JournalAction::Finalize, coordinator))
        .await
        .unwrap();
    assert_eq!(finalized.status, JournalStatus::Finalized);

    for (action, actor) in [
        (JournalAction::Submit, teacher),
        (JournalAction::RequestReturn, teacher),
        (JournalAction::Return, coordinator),
        (JournalAction::Finalize, coordinator),
    ] {
        let err = lifecycle
            .apply(&store, journal_id, &TransitionRequest::new(action, actor))
            .await
            .unwrap_err();
        match err {
            LifecycleError::Violation(violation) => {
                assert_eq!(violation.reason, ViolationReason::TerminalState);
                assert_eq!(violation.current, JournalStatus::Finalized);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    let stored = store.fetch_journal(journal_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JournalStatus::Finalized);
    assert_eq!(stored.revision, 4);

    let statuses: Vec<(JournalStatus, JournalStatus)> =
        seen.lock().unwrap().iter().map(|r| (r.from, r.to)).collect();
    assert_eq!(
        statuses,
        vec![
            (JournalStatus::Pending, JournalStatus::Submitted),
            (JournalStatus::Submitted, JournalStatus::Returned),
            (JournalStatus::Returned, JournalStatus::Submitted),
            (JournalStatus::Submitted, JournalStatus::Finalized),
        ]
    );
}

#[tokio::test]
async fn rejected_transition_leaves_store_untouched() {
    let store = MemoryStore::new();
    let teacher = Actor::teacher(Uuid::new_v4());
    let journal = pending_journal(teacher.id, Uuid::new_v4(), "História");
    let journal_id = journal.id;
    store.insert_journal(journal.clone()).unwrap();

    let err = JournalLifecycle::default()
        .apply(&store, journal_id, &TransitionRequest::new(JournalAction::Finalize, teacher))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Violation(ref v) if v.reason == ViolationReason::WrongRole
    ));
    assert!(!err.is_retryable());

    let stored = store.fetch_journal(journal_id).await.unwrap().unwrap();
    assert_eq!(stored, journal);
}

#[tokio::test]
async fn stale_read_reports_concurrent_modification() {
    let live = MemoryStore::new();
    let teacher = Actor::teacher(Uuid::new_v4());
    let journal = pending_journal(teacher.id, Uuid::new_v4(), "Física");
    let journal_id = journal.id;
    live.insert_journal(journal.clone()).unwrap();

    let lifecycle = JournalLifecycle::default();
    let submit = TransitionRequest::new(JournalAction::Submit, teacher);
    lifecycle.apply(&live, journal_id, &submit).await.unwrap();

    let stale = StaleReads {
        snapshot: journal,
        live,
    };
    let err = lifecycle.apply(&stale, journal_id, &submit).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        LifecycleError::ConcurrentModification {
            expected: JournalStatus::Pending,
            revision: 0,
            ..
        }
    ));

    let stored = stale.live.fetch_journal(journal_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JournalStatus::Submitted);
    assert_eq!(stored.revision, 1);
}

#[tokio::test]
async fn second_request_return_from_stale_revision_conflicts() {
    let live = MemoryStore::new();
    let teacher = Actor::teacher(Uuid::new_v4());
    let journal = Journal {
        status: JournalStatus::Submitted,
        revision: 1,
        ..pending_journal(teacher.id, Uuid::new_v4(), "Geografia")
    };
    let journal_id = journal.id;
    live.insert_journal(journal.clone()).unwrap();

    let lifecycle = JournalLifecycle::default();
    let first = TransitionRequest::new(JournalAction::RequestReturn, teacher)
        .with_comment("faltou lançar a recuperação");
    let updated = lifecycle.apply(&live, journal_id, &first).await.unwrap();
    assert_eq!(updated.status, JournalStatus::Submitted);
    assert_eq!(updated.revision, 2);

    // Same status as the snapshot, so only the revision tells the writes apart.
    let stale = StaleReads {
        snapshot: journal,
        live,
    };
    let second = TransitionRequest::new(JournalAction::RequestReturn, teacher)
        .with_comment("corrigir frequência");
    let err = lifecycle.apply(&stale, journal_id, &second).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        LifecycleError::ConcurrentModification {
            expected: JournalStatus::Submitted,
            revision: 1,
            ..
        }
    ));

    let stored = stale.live.fetch_journal(journal_id).await.unwrap().unwrap();
    assert_eq!(stored.revision, 2);
    assert_eq!(
        stored.return_request.and_then(|r| r.comment).as_deref(),
        Some("faltou lançar a recuperação")
    );
}

#[tokio::test]
async fn missing_journal_is_reported() {
    let err = JournalLifecycle::default()
        .apply(
            &MemoryStore::new(),
            Uuid::new_v4(),
            &TransitionRequest::new(JournalAction::Submit, Actor::teacher(Uuid::new_v4())),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::JournalNotFound(_)));
}

#[tokio::test]
async fn report_card_is_built_from_store_records() {
    let store = MemoryStore::new();
    let class_id = Uuid::new_v4();
    let teacher_id = Uuid::new_v4();
    let student = Student {
        id: Uuid::new_v4(),
        full_name: "Lucas Ferreira".to_string(),
        class_id,
    };
    store.insert_student(student.clone()).unwrap();

    let math = pending_journal(teacher_id, class_id, "Matemática");
    let art = pending_journal(teacher_id, class_id, "Artes");
    let other_class = pending_journal(teacher_id, Uuid::new_v4(), "Química");
    for journal in [&math, &art, &other_class] {
        store.insert_journal(journal.clone()).unwrap();
    }

    let day = NaiveDate::from_ymd_opt(2026, 4, 6).unwrap();
    for (index, status) in [
        AttendanceStatus::Present,
        AttendanceStatus::Present,
        AttendanceStatus::Present,
        AttendanceStatus::Absent,
    ]
    .into_iter()
    .enumerate()
    {
        let lesson = Lesson {
            id: Uuid::new_v4(),
            journal_id: math.id,
            date: day + chrono::Duration::days(index as i64),
            content: "Equações".to_string(),
            lesson_count: 1,
        };
        store
            .insert_attendance(AttendanceMark {
                id: Uuid::new_v4(),
                lesson_id: lesson.id,
                student_id: student.id,
                sequence: None,
                status,
            })
            .unwrap();
        store.insert_lesson(lesson).unwrap();
    }

    for (bimester, weight, value) in [(1, 2.0, 8.0), (1, 1.0, 5.0), (2, 1.0, 9.0)] {
        let evaluation = Evaluation {
            id: Uuid::new_v4(),
            journal_id: math.id,
            bimester,
            weight,
            title: "Prova".to_string(),
            date: day,
        };
        store
            .insert_grade(Grade {
                id: Uuid::new_v4(),
                evaluation_id: evaluation.id,
                student_id: student.id,
                value,
            })
            .unwrap();
        store.insert_evaluation(evaluation).unwrap();
    }

    store
        .insert_occurrence(Occurrence {
            id: Uuid::new_v4(),
            student_id: student.id,
            journal_id: Some(math.id),
            description: "Esqueceu o material".to_string(),
            occurred_at: day,
        })
        .unwrap();

    let policy = PerformancePolicy::default();
    let card = load_report_card(&store, student.id, &policy).await.unwrap();

    assert_eq!(card.student_name.as_deref(), Some("Lucas Ferreira"));
    assert_eq!(card.rows.len(), 2);
    assert_eq!(card.rows[0].subject_name, "Artes");
    assert_eq!(card.occurrence_count, 1);
    assert_eq!(card.contributing_journals, 1);

    let math_row = &card.rows[1].performance;
    assert_eq!(math_row.bimester_averages, [Some(6.5), Some(9.0), None, None]);
    assert_eq!(math_row.final_average, 7.5);
    assert_eq!(math_row.attendance, 75.0);
    assert_eq!(math_row.situation, Situation::GoodStanding);
    assert_eq!(card.overall_average, 7.5);
    assert_eq!(card.overall_attendance, 75.0);

    let direct = load_journal_performance(&store, student.id, math.id, &policy)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&direct, math_row);
}

#[tokio::test]
async fn unenrolled_student_gets_empty_report_card() {
    let card = load_report_card(&MemoryStore::new(), Uuid::new_v4(), &PerformancePolicy::default())
        .await
        .unwrap();
    assert!(card.rows.is_empty());
    assert!(card.student_name.is_none());
    assert_eq!(card.overall_average, 0.0);
}
