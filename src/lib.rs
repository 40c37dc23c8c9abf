//! Class-journal (diário) lifecycle and report-card (boletim) aggregation.

pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod performance;
pub mod report;
pub mod store;

pub use config::{Config, FinalizeSource, LifecyclePolicy, PerformancePolicy};
pub use error::{LifecycleError, LifecycleViolation, ViolationReason};
pub use lifecycle::{attempt_transition, JournalAction, JournalLifecycle, TransitionRequest};
pub use performance::{compute_student_journal_performance, compute_student_report_card, RecordSet};
