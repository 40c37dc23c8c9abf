use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Where a coordinator may finalize a journal from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeSource {
    /// A returned journal must be re-submitted by its teacher first.
    SubmittedOnly,
    SubmittedOrReturned,
}

pub const DEFAULT_FINALIZE_SOURCE: FinalizeSource = FinalizeSource::SubmittedOnly;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct LifecyclePolicy {
    pub finalize_from: FinalizeSource,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            finalize_from: DEFAULT_FINALIZE_SOURCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct AttendancePolicy {
    /// Justified-absence treatment: drop EXCUSED lessons from the denominator.
    pub exclude_excused_from_denominator: bool,
}

/// Thresholds behind the situational label.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PerformancePolicy {
    pub good_average: f64,
    pub good_attendance: f64,
    pub attention_average: f64,
    pub attention_attendance: f64,
    pub min_graded_bimesters: usize,
    pub attendance: AttendancePolicy,
}

impl Default for PerformancePolicy {
    fn default() -> Self {
        Self {
            good_average: 6.0,
            good_attendance: 75.0,
            attention_average: 4.0,
            attention_attendance: 60.0,
            min_graded_bimesters: 2,
            attendance: AttendancePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub lifecycle: LifecyclePolicy,
    pub performance: PerformancePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            lifecycle: LifecyclePolicy::default(),
            performance: PerformancePolicy::default(),
        }
    }
}

impl Config {
    pub const DEFAULT_PATH: &'static str = "diario.toml";

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("invalid configuration")
    }

    /// Reads `path` (or `diario.toml` when it exists), then applies `DATABASE_URL`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Self::from_toml(&raw)?
            }
            None if Path::new(Self::DEFAULT_PATH).exists() => {
                let raw = std::fs::read_to_string(Self::DEFAULT_PATH)
                    .with_context(|| format!("failed to read {}", Self::DEFAULT_PATH))?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = Some(url);
        }

        Ok(config)
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.lifecycle.finalize_from, FinalizeSource::SubmittedOnly);
        assert_eq!(config.performance.good_average, 6.0);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml(
            r#"
            max_connections = 12

            [lifecycle]
            finalize_from = "submitted_or_returned"

            [performance]
            good_attendance = 80.0

            [performance.attendance]
            exclude_excused_from_denominator = true
            "#,
        )
        .unwrap();

        assert_eq!(config.max_connections, 12);
        assert_eq!(
            config.lifecycle.finalize_from,
            FinalizeSource::SubmittedOrReturned
        );
        assert_eq!(config.performance.good_attendance, 80.0);
        assert_eq!(config.performance.attention_attendance, 60.0);
        assert!(config.performance.attendance.exclude_excused_from_denominator);
    }

    #[test]
    fn unknown_finalize_source_is_rejected() {
        let err = Config::from_toml("[lifecycle]\nfinalize_from = \"whenever\"").unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }
}
