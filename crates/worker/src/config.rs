use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use milestone_core::config::CatalogConfig;
use milestone_core::error::CoreError;
use milestone_core::types::Timestamp;

use crate::error::WorkerError;

/// Start of the NEM market, before any network's first bucket.
const DEFAULT_HISTORY_START: &str = "1998-12-01";

/// Which runner the process drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    Live,
    Backfill,
}

/// Worker configuration loaded once at process start.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub mode: WorkerMode,
    /// Backfill range; both set when `mode` is `Backfill`.
    pub backfill_start: Option<Timestamp>,
    pub backfill_end: Option<Timestamp>,
    pub backfill_concurrency: usize,
    pub live_concurrency: usize,
    pub lease_ttl: Duration,
    /// Consecutive data-not-ready ticks before a gap is alerted.
    pub gap_alert_ticks: u32,
    /// Network catalog JSON. Built-in catalog when unset.
    pub catalog_path: Option<PathBuf>,
    /// Lease holder id for this process.
    pub worker_id: String,
    /// Earliest bucket a live track with no cursor replays from.
    pub history_start: Timestamp,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `DATABASE_URL`         | (required)                 |
    /// | `WORKER_MODE`          | `live`                     |
    /// | `BACKFILL_START`       | (required for backfill)    |
    /// | `BACKFILL_END`         | (required for backfill)    |
    /// | `BACKFILL_CONCURRENCY` | `8`                        |
    /// | `LIVE_CONCURRENCY`     | `8`                        |
    /// | `LEASE_TTL_SECS`       | `900`                      |
    /// | `GAP_ALERT_TICKS`      | `6`                        |
    /// | `MILESTONE_CONFIG`     | built-in NEM/WEM catalog   |
    /// | `WORKER_ID`            | `<hostname>-<pid>`         |
    /// | `HISTORY_START`        | `1998-12-01`               |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`WorkerConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CoreError::Validation("DATABASE_URL must be set".into()))?;

        let mode = match lookup("WORKER_MODE").as_deref().map(str::trim) {
            None | Some("live") => WorkerMode::Live,
            Some("backfill") => WorkerMode::Backfill,
            Some(other) => {
                return Err(CoreError::Validation(format!(
                    "WORKER_MODE must be 'live' or 'backfill', got '{other}'"
                )))
            }
        };

        let backfill_start = lookup("BACKFILL_START")
            .map(|v| parse_instant("BACKFILL_START", &v))
            .transpose()?;
        let backfill_end = lookup("BACKFILL_END")
            .map(|v| parse_instant("BACKFILL_END", &v))
            .transpose()?;
        if mode == WorkerMode::Backfill {
            match (backfill_start, backfill_end) {
                (Some(start), Some(end)) if start < end => {}
                (Some(_), Some(_)) => {
                    return Err(CoreError::Validation(
                        "BACKFILL_START must be before BACKFILL_END".into(),
                    ))
                }
                _ => {
                    return Err(CoreError::Validation(
                        "BACKFILL_START and BACKFILL_END are required in backfill mode".into(),
                    ))
                }
            }
        }

        let backfill_concurrency = parse_positive(&lookup, "BACKFILL_CONCURRENCY", 8)?;
        let live_concurrency = parse_positive(&lookup, "LIVE_CONCURRENCY", 8)?;
        let lease_ttl_secs = parse_positive(&lookup, "LEASE_TTL_SECS", 900)?;
        let gap_alert_ticks = parse_positive(&lookup, "GAP_ALERT_TICKS", 6)?;

        let history_start = parse_instant(
            "HISTORY_START",
            lookup("HISTORY_START").as_deref().unwrap_or(DEFAULT_HISTORY_START),
        )?;

        let worker_id = lookup("WORKER_ID").unwrap_or_else(|| {
            let host = lookup("HOSTNAME").unwrap_or_else(|| "worker".into());
            format!("{host}-{}", std::process::id())
        });

        Ok(Self {
            database_url,
            mode,
            backfill_start,
            backfill_end,
            backfill_concurrency: backfill_concurrency as usize,
            live_concurrency: live_concurrency as usize,
            lease_ttl: Duration::from_secs(lease_ttl_secs),
            gap_alert_ticks: u32::try_from(gap_alert_ticks).map_err(|_| {
                CoreError::Validation("GAP_ALERT_TICKS is too large".into())
            })?,
            catalog_path: lookup("MILESTONE_CONFIG").map(PathBuf::from),
            worker_id,
            history_start,
        })
    }

    /// Read the network catalog, or fall back to the built-in one.
    pub fn load_catalog(&self) -> Result<CatalogConfig, WorkerError> {
        match &self.catalog_path {
            None => Ok(CatalogConfig::default()),
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    CoreError::Validation(format!("Cannot read {}: {e}", path.display()))
                })?;
                Ok(CatalogConfig::from_json(&json)?)
            }
        }
    }
}

fn parse_positive<F>(lookup: &F, key: &str, default: u64) -> Result<u64, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(CoreError::Validation(format!(
            "{key} must be a positive integer, got '{raw}'"
        ))),
        Ok(n) => Ok(n),
    }
}

/// RFC 3339, or a bare `YYYY-MM-DD` taken as UTC midnight.
fn parse_instant(key: &str, raw: &str) -> Result<Timestamp, CoreError> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| CoreError::Validation(format!("{key} is not a date or RFC 3339 time: '{raw}'")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, CoreError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_in_live_mode() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/grid"), ("WORKER_ID", "w1")]).unwrap();
        assert_eq!(config.mode, WorkerMode::Live);
        assert_eq!(config.backfill_concurrency, 8);
        assert_eq!(config.live_concurrency, 8);
        assert_eq!(config.lease_ttl, Duration::from_secs(900));
        assert_eq!(config.gap_alert_ticks, 6);
        assert_eq!(config.worker_id, "w1");
        assert!(config.catalog_path.is_none());
        assert_eq!(
            config.history_start,
            Utc.with_ymd_and_hms(1998, 12, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn backfill_mode_requires_an_ordered_range() {
        let base = [("DATABASE_URL", "postgres://x"), ("WORKER_MODE", "backfill")];
        assert_matches!(load(&base), Err(CoreError::Validation(_)));

        let mut reversed = base.to_vec();
        reversed.extend([("BACKFILL_START", "2024-02-01"), ("BACKFILL_END", "2024-01-01")]);
        assert_matches!(load(&reversed), Err(CoreError::Validation(_)));

        let mut ok = base.to_vec();
        ok.extend([
            ("BACKFILL_START", "2024-01-01"),
            ("BACKFILL_END", "2024-02-01T10:00:00+10:00"),
        ]);
        let config = load(&ok).unwrap();
        assert_eq!(
            config.backfill_start,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            config.backfill_end,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert_matches!(load(&[]), Err(CoreError::Validation(_)));
        assert_matches!(
            load(&[("DATABASE_URL", "postgres://x"), ("WORKER_MODE", "replay")]),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            load(&[("DATABASE_URL", "postgres://x"), ("LIVE_CONCURRENCY", "0")]),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            load(&[("DATABASE_URL", "postgres://x"), ("LEASE_TTL_SECS", "soon")]),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            load(&[("DATABASE_URL", "postgres://x"), ("HISTORY_START", "last year")]),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn missing_catalog_file_is_a_validation_error() {
        let mut config = load(&[("DATABASE_URL", "postgres://x")]).unwrap();
        config.catalog_path = Some(PathBuf::from("/nonexistent/milestones.json"));
        assert_matches!(
            config.load_catalog(),
            Err(WorkerError::Core(CoreError::Validation(_)))
        );
    }
}
