// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scheduler configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Persistent scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Directory holding the control database and spooled data files.
    pub spool_dir: PathBuf,
    /// Root of the `filter/` and `backend/` program directories.
    pub server_bin: PathBuf,
    /// Root of the `ppd/` directory passed to filters.
    pub server_root: PathBuf,
    /// Shared data directory exported to filters as `DATADIR`.
    pub data_dir: PathBuf,
    /// Ceiling on the summed cost of running filter chains (0 = unlimited).
    pub filter_limit: u32,
    /// Keep canceled/completed jobs as history records.
    pub preserve_job_history: bool,
    /// Keep the data files of history records (enables restart).
    pub preserve_job_files: bool,
    /// Attempts before a fax job gives up.
    pub fax_retry_limit: u32,
    /// Seconds between fax attempts.
    pub fax_retry_interval_secs: u64,
    /// At the retry limit, hold the fax job indefinitely instead of canceling.
    pub fax_hold_on_exhaustion: bool,
    /// `CHARSET` when neither the document nor the request names one.
    pub default_charset: String,
    /// Classification banner exported to filters, if any.
    pub classification: Option<String>,
    /// `PATH` exported to filters and backends.
    pub filter_path: String,
    /// `TMPDIR` exported to filters and backends.
    pub tmp_dir: PathBuf,
    /// Filter prepended for gzip-compressed spool files.
    pub decompress_filter: String,
    /// Cost charged for the decompression stage.
    pub decompress_cost: u32,
    /// User the filters run as, exported as `USER`.
    pub run_user: String,
}

impl SchedulerConfig {
    pub fn fax_retry_interval(&self) -> Duration {
        Duration::from_secs(self.fax_retry_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from("/var/spool/spoolwerk"),
            server_bin: PathBuf::from("/usr/lib/spoolwerk"),
            server_root: PathBuf::from("/etc/spoolwerk"),
            data_dir: PathBuf::from("/usr/share/spoolwerk"),
            filter_limit: 0,
            preserve_job_history: true,
            preserve_job_files: false,
            fax_retry_limit: 5,
            fax_retry_interval_secs: 300,
            fax_hold_on_exhaustion: false,
            default_charset: "utf-8".into(),
            classification: None,
            filter_path: "/usr/lib/spoolwerk/filter:/bin:/usr/bin".into(),
            tmp_dir: PathBuf::from("/var/spool/spoolwerk/tmp"),
            decompress_filter: "gziptoany".into(),
            decompress_cost: 1,
            run_user: "lp".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: SchedulerConfig =
            serde_json::from_str(r#"{ "filter_limit": 200, "preserve_job_files": true }"#)
                .expect("parse");
        assert_eq!(cfg.filter_limit, 200);
        assert!(cfg.preserve_job_files);
        assert_eq!(cfg.fax_retry_limit, 5);
        assert_eq!(cfg.fax_retry_interval(), Duration::from_secs(300));
    }
}
