// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Spoolwerk scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a print job.
///
/// Ids are assigned sequentially by the scheduler and never reused while a
/// control record for the id exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u32);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a print job. Mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Queued, waiting for its destination and the filter budget.
    Pending,
    /// Not eligible until `hold_until` passes (or forever, if indefinite).
    Held,
    /// Filter chain running.
    Processing,
    /// Stopped by an operator; needs a restart.
    Stopped,
    /// Canceled by a user, an operator or the scheduler.
    Canceled,
    /// A filter failed on the last file.
    Aborted,
    /// Every file went through successfully.
    Completed,
}

impl JobState {
    /// Canceled, aborted and completed jobs never run again unless restarted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted | Self::Completed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Held => "held",
            Self::Processing => "processing",
            Self::Stopped => "stopped",
            Self::Canceled => "canceled",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// When a held job becomes eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldUntil {
    /// Only an explicit release makes the job eligible.
    Indefinite,
    /// Eligible once the clock passes this instant.
    At(DateTime<Utc>),
}

impl HoldUntil {
    /// Whether the hold has run out at `now`.
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Indefinite => false,
            Self::At(deadline) => *deadline <= now,
        }
    }
}

/// Destination type flags copied onto a job when it is queued or moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestFlags {
    pub class: bool,
    pub remote: bool,
    pub implicit: bool,
    pub fax: bool,
}

impl DestFlags {
    /// Class and implicit-class destinations can requeue onto another member.
    pub fn is_pooled(&self) -> bool {
        self.class || self.implicit
    }
}

/// One spooled document inside a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFile {
    /// MIME type in `super/type` form, e.g. `application/pdf`.
    pub mime_type: String,
    /// The spool file is gzip-compressed.
    pub compressed: bool,
}

impl DocumentFile {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            compressed: false,
        }
    }

    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }
}

/// State of a printer as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrinterState {
    Idle,
    Processing,
    Stopped,
}

/// Outcome recorded for the pipeline of the file currently printing.
///
/// Zero is success, positive values are filter exit codes and negative values
/// are backend exit codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus(pub i32);

impl PipelineStatus {
    pub const OK: Self = Self(0);

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    pub fn is_backend_error(&self) -> bool {
        self.0 < 0
    }

    pub fn is_filter_error(&self) -> bool {
        self.0 > 0
    }
}
