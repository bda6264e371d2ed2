// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Spoolwerk.

use thiserror::Error;

use crate::types::{JobId, JobState};

/// Top-level error type for all Spoolwerk operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    // -- Control surface --
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {id} is {state}, cannot {action}")]
    InvalidState {
        id: JobId,
        state: JobState,
        action: &'static str,
    },

    #[error("priority {0} outside 0..=100")]
    InvalidPriority(u32),

    #[error("unrecognised job-hold-until value: {0}")]
    InvalidHoldUntil(String),

    #[error("destination {0} not found")]
    DestinationNotFound(String),

    // -- Pipeline --
    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpoolError>;
