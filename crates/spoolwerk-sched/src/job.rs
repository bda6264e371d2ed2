// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job records and the stages of their running pipelines.
//
// A `Job` is the in-memory record the scheduler mutates; a `ControlRecord` is
// the serialisable subset written to the spool.  Process state (stages, the
// status pipe, the admission charge) never reaches the control record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use spoolwerk_core::attributes::AttributeSet;
use spoolwerk_core::types::{DestFlags, DocumentFile, HoldUntil, JobId, JobState, PipelineStatus};

use crate::launcher::{RunKey, StatusWatch};

/// Role of a process in a job's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Filter,
    Backend,
}

/// One spawned process of a job's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Process id while running; 0 once the exit status has been collected.
    pub pid: u32,
    pub kind: StageKind,
    /// Program path, for log messages.
    pub program: String,
    /// Exit code once reaped (signals map to 128 + signo).
    pub exit_code: Option<i32>,
}

impl Stage {
    pub fn new(pid: u32, kind: StageKind, program: impl Into<String>) -> Self {
        Self {
            pid,
            kind,
            program: program.into(),
            exit_code: None,
        }
    }

    pub fn is_reaped(&self) -> bool {
        self.pid == 0
    }
}

/// A print job.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    /// 0..=100, higher dispatched first.
    pub priority: u32,
    /// Printer or class name the job was queued on.
    pub dest: String,
    pub dest_flags: DestFlags,
    pub state: JobState,
    pub hold_until: Option<HoldUntil>,
    /// Index of the next file to start.
    pub current_file: usize,
    pub files: Vec<DocumentFile>,
    /// Summed filter cost of the file currently printing.
    pub cost: u32,
    pub username: String,
    pub attributes: AttributeSet,
    /// Printer running the job; set only while processing.
    pub printer: Option<String>,
    /// Sheets reported through `PAGE:` lines.
    pub sheets: u32,
    /// Fax delivery attempts so far.
    pub tries: u32,
    /// Outcome of the current file's pipeline.
    pub status: PipelineStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub(crate) stages: Vec<Stage>,
    pub(crate) status_buffer: Vec<u8>,
    pub(crate) status_pipe: Option<StatusWatch>,
    /// Status pipe reached EOF for the current run.
    pub(crate) status_closed: bool,
    /// `cost` is included in the filter level.
    pub(crate) cost_charged: bool,
    /// Pipeline run number; events from other runs are stale.
    pub(crate) run: u64,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        priority: u32,
        dest: impl Into<String>,
        dest_flags: DestFlags,
        username: impl Into<String>,
        files: Vec<DocumentFile>,
        attributes: AttributeSet,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            priority,
            dest: dest.into(),
            dest_flags,
            state: JobState::Pending,
            hold_until: None,
            current_file: 0,
            files,
            cost: 0,
            username: username.into(),
            attributes,
            printer: None,
            sheets: 0,
            tries: 0,
            status: PipelineStatus::OK,
            created_at,
            completed_at: None,
            stages: Vec::new(),
            status_buffer: Vec::new(),
            status_pipe: None,
            status_closed: false,
            cost_charged: false,
            run: 0,
        }
    }

    /// Stages of the running pipeline, in spawn order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Whether the job's status pipe is open.
    pub fn has_status_pipe(&self) -> bool {
        self.status_pipe.is_some()
    }

    /// Key identifying the current pipeline run, if one is active.
    pub fn run_key(&self) -> Option<RunKey> {
        (self.state == JobState::Processing).then_some(RunKey {
            job: self.id,
            run: self.run,
        })
    }

    /// `job-name`, or `untitled`.
    pub fn title(&self) -> &str {
        self.attributes.get_string("job-name").unwrap_or("untitled")
    }

    /// `copies`, clamped to at least one.
    pub fn copies(&self) -> u32 {
        self.attributes
            .get_integer("copies")
            .map(|c| c.max(1) as u32)
            .unwrap_or(1)
    }

    pub(crate) fn all_stages_reaped(&self) -> bool {
        self.stages.iter().all(Stage::is_reaped)
    }

    /// Serialisable snapshot for the spool.
    pub fn to_record(&self) -> ControlRecord {
        ControlRecord {
            id: self.id.0,
            priority: self.priority,
            dest: self.dest.clone(),
            dest_flags: self.dest_flags,
            state: self.state,
            hold_until: self.hold_until,
            current_file: self.current_file,
            files: self.files.clone(),
            username: self.username.clone(),
            attributes: self.attributes.clone(),
            sheets: self.sheets,
            tries: self.tries,
            status: self.status.0,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    /// Rebuild a job from its control record.
    ///
    /// A job that was processing when the record was written lost its
    /// processes with the previous scheduler; it comes back pending with the
    /// interrupted file queued again.
    pub fn from_record(record: ControlRecord) -> Self {
        let mut job = Job::new(
            JobId(record.id),
            record.priority,
            record.dest,
            record.dest_flags,
            record.username,
            record.files,
            record.attributes,
            record.created_at,
        );
        job.state = record.state;
        job.hold_until = record.hold_until;
        job.current_file = record.current_file;
        job.sheets = record.sheets;
        job.tries = record.tries;
        job.status = PipelineStatus(record.status);
        job.completed_at = record.completed_at;

        if job.state == JobState::Processing {
            job.state = JobState::Pending;
            job.current_file = job.current_file.saturating_sub(1);
            job.status = PipelineStatus::OK;
        }
        job
    }
}

/// Persisted form of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub id: u32,
    pub priority: u32,
    pub dest: String,
    pub dest_flags: DestFlags,
    pub state: JobState,
    pub hold_until: Option<HoldUntil>,
    pub current_file: usize,
    pub files: Vec<DocumentFile>,
    pub username: String,
    pub attributes: AttributeSet,
    pub sheets: u32,
    pub tries: u32,
    pub status: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
