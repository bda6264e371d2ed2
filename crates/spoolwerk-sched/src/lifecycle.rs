// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job lifecycle operations: the control surface of the scheduler.
//
// Public operations validate, mutate, persist and then run `check_jobs`.
// The internal helpers (`stop_job`, `wind_down`, `finish_job`) never run the
// dispatch pass themselves, so they are safe to call from inside it.

use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use spoolwerk_core::attributes::{AttrGroup, Attribute, AttributeSet};
use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{DocumentFile, HoldUntil, JobId, JobState, PipelineStatus, PrinterState};

use crate::hold::resolve_hold_until;
use crate::job::Job;
use crate::scheduler::Scheduler;

/// Highest accepted job priority.
pub const MAX_PRIORITY: u32 = 100;

/// A job about to be queued.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub priority: u32,
    pub dest: String,
    pub username: String,
    /// Documents, each with the file to copy into the spool if it is not
    /// there already.
    pub documents: Vec<(DocumentFile, Option<PathBuf>)>,
    pub attributes: AttributeSet,
    /// A `job-hold-until` keyword.
    pub hold_until: Option<String>,
}

impl JobSubmission {
    pub fn new(priority: u32, dest: impl Into<String>) -> Self {
        Self {
            priority,
            dest: dest.into(),
            username: "anonymous".into(),
            documents: Vec::new(),
            attributes: AttributeSet::new(),
            hold_until: None,
        }
    }

    pub fn user(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// A document whose data file is already in the spool.
    pub fn document(mut self, document: DocumentFile) -> Self {
        self.documents.push((document, None));
        self
    }

    /// A document copied into the spool from `path`.
    pub fn document_from(mut self, document: DocumentFile, path: impl Into<PathBuf>) -> Self {
        self.documents.push((document, Some(path.into())));
        self
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.set(attribute);
        self
    }

    pub fn hold_until(mut self, token: impl Into<String>) -> Self {
        self.hold_until = Some(token.into());
        self
    }
}

impl Scheduler {
    /// Queue a new job and return its id.
    #[instrument(skip_all, fields(dest = %submission.dest, user = %submission.username))]
    pub fn submit(&mut self, submission: JobSubmission) -> Result<JobId> {
        if submission.priority > MAX_PRIORITY {
            return Err(SpoolError::InvalidPriority(submission.priority));
        }
        let info = self
            .registry
            .lookup(&submission.dest)
            .ok_or_else(|| SpoolError::DestinationNotFound(submission.dest.clone()))?;

        let hold = match &submission.hold_until {
            Some(token) => resolve_hold_until(token, self.clock.now())?,
            None => None,
        };

        let id = JobId(self.next_id);
        let mut files = Vec::with_capacity(submission.documents.len());
        for (index, (document, source)) in submission.documents.into_iter().enumerate() {
            let imported = match source {
                Some(source) => self.spool.import_data_file(id, index, &source).map(|_| ()),
                None => Ok(()),
            };
            if let Err(e) = imported {
                self.spool.remove_data_files(id, index);
                return Err(e);
            }
            files.push(document);
        }

        let mut attributes = submission.attributes;
        attributes.set(Attribute::integer(
            "job-priority",
            AttrGroup::Job,
            submission.priority as i32,
        ));
        if let Some(token) = &submission.hold_until {
            attributes.set(Attribute::keyword("job-hold-until", AttrGroup::Job, token.clone()));
        }

        let mut job = Job::new(
            id,
            submission.priority,
            submission.dest,
            info.flags,
            submission.username,
            files,
            attributes,
            self.clock.now_utc(),
        );
        if let Some(hold) = hold {
            job.state = JobState::Held;
            job.hold_until = Some(hold);
        }

        if let Err(e) = self.spool.save(&job.to_record()) {
            self.spool.remove_data_files(id, job.files.len());
            return Err(e);
        }
        self.next_id += 1;

        info!(
            job_id = %id,
            dest = %job.dest,
            user = %job.username,
            priority = job.priority,
            files = job.files.len(),
            state = %job.state,
            "job queued"
        );
        self.jobs.insert(job);
        self.check_jobs();
        Ok(id)
    }

    /// Cancel a job.  `purge` also drops its history record.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn cancel(&mut self, id: JobId, purge: bool) -> Result<()> {
        let job = self.require(id)?;
        if job.state.is_terminal() && !purge {
            debug!(job_id = %id, state = %job.state, "cancel of finished job ignored");
            return Ok(());
        }
        self.finish_job(id, JobState::Canceled, purge);
        self.check_jobs();
        Ok(())
    }

    /// Hold a job indefinitely.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn hold(&mut self, id: JobId) -> Result<()> {
        let job = self.require(id)?;
        if !matches!(job.state, JobState::Pending | JobState::Processing | JobState::Stopped) {
            return Err(SpoolError::InvalidState { id, state: job.state, action: "hold" });
        }
        self.stop_job(id, false);
        self.set_held(id, HoldUntil::Indefinite, "indefinite");
        info!(job_id = %id, "job held");
        self.persist(id);
        self.check_jobs();
        Ok(())
    }

    /// Release a held job.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn release(&mut self, id: JobId) -> Result<()> {
        let job = self.require(id)?;
        if job.state != JobState::Held {
            return Err(SpoolError::InvalidState { id, state: job.state, action: "release" });
        }
        job.state = JobState::Pending;
        job.hold_until = None;
        job.attributes.remove("job-hold-until");
        info!(job_id = %id, "job released");
        self.persist(id);
        self.check_jobs();
        Ok(())
    }

    /// Restart a stopped job, or reprint a finished job whose files were kept.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn restart(&mut self, id: JobId) -> Result<()> {
        let job = self.require(id)?;
        match job.state {
            JobState::Stopped => {
                job.state = JobState::Pending;
            }
            state if state.is_terminal() && !job.files.is_empty() => {
                job.state = JobState::Pending;
                job.current_file = 0;
                job.status = PipelineStatus::OK;
                job.completed_at = None;
                job.tries = 0;
                job.sheets = 0;
            }
            state => return Err(SpoolError::InvalidState { id, state, action: "restart" }),
        }
        info!(job_id = %id, "job restarted");
        self.persist(id);
        self.check_jobs();
        Ok(())
    }

    /// Move a waiting job to another destination.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn move_job(&mut self, id: JobId, dest: &str) -> Result<()> {
        let info = self
            .registry
            .lookup(dest)
            .ok_or_else(|| SpoolError::DestinationNotFound(dest.to_string()))?;
        let job = self.require(id)?;
        if job.state == JobState::Processing || job.state.is_terminal() {
            return Err(SpoolError::InvalidState { id, state: job.state, action: "move" });
        }
        info!(job_id = %id, from = %job.dest, to = %dest, "job moved");
        job.dest = dest.to_string();
        job.dest_flags = info.flags;
        self.persist(id);
        self.check_jobs();
        Ok(())
    }

    /// Change a job's priority.  Returns whether its queue position changed.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn set_priority(&mut self, id: JobId, priority: u32) -> Result<bool> {
        if priority > MAX_PRIORITY {
            return Err(SpoolError::InvalidPriority(priority));
        }
        let job = self.require(id)?;
        if job.state.is_terminal() {
            return Err(SpoolError::InvalidState { id, state: job.state, action: "change priority of" });
        }
        job.attributes
            .set(Attribute::integer("job-priority", AttrGroup::Job, priority as i32));
        let moved = self.jobs.reprioritize(id, priority);
        info!(job_id = %id, priority, moved, "job priority changed");
        self.persist(id);
        self.check_jobs();
        Ok(moved)
    }

    /// Apply a `job-hold-until` keyword.  Returns the resolved hold.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn set_hold_until(&mut self, id: JobId, token: &str) -> Result<Option<HoldUntil>> {
        let now = self.clock.now();
        let job = self.require(id)?;
        if job.state.is_terminal() {
            return Err(SpoolError::InvalidState { id, state: job.state, action: "hold" });
        }
        let hold = resolve_hold_until(token, now)?;

        match hold {
            Some(hold) => {
                self.stop_job(id, false);
                self.set_held(id, hold, token);
            }
            None => {
                job.attributes
                    .set(Attribute::keyword("job-hold-until", AttrGroup::Job, token));
                if job.state == JobState::Held {
                    job.state = JobState::Pending;
                    job.hold_until = None;
                }
            }
        }
        info!(job_id = %id, %token, ?hold, "job-hold-until set");
        self.persist(id);
        self.check_jobs();
        Ok(hold)
    }

    /// Stop a running job; it waits in the stopped state for a restart.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn stop(&mut self, id: JobId) -> Result<()> {
        let job = self.require(id)?;
        if job.state != JobState::Processing {
            return Err(SpoolError::InvalidState { id, state: job.state, action: "stop" });
        }
        self.stop_job(id, false);
        if let Some(job) = self.jobs.get_mut(id) {
            job.state = JobState::Stopped;
        }
        info!(job_id = %id, "job stopped");
        self.persist(id);
        self.check_jobs();
        Ok(())
    }

    fn require(&mut self, id: JobId) -> Result<&mut Job> {
        if self.find(id).is_none() {
            return Err(SpoolError::JobNotFound(id));
        }
        self.jobs.get_mut(id).ok_or(SpoolError::JobNotFound(id))
    }

    fn set_held(&mut self, id: JobId, hold: HoldUntil, token: &str) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.state = JobState::Held;
            job.hold_until = Some(hold);
            job.attributes
                .set(Attribute::keyword("job-hold-until", AttrGroup::Job, token));
        }
    }

    /// Kill a job's running stages and return it to pending with the
    /// interrupted file queued again.  No-op unless the job is processing.
    pub(crate) fn stop_job(&mut self, id: JobId, force: bool) {
        let Some(job) = self.jobs.get(id) else {
            return;
        };
        if job.state != JobState::Processing {
            return;
        }
        let running: Vec<u32> = job
            .stages
            .iter()
            .filter(|stage| !stage.is_reaped())
            .map(|stage| stage.pid)
            .collect();
        for pid in running {
            if let Err(e) = self.launcher.signal(pid, force) {
                warn!(job_id = %id, pid, error = %e, "failed to signal stage");
            }
        }
        debug!(job_id = %id, force, "job stopped");
        self.wind_down(id, true);
    }

    /// Release everything a processing job holds.  With `rewind`, the file
    /// that was running is queued again.
    pub(crate) fn wind_down(&mut self, id: JobId, rewind: bool) {
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        if job.cost_charged {
            self.admission.release(job.cost);
            job.cost_charged = false;
        }
        job.status_pipe = None;
        job.status_closed = false;
        job.status_buffer.clear();
        job.stages.clear();
        if let Some(printer) = job.printer.take() {
            self.registry.set_state(&printer, PrinterState::Idle, None);
        }
        if job.state == JobState::Processing {
            if rewind {
                job.current_file = job.current_file.saturating_sub(1);
            }
            job.state = JobState::Pending;
        }
    }

    /// Move a job to a terminal state, deleting what retention does not keep.
    pub(crate) fn finish_job(&mut self, id: JobId, state: JobState, purge: bool) {
        self.stop_job(id, purge);

        let keep_history = self.config.preserve_job_history;
        let keep_files = self.config.preserve_job_files;
        let now = self.clock.now_utc();
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        let local = !job.dest_flags.remote;

        if !(keep_history && keep_files && !purge && local) {
            self.spool.remove_data_files(id, job.files.len());
            job.files.clear();
        }
        job.state = state;
        job.hold_until = None;
        job.completed_at = Some(now);
        info!(job_id = %id, %state, sheets = job.sheets, "job finished");

        if keep_history && !purge && local {
            self.persist(id);
        } else {
            if let Err(e) = self.spool.delete(id) {
                warn!(job_id = %id, error = %e, "failed to delete control record");
            }
            self.jobs.remove(id);
        }
    }
}
