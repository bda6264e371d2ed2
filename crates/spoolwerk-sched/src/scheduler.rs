// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The scheduler context and its dispatch pass.
//
// `Scheduler` owns every piece of mutable scheduling state: the job store,
// the filter budget, the id counter and the collaborators it talks to.  All
// mutation goes through `&mut self` on one task; the I/O pumps only send
// events.  `check_jobs` is run after every state change and is the only place
// a pending job is started from.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use spoolwerk_core::config::SchedulerConfig;
use spoolwerk_core::types::{HoldUntil, JobId, JobState};

use crate::admission::Admission;
use crate::clock::{Clock, SystemClock};
use crate::job::Job;
use crate::launcher::Launcher;
use crate::registry::{PrinterInfo, PrinterRegistry};
use crate::resolver::FilterResolver;
use crate::spool::{LoadedRecord, Spool};
use crate::store::JobStore;

/// Print-job scheduler.
pub struct Scheduler {
    pub(crate) config: SchedulerConfig,
    pub(crate) jobs: JobStore,
    pub(crate) admission: Admission,
    pub(crate) next_id: u32,
    pub(crate) next_run: u64,
    pub(crate) history_loaded: bool,
    pub(crate) registry: Box<dyn PrinterRegistry>,
    pub(crate) resolver: Box<dyn FilterResolver>,
    pub(crate) spool: Box<dyn Spool>,
    pub(crate) launcher: Box<dyn Launcher>,
    pub(crate) clock: Box<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Box<dyn PrinterRegistry>,
        resolver: Box<dyn FilterResolver>,
        spool: Box<dyn Spool>,
        launcher: Box<dyn Launcher>,
    ) -> Self {
        let admission = Admission::new(config.filter_limit);
        Self {
            config,
            jobs: JobStore::new(),
            admission,
            next_id: 1,
            next_run: 0,
            history_loaded: false,
            registry,
            resolver,
            spool,
            launcher,
            clock: Box::new(SystemClock),
        }
    }

    /// Replace the wall clock used for hold deadlines.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn filter_level(&self) -> u32 {
        self.admission.level()
    }

    /// A job already in memory.  Use [`Scheduler::find`] to include history.
    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Jobs in dispatch order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn queue_order(&self) -> Vec<JobId> {
        self.jobs.ids()
    }

    pub fn registry(&self) -> &dyn PrinterRegistry {
        self.registry.as_ref()
    }

    /// Whether any job has a pipeline running.
    pub fn has_processing_jobs(&self) -> bool {
        self.jobs.iter().any(|job| job.state == JobState::Processing)
    }

    /// Look a job up, loading the job history on the first miss.
    pub fn find(&mut self, id: JobId) -> Option<&Job> {
        if !self.jobs.contains(id) && !self.history_loaded {
            self.load_history();
        }
        self.jobs.get(id)
    }

    fn load_history(&mut self) {
        self.history_loaded = true;
        let records = match self.spool.load_history() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to load job history");
                return;
            }
        };
        let mut loaded = 0usize;
        for record in records {
            let Some(job) = self.accept_record(record) else {
                continue;
            };
            if !self.jobs.contains(job.id) {
                self.jobs.insert(job);
                loaded += 1;
            }
        }
        debug!(count = loaded, "job history loaded");
    }

    /// Turn a loaded record into a job, deleting it when malformed.
    fn accept_record(&mut self, record: LoadedRecord) -> Option<Job> {
        match record {
            LoadedRecord::Valid(record) => Some(Job::from_record(record)),
            LoadedRecord::Malformed { row, reason } => {
                warn!(row, %reason, "discarding malformed control record");
                if let Err(e) = self.spool.delete_row(row) {
                    warn!(row, error = %e, "failed to delete malformed record");
                }
                None
            }
        }
    }

    /// Reload the persisted queue at startup and start what can run.
    ///
    /// Returns the number of jobs restored.
    pub fn recover(&mut self) -> spoolwerk_core::error::Result<usize> {
        let records = self.spool.load_active()?;
        let mut restored = 0usize;
        for record in records {
            if let Some(job) = self.accept_record(record) {
                debug!(job_id = %job.id, state = %job.state, "restored job");
                self.jobs.insert(job);
                restored += 1;
            }
        }

        if let Some(last) = self.spool.last_job_id()? {
            self.next_id = self.next_id.max(last.0.saturating_add(1));
        }
        info!(restored, next_id = self.next_id, "job queue recovered");

        self.check_jobs();
        Ok(restored)
    }

    /// Earliest hold deadline among held jobs, for the loop's timer.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .iter()
            .filter(|job| job.state == JobState::Held)
            .filter_map(|job| match job.hold_until {
                Some(HoldUntil::At(deadline)) => Some(deadline),
                _ => None,
            })
            .min()
    }

    /// Promote expired holds and start every pending job that can run.
    pub fn check_jobs(&mut self) {
        let now = self.clock.now_utc();

        for id in self.jobs.ids() {
            let Some(job) = self.jobs.get_mut(id) else {
                continue;
            };

            if job.state == JobState::Held && job.hold_until.is_some_and(|h| h.has_elapsed(now)) {
                info!(job_id = %id, "hold expired, job released");
                job.state = JobState::Pending;
                job.hold_until = None;
                job.attributes.remove("job-hold-until");
                self.persist(id);
            }

            let Some(job) = self.jobs.get(id) else {
                continue;
            };
            if job.state != JobState::Pending {
                continue;
            }

            let dest = job.dest.clone();
            let Some(info) = self.registry.lookup(&dest) else {
                warn!(job_id = %id, dest = %dest, "destination no longer exists, canceling job");
                self.finish_job(id, JobState::Canceled, true);
                continue;
            };

            if let Some(printer) = self.available_printer(&info) {
                self.start_job(id, printer);
            }
        }
    }

    /// The printer a job queued on `info` could start on right now.
    fn available_printer(&self, info: &PrinterInfo) -> Option<PrinterInfo> {
        if !info.flags.is_pooled() {
            return info.is_available().then(|| info.clone());
        }
        info.members
            .iter()
            .filter_map(|member| self.registry.lookup(member))
            .find(PrinterInfo::is_available)
    }

    /// Write a job's control record; failures are logged.
    pub(crate) fn persist(&mut self, id: JobId) {
        let Some(job) = self.jobs.get(id) else {
            return;
        };
        if let Err(e) = self.spool.save(&job.to_record()) {
            warn!(job_id = %id, error = %e, "failed to save control record");
        }
    }

    /// Stop every running pipeline and save the queue, for shutdown.
    pub fn shutdown(&mut self) {
        let running: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|job| job.state == JobState::Processing)
            .map(|job| job.id)
            .collect();
        for id in &running {
            self.stop_job(*id, false);
            self.persist(*id);
        }
        info!(stopped = running.len(), "scheduler shut down");
    }
}
