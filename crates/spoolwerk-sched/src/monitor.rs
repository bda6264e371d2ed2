// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Status monitoring and pipeline completion.
//
// Every stage of a pipeline writes `LEVEL: message` lines to the job's shared
// status pipe.  Lines drive page accounting, printer state reasons and the
// printer's status message; the rest is logged.  A pipeline is finished once
// the pipe has closed and every stage has been reaped, in either order.

use chrono::Duration;
use tracing::{debug, error, info, trace, warn};

use spoolwerk_core::types::{DestFlags, HoldUntil, JobId, JobState, PrinterState};

use crate::job::StageKind;
use crate::launcher::JobEvent;
use crate::pipeline::StartOutcome;
use crate::registry::{QuotaVerdict, ReasonUpdate};
use crate::scheduler::Scheduler;

/// A partial line longer than this is processed without waiting for `\n`.
pub const MAX_STATUS_LINE: usize = 16 * 1024;

/// Backend exit code meaning the user canceled a fax at the device.
pub const FAX_USER_CANCELED: i32 = 5;

/// Status line category, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LineKind {
    Emerg,
    Alert,
    Crit,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
    Debug2,
    Page,
    State,
}

const PREFIXES: &[(&str, LineKind)] = &[
    ("EMERG:", LineKind::Emerg),
    ("ALERT:", LineKind::Alert),
    ("CRIT:", LineKind::Crit),
    ("ERROR:", LineKind::Error),
    ("WARNING:", LineKind::Warning),
    ("NOTICE:", LineKind::Notice),
    ("INFO:", LineKind::Info),
    ("DEBUG:", LineKind::Debug),
    ("DEBUG2:", LineKind::Debug2),
    ("PAGE:", LineKind::Page),
    ("STATE:", LineKind::State),
];

/// Split a status line into its kind and message.  Unprefixed lines are
/// debug output.
pub fn classify_line(line: &str) -> (LineKind, &str) {
    for (prefix, kind) in PREFIXES {
        if let Some(rest) = line.strip_prefix(prefix) {
            return (*kind, rest.trim_start());
        }
    }
    (LineKind::Debug, line)
}

/// A parsed `PAGE:` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageReport {
    /// `total N`: the device's own sheet count.
    Total(u32),
    /// `<page> <copies>`: one more page printed.
    Page { page: u32, copies: u32 },
}

impl PageReport {
    pub fn parse(message: &str) -> Option<Self> {
        let mut words = message.split_whitespace();
        let first = words.next()?;
        let second: u32 = words.next()?.parse().ok()?;
        if first == "total" {
            return Some(Self::Total(second));
        }
        Some(Self::Page {
            page: first.parse().ok()?,
            copies: second,
        })
    }
}

impl JobEvent {
    fn key(&self) -> crate::launcher::RunKey {
        match self {
            JobEvent::StatusData { key, .. } | JobEvent::StatusClosed { key } | JobEvent::ChildExited { key, .. } => {
                *key
            }
        }
    }
}

impl Scheduler {
    /// Apply one event from the I/O pumps.  Events from a run that is no
    /// longer current are dropped.
    pub fn handle_event(&mut self, event: JobEvent) {
        let key = event.key();
        let current = self.jobs.get(key.job).and_then(|job| job.run_key());
        if current != Some(key) {
            trace!(job_id = %key.job, run = key.run, "dropping stale event");
            return;
        }

        match event {
            JobEvent::StatusData { bytes, .. } => self.on_status_data(key.job, &bytes),
            JobEvent::StatusClosed { .. } => self.on_status_closed(key.job),
            JobEvent::ChildExited { pid, code, .. } => self.on_child_exit(key.job, pid, code),
        }
    }

    fn on_status_data(&mut self, id: JobId, bytes: &[u8]) {
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        let run = job.run;
        job.status_buffer.extend_from_slice(bytes);

        loop {
            let Some(job) = self.jobs.get_mut(id) else {
                return;
            };
            // A line may have canceled or restarted the job.
            if job.run_key().map(|k| k.run) != Some(run) {
                return;
            }
            let line = match job.status_buffer.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    let mut line: Vec<u8> = job.status_buffer.drain(..=end).collect();
                    line.pop();
                    line
                }
                None if job.status_buffer.len() > MAX_STATUS_LINE => std::mem::take(&mut job.status_buffer),
                None => return,
            };
            self.process_line(id, &String::from_utf8_lossy(&line));
        }
    }

    fn process_line(&mut self, id: JobId, line: &str) {
        let line = line.trim_end_matches('\r');
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        let Some(printer) = job.printer.clone() else {
            return;
        };
        let (kind, message) = classify_line(line);

        match kind {
            LineKind::Page => match PageReport::parse(message) {
                Some(PageReport::Total(sheets)) => {
                    job.sheets = sheets;
                }
                Some(PageReport::Page { page, copies }) => {
                    job.sheets = job.sheets.saturating_add(copies);
                    let user = job.username.clone();
                    debug!(job_id = %id, printer = %printer, page, copies, "page printed");
                    if self.registry.charge_pages(&printer, &user, copies) == QuotaVerdict::Exceeded {
                        info!(job_id = %id, user = %user, printer = %printer, "page quota exceeded, canceling job");
                        self.finish_job(id, JobState::Canceled, false);
                        self.check_jobs();
                    }
                }
                None => debug!(job_id = %id, %message, "unparsable PAGE line"),
            },
            LineKind::State => {
                self.registry.update_reasons(&printer, ReasonUpdate::parse(message));
            }
            level => {
                match level {
                    LineKind::Emerg | LineKind::Alert | LineKind::Crit | LineKind::Error => {
                        error!(job_id = %id, printer = %printer, "{message}")
                    }
                    LineKind::Warning => warn!(job_id = %id, printer = %printer, "{message}"),
                    LineKind::Notice | LineKind::Info => info!(job_id = %id, printer = %printer, "{message}"),
                    LineKind::Debug => debug!(job_id = %id, printer = %printer, "{message}"),
                    _ => trace!(job_id = %id, printer = %printer, "{message}"),
                }
                if level <= LineKind::Info && job.status.is_ok() {
                    self.registry.set_state_message(&printer, message);
                }
            }
        }
    }

    fn on_child_exit(&mut self, id: JobId, pid: u32, code: i32) {
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        let Some(stage) = job.stages.iter_mut().find(|s| s.pid == pid && pid != 0) else {
            debug!(job_id = %id, pid, "exit of unknown stage");
            return;
        };
        stage.pid = 0;
        stage.exit_code = Some(code);
        let kind = stage.kind;
        let program = stage.program.clone();

        if code == 0 {
            debug!(job_id = %id, pid, program = %program, "stage finished");
        } else {
            warn!(job_id = %id, pid, program = %program, code, "stage failed");
            // Backend errors take precedence over filter errors.
            if job.status.0 >= 0 {
                job.status.0 = match kind {
                    StageKind::Backend => -code,
                    StageKind::Filter => code,
                };
            }
        }

        if job.status_closed && job.all_stages_reaped() {
            self.finish_pipeline(id);
        }
    }

    fn on_status_closed(&mut self, id: JobId) {
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        let run = job.run;
        if !job.status_buffer.is_empty() {
            let rest = std::mem::take(&mut job.status_buffer);
            self.process_line(id, &String::from_utf8_lossy(&rest));
        }

        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        if job.run_key().map(|k| k.run) != Some(run) {
            return;
        }
        job.status_closed = true;
        job.status_pipe = None;
        if job.all_stages_reaped() {
            self.finish_pipeline(id);
        } else {
            debug!(job_id = %id, "status pipe closed, waiting for stages");
        }
    }

    /// Every stage is reaped and the pipe is closed: act on the outcome.
    fn finish_pipeline(&mut self, id: JobId) {
        let Some(job) = self.jobs.get(id) else {
            return;
        };
        let status = job.status;
        let flags = job.dest_flags;
        let printer = job.printer.clone();
        let more_files = job.current_file < job.files.len();

        if status.is_backend_error() {
            self.stop_job(id, false);
            self.after_backend_failure(id, flags, printer.as_deref(), -status.0);
            self.persist(id);
            self.check_jobs();
            return;
        }

        self.wind_down(id, false);
        if more_files {
            debug!(job_id = %id, "file done, starting next");
            match printer.and_then(|name| self.registry.lookup(&name)) {
                Some(info) => {
                    if self.start_job(id, info) == StartOutcome::Deferred {
                        self.persist(id);
                    }
                }
                None => self.persist(id),
            }
        } else {
            let state = if status.is_ok() { JobState::Completed } else { JobState::Aborted };
            self.finish_job(id, state, false);
        }
        self.check_jobs();
    }

    /// Retry policy after a backend failure.  The job has been stopped and is
    /// pending with the failed file queued again.
    fn after_backend_failure(&mut self, id: JobId, flags: DestFlags, printer: Option<&str>, code: i32) {
        if flags.is_pooled() {
            info!(job_id = %id, code, "backend failed, requeuing job on its class");
            return;
        }

        if !flags.fax {
            if let Some(printer) = printer {
                warn!(job_id = %id, printer = %printer, code, "backend failed, stopping printer");
                self.registry.set_state(printer, PrinterState::Stopped, None);
            }
            return;
        }

        let limit = self.config.fax_retry_limit;
        let hold_on_exhaustion = self.config.fax_hold_on_exhaustion;
        let interval =
            Duration::from_std(self.config.fax_retry_interval()).unwrap_or_else(|_| Duration::days(365));
        let now = self.clock.now_utc();
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        job.tries += 1;

        if code == FAX_USER_CANCELED {
            info!(job_id = %id, "fax canceled at the device");
            self.finish_job(id, JobState::Canceled, false);
        } else if job.tries >= limit {
            if hold_on_exhaustion {
                warn!(job_id = %id, tries = job.tries, "fax retries exhausted, holding job");
                job.state = JobState::Held;
                job.hold_until = Some(HoldUntil::Indefinite);
            } else {
                warn!(job_id = %id, tries = job.tries, "fax retries exhausted, canceling job");
                self.finish_job(id, JobState::Canceled, false);
            }
        } else {
            info!(job_id = %id, tries = job.tries, "fax failed, retrying later");
            job.state = JobState::Held;
            job.hold_until = Some(HoldUntil::At(now + interval));
        }
    }
}
