// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Test doubles and fixtures for scheduler unit tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{FixedOffset, TimeZone};
use tempfile::TempDir;

use spoolwerk_core::config::SchedulerConfig;
use spoolwerk_core::types::{JobId, JobState, PrinterState};

use crate::clock::ManualClock;
use crate::launcher::{JobEvent, Launcher, RunKey, SpawnRequest, StageInput, StageOutput, StatusWatch};
use crate::registry::{MemoryRegistry, PrinterInfo, PrinterRegistry, QuotaVerdict, ReasonUpdate};
use crate::resolver::{FilterRule, FilterTable};
use crate::scheduler::Scheduler;
use crate::spool::SqliteSpool;

/// Where a fake stage's stdout went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Pipe,
    File,
    Discard,
}

/// One recorded spawn.
#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub key: RunKey,
    pub pid: u32,
    pub program: PathBuf,
    pub arg0: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub stdin_is_pipe: bool,
    pub stdout: OutputKind,
}

#[derive(Debug, Default)]
struct LauncherState {
    spawned: Vec<SpawnRecord>,
    signals: Vec<(u32, bool)>,
    fail_at: Option<usize>,
    attempts: usize,
}

/// Launcher that records requests and never starts a process.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    fn lock(&self) -> MutexGuard<'_, LauncherState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the spawn attempt with this index (counting from 0) fail once.
    pub fn fail_spawn_at(&self, attempt: usize) {
        self.lock().fail_at = Some(attempt);
    }

    pub fn spawned(&self) -> Vec<SpawnRecord> {
        self.lock().spawned.clone()
    }

    pub fn signals(&self) -> Vec<(u32, bool)> {
        self.lock().signals.clone()
    }
}

impl Launcher for FakeLauncher {
    fn spawn(&mut self, key: RunKey, req: SpawnRequest) -> io::Result<u32> {
        let mut state = self.lock();
        let attempt = state.attempts;
        state.attempts += 1;
        if state.fail_at == Some(attempt) {
            state.fail_at = None;
            return Err(io::Error::other("fork failed"));
        }

        let pid = 1000 + attempt as u32;
        state.spawned.push(SpawnRecord {
            key,
            pid,
            program: req.program,
            arg0: req.arg0,
            args: req.args,
            env: req.env,
            stdin_is_pipe: matches!(req.stdin, StageInput::Pipe(_)),
            stdout: match req.stdout {
                StageOutput::NextStage(_) => OutputKind::Pipe,
                StageOutput::TerminalFile(_) => OutputKind::File,
                StageOutput::Discard => OutputKind::Discard,
            },
        });
        Ok(pid)
    }

    fn watch_status(&mut self, _key: RunKey, reader: OwnedFd) -> io::Result<StatusWatch> {
        Ok(StatusWatch::parked(reader))
    }

    fn signal(&mut self, pid: u32, force: bool) -> io::Result<()> {
        self.lock().signals.push((pid, force));
        Ok(())
    }
}

/// A `MemoryRegistry` the test keeps a handle to after handing it over.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry(Rc<RefCell<MemoryRegistry>>);

impl SharedRegistry {
    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryRegistry) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

impl PrinterRegistry for SharedRegistry {
    fn lookup(&self, name: &str) -> Option<PrinterInfo> {
        self.0.borrow().lookup(name)
    }

    fn set_state(&mut self, name: &str, state: PrinterState, current_job: Option<JobId>) {
        self.0.borrow_mut().set_state(name, state, current_job);
    }

    fn set_state_message(&mut self, name: &str, message: &str) {
        self.0.borrow_mut().set_state_message(name, message);
    }

    fn state_message(&self, name: &str) -> Option<String> {
        self.0.borrow().state_message(name)
    }

    fn update_reasons(&mut self, name: &str, update: ReasonUpdate) {
        self.0.borrow_mut().update_reasons(name, update);
    }

    fn reasons(&self, name: &str) -> Vec<String> {
        self.0.borrow().reasons(name)
    }

    fn charge_pages(&mut self, name: &str, user: &str, pages: u32) -> QuotaVerdict {
        self.0.borrow_mut().charge_pages(name, user, pages)
    }
}

/// A network printer taking PDF.
pub fn pdf_printer(name: &str) -> PrinterInfo {
    PrinterInfo::printer(name, "socket://10.0.0.5:9100", "application/pdf")
}

/// Report every stage of the job's current run as exited with `codes` (in
/// stage order), then close its status pipe.
pub fn finish_run(sched: &mut Scheduler, id: JobId, codes: &[i32]) {
    let job = sched.job(id).expect("job exists");
    let key = job.run_key().expect("job is processing");
    let pids: Vec<u32> = job.stages().iter().map(|s| s.pid).collect();
    assert_eq!(pids.len(), codes.len(), "one exit code per stage");

    for (pid, &code) in pids.into_iter().zip(codes) {
        sched.handle_event(JobEvent::ChildExited { key, pid, code });
    }
    sched.handle_event(JobEvent::StatusClosed { key });
}

/// A scheduler wired to fakes, with its collaborators kept reachable.
pub struct Fixture {
    pub sched: Scheduler,
    pub launcher: FakeLauncher,
    pub clock: ManualClock,
    pub registry: SharedRegistry,
    printers: Vec<String>,
    spool_dir: PathBuf,
    _dir: TempDir,
}

impl Fixture {
    pub fn builder() -> FixtureBuilder {
        FixtureBuilder::default()
    }

    pub fn state(&self, id: JobId) -> JobState {
        self.sched.job(id).map(|j| j.state).expect("job exists")
    }

    /// Stop every configured printer so nothing dispatches.
    pub fn stop_printers(&self) {
        self.registry.with(|r| {
            for name in &self.printers {
                r.set_state(name, PrinterState::Stopped, None);
            }
        });
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }
}

#[derive(Default)]
pub struct FixtureBuilder {
    config: SchedulerConfig,
    printers: Vec<PrinterInfo>,
    classes: Vec<(String, Vec<String>)>,
    page_limits: Vec<(String, u32)>,
    table: Option<FilterTable>,
    spool_dir: Option<PathBuf>,
    offline: bool,
}

impl FixtureBuilder {
    pub fn limit(mut self, limit: u32) -> Self {
        self.config.filter_limit = limit;
        self
    }

    pub fn table(mut self, table: FilterTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn printer(mut self, printer: PrinterInfo) -> Self {
        self.printers.push(printer);
        self
    }

    pub fn class(mut self, name: &str, members: &[&str]) -> Self {
        self.classes
            .push((name.to_string(), members.iter().map(|m| m.to_string()).collect()));
        self
    }

    pub fn page_limit(mut self, printer: &str, pages: u32) -> Self {
        self.page_limits.push((printer.to_string(), pages));
        self
    }

    pub fn fax_retries(mut self, limit: u32, interval_secs: u64) -> Self {
        self.config.fax_retry_limit = limit;
        self.config.fax_retry_interval_secs = interval_secs;
        self
    }

    pub fn hold_fax_on_exhaustion(mut self) -> Self {
        self.config.fax_hold_on_exhaustion = true;
        self
    }

    pub fn keep_files(mut self) -> Self {
        self.config.preserve_job_files = true;
        self
    }

    pub fn no_history(mut self) -> Self {
        self.config.preserve_job_history = false;
        self
    }

    /// Persist to a real `spool.db` in `dir`.
    pub fn spool_dir(mut self, dir: &Path) -> Self {
        self.spool_dir = Some(dir.to_path_buf());
        self
    }

    /// Start with every printer stopped.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn build(self) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut printers = self.printers;
        if printers.is_empty() {
            printers.push(pdf_printer("laser"));
        }

        let registry = SharedRegistry::default();
        let names: Vec<String> = printers.iter().map(|p| p.name.clone()).collect();
        registry.with(|r| {
            for printer in printers {
                r.add_printer(printer);
            }
            for (name, members) in self.classes {
                r.add_class(&name, members);
            }
            for (name, pages) in self.page_limits {
                r.set_page_limit(&name, pages);
            }
        });

        let (spool, spool_dir) = match self.spool_dir {
            Some(path) => (SqliteSpool::open(&path).expect("open spool"), path),
            None => {
                let path = dir.path().to_path_buf();
                (SqliteSpool::open_in_memory(&path).expect("open spool"), path)
            }
        };

        let table = self.table.unwrap_or_else(|| {
            FilterTable::new(vec![FilterRule::new("text/plain", "application/pdf", "texttopdf", 10)])
        });

        let offset = FixedOffset::east_opt(2 * 3600).expect("offset");
        let clock = ManualClock::new(
            offset
                .with_ymd_and_hms(2026, 10, 14, 20, 0, 0)
                .single()
                .expect("valid time"),
        );
        let launcher = FakeLauncher::default();

        let sched = Scheduler::new(
            self.config,
            Box::new(registry.clone()),
            Box::new(table),
            Box::new(spool),
            Box::new(launcher.clone()),
        )
        .with_clock(clock.clone());

        let fixture = Fixture {
            sched,
            launcher,
            clock,
            registry,
            printers: names,
            spool_dir,
            _dir: dir,
        };
        if self.offline {
            fixture.stop_printers();
        }
        fixture
    }
}
