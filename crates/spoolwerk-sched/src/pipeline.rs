// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline construction: resolve, admit, wire and spawn one file of a job.
//
//   data file ─► filter 0 ─pipe─► filter 1 ─pipe─► … ─pipe─► backend ─► device
//                   │                │                         │
//                   └────── stderr: shared status pipe ────────┘
//
// A `file:` device has no backend; the last filter writes the destination
// file directly.

use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use spoolwerk_core::config::SchedulerConfig;
use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{JobId, JobState, PipelineStatus, PrinterState};

use crate::job::{Stage, StageKind};
use crate::launcher::{
    Launcher, RunKey, SpawnRequest, StageInput, StageOutput, StatusWatch, cloexec_pipe,
};
use crate::legacy::{self, EnvContext, LegacyArgs};
use crate::registry::PrinterInfo;
use crate::resolver::FilterStep;
use crate::scheduler::Scheduler;

/// What `start_job` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartOutcome {
    /// The pipeline is running.
    Started,
    /// Over the filter budget; the job is still pending.
    Deferred,
    /// No file of the job could be converted, or the job was not startable.
    Canceled,
    /// Spawning failed; the job was canceled.
    Failed,
}

/// Where the last stage of a chain sends its output.
#[derive(Debug)]
pub enum ChainSink {
    /// A backend program consuming the last pipe.
    Backend { program: PathBuf, arg0: String },
    /// A local file opened by the scheduler.
    File(PathBuf),
}

/// Everything `spawn_chain` needs for one file.
#[derive(Debug)]
pub struct ChainPlan {
    pub filters: Vec<FilterStep>,
    pub sink: ChainSink,
    pub args: LegacyArgs,
    pub env: std::collections::BTreeMap<String, String>,
}

impl Scheduler {
    /// Start the job's current file on `printer`.
    pub(crate) fn start_job(&mut self, id: JobId, printer: PrinterInfo) -> StartOutcome {
        let Some(job) = self.jobs.get(id) else {
            return StartOutcome::Canceled;
        };
        if job.state != JobState::Pending {
            return StartOutcome::Canceled;
        }

        // Resolve a chain, skipping files nothing can convert.
        let (file_index, document, mut filters) = loop {
            let Some(job) = self.jobs.get_mut(id) else {
                return StartOutcome::Canceled;
            };
            let file_index = job.current_file;
            let Some(document) = job.files.get(file_index).cloned() else {
                warn!(job_id = %id, file_index, "job has no file left to print, canceling");
                self.finish_job(id, JobState::Canceled, false);
                return StartOutcome::Canceled;
            };

            let chain = if printer.raw {
                Some(Vec::new())
            } else {
                self.resolver.resolve(&document.mime_type, &printer.accepted_type)
            };
            match chain {
                Some(chain) => break (file_index, document, chain),
                None => {
                    warn!(
                        job_id = %id,
                        file_index,
                        mime = %document.mime_type,
                        printer = %printer.name,
                        "unable to convert file to a printable format"
                    );
                    job.current_file += 1;
                    if job.current_file >= job.files.len() {
                        self.finish_job(id, JobState::Canceled, false);
                        return StartOutcome::Canceled;
                    }
                }
            }
        };

        filters.retain(|step| !step.is_identity());
        let mut cost: u32 = filters.iter().map(|step| step.cost).sum();
        if document.compressed {
            cost = cost.saturating_add(self.config.decompress_cost);
        }

        if !self.admission.admits(cost) {
            debug!(job_id = %id, cost, "job deferred by filter budget");
            return StartOutcome::Deferred;
        }

        if document.compressed {
            filters.insert(
                0,
                FilterStep::new(self.config.decompress_filter.clone(), self.config.decompress_cost),
            );
        }

        let sink = match legacy::file_uri_path(&printer.device_uri) {
            Some(path) => ChainSink::File(path),
            None => ChainSink::Backend {
                program: self
                    .config
                    .server_bin
                    .join("backend")
                    .join(legacy::uri_scheme(&printer.device_uri)),
                arg0: legacy::sanitize_device_uri(&printer.device_uri),
            },
        };

        if filters.is_empty() && matches!(sink, ChainSink::File(_)) {
            warn!(job_id = %id, printer = %printer.name, "raw job to a file device has no stage to run, canceling");
            self.finish_job(id, JobState::Canceled, false);
            return StartOutcome::Canceled;
        }

        let data_file = self.spool.data_file(id, file_index);
        self.next_run += 1;
        let run = self.next_run;

        let Some(job) = self.jobs.get_mut(id) else {
            return StartOutcome::Canceled;
        };
        let plan = ChainPlan {
            filters,
            sink,
            args: LegacyArgs {
                printer: printer.name.clone(),
                job_id: id.0,
                user: job.username.clone(),
                title: job.title().to_string(),
                copies: job.copies(),
                options: legacy::options_string(&job.attributes, printer.flags.remote),
                file: Some(data_file),
            },
            env: legacy::build_env(&EnvContext {
                config: &self.config,
                printer: &printer.name,
                device_uri: &printer.device_uri,
                content_type: &document.mime_type,
                class: job.dest_flags.is_pooled().then_some(job.dest.as_str()),
                attributes: &job.attributes,
            }),
        };

        job.cost = cost;
        job.current_file += 1;
        job.state = JobState::Processing;
        job.printer = Some(printer.name.clone());
        job.status = PipelineStatus::OK;
        job.status_buffer.clear();
        job.status_closed = false;
        job.stages.clear();
        job.run = run;
        job.cost_charged = true;
        self.admission.charge(cost);
        self.registry
            .set_state(&printer.name, PrinterState::Processing, Some(id));

        let key = RunKey { job: id, run };
        let mut stages = Vec::new();
        let spawned = spawn_chain(self.launcher.as_mut(), &self.config, key, plan, &mut stages);

        let Some(job) = self.jobs.get_mut(id) else {
            return StartOutcome::Failed;
        };
        job.stages = stages;
        match spawned {
            Ok(watch) => {
                job.status_pipe = Some(watch);
                info!(
                    job_id = %id,
                    printer = %printer.name,
                    file = file_index + 1,
                    of = job.files.len(),
                    cost,
                    level = self.admission.level(),
                    "job started"
                );
                self.persist(id);
                StartOutcome::Started
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "unable to start pipeline, canceling job");
                self.finish_job(id, JobState::Canceled, false);
                StartOutcome::Failed
            }
        }
    }
}

/// Path of a filter program: absolute names as-is, others under
/// `<server_bin>/filter`.
pub fn filter_program(config: &SchedulerConfig, program: &str) -> PathBuf {
    let path = PathBuf::from(program);
    if path.is_absolute() {
        path
    } else {
        config.server_bin.join("filter").join(path)
    }
}

/// Spawn every stage of `plan`, recording each started process in `stages`.
///
/// On error the processes already started stay in `stages` so the caller can
/// stop them.
pub fn spawn_chain(
    launcher: &mut dyn Launcher,
    config: &SchedulerConfig,
    key: RunKey,
    plan: ChainPlan,
    stages: &mut Vec<Stage>,
) -> Result<StatusWatch> {
    let (status_reader, status_writer) = cloexec_pipe()?;
    let watch = launcher.watch_status(key, status_reader)?;

    let filter_count = plan.filters.len();
    let mut input = StageInput::Null;

    for (index, step) in plan.filters.iter().enumerate() {
        let last = index + 1 == filter_count;
        let (stdout, next_input) = match (&plan.sink, last) {
            (ChainSink::File(path), true) => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?;
                (StageOutput::TerminalFile(file), None)
            }
            _ => {
                let (reader, writer) = cloexec_pipe()?;
                (StageOutput::NextStage(writer), Some(StageInput::Pipe(reader)))
            }
        };

        let program = filter_program(config, &step.program);
        let request = SpawnRequest {
            program: program.clone(),
            arg0: plan.args.printer.clone(),
            args: plan.args.tail(index == 0),
            env: plan.env.clone(),
            stdin: std::mem::replace(&mut input, StageInput::Null),
            stdout,
            stderr: status_writer.try_clone()?,
        };
        let pid = launcher.spawn(key, request).map_err(|e| SpoolError::Spawn {
            program: program.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(job_id = %key.job, pid, program = %program.display(), "filter started");
        stages.push(Stage::new(pid, StageKind::Filter, program.display().to_string()));

        if let Some(next) = next_input {
            input = next;
        }
    }

    if let ChainSink::Backend { program, arg0 } = plan.sink {
        let request = SpawnRequest {
            program: program.clone(),
            arg0,
            args: plan.args.tail(filter_count == 0),
            env: plan.env,
            stdin: input,
            stdout: StageOutput::Discard,
            stderr: status_writer,
        };
        let pid = launcher.spawn(key, request).map_err(|e| SpoolError::Spawn {
            program: program.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(job_id = %key.job, pid, program = %program.display(), "backend started");
        stages.push(Stage::new(pid, StageKind::Backend, program.display().to_string()));
    }

    Ok(watch)
}
