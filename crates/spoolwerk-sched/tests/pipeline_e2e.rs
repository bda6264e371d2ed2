// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end runs of real filter chains through `TokioLauncher`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use spoolwerk_core::config::SchedulerConfig;
use spoolwerk_core::types::{DocumentFile, JobState};
use spoolwerk_sched::{
    FilterRule, FilterTable, JobSubmission, MemoryRegistry, PrinterInfo, Scheduler, SqliteSpool,
    TokioLauncher,
};

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
}

struct Rig {
    sched: Scheduler,
    events: tokio::sync::mpsc::UnboundedReceiver<spoolwerk_sched::JobEvent>,
    input: std::path::PathBuf,
    output: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

/// A `file:` printer fed by `stage-one | stage-two`.
fn rig(stage_one: &str) -> Rig {
    let dir = tempfile::tempdir().expect("tempdir");
    let server_bin = dir.path().join("lib");
    let filters = server_bin.join("filter");
    fs::create_dir_all(&filters).expect("filter dir");
    write_script(&filters, "stage-one", stage_one);
    write_script(&filters, "stage-two", "exec cat");

    let input = dir.path().join("input.txt");
    fs::write(&input, "hello spool\n").expect("input");
    let output = dir.path().join("out.txt");

    let config = SchedulerConfig {
        spool_dir: dir.path().join("spool"),
        server_bin,
        tmp_dir: dir.path().to_path_buf(),
        filter_limit: 100,
        ..SchedulerConfig::default()
    };

    let mut registry = MemoryRegistry::new();
    registry.add_printer(PrinterInfo::printer(
        "capture",
        &format!("file://{}", output.display()),
        "text/x-out",
    ));
    let table = FilterTable::new(vec![
        FilterRule::new("text/plain", "application/x-mid", "stage-one", 3),
        FilterRule::new("application/x-mid", "text/x-out", "stage-two", 4),
    ]);
    let spool = SqliteSpool::open(&config.spool_dir).expect("spool");
    let (launcher, events) = TokioLauncher::new();

    let sched = Scheduler::new(
        config,
        Box::new(registry),
        Box::new(table),
        Box::new(spool),
        Box::new(launcher),
    );
    Rig { sched, events, input, output, _dir: dir }
}

#[tokio::test]
async fn chain_prints_to_file_and_releases_budget() {
    let mut rig = rig("echo 'INFO: converting' >&2\nexec cat \"$6\"");

    let id = rig
        .sched
        .submit(
            JobSubmission::new(50, "capture")
                .user("alice")
                .document_from(DocumentFile::new("text/plain"), rig.input.clone()),
        )
        .expect("submit");
    assert_eq!(rig.sched.job(id).map(|j| j.state), Some(JobState::Processing));
    assert_eq!(rig.sched.filter_level(), 7);

    rig.sched.run_until_idle(&mut rig.events).await;

    assert_eq!(rig.sched.job(id).map(|j| j.state), Some(JobState::Completed));
    assert_eq!(rig.sched.filter_level(), 0);
    assert_eq!(fs::read_to_string(&rig.output).expect("output"), "hello spool\n");
}

#[tokio::test]
async fn failing_filter_aborts_job() {
    let mut rig = rig("echo 'ERROR: cannot read input' >&2\nexit 1");

    let id = rig
        .sched
        .submit(
            JobSubmission::new(50, "capture")
                .document_from(DocumentFile::new("text/plain"), rig.input.clone()),
        )
        .expect("submit");

    rig.sched.run_until_idle(&mut rig.events).await;

    assert_eq!(rig.sched.job(id).map(|j| j.state), Some(JobState::Aborted));
    assert_eq!(rig.sched.filter_level(), 0);
}
