// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk Sched: the job scheduler.  Holds the priority-ordered job store,
// admits jobs against the filter-cost budget, wires filter/backend process
// chains and turns their status output and exit codes into job state.

pub mod admission;
pub mod clock;
pub mod event_loop;
pub mod hold;
pub mod job;
pub mod launcher;
pub mod legacy;
pub mod lifecycle;
pub mod monitor;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod spool;
pub mod store;

#[cfg(test)]
mod testkit;

pub use clock::{Clock, ManualClock, SystemClock};
pub use job::Job;
pub use launcher::{JobEvent, Launcher, TokioLauncher};
pub use lifecycle::JobSubmission;
pub use registry::{MemoryRegistry, PrinterInfo, PrinterRegistry};
pub use resolver::{FilterResolver, FilterRule, FilterTable};
pub use scheduler::Scheduler;
pub use spool::{Spool, SqliteSpool};
