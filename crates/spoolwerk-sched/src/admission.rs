// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filter admission control.
//
// A single budget limits the summed cost of every filter chain running at
// once.  A chain that does not fit is deferred, not failed; the scheduler
// retries it whenever a running chain releases its cost.

use tracing::{debug, warn};

/// System-wide filter budget.
#[derive(Debug, Clone, Default)]
pub struct Admission {
    /// Summed cost of running chains.
    level: u32,
    /// Ceiling; 0 disables the control.
    limit: u32,
}

impl Admission {
    pub fn new(limit: u32) -> Self {
        Self { level: 0, limit }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Whether a chain of `cost` may start now.
    ///
    /// A chain always fits when nothing else is running, so a single
    /// over-budget job cannot starve.
    pub fn admits(&self, cost: u32) -> bool {
        let over = self.level.saturating_add(cost) > self.limit;
        let fits = !(over && self.level > 0 && self.limit > 0);
        if !fits {
            debug!(level = self.level, limit = self.limit, cost, "filter budget exhausted");
        }
        fits
    }

    pub fn charge(&mut self, cost: u32) {
        self.level = self.level.saturating_add(cost);
    }

    pub fn release(&mut self, cost: u32) {
        if cost > self.level {
            warn!(level = self.level, cost, "filter level underflow clamped to zero");
        }
        self.level = self.level.saturating_sub(cost);
    }
}
