// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer and class registry.
//
// The scheduler reads printer state to pick destinations and writes back
// state, status messages, state reasons and page quota charges.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use spoolwerk_core::types::{DestFlags, JobId, PrinterState};

/// What the scheduler knows about a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterInfo {
    pub name: String,
    pub state: PrinterState,
    pub flags: DestFlags,
    pub device_uri: String,
    /// Raw queues take the document as-is.
    pub raw: bool,
    /// MIME type the printer's backend consumes.
    pub accepted_type: String,
    pub current_job: Option<JobId>,
    /// Member printers, for classes.
    pub members: Vec<String>,
}

impl PrinterInfo {
    pub fn printer(name: &str, device_uri: &str, accepted_type: &str) -> Self {
        Self {
            name: name.into(),
            state: PrinterState::Idle,
            flags: DestFlags::default(),
            device_uri: device_uri.into(),
            raw: false,
            accepted_type: accepted_type.into(),
            current_job: None,
            members: Vec::new(),
        }
    }

    pub fn class(name: &str, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            state: PrinterState::Idle,
            flags: DestFlags {
                class: true,
                ..DestFlags::default()
            },
            device_uri: String::new(),
            raw: false,
            accepted_type: String::new(),
            current_job: None,
            members,
        }
    }

    /// Whether a job may be dispatched here now.
    ///
    /// Remote queues accept the next job as soon as the previous one has been
    /// handed off, whatever the state they last reported.
    pub fn is_available(&self) -> bool {
        self.state == PrinterState::Idle
            || (self.flags.remote && self.current_job.is_none() && self.state != PrinterState::Stopped)
    }
}

/// A `STATE:` line's effect on the reason set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonUpdate {
    Add(Vec<String>),
    Remove(Vec<String>),
    Replace(Vec<String>),
}

impl ReasonUpdate {
    /// Parse `+a,b`, `-a,b` or `a,b`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let split = |s: &str| -> Vec<String> {
            s.split([',', ' '])
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect()
        };
        if let Some(rest) = text.strip_prefix('+') {
            Self::Add(split(rest))
        } else if let Some(rest) = text.strip_prefix('-') {
            Self::Remove(split(rest))
        } else {
            Self::Replace(split(text))
        }
    }
}

/// Result of charging pages against a user's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaVerdict {
    Within,
    Exceeded,
}

/// Destination lookup and status write-back.
pub trait PrinterRegistry {
    fn lookup(&self, name: &str) -> Option<PrinterInfo>;

    fn set_state(&mut self, name: &str, state: PrinterState, current_job: Option<JobId>);

    fn set_state_message(&mut self, name: &str, message: &str);

    fn state_message(&self, name: &str) -> Option<String>;

    fn update_reasons(&mut self, name: &str, update: ReasonUpdate);

    fn reasons(&self, name: &str) -> Vec<String>;

    /// Charge `pages` to `user` on printer `name`.
    fn charge_pages(&mut self, name: &str, user: &str, pages: u32) -> QuotaVerdict;
}

#[derive(Debug, Default)]
struct Entry {
    info: Option<PrinterInfo>,
    message: String,
    reasons: BTreeSet<String>,
    page_limit: Option<u32>,
    pages_used: HashMap<String, u32>,
}

/// In-process registry built from configuration.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: HashMap<String, Entry>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_printer(&mut self, info: PrinterInfo) {
        debug!(printer = %info.name, uri = %info.device_uri, "registered printer");
        let name = info.name.clone();
        self.entry(&name).info = Some(info);
    }

    /// Register a class; the returned entry can be adjusted in place.
    pub fn add_class(&mut self, name: &str, members: Vec<String>) -> &mut PrinterInfo {
        debug!(class = %name, ?members, "registered class");
        self.entry(name).info.insert(PrinterInfo::class(name, members))
    }

    /// Per-user page quota on a printer.
    pub fn set_page_limit(&mut self, name: &str, limit: u32) {
        self.entry(name).page_limit = Some(limit);
    }

    pub fn remove(&mut self, name: &str) -> Option<PrinterInfo> {
        self.entries.remove(name).and_then(|e| e.info)
    }

    fn entry(&mut self, name: &str) -> &mut Entry {
        self.entries.entry(name.to_string()).or_default()
    }
}

impl PrinterRegistry for MemoryRegistry {
    fn lookup(&self, name: &str) -> Option<PrinterInfo> {
        self.entries.get(name).and_then(|e| e.info.clone())
    }

    fn set_state(&mut self, name: &str, state: PrinterState, current_job: Option<JobId>) {
        if let Some(info) = self.entries.get_mut(name).and_then(|e| e.info.as_mut()) {
            if info.state != state {
                info!(printer = %name, from = ?info.state, to = ?state, "printer state changed");
            }
            info.state = state;
            info.current_job = current_job;
        }
    }

    fn set_state_message(&mut self, name: &str, message: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.message = message.to_string();
        }
    }

    fn state_message(&self, name: &str) -> Option<String> {
        self.entries.get(name).map(|e| e.message.clone())
    }

    fn update_reasons(&mut self, name: &str, update: ReasonUpdate) {
        let Some(entry) = self.entries.get_mut(name) else {
            return;
        };
        match update {
            ReasonUpdate::Add(reasons) => entry.reasons.extend(reasons),
            ReasonUpdate::Remove(reasons) => {
                for reason in reasons {
                    entry.reasons.remove(&reason);
                }
            }
            ReasonUpdate::Replace(reasons) => entry.reasons = reasons.into_iter().collect(),
        }
    }

    fn reasons(&self, name: &str) -> Vec<String> {
        self.entries
            .get(name)
            .map(|e| e.reasons.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn charge_pages(&mut self, name: &str, user: &str, pages: u32) -> QuotaVerdict {
        let Some(entry) = self.entries.get_mut(name) else {
            return QuotaVerdict::Within;
        };
        let used = entry.pages_used.entry(user.to_string()).or_insert(0);
        *used = used.saturating_add(pages);
        match entry.page_limit {
            Some(limit) if *used > limit => QuotaVerdict::Exceeded,
            _ => QuotaVerdict::Within,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_updates() {
        let mut reg = MemoryRegistry::new();
        reg.add_printer(PrinterInfo::printer("laser", "socket://h", "application/postscript"));

        reg.update_reasons("laser", ReasonUpdate::parse("+media-empty,toner-low"));
        assert_eq!(reg.reasons("laser"), vec!["media-empty", "toner-low"]);

        reg.update_reasons("laser", ReasonUpdate::parse("-media-empty"));
        assert_eq!(reg.reasons("laser"), vec!["toner-low"]);

        reg.update_reasons("laser", ReasonUpdate::parse("door-open"));
        assert_eq!(reg.reasons("laser"), vec!["door-open"]);
    }

    #[test]
    fn quota_is_per_user() {
        let mut reg = MemoryRegistry::new();
        reg.add_printer(PrinterInfo::printer("laser", "socket://h", "application/postscript"));
        reg.set_page_limit("laser", 10);

        assert_eq!(reg.charge_pages("laser", "alice", 8), QuotaVerdict::Within);
        assert_eq!(reg.charge_pages("laser", "bob", 8), QuotaVerdict::Within);
        assert_eq!(reg.charge_pages("laser", "alice", 3), QuotaVerdict::Exceeded);
    }

    #[test]
    fn remote_availability() {
        let mut info = PrinterInfo::printer("far", "ipp://remote/q", "application/pdf");
        info.flags.remote = true;
        info.state = PrinterState::Processing;
        assert!(info.is_available());

        info.current_job = Some(JobId(4));
        assert!(!info.is_available());

        info.current_job = None;
        info.state = PrinterState::Stopped;
        assert!(!info.is_available());
    }

    #[test]
    fn set_state_tracks_current_job() {
        let mut reg = MemoryRegistry::new();
        reg.add_printer(PrinterInfo::printer("laser", "socket://h", "application/postscript"));
        reg.set_state("laser", PrinterState::Processing, Some(JobId(9)));

        let info = reg.lookup("laser").expect("present");
        assert_eq!(info.state, PrinterState::Processing);
        assert_eq!(info.current_job, Some(JobId(9)));
        assert!(!info.is_available());
    }
}
