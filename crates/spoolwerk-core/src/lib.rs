// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk Core: types, configuration and error definitions shared across
// all crates.

pub mod attributes;
pub mod config;
pub mod error;
pub mod types;

pub use attributes::{AttrGroup, AttrValue, Attribute, AttributeSet, ValueTag};
pub use config::SchedulerConfig;
pub use error::SpoolError;
pub use types::*;
