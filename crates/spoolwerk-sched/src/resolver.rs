// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filter chain resolution.
//
// A chain converts a document from its MIME type to the type a printer
// accepts.  `FilterTable` answers from a list of conversion rules by picking
// the path with the lowest total cost.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

/// Program name of a pass-through filter.  Identity steps are never spawned.
pub const IDENTITY_FILTER: &str = "-";

/// One conversion step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterStep {
    pub program: String,
    pub cost: u32,
}

impl FilterStep {
    pub fn new(program: impl Into<String>, cost: u32) -> Self {
        Self {
            program: program.into(),
            cost,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.program == IDENTITY_FILTER
    }
}

/// Finds the filters that convert `source` into `dest`.
pub trait FilterResolver {
    /// `None` when no conversion exists; an empty chain when the types match.
    fn resolve(&self, source: &str, dest: &str) -> Option<Vec<FilterStep>>;
}

/// A configured conversion `source -> dest` through `program`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// MIME type, or `super/*` to match every subtype.
    pub source: String,
    pub dest: String,
    pub program: String,
    pub cost: u32,
}

impl FilterRule {
    pub fn new(source: &str, dest: &str, program: &str, cost: u32) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            program: program.into(),
            cost,
        }
    }

    fn matches_source(&self, mime: &str) -> bool {
        match self.source.strip_suffix("/*") {
            Some(super_type) => mime.split('/').next() == Some(super_type),
            None => self.source.eq_ignore_ascii_case(mime),
        }
    }
}

/// Least-cost resolver over a rule list.
#[derive(Debug, Clone, Default)]
pub struct FilterTable {
    rules: Vec<FilterRule>,
}

impl FilterTable {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }
}

impl FilterResolver for FilterTable {
    fn resolve(&self, source: &str, dest: &str) -> Option<Vec<FilterStep>> {
        if source.eq_ignore_ascii_case(dest) {
            return Some(Vec::new());
        }

        // Dijkstra over MIME types; edges are rules.
        let mut best: HashMap<String, u32> = HashMap::from([(source.to_string(), 0)]);
        let mut via: HashMap<String, (String, usize)> = HashMap::new();
        let mut heap = BinaryHeap::from([Reverse((0u32, source.to_string()))]);

        while let Some(Reverse((cost, mime))) = heap.pop() {
            if mime.eq_ignore_ascii_case(dest) {
                return Some(self.walk_back(&via, source, mime));
            }
            if best.get(&mime).is_some_and(|&known| known < cost) {
                continue;
            }
            for (idx, rule) in self.rules.iter().enumerate() {
                if !rule.matches_source(&mime) {
                    continue;
                }
                let next_cost = cost.saturating_add(rule.cost);
                let improves = best.get(&rule.dest).is_none_or(|&known| next_cost < known);
                if improves {
                    best.insert(rule.dest.clone(), next_cost);
                    via.insert(rule.dest.clone(), (mime.clone(), idx));
                    heap.push(Reverse((next_cost, rule.dest.clone())));
                }
            }
        }
        None
    }
}

impl FilterTable {
    fn walk_back(&self, via: &HashMap<String, (String, usize)>, source: &str, mut mime: String) -> Vec<FilterStep> {
        let mut steps = Vec::new();
        while mime != source {
            let Some((prev, idx)) = via.get(&mime) else {
                break;
            };
            let rule = &self.rules[*idx];
            steps.push(FilterStep::new(rule.program.clone(), rule.cost));
            mime = prev.clone();
        }
        steps.reverse();
        steps
    }
}
