// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Priority-ordered job store.
//
// Jobs are owned by an id-keyed map; the dispatch order is a list of ids
// sorted by priority (descending), ties in arrival order.  The list is a view
// over the map, never a second copy of any job.

use std::collections::HashMap;

use spoolwerk_core::types::JobId;

use crate::job::Job;

/// Owned set of jobs with a priority-ordered view.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<JobId, Job>,
    order: Vec<JobId>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job before the first entry with a strictly lower priority,
    /// so equal priorities keep arrival order.
    ///
    /// Replaces any job already stored under the same id.
    pub fn insert(&mut self, job: Job) {
        let id = job.id;
        if self.jobs.contains_key(&id) {
            self.order.retain(|existing| *existing != id);
        }
        let priority = job.priority;
        self.jobs.insert(id, job);
        let pos = self.splice_point(priority);
        self.order.insert(pos, id);
    }

    fn splice_point(&self, priority: u32) -> usize {
        self.order
            .iter()
            .position(|other| self.jobs[other].priority < priority)
            .unwrap_or(self.order.len())
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    /// Remove a job from both the map and the order.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        let job = self.jobs.remove(&id)?;
        self.order.retain(|existing| *existing != id);
        Some(job)
    }

    /// Change a job's priority.
    ///
    /// The job is only re-spliced when its new priority puts it out of order
    /// with an immediate neighbour.  Returns whether it moved.
    pub fn reprioritize(&mut self, id: JobId, priority: u32) -> bool {
        let Some(job) = self.jobs.get_mut(&id) else {
            return false;
        };
        job.priority = priority;

        let Some(pos) = self.position(id) else {
            return false;
        };
        let ahead_is_lower = pos
            .checked_sub(1)
            .map(|prev| self.jobs[&self.order[prev]].priority < priority)
            .unwrap_or(false);
        let behind_is_higher = self
            .order
            .get(pos + 1)
            .map(|next| self.jobs[next].priority > priority)
            .unwrap_or(false);

        if !ahead_is_lower && !behind_is_higher {
            return false;
        }

        self.order.remove(pos);
        let new_pos = self.splice_point(priority);
        self.order.insert(new_pos, id);
        true
    }

    /// Position of a job in dispatch order.
    pub fn position(&self, id: JobId) -> Option<usize> {
        self.order.iter().position(|existing| *existing == id)
    }

    /// Snapshot of the dispatch order.
    pub fn ids(&self) -> Vec<JobId> {
        self.order.clone()
    }

    /// Jobs in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().map(|id| &self.jobs[id])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use spoolwerk_core::attributes::AttributeSet;
    use spoolwerk_core::types::DestFlags;

    use super::*;

    fn job(id: u32, priority: u32) -> Job {
        Job::new(
            JobId(id),
            priority,
            "p1",
            DestFlags::default(),
            "user",
            Vec::new(),
            AttributeSet::new(),
            Utc::now(),
        )
    }

    fn order(store: &JobStore) -> Vec<u32> {
        store.ids().into_iter().map(|id| id.0).collect()
    }

    #[test]
    fn insert_orders_by_priority_then_arrival() {
        let mut store = JobStore::new();
        store.insert(job(1, 50));
        store.insert(job(2, 70));
        store.insert(job(3, 50));
        assert_eq!(order(&store), vec![2, 1, 3]);

        store.insert(job(4, 100));
        store.insert(job(5, 0));
        store.insert(job(6, 70));
        assert_eq!(order(&store), vec![4, 2, 6, 1, 3, 5]);
    }

    #[test]
    fn map_and_order_stay_in_step() {
        let mut store = JobStore::new();
        store.insert(job(1, 50));
        store.insert(job(2, 50));

        let removed = store.remove(JobId(1)).expect("present");
        assert_eq!(removed.id, JobId(1));
        assert!(!store.contains(JobId(1)));
        assert_eq!(order(&store), vec![2]);
        assert!(store.remove(JobId(1)).is_none());
    }

    #[test]
    fn reinsert_same_id_does_not_duplicate() {
        let mut store = JobStore::new();
        store.insert(job(1, 50));
        store.insert(job(1, 60));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(JobId(1)).map(|j| j.priority), Some(60));
    }

    #[test]
    fn reprioritize_within_neighbours_is_a_no_op() {
        let mut store = JobStore::new();
        store.insert(job(1, 80));
        store.insert(job(2, 50));
        store.insert(job(3, 20));

        assert!(!store.reprioritize(JobId(2), 60));
        assert_eq!(order(&store), vec![1, 2, 3]);
        assert_eq!(store.get(JobId(2)).map(|j| j.priority), Some(60));

        // Equal to a neighbour is still in order.
        assert!(!store.reprioritize(JobId(2), 80));
        assert_eq!(order(&store), vec![1, 2, 3]);
    }

    #[test]
    fn reprioritize_across_neighbours_resplices_once() {
        let mut store = JobStore::new();
        store.insert(job(1, 80));
        store.insert(job(2, 50));
        store.insert(job(3, 20));

        assert!(store.reprioritize(JobId(3), 90));
        assert_eq!(order(&store), vec![3, 1, 2]);

        assert!(store.reprioritize(JobId(3), 10));
        assert_eq!(order(&store), vec![1, 2, 3]);
    }

    #[test]
    fn iter_follows_dispatch_order() {
        let mut store = JobStore::new();
        store.insert(job(1, 10));
        store.insert(job(2, 90));
        let priorities: Vec<u32> = store.iter().map(|j| j.priority).collect();
        assert_eq!(priorities, vec![90, 10]);
    }
}
