// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The async driver: feeds pump events into the scheduler and wakes it for
// hold deadlines.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::launcher::JobEvent;
use crate::scheduler::Scheduler;

/// Upper bound on one idle sleep, so clock jumps are noticed.
const MAX_IDLE: Duration = Duration::from_secs(60);

impl Scheduler {
    /// Run until `shutdown` resolves or every event sender is gone, then
    /// stop running pipelines.
    pub async fn run(&mut self, events: &mut UnboundedReceiver<JobEvent>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        self.check_jobs();

        loop {
            let idle = self.until_next_wakeup();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event);
                        self.check_jobs();
                    }
                    None => {
                        debug!("event channel closed");
                        break;
                    }
                },
                _ = tokio::time::sleep(idle) => self.check_jobs(),
            }
        }

        self.shutdown();
    }

    /// Handle events until no job is processing. Used by tools and tests
    /// that submit a batch and wait for it.
    pub async fn run_until_idle(&mut self, events: &mut UnboundedReceiver<JobEvent>) {
        self.check_jobs();
        while self.has_processing_jobs() {
            let Some(event) = events.recv().await else {
                break;
            };
            self.handle_event(event);
            self.check_jobs();
        }
    }

    fn until_next_wakeup(&self) -> Duration {
        match self.next_wakeup() {
            Some(deadline) => (deadline - self.clock.now_utc())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(MAX_IDLE),
            None => MAX_IDLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use spoolwerk_core::types::{DocumentFile, JobState};

    use crate::clock::Clock;
    use crate::lifecycle::JobSubmission;
    use crate::testkit::Fixture;

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let mut fx = Fixture::builder().offline().build();
        let id = fx
            .sched
            .submit(JobSubmission::new(50, "laser").document(DocumentFile::new("text/plain")))
            .expect("submit");

        let (_tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        fx.sched.run(&mut rx, async {}).await;
        assert_eq!(fx.state(id), JobState::Pending);
    }

    #[tokio::test]
    async fn run_ends_when_senders_are_gone() {
        let mut fx = Fixture::builder().build();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        drop(tx);
        fx.sched.run(&mut rx, std::future::pending()).await;
        assert!(!fx.sched.has_processing_jobs());
    }

    #[test]
    fn idle_sleep_tracks_hold_deadline() {
        let mut fx = Fixture::builder().offline().build();
        let id = fx
            .sched
            .submit(
                JobSubmission::new(50, "laser")
                    .document(DocumentFile::new("text/plain"))
                    .hold_until("indefinite"),
            )
            .expect("submit");
        assert_eq!(fx.sched.until_next_wakeup(), super::MAX_IDLE);

        // The clock reads 18:00:00 GMT.
        fx.sched.set_hold_until(id, "18:00:20").expect("set hold");
        let deadline = fx.clock.now_utc() + ChronoDuration::seconds(20);
        assert_eq!(fx.sched.next_wakeup(), Some(deadline));
        assert_eq!(fx.sched.until_next_wakeup(), std::time::Duration::from_secs(20));
    }
}
