//! Background polling for a list, e.g. waiting for a cluster to leave
//! `Initializing`.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use shared::{
    query::Filter,
    record::{Record, RecordSet},
};
use tracing::{debug, info, warn};

use crate::list::{ActivePoll, FetchOrigin, FetchOutcome, ListOrchestrator};

impl<F: Filter, T: Record> ListOrchestrator<F, T> {
    /// Refetches the current query until `stop` holds for a polled payload or
    /// [`clear_polling`](Self::clear_polling) is called. The first fetch goes
    /// out immediately; each later one waits `interval` after the previous
    /// one settled, so ticks never overlap. Replaces any active poll.
    ///
    /// `stop` runs while the list's state is locked and must not call back
    /// into the list. The poll ends on its own once every handle to the list
    /// has been dropped.
    pub fn poll<P>(self: &Arc<Self>, interval: Duration, stop: P)
    where
        P: Fn(&RecordSet<T>) -> bool + Send + Sync + 'static,
    {
        let previous = {
            let mut core = self.lock_core();
            core.poll_seq += 1;
            let id = core.poll_seq;
            let previous = core.poll.take();
            if previous.is_some() {
                core.abandon_poll_fetch();
            }
            let list = Arc::downgrade(self);
            let task = tokio::spawn(Self::run_poll(list, id, interval, stop));
            core.poll = Some(ActivePoll { id, task });
            self.publish(&core);
            previous
        };
        if let Some(previous) = previous {
            previous.task.abort();
        }
        info!(list = %self.name(), ?interval, "polling started");
    }

    /// Stops polling. A poll fetch still in flight is discarded when it lands.
    pub fn clear_polling(&self) {
        let active = {
            let mut core = self.lock_core();
            let active = core.poll.take();
            if active.is_some() {
                core.abandon_poll_fetch();
                self.publish(&core);
            }
            active
        };
        if let Some(active) = active {
            active.task.abort();
            info!(list = %self.name(), "polling cleared");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.lock_core().poll.is_some()
    }

    async fn run_poll<P>(list: Weak<Self>, id: u64, interval: Duration, stop: P)
    where
        P: Fn(&RecordSet<T>) -> bool,
    {
        let Some(mut manual) = list.upgrade().map(|this| this.manual_fetches.subscribe()) else {
            return;
        };
        loop {
            let Some(this) = list.upgrade() else {
                debug!(poll = id, "list dropped; poll task exiting");
                return;
            };
            let (outcome, finished) = this
                .dispatch_then(FetchOrigin::Poll, |core| core.poll_plan(id), |data| stop(data))
                .await;
            match outcome {
                FetchOutcome::Applied => {
                    if finished == Some(true) {
                        info!(list = %this.name(), "poll stop condition met");
                        break;
                    }
                }
                FetchOutcome::Failed(error) => {
                    warn!(list = %this.name(), %error, "poll fetch failed; will retry next tick");
                }
                FetchOutcome::Superseded => {
                    debug!(list = %this.name(), "poll fetch superseded by a manual fetch");
                }
                FetchOutcome::Skipped => {
                    if !this.lock_core().is_current_poll(id) {
                        return;
                    }
                    debug!(list = %this.name(), "poll tick waiting on manual fetch");
                    drop(this);
                    let closed = manual.wait_for(|pending| *pending == 0).await.is_err();
                    if closed {
                        return;
                    }
                    tokio::time::sleep(interval).await;
                    continue;
                }
            }
            drop(this);
            tokio::time::sleep(interval).await;
        }
        if let Some(this) = list.upgrade() {
            this.finish_poll(id);
        }
    }

    fn finish_poll(&self, id: u64) {
        let mut core = self.lock_core();
        if core.is_current_poll(id) {
            core.poll = None;
            self.publish(&core);
        }
    }
}

#[cfg(test)]
#[path = "tests/poll_tests.rs"]
mod tests;
