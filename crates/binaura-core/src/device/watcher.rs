//! Debounced topology notifications
//!
//! Device enumeration fires notifications in bursts (one per member, per
//! stream, per property). The watcher coalesces a burst into a single
//! [`TopologySettled`] tick once the window passes with no new
//! notification, so the control thread reconciles once per burst.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};

use crate::hal::HalNotification;

/// One coalesced burst of topology notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologySettled {
    /// How many raw notifications the burst contained
    pub notifications: usize,
}

/// Background debouncer; stops when dropped
pub struct TopologyWatcher {
    shutdown_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl TopologyWatcher {
    /// Spawn the debounce thread over a HAL notification stream
    pub fn spawn(
        notifications: Receiver<HalNotification>,
        debounce: Duration,
    ) -> std::io::Result<(Self, Receiver<TopologySettled>)> {
        let (settled_tx, settled_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("topology-watcher".into())
            .spawn(move || run(notifications, shutdown_rx, settled_tx, debounce))?;

        Ok((
            Self {
                shutdown_tx: Some(shutdown_tx),
                thread_handle: Some(handle),
            },
            settled_rx,
        ))
    }
}

impl Drop for TopologyWatcher {
    fn drop(&mut self) {
        // Disconnecting the shutdown channel wakes the thread
        drop(self.shutdown_tx.take());
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    notifications: Receiver<HalNotification>,
    shutdown: Receiver<()>,
    settled: Sender<TopologySettled>,
    debounce: Duration,
) {
    log::debug!("Topology watcher started ({:?} debounce)", debounce);

    'outer: loop {
        // Idle: wait for the first notification of a burst
        crossbeam::select! {
            recv(notifications) -> msg => match msg {
                Ok(n) => log::trace!("Topology notification: {:?}", n),
                Err(_) => break 'outer,
            },
            recv(shutdown) -> _ => break 'outer,
        }

        let mut count = 1;
        loop {
            crossbeam::select! {
                recv(notifications) -> msg => match msg {
                    Ok(_) => count += 1,
                    Err(_) => {
                        let _ = settled.send(TopologySettled { notifications: count });
                        break 'outer;
                    }
                },
                recv(shutdown) -> _ => break 'outer,
                default(debounce) => break,
            }
        }

        log::debug!("Topology settled after {} notification(s)", count);
        if settled.send(TopologySettled { notifications: count }).is_err() {
            break;
        }
    }

    log::debug!("Topology watcher stopped");
}
