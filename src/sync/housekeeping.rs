//! Background housekeeping worker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::sync::service::SyncService;

enum HousekeepingCommand {
    RunNow,
    Shutdown,
}

/// Handle to the worker thread; shuts it down on drop.
pub struct HousekeepingHandle {
    tx: Sender<HousekeepingCommand>,
    join: Option<JoinHandle<()>>,
}

impl HousekeepingHandle {
    /// Spawns a worker running `service.housekeep()` every `interval`.
    pub fn start(service: Arc<SyncService>, interval: Duration) -> std::io::Result<Self> {
        let (tx, rx) = channel::unbounded();
        let join = thread::Builder::new()
            .name("habit-sync-housekeeping".to_string())
            .spawn(move || run_housekeeping_loop(&service, interval, rx))?;
        Ok(Self {
            tx,
            join: Some(join),
        })
    }

    /// Requests an immediate pass without waiting for the next tick.
    pub fn run_now(&self) {
        let _ = self.tx.send(HousekeepingCommand::RunNow);
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.tx.send(HousekeepingCommand::Shutdown);
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            tracing::warn!("housekeeping worker panicked");
        }
    }
}

impl Drop for HousekeepingHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_housekeeping_loop(
    service: &SyncService,
    interval: Duration,
    rx: Receiver<HousekeepingCommand>,
) {
    let ticker = channel::tick(interval);
    loop {
        crossbeam::select! {
            recv(ticker) -> _ => run_pass(service),
            recv(rx) -> cmd => match cmd {
                Ok(HousekeepingCommand::RunNow) => run_pass(service),
                Ok(HousekeepingCommand::Shutdown) | Err(_) => break,
            },
        }
    }
}

fn run_pass(service: &SyncService) {
    match service.housekeep() {
        Ok(report) => {
            if report.pending_evicted > 0 || report.cache_evicted > 0 {
                tracing::debug!(
                    pending_evicted = report.pending_evicted,
                    cache_evicted = report.cache_evicted,
                    "housekeeping pass"
                );
            }
        }
        Err(err) => tracing::warn!(error = %err, "housekeeping pass failed"),
    }
}
