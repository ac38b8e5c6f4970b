//! Applies module load and unload notices on a dedicated thread.
//!
//! Opening an image and checking its debug companion reads whole files, so
//! the capture consumer only forwards notices here and never waits on them.
//! Notices are applied one at a time in the order they were submitted.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, trace, warn};

use super::ModuleResolver;
use crate::capture::ModuleUpdate;

/// Cloneable handle for submitting notices to a [`ModuleWorker`]
#[derive(Debug, Clone)]
pub struct ModuleUpdates {
    tx: Sender<ModuleUpdate>,
}

impl ModuleUpdates {
    /// Handle whose notices are only queued, for driving a sender alone
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, Receiver<ModuleUpdate>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    /// Queue a notice without waiting
    ///
    /// Returns `false` when the worker thread has died.
    pub fn submit(&self, update: &ModuleUpdate) -> bool {
        match self.tx.send(update.clone()) {
            Ok(()) => true,
            Err(_) => {
                debug!(path = %update.path.display(), "Module worker stopped; notice dropped");
                false
            }
        }
    }

    /// Notices submitted but not yet picked up by the worker
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }
}

/// Background thread owning module bookkeeping for one resolver
pub struct ModuleWorker {
    updates: Option<ModuleUpdates>,
    handle: Option<JoinHandle<u64>>,
}

impl ModuleWorker {
    pub fn spawn(resolver: Arc<ModuleResolver>) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("module-resolver".to_string())
            .spawn(move || run_worker(&resolver, rx))?;
        Ok(Self {
            updates: Some(ModuleUpdates { tx }),
            handle: Some(handle),
        })
    }

    pub fn updates(&self) -> Option<ModuleUpdates> {
        self.updates.clone()
    }

    /// Apply every notice already submitted, then stop
    ///
    /// Waits for handles held elsewhere to be dropped. Returns the number of
    /// notices applied.
    pub fn shutdown(mut self) -> u64 {
        self.stop()
    }

    fn stop(&mut self) -> u64 {
        self.updates = None;
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        match handle.join() {
            Ok(applied) => applied,
            Err(_) => {
                warn!("Module worker panicked");
                0
            }
        }
    }
}

impl Drop for ModuleWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(resolver: &ModuleResolver, rx: Receiver<ModuleUpdate>) -> u64 {
    let mut applied = 0;
    for update in rx {
        trace!(
            path = %update.path.display(),
            base = format_args!("{:#x}", update.base),
            change = ?update.change,
            "Applying module notice"
        );
        resolver.apply(&update);
        applied += 1;
    }
    debug!(applied, "Module worker finished");
    applied
}
