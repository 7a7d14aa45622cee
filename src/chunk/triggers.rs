use crate::core::id::Id;

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Callback invoked after a remote commit with the inserted and updated id
/// sets observed during the locked interval.
pub type TriggerFn = Arc<
    dyn Fn(BTreeSet<Id>, BTreeSet<Id>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

/// Per-chunk trigger registry and dispatcher.
///
/// While a remote writer holds the chunk's lock, the ids of patched
/// revisions accumulate here; when the remote unlock arrives the accumulated
/// sets are handed to every registered trigger on its own task. Triggers
/// read chunk state without locking; they run after the locked interval and
/// only look at the ids that changed.
pub struct TriggerSet {
    triggers: Mutex<Vec<TriggerFn>>,
    inserted: Mutex<BTreeSet<Id>>,
    updated: Mutex<BTreeSet<Id>>,
    running: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerSet {
    pub fn new() -> Self {
        Self {
            triggers: Mutex::new(Vec::new()),
            inserted: Mutex::new(BTreeSet::new()),
            updated: Mutex::new(BTreeSet::new()),
            running: Mutex::new(Vec::new()),
        }
    }

    pub fn register<F, Fut>(&self, trigger: F)
    where
        F: Fn(BTreeSet<Id>, BTreeSet<Id>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: TriggerFn = Arc::new(move |inserted, updated| {
            Box::pin(trigger(inserted, updated)) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        self.triggers.lock().unwrap().push(boxed);
    }

    pub fn note_inserted(&self, id: Id) {
        self.inserted.lock().unwrap().insert(id);
    }

    pub fn note_updated(&self, id: Id) {
        self.updated.lock().unwrap().insert(id);
    }

    /// Takes the accumulated id sets and spawns one task per trigger.
    pub fn dispatch(&self) {
        let inserted = std::mem::take(&mut *self.inserted.lock().unwrap());
        let updated = std::mem::take(&mut *self.updated.lock().unwrap());
        if inserted.is_empty() && updated.is_empty() {
            return;
        }

        let triggers: Vec<TriggerFn> = self.triggers.lock().unwrap().clone();
        let mut running = self.running.lock().unwrap();
        for trigger in triggers {
            let inserted = inserted.clone();
            let updated = updated.clone();
            running.push(tokio::spawn(async move {
                trigger(inserted, updated).await;
            }));
        }
    }

    /// Joins every outstanding trigger run.
    pub async fn wait_for_completion(&self) {
        loop {
            let handle = self.running.lock().unwrap().pop();
            match handle {
                Some(handle) => {
                    if let Err(e) = handle.await {
                        tracing::error!("Trigger task failed: {}", e);
                    }
                }
                None => return,
            }
        }
    }
}

impl Default for TriggerSet {
    fn default() -> Self {
        Self::new()
    }
}
