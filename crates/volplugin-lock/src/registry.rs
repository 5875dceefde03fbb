//! Named stop handles for per-mount background loops.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use volplugin_common::StopHandle;

/// Tracks at most one running loop per name.
///
/// Replacing a name stops the previous loop and waits for it to exit before
/// the new handle is installed, so two loops for the same mount never run at
/// once. The map lock is never held across that wait.
#[derive(Clone, Default)]
pub struct StopRegistry {
    handles: Arc<Mutex<HashMap<String, StopHandle>>>,
}

impl StopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` under `name`, stopping whatever ran there before.
    pub async fn add(&self, name: &str, handle: StopHandle) {
        loop {
            let previous = {
                let mut handles = self.handles.lock();
                match handles.remove(name) {
                    Some(previous) => previous,
                    None => {
                        handles.insert(name.to_string(), handle);
                        debug!(name = %name, "Registered stop handle");
                        return;
                    }
                }
            };

            debug!(name = %name, "Stopping previous loop before replacing it");
            previous.stop().await;
        }
    }

    /// Stop and forget the loop registered under `name`, if any.
    pub async fn remove(&self, name: &str) {
        let previous = self.handles.lock().remove(name);

        if let Some(previous) = previous {
            debug!(name = %name, "Stopping loop");
            previous.stop().await;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every registered loop.
    pub async fn stop_all(&self) {
        let drained: Vec<StopHandle> = self.handles.lock().drain().map(|(_, h)| h).collect();
        for handle in drained {
            handle.stop().await;
        }
    }
}
