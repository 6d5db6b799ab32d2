//! Deploy admission
//!
//! One async mutex per deployment target. A deploy stage holds the guard for
//! all of its update requests, so two runs never interleave requests against
//! the same service.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct DeployAdmission {
    targets: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DeployAdmission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `target` is free and take it
    pub async fn acquire(&self, target: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut targets = self.targets.lock().await;
            targets
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        lock.lock_owned().await
    }
}
