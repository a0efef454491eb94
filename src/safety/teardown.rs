/// Engine teardown accounting
/// Every engine instance is recorded immediately after creation and marked
/// closed exactly once. A second close is reported, never ignored.
use crate::config::types::{Result, SandboxError};
use crate::observability::{audit, metrics};
use log::{debug, error, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

/// Ledger entry for one engine instance
#[derive(Debug, Clone)]
pub struct InstanceEntry {
    pub instance_id: String,
    pub created_at: SystemTime,
    pub closed_at: Option<SystemTime>,
    /// Close requests seen, including rejected repeats
    pub close_calls: u32,
}

impl InstanceEntry {
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// Shared, cloneable ledger of engine instances.
///
/// Executors own one; tests hand in their own to observe teardown counts.
#[derive(Debug, Clone, Default)]
pub struct TeardownLedger {
    entries: Arc<Mutex<BTreeMap<String, InstanceEntry>>>,
}

impl TeardownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, InstanceEntry>> {
        // A poisoned ledger still holds valid counts
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record instance creation. Call immediately after the engine is built.
    pub fn record_created(&self, instance_id: &str) {
        let entry = InstanceEntry {
            instance_id: instance_id.to_string(),
            created_at: SystemTime::now(),
            closed_at: None,
            close_calls: 0,
        };
        debug!("Recording engine instance: {}", instance_id);
        self.lock().insert(instance_id.to_string(), entry);
        metrics::get_metrics().record_instance_created();
    }

    /// Record a close. Fails loudly on an unknown or already-closed instance.
    pub fn record_closed(&self, instance_id: &str) -> Result<()> {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(instance_id) else {
            error!("Close of unrecorded engine instance {}", instance_id);
            return Err(SandboxError::InstanceClosed {
                instance_id: instance_id.to_string(),
            });
        };

        entry.close_calls += 1;
        if entry.is_closed() {
            drop(entries);
            error!("Engine instance {} closed more than once", instance_id);
            metrics::get_metrics().teardown_violations.inc();
            audit::teardown_violation(instance_id, "closed more than once".to_string());
            return Err(SandboxError::AlreadyClosed {
                instance_id: instance_id.to_string(),
            });
        }

        entry.closed_at = Some(SystemTime::now());
        drop(entries);
        debug!("Engine instance {} closed", instance_id);
        metrics::get_metrics().record_instance_closed();
        Ok(())
    }

    pub fn created_count(&self) -> usize {
        self.lock().len()
    }

    pub fn closed_count(&self) -> usize {
        self.lock().values().filter(|e| e.is_closed()).count()
    }

    /// Instances created but not yet closed
    pub fn outstanding(&self) -> Vec<String> {
        self.lock()
            .values()
            .filter(|e| !e.is_closed())
            .map(|e| e.instance_id.clone())
            .collect()
    }

    pub fn entry(&self, instance_id: &str) -> Option<InstanceEntry> {
        self.lock().get(instance_id).cloned()
    }

    /// True when every recorded instance was closed exactly once
    pub fn is_balanced(&self) -> bool {
        let entries = self.lock();
        let balanced = entries
            .values()
            .all(|e| e.is_closed() && e.close_calls == 1);
        if !balanced {
            warn!(
                "Teardown ledger unbalanced: {} instances, {} open",
                entries.len(),
                entries.values().filter(|e| !e.is_closed()).count()
            );
        }
        balanced
    }
}
