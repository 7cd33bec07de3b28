//! Value resolver: maps (kind, meta) to configured seconds/points.
//!
//! The resolver keeps the whole table in memory, persists patches through
//! the store, and publishes refreshed snapshots (with the exact changed
//! keys) so downstream caches can invalidate precisely.

use crate::catalog::EventKind;
use crate::entities::value_config::{DEFAULT_META, seed_entries};
use crate::entities::{ValueEntry, ValuePatch};
use crate::store::{Store, StoreError};
use compact_str::CompactString;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

type ValueKey = (EventKind, CompactString);

/// Immutable snapshot of the full configuration, published on every patch.
#[derive(Debug, Clone, Default)]
pub struct ValueTable {
    pub entries: Vec<ValueEntry>,
    /// Keys changed by the patch that produced this snapshot.
    pub changed: Vec<ValueKey>,
}

/// Receiver side of the published configuration snapshots.
pub type ValueTableReceiver = watch::Receiver<Arc<ValueTable>>;

pub struct ValueResolver {
    store: Arc<dyn Store>,
    table: RwLock<HashMap<ValueKey, ValueEntry>>,
    publish_tx: watch::Sender<Arc<ValueTable>>,
}

impl ValueResolver {
    /// Load the table from the store, seeding defaults on first run.
    pub async fn load(store: Arc<dyn Store>) -> Result<Self, StoreError> {
        let mut entries = store.load_value_entries().await?;
        if entries.is_empty() {
            entries = seed_entries();
            store.upsert_value_entries(&entries).await?;
            info!(count = entries.len(), "Seeded default value configuration");
        }

        let table: HashMap<ValueKey, ValueEntry> = entries
            .iter()
            .map(|e| ((e.kind, e.meta.clone()), e.clone()))
            .collect();
        let (publish_tx, _) = watch::channel(Arc::new(ValueTable {
            entries,
            changed: Vec::new(),
        }));

        Ok(Self {
            store,
            table: RwLock::new(table),
            publish_tx,
        })
    }

    /// Configured (seconds, points) for the pair, falling back to the
    /// kind's DEFAULT row, then to (0, 0).
    pub fn resolve(&self, kind: EventKind, meta: &str) -> (i64, i64) {
        let Ok(table) = self.table.read() else {
            return (0, 0);
        };
        if let Some(entry) = table.get(&(kind, CompactString::from(meta))) {
            return (entry.seconds, entry.points);
        }
        if let Some(entry) = table.get(&(kind, CompactString::from(DEFAULT_META))) {
            return (entry.seconds, entry.points);
        }
        (0, 0)
    }

    /// Subscribe to configuration snapshots.
    pub fn subscribe(&self) -> ValueTableReceiver {
        self.publish_tx.subscribe()
    }

    /// Apply a batch of proposed updates; invalid entries are skipped, not
    /// errors. Returns how many entries actually changed.
    pub async fn patch(&self, patches: Vec<ValuePatch>) -> Result<usize, StoreError> {
        let mut accepted: Vec<ValueEntry> = Vec::new();
        let mut changed_keys: Vec<ValueKey> = Vec::new();

        {
            let Ok(table) = self.table.read() else {
                return Ok(0);
            };
            for patch in &patches {
                match Self::screen(&table, patch) {
                    Some(entry) => {
                        changed_keys.push((entry.kind, entry.meta.clone()));
                        accepted.push(entry);
                    }
                    None => {
                        debug!(kind = %patch.kind, meta = %patch.meta, "Ignored value patch");
                    }
                }
            }
        }

        if accepted.is_empty() {
            return Ok(0);
        }

        self.store.upsert_value_entries(&accepted).await?;

        let snapshot = {
            let Ok(mut table) = self.table.write() else {
                return Ok(0);
            };
            for entry in &accepted {
                table.insert((entry.kind, entry.meta.clone()), entry.clone());
            }
            Arc::new(ValueTable {
                entries: table.values().cloned().collect(),
                changed: changed_keys,
            })
        };

        let count = accepted.len();
        info!(count, "Value configuration patched");
        if self.publish_tx.send(snapshot).is_err() {
            warn!("No subscribers for value configuration snapshot");
        }
        Ok(count)
    }

    /// Per-entry patch validation: the row must exist, the claimed source
    /// must match the kind's derived source, at least one field must be
    /// present, and only non-negative values that differ from the current
    /// ones are written.
    fn screen(table: &HashMap<ValueKey, ValueEntry>, patch: &ValuePatch) -> Option<ValueEntry> {
        let current = table.get(&(patch.kind, patch.meta.clone()))?;
        if patch.platform != patch.kind.facts().platform {
            return None;
        }
        if patch.seconds.is_none() && patch.points.is_none() {
            return None;
        }

        let mut next = current.clone();
        let mut touched = false;
        if let Some(seconds) = patch.seconds {
            if seconds >= 0 && seconds != current.seconds {
                next.seconds = seconds;
                touched = true;
            }
        }
        if let Some(points) = patch.points {
            if points >= 0 && points != current.points {
                next.points = points;
                touched = true;
            }
        }
        touched.then_some(next)
    }
}
