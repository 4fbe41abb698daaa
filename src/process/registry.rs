use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::ProcessRecord;

pub type ProcessMap = BTreeMap<String, Arc<ProcessRecord>>;

/// The process map owned by one supervisor.
///
/// Inserts happen in `run`, removals in [`ProcessRecord::cleanup`]; readers
/// get snapshot copies so iteration never races a mutation.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: Mutex<ProcessMap>,
}

impl ProcessRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a record owned by this registry without inserting it.
    pub fn new_record(self: &Arc<Self>, name: &str) -> Arc<ProcessRecord> {
        Arc::new(ProcessRecord::new(name, Arc::downgrade(self)))
    }

    /// Create and insert a record, replacing any previous one with that name.
    pub fn register(self: &Arc<Self>, name: &str) -> Arc<ProcessRecord> {
        let record = self.new_record(name);
        self.processes.lock().insert(name.to_string(), record.clone());
        record
    }

    /// Exclusive access for check-then-insert sequences.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ProcessMap> {
        self.processes.lock()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProcessRecord>> {
        self.processes.lock().get(name).cloned()
    }

    pub fn snapshot(&self) -> ProcessMap {
        self.processes.lock().clone()
    }

    /// Remove `record` if it is still the one registered under its name.
    pub fn remove(&self, record: &Arc<ProcessRecord>) -> bool {
        let mut processes = self.processes.lock();
        match processes.get(record.name()) {
            Some(current) if Arc::ptr_eq(current, record) => {
                processes.remove(record.name());
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.lock().is_empty()
    }
}

/// Records currently holding a slot.
pub fn admitted_count(processes: &ProcessMap) -> usize {
    processes
        .values()
        .filter(|record| record.state().is_admitted())
        .count()
}
