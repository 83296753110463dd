use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use noviswitch_schemas::settings::{InventoryEntry, SwitchInventory};
use crate::error::DriverError;

/// Binds logical switch names to physical switches of the inventory. Each physical switch is
/// bound to at most one logical switch at a time.
pub struct SwitchPool {
    inventory: SwitchInventory,
    // logical name -> physical name
    allocations: Mutex<BTreeMap<String, String>>,
}

impl SwitchPool {
    pub fn new(inventory: SwitchInventory) -> Self {
        Self {
            inventory,
            allocations: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn inventory(&self) -> &SwitchInventory {
        &self.inventory
    }

    fn allocations(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        // the map is never left half updated, so a panic elsewhere does not invalidate it
        self.allocations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the physical switch for the logical switch, binding a free one if it has none yet.
    /// A logical switch named like a free physical switch gets that switch, otherwise the first
    /// free switch by name is used.
    pub fn bind(&self, logical: &str) -> anyhow::Result<String, DriverError> {
        let mut allocations = self.allocations();
        if let Some(physical) = allocations.get(logical) {
            return Ok(physical.clone());
        }
        let in_use: BTreeSet<String> = allocations.values().cloned().collect();
        let physical = if self.inventory.contains(logical) && !in_use.contains(logical) {
            Some(logical.to_string())
        } else {
            self.inventory.names().find(|name| !in_use.contains(*name)).cloned()
        };
        match physical {
            Some(physical) => {
                tracing::info!("binding logical switch {logical} to physical switch {physical}");
                allocations.insert(logical.to_string(), physical.clone());
                Ok(physical)
            }
            None => Err(DriverError::PoolExhausted {
                logical: logical.to_string(),
                known: self.inventory.names().cloned().collect(),
                in_use: in_use.into_iter().collect(),
            }),
        }
    }

    /// Free the physical switch of a logical switch, returns the freed physical name
    pub fn release(&self, logical: &str) -> Option<String> {
        let released = self.allocations().remove(logical);
        if let Some(physical) = &released {
            tracing::debug!("released physical switch {physical} from {logical}");
        }
        released
    }

    /// True while at least one physical switch is free
    pub fn is_available(&self) -> bool {
        self.allocations().len() < self.inventory.len()
    }

    /// The physical switch bound to a logical switch, if any
    pub fn lookup(&self, logical: &str) -> Option<InventoryEntry> {
        let physical = self.allocations().get(logical).cloned()?;
        self.inventory.get(&physical).cloned()
    }

    /// Logical to physical bindings, ordered by logical name
    pub fn allocations_snapshot(&self) -> Vec<(String, String)> {
        self.allocations().iter()
            .map(|(l, p)| (l.clone(), p.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(names: &[&str]) -> SwitchPool {
        SwitchPool::new(SwitchInventory::new(
            names.iter().enumerate()
                .map(|(i, n)| InventoryEntry::new(n, &format!("10.0.0.{}", i + 1)))
                .collect()
        ))
    }

    #[test]
    fn test_bind_distinct_switches() -> anyhow::Result<(), DriverError> {
        let pool = pool(&["sw2", "sw1"]);
        assert_eq!(pool.bind("s1")?, "sw1");
        assert_eq!(pool.bind("s2")?, "sw2");
        // binding again keeps the same switch
        assert_eq!(pool.bind("s1")?, "sw1");
        assert!(!pool.is_available());
        Ok(())
    }

    #[test]
    fn test_pool_exhausted() -> anyhow::Result<(), DriverError> {
        let pool = pool(&["sw1", "sw2"]);
        pool.bind("s1")?;
        pool.bind("s2")?;
        let op_res = pool.bind("s3");
        assert_eq!(op_res, Err(DriverError::PoolExhausted {
            logical: "s3".into(),
            known: vec!["sw1".into(), "sw2".into()],
            in_use: vec!["sw1".into(), "sw2".into()],
        }));
        Ok(())
    }

    #[test]
    fn test_release_makes_switch_eligible() -> anyhow::Result<(), DriverError> {
        let pool = pool(&["sw1", "sw2"]);
        pool.bind("s1")?;
        pool.bind("s2")?;
        assert_eq!(pool.release("s1"), Some("sw1".to_string()));
        assert_eq!(pool.release("s1"), None);
        assert!(pool.is_available());
        assert_eq!(pool.bind("s3")?, "sw1");
        assert_eq!(pool.lookup("s1"), None);
        assert_eq!(pool.lookup("s3").map(|e| e.ip), Some("10.0.0.1".to_string()));
        Ok(())
    }

    #[test]
    fn test_logical_name_matching_physical_switch() -> anyhow::Result<(), DriverError> {
        let pool = pool(&["sw1", "sw2", "sw3"]);
        assert_eq!(pool.bind("sw2")?, "sw2");
        assert_eq!(pool.bind("s1")?, "sw1");
        // sw3 is named after a physical switch that is still free
        assert_eq!(pool.bind("sw3")?, "sw3");
        assert_eq!(pool.allocations_snapshot(), vec![
            ("s1".to_string(), "sw1".to_string()),
            ("sw2".to_string(), "sw2".to_string()),
            ("sw3".to_string(), "sw3".to_string()),
        ]);
        Ok(())
    }

    #[test]
    fn test_physical_name_taken_falls_back() -> anyhow::Result<(), DriverError> {
        let pool = pool(&["sw1", "sw2"]);
        assert_eq!(pool.bind("s1")?, "sw1");
        assert_eq!(pool.bind("sw1")?, "sw2");
        Ok(())
    }

    #[test]
    fn test_concurrent_binds_never_share() {
        let pool = std::sync::Arc::new(pool(&["sw1", "sw2", "sw3", "sw4"]));
        let handles: Vec<_> = (0..8).map(|i| {
            let pool = pool.clone();
            std::thread::spawn(move || pool.bind(&format!("s{i}")).ok())
        }).collect();
        let bound: Vec<String> = handles.into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(bound.len(), 4);
        let unique: BTreeSet<&String> = bound.iter().collect();
        assert_eq!(unique.len(), 4);
    }
}
