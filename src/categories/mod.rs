//! Category-name-to-id registry.
//!
//! Feature vectors carry the category as a bounded integer. Ids are
//! assigned on first sight, in insertion order, and persisted to a JSON
//! file so they stay stable across process restarts and can be shared
//! by scaled-out workers via a common volume. An empty category name
//! always maps to [`EMPTY_CATEGORY_ID`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::warn;

/// Id for records with no category name.
pub const EMPTY_CATEGORY_ID: i32 = -1;
/// Highest assignable category id.
pub const MAX_CATEGORY_ID: i32 = 999;

/// Persisted category-name-to-id registry.
pub struct CategoryRegistry {
    path: Option<PathBuf>,
    inner: RwLock<HashMap<String, i32>>,
}

impl CategoryRegistry {
    /// Registry without persistence (tests, ephemeral workers).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Registry backed by a JSON file. An unreadable or corrupt file is
    /// logged and treated as empty; persistence errors never fail a
    /// lookup.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt category registry, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path: Some(path),
            inner: RwLock::new(map),
        }
    }

    /// Resolve a category name to its id, assigning and persisting a
    /// new id for names seen for the first time.
    ///
    /// Before a new id is handed out, the shared file is re-read and
    /// merged, so workers sharing one file pick up each other's
    /// assignments instead of reusing an id another worker already
    /// gave to a different name.
    pub fn resolve(&self, name: &str) -> i32 {
        if name.is_empty() {
            return EMPTY_CATEGORY_ID;
        }

        {
            let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let Some(&id) = map.get(name) {
                return id;
            }
        }

        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        // Re-check under the write lock; another thread may have won.
        if let Some(&id) = map.get(name) {
            return id;
        }

        // A miss may just mean another worker assigned the name since
        // our last read of the shared file.
        self.merge_from_disk(&mut map);
        if let Some(&id) = map.get(name) {
            return id;
        }

        let id = next_id(&map);
        map.insert(name.to_string(), id);
        self.persist(&map);
        id
    }

    /// Number of registered categories.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold assignments persisted by other workers into `map`. Names
    /// this instance already knows keep their id.
    fn merge_from_disk(&self, map: &mut HashMap<String, i32>) {
        let Some(path) = &self.path else {
            return;
        };

        let Ok(bytes) = std::fs::read(path) else {
            return;
        };

        match serde_json::from_slice::<HashMap<String, i32>>(&bytes) {
            Ok(persisted) => {
                for (name, id) in persisted {
                    map.entry(name).or_insert(id);
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt category registry, keeping in-memory ids");
            }
        }
    }

    fn persist(&self, map: &HashMap<String, i32>) {
        let Some(path) = &self.path else {
            return;
        };

        let result = serde_json::to_vec_pretty(map)
            .map_err(std::io::Error::other)
            .and_then(|bytes| std::fs::write(path, bytes));

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to persist category registry");
        }
    }
}

/// Next free id: one past the highest assigned, capped at the bound.
fn next_id(map: &HashMap<String, i32>) -> i32 {
    map.values()
        .copied()
        .max()
        .map_or(0, |highest| highest + 1)
        .min(MAX_CATEGORY_ID)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_registry_path() -> PathBuf {
        std::env::temp_dir().join(format!("categories-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn empty_name_maps_to_sentinel() {
        let registry = CategoryRegistry::in_memory();
        assert_eq!(registry.resolve(""), EMPTY_CATEGORY_ID);
        assert!(registry.is_empty());
    }

    #[test]
    fn identical_names_map_to_identical_ids() {
        let registry = CategoryRegistry::in_memory();
        let first = registry.resolve("Office Supplies");
        let second = registry.resolve("Travel");

        assert_ne!(first, second);
        assert_eq!(registry.resolve("Office Supplies"), first);
        assert_eq!(registry.resolve("Travel"), second);
    }

    #[test]
    fn ids_are_assigned_in_insertion_order() {
        let registry = CategoryRegistry::in_memory();
        assert_eq!(registry.resolve("a"), 0);
        assert_eq!(registry.resolve("b"), 1);
        assert_eq!(registry.resolve("c"), 2);
    }

    #[test]
    fn ids_stay_within_bounds() {
        let registry = CategoryRegistry::in_memory();
        for i in 0..1500 {
            let id = registry.resolve(&format!("category-{}", i));
            assert!((0..=MAX_CATEGORY_ID).contains(&id));
        }
        // Names past the cap still resolve deterministically.
        assert_eq!(registry.resolve("category-1400"), MAX_CATEGORY_ID);
        assert_eq!(registry.resolve("category-1400"), MAX_CATEGORY_ID);
    }

    #[test]
    fn ids_survive_reopen() {
        let path = temp_registry_path();

        let registry = CategoryRegistry::open(&path);
        let rent = registry.resolve("Rent");
        let payroll = registry.resolve("Payroll");

        let reopened = CategoryRegistry::open(&path);
        assert_eq!(reopened.resolve("Rent"), rent);
        assert_eq!(reopened.resolve("Payroll"), payroll);
        assert_eq!(reopened.len(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn workers_sharing_a_file_do_not_collide() {
        let path = temp_registry_path();

        // Two independent workers on one shared registry file, each
        // seeing a different name first.
        let worker_a = CategoryRegistry::open(&path);
        let worker_b = CategoryRegistry::open(&path);

        let travel = worker_a.resolve("Travel");
        let rent = worker_b.resolve("Rent");
        assert_ne!(travel, rent, "id collision across workers");

        // Neither assignment was lost in the shared file.
        let reopened = CategoryRegistry::open(&path);
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.resolve("Travel"), travel);
        assert_eq!(reopened.resolve("Rent"), rent);

        // On a miss, each worker adopts the other's assignment rather
        // than inventing a conflicting id.
        assert_eq!(worker_a.resolve("Rent"), rent);
        assert_eq!(worker_b.resolve("Travel"), travel);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let path = temp_registry_path();
        std::fs::write(&path, b"not json").unwrap();

        let registry = CategoryRegistry::open(&path);
        assert!(registry.is_empty());
        assert_eq!(registry.resolve("Utilities"), 0);

        let _ = std::fs::remove_file(&path);
    }
}
