//! Keyed storage injected into the engine and the spellcasting resolver.
//!
//! Each engine instance owns its own repository so separate encounters
//! and tests never share state.

use std::collections::HashMap;
use std::hash::Hash;

/// Minimal keyed store.
pub trait Repository<K, V> {
    fn get(&self, key: &K) -> Option<&V>;

    fn get_mut(&mut self, key: &K) -> Option<&mut V>;

    /// Insert or replace. Returns the previous value.
    fn put(&mut self, key: K, value: V) -> Option<V>;

    fn remove(&mut self, key: &K) -> Option<V>;

    fn keys(&self) -> Vec<K>;

    fn len(&self) -> usize;

    fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HashMap-backed repository.
#[derive(Debug, Clone)]
pub struct InMemoryRepository<K, V> {
    items: HashMap<K, V>,
}

impl<K, V> InMemoryRepository<K, V> {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.items.values()
    }
}

impl<K, V> Default for InMemoryRepository<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V> FromIterator<(K, V)> for InMemoryRepository<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<K: Eq + Hash + Clone, V> Repository<K, V> for InMemoryRepository<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        self.items.get(key)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.items.get_mut(key)
    }

    fn put(&mut self, key: K, value: V) -> Option<V> {
        self.items.insert(key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.items.remove(key)
    }

    fn keys(&self) -> Vec<K> {
        self.items.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let mut repo: InMemoryRepository<u32, &str> = InMemoryRepository::new();
        assert!(repo.is_empty());
        assert_eq!(repo.put(1, "goblin"), None);
        assert_eq!(repo.put(1, "hobgoblin"), Some("goblin"));
        assert_eq!(repo.get(&1), Some(&"hobgoblin"));
        assert!(repo.contains(&1));

        if let Some(name) = repo.get_mut(&1) {
            *name = "bugbear";
        }
        assert_eq!(repo.remove(&1), Some("bugbear"));
        assert!(!repo.contains(&1));
    }

    #[test]
    fn test_separate_instances_do_not_share_state() {
        let mut a: InMemoryRepository<u32, u32> = InMemoryRepository::new();
        let b: InMemoryRepository<u32, u32> = InMemoryRepository::new();
        a.put(7, 7);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 0);
    }
}
