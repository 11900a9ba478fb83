use std::collections::HashMap;
use std::hash::Hash;

/// Generation-stamped cache for GPU objects that are expensive to build but
/// rarely change, keyed by whatever identifies their inputs (pass id plus
/// texture identity for bind groups).
///
/// `invalidate` bumps the generation and clears every entry; callers that
/// captured a key under an older generation can never observe a stale value.
pub(crate) struct ResourceCache<K, V> {
    entries: HashMap<K, V>,
    generation: u64,
}

impl<K: Eq + Hash, V> ResourceCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            generation: 0,
        }
    }

    pub fn get_or_insert_with(&mut self, key: K, build: impl FnOnce() -> V) -> &V {
        self.entries.entry(key).or_insert_with(build)
    }

    /// Drops every entry and moves to the next generation. Called on resize,
    /// when texture objects change identity.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.entries.clear();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
