use dashmap::DashMap;

/// Key under which the cumulative session count is published.
pub const TOTAL_CHANNELS: &str = "total_channels";

/// Thread-safe mapping from key to last published value.
///
/// Pollers write here and scrape-time collectors read, so neither side
/// needs to know about the other's scheduling.
#[derive(Debug, Default)]
pub struct StateStore {
    values: DashMap<String, f64>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` under `key`, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    /// Return the last value published under `key`.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).map(|v| *v)
    }

    /// Return the value under `key`, or `fallback` if nothing was published yet.
    pub fn get_or(&self, key: &str, fallback: f64) -> f64 {
        self.get(key).unwrap_or(fallback)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_get_missing_uses_fallback() {
        let store = StateStore::new();
        assert_eq!(store.get(TOTAL_CHANNELS), None);
        assert_eq!(store.get_or(TOTAL_CHANNELS, -1.0), -1.0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_replaces_value() {
        let store = StateStore::new();
        store.set(TOTAL_CHANNELS, 10.0);
        store.set(TOTAL_CHANNELS, 12.0);
        assert_eq!(store.get(TOTAL_CHANNELS), Some(12.0));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(StateStore::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        store.set(format!("k{t}"), f64::from(i));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().expect("writer thread panicked");
        }

        assert_eq!(store.len(), 8);
        for t in 0..8 {
            assert_eq!(store.get(&format!("k{t}")), Some(999.0));
        }
    }
}
