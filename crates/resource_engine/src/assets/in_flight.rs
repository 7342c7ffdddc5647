//! In-flight operation table
//!
//! At most one pending operation exists per key. The first requester
//! registers the entry and is responsible for settling it; everyone else
//! joins and awaits the same outcome. Registration is synchronous, so a
//! check-then-register sequence with no `.await` in between cannot race on
//! the single cooperative thread.

use super::ResourceError;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use tokio::sync::watch;

type Outcome<V> = Option<Result<V, ResourceError>>;

/// Result of [`InFlightTable::join_or_register`]
pub enum Join<V> {
    /// Another requester already owns the operation
    Joined(Pending<V>),
    /// The caller registered the entry and must start the operation
    Registered(Pending<V>),
}

/// Handle on the eventual outcome of an in-flight operation
pub struct Pending<V> {
    receiver: watch::Receiver<Outcome<V>>,
    label: String,
}

impl<V: Clone> Pending<V> {
    /// Wait for the operation to settle
    ///
    /// Fails with [`ResourceError::LoadAbandoned`] if the entry is dropped
    /// without being settled.
    pub async fn wait(mut self) -> Result<V, ResourceError> {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => match &*outcome {
                Some(result) => result.clone(),
                None => Err(ResourceError::LoadAbandoned { key: self.label }),
            },
            Err(_) => Err(ResourceError::LoadAbandoned { key: self.label }),
        }
    }
}

/// Pending operations keyed by `K`
pub struct InFlightTable<K, V> {
    entries: HashMap<K, watch::Sender<Outcome<V>>>,
}

impl<K, V> InFlightTable<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Join the pending operation for `key`, or register a new one
    pub fn join_or_register(&mut self, key: &K) -> Join<V> {
        let label = key.to_string();
        if let Some(sender) = self.entries.get(key) {
            return Join::Joined(Pending {
                receiver: sender.subscribe(),
                label,
            });
        }

        let (sender, receiver) = watch::channel(None);
        self.entries.insert(key.clone(), sender);
        Join::Registered(Pending { receiver, label })
    }

    /// Remove the entry for `key` and deliver `result` to every waiter
    ///
    /// Returns `false` if no entry was registered.
    pub fn settle(&mut self, key: &K, result: Result<V, ResourceError>) -> bool {
        match self.entries.remove(key) {
            Some(sender) => {
                sender.send_replace(Some(result));
                true
            }
            None => false,
        }
    }

    /// Whether an operation for `key` is pending
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of pending operations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for InFlightTable<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::runtime::block_on_local;

    #[test]
    fn test_second_requester_joins() {
        let mut table: InFlightTable<String, u32> = InFlightTable::new();
        let key = "a".to_string();

        assert!(matches!(table.join_or_register(&key), Join::Registered(_)));
        assert!(matches!(table.join_or_register(&key), Join::Joined(_)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_settle_delivers_to_all_waiters() {
        let results = block_on_local(async {
            let mut table: InFlightTable<String, u32> = InFlightTable::new();
            let key = "a".to_string();

            let Join::Registered(first) = table.join_or_register(&key) else {
                panic!("expected registration");
            };
            let Join::Joined(second) = table.join_or_register(&key) else {
                panic!("expected join");
            };

            assert!(table.settle(&key, Ok(42)));
            assert!(!table.contains(&key));
            assert!(table.is_empty());

            (first.wait().await, second.wait().await)
        })
        .unwrap();

        assert_eq!(results, (Ok(42), Ok(42)));
    }

    #[test]
    fn test_failure_is_shared_and_entry_removed() {
        let (result, registered_again) = block_on_local(async {
            let mut table: InFlightTable<String, u32> = InFlightTable::new();
            let key = "a".to_string();
            let Join::Registered(pending) = table.join_or_register(&key) else {
                panic!("expected registration");
            };
            let error = ResourceError::LoadAbandoned { key: "a".into() };
            table.settle(&key, Err(error));

            let registered_again = matches!(table.join_or_register(&key), Join::Registered(_));
            (pending.wait().await, registered_again)
        })
        .unwrap();

        assert!(result.is_err());
        assert!(registered_again);
    }

    #[test]
    fn test_dropped_entry_is_abandoned() {
        let result = block_on_local(async {
            let mut table: InFlightTable<String, u32> = InFlightTable::new();
            let Join::Registered(pending) = table.join_or_register(&"a".to_string()) else {
                panic!("expected registration");
            };
            drop(table);
            pending.wait().await
        })
        .unwrap();

        assert_eq!(result, Err(ResourceError::LoadAbandoned { key: "a".into() }));
    }

    #[test]
    fn test_settle_unknown_key() {
        let mut table: InFlightTable<String, u32> = InFlightTable::new();
        assert!(!table.settle(&"missing".to_string(), Ok(1)));
    }
}
