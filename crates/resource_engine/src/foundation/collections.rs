//! Specialized collection types

pub use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Stable identity of a scene object instance
    ///
    /// Instances are owned by the scene backend; the pool manager only ever
    /// holds these handles. A handle whose object has been destroyed stays
    /// comparable but reports `false` from `SceneBackend::is_valid`.
    pub struct InstanceId;
}

/// Handle-based map using slot map for stable references
pub type HandleMap<T> = SlotMap<InstanceId, T>;

/// Group items by key, keeping the order in which each key was first seen
///
/// Small linear scan; callers group a handful of asset types at most.
pub fn group_ordered<K, V, I>(items: I) -> Vec<(K, Vec<V>)>
where
    K: PartialEq,
    I: IntoIterator<Item = (K, V)>,
{
    let mut groups: Vec<(K, Vec<V>)> = Vec::new();
    for (key, value) in items {
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, values)) => values.push(value),
            None => groups.push((key, vec![value])),
        }
    }
    groups
}
