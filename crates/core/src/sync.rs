//! Helpers for keyed batch polling.

use std::collections::HashMap;
use std::hash::Hash;

use crate::types::Timestamp;

/// Keep only the most recently created row per key.
///
/// Rows may arrive in any order; on equal timestamps the first row seen wins,
/// so a `created_at DESC` fetch keeps its leading row.
pub fn latest_per_key<T, K, KF, TF>(rows: Vec<T>, key: KF, created_at: TF) -> HashMap<K, T>
where
    K: Eq + Hash,
    KF: Fn(&T) -> K,
    TF: Fn(&T) -> Timestamp,
{
    let mut latest: HashMap<K, T> = HashMap::new();
    for row in rows {
        let k = key(&row);
        match latest.get(&k) {
            Some(existing) if created_at(existing) >= created_at(&row) => {}
            _ => {
                latest.insert(k, row);
            }
        }
    }
    latest
}

/// True when every watched key has a result that `is_settled` accepts.
///
/// A single missing or unsettled key keeps the whole batch unsettled.
pub fn all_settled<K, T, F>(keys: &[K], results: &HashMap<K, T>, is_settled: F) -> bool
where
    K: Eq + Hash,
    F: Fn(&T) -> bool,
{
    keys.iter()
        .all(|k| results.get(k).is_some_and(|row| is_settled(row)))
}
