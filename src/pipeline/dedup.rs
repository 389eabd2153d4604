//! Processed-id tracking so a message feeds topic generation at most once.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// In-memory view of the processed-id set, loaded from the store at the
/// start of a run and written back at the end.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    ids: HashMap<String, DateTime<Utc>>,
}

impl Deduplicator {
    pub fn new(ids: HashMap<String, DateTime<Utc>>) -> Self {
        Self { ids }
    }

    /// Admit a message id. Returns true the first time an id is seen;
    /// subsequent calls with the same id return false and leave the original
    /// admission timestamp untouched.
    pub fn admit(&mut self, id: &str) -> bool {
        if self.ids.contains_key(id) {
            return false;
        }
        self.ids.insert(id.to_string(), Utc::now());
        true
    }

    /// Drop ids admitted strictly before `cutoff`. Returns how many were
    /// removed. An id exactly at the cutoff is retained.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.ids.len();
        self.ids.retain(|_, admitted_at| *admitted_at >= cutoff);
        before - self.ids.len()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Snapshot for persistence.
    pub fn entries(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.ids.iter().map(|(id, at)| (id.as_str(), *at))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn admits_each_id_once() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.admit("msg-1"));
        assert!(!dedup.admit("msg-1"));
        assert!(dedup.admit("msg-2"));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn readmission_keeps_original_timestamp() {
        let mut dedup = Deduplicator::default();
        dedup.admit("msg-1");
        let first = dedup.entries().next().map(|(_, at)| at);
        dedup.admit("msg-1");
        assert_eq!(dedup.entries().next().map(|(_, at)| at), first);
    }

    #[test]
    fn prune_is_exclusive_of_cutoff() {
        let now = Utc::now();
        let mut ids = HashMap::new();
        ids.insert("old".to_string(), now - Duration::days(91));
        ids.insert("boundary".to_string(), now - Duration::days(90));
        ids.insert("fresh".to_string(), now);

        let mut dedup = Deduplicator::new(ids);
        let removed = dedup.prune(now - Duration::days(90));

        assert_eq!(removed, 1);
        assert!(!dedup.contains("old"));
        assert!(dedup.contains("boundary"));
        assert!(dedup.contains("fresh"));
    }

    #[test]
    fn pruned_id_can_be_admitted_again() {
        let now = Utc::now();
        let mut ids = HashMap::new();
        ids.insert("old".to_string(), now - Duration::days(100));

        let mut dedup = Deduplicator::new(ids);
        dedup.prune(now - Duration::days(90));
        assert!(dedup.admit("old"));
    }
}
