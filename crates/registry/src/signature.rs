//! Deterministic digests of entity collections for change detection.

use std::collections::HashMap;

use blake3::Hasher;
use flockview_core_types::{MergePoint, ScopedEntity};
use tracing::error;

const DIGEST_LEN: usize = 16;

/// Per-merge-point record of the last committed signature.
#[derive(Debug, Default)]
pub struct SignatureCache {
    current: HashMap<MergePoint, String>,
    strict: bool,
}

/// Signature of a collection together with the entries that could not take part.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    pub value: String,
    pub skipped: Vec<usize>,
}

impl SignatureCache {
    /// `strict` turns invariant violations into debug assertions.
    pub fn new(strict: bool) -> Self {
        Self {
            current: HashMap::new(),
            strict,
        }
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Computes the signature of `items` in canonical order.
    ///
    /// Entries with an empty id are skipped and reported; the rest still sign.
    pub fn signature_of<T: ScopedEntity>(&self, items: &[T]) -> Signature {
        signature_of(items, self.strict)
    }

    /// Returns true and records `signature` when it differs from the current one.
    pub fn has_changed(&mut self, merge_point: MergePoint, signature: &str) -> bool {
        match self.current.get(&merge_point) {
            Some(current) if current == signature => false,
            _ => {
                self.current.insert(merge_point, signature.to_string());
                true
            }
        }
    }

    pub fn current(&self, merge_point: MergePoint) -> Option<&str> {
        self.current.get(&merge_point).map(String::as_str)
    }

    pub fn invalidate(&mut self, merge_point: MergePoint) {
        self.current.remove(&merge_point);
    }

    pub fn clear(&mut self) {
        self.current.clear();
    }
}

pub fn signature_of<T: ScopedEntity>(items: &[T], strict: bool) -> Signature {
    let mut ordered: Vec<(usize, &T)> = items.iter().enumerate().collect();
    ordered.sort_by(|(_, a), (_, b)| a.canonical_cmp(b));

    let mut entries = Vec::with_capacity(ordered.len());
    let mut skipped = Vec::new();
    for (idx, item) in ordered {
        let id = item.entity_id();
        if id.is_empty() {
            error!(target: "registry", index = idx, "signature entry with empty id skipped");
            if strict {
                debug_assert!(false, "signature computed on an empty key at index {idx}");
            }
            skipped.push(idx);
            continue;
        }
        entries.push(format!("{}:{}:{}", id, item.ordering_key(), digest(item)));
    }
    skipped.sort_unstable();

    Signature {
        value: entries.join("|"),
        skipped,
    }
}

fn digest<T: ScopedEntity>(item: &T) -> String {
    match serde_json::to_vec(item) {
        Ok(bytes) => {
            let mut hasher = Hasher::new();
            hasher.update(&bytes);
            let hex = hasher.finalize().to_hex();
            hex.as_str()[..DIGEST_LEN].to_string()
        }
        Err(err) => {
            error!(target: "registry", ?err, "entity not serialisable for signature");
            String::from("-")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flockview_core_types::{FarmId, Group, GroupId};

    fn group(id: &str, year: i32, name: &str) -> Group {
        Group {
            id: GroupId::from(id),
            farm_id: FarmId::from("farm"),
            name: name.into(),
            breed: Some("Texel".into()),
            start_date: Utc.with_ymd_and_hms(year, 4, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn input_order_does_not_matter() {
        let a = group("a", 2023, "Hoggets");
        let b = group("b", 2024, "Ewes");
        let first = signature_of(&[a.clone(), b.clone()], false);
        let second = signature_of(&[b, a], false);
        assert_eq!(first, second);
        assert!(first.value.starts_with("b:2024-04-01"));
    }

    #[test]
    fn field_edit_without_id_change_is_detected() {
        let before = signature_of(&[group("a", 2024, "Ewes")], false);
        let after = signature_of(&[group("a", 2024, "Ewes (north)")], false);
        assert_ne!(before.value, after.value);
    }

    #[test]
    fn reorder_is_detected() {
        let before = signature_of(&[group("a", 2024, "x"), group("b", 2023, "y")], false);
        let after = signature_of(&[group("a", 2022, "x"), group("b", 2023, "y")], false);
        assert_ne!(before.value, after.value);
    }

    #[test]
    fn empty_ids_are_skipped_not_fatal() {
        let signature = signature_of(&[group("", 2024, "ghost"), group("a", 2024, "x")], false);
        assert_eq!(signature.skipped, vec![0]);
        assert!(signature.value.starts_with("a:"));
        assert!(!signature.value.contains('|'));
    }

    #[test]
    fn has_changed_records_only_new_values() {
        let mut cache = SignatureCache::new(false);
        assert!(cache.has_changed(MergePoint::Groups, "a:1"));
        assert!(!cache.has_changed(MergePoint::Groups, "a:1"));
        assert!(cache.has_changed(MergePoint::Events, "a:1"));
        assert!(cache.has_changed(MergePoint::Groups, "a:2"));
        assert_eq!(cache.current(MergePoint::Groups), Some("a:2"));

        cache.invalidate(MergePoint::Groups);
        assert!(cache.has_changed(MergePoint::Groups, "a:2"));

        // an empty collection signs as the empty string and is still tracked
        assert!(cache.has_changed(MergePoint::Farms, ""));
        assert!(!cache.has_changed(MergePoint::Farms, ""));
    }
}
