//! Last-writer-wins element set.
//!
//! Two stamp maps, adds and removes, keyed by element bytes. An
//! element is present when its add stamp is at or above its remove
//! stamp; ties go to the add. Stamps are packed HLC timestamps, so
//! concurrent updates across replicas resolve the same way everywhere
//! and merge is commutative and idempotent.

use std::collections::BTreeMap;

use crate::hlc::{Hlc, HlcTimestamp};

pub struct LwwRegister {
    replica_id: u64,
    clock: Hlc,
    add_set: BTreeMap<Vec<u8>, u64>,
    remove_set: BTreeMap<Vec<u8>, u64>,
}

impl LwwRegister {
    pub fn new(replica_id: u64) -> Self {
        Self {
            replica_id,
            clock: Hlc::new(replica_id),
            add_set: BTreeMap::new(),
            remove_set: BTreeMap::new(),
        }
    }

    pub fn replica_id(&self) -> u64 {
        self.replica_id
    }

    pub fn add(&mut self, element: &[u8]) {
        let stamp = self.clock.tick().to_packed();
        self.add_set.insert(element.to_vec(), stamp);
    }

    pub fn remove(&mut self, element: &[u8]) {
        let stamp = self.clock.tick().to_packed();
        self.remove_set.insert(element.to_vec(), stamp);
    }

    pub fn contains(&self, element: &[u8]) -> bool {
        match self.add_set.get(element) {
            Some(added) => match self.remove_set.get(element) {
                Some(removed) => added >= removed,
                None => true,
            },
            None => false,
        }
    }

    /// Present elements in sorted order.
    pub fn iter_present(&self) -> impl Iterator<Item = &[u8]> {
        self.add_set
            .iter()
            .filter(|(element, added)| match self.remove_set.get(*element) {
                Some(removed) => *added >= removed,
                None => true,
            })
            .map(|(element, _)| element.as_slice())
    }

    /// Stamp of the add that made `element` present, if it is.
    pub fn add_stamp(&self, element: &[u8]) -> Option<HlcTimestamp> {
        if self.contains(element) {
            self.add_set
                .get(element)
                .map(|&packed| HlcTimestamp::from_packed(packed))
        } else {
            None
        }
    }

    pub fn add_set(&self) -> &BTreeMap<Vec<u8>, u64> {
        &self.add_set
    }

    pub fn remove_set(&self) -> &BTreeMap<Vec<u8>, u64> {
        &self.remove_set
    }

    /// Fold another replica's stamp maps into this register. Every
    /// incoming stamp is observed by the local clock first, so local
    /// events after the merge sort above everything merged in.
    pub fn merge(
        &mut self,
        add_set: &BTreeMap<Vec<u8>, u64>,
        remove_set: &BTreeMap<Vec<u8>, u64>,
    ) {
        Self::merge_one(&self.clock, &mut self.add_set, add_set);
        Self::merge_one(&self.clock, &mut self.remove_set, remove_set);
    }

    fn merge_one(
        clock: &Hlc,
        local: &mut BTreeMap<Vec<u8>, u64>,
        incoming: &BTreeMap<Vec<u8>, u64>,
    ) {
        for (element, &stamp) in incoming {
            clock.observe(HlcTimestamp::from_packed(stamp));
            local
                .entry(element.clone())
                .and_modify(|existing| *existing = (*existing).max(stamp))
                .or_insert(stamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn present(register: &LwwRegister) -> Vec<Vec<u8>> {
        register.iter_present().map(|e| e.to_vec()).collect()
    }

    #[test]
    fn test_add_remove_add() {
        let mut reg = LwwRegister::new(1);
        reg.add(b"n1=a:1");
        assert!(reg.contains(b"n1=a:1"));
        reg.remove(b"n1=a:1");
        assert!(!reg.contains(b"n1=a:1"));
        reg.add(b"n1=a:1");
        assert!(reg.contains(b"n1=a:1"));
    }

    #[test]
    fn test_merge_is_commutative() {
        let mut a = LwwRegister::new(1);
        let mut b = LwwRegister::new(2);
        a.add(b"x");
        a.remove(b"y");
        b.add(b"y");
        b.add(b"z");

        let mut ab = LwwRegister::new(3);
        ab.merge(a.add_set(), a.remove_set());
        ab.merge(b.add_set(), b.remove_set());

        let mut ba = LwwRegister::new(4);
        ba.merge(b.add_set(), b.remove_set());
        ba.merge(a.add_set(), a.remove_set());

        assert_eq!(present(&ab), present(&ba));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut a = LwwRegister::new(1);
        a.add(b"x");
        a.remove(b"x");
        a.add(b"y");

        let mut b = LwwRegister::new(2);
        b.merge(a.add_set(), a.remove_set());
        let once = present(&b);
        b.merge(a.add_set(), a.remove_set());
        assert_eq!(present(&b), once);
    }

    #[test]
    fn test_later_remove_wins_across_replicas() {
        let mut a = LwwRegister::new(1);
        a.add(b"x");

        let mut b = LwwRegister::new(2);
        b.merge(a.add_set(), a.remove_set());
        assert!(b.contains(b"x"));
        // b's clock observed a's add stamp, so this remove is later.
        b.remove(b"x");

        a.merge(b.add_set(), b.remove_set());
        assert!(!a.contains(b"x"));
    }

    #[test]
    fn test_readd_after_merged_remove() {
        let mut a = LwwRegister::new(1);
        let mut b = LwwRegister::new(2);
        a.add(b"x");
        b.merge(a.add_set(), a.remove_set());
        b.remove(b"x");
        a.merge(b.add_set(), b.remove_set());
        assert!(!a.contains(b"x"));

        a.add(b"x");
        b.merge(a.add_set(), a.remove_set());
        assert!(a.contains(b"x"));
        assert!(b.contains(b"x"));
    }

    #[test]
    fn test_add_stamp_only_for_present() {
        let mut reg = LwwRegister::new(1);
        reg.add(b"x");
        assert!(reg.add_stamp(b"x").is_some());
        reg.remove(b"x");
        assert!(reg.add_stamp(b"x").is_none());
        assert!(reg.add_stamp(b"never").is_none());
    }
}
