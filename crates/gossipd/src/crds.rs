//! Conflict-free replicated data store
//!
//! Holds at most one value per [`CrdsValueLabel`]. A value replaces the
//! stored one only when its wallclock is strictly newer, so the table
//! converges regardless of delivery order. Every insert or update takes a
//! fresh ordinal; consumers stream changes through a [`Cursor`].

use crate::crds_shards::{CrdsShards, CRDS_SHARDS_BITS};
use crds_gossip_core::types::*;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Rejected upserts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CrdsError {
    /// Older than (or tied with) the stored value.
    #[error("Stale value")]
    Stale,
    /// Same content as the stored value; `count` is the push duplicates seen so far.
    #[error("Duplicate value (seen {count} times by push)")]
    Duplicate { count: u8 },
}

/// Accepted upserts.
#[derive(Debug, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated { old_hash: Hash },
}

/// How a value reached the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GossipRoute {
    LocalMessage,
    PullRequest,
    PullResponse,
    PushMessage,
}

/// A stored value with its bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedCrdsValue {
    /// Position in the change stream
    pub ordinal: u64,
    pub value: CrdsValue,
    /// Local time the value was inserted or its origin last refreshed
    pub local_timestamp: u64,
    /// Push duplicates received for this exact value
    pub num_push_dups: u8,
}

impl VersionedCrdsValue {
    fn new(value: CrdsValue, ordinal: u64, now: u64) -> Self {
        Self {
            ordinal,
            value,
            local_timestamp: now,
            num_push_dups: 0,
        }
    }

    /// Whether `value` should replace this entry; ties keep the entry.
    fn overridden_by(&self, value: &CrdsValue) -> bool {
        value.wallclock() > self.value.wallclock()
    }
}

/// Position in the table's change stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor(u64);

impl Cursor {
    pub fn ordinal(&self) -> u64 {
        self.0
    }

    fn consume(&mut self, ordinal: u64) {
        self.0 = self.0.max(ordinal + 1);
    }
}

/// Upsert outcome counters.
#[derive(Clone, Debug, Default)]
pub struct CrdsStats {
    pub inserted: u64,
    pub updated: u64,
    pub duplicate: u64,
    pub stale: u64,
    pub removed: u64,
}

pub struct Crds {
    table: Vec<Option<VersionedCrdsValue>>,
    free_slots: Vec<usize>,
    labels: HashMap<CrdsValueLabel, usize>,
    /// Next ordinal
    cursor: u64,
    shards: CrdsShards,
    /// ordinal -> slot, all entries
    entries: BTreeMap<u64, usize>,
    votes: BTreeMap<u64, usize>,
    epoch_slots: BTreeMap<u64, usize>,
    duplicate_shreds: BTreeMap<u64, usize>,
    /// Slots of contact infos
    nodes: HashSet<usize>,
    /// origin -> slots
    records: HashMap<Pubkey, HashSet<usize>>,
    /// Hashes of overwritten, removed or rejected values with their time
    purged: VecDeque<(Hash, u64)>,
    stats: CrdsStats,
}

impl Default for Crds {
    fn default() -> Self {
        Self {
            table: Vec::new(),
            free_slots: Vec::new(),
            labels: HashMap::new(),
            cursor: 0,
            shards: CrdsShards::new(CRDS_SHARDS_BITS),
            entries: BTreeMap::new(),
            votes: BTreeMap::new(),
            epoch_slots: BTreeMap::new(),
            duplicate_shreds: BTreeMap::new(),
            nodes: HashSet::new(),
            records: HashMap::new(),
            purged: VecDeque::new(),
            stats: CrdsStats::default(),
        }
    }
}

impl Crds {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== UPSERT / REMOVE =====

    /// Insert `value`, or replace the stored value with the same label.
    pub fn upsert(
        &mut self,
        value: CrdsValue,
        now: u64,
        route: GossipRoute,
    ) -> Result<Upsert, CrdsError> {
        let label = value.label();
        let slot = match self.labels.get(&label) {
            Some(slot) => *slot,
            None => {
                self.insert_new(label, value, now);
                self.stats.inserted += 1;
                return Ok(Upsert::Inserted);
            }
        };
        let Some(entry) = self.table[slot].as_mut() else {
            self.insert_new(label, value, now);
            self.stats.inserted += 1;
            return Ok(Upsert::Inserted);
        };

        if entry.value.hash() == value.hash() {
            if route == GossipRoute::PushMessage {
                entry.num_push_dups = entry.num_push_dups.saturating_add(1);
            }
            self.stats.duplicate += 1;
            return Err(CrdsError::Duplicate {
                count: entry.num_push_dups,
            });
        }
        if !entry.overridden_by(&value) {
            self.stats.stale += 1;
            return Err(CrdsError::Stale);
        }

        let old_hash = *entry.value.hash();
        let old_ordinal = entry.ordinal;
        let ordinal = self.cursor;
        self.cursor += 1;
        let new_hash = value.hash().as_u64();
        *entry = VersionedCrdsValue::new(value, ordinal, now);

        self.shards.remove(slot, old_hash.as_u64());
        self.shards.insert(slot, new_hash);
        self.entries.remove(&old_ordinal);
        self.entries.insert(ordinal, slot);
        if let Some(index) = self.kind_index(label.kind) {
            index.remove(&old_ordinal);
            index.insert(ordinal, slot);
        }
        self.purged.push_back((old_hash, now));
        self.stats.updated += 1;
        Ok(Upsert::Updated { old_hash })
    }

    fn insert_new(&mut self, label: CrdsValueLabel, value: CrdsValue, now: u64) {
        let ordinal = self.cursor;
        self.cursor += 1;
        let hash = value.hash().as_u64();
        let entry = VersionedCrdsValue::new(value, ordinal, now);
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.table[slot] = Some(entry);
                slot
            }
            None => {
                self.table.push(Some(entry));
                self.table.len() - 1
            }
        };
        self.labels.insert(label, slot);
        self.shards.insert(slot, hash);
        self.entries.insert(ordinal, slot);
        if let Some(index) = self.kind_index(label.kind) {
            index.insert(ordinal, slot);
        }
        if label.kind == CrdsKind::ContactInfo {
            self.nodes.insert(slot);
        }
        self.records.entry(label.origin).or_default().insert(slot);
    }

    fn kind_index(&mut self, kind: CrdsKind) -> Option<&mut BTreeMap<u64, usize>> {
        match kind {
            CrdsKind::Vote => Some(&mut self.votes),
            CrdsKind::EpochSlots => Some(&mut self.epoch_slots),
            CrdsKind::DuplicateShred => Some(&mut self.duplicate_shreds),
            _ => None,
        }
    }

    /// Remove the value under `label`; its hash joins the purged set.
    pub fn remove(&mut self, label: &CrdsValueLabel, now: u64) -> Option<VersionedCrdsValue> {
        let slot = self.labels.remove(label)?;
        let entry = self.table[slot].take()?;
        self.free_slots.push(slot);
        self.shards.remove(slot, entry.value.hash().as_u64());
        self.entries.remove(&entry.ordinal);
        if let Some(index) = self.kind_index(label.kind) {
            index.remove(&entry.ordinal);
        }
        self.nodes.remove(&slot);
        if let Some(slots) = self.records.get_mut(&label.origin) {
            slots.remove(&slot);
            if slots.is_empty() {
                self.records.remove(&label.origin);
            }
        }
        self.purged.push_back((*entry.value.hash(), now));
        self.stats.removed += 1;
        Some(entry)
    }

    // ===== LOOKUPS =====

    pub fn get(&self, label: &CrdsValueLabel) -> Option<&VersionedCrdsValue> {
        let slot = self.labels.get(label)?;
        self.table[*slot].as_ref()
    }

    /// Whether [`Crds::upsert`] would accept `value` right now.
    pub fn would_accept(&self, value: &CrdsValue) -> bool {
        match self.get(&value.label()) {
            Some(entry) => entry.value.hash() != value.hash() && entry.overridden_by(value),
            None => true,
        }
    }

    pub fn get_contact_info(&self, pubkey: &Pubkey) -> Option<&ContactInfo> {
        self.get(&CrdsValueLabel::contact_info(*pubkey))?
            .value
            .contact_info()
    }

    pub fn get_shred_version(&self, pubkey: &Pubkey) -> Option<u16> {
        self.get_contact_info(pubkey).map(|node| node.shred_version)
    }

    /// Entries of contact infos.
    pub fn contact_infos(&self) -> impl Iterator<Item = &VersionedCrdsValue> {
        self.nodes.iter().filter_map(|slot| self.table[*slot].as_ref())
    }

    pub fn get_records(&self, pubkey: &Pubkey) -> impl Iterator<Item = &VersionedCrdsValue> {
        self.records
            .get(pubkey)
            .into_iter()
            .flatten()
            .filter_map(|slot| self.table[*slot].as_ref())
    }

    pub fn values(&self) -> impl Iterator<Item = &VersionedCrdsValue> {
        self.table.iter().flatten()
    }

    /// Entries whose hash matches the top `mask_bits` bits of `mask`.
    pub fn filter_bitmask(
        &self,
        mask: u64,
        mask_bits: u32,
    ) -> impl Iterator<Item = &VersionedCrdsValue> {
        self.shards
            .find(mask, mask_bits)
            .filter_map(|slot| self.table[slot].as_ref())
    }

    /// Entries inserted or updated at or after `cursor`, in ordinal order.
    ///
    /// The cursor advances past every entry the iterator yields.
    pub fn get_since<'a>(
        &'a self,
        cursor: &'a mut Cursor,
    ) -> impl Iterator<Item = &'a VersionedCrdsValue> + 'a {
        self.iter_index(&self.entries, cursor)
    }

    pub fn get_votes<'a>(
        &'a self,
        cursor: &'a mut Cursor,
    ) -> impl Iterator<Item = &'a VersionedCrdsValue> + 'a {
        self.iter_index(&self.votes, cursor)
    }

    pub fn get_epoch_slots<'a>(
        &'a self,
        cursor: &'a mut Cursor,
    ) -> impl Iterator<Item = &'a VersionedCrdsValue> + 'a {
        self.iter_index(&self.epoch_slots, cursor)
    }

    pub fn get_duplicate_shreds<'a>(
        &'a self,
        cursor: &'a mut Cursor,
    ) -> impl Iterator<Item = &'a VersionedCrdsValue> + 'a {
        self.iter_index(&self.duplicate_shreds, cursor)
    }

    fn iter_index<'a>(
        &'a self,
        index: &'a BTreeMap<u64, usize>,
        cursor: &'a mut Cursor,
    ) -> impl Iterator<Item = &'a VersionedCrdsValue> + 'a {
        let start = cursor.ordinal();
        index.range(start..).filter_map(move |(ordinal, slot)| {
            cursor.consume(*ordinal);
            self.table[*slot].as_ref()
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_pubkeys(&self) -> usize {
        self.records.len()
    }

    pub fn num_purged(&self) -> usize {
        self.purged.len()
    }

    pub fn stats(&self) -> &CrdsStats {
        &self.stats
    }

    // ===== AGING =====

    /// Hashes recently overwritten, removed or rejected as stale.
    pub fn purged(&self) -> impl Iterator<Item = &Hash> {
        self.purged.iter().map(|(hash, _)| hash)
    }

    /// Drop purged hashes recorded before `cutoff`.
    pub fn trim_purged(&mut self, cutoff: u64) {
        while let Some((_, timestamp)) = self.purged.front() {
            if *timestamp >= cutoff {
                break;
            }
            self.purged.pop_front();
        }
    }

    /// Refresh the local timestamps of `pubkey`'s contact info and node instance.
    pub fn update_record_timestamp(&mut self, pubkey: &Pubkey, now: u64) {
        for kind in [CrdsKind::ContactInfo, CrdsKind::NodeInstance] {
            let label = CrdsValueLabel::new(kind, *pubkey);
            if let Some(slot) = self.labels.get(&label) {
                if let Some(entry) = self.table[*slot].as_mut() {
                    entry.local_timestamp = entry.local_timestamp.max(now);
                }
            }
        }
    }

    /// Labels whose values went unrefreshed for longer than their origin's timeout.
    ///
    /// All values of an origin survive while its own contact info is fresh.
    pub fn find_old_labels(&self, now: u64, timeout: impl Fn(&Pubkey) -> u64) -> Vec<CrdsValueLabel> {
        let mut old = Vec::new();
        for (origin, slots) in &self.records {
            let timeout = timeout(origin);
            let is_old = |entry: &VersionedCrdsValue| {
                entry.local_timestamp.saturating_add(timeout) <= now
            };
            let contact_info_fresh = self
                .get(&CrdsValueLabel::contact_info(*origin))
                .map(|entry| !is_old(entry))
                .unwrap_or(false);
            if contact_info_fresh {
                continue;
            }
            old.extend(
                slots
                    .iter()
                    .filter_map(|slot| self.table[*slot].as_ref())
                    .filter(|entry| is_old(entry))
                    .map(|entry| entry.value.label()),
            );
        }
        old
    }

    /// Remove every value found by [`Crds::find_old_labels`]; returns how many.
    pub fn purge_older_than(&mut self, now: u64, timeout: impl Fn(&Pubkey) -> u64) -> usize {
        let labels = self.find_old_labels(now, timeout);
        for label in &labels {
            self.remove(label, now);
        }
        labels.len()
    }

    /// Shard index agrees with the table for `label`.
    #[cfg(test)]
    pub(crate) fn check_shards(&self, label: &CrdsValueLabel) -> bool {
        match self.labels.get(label) {
            Some(slot) => match &self.table[*slot] {
                Some(entry) => self.shards.check(*slot, entry.value.hash().as_u64()),
                None => false,
            },
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crds_gossip_core::crypto::KeyPair;
    use std::net::SocketAddr;

    pub(crate) fn gossip_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    pub(crate) fn new_contact_info(keypair: &KeyPair, wallclock: u64) -> CrdsValue {
        let node = ContactInfo::new(keypair.pubkey(), wallclock, gossip_addr(8001));
        CrdsValue::new_signed(CrdsData::ContactInfo(node), keypair).unwrap()
    }

    pub(crate) fn new_vote(keypair: &KeyPair, index: u8, wallclock: u64) -> CrdsValue {
        let vote = Vote {
            from: keypair.pubkey(),
            transaction: vec![index; 16],
            wallclock,
        };
        CrdsValue::new_signed(CrdsData::Vote(index, vote), keypair).unwrap()
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut crds = Crds::new();
        let kp = KeyPair::generate();
        let value = new_contact_info(&kp, 100);

        assert_eq!(crds.upsert(value.clone(), 1, GossipRoute::LocalMessage), Ok(Upsert::Inserted));
        let ordinal = crds.get(&value.label()).unwrap().ordinal;

        assert_eq!(
            crds.upsert(value.clone(), 2, GossipRoute::PushMessage),
            Err(CrdsError::Duplicate { count: 1 })
        );
        assert_eq!(
            crds.upsert(value.clone(), 3, GossipRoute::PullResponse),
            Err(CrdsError::Duplicate { count: 1 })
        );
        assert_eq!(crds.len(), 1);
        let entry = crds.get(&value.label()).unwrap();
        assert_eq!(entry.ordinal, ordinal);
        assert_eq!(entry.local_timestamp, 1);
    }

    #[test]
    fn test_monotonic_replace() {
        // insert at 100, reject 90, accept 110 with only the overwritten hash purged
        let mut crds = Crds::new();
        let kp = KeyPair::generate();
        let v100 = new_contact_info(&kp, 100);
        let v90 = new_contact_info(&kp, 90);
        let v110 = new_contact_info(&kp, 110);
        let label = v100.label();

        crds.upsert(v100.clone(), 0, GossipRoute::LocalMessage).unwrap();
        assert_eq!(crds.upsert(v90.clone(), 1, GossipRoute::PushMessage), Err(CrdsError::Stale));
        assert_eq!(crds.get(&label).unwrap().value, v100);

        assert_eq!(
            crds.upsert(v110.clone(), 2, GossipRoute::PushMessage),
            Ok(Upsert::Updated { old_hash: *v100.hash() })
        );
        assert_eq!(crds.get(&label).unwrap().value, v110);
        assert!(crds.purged().any(|hash| hash == v100.hash()));
        // rejected values are not overwritten ones
        assert!(!crds.purged().any(|hash| hash == v90.hash()));
        assert_eq!(crds.len(), 1);
        assert!(crds.check_shards(&label));
    }

    #[test]
    fn test_equal_wallclock_keeps_existing() {
        let mut crds = Crds::new();
        let kp = KeyPair::generate();
        let first = new_vote(&kp, 0, 10);
        let mut vote = Vote {
            from: kp.pubkey(),
            transaction: vec![42],
            wallclock: 10,
        };
        vote.transaction.push(1);
        let second = CrdsValue::new_signed(CrdsData::Vote(0, vote), &kp).unwrap();

        crds.upsert(first.clone(), 0, GossipRoute::LocalMessage).unwrap();
        assert_eq!(crds.upsert(second, 0, GossipRoute::PushMessage), Err(CrdsError::Stale));
        assert_eq!(crds.get(&first.label()).unwrap().value, first);
    }

    #[test]
    fn test_contact_info_tie_keeps_existing_regardless_of_outset() {
        let mut crds = Crds::new();
        let kp = KeyPair::generate();
        let old = new_contact_info(&kp, 100);
        let mut node = ContactInfo::new(kp.pubkey(), 100, gossip_addr(8002));
        node.outset = u64::MAX;
        let restarted = CrdsValue::new_signed(CrdsData::ContactInfo(node), &kp).unwrap();

        crds.upsert(old.clone(), 0, GossipRoute::LocalMessage).unwrap();
        assert!(matches!(
            crds.upsert(restarted, 1, GossipRoute::PushMessage),
            Err(CrdsError::Stale)
        ));
        let label = CrdsValueLabel::contact_info(kp.pubkey());
        assert_eq!(crds.get(&label).unwrap().value, old);
    }

    #[test]
    fn test_cursor_streams_changes_in_order() {
        let mut crds = Crds::new();
        let kp = KeyPair::generate();
        let mut cursor = Cursor::default();

        crds.upsert(new_contact_info(&kp, 1), 0, GossipRoute::LocalMessage).unwrap();
        crds.upsert(new_vote(&kp, 0, 1), 0, GossipRoute::LocalMessage).unwrap();
        let kinds: Vec<_> = crds.get_since(&mut cursor).map(|e| e.value.kind()).collect();
        assert_eq!(kinds, vec![CrdsKind::ContactInfo, CrdsKind::Vote]);
        assert_eq!(crds.get_since(&mut cursor).count(), 0);

        // an update moves the entry to the end of the stream
        crds.upsert(new_contact_info(&kp, 2), 0, GossipRoute::LocalMessage).unwrap();
        let changed: Vec<_> = crds.get_since(&mut cursor).map(|e| e.value.wallclock()).collect();
        assert_eq!(changed, vec![2]);

        // kind streams only see their kind
        let mut votes = Cursor::default();
        assert_eq!(crds.get_votes(&mut votes).count(), 1);
        crds.upsert(new_vote(&kp, 1, 3), 0, GossipRoute::LocalMessage).unwrap();
        assert_eq!(crds.get_votes(&mut votes).count(), 1);
        let mut epoch_slots = Cursor::default();
        assert_eq!(crds.get_epoch_slots(&mut epoch_slots).count(), 0);
    }

    #[test]
    fn test_cursor_is_restartable() {
        let mut crds = Crds::new();
        let kp = KeyPair::generate();
        for index in 0..4 {
            crds.upsert(new_vote(&kp, index, 1), 0, GossipRoute::LocalMessage).unwrap();
        }
        let mut cursor = Cursor::default();
        assert_eq!(crds.get_since(&mut cursor).take(2).count(), 2);
        assert_eq!(cursor.ordinal(), 2);
        assert_eq!(crds.get_since(&mut cursor).count(), 2);
    }

    #[test]
    fn test_shards_track_every_entry() {
        let mut crds = Crds::new();
        let keypairs: Vec<_> = (0..8).map(|_| KeyPair::generate()).collect();
        for (i, kp) in keypairs.iter().enumerate() {
            crds.upsert(new_contact_info(kp, 1), 0, GossipRoute::LocalMessage).unwrap();
            for index in 0..4 {
                crds.upsert(new_vote(kp, index, i as u64), 0, GossipRoute::LocalMessage)
                    .unwrap();
            }
        }
        for kp in keypairs.iter().step_by(2) {
            crds.upsert(new_contact_info(kp, 5), 0, GossipRoute::LocalMessage).unwrap();
            crds.remove(&new_vote(kp, 0, 0).label(), 0);
        }
        let labels: Vec<_> = crds.values().map(|e| e.value.label()).collect();
        assert_eq!(labels.len(), 8 * 5 - 4);
        assert!(labels.iter().all(|label| crds.check_shards(label)));
        assert_eq!(crds.filter_bitmask(0, 0).count(), labels.len());
    }

    #[test]
    fn test_purge_keeps_origins_with_fresh_contact_info() {
        let mut crds = Crds::new();
        let fresh = KeyPair::generate();
        let stale = KeyPair::generate();
        let own = KeyPair::generate();

        crds.upsert(new_vote(&fresh, 0, 1), 0, GossipRoute::PushMessage).unwrap();
        crds.upsert(new_contact_info(&fresh, 1), 900, GossipRoute::PushMessage).unwrap();
        crds.upsert(new_vote(&stale, 0, 1), 0, GossipRoute::PushMessage).unwrap();
        crds.upsert(new_contact_info(&stale, 1), 100, GossipRoute::PushMessage).unwrap();
        crds.upsert(new_contact_info(&own, 1), 0, GossipRoute::LocalMessage).unwrap();

        let own_pubkey = own.pubkey();
        let timeout = |pubkey: &Pubkey| if *pubkey == own_pubkey { u64::MAX } else { 500 };
        assert_eq!(crds.purge_older_than(1000, timeout), 2);

        assert_eq!(crds.get_records(&fresh.pubkey()).count(), 2);
        assert_eq!(crds.get_records(&stale.pubkey()).count(), 0);
        assert!(crds.get_contact_info(&own.pubkey()).is_some());
        assert_eq!(crds.num_nodes(), 2);
        assert_eq!(crds.num_pubkeys(), 2);
    }

    #[test]
    fn test_update_record_timestamp_defers_purge() {
        let mut crds = Crds::new();
        let kp = KeyPair::generate();
        crds.upsert(new_contact_info(&kp, 1), 0, GossipRoute::PullResponse).unwrap();
        crds.update_record_timestamp(&kp.pubkey(), 800);
        assert_eq!(crds.purge_older_than(1000, |_| 500), 0);
        assert_eq!(crds.purge_older_than(1300, |_| 500), 1);
    }

    #[test]
    fn test_trim_purged() {
        let mut crds = Crds::new();
        let kp = KeyPair::generate();
        crds.upsert(new_vote(&kp, 0, 1), 0, GossipRoute::LocalMessage).unwrap();
        crds.upsert(new_vote(&kp, 0, 2), 10, GossipRoute::LocalMessage).unwrap();
        crds.upsert(new_vote(&kp, 0, 3), 20, GossipRoute::LocalMessage).unwrap();
        assert_eq!(crds.num_purged(), 2);
        crds.trim_purged(15);
        assert_eq!(crds.num_purged(), 1);
    }

    #[test]
    fn test_removed_slot_is_reused() {
        let mut crds = Crds::new();
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let value = new_contact_info(&a, 1);
        crds.upsert(value.clone(), 0, GossipRoute::LocalMessage).unwrap();
        assert!(crds.remove(&value.label(), 0).is_some());
        assert!(crds.is_empty());

        let other = new_contact_info(&b, 1);
        crds.upsert(other.clone(), 0, GossipRoute::LocalMessage).unwrap();
        assert!(crds.check_shards(&other.label()));
        assert_eq!(crds.contact_infos().count(), 1);
        assert_eq!(crds.stats().removed, 1);
    }
}
