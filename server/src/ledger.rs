//! Per-session ledgers and membership.
//!
//! The store is mutated only by the server's own loop, so there is no
//! locking here; dispatch hands in one message at a time.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use tandem_core::constants::{CHEST_MASK_LEN, EMPTY_ITEM, INVENTORY_SLOTS};
use tandem_core::protocol::{ChangeEntry, ItemMap};

/// `<source-ip>-<series-number>`: stable across reconnects from the same
/// process, distinct across restarts.
pub fn member_name(addr: &SocketAddr, series: u64) -> String {
    format!("{}-{}", addr.ip(), series)
}

fn log_key(member: &str, index: u64) -> String {
    format!("{member}-{index}")
}

/// What a LOG message did to the store.
pub struct LogOutcome {
    /// Indices to acknowledge, applied or not (the dedup map makes
    /// retransmits idempotent, so the ack can always cover the batch).
    pub acked: Vec<u64>,
    /// Status entries to fan out to the session's other members.
    pub fanout: Vec<ChangeEntry>,
    /// How many entries actually changed the ledger this time.
    pub applied: usize,
}

/// How to answer a SYNC request.
pub enum SyncReply {
    /// The ledger has never been seeded; ask the requester to report.
    Seed,
    /// The ledger, stripped of non-positive counts.
    Payload(ItemMap),
    /// Nothing owed and no override; say nothing and let the client back
    /// off.
    Quiet,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    members: HashMap<String, String>,
    ledgers: HashMap<String, Option<ItemMap>>,
    pending: HashMap<String, HashSet<String>>,
    chests: HashMap<String, Vec<u8>>,
    gp: HashMap<String, u32>,
    processed_logs: HashMap<String, u64>,
    addresses: HashMap<String, SocketAddr>,
}

impl SessionStore {
    pub fn new() -> SessionStore {
        SessionStore::default()
    }

    /// Rebuild a store from snapshot parts. Every member is marked pending
    /// so each peer gets a fresh SYNC after a restart.
    pub fn restore(
        members: HashMap<String, String>,
        ledgers: HashMap<String, Option<ItemMap>>,
        processed_logs: HashMap<String, u64>,
    ) -> SessionStore {
        let mut store = SessionStore {
            members,
            ledgers,
            processed_logs,
            ..SessionStore::default()
        };
        for (member, session) in &store.members {
            store
                .pending
                .entry(session.clone())
                .or_default()
                .insert(member.clone());
        }
        store
    }

    pub fn snapshot_parts(
        &self,
    ) -> (
        &HashMap<String, String>,
        &HashMap<String, Option<ItemMap>>,
        &HashMap<String, u64>,
    ) {
        (&self.members, &self.ledgers, &self.processed_logs)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn session_count(&self) -> usize {
        self.ledgers.len()
    }

    /// Remember where this member last spoke from, for directive fan-out.
    pub fn touch(&mut self, member: &str, addr: SocketAddr) {
        if self.members.contains_key(member) {
            self.addresses.insert(member.to_string(), addr);
        }
    }

    pub fn create_session(
        &mut self,
        session: &str,
        member: String,
        addr: SocketAddr,
    ) -> Result<(), String> {
        if self.ledgers.contains_key(session) {
            return Err(format!("Session \"{session}\" already exists."));
        }
        self.ledgers.insert(session.to_string(), None);
        self.members.insert(member.clone(), session.to_string());
        self.addresses.insert(member, addr);
        Ok(())
    }

    /// Join an existing session. Returns the session's chest mask when it
    /// already has opened chests the joiner should learn about.
    pub fn join_session(
        &mut self,
        session: &str,
        member: String,
        addr: SocketAddr,
    ) -> Result<Option<Vec<u8>>, String> {
        if !self.ledgers.contains_key(session) {
            return Err(format!("Session \"{session}\" does not exist."));
        }
        self.members.insert(member.clone(), session.to_string());
        self.addresses.insert(member, addr);

        let mask = self
            .chests
            .get(session)
            .filter(|mask| mask.iter().any(|&byte| byte != 0))
            .cloned();
        Ok(mask)
    }

    fn session_of(&self, member: &str) -> Result<String, String> {
        self.members
            .get(member)
            .cloned()
            .ok_or_else(|| format!("Unknown member \"{member}\"."))
    }

    /// Seed a null ledger from a REPORT payload, padding every id with a
    /// zero so later deltas always find their key. A second REPORT for an
    /// already-seeded session is ignored.
    pub fn seed_report(&mut self, member: &str, items: &ItemMap) -> Result<bool, String> {
        let session = self.session_of(member)?;
        let ledger = self
            .ledgers
            .get_mut(&session)
            .ok_or_else(|| format!("Session \"{session}\" does not exist."))?;

        if ledger.is_some() {
            return Ok(false);
        }

        let mut seeded = ItemMap::new();
        for id in 0..INVENTORY_SLOTS as u16 {
            let id = id as u8;
            seeded.insert(id, items.get(&id).copied().unwrap_or(0));
        }
        seeded.insert(EMPTY_ITEM, 0);
        *ledger = Some(seeded);

        let all: Vec<String> = self.members_of(&session);
        self.pending.entry(session).or_default().extend(all);
        Ok(true)
    }

    /// Apply a LOG batch exactly once per `<member>-<index>`, then owe
    /// everyone else a SYNC.
    pub fn apply_log(
        &mut self,
        member: &str,
        entries: &[ChangeEntry],
        now: u64,
    ) -> Result<LogOutcome, String> {
        let session = self.session_of(member)?;

        let mut outcome = LogOutcome {
            acked: Vec::new(),
            fanout: Vec::new(),
            applied: 0,
        };

        for entry in entries {
            match entry {
                ChangeEntry::Item { index, item, delta } => {
                    outcome.acked.push(*index);

                    let key = log_key(member, *index);
                    if self.processed_logs.contains_key(&key) {
                        continue;
                    }

                    let ledger = self
                        .ledgers
                        .get_mut(&session)
                        .and_then(|ledger| ledger.as_mut())
                        .ok_or_else(|| {
                            format!("Session \"{session}\" has no inventory to apply changes to.")
                        })?;

                    self.processed_logs.insert(key, now);
                    *ledger.entry(*item).or_insert(0) += delta;
                    outcome.applied += 1;
                }
                // Status entries carry no index and never touch the ledger;
                // the sender purges them after one transmission, so they are
                // at-most-once already.
                ChangeEntry::Status { .. } => outcome.fanout.push(entry.clone()),
            }
        }

        if outcome.applied > 0 {
            let others: Vec<String> = self
                .members_of(&session)
                .into_iter()
                .filter(|other| other != member)
                .collect();
            self.pending.entry(session).or_default().extend(others);
        }

        Ok(outcome)
    }

    /// Answer a SYNC request. The pending mark is consumed; `forced`
    /// overrides it.
    pub fn sync_reply(&mut self, member: &str, forced: bool) -> Result<SyncReply, String> {
        let session = self.session_of(member)?;

        let Some(Some(ledger)) = self.ledgers.get(&session) else {
            return Ok(SyncReply::Seed);
        };

        let owed = self
            .pending
            .get_mut(&session)
            .map_or(false, |pending| pending.remove(member));

        if !(owed || forced) {
            return Ok(SyncReply::Quiet);
        }

        let stripped: ItemMap = ledger
            .iter()
            .filter(|&(_, &count)| count > 0)
            .map(|(&item, &count)| (item, count))
            .collect();
        Ok(SyncReply::Payload(stripped))
    }

    /// OR a member's chest mask into the session's. Returns the merged mask
    /// when it changed, for fan-out.
    pub fn merge_chests(&mut self, member: &str, mask: &[u8]) -> Result<Option<Vec<u8>>, String> {
        let session = self.session_of(member)?;
        let merged = self
            .chests
            .entry(session)
            .or_insert_with(|| vec![0u8; CHEST_MASK_LEN]);

        let mut changed = false;
        for (held, &incoming) in merged.iter_mut().zip(mask.iter()) {
            if *held | incoming != *held {
                *held |= incoming;
                changed = true;
            }
        }
        Ok(changed.then(|| merged.clone()))
    }

    pub fn record_gp(&mut self, member: &str, amount: u32) -> Result<(), String> {
        self.session_of(member)?;
        self.gp.insert(member.to_string(), amount);
        Ok(())
    }

    /// The session's other members with a known return address.
    pub fn peers(&self, member: &str) -> Vec<(String, SocketAddr)> {
        let Some(session) = self.members.get(member) else {
            return Vec::new();
        };
        self.members
            .iter()
            .filter(|(other, their_session)| {
                other.as_str() != member && their_session.as_str() == session.as_str()
            })
            .filter_map(|(other, _)| {
                self.addresses
                    .get(other)
                    .map(|addr| (other.clone(), *addr))
            })
            .collect()
    }

    fn members_of(&self, session: &str) -> Vec<String> {
        self.members
            .iter()
            .filter(|(_, their_session)| their_session.as_str() == session)
            .map(|(member, _)| member.clone())
            .collect()
    }

    /// Drop dedup entries older than the retention window. Runs on idle
    /// ticks; returns how many were dropped.
    pub fn gc_processed_logs(&mut self, now: u64, retention_secs: u64) -> usize {
        let before = self.processed_logs.len();
        self.processed_logs
            .retain(|_, &mut stamp| now.saturating_sub(stamp) <= retention_secs);
        before - self.processed_logs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last_octet: u8, port: u16) -> SocketAddr {
        format!("10.0.0.{last_octet}:{port}").parse().unwrap()
    }

    fn seeded_store() -> (SessionStore, String) {
        let mut store = SessionStore::new();
        let a = member_name(&addr(1, 4000), 1700000000);
        store.create_session("alpha", a.clone(), addr(1, 4000)).unwrap();
        store
            .seed_report(&a, &ItemMap::from([(1, 5), (2, 3)]))
            .unwrap();
        (store, a)
    }

    #[test]
    fn duplicate_session_names_are_rejected() {
        let mut store = SessionStore::new();
        let a = member_name(&addr(1, 4000), 1);
        store.create_session("alpha", a, addr(1, 4000)).unwrap();
        let b = member_name(&addr(2, 4000), 2);
        assert!(store.create_session("alpha", b, addr(2, 4000)).is_err());
    }

    #[test]
    fn joining_a_missing_session_fails() {
        let mut store = SessionStore::new();
        let b = member_name(&addr(2, 4000), 2);
        assert!(store.join_session("beta", b, addr(2, 4000)).is_err());
    }

    #[test]
    fn seeding_pads_all_ids_with_zeros() {
        let (mut store, a) = seeded_store();
        let SyncReply::Payload(payload) = store.sync_reply(&a, true).unwrap() else {
            panic!("expected a payload");
        };
        // The stripped payload only carries the positive counts...
        assert_eq!(payload, ItemMap::from([(1, 5), (2, 3)]));
        // ...but the ledger itself holds all 256 ids.
        let (_, ledgers, _) = store.snapshot_parts();
        let ledger = ledgers["alpha"].as_ref().unwrap();
        assert_eq!(ledger.len(), INVENTORY_SLOTS);
        assert_eq!(ledger[&200], 0);
        assert_eq!(ledger[&EMPTY_ITEM], 0);
    }

    #[test]
    fn a_second_report_does_not_reseed() {
        let (mut store, a) = seeded_store();
        assert!(!store.seed_report(&a, &ItemMap::from([(9, 9)])).unwrap());
        let SyncReply::Payload(payload) = store.sync_reply(&a, true).unwrap() else {
            panic!("expected a payload");
        };
        assert_eq!(payload.get(&9), None);
    }

    #[test]
    fn log_applies_exactly_once() {
        let (mut store, a) = seeded_store();
        let b = member_name(&addr(2, 4000), 1700000100);
        store.join_session("alpha", b.clone(), addr(2, 4000)).unwrap();

        let entries = [ChangeEntry::Item { index: 1, item: 1, delta: 2 }];
        let first = store.apply_log(&b, &entries, 100).unwrap();
        assert_eq!(first.acked, vec![1]);
        assert_eq!(first.applied, 1);

        // The replay changes nothing but is still acknowledged.
        let replay = store.apply_log(&b, &entries, 160).unwrap();
        assert_eq!(replay.acked, vec![1]);
        assert_eq!(replay.applied, 0);

        let SyncReply::Payload(payload) = store.sync_reply(&a, true).unwrap() else {
            panic!("expected a payload");
        };
        assert_eq!(payload[&1], 7);
    }

    #[test]
    fn log_marks_only_the_other_members_pending() {
        let (mut store, a) = seeded_store();
        let b = member_name(&addr(2, 4000), 1700000100);
        store.join_session("alpha", b.clone(), addr(2, 4000)).unwrap();
        // Drain the pending marks left over from seeding.
        store.sync_reply(&a, false).unwrap();
        store.sync_reply(&b, false).unwrap();

        store
            .apply_log(&b, &[ChangeEntry::Item { index: 1, item: 1, delta: 2 }], 100)
            .unwrap();

        assert!(matches!(store.sync_reply(&a, false).unwrap(), SyncReply::Payload(_)));
        assert!(matches!(store.sync_reply(&b, false).unwrap(), SyncReply::Quiet));
    }

    #[test]
    fn sync_against_an_unseeded_ledger_asks_for_a_report() {
        let mut store = SessionStore::new();
        let a = member_name(&addr(1, 4000), 1);
        store.create_session("alpha", a.clone(), addr(1, 4000)).unwrap();
        assert!(matches!(store.sync_reply(&a, false).unwrap(), SyncReply::Seed));
    }

    #[test]
    fn pending_marks_are_consumed_by_the_reply() {
        let (mut store, a) = seeded_store();
        assert!(matches!(store.sync_reply(&a, false).unwrap(), SyncReply::Payload(_)));
        assert!(matches!(store.sync_reply(&a, false).unwrap(), SyncReply::Quiet));
        // The bang still gets an answer.
        assert!(matches!(store.sync_reply(&a, true).unwrap(), SyncReply::Payload(_)));
    }

    #[test]
    fn negative_ledger_counts_are_stripped_from_sync() {
        let (mut store, a) = seeded_store();
        store
            .apply_log(&a, &[ChangeEntry::Item { index: 1, item: 2, delta: -10 }], 100)
            .unwrap();
        let SyncReply::Payload(payload) = store.sync_reply(&a, true).unwrap() else {
            panic!("expected a payload");
        };
        assert_eq!(payload.get(&2), None);
        assert_eq!(payload[&1], 5);
    }

    #[test]
    fn status_entries_fan_out_without_touching_the_ledger() {
        let (mut store, a) = seeded_store();
        let entries = [
            ChangeEntry::Status { on: true, who: 1, bits: 0x40 },
            ChangeEntry::Item { index: 1, item: 1, delta: 1 },
        ];
        let outcome = store.apply_log(&a, &entries, 100).unwrap();
        assert_eq!(outcome.fanout.len(), 1);
        assert_eq!(outcome.acked, vec![1]);
    }

    #[test]
    fn chest_merge_reports_change_only_when_bits_appear() {
        let (mut store, a) = seeded_store();
        let mut mask = vec![0u8; CHEST_MASK_LEN];
        mask[3] = 0b100;

        let merged = store.merge_chests(&a, &mask).unwrap();
        assert!(merged.is_some());
        // The same mask again adds nothing.
        assert!(store.merge_chests(&a, &mask).unwrap().is_none());
        // A subset adds nothing either.
        assert!(store.merge_chests(&a, &vec![0u8; CHEST_MASK_LEN]).unwrap().is_none());
    }

    #[test]
    fn gc_drops_only_expired_entries() {
        let (mut store, a) = seeded_store();
        store
            .apply_log(&a, &[ChangeEntry::Item { index: 1, item: 1, delta: 1 }], 100)
            .unwrap();
        store
            .apply_log(&a, &[ChangeEntry::Item { index: 2, item: 1, delta: 1 }], 650)
            .unwrap();

        assert_eq!(store.gc_processed_logs(750, 600), 1);

        // Index 1 expired, so a replay applies again; index 2 is still held.
        let replay = store
            .apply_log(
                &a,
                &[
                    ChangeEntry::Item { index: 1, item: 1, delta: 1 },
                    ChangeEntry::Item { index: 2, item: 1, delta: 1 },
                ],
                760,
            )
            .unwrap();
        assert_eq!(replay.applied, 1);
    }

    #[test]
    fn restore_marks_every_member_pending() {
        let (store, a) = seeded_store();
        let (members, ledgers, processed) = store.snapshot_parts();
        let mut restored = SessionStore::restore(
            members.clone(),
            ledgers.clone(),
            processed.clone(),
        );
        assert!(matches!(restored.sync_reply(&a, false).unwrap(), SyncReply::Payload(_)));
    }

    #[test]
    fn peers_excludes_the_sender() {
        let (mut store, a) = seeded_store();
        let b = member_name(&addr(2, 4000), 1700000100);
        store.join_session("alpha", b.clone(), addr(2, 4000)).unwrap();

        let peers = store.peers(&a);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].0, b);
        assert!(store.peers(&b).iter().all(|(name, _)| name == &a));
    }
}
