//! Turns RAM observations into change-log entries and SYNC payloads into
//! commit targets. All the state that survives from tick to tick lives here.

use tandem_core::constants::{INVENTORY_SLOTS, PLAYED_TIME_POISON};
use tandem_core::inventory::ItemTable;
use tandem_core::protocol::{ChangeEntry, ItemMap};

pub struct Reconciler {
    previous: Option<ItemTable>,
    previous_played_time: u64,
    change_queue: Vec<ChangeEntry>,
    message_index: u64,
    min_sane_inventory: usize,
}

impl Reconciler {
    pub fn new(min_sane_inventory: usize) -> Reconciler {
        Reconciler {
            previous: None,
            previous_played_time: 0,
            change_queue: Vec::new(),
            message_index: 0,
            min_sane_inventory,
        }
    }

    /// Whether delta emission is currently suppressed, waiting for the
    /// server to re-anchor us after a save reload or reset.
    pub fn poisoned(&self) -> bool {
        self.previous_played_time == PLAYED_TIME_POISON
    }

    /// Fold this tick's observation into the change queue.
    ///
    /// Deltas are only emitted when the save has actually aged since the
    /// last tick; a rewound clock or a wiped inventory poisons the baseline
    /// instead, so a reloaded save cannot replay stale changes.
    pub fn observe(&mut self, current: &ItemTable, played_time: u64) {
        if let Some(previous) = &self.previous {
            if played_time > self.previous_played_time && !previous.same_counts(current) {
                for item in 0..INVENTORY_SLOTS as u16 {
                    let item = item as u8;
                    let before = i64::from(previous.count(item));
                    let after = i64::from(current.count(item));
                    if before != after {
                        self.message_index += 1;
                        self.change_queue.push(ChangeEntry::Item {
                            index: self.message_index,
                            item,
                            delta: after - before,
                        });
                    }
                }
            }
        }

        let wiped = self.previous.as_ref().is_some_and(|previous| {
            previous.distinct_items() >= self.min_sane_inventory && current.distinct_items() == 0
        });

        self.previous = Some(current.clone());

        if played_time >= self.previous_played_time && !wiped {
            self.previous_played_time = played_time;
        } else {
            self.previous_played_time = PLAYED_TIME_POISON;
        }
    }

    /// Build the commit target for a SYNC payload: the server ledger padded
    /// with zeros, plus every local inventory delta the server has not
    /// acknowledged yet. Receiving a SYNC also lifts the poison.
    pub fn merge_sync(&mut self, payload: &ItemMap, played_time: u64) -> [i64; INVENTORY_SLOTS] {
        if self.previous_played_time > played_time {
            self.previous_played_time = played_time;
        }

        let mut target = [0i64; INVENTORY_SLOTS];
        for (&item, &count) in payload {
            target[item as usize] = count;
        }
        for entry in &self.change_queue {
            if let ChangeEntry::Item { item, delta, .. } = entry {
                target[*item as usize] += delta;
            }
        }
        target
    }

    /// The merged target was committed; it becomes the new baseline.
    pub fn committed(&mut self, table: ItemTable) {
        self.previous = Some(table);
    }

    /// Drop entries the server has acknowledged.
    pub fn trim_acked(&mut self, indices: &[u64]) {
        self.change_queue.retain(|entry| match entry {
            ChangeEntry::Item { index, .. } => !indices.contains(index),
            ChangeEntry::Status { .. } => true,
        });
    }

    /// Status entries ride along for exactly one transmission.
    pub fn purge_status_entries(&mut self) {
        self.change_queue
            .retain(|entry| matches!(entry, ChangeEntry::Item { .. }));
    }

    pub fn push_entry(&mut self, entry: ChangeEntry) {
        self.change_queue.push(entry);
    }

    pub fn queue(&self) -> &[ChangeEntry] {
        &self.change_queue
    }
}
