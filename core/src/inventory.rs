//! The inventory model shared by both RAM layouts.
//!
//! The game keeps the same logical inventory in two places: a field layout
//! (256 slot ids followed by 256 amounts) and a battle layout (256 records
//! of 5 bytes). Both reduce to the same canonical form here: a slot order
//! plus a dense per-item count table.

use std::collections::BTreeMap;

use crate::constants::{
    BATTLE_COUNT_OFFSET, BATTLE_RECORD_LEN, BATTLE_REGION_LEN, EMPTY_ITEM, FIELD_REGION_LEN,
    INVENTORY_SLOTS, MAX_ITEM_COUNT,
};
use crate::error::SyncError;

/// One inventory slot as read from RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub item: u8,
    pub count: u8,
}

/// View the raw field region as slots.
pub fn field_slots(raw: &[u8]) -> Result<Vec<Slot>, SyncError> {
    if raw.len() != FIELD_REGION_LEN {
        return Err(SyncError::EmulatorReadError(format!(
            "field region is {} bytes, expected {FIELD_REGION_LEN}",
            raw.len()
        )));
    }
    Ok((0..INVENTORY_SLOTS)
        .map(|i| Slot {
            item: raw[i],
            count: raw[INVENTORY_SLOTS + i],
        })
        .collect())
}

/// View the raw battle region as slots, skipping the opaque record bytes.
pub fn battle_slots(raw: &[u8]) -> Result<Vec<Slot>, SyncError> {
    if raw.len() != BATTLE_REGION_LEN {
        return Err(SyncError::EmulatorReadError(format!(
            "battle region is {} bytes, expected {BATTLE_REGION_LEN}",
            raw.len()
        )));
    }
    Ok((0..INVENTORY_SLOTS)
        .map(|i| Slot {
            item: raw[i * BATTLE_RECORD_LEN],
            count: raw[i * BATTLE_RECORD_LEN + BATTLE_COUNT_OFFSET],
        })
        .collect())
}

/// Canonical inventory: the slot order it was read in plus per-item counts.
///
/// Construction guarantees that every non-empty id appears at most once in
/// the order array and that the empty sentinel's count is pinned to zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTable {
    order: [u8; INVENTORY_SLOTS],
    counts: [u8; INVENTORY_SLOTS],
}

impl ItemTable {
    /// Collapse a slot view into canonical form. A duplicated id keeps its
    /// first slot position and the largest of its counts; later occurrences
    /// become empty slots.
    pub fn from_slots(slots: &[Slot]) -> ItemTable {
        let mut order = [EMPTY_ITEM; INVENTORY_SLOTS];
        let mut counts = [0u8; INVENTORY_SLOTS];
        let mut seen = [false; INVENTORY_SLOTS];

        for (i, slot) in slots.iter().enumerate().take(INVENTORY_SLOTS) {
            if slot.item == EMPTY_ITEM {
                continue;
            }
            let id = slot.item as usize;
            if !seen[id] {
                seen[id] = true;
                order[i] = slot.item;
            }
            counts[id] = counts[id].max(slot.count);
        }

        counts[EMPTY_ITEM as usize] = 0;
        ItemTable { order, counts }
    }

    /// Reassemble a table from parts the committer already validated.
    pub fn from_parts(order: [u8; INVENTORY_SLOTS], counts: [u8; INVENTORY_SLOTS]) -> ItemTable {
        debug_assert_eq!(counts[EMPTY_ITEM as usize], 0);
        ItemTable { order, counts }
    }

    pub fn order(&self) -> &[u8; INVENTORY_SLOTS] {
        &self.order
    }

    pub fn counts(&self) -> &[u8; INVENTORY_SLOTS] {
        &self.counts
    }

    pub fn count(&self, item: u8) -> u8 {
        self.counts[item as usize]
    }

    /// Distinct items currently held.
    pub fn distinct_items(&self) -> usize {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(id, &count)| id != EMPTY_ITEM as usize && count > 0)
            .count()
    }

    /// Count-level equality; slot positions are ignored.
    pub fn same_counts(&self, other: &ItemTable) -> bool {
        self.counts == other.counts
    }

    /// Non-zero counts keyed by item, the shape REPORT payloads use.
    pub fn nonzero_items(&self) -> BTreeMap<u8, i64> {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(id, &count)| id != EMPTY_ITEM as usize && count > 0)
            .map(|(id, &count)| (id as u8, i64::from(count)))
            .collect()
    }
}

/// Score how closely two slot views agree: one point per slot for a matching
/// id, a second when the amounts also match. The denominator is two points
/// per slot, so identical views score 1.0.
pub fn similarity(a: &[Slot], b: &[Slot]) -> f64 {
    let mut score = 0u32;
    for (x, y) in a.iter().zip(b.iter()) {
        if x.item == y.item {
            score += 1;
            if x.count == y.count {
                score += 1;
            }
        }
    }
    f64::from(score) / (2 * INVENTORY_SLOTS) as f64
}

/// Clamp a merge target into writable counts. Every value lands in
/// `[0, 99]` and the empty sentinel is forced to zero.
pub fn clamp_counts(target: &[i64; INVENTORY_SLOTS]) -> [u8; INVENTORY_SLOTS] {
    let mut counts = [0u8; INVENTORY_SLOTS];
    for (id, &value) in target.iter().enumerate() {
        counts[id] = value.clamp(0, i64::from(MAX_ITEM_COUNT)) as u8;
    }
    counts[EMPTY_ITEM as usize] = 0;
    counts
}

/// Produce the slot order for a new count table, starting from the current
/// order: slots whose item dropped to zero are emptied, items that became
/// non-zero take the first empty slot.
pub fn rebuild_order(
    order: &[u8; INVENTORY_SLOTS],
    counts: &[u8; INVENTORY_SLOTS],
) -> Result<[u8; INVENTORY_SLOTS], SyncError> {
    let mut order = *order;

    for slot in order.iter_mut() {
        if *slot != EMPTY_ITEM && counts[*slot as usize] == 0 {
            *slot = EMPTY_ITEM;
        }
    }

    for item in 0..EMPTY_ITEM {
        if counts[item as usize] > 0 && !order.contains(&item) {
            // 255 possible ids over 256 slots: a free slot always exists.
            let free = order
                .iter()
                .position(|&slot| slot == EMPTY_ITEM)
                .expect("order array has no free slot");
            order[free] = item;
        }
    }

    debug_assert!(ids_unique(&order));
    Ok(order)
}

fn ids_unique(order: &[u8; INVENTORY_SLOTS]) -> bool {
    let mut seen = [false; INVENTORY_SLOTS];
    for &slot in order.iter().filter(|&&slot| slot != EMPTY_ITEM) {
        if seen[slot as usize] {
            return false;
        }
        seen[slot as usize] = true;
    }
    true
}

/// Render order + counts as a raw field region image.
pub fn field_image(
    order: &[u8; INVENTORY_SLOTS],
    counts: &[u8; INVENTORY_SLOTS],
) -> [u8; FIELD_REGION_LEN] {
    let mut out = [0u8; FIELD_REGION_LEN];
    out[..INVENTORY_SLOTS].copy_from_slice(order);
    for (i, &item) in order.iter().enumerate() {
        out[INVENTORY_SLOTS + i] = if item == EMPTY_ITEM {
            0
        } else {
            counts[item as usize]
        };
    }
    out
}

/// Splice ids and amounts into a raw battle region, leaving the three
/// opaque bytes of every record untouched.
pub fn splice_battle(raw: &mut [u8], order: &[u8; INVENTORY_SLOTS], counts: &[u8; INVENTORY_SLOTS]) {
    debug_assert_eq!(raw.len(), BATTLE_REGION_LEN);
    for (i, &item) in order.iter().enumerate() {
        raw[i * BATTLE_RECORD_LEN] = item;
        raw[i * BATTLE_RECORD_LEN + BATTLE_COUNT_OFFSET] = if item == EMPTY_ITEM {
            0
        } else {
            counts[item as usize]
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(pairs: &[(u8, u8)]) -> Vec<Slot> {
        let mut out: Vec<Slot> = pairs
            .iter()
            .map(|&(item, count)| Slot { item, count })
            .collect();
        out.resize(INVENTORY_SLOTS, Slot { item: EMPTY_ITEM, count: 0 });
        out
    }

    #[test]
    fn from_slots_keeps_each_item_once() {
        let table = ItemTable::from_slots(&slots(&[(1, 5), (2, 3), (1, 7)]));
        // First occurrence keeps the slot, the duplicate collapses away.
        assert_eq!(table.order()[0], 1);
        assert_eq!(table.order()[1], 2);
        assert_eq!(table.order()[2], EMPTY_ITEM);
        // The count keeps the larger of the duplicates.
        assert_eq!(table.count(1), 7);
        assert_eq!(table.count(2), 3);
        assert_eq!(table.count(EMPTY_ITEM), 0);
        assert_eq!(table.distinct_items(), 2);
    }

    #[test]
    fn from_slots_never_counts_the_empty_sentinel() {
        let mut raw = slots(&[]);
        raw[0] = Slot { item: EMPTY_ITEM, count: 42 };
        let table = ItemTable::from_slots(&raw);
        assert_eq!(table.count(EMPTY_ITEM), 0);
        assert_eq!(table.distinct_items(), 0);
    }

    #[test]
    fn similarity_is_exact() {
        let a = slots(&[(1, 5)]);
        let b = slots(&[(1, 7)]);
        // 255 slots fully agree (2 points each), one agrees on id only.
        let expected = (255.0 * 2.0 + 1.0) / 512.0;
        assert!((similarity(&a, &b) - expected).abs() < 1e-9);
        assert_eq!(similarity(&a, &a), 1.0);
    }

    #[test]
    fn similarity_of_disjoint_views_is_low() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        for i in 0..INVENTORY_SLOTS as u16 {
            a.push(Slot { item: (i % 100) as u8, count: 1 });
            b.push(Slot { item: (100 + i % 100) as u8, count: 2 });
        }
        assert!(similarity(&a, &b) < 0.1);
    }

    #[test]
    fn clamp_bounds_every_count() {
        let mut target = [0i64; INVENTORY_SLOTS];
        target[1] = 250;
        target[2] = -5;
        target[3] = 42;
        target[EMPTY_ITEM as usize] = 9;
        let counts = clamp_counts(&target);
        assert_eq!(counts[1], MAX_ITEM_COUNT);
        assert_eq!(counts[2], 0);
        assert_eq!(counts[3], 42);
        assert_eq!(counts[EMPTY_ITEM as usize], 0);
    }

    #[test]
    fn rebuild_order_drops_and_inserts() {
        let table = ItemTable::from_slots(&slots(&[(1, 5), (2, 3)]));
        let mut counts = *table.counts();
        counts[1] = 0; // item 1 is gone
        counts[7] = 4; // item 7 is new
        let order = rebuild_order(table.order(), &counts).unwrap();
        // Item 1's slot was freed and immediately reused for item 7.
        assert_eq!(order[0], 7);
        assert_eq!(order[1], 2);
        assert!(ids_unique(&order));
        // The order/amount pairing invariant holds across the rebuild.
        for (i, &slot) in order.iter().enumerate() {
            let amount = if slot == EMPTY_ITEM { 0 } else { counts[slot as usize] };
            assert_eq!(slot != EMPTY_ITEM, amount > 0, "slot {i}");
        }
    }

    #[test]
    fn rebuild_order_handles_a_full_wipe() {
        let table = ItemTable::from_slots(&slots(&[(1, 5), (2, 3), (9, 1)]));
        let counts = [0u8; INVENTORY_SLOTS];
        let order = rebuild_order(table.order(), &counts).unwrap();
        assert!(order.iter().all(|&slot| slot == EMPTY_ITEM));
    }

    #[test]
    fn field_image_round_trips_through_field_slots() {
        let table = ItemTable::from_slots(&slots(&[(3, 9), (200, 1)]));
        let image = field_image(table.order(), table.counts());
        let reread = ItemTable::from_slots(&field_slots(&image).unwrap());
        assert!(table.same_counts(&reread));
        assert_eq!(table.order(), reread.order());
    }

    #[test]
    fn splice_battle_preserves_opaque_bytes() {
        let mut raw = vec![0u8; BATTLE_REGION_LEN];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        let opaque: Vec<u8> = raw.clone();
        let table = ItemTable::from_slots(&slots(&[(4, 2)]));
        splice_battle(&mut raw, table.order(), table.counts());

        for i in 0..INVENTORY_SLOTS {
            let base = i * BATTLE_RECORD_LEN;
            assert_eq!(raw[base + 1], opaque[base + 1]);
            assert_eq!(raw[base + 2], opaque[base + 2]);
            assert_eq!(raw[base + 4], opaque[base + 4]);
        }
        let reread = ItemTable::from_slots(&battle_slots(&raw).unwrap());
        assert!(table.same_counts(&reread));
    }

    #[test]
    fn region_views_reject_wrong_lengths() {
        assert!(field_slots(&[0u8; 100]).is_err());
        assert!(battle_slots(&[0u8; 512]).is_err());
    }
}
