//! Decides which inventory view the game is actually playing out of.

use tandem_core::error::SyncError;
use tandem_core::inventory::{self, ItemTable, Slot};

use crate::emulator::MemoryBus;

/// The authoritative view for this tick.
pub struct CombatView {
    pub in_battle: bool,
    pub similarity: f64,
    pub table: ItemTable,
}

/// The battle engine mirrors the field inventory while combat is active, so
/// near-identical views mean we are in combat and the battle copy is the one
/// the player is mutating.
pub fn classify(field: &[Slot], battle: &[Slot], threshold: f64) -> CombatView {
    let similarity = inventory::similarity(field, battle);
    let in_battle = similarity > threshold;
    let table = if in_battle {
        ItemTable::from_slots(battle)
    } else {
        ItemTable::from_slots(field)
    };
    CombatView {
        in_battle,
        similarity,
        table,
    }
}

/// Push the battle view over the field region so a battle ending this
/// instant cannot roll items back. The engine does not read the field region
/// during combat, so this write needs no pause bracket.
pub fn copy_battle_to_field(
    bus: &mut dyn MemoryBus,
    field_address: u32,
    table: &ItemTable,
) -> Result<(), SyncError> {
    let image = inventory::field_image(table.order(), table.counts());
    bus.write(field_address, &image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::constants::{EMPTY_ITEM, INVENTORY_SLOTS};

    fn slots(pairs: &[(u8, u8)]) -> Vec<Slot> {
        let mut out: Vec<Slot> = pairs
            .iter()
            .map(|&(item, count)| Slot { item, count })
            .collect();
        out.resize(INVENTORY_SLOTS, Slot { item: EMPTY_ITEM, count: 0 });
        out
    }

    #[test]
    fn one_amount_apart_still_reads_as_combat() {
        // Field says 5 of item 1, battle says 7: 511 of 512 points agree.
        let view = classify(&slots(&[(1, 5)]), &slots(&[(1, 7)]), 0.95);
        assert!(view.in_battle);
        assert!(view.similarity > 0.95 && view.similarity < 1.0);
        // The battle copy wins.
        assert_eq!(view.table.count(1), 7);
    }

    #[test]
    fn disagreeing_views_mean_field_play() {
        let field = slots(&[(1, 5), (2, 2), (3, 9)]);
        let mut battle = Vec::new();
        for i in 0..INVENTORY_SLOTS as u16 {
            battle.push(Slot { item: (i % 128) as u8, count: 1 });
        }
        let view = classify(&field, &battle, 0.95);
        assert!(!view.in_battle);
        assert_eq!(view.table.count(1), 5);
    }

    #[test]
    fn identical_views_need_no_eager_copy() {
        let view = classify(&slots(&[(1, 5)]), &slots(&[(1, 5)]), 0.95);
        assert!(view.in_battle);
        assert_eq!(view.similarity, 1.0);
    }
}
