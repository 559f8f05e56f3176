//! Writes a merged inventory back into live RAM without tearing it.
//!
//! Pausing the emulator is advisory at best, so the committer never trusts
//! it: the region is re-read against the sampler's snapshot both before and
//! inside the pause bracket, and any drift aborts the write.

use std::thread;
use std::time::Duration;

use tandem_core::constants::{BATTLE_REGION_LEN, FIELD_REGION_LEN, INVENTORY_SLOTS};
use tandem_core::error::SyncError;
use tandem_core::inventory::{self, ItemTable};

use crate::emulator::MemoryBus;

/// Where and how the committer operates this tick.
pub struct CommitContext<'a> {
    pub field_address: u32,
    pub battle_address: u32,
    pub in_battle: bool,
    /// The raw bytes backing the view the target was computed from.
    pub snapshot: &'a [u8],
    /// Zero skips the pause bracket entirely.
    pub pause_delay: Duration,
    pub debug_verify: bool,
}

/// Commit `target` into RAM. Returns the table actually written so the
/// caller can adopt it as the new baseline.
pub fn commit(
    bus: &mut dyn MemoryBus,
    ctx: &CommitContext,
    current: &ItemTable,
    target: &[i64; INVENTORY_SLOTS],
) -> Result<ItemTable, SyncError> {
    let counts = inventory::clamp_counts(target);

    // The merge landed exactly on what the game already holds: adopt it
    // without touching RAM.
    if counts == *current.counts() {
        return Ok(ItemTable::from_parts(*current.order(), counts));
    }

    let order = inventory::rebuild_order(current.order(), &counts)?;

    let (region_address, region_len) = if ctx.in_battle {
        (ctx.battle_address, BATTLE_REGION_LEN)
    } else {
        (ctx.field_address, FIELD_REGION_LEN)
    };

    // First guard: has the region moved since the sample?
    if bus.read(region_address, region_len)? != ctx.snapshot {
        return Err(SyncError::RaceCondition);
    }

    let pausing = !ctx.pause_delay.is_zero();
    if pausing {
        bus.frame_advance()?;
        thread::sleep(ctx.pause_delay);
    }

    // Second guard: the pause is advisory, so check once more inside it.
    if bus.read(region_address, region_len)? != ctx.snapshot {
        if pausing {
            bus.pause_toggle()?;
        }
        return Err(SyncError::RaceCondition);
    }

    let written = write_views(bus, ctx, &order, &counts);

    if pausing {
        let resumed = bus.pause_toggle();
        written?;
        resumed?;
    } else {
        written?;
    }

    if ctx.debug_verify {
        match bus.read(ctx.field_address, FIELD_REGION_LEN) {
            Ok(actual) => {
                let wanted = inventory::field_image(&order, &counts);
                if actual != wanted {
                    log::warn!("field region readback differs from the committed image");
                }
            }
            Err(e) => log::warn!("post-commit readback failed: {e}"),
        }
    }

    Ok(ItemTable::from_parts(order, counts))
}

fn write_views(
    bus: &mut dyn MemoryBus,
    ctx: &CommitContext,
    order: &[u8; INVENTORY_SLOTS],
    counts: &[u8; INVENTORY_SLOTS],
) -> Result<(), SyncError> {
    if ctx.in_battle {
        let mut raw = bus.read(ctx.battle_address, BATTLE_REGION_LEN)?;
        inventory::splice_battle(&mut raw, order, counts);
        bus.write(ctx.battle_address, &raw)?;
    }
    // The field region is written whether or not combat is active.
    bus.write(ctx.field_address, &inventory::field_image(order, counts))?;
    Ok(())
}
