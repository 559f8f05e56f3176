//! One tick's worth of raw RAM, captured before anything is derived from it.

use tandem_core::constants::{
    BATTLE_REGION_LEN, CHEST_MASK_LEN, FIELD_REGION_LEN, FRAMES_PER_SECOND, GP_LEN,
    PLAYED_TIME_LEN, PRESENCE_REGION_LEN, STATUS_REGION_LEN,
};
use tandem_core::error::SyncError;
use tandem_core::inventory::{self, Slot};

use crate::emulator::MemoryBus;
use crate::settings::Settings;

pub struct RamSample {
    /// Save age in frames, already corrected for the off-by-one counter.
    pub played_time: u64,
    pub field_raw: Vec<u8>,
    pub battle_raw: Vec<u8>,
    pub presence: Vec<u8>,
    pub status_low: Vec<u8>,
    pub status_high: Vec<u8>,
    pub chest_mask: Vec<u8>,
    pub gp: u32,
}

impl RamSample {
    /// Read every synchronized region in a fixed order. A timeout on any of
    /// them aborts the whole sample.
    pub fn capture(bus: &mut dyn MemoryBus, settings: &Settings) -> Result<RamSample, SyncError> {
        let played_raw = bus.read(settings.played_time_address, PLAYED_TIME_LEN)?;
        let field_raw = bus.read(settings.field_item_address, FIELD_REGION_LEN)?;
        let battle_raw = bus.read(settings.battle_item_address, BATTLE_REGION_LEN)?;
        let presence = bus.read(settings.battle_char_address, PRESENCE_REGION_LEN)?;
        let status_low = bus.read(settings.status_1_address, STATUS_REGION_LEN)?;
        let status_high = bus.read(settings.status_2_address, STATUS_REGION_LEN)?;
        let chest_mask = bus.read(settings.chest_address, CHEST_MASK_LEN)?;
        let gp_raw = bus.read(settings.gp_address, GP_LEN)?;

        Ok(RamSample {
            played_time: decode_played_time(&played_raw)?,
            field_raw,
            battle_raw,
            presence,
            status_low,
            status_high,
            chest_mask,
            gp: decode_gp(&gp_raw),
        })
    }

    pub fn field_slots(&self) -> Result<Vec<Slot>, SyncError> {
        inventory::field_slots(&self.field_raw)
    }

    pub fn battle_slots(&self) -> Result<Vec<Slot>, SyncError> {
        inventory::battle_slots(&self.battle_raw)
    }
}

/// Decode hours/minutes/seconds/frames into total frames. The frame byte
/// reads one ahead of the displayed value and has to be corrected first.
pub fn decode_played_time(raw: &[u8]) -> Result<u64, SyncError> {
    let [hours, minutes, seconds, frames]: [u8; PLAYED_TIME_LEN] = raw
        .try_into()
        .map_err(|_| SyncError::EmulatorReadError("short played-time read".to_string()))?;

    let frames = i64::from(frames) - 1;
    if !(0..FRAMES_PER_SECOND as i64).contains(&frames) {
        return Err(SyncError::EmulatorReadError(format!(
            "frame counter out of range: {frames}"
        )));
    }

    Ok(frames as u64
        + FRAMES_PER_SECOND
            * (u64::from(seconds)
                + 60 * (u64::from(minutes) + 60 * u64::from(hours))))
}

/// GP is a 24-bit little-endian integer.
pub fn decode_gp(raw: &[u8]) -> u32 {
    u32::from(raw[0]) | u32::from(raw[1]) << 8 | u32::from(raw[2]) << 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn played_time_subtracts_the_phantom_frame() {
        // 1h 02m 03s, frame byte 11 -> 10 real frames.
        let total = decode_played_time(&[1, 2, 3, 11]).unwrap();
        assert_eq!(total, 10 + 60 * (3 + 60 * (2 + 60 * 1)));
    }

    #[test]
    fn played_time_zero_frames_reads_back_as_59() {
        let total = decode_played_time(&[0, 0, 1, 60]).unwrap();
        assert_eq!(total, 59 + 60);
    }

    #[test]
    fn frame_byte_zero_is_out_of_range() {
        assert!(decode_played_time(&[0, 0, 0, 0]).is_err());
        assert!(decode_played_time(&[0, 0, 0, 61]).is_err());
    }

    #[test]
    fn gp_is_24_bit_little_endian() {
        assert_eq!(decode_gp(&[0x40, 0xE2, 0x01]), 123456);
        assert_eq!(decode_gp(&[0xFF, 0xFF, 0xFF]), 0x00FF_FFFF);
    }
}
