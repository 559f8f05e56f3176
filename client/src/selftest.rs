//! Startup probe: prove RAM reads and writes actually round-trip before
//! trusting the emulator with inventory surgery.

use std::thread;
use std::time::Duration;

use tandem_core::constants::{BUTTON_MAP_DEFAULT, BUTTON_MAP_PROBE};
use tandem_core::error::SyncError;

use crate::emulator::MemoryBus;

/// Read the button-map region, perturb it under a pause bracket, read it
/// back and restore it. Returns whether the round-trip worked; failure is
/// loud but not fatal.
pub fn run(
    bus: &mut dyn MemoryBus,
    address: u32,
    pause_delay: Duration,
) -> Result<bool, SyncError> {
    let original = bus.read(address, BUTTON_MAP_DEFAULT.len())?;
    if original != BUTTON_MAP_DEFAULT {
        log::warn!(
            "button map at {address:06x} reads {original:02X?}, expected {:02X?}; \
             is the right game loaded with default controls?",
            BUTTON_MAP_DEFAULT
        );
        return Ok(false);
    }

    bus.frame_advance()?;
    if !pause_delay.is_zero() {
        thread::sleep(pause_delay);
    }

    let probe_result = probe(bus, address);

    // Restore and resume no matter how the probe went.
    let restored = bus.write(address, &original);
    let resumed = bus.pause_toggle();
    let verified = probe_result?;
    restored?;
    resumed?;

    if verified {
        log::info!("emulator RAM round-trip check passed");
    } else {
        log::warn!(
            "RAM write probe at {address:06x} did not read back; \
             writes may be blocked or truncated by this emulator build"
        );
    }
    Ok(verified)
}

fn probe(bus: &mut dyn MemoryBus, address: u32) -> Result<bool, SyncError> {
    bus.write(address, &BUTTON_MAP_PROBE)?;
    let read_back = bus.read(address, BUTTON_MAP_PROBE.len())?;
    Ok(read_back == BUTTON_MAP_PROBE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FlatRam {
        cells: HashMap<u32, u8>,
        ignore_writes: bool,
    }

    impl FlatRam {
        fn with_button_map(bytes: &[u8]) -> FlatRam {
            let mut cells = HashMap::new();
            for (i, &byte) in bytes.iter().enumerate() {
                cells.insert(0x1d50 + i as u32, byte);
            }
            FlatRam { cells, ignore_writes: false }
        }
    }

    impl MemoryBus for FlatRam {
        fn read(&mut self, address: u32, count: usize) -> Result<Vec<u8>, SyncError> {
            Ok((0..count)
                .map(|i| *self.cells.get(&(address + i as u32)).unwrap_or(&0))
                .collect())
        }
        fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), SyncError> {
            if self.ignore_writes {
                return Ok(());
            }
            for (i, &byte) in bytes.iter().enumerate() {
                self.cells.insert(address + i as u32, byte);
            }
            Ok(())
        }
        fn frame_advance(&mut self) -> Result<(), SyncError> {
            Ok(())
        }
        fn pause_toggle(&mut self) -> Result<(), SyncError> {
            Ok(())
        }
    }

    #[test]
    fn healthy_emulator_passes_and_is_restored() {
        let mut ram = FlatRam::with_button_map(&BUTTON_MAP_DEFAULT);
        assert!(run(&mut ram, 0x1d50, Duration::ZERO).unwrap());
        assert_eq!(
            ram.read(0x1d50, 4).unwrap(),
            BUTTON_MAP_DEFAULT.to_vec(),
            "the original bytes must be restored"
        );
    }

    #[test]
    fn unexpected_button_map_fails_without_writing() {
        let mut ram = FlatRam::with_button_map(&[9, 9, 9, 9]);
        assert!(!run(&mut ram, 0x1d50, Duration::ZERO).unwrap());
        assert_eq!(ram.read(0x1d50, 4).unwrap(), vec![9, 9, 9, 9]);
    }

    #[test]
    fn swallowed_writes_fail_the_probe() {
        let mut ram = FlatRam::with_button_map(&BUTTON_MAP_DEFAULT);
        ram.ignore_writes = true;
        assert!(!run(&mut ram, 0x1d50, Duration::ZERO).unwrap());
    }
}
