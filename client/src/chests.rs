//! Treasure-chest flags. A chest opened by anyone stays open everywhere, so
//! the merge is a plain bitwise OR and the mask only ever grows.

use tandem_core::error::SyncError;

use crate::emulator::MemoryBus;

pub fn merge(local: &[u8], incoming: &[u8]) -> Vec<u8> {
    local
        .iter()
        .zip(incoming.iter())
        .map(|(&a, &b)| a | b)
        .collect()
}

pub fn write_mask(bus: &mut dyn MemoryBus, address: u32, mask: &[u8]) -> Result<(), SyncError> {
    bus.write(address, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::constants::CHEST_MASK_LEN;

    #[test]
    fn merge_is_a_bitwise_or() {
        let local = vec![0b0011, 0b1000];
        let incoming = vec![0b0101, 0b0000];
        assert_eq!(merge(&local, &incoming), vec![0b0111, 0b1000]);
    }

    #[test]
    fn merge_never_closes_a_chest() {
        let local: Vec<u8> = (0..CHEST_MASK_LEN as u8).collect();
        let incoming = vec![0u8; CHEST_MASK_LEN];
        let merged = merge(&local, &incoming);
        for (before, after) in local.iter().zip(merged.iter()) {
            assert_eq!(after & before, *before);
        }
        assert_eq!(merged, local);
    }
}
