//! Layout constants for the synchronized RAM regions and the wire protocol.

/// Dense item identifier space: ids are a single byte.
pub const INVENTORY_SLOTS: usize = 256;

/// Sentinel id marking an unused inventory slot. Never a real item.
pub const EMPTY_ITEM: u8 = 0xFF;

/// The game caps every stack at 99.
pub const MAX_ITEM_COUNT: u8 = 99;

/// Field inventory: 256 slot ids followed by 256 per-slot amounts.
pub const FIELD_REGION_LEN: usize = 512;

/// Battle inventory: 256 records of 5 bytes. Byte 0 is the id, byte 3 the
/// amount; bytes 1, 2 and 4 are engine-internal and must survive a write.
pub const BATTLE_RECORD_LEN: usize = 5;
pub const BATTLE_REGION_LEN: usize = INVENTORY_SLOTS * BATTLE_RECORD_LEN;
pub const BATTLE_COUNT_OFFSET: usize = 3;

/// Four battle characters, two presence bytes each. `FF FF` means the slot
/// holds no combatant and its status is undefined.
pub const PARTY_SIZE: usize = 4;
pub const PRESENCE_REGION_LEN: usize = 8;

/// Each status region carries one 16-bit half of every character's flag word.
pub const STATUS_REGION_LEN: usize = 8;

pub const CHEST_MASK_LEN: usize = 64;
pub const GP_LEN: usize = 3;
pub const PLAYED_TIME_LEN: usize = 4;
pub const FRAMES_PER_SECOND: u64 = 60;

/// Played-time value that suppresses delta emission until the next SYNC
/// re-anchors the baseline.
pub const PLAYED_TIME_POISON: u64 = u64::MAX;

/// Datagrams must stay strictly below this size, compressed or not.
pub const MAX_DATAGRAM: usize = 4096;

/// First byte of a gzip-wrapped datagram.
pub const GZIP_MARKER: u8 = b'!';

/// Some emulator builds silently truncate long WRITE_CORE_RAM payloads, so
/// every write is fragmented into commands of at most this many bytes.
pub const WRITE_CHUNK: usize = 4;

/// Factory button mapping, used by the startup RAM round-trip check.
pub const BUTTON_MAP_DEFAULT: [u8; 4] = [0x12, 0x34, 0x56, 0x06];
pub const BUTTON_MAP_PROBE: [u8; 4] = [0x12, 0x34, 0x56, 0xF6];
