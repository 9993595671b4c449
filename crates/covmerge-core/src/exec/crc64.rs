//! Class identifiers.
//!
//! The collection agents identify a class by a CRC-64 (ISO 3309 polynomial,
//! reflected, zero initial value) over its class-file bytes. Execution data
//! recorded for one build of a class therefore never matches a recompiled
//! class with different bytes.

const POLY: u64 = 0xD800_0000_0000_0000;

/// Class file major version of Java 9.
const V9: u8 = 53;

const TABLE: [u64; 256] = build_table();

const fn build_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut h = i as u64;
        let mut j = 0;
        while j < 8 {
            if h & 1 == 1 {
                h = (h >> 1) ^ POLY;
            } else {
                h >>= 1;
            }
            j += 1;
        }
        table[i] = h;
        i += 1;
    }
    table
}

fn update(sum: u64, byte: u8) -> u64 {
    let idx = ((sum as u8) ^ byte) as usize;
    (sum >> 8) ^ TABLE[idx]
}

fn update_all(sum: u64, bytes: &[u8]) -> u64 {
    bytes.iter().fold(sum, |acc, b| update(acc, *b))
}

/// Compute the class identifier for raw class-file bytes.
///
/// Class files targeting Java 9 or later are hashed with their major version
/// lowered by one, matching the identifiers the agents have always written.
pub fn class_id(bytes: &[u8]) -> u64 {
    if bytes.len() > 7 && bytes[6] == 0x00 && bytes[7] >= V9 {
        let sum = update_all(0, &bytes[..7]);
        let sum = update(sum, bytes[7] - 1);
        return update_all(sum, &bytes[8..]);
    }
    update_all(0, bytes)
}
