//! System-information captures and the neighbor-cell bitmap decoder.
//!
//! SI2 carries the "cell channel description": a 16-octet bitmap in which
//! bit position i (counted 1..=124 from the least-significant end) marks
//! ARFCN i as a neighbor of the broadcasting cell. Only the primary GSM 900
//! band format is implemented; the extended/1800 formats are not.

use serde::{Deserialize, Serialize};

/// GSM band a station broadcasts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Band {
    #[default]
    Gsm900,
    Gsm1800,
}

/// Raw system-information lines captured from the scanner, unparsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub si1: String,
    pub si2: String,
    pub si2bis: String,
    pub si2ter: String,
    pub si3: String,
    pub si4: String,
    /// The neighbor-bitmap octets as a space-separated hex line.
    pub neighbour_bitmap: String,
}

/// Number of valid bit positions in the cell channel description.
const BITMAP_POSITIONS: u16 = 124;
/// Octets of the bitmap proper.
const BITMAP_OCTETS: usize = 16;
/// Offset of the bitmap inside a full SI2 capture (header octets precede it).
const BITMAP_OFFSET: usize = 3;

/// Decode the neighbor ARFCN set from a hex-octet line.
///
/// Accepts either a full SI2 capture (bitmap at octets 3..19) or the bare
/// 16-octet bitmap. Unparseable octets and unsupported bands yield an empty
/// set rather than an error; the sweep parser treats that as "no neighbors
/// decoded".
pub fn decode_neighbours(line: &str, band: Band) -> Vec<u16> {
    if band != Band::Gsm900 {
        return Vec::new();
    }

    let octets: Vec<&str> = line.split_whitespace().collect();
    let window: &[&str] = if octets.len() >= BITMAP_OFFSET + BITMAP_OCTETS {
        &octets[BITMAP_OFFSET..BITMAP_OFFSET + BITMAP_OCTETS]
    } else if octets.len() >= BITMAP_OCTETS {
        &octets[..BITMAP_OCTETS]
    } else {
        return Vec::new();
    };

    let mut bitmap: u128 = 0;
    for octet in window {
        let Ok(value) = u8::from_str_radix(octet, 16) else {
            return Vec::new();
        };
        bitmap = (bitmap << 8) | value as u128;
    }

    let mut neighbours = Vec::new();
    for position in 1..=BITMAP_POSITIONS {
        if bitmap >> (position - 1) & 1 == 1 {
            neighbours.push(position);
        }
    }
    neighbours
}

/// Encode a neighbor set back into a bare 16-octet bitmap line.
///
/// Inverse of [`decode_neighbours`] for valid positions; used by fixtures.
pub fn encode_neighbours(neighbours: &[u16]) -> String {
    let mut bitmap: u128 = 0;
    for &arfcn in neighbours {
        if (1..=BITMAP_POSITIONS).contains(&arfcn) {
            bitmap |= 1 << (arfcn - 1);
        }
    }
    let octets: Vec<String> = (0..BITMAP_OCTETS)
        .map(|i| {
            let shift = 8 * (BITMAP_OCTETS - 1 - i);
            format!("{:02x}", (bitmap >> shift) as u8)
        })
        .collect();
    octets.join(" ")
}
