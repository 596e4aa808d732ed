//! Logical addressing of the analog front end.
//!
//! The board routes fifty key sensors and fourteen pots through three
//! multiplexer trees into the converter. The engine only speaks in terms of
//! [`Descriptor`]s; the firmware resolves a descriptor to select-line levels
//! and performs the read, honouring the settle delay in
//! [`configuration::MUX_SETTLE_US`](crate::configuration::MUX_SETTLE_US).

use crate::configuration::{NUM_KEYS, NUM_POTS};

/// One of the three multiplexer trees feeding the converter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MuxId {
    /// Tree carrying the lower half of the keybed.
    KeybedA,
    /// Tree carrying the upper half of the keybed.
    KeybedB,
    /// Single-level mux carrying the pots.
    Controls,
}

/// Which of the two pressure points of a key is addressed.
///
/// Depressing a key crosses the break point first, then the bottom-out
/// point; velocity derives from the interval between the two crossings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PressurePoint {
    /// The sensor at the key's rest-break position.
    Break,
    /// The sensor at the key's bottom-out position.
    Bottom,
}

/// Addresses one analog input of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Descriptor {
    /// The multiplexer tree to select.
    pub mux: MuxId,
    /// The channel within that tree.
    pub channel: u8,
}

/// Synchronous source of raw 12-bit converter readings.
pub trait SampleSource {
    /// Returns the latest reading for the addressed input, in 0..=4095.
    fn read(&mut self, descriptor: Descriptor) -> u16;
}

/// Keys served by the first keybed tree; the rest sit on the second.
const KEYBED_A_KEYS: usize = 13;

/// Descriptor for one pressure point of a key.
///
/// Key indices run left to right; each key occupies two adjacent channels of
/// its tree, break point on the even channel.
pub fn key_descriptor(key: usize, point: PressurePoint) -> Descriptor {
    debug_assert!(key < NUM_KEYS);
    let offset = match point {
        PressurePoint::Break => 0,
        PressurePoint::Bottom => 1,
    };
    if key < KEYBED_A_KEYS {
        Descriptor {
            mux: MuxId::KeybedA,
            channel: (key * 2 + offset) as u8,
        }
    } else {
        Descriptor {
            mux: MuxId::KeybedB,
            channel: ((key - KEYBED_A_KEYS) * 2 + offset) as u8,
        }
    }
}

/// Descriptor for a continuous control.
pub fn pot_descriptor(pot: usize) -> Descriptor {
    debug_assert!(pot < NUM_POTS);
    Descriptor {
        mux: MuxId::Controls,
        channel: pot as u8,
    }
}
