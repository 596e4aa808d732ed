//! Continuous-control processing.
//!
//! Each pot is low-pass filtered, quantised to 7 bits, and reported as a
//! control change on the manager channel. A value goes out only when the
//! quantised reading repeats on two consecutive scans and clears the
//! dead-band against the last reported value, so converter noise never
//! reaches the wire.

use crate::configuration::{DEFAULT_CC_MAP, NUM_POTS, POT_DEADBAND};

/// A control change a pot wants on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PotUpdate {
    /// Controller number the pot is mapped to.
    pub cc: u8,
    /// New 7-bit value.
    pub value: u8,
}

#[derive(Clone, Copy, Default)]
struct Pot {
    smoothed: u16,
    candidate: u8,
    cc_number: u8,
    emitted: Option<u8>,
}

/// The fourteen pot state machines.
pub struct PotBank {
    pots: [Pot; NUM_POTS],
}

impl Default for PotBank {
    fn default() -> Self {
        Self::new()
    }
}

impl PotBank {
    /// Constructs the bank with the factory controller map.
    pub fn new() -> Self {
        let mut pots = [Pot::default(); NUM_POTS];
        for (pot, cc) in pots.iter_mut().zip(DEFAULT_CC_MAP) {
            pot.cc_number = cc;
        }
        Self { pots }
    }

    /// Feeds one scan's raw reading to a pot.
    ///
    /// The filter is `smoothed += (raw - smoothed) * 3/4`, which settles a
    /// step within three 20 ms scans.
    pub fn step(&mut self, index: usize, raw: u16) -> Option<PotUpdate> {
        let pot = &mut self.pots[index];
        let smoothed = pot.smoothed as i32;
        pot.smoothed = (smoothed + (raw as i32 - smoothed) * 3 / 4) as u16;
        let candidate = (pot.smoothed >> 5).min(127) as u8;
        let agreed = candidate == pot.candidate;
        pot.candidate = candidate;
        if !agreed {
            return None;
        }
        match pot.emitted {
            Some(previous)
                if (candidate as i16 - previous as i16).unsigned_abs()
                    < POT_DEADBAND as u16 =>
            {
                None
            }
            _ => {
                pot.emitted = Some(candidate);
                Some(PotUpdate {
                    cc: pot.cc_number,
                    value: candidate,
                })
            }
        }
    }

    /// Points a pot at a different controller number.
    ///
    /// The emission latch clears so the pot's current value goes out on the
    /// new controller at the next scan.
    pub fn remap(&mut self, index: usize, cc: u8) {
        let pot = &mut self.pots[index];
        pot.cc_number = cc;
        pot.emitted = None;
        #[cfg(feature = "defmt")]
        defmt::info!("pot {} mapped to CC {}", index, cc);
    }

    /// Clears every emission latch so all current values are re-sent.
    ///
    /// Run on a fresh handshake so the host learns the control surface.
    pub fn force_resend(&mut self) {
        for pot in &mut self.pots {
            pot.emitted = None;
        }
    }

    /// Controller number a pot is currently mapped to.
    pub fn cc_number(&self, index: usize) -> u8 {
        self.pots[index].cc_number
    }
}
