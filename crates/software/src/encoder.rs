//! Octave shifting driven by the rotary encoder.
//!
//! Detents arrive from the encoder task between ticks and accumulate until
//! the engine drains them. A shift changes only the notes of subsequent
//! strikes; keys already sounding keep the note number they latched, and no
//! MIDI is emitted for the shift itself.

use crate::configuration::{BASE_NOTE, OCTAVE_RANGE};
use wmidi::{Note, U7};

/// Accumulates encoder detents into a clamped octave offset.
#[derive(Clone, Copy, Debug, Default)]
pub struct OctaveShift {
    offset: i8,
    pending: i8,
}

impl OctaveShift {
    /// Constructs a shift centred on the base octave.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues detents reported by the encoder peripheral.
    pub fn add(&mut self, detents: i8) {
        self.pending = self.pending.saturating_add(detents);
    }

    /// Applies queued detents, clamping to the supported range.
    ///
    /// Returns `true` when the offset actually changed.
    pub fn drain(&mut self) -> bool {
        if self.pending == 0 {
            return false;
        }
        let target = (self.offset + self.pending).clamp(-OCTAVE_RANGE, OCTAVE_RANGE);
        self.pending = 0;
        if target == self.offset {
            return false;
        }
        #[cfg(feature = "defmt")]
        defmt::info!("octave shift: {} -> {}", self.offset, target);
        self.offset = target;
        true
    }

    /// Current octave offset.
    pub fn offset(&self) -> i8 {
        self.offset
    }

    /// Returns to the centre octave, dropping queued detents.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.pending = 0;
    }

    /// Note a key strikes at the current offset.
    pub fn note_for_key(&self, key: usize) -> Note {
        let note = BASE_NOTE as i16 + self.offset as i16 * 12 + key as i16;
        Note::from(U7::from_u8_lossy(note.clamp(0, 127) as u8))
    }
}
