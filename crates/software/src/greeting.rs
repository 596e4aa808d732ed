//! The boot chime.
//!
//! After announcing its MPE configuration the controller plays a short
//! rising arpeggio so a connected synth (and the person at the keys) can
//! hear the link is alive. The chime runs before the keybed goes live, so
//! it sounds on the first member channel without touching the allocator.

use crate::configuration::{CC_TIMBRE, TIMBRE_CENTER};
use crate::midi::{self, Frame};
use wmidi::{Channel, Note};

/// Channel the chime sounds on.
const CHIME_CHANNEL: Channel = Channel::Ch2;

/// Pressure sent while a chime note rings.
const CHIME_PRESSURE: u8 = 96;

/// One note of the chime.
#[derive(Clone, Copy, Debug)]
pub struct GreetingStep {
    /// The note to sound.
    pub note: Note,
    /// Strike velocity.
    pub velocity: u8,
    /// How long the note rings.
    pub hold_ms: u64,
    /// Silence before the next note.
    pub gap_ms: u64,
}

/// The boot chime, quiet to loud up a major chord.
pub const SEQUENCE: [GreetingStep; 4] = [
    GreetingStep {
        note: Note::C4,
        velocity: 76,
        hold_ms: 200,
        gap_ms: 50,
    },
    GreetingStep {
        note: Note::E4,
        velocity: 88,
        hold_ms: 200,
        gap_ms: 50,
    },
    GreetingStep {
        note: Note::G4,
        velocity: 101,
        hold_ms: 200,
        gap_ms: 50,
    },
    GreetingStep {
        note: Note::C5,
        velocity: 114,
        hold_ms: 400,
        gap_ms: 50,
    },
];

/// Frames starting one chime note, per-note state ahead of the Note-On.
pub fn note_on_frames(step: &GreetingStep) -> [Frame; 4] {
    [
        midi::control_change(CHIME_CHANNEL, CC_TIMBRE, TIMBRE_CENTER),
        midi::channel_pressure(CHIME_CHANNEL, CHIME_PRESSURE),
        midi::pitch_bend_center(CHIME_CHANNEL),
        midi::note_on(CHIME_CHANNEL, step.note, step.velocity),
    ]
}

/// Frames ending one chime note.
pub fn note_off_frames(step: &GreetingStep) -> [Frame; 2] {
    [
        midi::channel_pressure(CHIME_CHANNEL, 0),
        midi::note_off(CHIME_CHANNEL, step.note, 0),
    ]
}
