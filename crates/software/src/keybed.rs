//! Dual-phase key detection.
//!
//! Each key carries two pressure sensors: one at the rest-break position
//! (point A) and one at the bottom-out position (point B). A press crosses A
//! first, then B; the interval between the two crossings yields the strike
//! velocity, and the bottom sensor yields continuous pressure while the key
//! is held.
//!
//! The per-key state machine is stepped in three passes per scan so that all
//! note-offs of a scan precede its note-ons, which the channel allocator
//! depends on. Each key makes at most one phase transition per scan.

use crate::configuration::{
    ADC_MAX, NUM_KEYS, PRESSURE_DEADBAND, THRESHOLD_OFF, THRESHOLD_ON, VELOCITY_CEILING_MS,
    VELOCITY_SCALE, VELOCITY_SLOW_DEFAULT,
};
use wmidi::{Channel, Note};

/// Consecutive scans the bottom sensor must read below [`THRESHOLD_OFF`]
/// before a held key releases. Filters single-sample glitches.
const RELEASE_AGREEMENT_SCANS: u8 = 2;

/// Phase of one key's press cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyPhase {
    /// At rest; neither sensor crossed.
    Idle,
    /// The break point has crossed; waiting for bottom-out.
    Rising,
    /// Sounding; bound to a member channel.
    Held,
    /// Note-off sent; waiting for the break point to clear.
    Releasing,
}

/// The two raw readings of one key taken in a single scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeySamples {
    /// Reading of the rest-break sensor (point A).
    pub break_point: u16,
    /// Reading of the bottom-out sensor (point B).
    pub bottom: u16,
}

/// A key that has just completed its second crossing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Strike {
    /// 7-bit strike velocity derived from the crossing interval.
    pub velocity: u8,
}

/// The channel and note a sounding key is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    /// Member channel carrying the note.
    pub channel: Channel,
    /// Note number latched at note-on.
    pub note: Note,
}

#[derive(Clone, Copy)]
struct Key {
    phase: KeyPhase,
    sample_a: u16,
    sample_b: u16,
    channel: Option<Channel>,
    note: Option<Note>,
    rising_since: u64,
    emitted_pressure: u8,
    low_bottom_scans: u8,
    moved: bool,
}

impl Default for Key {
    fn default() -> Self {
        Self {
            phase: KeyPhase::Idle,
            sample_a: 0,
            sample_b: 0,
            channel: None,
            note: None,
            rising_since: 0,
            emitted_pressure: 0,
            low_bottom_scans: 0,
            moved: false,
        }
    }
}

/// The 25 key state machines.
pub struct Keybed {
    keys: [Key; NUM_KEYS],
}

impl Default for Keybed {
    fn default() -> Self {
        Self::new()
    }
}

impl Keybed {
    /// Constructs a keybed with every key at rest.
    pub fn new() -> Self {
        Self {
            keys: [Key::default(); NUM_KEYS],
        }
    }

    /// Latches this scan's readings and clears the per-scan transition marks.
    pub fn begin_scan(&mut self, samples: &[KeySamples; NUM_KEYS]) {
        for (key, sample) in self.keys.iter_mut().zip(samples) {
            key.sample_a = sample.break_point;
            key.sample_b = sample.bottom;
            key.moved = false;
        }
    }

    /// Steps the release half of one key's state machine.
    ///
    /// Returns the binding to send a Note-Off for when the key leaves `Held`.
    /// Run for every key before any strike step of the same scan.
    pub fn step_release(&mut self, index: usize) -> Option<Binding> {
        let key = &mut self.keys[index];
        if key.moved {
            return None;
        }
        match key.phase {
            KeyPhase::Held => {
                if key.sample_b < THRESHOLD_OFF {
                    key.low_bottom_scans += 1;
                    if key.low_bottom_scans >= RELEASE_AGREEMENT_SCANS {
                        key.phase = KeyPhase::Releasing;
                        key.moved = true;
                        let binding = match (key.channel.take(), key.note) {
                            (Some(channel), Some(note)) => Some(Binding { channel, note }),
                            _ => None,
                        };
                        #[cfg(feature = "defmt")]
                        defmt::info!("key {} released", index);
                        return binding;
                    }
                } else {
                    key.low_bottom_scans = 0;
                }
                None
            }
            KeyPhase::Releasing => {
                if key.sample_a < THRESHOLD_OFF {
                    key.phase = KeyPhase::Idle;
                    key.moved = true;
                    key.note = None;
                }
                None
            }
            _ => None,
        }
    }

    /// Steps the strike half of one key's state machine.
    ///
    /// `now` is the scan timestamp in milliseconds; it anchors the crossing
    /// interval the velocity derives from.
    pub fn step_strike(&mut self, index: usize, now: u64) -> Option<Strike> {
        let key = &mut self.keys[index];
        if key.moved {
            return None;
        }
        match key.phase {
            KeyPhase::Idle => {
                if key.sample_a >= THRESHOLD_ON {
                    key.phase = KeyPhase::Rising;
                    key.rising_since = now;
                    key.moved = true;
                }
                None
            }
            KeyPhase::Rising => {
                if key.sample_b >= THRESHOLD_ON {
                    key.phase = KeyPhase::Held;
                    key.moved = true;
                    key.emitted_pressure = 0;
                    key.low_bottom_scans = 0;
                    Some(Strike {
                        velocity: velocity_from_interval(now.saturating_sub(key.rising_since)),
                    })
                } else if key.sample_a < THRESHOLD_OFF {
                    // Aborted press: the break point cleared before
                    // bottom-out ever crossed.
                    key.phase = KeyPhase::Idle;
                    key.moved = true;
                    None
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Records the channel and note a freshly struck key sounds on.
    pub fn bind(&mut self, index: usize, channel: Channel, note: Note) {
        let key = &mut self.keys[index];
        key.channel = Some(channel);
        key.note = Some(note);
    }

    /// Pressure step for one key.
    ///
    /// While held, the bottom sensor maps onto 7-bit pressure; a new value is
    /// reported only once it moves at least [`PRESSURE_DEADBAND`] from the
    /// last reported one.
    pub fn step_pressure(&mut self, index: usize) -> Option<(Channel, u8)> {
        let key = &mut self.keys[index];
        if key.phase != KeyPhase::Held {
            return None;
        }
        let channel = key.channel?;
        let pressure = pressure_from_bottom(key.sample_b);
        if (pressure as i16 - key.emitted_pressure as i16).unsigned_abs()
            >= PRESSURE_DEADBAND as u16
        {
            key.emitted_pressure = pressure;
            Some((channel, pressure))
        } else {
            None
        }
    }

    /// Forces a sounding key into `Releasing`, unbinding it.
    ///
    /// Used when the key's channel is stolen and when a `reset` clears the
    /// keybed. Returns the binding the caller owes a Note-Off for.
    pub fn force_release(&mut self, index: usize) -> Option<Binding> {
        let key = &mut self.keys[index];
        if key.phase != KeyPhase::Held {
            return None;
        }
        key.phase = KeyPhase::Releasing;
        key.moved = true;
        match (key.channel.take(), key.note) {
            (Some(channel), Some(note)) => Some(Binding { channel, note }),
            _ => None,
        }
    }

    /// Current phase of a key.
    pub fn phase(&self, index: usize) -> KeyPhase {
        self.keys[index].phase
    }

    /// Channel and note of a key, if it is sounding.
    pub fn binding(&self, index: usize) -> Option<Binding> {
        let key = &self.keys[index];
        match (key.channel, key.note) {
            (Some(channel), Some(note)) => Some(Binding { channel, note }),
            _ => None,
        }
    }
}

/// Inverse velocity law: short crossing intervals strike hard.
///
/// Intervals beyond the ceiling report a fixed mid velocity so slow presses
/// still sound.
fn velocity_from_interval(interval_ms: u64) -> u8 {
    if interval_ms > VELOCITY_CEILING_MS {
        return VELOCITY_SLOW_DEFAULT;
    }
    let dt = interval_ms.max(1) as u32;
    ((VELOCITY_SCALE + dt / 2) / dt).clamp(1, 127) as u8
}

/// Maps a bottom-sensor reading onto 7-bit pressure.
fn pressure_from_bottom(sample: u16) -> u8 {
    let span = (ADC_MAX - THRESHOLD_OFF) as u32;
    let above = sample.saturating_sub(THRESHOLD_OFF) as u32;
    ((above * 127) / span).min(127) as u8
}
