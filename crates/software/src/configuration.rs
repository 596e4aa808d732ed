//! Build-time tuning constants.
//!
//! The raw thresholds are expressed in counts of the 12-bit converter and
//! depend on the sensor stack of a particular build; the values here match
//! the reference keybed. The velocity coefficient was calibrated by
//! measurement against that keybed.

/// Number of keys on the keybed.
pub const NUM_KEYS: usize = 25;

/// Number of continuous controls.
pub const NUM_POTS: usize = 14;

/// Full-scale reading of the 12-bit converter.
pub const ADC_MAX: u16 = 4095;

/// Raw reading at which a pressure point counts as crossed (~10 % of scale).
pub const THRESHOLD_ON: u16 = 410;

/// Raw reading below which a crossed point counts as released (~5 % of
/// scale). Must sit below [`THRESHOLD_ON`] for hysteresis.
pub const THRESHOLD_OFF: u16 = 205;

/// Numerator of the inverse velocity law: `velocity = VELOCITY_SCALE / Δt`,
/// with Δt in milliseconds between the two threshold crossings of a key.
pub const VELOCITY_SCALE: u32 = 200;

/// Crossing interval beyond which a press counts as slow.
pub const VELOCITY_CEILING_MS: u64 = 25;

/// Velocity reported for slow presses, so they still sound.
pub const VELOCITY_SLOW_DEFAULT: u8 = 64;

/// Minimum change in 7-bit pressure before a new ChannelPressure is emitted.
pub const PRESSURE_DEADBAND: u8 = 2;

/// Minimum change in a quantised pot value before a new CC is emitted.
pub const POT_DEADBAND: u8 = 1;

/// Cadence of the continuous-control scan.
pub const POT_SCAN_INTERVAL_MS: u64 = 20;

/// Octave shift limit, detents either side of centre.
pub const OCTAVE_RANGE: i8 = 3;

/// MIDI note of key 0 at centre octave (middle C).
pub const BASE_NOTE: u8 = 60;

/// Member channels of the lower zone (MIDI channels 2..=16).
pub const MEMBER_CHANNELS: usize = 15;

/// Member-channel pitch-bend range in semitones.
pub const MEMBER_BEND_RANGE: u8 = 48;

/// Manager-channel pitch-bend range in semitones.
pub const MASTER_BEND_RANGE: u8 = 2;

/// Centre of the 14-bit pitch-bend range.
pub const PITCH_BEND_CENTER: u16 = 8192;

/// Controller number carrying per-note timbre.
pub const CC_TIMBRE: u8 = 74;

/// Centre value of the timbre controller.
pub const TIMBRE_CENTER: u8 = 64;

/// Idle period after a handshake before the announcement is repeated.
pub const COMM_TIMEOUT_MS: u64 = 2000;

/// Announcement line sent in reply to `hello` and on communication timeout.
pub const ANNOUNCEMENT: &[u8] = b"bartleby v1\n";

/// Minimum settling time between a multiplexer select and the ADC read.
pub const MUX_SETTLE_US: u64 = 10;

/// Outbound frames attempted per tick.
pub const PUMP_FRAMES_PER_TICK: usize = 8;

/// Factory controller map: timbre, filter resonance, attack, decay, sustain,
/// release, volume, modulation, then general-purpose controllers 20..=25.
pub const DEFAULT_CC_MAP: [u8; NUM_POTS] =
    [74, 71, 73, 75, 76, 72, 7, 1, 20, 21, 22, 23, 24, 25];
