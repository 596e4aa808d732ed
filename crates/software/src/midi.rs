//! Stateless MIDI byte formatting.
//!
//! Every message goes out in full; running status is never used, so the
//! transport can interleave ASCII lines between frames without a receiver
//! losing sync, and a dropped frame corrupts nothing around it.

use crate::configuration::PITCH_BEND_CENTER;
use wmidi::{Channel, ControlFunction, MidiMessage, Note, U7, U14};

/// One complete outbound MIDI message, one to three bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    len: u8,
    bytes: [u8; 3],
}

impl Frame {
    /// The frame's bytes, status first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Whether the frame carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// For a control change, its (status, controller) pair.
    ///
    /// This is the identity the transport coalesces continuous-controller
    /// frames on.
    pub fn control_change_key(&self) -> Option<(u8, u8)> {
        if self.len == 3 && self.bytes[0] & 0xF0 == 0xB0 {
            Some((self.bytes[0], self.bytes[1]))
        } else {
            None
        }
    }
}

/// Renders a message into a [`Frame`].
///
/// Only channel-voice messages fit a frame; anything longer renders empty
/// and is skipped by the transport.
pub fn frame(message: &MidiMessage<'_>) -> Frame {
    let mut bytes = [0u8; 3];
    match message.copy_to_slice(&mut bytes) {
        Ok(len) => Frame {
            len: len as u8,
            bytes,
        },
        Err(_) => Frame::default(),
    }
}

/// Note-On frame (`0x9n`).
pub fn note_on(channel: Channel, note: Note, velocity: u8) -> Frame {
    frame(&MidiMessage::NoteOn(
        channel,
        note,
        U7::from_u8_lossy(velocity),
    ))
}

/// Note-Off frame (`0x8n`).
pub fn note_off(channel: Channel, note: Note, velocity: u8) -> Frame {
    frame(&MidiMessage::NoteOff(
        channel,
        note,
        U7::from_u8_lossy(velocity),
    ))
}

/// Channel-pressure frame (`0xDn`).
pub fn channel_pressure(channel: Channel, pressure: u8) -> Frame {
    frame(&MidiMessage::ChannelPressure(
        channel,
        U7::from_u8_lossy(pressure),
    ))
}

/// Control-change frame (`0xBn`).
pub fn control_change(channel: Channel, controller: u8, value: u8) -> Frame {
    frame(&MidiMessage::ControlChange(
        channel,
        ControlFunction(U7::from_u8_lossy(controller)),
        U7::from_u8_lossy(value),
    ))
}

/// Pitch-bend frame (`0xEn`), LSB before MSB.
pub fn pitch_bend(channel: Channel, value: u16) -> Frame {
    frame(&MidiMessage::PitchBendChange(
        channel,
        unsafe { U14::from_unchecked(value & 0x3FFF) },
    ))
}

/// Pitch-bend frame at the centre of the range.
pub fn pitch_bend_center(channel: Channel) -> Frame {
    pitch_bend(channel, PITCH_BEND_CENTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_frames_carry_status_note_velocity() {
        assert_eq!(
            &[0x91, 60, 100],
            note_on(Channel::Ch2, Note::C4, 100).as_bytes()
        );
        assert_eq!(
            &[0x81, 60, 0],
            note_off(Channel::Ch2, Note::C4, 0).as_bytes()
        );
    }

    #[test]
    fn channel_pressure_is_two_bytes() {
        assert_eq!(
            &[0xD1, 42],
            channel_pressure(Channel::Ch2, 42).as_bytes()
        );
    }

    #[test]
    fn pitch_bend_is_lsb_then_msb() {
        assert_eq!(
            &[0xE1, 0x00, 0x40],
            pitch_bend(Channel::Ch2, PITCH_BEND_CENTER).as_bytes()
        );
        assert_eq!(
            &[0xE0, 0x7F, 0x7F],
            pitch_bend(Channel::Ch1, 16383).as_bytes()
        );
    }

    #[test]
    fn control_change_key_identifies_coalescible_frames() {
        let cc = control_change(Channel::Ch1, 74, 19);
        assert_eq!(&[0xB0, 74, 19], cc.as_bytes());
        assert_eq!(Some((0xB0, 74)), cc.control_change_key());
        assert_eq!(None, note_on(Channel::Ch1, Note::C4, 1).control_change_key());
    }

    #[test]
    fn out_of_range_values_are_clamped_to_seven_bits() {
        assert_eq!(
            &[0x90, 60, 127],
            note_on(Channel::Ch1, Note::C4, 255).as_bytes()
        );
    }
}
