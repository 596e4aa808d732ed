//! MPE zone state and member-channel allocation.
//!
//! The lower zone's manager is channel 1; channels 2..=16 are members, each
//! carrying at most one sounding note. Channels hand out in round-robin
//! order, and when all fifteen are sounding the least recently allocated one
//! is stolen so a new note never goes silent.

use crate::configuration::{
    MASTER_BEND_RANGE, MEMBER_BEND_RANGE, MEMBER_CHANNELS, PITCH_BEND_CENTER, TIMBRE_CENTER,
};
use crate::midi::{self, Frame};
use tinyvec::ArrayVec;
use wmidi::Channel;

/// RPN selecting pitch-bend sensitivity.
const RPN_PITCH_BEND_RANGE: u8 = 0;
/// RPN carrying the MPE Configuration Message.
const RPN_MPE_CONFIGURATION: u8 = 6;

/// Room for the full configuration sequence (104 frames).
const SETUP_FRAMES: usize = 128;

/// Result of an allocation request.
#[derive(Clone, Copy, Debug)]
pub struct Allocation {
    /// The member channel the note will sound on.
    pub channel: Channel,
    /// Key whose note was stolen to free the channel, if any.
    pub stolen_key: Option<u8>,
}

#[derive(Clone, Copy)]
struct Member {
    occupant: Option<u8>,
    pitch_bend: u16,
    pressure: u8,
    timbre: u8,
    last_used: u32,
}

impl Default for Member {
    fn default() -> Self {
        Self {
            occupant: None,
            pitch_bend: PITCH_BEND_CENTER,
            pressure: 0,
            timbre: TIMBRE_CENTER,
            last_used: 0,
        }
    }
}

/// The process-wide MPE zone.
pub struct MpeZone {
    members: [Member; MEMBER_CHANNELS],
    free: ArrayVec<[u8; MEMBER_CHANNELS]>,
    stamp: u32,
}

impl Default for MpeZone {
    fn default() -> Self {
        Self::new()
    }
}

impl MpeZone {
    /// Constructs the zone with every member channel free.
    pub fn new() -> Self {
        let mut free = ArrayVec::new();
        for index in 0..MEMBER_CHANNELS as u8 {
            free.push(index);
        }
        Self {
            members: [Member::default(); MEMBER_CHANNELS],
            free,
            stamp: 0,
        }
    }

    /// Binds a key to a member channel, stealing the least recently used
    /// channel when none is free.
    ///
    /// The chosen channel's bend, pressure, and timbre are reset; the caller
    /// emits the matching reset frames ahead of the Note-On (and a Note-Off
    /// for the stolen key first, if any).
    pub fn allocate(&mut self, key: u8) -> Allocation {
        let (index, stolen_key) = if self.free.is_empty() {
            let index = self.least_recently_used();
            let stolen = self.members[index].occupant;
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "stealing channel {} from key {}",
                index + 2,
                stolen.unwrap_or(0)
            );
            (index, stolen)
        } else {
            (self.free.remove(0) as usize, None)
        };

        let member = &mut self.members[index];
        member.occupant = Some(key);
        member.pitch_bend = PITCH_BEND_CENTER;
        member.pressure = 0;
        member.timbre = TIMBRE_CENTER;
        self.stamp = self.stamp.wrapping_add(1);
        member.last_used = self.stamp;

        Allocation {
            channel: member_channel(index),
            stolen_key,
        }
    }

    /// Returns a channel to the back of the free list and zeroes its state.
    pub fn release(&mut self, channel: Channel) {
        let index = match member_index(channel) {
            Some(index) => index,
            None => return,
        };
        if self.free.contains(&(index as u8)) {
            return;
        }
        self.members[index] = Member::default();
        self.free.push(index as u8);
    }

    /// Key currently sounding on a channel.
    pub fn occupant(&self, channel: Channel) -> Option<u8> {
        member_index(channel).and_then(|index| self.members[index].occupant)
    }

    /// Records the pressure last sent on a channel.
    pub fn record_pressure(&mut self, channel: Channel, pressure: u8) {
        if let Some(index) = member_index(channel) {
            self.members[index].pressure = pressure;
        }
    }

    /// Pressure last sent on a channel.
    pub fn pressure(&self, channel: Channel) -> u8 {
        member_index(channel).map_or(0, |index| self.members[index].pressure)
    }

    /// Pitch bend a channel currently holds.
    pub fn pitch_bend(&self, channel: Channel) -> u16 {
        member_index(channel).map_or(PITCH_BEND_CENTER, |index| self.members[index].pitch_bend)
    }

    /// Timbre a channel currently holds.
    pub fn timbre(&self, channel: Channel) -> u8 {
        member_index(channel).map_or(TIMBRE_CENTER, |index| self.members[index].timbre)
    }

    /// Drops every binding and restores the round-robin order.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// The configuration sequence announced at boot and after a `reset`.
    ///
    /// Quiets the receiver, declares the fifteen-member lower zone, then
    /// sets the member and master pitch-bend ranges.
    pub fn setup_frames(&self) -> ArrayVec<[Frame; SETUP_FRAMES]> {
        let manager = Channel::Ch1;
        let mut frames = ArrayVec::new();
        frames.push(midi::control_change(manager, 121, 0));
        frames.push(midi::control_change(manager, 123, 0));
        push_rpn(
            &mut frames,
            manager,
            RPN_MPE_CONFIGURATION,
            MEMBER_CHANNELS as u8,
        );
        for index in 0..MEMBER_CHANNELS {
            push_rpn(
                &mut frames,
                member_channel(index),
                RPN_PITCH_BEND_RANGE,
                MEMBER_BEND_RANGE,
            );
        }
        push_rpn(&mut frames, manager, RPN_PITCH_BEND_RANGE, MASTER_BEND_RANGE);
        frames
    }

    fn least_recently_used(&self) -> usize {
        let mut best = 0;
        let mut best_stamp = u32::MAX;
        for (index, member) in self.members.iter().enumerate() {
            if member.occupant.is_some() && member.last_used < best_stamp {
                best_stamp = member.last_used;
                best = index;
            }
        }
        best
    }
}

/// Member channel for a zero-based member index (0 is channel 2).
fn member_channel(index: usize) -> Channel {
    Channel::from_index(index as u8 + 1).unwrap_or(Channel::Ch16)
}

/// Zero-based member index of a channel, if it is a member.
fn member_index(channel: Channel) -> Option<usize> {
    let index = channel.index();
    if (1..=MEMBER_CHANNELS as u8).contains(&index) {
        Some(index as usize - 1)
    } else {
        None
    }
}

/// The full six-CC registered-parameter write, closed with RPN null.
fn push_rpn(
    frames: &mut ArrayVec<[Frame; SETUP_FRAMES]>,
    channel: Channel,
    parameter: u8,
    value: u8,
) {
    frames.push(midi::control_change(channel, 101, 0));
    frames.push(midi::control_change(channel, 100, parameter));
    frames.push(midi::control_change(channel, 6, value));
    frames.push(midi::control_change(channel, 38, 0));
    frames.push(midi::control_change(channel, 101, 127));
    frames.push(midi::control_change(channel, 100, 127));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::vec::Vec;

    #[test]
    fn channels_hand_out_in_round_robin_order() {
        let mut zone = MpeZone::new();
        let first = zone.allocate(0);
        assert_eq!(Channel::Ch2, first.channel);
        assert!(first.stolen_key.is_none());

        let second = zone.allocate(1);
        assert_eq!(Channel::Ch3, second.channel);

        // A released channel rejoins at the back, not the front.
        zone.release(Channel::Ch2);
        let third = zone.allocate(2);
        assert_eq!(Channel::Ch4, third.channel);
    }

    #[test]
    fn fifteen_notes_fill_every_member_channel_once() {
        let mut zone = MpeZone::new();
        let mut seen = HashSet::new();
        for key in 0..MEMBER_CHANNELS as u8 {
            let allocation = zone.allocate(key);
            assert!(allocation.stolen_key.is_none());
            assert!(seen.insert(allocation.channel.index()));
        }
        assert_eq!(MEMBER_CHANNELS, seen.len());
    }

    #[test]
    fn exhaustion_steals_the_least_recently_used_channel() {
        let mut zone = MpeZone::new();
        for key in 0..MEMBER_CHANNELS as u8 {
            zone.allocate(key);
        }
        let allocation = zone.allocate(15);
        assert_eq!(Channel::Ch2, allocation.channel);
        assert_eq!(Some(0), allocation.stolen_key);
        assert_eq!(Some(15), zone.occupant(Channel::Ch2));

        let next = zone.allocate(16);
        assert_eq!(Channel::Ch3, next.channel);
        assert_eq!(Some(1), next.stolen_key);
    }

    #[test]
    fn release_zeroes_the_channel_state() {
        let mut zone = MpeZone::new();
        let allocation = zone.allocate(4);
        zone.record_pressure(allocation.channel, 99);
        zone.release(allocation.channel);
        assert_eq!(None, zone.occupant(allocation.channel));
        assert_eq!(0, zone.pressure(allocation.channel));
        assert_eq!(PITCH_BEND_CENTER, zone.pitch_bend(allocation.channel));
        assert_eq!(TIMBRE_CENTER, zone.timbre(allocation.channel));
    }

    #[test]
    fn double_release_is_harmless() {
        let mut zone = MpeZone::new();
        let allocation = zone.allocate(0);
        zone.release(allocation.channel);
        zone.release(allocation.channel);
        // All fifteen channels must still be allocatable exactly once.
        let mut seen = HashSet::new();
        for key in 0..MEMBER_CHANNELS as u8 {
            assert!(seen.insert(zone.allocate(key).channel.index()));
        }
    }

    /// Follows the RPN state machine over the setup sequence and returns the
    /// last bend range written per channel.
    fn bend_ranges(frames: &[Frame]) -> Vec<Option<u8>> {
        let mut selected = [None::<u8>; 16];
        let mut range = std::vec![None; 16];
        for frame in frames {
            let bytes = frame.as_bytes();
            let channel = (bytes[0] & 0x0F) as usize;
            match (bytes[1], bytes[2]) {
                (100, parameter) => selected[channel] = Some(parameter),
                (101, 127) => selected[channel] = None,
                (6, value) if selected[channel] == Some(RPN_PITCH_BEND_RANGE) => {
                    range[channel] = Some(value)
                }
                _ => {}
            }
        }
        range
    }

    #[test]
    fn setup_declares_the_zone_then_both_bend_ranges() {
        let zone = MpeZone::new();
        let frames = zone.setup_frames();
        let bytes: Vec<&[u8]> = frames.iter().map(Frame::as_bytes).collect();

        // Receiver quieted first.
        assert_eq!(&[0xB0, 121, 0], bytes[0]);
        assert_eq!(&[0xB0, 123, 0], bytes[1]);
        // The zone declaration names fifteen members.
        assert_eq!(&[0xB0, 100, RPN_MPE_CONFIGURATION], bytes[3]);
        assert_eq!(&[0xB0, 6, MEMBER_CHANNELS as u8], bytes[4]);

        let ranges = bend_ranges(&frames);
        assert_eq!(Some(MASTER_BEND_RANGE), ranges[0]);
        for channel in 1..=MEMBER_CHANNELS {
            assert_eq!(
                Some(MEMBER_BEND_RANGE),
                ranges[channel],
                "member channel {} bend range",
                channel + 1
            );
        }
    }
}
