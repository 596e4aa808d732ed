//! The realtime engine.
//!
//! [`Engine::tick`] is called once per millisecond by the firmware's main
//! loop and drives every component in a fixed order: key note-offs, key
//! note-ons with their allocator side effects, per-key pressure, pot
//! controllers, encoder effects, the transport pump, and finally the inbound
//! ASCII lines and the link timeout. Everything runs to completion inside
//! the tick; the only suspension point of the firmware is the sleep between
//! ticks.

use crate::configuration::{
    ANNOUNCEMENT, CC_TIMBRE, NUM_KEYS, NUM_POTS, POT_SCAN_INTERVAL_MS, TIMBRE_CENTER,
};
use crate::connection::{self, Command, Link};
use crate::encoder::OctaveShift;
use crate::keybed::{Keybed, KeySamples};
use crate::midi::{self, Frame};
use crate::pots::PotBank;
use crate::sampler::{PressurePoint, SampleSource, key_descriptor, pot_descriptor};
use crate::transport::{AsciiLine, LINE_CAPACITY, TransportMux, TxPort};
use crate::zone::MpeZone;
use bitmask_enum::bitmask;
use wmidi::Channel;

/// What happened during one tick.
#[bitmask(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickActivity {
    /// A note started or stopped.
    Notes,
    /// Per-key pressure went out.
    Pressure,
    /// A pot controller went out.
    Controls,
    /// The octave offset changed.
    Octave,
    /// The ASCII side saw traffic or a timeout.
    Link,
}

/// The whole translation core behind one tick entry point.
pub struct Engine {
    keybed: Keybed,
    pots: PotBank,
    octave: OctaveShift,
    zone: MpeZone,
    transport: TransportMux,
    link: Link,
    last_pot_scan: Option<u64>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Constructs an idle engine.
    pub fn new() -> Self {
        Self {
            keybed: Keybed::new(),
            pots: PotBank::new(),
            octave: OctaveShift::new(),
            zone: MpeZone::new(),
            transport: TransportMux::new(),
            link: Link::new(),
            last_pot_scan: None,
        }
    }

    /// Queues the boot-time MPE configuration sequence.
    pub fn start(&mut self) {
        self.push_setup();
    }

    /// Runs one scan cycle. `now` is a monotonic millisecond timestamp.
    pub fn tick<S: SampleSource, P: TxPort>(
        &mut self,
        now: u64,
        sampler: &mut S,
        port: &mut P,
    ) -> TickActivity {
        let mut activity = TickActivity::none();

        // Keybed first, note-offs strictly ahead of note-ons so a freshly
        // vacated channel is allocatable within the same scan.
        let mut samples = [KeySamples::default(); NUM_KEYS];
        for (index, sample) in samples.iter_mut().enumerate() {
            sample.break_point = sampler.read(key_descriptor(index, PressurePoint::Break));
            sample.bottom = sampler.read(key_descriptor(index, PressurePoint::Bottom));
        }
        self.keybed.begin_scan(&samples);

        for index in 0..NUM_KEYS {
            if let Some(binding) = self.keybed.step_release(index) {
                self.zone.release(binding.channel);
                self.transport
                    .push_midi(midi::note_off(binding.channel, binding.note, 0));
                activity |= TickActivity::Notes;
            }
        }

        for index in 0..NUM_KEYS {
            if let Some(strike) = self.keybed.step_strike(index, now) {
                let note = self.octave.note_for_key(index);
                let allocation = self.zone.allocate(index as u8);
                if let Some(stolen) = allocation.stolen_key
                    && let Some(binding) = self.keybed.force_release(stolen as usize)
                {
                    self.transport
                        .push_midi(midi::note_off(binding.channel, binding.note, 0));
                }
                self.transport.push_midi(midi::control_change(
                    allocation.channel,
                    CC_TIMBRE,
                    TIMBRE_CENTER,
                ));
                self.transport
                    .push_midi(midi::channel_pressure(allocation.channel, 0));
                self.transport
                    .push_midi(midi::pitch_bend_center(allocation.channel));
                self.transport
                    .push_midi(midi::note_on(allocation.channel, note, strike.velocity));
                self.keybed.bind(index, allocation.channel, note);
                activity |= TickActivity::Notes;
                #[cfg(feature = "defmt")]
                defmt::info!(
                    "note {} on channel {} velocity {}",
                    note as u8,
                    allocation.channel.index() + 1,
                    strike.velocity
                );
            }
        }

        for index in 0..NUM_KEYS {
            if let Some((channel, pressure)) = self.keybed.step_pressure(index) {
                self.zone.record_pressure(channel, pressure);
                self.transport
                    .push_midi(midi::channel_pressure(channel, pressure));
                activity |= TickActivity::Pressure;
            }
        }

        // Pots at their own cadence.
        let pots_due = match self.last_pot_scan {
            None => true,
            Some(last) => now.saturating_sub(last) >= POT_SCAN_INTERVAL_MS,
        };
        if pots_due {
            for index in 0..NUM_POTS {
                let raw = sampler.read(pot_descriptor(index));
                if let Some(update) = self.pots.step(index, raw) {
                    self.transport.push_control(midi::control_change(
                        Channel::Ch1,
                        update.cc,
                        update.value,
                    ));
                    activity |= TickActivity::Controls;
                }
            }
            self.last_pot_scan = Some(now);
        }

        // Encoder detents queued since the last tick.
        if self.octave.drain() {
            activity |= TickActivity::Octave;
        }

        self.transport.pump(port);

        while let Some(line) = self.transport.next_line() {
            self.handle_line(&line, now);
            activity |= TickActivity::Link;
        }

        if self.link.poll(now) {
            self.transport.push_line(ANNOUNCEMENT);
            activity |= TickActivity::Link;
        }

        activity
    }

    /// Feeds bytes received on the serial link.
    pub fn receive(&mut self, bytes: &[u8]) {
        self.transport.ingest(bytes);
    }

    /// Queues detents reported by the encoder peripheral.
    pub fn add_encoder_delta(&mut self, detents: i8) {
        self.octave.add(detents);
    }

    /// Queues a raw MIDI frame, used by the boot chime.
    pub fn enqueue_midi(&mut self, frame: Frame) {
        self.transport.push_midi(frame);
    }

    /// Drains queued frames outside the tick, used during boot.
    pub fn pump<P: TxPort>(&mut self, port: &mut P) -> usize {
        self.transport.pump(port)
    }

    /// Whether every queued outbound frame has reached the port.
    pub fn is_idle(&self) -> bool {
        self.transport.is_idle()
    }

    fn handle_line(&mut self, line: &AsciiLine, now: u64) {
        if line.iter().all(|byte| byte.is_ascii_whitespace()) {
            return;
        }
        self.link.activity(now);
        let command = match core::str::from_utf8(&line[..]) {
            Ok(text) => connection::parse(text),
            Err(_) => {
                self.push_error(&line[..]);
                return;
            }
        };
        match command {
            Command::Hello => {
                self.transport.push_line(ANNOUNCEMENT);
                self.link.handshake(now);
                // A fresh host needs the control surface's current values.
                self.pots.force_resend();
            }
            Command::MapPot { pot, cc } => self.pots.remap(pot as usize, cc),
            Command::Reset => self.reset(),
            Command::Unknown(text) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("unknown line: {}", text);
                self.push_error(text.as_bytes());
            }
        }
    }

    /// Silences every held note, restores the zone and octave, and
    /// re-announces the MPE configuration.
    fn reset(&mut self) {
        for index in 0..NUM_KEYS {
            if let Some(binding) = self.keybed.force_release(index) {
                self.transport
                    .push_midi(midi::note_off(binding.channel, binding.note, 0));
            }
        }
        self.zone.reset();
        self.octave.reset();
        self.push_setup();
    }

    fn push_setup(&mut self) {
        for frame in self.zone.setup_frames() {
            self.transport.push_midi(frame);
        }
    }

    fn push_error(&mut self, echo: &[u8]) {
        let mut reply = AsciiLine::new();
        for &byte in b"err ".iter().chain(echo.iter()).take(LINE_CAPACITY - 1) {
            let _ = reply.try_push(byte);
        }
        let _ = reply.try_push(b'\n');
        self.transport.push_line(&reply[..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::{COMM_TIMEOUT_MS, MEMBER_CHANNELS};
    use crate::sampler::{Descriptor, MuxId};
    use std::collections::HashMap;
    use std::vec::Vec;

    /// Scripted analog front end: tests poke values, the engine reads them.
    struct ScriptSampler {
        keys: [[u16; 2]; NUM_KEYS],
        pots: [u16; NUM_POTS],
    }

    impl ScriptSampler {
        fn new() -> Self {
            Self {
                keys: [[0; 2]; NUM_KEYS],
                pots: [0; NUM_POTS],
            }
        }

        /// Crosses the break point only.
        fn touch(&mut self, key: usize) {
            self.keys[key][0] = 3000;
        }

        /// Crosses the bottom-out point.
        fn bottom(&mut self, key: usize) {
            self.keys[key][1] = 3000;
        }

        /// Crosses both points at once.
        fn press(&mut self, key: usize) {
            self.keys[key] = [3000, 3000];
        }

        fn lift(&mut self, key: usize) {
            self.keys[key] = [0, 0];
        }
    }

    impl SampleSource for ScriptSampler {
        fn read(&mut self, descriptor: Descriptor) -> u16 {
            let channel = descriptor.channel as usize;
            match descriptor.mux {
                MuxId::KeybedA => self.keys[channel / 2][channel % 2],
                MuxId::KeybedB => self.keys[13 + channel / 2][channel % 2],
                MuxId::Controls => self.pots[channel],
            }
        }
    }

    struct CapturePort {
        bytes: Vec<u8>,
    }

    impl TxPort for CapturePort {
        fn try_write(&mut self, frame: &[u8]) -> bool {
            self.bytes.extend_from_slice(frame);
            true
        }
    }

    struct Bench {
        engine: Engine,
        sampler: ScriptSampler,
        port: CapturePort,
        now: u64,
    }

    impl Bench {
        /// Boots the engine and flushes the setup burst and the initial pot
        /// report so tests start from a quiet wire.
        fn new() -> Self {
            let mut bench = Self {
                engine: Engine::new(),
                sampler: ScriptSampler::new(),
                port: CapturePort { bytes: Vec::new() },
                now: 0,
            };
            bench.engine.start();
            bench.ticks(25);
            bench
        }

        fn ticks(&mut self, count: usize) {
            for _ in 0..count {
                self.engine
                    .tick(self.now, &mut self.sampler, &mut self.port);
                self.now += 1;
            }
        }

        /// Flushes every queued outbound frame.
        fn flush(&mut self) {
            while self.engine.pump(&mut self.port) > 0 {}
        }

        /// Byte count marking "everything before this is already checked".
        fn mark(&mut self) -> usize {
            self.flush();
            self.port.bytes.len()
        }
    }

    /// Splits a captured byte stream into MIDI frames and ASCII bytes.
    fn split_stream(bytes: &[u8]) -> (Vec<Vec<u8>>, Vec<u8>) {
        let mut midi = Vec::new();
        let mut ascii = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let byte = bytes[i];
            if byte & 0x80 != 0 {
                let len = match byte & 0xF0 {
                    0xC0 | 0xD0 => 2,
                    _ => 3,
                };
                midi.push(bytes[i..i + len].to_vec());
                i += len;
            } else {
                ascii.push(byte);
                i += 1;
            }
        }
        (midi, ascii)
    }

    fn count_announcements(ascii: &[u8]) -> usize {
        ascii
            .windows(ANNOUNCEMENT.len())
            .filter(|window| *window == ANNOUNCEMENT)
            .count()
    }

    #[test]
    fn boot_emits_the_setup_sequence_before_anything_else() {
        let mut bench = Bench::new();
        let (midi, _) = split_stream(&bench.port.bytes);
        assert_eq!(std::vec![0xB0, 121, 0], midi[0]);
        assert_eq!(std::vec![0xB0, 123, 0], midi[1]);
        // The zone declaration follows immediately.
        assert_eq!(std::vec![0xB0, 100, 6], midi[3]);
        assert_eq!(std::vec![0xB0, 6, 15], midi[4]);
    }

    #[test]
    fn single_press_and_release() {
        let mut bench = Bench::new();
        let mark = bench.mark();

        bench.sampler.touch(0);
        bench.ticks(2);
        bench.sampler.bottom(0);
        bench.ticks(2);
        bench.ticks(10);
        bench.sampler.lift(0);
        bench.ticks(5);
        let end = bench.mark();

        let (midi, _) = split_stream(&bench.port.bytes[mark..end]);
        assert_eq!(std::vec![0xB1, 74, 64], midi[0]);
        assert_eq!(std::vec![0xD1, 0], midi[1]);
        assert_eq!(std::vec![0xE1, 0x00, 0x40], midi[2]);
        assert_eq!(std::vec![0x91, 60, 100], midi[3], "two crossings 2 ms apart");
        assert_eq!(std::vec![0xD1, 91], midi[4], "pressure follows the note-on");
        assert_eq!(std::vec![0x81, 60, 0], *midi.last().expect("note-off"));
    }

    #[test]
    fn polyphony_fills_the_zone_then_steals_the_oldest_channel() {
        let mut bench = Bench::new();
        let mark = bench.mark();

        for key in 0..=16 {
            bench.sampler.press(key);
            bench.ticks(2);
        }
        let end = bench.mark();
        let (midi, _) = split_stream(&bench.port.bytes[mark..end]);

        // The first fifteen keys take channels 2..=16 in order.
        let note_ons: Vec<&Vec<u8>> = midi.iter().filter(|f| f[0] & 0xF0 == 0x90).collect();
        for (key, frame) in note_ons.iter().take(MEMBER_CHANNELS).enumerate() {
            assert_eq!(0x90 | (key as u8 + 1), frame[0]);
            assert_eq!(60 + key as u8, frame[1]);
        }

        // Key 15 steals channel 2 from key 0, with the note-off in between.
        let steal_off = midi
            .iter()
            .position(|f| f == &[0x81, 60, 0])
            .expect("steal must silence key 0");
        let stolen_on = midi
            .iter()
            .position(|f| f == &[0x91, 75, 127])
            .expect("key 15 lands on the stolen channel");
        assert!(steal_off < stolen_on);

        // Key 16 steals the next-oldest channel.
        assert!(midi.iter().any(|f| f == &[0x82, 61, 0]));
        assert!(midi.iter().any(|f| f == &[0x92, 76, 127]));

        // At no instant do two sounding notes share a channel.
        let mut sounding: HashMap<u8, u8> = HashMap::new();
        for frame in &midi {
            match frame[0] & 0xF0 {
                0x90 => {
                    let previous = sounding.insert(frame[0] & 0x0F, frame[1]);
                    assert_eq!(None, previous, "channel double-booked");
                }
                0x80 => {
                    assert_eq!(Some(frame[1]), sounding.remove(&(frame[0] & 0x0F)));
                }
                _ => {}
            }
        }
    }

    #[test]
    fn octave_shift_spares_held_notes() {
        let mut bench = Bench::new();
        let mark = bench.mark();

        bench.sampler.press(0);
        bench.ticks(3);
        bench.engine.add_encoder_delta(1);
        bench.ticks(2);
        bench.sampler.lift(0);
        bench.ticks(4);
        bench.sampler.press(0);
        bench.ticks(3);
        let end = bench.mark();

        let (midi, _) = split_stream(&bench.port.bytes[mark..end]);
        let notes: Vec<(u8, u8)> = midi
            .iter()
            .filter(|f| matches!(f[0] & 0xF0, 0x80 | 0x90))
            .map(|f| (f[0], f[1]))
            .collect();
        // On at 60, off still at 60, next press one octave up. The repress
        // lands on the next round-robin channel.
        assert_eq!((0x91, 60), notes[0]);
        assert_eq!((0x81, 60), notes[1]);
        assert_eq!((0x92, 72), notes[2]);
    }

    #[test]
    fn remapped_pot_tracks_its_input_within_the_deadband() {
        let mut bench = Bench::new();
        bench.engine.receive(b"cc 0 102\n");
        bench.ticks(2);
        let mark = bench.mark();

        for raw in [512u16, 1024, 2048, 3072, 4095] {
            bench.sampler.pots[0] = raw;
            bench.ticks(150);
        }
        let end = bench.mark();

        let (midi, _) = split_stream(&bench.port.bytes[mark..end]);
        let values: Vec<u8> = midi
            .iter()
            .filter(|f| f[0] == 0xB0 && f[1] == 102)
            .map(|f| f[2])
            .collect();
        assert!(values.len() >= 5, "each level should report");
        for pair in values.windows(2) {
            assert!(pair[1] > pair[0], "reports must follow the input");
            assert!(pair[1] - pair[0] >= 1);
        }
        assert_eq!(127, *values.last().expect("full scale reached"));
    }

    #[test]
    fn ascii_replies_never_split_a_midi_frame() {
        let mut bench = Bench::new();
        let mark = bench.mark();

        bench.sampler.press(0);
        bench.ticks(3);
        // Keep pressure traffic flowing while the host talks.
        for step in 0..10u16 {
            bench.sampler.keys[0][1] = 2000 + step * 100;
            if step == 4 {
                bench.engine.receive(b"hello\n");
            }
            bench.ticks(1);
        }
        let end = bench.mark();

        let stream = &bench.port.bytes[mark..end];
        // The announcement is one contiguous run in the raw stream.
        assert!(
            stream
                .windows(ANNOUNCEMENT.len())
                .any(|window| window == ANNOUNCEMENT)
        );
        // And classifying the stream recovers well-formed MIDI around it.
        let (midi, ascii) = split_stream(stream);
        assert_eq!(1, count_announcements(&ascii));
        assert!(midi.iter().any(|f| f[0] == 0xD1), "pressure kept flowing");
        for frame in &midi {
            assert!(frame.iter().skip(1).all(|byte| byte & 0x80 == 0));
        }
    }

    #[test]
    fn reset_silences_held_notes_then_reannounces_the_zone() {
        let mut bench = Bench::new();
        for key in 0..3 {
            bench.sampler.press(key);
            bench.ticks(2);
        }
        let mark = bench.mark();

        bench.engine.receive(b"reset\n");
        bench.ticks(20);
        let end = bench.mark();

        let (midi, _) = split_stream(&bench.port.bytes[mark..end]);
        assert_eq!(std::vec![0x81, 60, 0], midi[0]);
        assert_eq!(std::vec![0x82, 61, 0], midi[1]);
        assert_eq!(std::vec![0x83, 62, 0], midi[2]);
        assert_eq!(std::vec![0xB0, 121, 0], midi[3], "setup follows the offs");
    }

    #[test]
    fn unknown_lines_are_echoed_behind_err() {
        let mut bench = Bench::new();
        let mark = bench.mark();
        bench.engine.receive(b"bogus 1\n");
        bench.ticks(2);
        let end = bench.mark();
        let (_, ascii) = split_stream(&bench.port.bytes[mark..end]);
        assert_eq!(b"err bogus 1\n".as_slice(), ascii);
    }

    #[test]
    fn a_silent_host_is_reannounced_after_the_timeout() {
        let mut bench = Bench::new();
        bench.engine.receive(b"hello\n");
        bench.ticks((COMM_TIMEOUT_MS + 100) as usize);
        bench.flush();
        let (_, ascii) = split_stream(&bench.port.bytes);
        assert_eq!(2, count_announcements(&ascii));
    }

    #[test]
    fn velocity_orders_fast_above_slow_presses() {
        let strike = |gap_ticks: usize| -> u8 {
            let mut bench = Bench::new();
            let mark = bench.mark();
            bench.sampler.touch(0);
            bench.ticks(gap_ticks);
            bench.sampler.bottom(0);
            bench.ticks(1);
            let end = bench.mark();
            let (midi, _) = split_stream(&bench.port.bytes[mark..end]);
            midi.iter()
                .find(|f| f[0] == 0x91)
                .map(|f| f[2])
                .expect("press should sound")
        };
        let fast = strike(1);
        let slower = strike(4);
        let slowest = strike(10);
        assert!(fast >= slower && slower >= slowest);
        assert!(slowest >= 1);
    }
}
