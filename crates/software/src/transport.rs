//! Shared-transport multiplexing.
//!
//! One UART carries both the outbound MIDI stream and a bidirectional
//! line-based ASCII protocol. Outbound traffic is queued as whole frames (a
//! complete MIDI message or a `\n`-terminated line) and every frame reaches
//! the wire atomically: a frame the port cannot take stays at the head and
//! is retried on the next tick. MIDI frames always go out ahead of pending
//! ASCII.
//!
//! Inbound bytes are classified by their top bit. Status bytes open a MIDI
//! message whose data bytes are counted and discarded (this device consumes
//! no MIDI), and everything else accumulates into ASCII lines for the
//! engine.

use crate::configuration::PUMP_FRAMES_PER_TICK;
use crate::midi::Frame;
use tinyvec::ArrayVec;

/// Longest ASCII line either direction carries, terminator included.
pub const LINE_CAPACITY: usize = 64;

/// A `\n`-terminated ASCII line.
pub type AsciiLine = ArrayVec<[u8; LINE_CAPACITY]>;

const MIDI_QUEUE: usize = 256;
const ASCII_QUEUE: usize = 4;
const LINE_QUEUE: usize = 4;

/// Byte sink the multiplexer drains into, typically the UART TX path.
pub trait TxPort {
    /// Accepts a whole frame or nothing. Returns `false` when the frame does
    /// not currently fit; it will be offered again.
    fn try_write(&mut self, frame: &[u8]) -> bool;
}

#[derive(Clone, Copy, Default)]
struct Queued {
    frame: Frame,
    coalescible: bool,
}

/// Multiplexes outbound MIDI and ASCII frames and demultiplexes the inbound
/// byte stream.
pub struct TransportMux {
    midi_out: ArrayVec<[Queued; MIDI_QUEUE]>,
    ascii_out: ArrayVec<[AsciiLine; ASCII_QUEUE]>,
    lines_in: ArrayVec<[AsciiLine; LINE_QUEUE]>,
    line: AsciiLine,
    midi_data_remaining: u8,
    in_sysex: bool,
}

impl Default for TransportMux {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportMux {
    /// Constructs an idle multiplexer.
    pub fn new() -> Self {
        Self {
            midi_out: ArrayVec::new(),
            ascii_out: ArrayVec::new(),
            lines_in: ArrayVec::new(),
            line: AsciiLine::new(),
            midi_data_remaining: 0,
            in_sysex: false,
        }
    }

    /// Queues a MIDI frame. Never coalesced and never dropped while the
    /// queue (sized for the worst tick plus a full setup burst) has room.
    pub fn push_midi(&mut self, frame: Frame) {
        if frame.is_empty() {
            return;
        }
        if self
            .midi_out
            .try_push(Queued {
                frame,
                coalescible: false,
            })
            .is_some()
        {
            #[cfg(feature = "defmt")]
            defmt::warn!("midi queue full, frame dropped");
        }
    }

    /// Queues a continuous-controller frame, replacing any older queued
    /// frame for the same channel and controller.
    ///
    /// Only frames queued through this path coalesce; registered-parameter
    /// writes share controller numbers across a sequence and must all reach
    /// the wire.
    pub fn push_control(&mut self, frame: Frame) {
        let key = frame.control_change_key();
        if key.is_some() {
            self.midi_out
                .retain(|queued| !(queued.coalescible && queued.frame.control_change_key() == key));
        }
        if frame.is_empty() {
            return;
        }
        if self
            .midi_out
            .try_push(Queued {
                frame,
                coalescible: true,
            })
            .is_some()
        {
            #[cfg(feature = "defmt")]
            defmt::warn!("midi queue full, controller frame dropped");
        }
    }

    /// Queues an ASCII line for transmission, truncating to the line
    /// capacity. The terminating `\n` must be part of `line`.
    pub fn push_line(&mut self, line: &[u8]) {
        let mut out = AsciiLine::new();
        for &byte in line.iter().take(LINE_CAPACITY) {
            let _ = out.try_push(byte);
        }
        if self.ascii_out.try_push(out).is_some() {
            #[cfg(feature = "defmt")]
            defmt::warn!("ascii queue full, line dropped");
        }
    }

    /// Writes queued frames to the port, head first, MIDI before ASCII.
    ///
    /// Stops at the per-tick cap or the first frame the port refuses, and
    /// returns the number of frames written.
    pub fn pump<P: TxPort>(&mut self, port: &mut P) -> usize {
        let mut written = 0;
        while written < PUMP_FRAMES_PER_TICK {
            if let Some(queued) = self.midi_out.first() {
                if port.try_write(queued.frame.as_bytes()) {
                    self.midi_out.remove(0);
                    written += 1;
                    continue;
                }
                break;
            }
            if let Some(line) = self.ascii_out.first() {
                if port.try_write(&line[..]) {
                    self.ascii_out.remove(0);
                    written += 1;
                    continue;
                }
            }
            break;
        }
        written
    }

    /// Feeds received bytes through the classifier.
    pub fn ingest(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.ingest_byte(byte);
        }
    }

    /// Next complete inbound ASCII line, without its terminator.
    pub fn next_line(&mut self) -> Option<AsciiLine> {
        if self.lines_in.is_empty() {
            None
        } else {
            Some(self.lines_in.remove(0))
        }
    }

    /// Whether any outbound frame is still queued.
    pub fn is_idle(&self) -> bool {
        self.midi_out.is_empty() && self.ascii_out.is_empty()
    }

    fn ingest_byte(&mut self, byte: u8) {
        if byte & 0x80 != 0 {
            match byte {
                0xF8..=0xFF => {} // realtime, transparent to both streams
                0xF7 => self.in_sysex = false,
                0xF0 => {
                    self.in_sysex = true;
                    self.midi_data_remaining = 0;
                }
                _ => {
                    self.in_sysex = false;
                    self.midi_data_remaining = status_data_len(byte);
                }
            }
            return;
        }
        if self.in_sysex {
            return;
        }
        if self.midi_data_remaining > 0 {
            self.midi_data_remaining -= 1;
            return;
        }
        match byte {
            b'\r' => {}
            b'\n' => {
                let line = core::mem::take(&mut self.line);
                if self.lines_in.try_push(line).is_some() {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("inbound line queue full, line dropped");
                }
            }
            _ => {
                let _ = self.line.try_push(byte);
            }
        }
    }
}

/// Data bytes following a non-sysex status byte.
fn status_data_len(status: u8) -> u8 {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        0xF0 => match status {
            0xF1 | 0xF3 => 1,
            0xF2 => 2,
            _ => 0,
        },
        _ => 2,
    }
}
