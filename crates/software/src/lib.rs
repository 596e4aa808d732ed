//! Bartleby is firmware for a pressure-sensitive 25-key MPE controller with
//! fourteen continuous controls and an octave-shift encoder. This crate holds
//! the architecture-agnostic core: the keybed and control state machines, the
//! MPE channel allocator, the MIDI byte formatter, and the shared-transport
//! multiplexer that carries MIDI and a line-based ASCII control protocol over
//! one serial link.
//!
//! Everything here is synchronous, statically allocated, and free of hardware
//! dependencies, so the whole engine can be exercised on the host. The
//! `bartleby-firmware` crate wires these pieces to the actual board: the
//! analog front end behind [`sampler::SampleSource`], the UART behind
//! [`transport::TxPort`], and the 1 ms cooperative loop around
//! [`engine::Engine`].

#![deny(missing_docs)]
#![no_std]

#[cfg(test)]
extern crate std;

pub mod configuration;

/// Logical addressing of the analog front end.
pub mod sampler;

/// Dual-phase key detection and per-key state machines.
pub mod keybed;

pub mod pots;

pub mod encoder;

/// MPE zone state and member-channel allocation.
pub mod zone;

/// Stateless MIDI byte formatting.
pub mod midi;

/// Shared-transport multiplexing of MIDI frames and ASCII lines.
pub mod transport;

/// The line-based control protocol and link supervision.
pub mod connection;

pub mod greeting;

/// The realtime engine driven once per millisecond.
pub mod engine;
