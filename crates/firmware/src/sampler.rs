//! The board's analog front end.
//!
//! Three multiplexer trees feed the RP2040's converter: two two-level trees
//! carry the fifty key sensors into GP26 and GP27, and a single-level mux
//! carries the fourteen pots into GP28. The trees share one set of
//! second-level select lines. Reads are blocking; a conversion takes about
//! two microseconds, which fits comfortably inside the millisecond tick.

use bartleby_lib::configuration::MUX_SETTLE_US;
use bartleby_lib::sampler::{Descriptor, MuxId, SampleSource};
use embassy_rp::adc::{Adc, Blocking, Channel as AdcChannel};
use embassy_rp::gpio::Output;
use embassy_time::{Duration, block_for};

/// Owns the converter, the three signal channels, and the select lines.
pub struct BoardSampler {
    adc: Adc<'static, Blocking>,
    keybed_a: AdcChannel<'static>,
    keybed_b: AdcChannel<'static>,
    controls: AdcChannel<'static>,
    keybed_a_select: [Output<'static>; 4],
    keybed_b_select: [Output<'static>; 4],
    shared_select: [Output<'static>; 4],
    control_select: [Output<'static>; 4],
}

impl BoardSampler {
    /// Wires up the front end.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adc: Adc<'static, Blocking>,
        keybed_a: AdcChannel<'static>,
        keybed_b: AdcChannel<'static>,
        controls: AdcChannel<'static>,
        keybed_a_select: [Output<'static>; 4],
        keybed_b_select: [Output<'static>; 4],
        shared_select: [Output<'static>; 4],
        control_select: [Output<'static>; 4],
    ) -> Self {
        Self {
            adc,
            keybed_a,
            keybed_b,
            controls,
            keybed_a_select,
            keybed_b_select,
            shared_select,
            control_select,
        }
    }

    fn select(pins: &mut [Output<'static>; 4], channel: u8) {
        for (bit, pin) in pins.iter_mut().enumerate() {
            if channel >> bit & 1 == 1 {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
    }
}

impl SampleSource for BoardSampler {
    fn read(&mut self, descriptor: Descriptor) -> u16 {
        let channel = match descriptor.mux {
            MuxId::KeybedA => {
                Self::select(&mut self.shared_select, descriptor.channel >> 4);
                Self::select(&mut self.keybed_a_select, descriptor.channel & 0x0F);
                &mut self.keybed_a
            }
            MuxId::KeybedB => {
                Self::select(&mut self.shared_select, descriptor.channel >> 4);
                Self::select(&mut self.keybed_b_select, descriptor.channel & 0x0F);
                &mut self.keybed_b
            }
            MuxId::Controls => {
                Self::select(&mut self.control_select, descriptor.channel);
                &mut self.controls
            }
        };
        block_for(Duration::from_micros(MUX_SETTLE_US));
        // A failed conversion reads as silence rather than a phantom press.
        self.adc.blocking_read(channel).unwrap_or(0)
    }
}
