//! Bartleby is a pressure-sensitive 25-key MPE controller with fourteen
//! continuous controls and an octave-shift encoder, built around an RP2040.
//! This crate is the board glue: it brings up the UART shared by MIDI and
//! the ASCII control protocol, the analog front end behind the multiplexer
//! trees, and the encoder, then runs the engine from `bartleby-lib` on a
//! 1 ms cooperative loop.
//!
//! Three auxiliary tasks bracket the loop: the UART writer drains whole
//! frames from a channel, the UART reader forwards raw inbound bytes, and
//! the encoder task turns quadrature edges into detent counts. All of them
//! talk to the main loop exclusively through `embassy-sync` channels, so the
//! engine itself stays single-threaded.

#![no_std]
#![no_main]

mod sampler;

use crate::sampler::BoardSampler;
use bartleby_lib::engine::{Engine, TickActivity};
use bartleby_lib::greeting;
use bartleby_lib::transport::TxPort;
use defmt::{info, unwrap};
use embassy_executor::Spawner;
use embassy_rp::adc::{Adc, Channel as AdcChannel, Config as AdcConfig};
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::peripherals::UART0;
use embassy_rp::uart::{
    BufferedInterruptHandler, BufferedUart, BufferedUartRx, BufferedUartTx, Config as UartConfig,
};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{Read, Write};
use static_cell::StaticCell;

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    UART0_IRQ => BufferedInterruptHandler<UART0>;
});

/// One outbound frame: a complete MIDI message or a whole ASCII line.
#[derive(Clone, Copy)]
struct Frame {
    len: u8,
    bytes: [u8; 64],
}

/// Chunk of raw inbound bytes on their way to the engine.
#[derive(Clone, Copy)]
struct RxChunk {
    len: u8,
    bytes: [u8; 32],
}

/// Outbound frames, engine to UART writer. Sized so a burst of pressure
/// updates never stalls the tick.
static TX_FRAMES: Channel<CriticalSectionRawMutex, Frame, 32> = Channel::new();

/// Inbound bytes, UART reader to engine.
static RX_BYTES: Channel<CriticalSectionRawMutex, RxChunk, 8> = Channel::new();

/// Detents, encoder task to engine.
static ENCODER_DETENTS: Channel<CriticalSectionRawMutex, i8, 8> = Channel::new();

/// Sends each frame to the writer task whole, or not at all.
struct FramePort;

impl TxPort for FramePort {
    fn try_write(&mut self, frame: &[u8]) -> bool {
        if frame.len() > 64 {
            return false;
        }
        let mut out = Frame {
            len: frame.len() as u8,
            bytes: [0; 64],
        };
        out.bytes[..frame.len()].copy_from_slice(frame);
        TX_FRAMES.try_send(out).is_ok()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing Bartleby");

    let p = embassy_rp::init(Default::default());

    // Holding GP22 low tells the host the controller is powered and ready;
    // the pin releases on reset. The main-loop task owns it so it stays
    // asserted for the life of the firmware.
    let presence = Output::new(p.PIN_22, Level::Low);

    // One UART carries MIDI and the ASCII control protocol.
    let mut uart_config = UartConfig::default();
    uart_config.baudrate = 31250;
    static TX_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    static RX_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let uart = BufferedUart::new(
        p.UART0,
        Irqs,
        p.PIN_16,
        p.PIN_17,
        TX_BUFFER.init([0; 256]),
        RX_BUFFER.init([0; 256]),
        uart_config,
    );
    let (tx, rx) = uart.split();
    unwrap!(spawner.spawn(uart_writer(tx)));
    unwrap!(spawner.spawn(uart_reader(rx)));

    let clk = Input::new(p.PIN_20, Pull::Up);
    let dt = Input::new(p.PIN_21, Pull::Up);
    unwrap!(spawner.spawn(encoder_watch(clk, dt)));

    let adc = Adc::new_blocking(p.ADC, AdcConfig::default());
    let board_sampler = BoardSampler::new(
        adc,
        AdcChannel::new_pin(p.PIN_26, Pull::None),
        AdcChannel::new_pin(p.PIN_27, Pull::None),
        AdcChannel::new_pin(p.PIN_28, Pull::None),
        [
            Output::new(p.PIN_0, Level::Low),
            Output::new(p.PIN_1, Level::Low),
            Output::new(p.PIN_2, Level::Low),
            Output::new(p.PIN_3, Level::Low),
        ],
        [
            Output::new(p.PIN_4, Level::Low),
            Output::new(p.PIN_5, Level::Low),
            Output::new(p.PIN_6, Level::Low),
            Output::new(p.PIN_7, Level::Low),
        ],
        [
            Output::new(p.PIN_8, Level::Low),
            Output::new(p.PIN_9, Level::Low),
            Output::new(p.PIN_10, Level::Low),
            Output::new(p.PIN_11, Level::Low),
        ],
        [
            Output::new(p.PIN_12, Level::Low),
            Output::new(p.PIN_13, Level::Low),
            Output::new(p.PIN_14, Level::Low),
            Output::new(p.PIN_15, Level::Low),
        ],
    );

    unwrap!(spawner.spawn(run(board_sampler, presence)));
}

/// The 1 ms cooperative loop around the engine.
#[embassy_executor::task]
async fn run(mut board_sampler: BoardSampler, presence: Output<'static>) -> ! {
    let _presence = presence;
    let mut engine = Engine::new();
    let mut port = FramePort;

    engine.start();
    flush(&mut engine, &mut port).await;

    info!("MPE configuration sent, playing greeting");
    for step in &greeting::SEQUENCE {
        for frame in greeting::note_on_frames(step) {
            engine.enqueue_midi(frame);
        }
        flush(&mut engine, &mut port).await;
        Timer::after_millis(step.hold_ms).await;
        for frame in greeting::note_off_frames(step) {
            engine.enqueue_midi(frame);
        }
        flush(&mut engine, &mut port).await;
        Timer::after_millis(step.gap_ms).await;
    }

    info!("Entering main loop");
    let mut next_deadline = Instant::now();
    loop {
        while let Ok(detents) = ENCODER_DETENTS.try_receive() {
            engine.add_encoder_delta(detents);
        }
        while let Ok(chunk) = RX_BYTES.try_receive() {
            engine.receive(&chunk.bytes[..chunk.len as usize]);
        }

        let activity = engine.tick(
            Instant::now().as_millis(),
            &mut board_sampler,
            &mut port,
        );
        if activity != TickActivity::none() {
            defmt::debug!("tick activity: {}", activity);
        }

        // Monotonic deadlines bound drift; an overrun starts the next tick
        // immediately instead of catching up.
        next_deadline += Duration::from_millis(1);
        let now = Instant::now();
        if next_deadline <= now {
            next_deadline = now;
        } else {
            Timer::at(next_deadline).await;
        }
    }
}

/// Pushes everything the engine has queued out to the writer task, pacing
/// itself against the frame channel's backpressure.
async fn flush(engine: &mut Engine, port: &mut FramePort) {
    while !engine.is_idle() {
        engine.pump(port);
        Timer::after_millis(1).await;
    }
}

#[embassy_executor::task]
async fn uart_writer(mut tx: BufferedUartTx<'static, UART0>) -> ! {
    loop {
        let frame = TX_FRAMES.receive().await;
        if tx.write_all(&frame.bytes[..frame.len as usize]).await.is_err() {
            defmt::warn!("UART write failed, frame lost");
        }
    }
}

#[embassy_executor::task]
async fn uart_reader(mut rx: BufferedUartRx<'static, UART0>) -> ! {
    let mut buffer = [0u8; 32];
    loop {
        match rx.read(&mut buffer).await {
            Ok(0) => {}
            Ok(n) => {
                let mut chunk = RxChunk {
                    len: n as u8,
                    bytes: [0; 32],
                };
                chunk.bytes[..n].copy_from_slice(&buffer[..n]);
                if RX_BYTES.try_send(chunk).is_err() {
                    defmt::warn!("inbound queue full, {} bytes dropped", n);
                }
            }
            Err(_) => defmt::warn!("UART read failed"),
        }
    }
}

/// Turns quadrature edges into detent counts.
///
/// The encoder clicks once per falling clock edge; the data line's level at
/// that instant gives the direction.
#[embassy_executor::task]
async fn encoder_watch(mut clk: Input<'static>, dt: Input<'static>) -> ! {
    loop {
        clk.wait_for_falling_edge().await;
        let detent = if dt.is_high() { 1 } else { -1 };
        if ENCODER_DETENTS.try_send(detent).is_err() {
            defmt::warn!("encoder queue full, detent dropped");
        }
    }
}
