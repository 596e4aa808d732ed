//! The line-based control protocol and link supervision.
//!
//! The host side of the serial link speaks short `\n`-terminated commands.
//! Parsing is strict: a command with a malformed or out-of-range argument is
//! not a command at all, and the engine echoes it back behind `err ` so the
//! host can see exactly what was rejected.

use crate::configuration::{COMM_TIMEOUT_MS, NUM_POTS};

/// A parsed control line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// `hello`: handshake request, answered with the announcement.
    Hello,
    /// `cc <pot> <controller>`: point a pot at a different controller.
    MapPot {
        /// Pot index, 0..=13.
        pot: u8,
        /// Controller number, 0..=127.
        cc: u8,
    },
    /// `reset`: silence held notes and re-announce the MPE configuration.
    Reset,
    /// Anything else, kept for the error echo.
    Unknown(&'a str),
}

/// Parses one inbound line. Leading and trailing whitespace is ignored.
pub fn parse(line: &str) -> Command<'_> {
    let trimmed = line.trim();
    let mut words = trimmed.split_ascii_whitespace();
    let command = match words.next() {
        Some("hello") => Some(Command::Hello),
        Some("reset") => Some(Command::Reset),
        Some("cc") => parse_map(&mut words),
        _ => None,
    };
    match command {
        Some(command) if words.next().is_none() => command,
        _ => Command::Unknown(trimmed),
    }
}

fn parse_map<'a>(words: &mut impl Iterator<Item = &'a str>) -> Option<Command<'a>> {
    let pot: u8 = words.next()?.parse().ok()?;
    let cc: u8 = words.next()?.parse().ok()?;
    if (pot as usize) < NUM_POTS && cc <= 127 {
        Some(Command::MapPot { pot, cc })
    } else {
        None
    }
}

/// Supervises the ASCII side of the link.
///
/// After a handshake the host is expected to keep talking; when nothing
/// arrives for [`COMM_TIMEOUT_MS`] the controller re-announces itself and
/// drops back to standalone operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Link {
    linked: bool,
    last_inbound: u64,
}

impl Link {
    /// Constructs an unlinked supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records inbound ASCII activity.
    pub fn activity(&mut self, now: u64) {
        self.last_inbound = now;
    }

    /// Marks the link established by a handshake.
    pub fn handshake(&mut self, now: u64) {
        #[cfg(feature = "defmt")]
        if !self.linked {
            defmt::info!("host linked");
        }
        self.linked = true;
        self.last_inbound = now;
    }

    /// Checks the timeout. Returns `true` when the link just lapsed and the
    /// announcement should be re-emitted.
    pub fn poll(&mut self, now: u64) -> bool {
        if self.linked && now.saturating_sub(self.last_inbound) >= COMM_TIMEOUT_MS {
            self.linked = false;
            #[cfg(feature = "defmt")]
            defmt::info!("host link timed out");
            true
        } else {
            false
        }
    }

    /// Whether a host is currently linked.
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_three_commands_parse() {
        assert_eq!(Command::Hello, parse("hello"));
        assert_eq!(Command::Reset, parse("reset"));
        assert_eq!(Command::MapPot { pot: 3, cc: 101 }, parse("cc 3 101"));
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        assert_eq!(Command::Hello, parse("  hello "));
        assert_eq!(Command::MapPot { pot: 0, cc: 74 }, parse("cc  0   74"));
    }

    #[test]
    fn out_of_range_arguments_are_rejected() {
        assert_eq!(Command::Unknown("cc 14 5"), parse("cc 14 5"));
        assert_eq!(Command::Unknown("cc 0 128"), parse("cc 0 128"));
    }

    #[test]
    fn malformed_lines_are_rejected_verbatim() {
        assert_eq!(Command::Unknown("cc 1"), parse("cc 1"));
        assert_eq!(Command::Unknown("cc one 74"), parse("cc one 74"));
        assert_eq!(Command::Unknown("hello there"), parse("hello there"));
        assert_eq!(Command::Unknown("ping"), parse("ping"));
    }

    #[test]
    fn timeout_fires_once_per_handshake() {
        let mut link = Link::new();
        assert!(!link.poll(10_000), "unlinked supervisor must stay quiet");

        link.handshake(0);
        assert!(!link.poll(COMM_TIMEOUT_MS - 1));
        assert!(link.poll(COMM_TIMEOUT_MS));
        assert!(!link.is_linked());
        assert!(!link.poll(COMM_TIMEOUT_MS * 2), "already lapsed");
    }

    #[test]
    fn activity_defers_the_timeout() {
        let mut link = Link::new();
        link.handshake(0);
        link.activity(1500);
        assert!(!link.poll(2500));
        assert!(link.poll(3500));
    }
}
