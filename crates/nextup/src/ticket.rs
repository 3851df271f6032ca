//! Two-symbol cyclic tickets.
//!
//! A [`Ticket`] is a letter `A..=Z` followed by a digit `0..=9`, giving a closed
//! cycle of [`CYCLE_LEN`] values:
//!
//! ```text
//! A0 -> A1 -> ... -> A9 -> B0 -> ... -> Z9 -> A0
//! ```
//!
//! Ordering is letter-major, digit-minor. The raw-string helpers
//! [`successor_of`] and [`compare`] are total over arbitrary input: anything
//! that is not a well-formed ticket behaves as the cycle origin for
//! succession and sorts below every real ticket for comparison.

use crate::{Error, Result};
use core::{cmp::Ordering, fmt, str::FromStr};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of distinct tickets in the cycle.
pub const CYCLE_LEN: usize = 26 * 10;

/// A human-facing queue position such as `B7`.
///
/// Tickets are plain `Copy` values; the derived `Ord` compares the letter
/// first and the digit second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket {
    letter: u8,
    digit: u8,
}

impl Ticket {
    /// `A0`, the start of the cycle. Also the canonical "nothing issued"
    /// value reported to observers.
    pub const ORIGIN: Self = Self {
        letter: b'A',
        digit: b'0',
    };

    /// `A1`, the first ticket handed out by an empty store.
    pub const FIRST: Self = Self {
        letter: b'A',
        digit: b'1',
    };

    /// `Z9`, the last ticket before the cycle wraps.
    pub const LAST: Self = Self {
        letter: b'Z',
        digit: b'9',
    };

    /// Builds a ticket from its two symbols, or `None` if either is out of
    /// range.
    pub const fn new(letter: char, digit: char) -> Option<Self> {
        if letter.is_ascii_uppercase() && digit.is_ascii_digit() {
            Some(Self {
                letter: letter as u8,
                digit: digit as u8,
            })
        } else {
            None
        }
    }

    /// Strictly parses a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTicket`] unless `raw` is exactly one uppercase
    /// ASCII letter followed by one ASCII digit.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_lenient(raw).ok_or_else(|| Error::InvalidTicket {
            raw: raw.to_string(),
        })
    }

    /// Parses a ticket, mapping malformed input to `None`.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.as_bytes() {
            [letter, digit] => Self::new(*letter as char, *digit as char),
            _ => None,
        }
    }

    /// Parses a ticket, mapping malformed input to [`Ticket::ORIGIN`].
    pub fn parse_or_origin(raw: &str) -> Self {
        Self::parse_lenient(raw).unwrap_or(Self::ORIGIN)
    }

    pub const fn letter(self) -> char {
        self.letter as char
    }

    pub const fn digit(self) -> char {
        self.digit as char
    }

    /// Position of this ticket in the cycle, `0` for `A0` up to `259` for
    /// `Z9`.
    pub const fn index(self) -> usize {
        (self.letter - b'A') as usize * 10 + (self.digit - b'0') as usize
    }

    /// Inverse of [`Ticket::index`]; indices wrap modulo [`CYCLE_LEN`].
    pub const fn from_index(index: usize) -> Self {
        let index = index % CYCLE_LEN;
        Self {
            letter: b'A' + (index / 10) as u8,
            digit: b'0' + (index % 10) as u8,
        }
    }

    /// The next ticket in cycle order. `Z9` wraps to `A0`.
    pub const fn successor(self) -> Self {
        Self::from_index(self.index() + 1)
    }
}

impl Default for Ticket {
    fn default() -> Self {
        Self::ORIGIN
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.letter(), self.digit())
    }
}

impl FromStr for Ticket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Ticket {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ticket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Successor of a raw ticket string. Malformed input yields `A0`.
pub fn successor_of(raw: &str) -> Ticket {
    Ticket::parse_lenient(raw).map_or(Ticket::ORIGIN, Ticket::successor)
}

/// Compares two raw ticket strings.
///
/// Well-formed tickets compare by (letter, digit). A malformed operand is
/// never greater than anything: it sorts below every real ticket and equal to
/// other malformed input.
pub fn compare(a: &str, b: &str) -> Ordering {
    Ticket::parse_lenient(a).cmp(&Ticket::parse_lenient(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(raw: &str) -> Ticket {
        Ticket::parse(raw).unwrap()
    }

    #[test]
    fn successor_steps_digit_then_letter() {
        assert_eq!(t("A0").successor(), t("A1"));
        assert_eq!(t("A9").successor(), t("B0"));
        assert_eq!(t("M4").successor(), t("M5"));
        assert_eq!(t("Y9").successor(), t("Z0"));
    }

    #[test]
    fn successor_wraps_at_end_of_cycle() {
        assert_eq!(Ticket::LAST.successor(), Ticket::ORIGIN);
        assert_eq!(successor_of("Z9"), Ticket::ORIGIN);
    }

    #[test]
    fn successor_visits_every_ticket_once() {
        let mut seen = std::collections::HashSet::new();
        let mut current = Ticket::ORIGIN;
        for _ in 0..CYCLE_LEN {
            assert!(seen.insert(current), "{current} visited twice");
            let next = current.successor();
            assert!(Ticket::parse_lenient(&next.to_string()).is_some());
            current = next;
        }
        assert_eq!(current, Ticket::ORIGIN);
        assert_eq!(seen.len(), CYCLE_LEN);
    }

    #[test]
    fn malformed_successor_is_origin() {
        for raw in ["", "A", "A10", "a1", "1A", "AA", "Ä1", "  "] {
            assert_eq!(successor_of(raw), Ticket::ORIGIN, "input {raw:?}");
        }
    }

    #[test]
    fn ordering_is_letter_major() {
        assert_eq!(compare("A9", "B0"), Ordering::Less);
        assert_eq!(compare("B0", "A9"), Ordering::Greater);
        assert_eq!(compare("C3", "C3"), Ordering::Equal);
        assert_eq!(compare("C3", "C4"), Ordering::Less);
        assert!(t("Z0") > t("Y9"));
    }

    #[test]
    fn ordering_is_total_and_transitive() {
        let all: Vec<Ticket> = (0..CYCLE_LEN).map(Ticket::from_index).collect();
        for (i, a) in all.iter().enumerate() {
            for (j, b) in all.iter().enumerate() {
                assert_eq!(a.cmp(b), i.cmp(&j));
            }
        }
    }

    #[test]
    fn malformed_never_compares_greater() {
        assert_eq!(compare("??", "A0"), Ordering::Less);
        assert_eq!(compare("A0", "xyz"), Ordering::Greater);
        assert_eq!(compare("", "zz"), Ordering::Equal);
        assert_ne!(compare("Q", "A0"), Ordering::Greater);
    }

    #[test]
    fn index_round_trips_through_cycle() {
        assert_eq!(Ticket::ORIGIN.index(), 0);
        assert_eq!(Ticket::LAST.index(), CYCLE_LEN - 1);
        assert_eq!(Ticket::from_index(CYCLE_LEN), Ticket::ORIGIN);
        assert_eq!(Ticket::from_index(13), t("B3"));
    }

    #[test]
    fn strict_parse_reports_input() {
        assert_eq!(
            Ticket::parse("a1"),
            Err(Error::InvalidTicket {
                raw: "a1".to_string()
            })
        );
        assert_eq!("K2".parse::<Ticket>(), Ok(t("K2")));
        assert_eq!(Ticket::parse_or_origin("bogus"), Ticket::ORIGIN);
    }

    #[test]
    fn serializes_as_plain_string() {
        assert_eq!(serde_json::to_string(&t("D5")).unwrap(), "\"D5\"");
        assert_eq!(serde_json::from_str::<Ticket>("\"Z9\"").unwrap(), Ticket::LAST);
        assert!(serde_json::from_str::<Ticket>("\"Z10\"").is_err());
    }
}
