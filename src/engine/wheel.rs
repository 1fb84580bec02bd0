//! European wheel layout and selection matching.
//!
//! Everything here is a pure function of the winning number. The round feed
//! also reports a color, but upstream data has been observed to contradict
//! the layout; the color used for settlement is always recomputed from the
//! number and the feed value is only compared against it for logging.

use serde::{Deserialize, Serialize};

/// The zero pocket. No outside selection covers it.
pub const HOUSE_NUMBER: u8 = 0;

/// Highest pocket on the wheel.
pub const MAX_NUMBER: u8 = 36;

/// Red pockets on a European layout.
const RED_NUMBERS: [u8; 18] = [
    1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36,
];

/// Pocket color derived from the winning number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Black,
    Green,
}

impl Color {
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Black => "black",
            Color::Green => "green",
        }
    }
}

/// Derive the pocket color from the winning number.
pub fn derive_color(number: u8) -> Color {
    if number == HOUSE_NUMBER || number > MAX_NUMBER {
        Color::Green
    } else if RED_NUMBERS.contains(&number) {
        Color::Red
    } else {
        Color::Black
    }
}

/// The bet category armed for automatic betting.
///
/// `Awaiting` is the parked state: the automation is running but no category
/// has been chosen yet, so round-open events produce no bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Awaiting,
    Red,
    Black,
    Even,
    Odd,
    Low,
    High,
}

impl Selection {
    /// Wire code used in the bet-submit frame.
    pub fn wire_code(&self) -> u8 {
        match self {
            Selection::Awaiting => 0,
            Selection::Red => 1,
            Selection::Black => 2,
            Selection::Even => 3,
            Selection::Odd => 4,
            Selection::Low => 5,
            Selection::High => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::Awaiting => "awaiting",
            Selection::Red => "red",
            Selection::Black => "black",
            Selection::Even => "even",
            Selection::Odd => "odd",
            Selection::Low => "low",
            Selection::High => "high",
        }
    }

    /// Whether a winning number satisfies this selection.
    ///
    /// The zero pocket satisfies no outside selection, so it loses for every
    /// armed category.
    pub fn matches(&self, number: u8) -> bool {
        if number == HOUSE_NUMBER || number > MAX_NUMBER {
            return false;
        }
        match self {
            Selection::Awaiting => false,
            Selection::Red => derive_color(number) == Color::Red,
            Selection::Black => derive_color(number) == Color::Black,
            Selection::Even => number % 2 == 0,
            Selection::Odd => number % 2 == 1,
            Selection::Low => (1..=18).contains(&number),
            Selection::High => (19..=36).contains(&number),
        }
    }
}

/// Outcome of one round, with the color recomputed from the number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round_id: String,
    pub number: u8,
    pub color: Color,
}

impl RoundOutcome {
    pub fn from_number(round_id: impl Into<String>, number: u8) -> Self {
        Self {
            round_id: round_id.into(),
            number,
            color: derive_color(number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_derivation_is_stable() {
        for number in 0..=MAX_NUMBER {
            assert_eq!(derive_color(number), derive_color(number));
        }
        assert_eq!(derive_color(0), Color::Green);
        assert_eq!(derive_color(17), Color::Red);
        assert_eq!(derive_color(20), Color::Black);
        assert_eq!(derive_color(36), Color::Red);
    }

    #[test]
    fn test_red_black_partition_covers_wheel() {
        let reds = (1..=MAX_NUMBER)
            .filter(|&n| derive_color(n) == Color::Red)
            .count();
        let blacks = (1..=MAX_NUMBER)
            .filter(|&n| derive_color(n) == Color::Black)
            .count();
        assert_eq!(reds, 18);
        assert_eq!(blacks, 18);
    }

    #[test]
    fn test_house_number_satisfies_no_selection() {
        for sel in [
            Selection::Red,
            Selection::Black,
            Selection::Even,
            Selection::Odd,
            Selection::Low,
            Selection::High,
        ] {
            assert!(!sel.matches(HOUSE_NUMBER), "{:?} must lose on zero", sel);
        }
    }

    #[test]
    fn test_selection_matching() {
        assert!(Selection::Red.matches(17));
        assert!(!Selection::Black.matches(17));
        assert!(Selection::Odd.matches(17));
        assert!(!Selection::Even.matches(17));
        assert!(Selection::Low.matches(17));
        assert!(!Selection::High.matches(17));

        assert!(Selection::Black.matches(20));
        assert!(Selection::Even.matches(20));
        assert!(Selection::High.matches(20));
    }

    #[test]
    fn test_awaiting_never_matches() {
        for number in 0..=MAX_NUMBER {
            assert!(!Selection::Awaiting.matches(number));
        }
    }

    #[test]
    fn test_outcome_ignores_external_color() {
        // A feed claiming 17 is black must not survive reconstruction.
        let outcome = RoundOutcome::from_number("r-1", 17);
        assert_eq!(outcome.color, Color::Red);
    }
}
