//! Screen directions and edge bitmasks.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// One of the four screen directions a neighbor can sit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
    ];

    /// Stable index, used for neighbor slots and edge histories.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Up => 2,
            Self::Down => 3,
        }
    }

    /// The bit this direction occupies in an [`EdgeMask`].
    #[must_use]
    pub fn bit(self) -> u8 {
        1 << self.index()
    }

    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Up => "up",
            Self::Down => "down",
        };
        f.write_str(s)
    }
}

/// Which screen edges the cursor currently touches, one bit per
/// [`Direction`]. Bits outside the low four are invalid on the wire.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode,
)]
pub struct EdgeMask(pub u8);

impl EdgeMask {
    pub const VALID_BITS: u8 = 0x0f;

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 & !Self::VALID_BITS == 0
    }

    #[must_use]
    pub fn contains(self, dir: Direction) -> bool {
        self.0 & dir.bit() != 0
    }

    #[must_use]
    pub fn with(self, dir: Direction) -> Self {
        Self(self.0 | dir.bit())
    }

    #[must_use]
    pub fn without(self, dir: Direction) -> Self {
        Self(self.0 & !dir.bit())
    }
}
