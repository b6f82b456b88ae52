use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// An inclusive range of bit positions, `low <= high`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Bounds", into = "[u32; 2]")]
pub struct BitInterval {
    low: u32,
    high: u32,
}

impl BitInterval {
    /// The bounds may be given in either order.
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// The interval of `width` bits starting at `low`, or `None` if `width` is zero or the interval
    /// would run past `u32::MAX`.
    pub fn with_width(low: u32, width: u32) -> Option<Self> {
        let high = low.checked_add(width.checked_sub(1)?)?;
        Some(Self { low, high })
    }

    pub fn low(self) -> u32 {
        self.low
    }

    pub fn high(self) -> u32 {
        self.high
    }

    pub fn width(self) -> u64 {
        u64::from(self.high - self.low) + 1
    }

    /// Number of bits needed to hold every position in the interval, counting from bit zero.
    pub fn extent(self) -> u64 {
        u64::from(self.high) + 1
    }

    pub fn contains(self, bit: u32) -> bool {
        self.low <= bit && bit <= self.high
    }

    pub fn overlaps(self, other: BitInterval) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    /// The interval of the same width anchored at bit zero.
    pub fn rebased(self) -> Self {
        Self {
            low: 0,
            high: self.high - self.low,
        }
    }
}

impl fmt::Display for BitInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

impl From<[u32; 2]> for BitInterval {
    fn from([a, b]: [u32; 2]) -> Self {
        Self::new(a, b)
    }
}

/// The persisted `[low, high]` pair. Unlike the constructors, it does not reorder its bounds.
#[derive(Deserialize)]
#[serde(transparent)]
struct Bounds([u32; 2]);

impl TryFrom<Bounds> for BitInterval {
    type Error = String;

    fn try_from(Bounds([low, high]): Bounds) -> Result<Self, Self::Error> {
        if low > high {
            return Err(format!(
                "bit interval [{low}, {high}] must list the low bit first"
            ));
        }
        Ok(Self { low, high })
    }
}

impl From<BitInterval> for [u32; 2] {
    fn from(interval: BitInterval) -> Self {
        [interval.low, interval.high]
    }
}

impl From<(u32, u32)> for BitInterval {
    fn from((a, b): (u32, u32)) -> Self {
        Self::new(a, b)
    }
}

impl From<RangeInclusive<u32>> for BitInterval {
    fn from(range: RangeInclusive<u32>) -> Self {
        Self::new(*range.start(), *range.end())
    }
}
