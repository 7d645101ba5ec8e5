//! Closed intervals over rates and channel counts
//!
//! An interval is the unit of negotiation: the host framework narrows a rate
//! interval and a channel interval until they reach a fixed point. The empty
//! interval is a regular value meaning "no legal value remains".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed range `[min, max]` over `u32`
///
/// Empty whenever `min > max`; the canonical empty value is
/// `[u32::MAX, 0]`, which also serves as the seed of a fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    min: u32,
    max: u32,
    #[serde(default = "default_integer")]
    integer: bool,
}

fn default_integer() -> bool {
    true
}

impl Interval {
    pub const fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            max,
            integer: true,
        }
    }

    pub const fn single(value: u32) -> Self {
        Self::new(value, value)
    }

    pub const fn empty() -> Self {
        Self::new(u32::MAX, 0)
    }

    pub const fn full() -> Self {
        Self::new(0, u32::MAX)
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Whether only integral values are legal
    pub fn is_integer(&self) -> bool {
        self.integer
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn is_single(&self) -> bool {
        self.min == self.max
    }

    pub fn contains(&self, value: u32) -> bool {
        !self.is_empty() && self.min <= value && value <= self.max
    }

    /// `other` lies entirely inside `self`
    pub fn includes(&self, other: &Interval) -> bool {
        other.is_empty() || (self.contains(other.min) && self.contains(other.max))
    }

    /// Widen to cover `value`
    pub fn fold(&mut self, value: u32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
            integer: self.integer || other.integer,
        }
    }

    /// Narrow in place to the intersection with `other`
    ///
    /// Returns whether the interval changed. Narrowing to nothing leaves an
    /// empty interval; callers check `is_empty` to reject.
    pub fn refine(&mut self, other: &Interval) -> bool {
        let refined = self.intersect(other);
        if refined.is_empty() && self.is_empty() {
            return false;
        }
        let changed = refined != *self;
        *self = refined;
        changed
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::full()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[empty]")
        } else if self.is_single() {
            write!(f, "[{}]", self.min)
        } else {
            write!(f, "[{}, {}]", self.min, self.max)
        }
    }
}

/// Parses `N` or `MIN..MAX`
impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| format!("invalid bound '{}': {}", v.trim(), e))
        };

        match s.split_once("..") {
            Some((min, max)) => {
                let (min, max) = (parse(min)?, parse(max)?);
                if min > max {
                    return Err(format!("empty interval {}..{}", min, max));
                }
                Ok(Interval::new(min, max))
            }
            None => parse(s).map(Interval::single),
        }
    }
}
