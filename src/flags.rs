//! Conditions encountered while solving for a path.
//!
//! The path solver never fails on numerical problems. Instead, it records
//! them as [`Flag`]s which are accumulated into [`ConvergenceFlags`], both per
//! period and for the whole run. Flag `i` contributes `2^i` to the bitmask
//! returned by [`ConvergenceFlags::bits`].

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A single condition recorded by the path solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// A per-period rootfinding did not report success.
    NonConvergence = 0,
    /// A per-period rootfinding reported success, but the residual is above
    /// the path tolerance.
    ToleranceNotMet = 1,
    /// The working trajectory contains NaN.
    Nan = 2,
    /// The working trajectory contains infinity.
    Inf = 3,
    /// The window could not converge within the allowed number of outer
    /// loops.
    BudgetExhausted = 4,
}

impl Flag {
    /// All flags ordered by their bit.
    pub const ALL: [Flag; 5] = [
        Flag::NonConvergence,
        Flag::ToleranceNotMet,
        Flag::Nan,
        Flag::Inf,
        Flag::BudgetExhausted,
    ];

    /// Bits of all flags.
    const MASK: u8 = (1 << Flag::ALL.len()) - 1;

    /// The bit of the flag in [`ConvergenceFlags::bits`].
    pub fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Human-readable description of the condition.
    pub fn message(self) -> &'static str {
        match self {
            Flag::NonConvergence => "non-convergence in root finding",
            Flag::ToleranceNotMet => "ftol not reached in root finding",
            Flag::Nan => "contains NaNs",
            Flag::Inf => "contains infs",
            Flag::BudgetExhausted => "max_iter reached",
        }
    }
}

/// Set of [`Flag`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConvergenceFlags(u8);

impl ConvergenceFlags {
    /// No conditions.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Reconstructs the set from the bitmask. Unknown bits are dropped.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Flag::MASK)
    }

    /// The bitmask of the set.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Adds the flag to the set.
    pub fn insert(&mut self, flag: Flag) {
        self.0 |= flag.bit();
    }

    /// Adds the flag to the set if `condition` holds.
    pub fn set_if(&mut self, flag: Flag, condition: bool) {
        if condition {
            self.insert(flag);
        }
    }

    /// Returns `true` if the set contains the flag.
    pub fn contains(&self, flag: Flag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Returns `true` if no condition was recorded.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates over the flags in the set in the order of their bits.
    pub fn iter(&self) -> impl Iterator<Item = Flag> + '_ {
        Flag::ALL.into_iter().filter(move |flag| self.contains(*flag))
    }
}

impl From<Flag> for ConvergenceFlags {
    fn from(flag: Flag) -> Self {
        Self(flag.bit())
    }
}

impl BitOr for ConvergenceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ConvergenceFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ConvergenceFlags {
    /// Renders the triggered conditions as a comma-separated list, each item
    /// preceded by `", "` so that it can be appended to a summary line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flag in self.iter() {
            write!(f, ", {}", flag.message())?;
        }
        Ok(())
    }
}
