use serde::{Deserialize, Serialize};
use time::Date;

use crate::Amount;

/// Streak cap and number of slots in the check-in schedule.
pub const CHECKIN_CYCLE: u8 = 7;

/// Reward schedule of the 7-day check-in cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckinSchedule([Amount; CHECKIN_CYCLE as usize]);

impl CheckinSchedule {
    /// Create a schedule.
    pub const fn new(amounts: [Amount; CHECKIN_CYCLE as usize]) -> Self {
        Self(amounts)
    }

    /// Create a schedule from a list of amounts.
    ///
    /// Extra amounts are dropped and missing slots pay nothing.
    pub fn from_amounts(amounts: impl IntoIterator<Item = Amount>) -> Self {
        let mut slots = [Amount::ZERO; CHECKIN_CYCLE as usize];
        for (slot, amount) in slots.iter_mut().zip(amounts) {
            *slot = amount;
        }
        Self(slots)
    }

    /// Reward for the given slot, wrapping at the cycle length.
    pub fn reward(&self, slot: u8) -> Amount {
        self.0[usize::from(slot % CHECKIN_CYCLE)]
    }

    /// Amounts of the schedule.
    pub fn amounts(&self) -> &[Amount] {
        &self.0
    }
}

impl Default for CheckinSchedule {
    fn default() -> Self {
        use rust_decimal::Decimal;

        Self([
            Decimal::new(2, 2),
            Decimal::new(4, 2),
            Decimal::new(6, 2),
            Decimal::new(8, 2),
            Decimal::new(10, 2),
            Decimal::new(12, 2),
            Decimal::new(15, 2),
        ])
    }
}

/// Per-account check-in state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinState {
    /// Current streak in `[0, 7]`.
    pub streak: u8,
    /// Last claimed UTC day.
    pub last_claim: Option<Date>,
}

impl CheckinState {
    /// Whether a claim is allowed on `today`.
    pub fn can_claim(&self, today: Date) -> bool {
        self.last_claim != Some(today)
    }

    /// The streak a claim on `today` would produce.
    ///
    /// Consecutive days grow the streak up to the cap; a gap or a first claim
    /// restarts it at 1.
    pub fn streak_after_claim(&self, today: Date) -> u8 {
        match self.last_claim {
            Some(last) if today.previous_day() == Some(last) => {
                self.streak.saturating_add(1).min(CHECKIN_CYCLE)
            }
            _ => 1,
        }
    }

    /// The streak the next allowed claim would produce.
    pub fn next_claim_streak(&self, today: Date) -> u8 {
        if self.can_claim(today) {
            self.streak_after_claim(today)
        } else {
            self.streak.saturating_add(1).min(CHECKIN_CYCLE)
        }
    }

    /// Apply a claim on `today`, returning the new state.
    pub fn claim(&self, today: Date) -> crate::Result<Self> {
        if !self.can_claim(today) {
            return Err(crate::Error::AlreadyClaimedToday);
        }
        Ok(Self {
            streak: self.streak_after_claim(today),
            last_claim: Some(today),
        })
    }
}
