use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{BalanceConfig, ScrambleMode};
use crate::types::{Boost, ScrambleReason, Side};

/// Consecutive round wins per side.
///
/// A side's losing streak is the other side's win streak.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakTracker {
    a_wins: u32,
    b_wins: u32,
    /// Decided rounds since the last reset
    rounds_completed: u32,
    /// `rounds_completed` when the last periodic scramble fired
    #[serde(default)]
    periodic_at: u32,
}

impl StreakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Winner's streak grows, loser's resets. A draw (`None`) or an
    /// unassigned winner leaves both untouched.
    pub fn record_round_outcome(&mut self, winner: Option<Side>) {
        match winner {
            Some(Side::A) => {
                self.a_wins += 1;
                self.b_wins = 0;
            }
            Some(Side::B) => {
                self.b_wins += 1;
                self.a_wins = 0;
            }
            _ => return,
        }
        self.rounds_completed += 1;
        debug!(a = self.a_wins, b = self.b_wins, "streaks updated");
    }

    pub fn win_streak(&self, side: Side) -> u32 {
        match side {
            Side::A => self.a_wins,
            Side::B => self.b_wins,
            Side::Unassigned => 0,
        }
    }

    pub fn lose_streak(&self, side: Side) -> u32 {
        self.win_streak(side.other())
    }

    pub fn rounds_completed(&self) -> u32 {
        self.rounds_completed
    }

    /// Side currently on a losing run, if any
    pub fn losing_side(&self) -> Option<Side> {
        if self.a_wins > 0 {
            Some(Side::B)
        } else if self.b_wins > 0 {
            Some(Side::A)
        } else {
            None
        }
    }

    pub fn should_scramble(
        &self,
        config: &BalanceConfig,
        halftime: bool,
    ) -> Option<ScrambleReason> {
        let settings = &config.scramble;
        match settings.mode {
            ScrambleMode::None => None,
            ScrambleMode::Always => Some(ScrambleReason::Always),
            ScrambleMode::Halftime => halftime.then_some(ScrambleReason::Halftime),
            ScrambleMode::WinStreak => {
                let best = self.a_wins.max(self.b_wins);
                (settings.win_streak > 0 && best >= settings.win_streak)
                    .then_some(ScrambleReason::WinStreak)
            }
            ScrambleMode::Periodic => (settings.every_rounds > 0
                && self.rounds_completed > 0
                && self.rounds_completed % settings.every_rounds == 0
                && self.rounds_completed != self.periodic_at)
                .then_some(ScrambleReason::Periodic),
        }
    }

    /// Consume the current period so draws that follow do not fire it again
    pub fn mark_periodic(&mut self) {
        self.periodic_at = self.rounds_completed;
    }

    /// Side that should be treated as stronger-than-measured during skill
    /// balancing because it keeps losing.
    pub fn boost_target(&self, config: &BalanceConfig) -> Option<Boost> {
        let side = self.losing_side()?;
        let lose_streak = self.lose_streak(side);
        let percentage = config.boost.percentage_for(lose_streak)?;
        if percentage == 0 {
            return None;
        }
        Some(Boost {
            side,
            percentage,
            lose_streak,
        })
    }

    pub fn reset(&mut self) {
        self.a_wins = 0;
        self.b_wins = 0;
    }

    /// Session boundary: streaks and the round count start over
    pub fn reset_all(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScrambleSettings;

    fn wins(tracker: &mut StreakTracker, side: Side, n: u32) {
        for _ in 0..n {
            tracker.record_round_outcome(Some(side));
        }
    }

    #[test]
    fn test_winner_grows_loser_resets() {
        let mut tracker = StreakTracker::new();
        wins(&mut tracker, Side::A, 3);
        assert_eq!(tracker.win_streak(Side::A), 3);
        assert_eq!(tracker.lose_streak(Side::B), 3);

        tracker.record_round_outcome(Some(Side::B));
        assert_eq!(tracker.win_streak(Side::A), 0);
        assert_eq!(tracker.win_streak(Side::B), 1);
        assert_eq!(tracker.rounds_completed(), 4);
    }

    #[test]
    fn test_draw_leaves_streaks_untouched() {
        let mut tracker = StreakTracker::new();
        wins(&mut tracker, Side::B, 2);
        tracker.record_round_outcome(None);
        assert_eq!(tracker.win_streak(Side::B), 2);
        assert_eq!(tracker.rounds_completed(), 2);
    }

    #[test]
    fn test_win_streak_scramble() {
        let mut config = BalanceConfig::default();
        config.scramble = ScrambleSettings {
            mode: ScrambleMode::WinStreak,
            win_streak: 3,
            ..ScrambleSettings::default()
        };
        let mut tracker = StreakTracker::new();
        wins(&mut tracker, Side::A, 2);
        assert_eq!(tracker.should_scramble(&config, false), None);
        wins(&mut tracker, Side::A, 1);
        assert_eq!(tracker.should_scramble(&config, false), Some(ScrambleReason::WinStreak));

        tracker.reset();
        assert_eq!(tracker.should_scramble(&config, false), None);
    }

    #[test]
    fn test_periodic_and_halftime_scramble() {
        let mut config = BalanceConfig::default();
        config.scramble.mode = ScrambleMode::Periodic;
        config.scramble.every_rounds = 3;
        let mut tracker = StreakTracker::new();
        assert_eq!(tracker.should_scramble(&config, false), None);
        wins(&mut tracker, Side::A, 1);
        wins(&mut tracker, Side::B, 2);
        assert_eq!(tracker.should_scramble(&config, false), Some(ScrambleReason::Periodic));

        config.scramble.mode = ScrambleMode::Halftime;
        assert_eq!(tracker.should_scramble(&config, false), None);
        assert_eq!(tracker.should_scramble(&config, true), Some(ScrambleReason::Halftime));
    }

    #[test]
    fn test_periodic_fires_once_per_period_across_draws() {
        let mut config = BalanceConfig::default();
        config.scramble.mode = ScrambleMode::Periodic;
        config.scramble.every_rounds = 2;
        let mut tracker = StreakTracker::new();
        wins(&mut tracker, Side::A, 1);
        wins(&mut tracker, Side::B, 1);
        assert_eq!(tracker.should_scramble(&config, false), Some(ScrambleReason::Periodic));
        tracker.mark_periodic();

        tracker.record_round_outcome(None);
        assert_eq!(tracker.should_scramble(&config, false), None);

        wins(&mut tracker, Side::A, 2);
        assert_eq!(tracker.should_scramble(&config, false), Some(ScrambleReason::Periodic));
    }

    #[test]
    fn test_boost_targets_losing_side() {
        let config = BalanceConfig::default();
        let mut tracker = StreakTracker::new();
        wins(&mut tracker, Side::A, 4);
        assert_eq!(tracker.boost_target(&config), None);

        wins(&mut tracker, Side::A, 1);
        let boost = tracker.boost_target(&config).unwrap();
        assert_eq!(boost.side, Side::B);
        assert_eq!(boost.percentage, 20);
        assert_eq!(boost.lose_streak, 5);
    }

    #[test]
    fn test_progressive_boost() {
        let mut config = BalanceConfig::default();
        config.boost.progressive = true;
        config.boost.after_lose_streak = 3;
        let mut tracker = StreakTracker::new();
        wins(&mut tracker, Side::B, 3);
        assert_eq!(tracker.boost_target(&config).unwrap().percentage, 10);
        wins(&mut tracker, Side::B, 4);
        assert_eq!(tracker.boost_target(&config).unwrap().percentage, 30);
    }
}
