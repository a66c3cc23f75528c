//! Balancer configuration: defaults, TOML/JSON loading and range clamping.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::BalanceResult;
use crate::metrics::SkillMetric;

/// How the gap between group strengths is compared to `skill_threshold`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    /// `|mean(A) - mean(B)| > skill_threshold`
    #[default]
    Difference,
    /// `max(mean) / min(mean) > skill_threshold`
    Ratio,
}

/// Host events that may start a balancing pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceTrigger {
    RoundStart,
    RoundEnd,
    PlayerJoin,
    PlayerDisconnect,
}

/// When a full reshuffle replaces the regular balancers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrambleMode {
    #[default]
    None,
    /// Every `every_rounds` completed rounds
    Periodic,
    /// When one side has won `win_streak` rounds in a row
    WinStreak,
    /// At the halftime side swap
    Halftime,
    /// Every pass scrambles instead of balancing
    Always,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrambleStyle {
    Random,
    #[default]
    Skill,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrambleSettings {
    pub mode: ScrambleMode,
    pub style: ScrambleStyle,
    pub every_rounds: u32,
    pub win_streak: u32,
    /// Zero counters of everyone who was scrambled
    pub reset_stats: bool,
    /// Fewer eligible participants than this and the scramble is skipped
    pub min_participants: usize,
}

impl Default for ScrambleSettings {
    fn default() -> Self {
        Self {
            mode: ScrambleMode::None,
            style: ScrambleStyle::Skill,
            every_rounds: 0,
            win_streak: 5,
            reset_stats: true,
            min_participants: 4,
        }
    }
}

/// Boost percent granted once a side has lost `lose_streak` rounds in a row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostTier {
    pub lose_streak: u32,
    pub percentage: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostSettings {
    /// Losing streak that activates the boost, 0 disables it
    pub after_lose_streak: u32,
    /// Integer percent
    pub percentage: u32,
    /// Use `tiers` instead of the flat percentage
    pub progressive: bool,
    pub tiers: Vec<BoostTier>,
}

impl Default for BoostSettings {
    fn default() -> Self {
        Self {
            after_lose_streak: 5,
            percentage: 20,
            progressive: false,
            tiers: vec![
                BoostTier { lose_streak: 3, percentage: 10 },
                BoostTier { lose_streak: 5, percentage: 20 },
                BoostTier { lose_streak: 7, percentage: 30 },
            ],
        }
    }
}

impl BoostSettings {
    /// Boost percent for a side that has lost `lose_streak` rounds in a row,
    /// or `None` when no boost applies.
    pub fn percentage_for(&self, lose_streak: u32) -> Option<u32> {
        if self.after_lose_streak == 0 || lose_streak < self.after_lose_streak {
            return None;
        }
        if !self.progressive {
            return Some(self.percentage);
        }
        self.tiers
            .iter()
            .filter(|tier| tier.lose_streak <= lose_streak)
            .max_by_key(|tier| tier.lose_streak)
            .map(|tier| tier.percentage)
            .or(Some(self.percentage))
    }
}

/// Balancer configuration parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Below this many assigned participants nothing is balanced
    pub min_participants: usize,
    /// Highest allowed |size(A) - size(B)|
    pub max_size_difference: usize,
    pub skill_metric: SkillMetric,
    pub skill_threshold: f64,
    pub threshold_kind: ThresholdKind,
    /// Round starts a participant must spend on a side before moving again
    pub min_rounds_before_switch: u32,
    /// Rounds of immunity after a move
    pub immunity_rounds: u32,
    /// Only correct sizes, never swap for skill
    pub size_only: bool,
    pub balance_triggers: Vec<BalanceTrigger>,
    pub balance_during_warmup: bool,
    /// Honour the host's exemption flag (admins)
    pub admin_exemption: bool,
    pub scramble: ScrambleSettings,
    pub boost: BoostSettings,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            min_participants: 6,
            max_size_difference: 1,
            skill_metric: SkillMetric::Kda,
            skill_threshold: 0.2,
            threshold_kind: ThresholdKind::Difference,
            min_rounds_before_switch: 2,
            immunity_rounds: 2,
            size_only: false,
            balance_triggers: vec![BalanceTrigger::RoundStart, BalanceTrigger::PlayerJoin],
            balance_during_warmup: false,
            admin_exemption: true,
            scramble: ScrambleSettings::default(),
            boost: BoostSettings::default(),
        }
    }
}

/// A configuration value that was out of range and has been replaced
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl ConfigWarning {
    fn new(field: &str, message: String) -> Self {
        Self {
            field: field.to_string(),
            message,
        }
    }
}

impl BalanceConfig {
    pub fn from_json_str(json: &str) -> BalanceResult<(Self, Vec<ConfigWarning>)> {
        let mut config: BalanceConfig = serde_json::from_str(json)?;
        let warnings = config.sanitize();
        Ok((config, warnings))
    }

    pub fn from_toml_str(text: &str) -> BalanceResult<(Self, Vec<ConfigWarning>)> {
        let mut config: BalanceConfig = toml::from_str(text)?;
        let warnings = config.sanitize();
        Ok((config, warnings))
    }

    /// Load from a `.json` file, anything else is read as TOML.
    pub fn from_file(path: &Path) -> BalanceResult<(Self, Vec<ConfigWarning>)> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    pub fn to_toml_string(&self) -> BalanceResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::error::BalanceError::ConfigParse(e.to_string()))
    }

    pub fn triggers_on(&self, trigger: BalanceTrigger) -> bool {
        self.balance_triggers.contains(&trigger)
    }

    /// Clamp out-of-range values to safe defaults. Each replacement is logged
    /// and returned; none of them is fatal.
    pub fn sanitize(&mut self) -> Vec<ConfigWarning> {
        let defaults = BalanceConfig::default();
        let mut warnings = Vec::new();

        let threshold_floor = match self.threshold_kind {
            ThresholdKind::Difference => 0.0,
            ThresholdKind::Ratio => 1.0,
        };
        if !self.skill_threshold.is_finite() || self.skill_threshold < threshold_floor {
            let fallback = match self.threshold_kind {
                ThresholdKind::Difference => defaults.skill_threshold,
                ThresholdKind::Ratio => 1.6,
            };
            warnings.push(ConfigWarning::new(
                "skill_threshold",
                format!(
                    "{} is out of range for {:?}, using {}",
                    self.skill_threshold, self.threshold_kind, fallback
                ),
            ));
            self.skill_threshold = fallback;
        }

        if self.boost.percentage > 100 {
            warnings.push(ConfigWarning::new(
                "boost.percentage",
                format!("{} exceeds 100, clamped", self.boost.percentage),
            ));
            self.boost.percentage = 100;
        }

        for tier in self.boost.tiers.iter_mut().filter(|tier| tier.percentage > 100) {
            warnings.push(ConfigWarning::new(
                "boost.tiers",
                format!("tier at {} losses exceeds 100 percent, clamped", tier.lose_streak),
            ));
            tier.percentage = 100;
        }

        if self.scramble.mode == ScrambleMode::Periodic && self.scramble.every_rounds == 0 {
            warnings.push(ConfigWarning::new(
                "scramble.every_rounds",
                "periodic scramble needs a period, scramble disabled".to_string(),
            ));
            self.scramble.mode = ScrambleMode::None;
        }

        if self.scramble.mode == ScrambleMode::WinStreak && self.scramble.win_streak == 0 {
            warnings.push(ConfigWarning::new(
                "scramble.win_streak",
                format!(
                    "win streak scramble needs a threshold, using {}",
                    defaults.scramble.win_streak
                ),
            ));
            self.scramble.win_streak = defaults.scramble.win_streak;
        }

        if self.scramble.min_participants < 2 {
            warnings.push(ConfigWarning::new(
                "scramble.min_participants",
                format!("{} is too small, using 2", self.scramble.min_participants),
            ));
            self.scramble.min_participants = 2;
        }

        for warning in &warnings {
            warn!(field = %warning.field, "{}", warning.message);
        }
        warnings
    }
}
