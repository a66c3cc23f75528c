//! Skill proxies derived from raw per-participant counters.
//!
//! Everything here is a pure function of [`Counters`]; there is no global
//! weighting state, so a participant's value is fully determined by its
//! counters and the selected [`SkillMetric`].

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

use crate::types::Counters;

/// Weight of an assist relative to a kill in [`kda_ratio`].
pub const ASSIST_WEIGHT: f64 = 0.5;

/// Kills per death. With no deaths the raw kill count is used.
pub fn kd_ratio(c: &Counters) -> f64 {
    if c.deaths == 0 {
        c.kills as f64
    } else {
        c.kills as f64 / c.deaths as f64
    }
}

/// Kills plus half-weighted assists, per death.
pub fn kda_ratio(c: &Counters) -> f64 {
    let contribution = c.kills as f64 + c.assists as f64 * ASSIST_WEIGHT;
    if c.deaths == 0 {
        contribution
    } else {
        contribution / c.deaths as f64
    }
}

/// Kills plus full-weight assists, per death. Feeds [`performance_score`].
pub fn full_kda(c: &Counters) -> f64 {
    let contribution = (c.kills + c.assists) as f64;
    if c.deaths == 0 {
        contribution
    } else {
        contribution / c.deaths as f64
    }
}

/// How steadily a participant converts engagements into kills and damage.
pub fn consistency_factor(c: &Counters) -> f64 {
    (c.kills as f64 * 0.6 + c.damage as f64 * 0.4) / (c.kills + c.deaths + 1) as f64
}

/// Blended performance value: damage, full KDA and consistency.
pub fn performance_score(c: &Counters) -> f64 {
    c.damage as f64 * 0.5 + full_kda(c) * 0.4 + consistency_factor(c) * 0.1
}

/// Round win percentage in [0, 100].
pub fn win_rate(c: &Counters) -> f64 {
    if c.rounds_played == 0 {
        0.0
    } else {
        c.rounds_won as f64 / c.rounds_played as f64 * 100.0
    }
}

/// Which counter-derived value drives balancing decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillMetric {
    Kd,
    #[default]
    Kda,
    Score,
    WinRate,
    Performance,
}

impl SkillMetric {
    pub fn value(&self, c: &Counters) -> f64 {
        match self {
            SkillMetric::Kd => kd_ratio(c),
            SkillMetric::Kda => kda_ratio(c),
            SkillMetric::Score => c.score as f64,
            SkillMetric::WinRate => win_rate(c),
            SkillMetric::Performance => performance_score(c),
        }
    }
}

impl fmt::Display for SkillMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SkillMetric::Kd => "kd",
            SkillMetric::Kda => "kda",
            SkillMetric::Score => "score",
            SkillMetric::WinRate => "win_rate",
            SkillMetric::Performance => "performance",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown skill metric: {0}")]
pub struct UnknownMetric(pub String);

impl FromStr for SkillMetric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kd" => Ok(SkillMetric::Kd),
            "kda" => Ok(SkillMetric::Kda),
            "score" => Ok(SkillMetric::Score),
            "winrate" | "win_rate" => Ok(SkillMetric::WinRate),
            "performance" => Ok(SkillMetric::Performance),
            _ => Err(UnknownMetric(s.to_string())),
        }
    }
}

// Unknown selectors degrade to the default metric instead of failing the load.
impl<'de> Deserialize<'de> for SkillMetric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_else(|e: UnknownMetric| {
            warn!(
                error = %e,
                fallback = %SkillMetric::default(),
                "falling back to default skill metric"
            );
            SkillMetric::default()
        }))
    }
}
