//! Decides whether a balancing pass should run at all.

use serde::{Deserialize, Serialize};

use crate::config::{BalanceConfig, ThresholdKind};
use crate::types::Group;

/// Why a pass is (or is not) needed
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum Trigger {
    BelowMinimum { participants: usize },
    SizeImbalance { diff: usize },
    SkillImbalance { difference: f64 },
    Balanced,
}

impl Trigger {
    pub fn fires(&self) -> bool {
        matches!(self, Trigger::SizeImbalance { .. } | Trigger::SkillImbalance { .. })
    }
}

/// Absolute difference of group means
pub fn mean_difference(a: &Group, b: &Group) -> f64 {
    (a.mean() - b.mean()).abs()
}

/// Gap between two strengths in the configured convention: the absolute
/// difference, or the ratio of the larger to the smaller.
pub fn strength_gap(x: f64, y: f64, kind: ThresholdKind) -> f64 {
    match kind {
        ThresholdKind::Difference => (x - y).abs(),
        ThresholdKind::Ratio => {
            let (hi, lo) = if x >= y { (x, y) } else { (y, x) };
            if hi <= 0.0 {
                1.0
            } else if lo <= 0.0 {
                f64::INFINITY
            } else {
                hi / lo
            }
        }
    }
}

/// Whether a gap is still outside tolerance
pub fn exceeds_threshold(gap: f64, config: &BalanceConfig) -> bool {
    gap > config.skill_threshold
}

pub fn evaluate(a: &Group, b: &Group, config: &BalanceConfig) -> Trigger {
    let participants = a.len() + b.len();
    if participants < config.min_participants {
        return Trigger::BelowMinimum { participants };
    }

    let diff = a.len().abs_diff(b.len());
    if diff > config.max_size_difference {
        return Trigger::SizeImbalance { diff };
    }

    let gap = strength_gap(a.mean(), b.mean(), config.threshold_kind);
    if exceeds_threshold(gap, config) {
        return Trigger::SkillImbalance {
            difference: mean_difference(a, b),
        };
    }
    Trigger::Balanced
}

pub fn needs_balance(a: &Group, b: &Group, config: &BalanceConfig) -> bool {
    evaluate(a, b, config).fires()
}
