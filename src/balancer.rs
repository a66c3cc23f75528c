use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{BalanceConfig, ThresholdKind};
use crate::eligibility::{is_eligible, EligibilityMode, Phase};
use crate::trigger::{exceeds_threshold, mean_difference, strength_gap};
use crate::types::{Boost, Group, ParticipantId, Side};

/// Differences smaller than this are treated as equal
const EPSILON: f64 = 1e-9;

/// Upper bound on swaps per pass
pub const MAX_SWAPS_PER_PASS: usize = 4;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeReport {
    /// Total participants moved, forced ones included
    pub moved: usize,
    pub forced: usize,
    /// `(id, forced)` in the order the moves were made
    pub reassigned: Vec<(ParticipantId, bool)>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillReport {
    pub swaps: usize,
    pub final_difference: f64,
    /// `(moved into the weaker side, moved into the stronger side)` per swap
    pub swapped: Vec<(ParticipantId, ParticipantId)>,
}

/// Size correction and swap-based skill equalization over two groups
pub struct Balancer {
    config: BalanceConfig,
    now_ms: u64,
}

impl Balancer {
    pub fn new(config: BalanceConfig) -> Self {
        Self { config, now_ms: 0 }
    }

    /// Timestamp recorded on every participant this balancer moves
    pub fn with_clock(mut self, now_ms: u64) -> Self {
        self.now_ms = now_ms;
        self
    }

    pub fn config(&self) -> &BalanceConfig {
        &self.config
    }

    fn immunity(&self) -> i32 {
        i32::try_from(self.config.immunity_rounds).unwrap_or(i32::MAX)
    }

    /// Move `id` from `from` into `to`. Returns false if it was not in `from`.
    fn transfer(&self, from: &mut Group, to: &mut Group, id: ParticipantId, immunity: i32) -> bool {
        match from.remove(id) {
            Some(mut p) => {
                p.move_to(to.side, immunity, self.now_ms);
                to.add(p);
                true
            }
            None => false,
        }
    }

    /// Bring `|len(a) - len(b)|` within `max_size_difference`.
    ///
    /// A move is only made while it narrows the gap, so an odd total with a
    /// zero tolerance stays one apart instead of flipping sides.
    ///
    /// Eligible members of the larger group move lowest value first (or
    /// shortest tenure first in size-only mode). If that is not enough, a
    /// forced pass moves any non-exempt member with half the usual immunity.
    pub fn balance_sizes(
        &self,
        a: &mut Group,
        b: &mut Group,
        phase: Phase,
        rng: &mut impl Rng,
    ) -> SizeReport {
        let mut report = SizeReport::default();
        let max = self.config.max_size_difference;
        let diff = a.len().abs_diff(b.len());
        if diff <= max {
            return report;
        }

        let (larger, smaller) = if a.len() > b.len() { (a, b) } else { (b, a) };
        let metric = larger.metric();
        let to_move = moves_needed(diff, max);
        if to_move == 0 {
            return report;
        }

        // 1. Regular moves
        let mode = EligibilityMode::for_phase(phase);
        let mut candidates: Vec<(ParticipantId, f64, u32)> = larger
            .members()
            .iter()
            .filter(|p| is_eligible(p, &self.config, mode))
            .map(|p| (p.id, p.value(metric), p.rounds_on_side))
            .collect();
        candidates.shuffle(rng);
        if self.config.size_only {
            candidates.sort_by_key(|c| c.2);
        } else {
            candidates.sort_by(|x, y| x.1.total_cmp(&y.1));
        }

        let immunity = self.immunity();
        for (id, value, _) in candidates.into_iter().take(to_move) {
            if self.transfer(larger, smaller, id, immunity) {
                debug!(id, value, to = %smaller.side, "moved for size");
                report.moved += 1;
                report.reassigned.push((id, false));
            }
        }

        // 2. Forced moves if still out of tolerance
        let remaining = larger.len().abs_diff(smaller.len());
        if remaining > max && larger.len() > smaller.len() {
            let still_needed = moves_needed(remaining, max);
            let mut forced: Vec<(ParticipantId, f64, u32)> = larger
                .members()
                .iter()
                .filter(|p| is_eligible(p, &self.config, EligibilityMode::Forced))
                .map(|p| (p.id, p.value(metric), p.rounds_on_side))
                .collect();
            forced.shuffle(rng);
            forced.sort_by(|x, y| x.2.cmp(&y.2).then(x.1.total_cmp(&y.1)));

            let half_immunity = immunity / 2;
            for (id, _, rounds_on_side) in forced.into_iter().take(still_needed) {
                if self.transfer(larger, smaller, id, half_immunity) {
                    debug!(id, rounds_on_side, to = %smaller.side, "forced move for size");
                    report.moved += 1;
                    report.forced += 1;
                    report.reassigned.push((id, true));
                }
            }
        }

        report
    }

    /// Swap eligible pairs between the groups to shrink the strength gap.
    ///
    /// Each swap must strictly lower the actual mean difference. With an
    /// active `boost` on the weaker (or equal) side `L`, the stronger side is
    /// measured at `mean * factor`; only swaps sending the higher value into
    /// `L` are tried, and a swap is accepted when it shrinks that effective
    /// gap without widening the actual one. Stored values are never touched.
    pub fn balance_skill(
        &self,
        a: &mut Group,
        b: &mut Group,
        phase: Phase,
        boost: Option<Boost>,
    ) -> SkillReport {
        let mut report = SkillReport {
            final_difference: mean_difference(a, b),
            ..SkillReport::default()
        };
        let diff = a.len().abs_diff(b.len());
        if self.config.size_only || moves_needed(diff, self.config.max_size_difference) > 0 {
            return report;
        }

        let mode = EligibilityMode::for_phase(phase);
        let eligible = |g: &Group| -> Vec<ParticipantId> {
            g.members()
                .iter()
                .filter(|p| is_eligible(p, &self.config, mode))
                .map(|p| p.id)
                .collect()
        };
        let mut pool_a = eligible(a);
        let mut pool_b = eligible(b);
        if pool_a.is_empty() || pool_b.is_empty() {
            return report;
        }
        pool_a.sort_unstable();
        pool_b.sort_unstable();

        let max_iterations = MAX_SWAPS_PER_PASS.min(pool_a.len().max(pool_b.len()));
        let kind = self.config.threshold_kind;
        let immunity = self.immunity();

        for _ in 0..max_iterations {
            let current = mean_difference(a, b);

            // Boost only matters while the boosted side is not already ahead
            let boosted = boost.filter(|bo| match bo.side {
                Side::A => a.mean() <= b.mean(),
                Side::B => b.mean() <= a.mean(),
                Side::Unassigned => false,
            });

            // (receiver, donor): the receiver gets the higher value
            let (receiver, factor) = match boosted {
                Some(bo) => (bo.side, bo.factor()),
                None => {
                    if !exceeds_threshold(strength_gap(a.mean(), b.mean(), kind), &self.config) {
                        break;
                    }
                    (if a.mean() < b.mean() { Side::A } else { Side::B }, 1.0)
                }
            };

            let (recv_group, donor_group, recv_pool, donor_pool) = match receiver {
                Side::A => (&*a, &*b, &pool_a, &pool_b),
                _ => (&*b, &*a, &pool_b, &pool_a),
            };

            let current_effective =
                effective_gap(donor_group.mean(), recv_group.mean(), factor, kind);
            if boosted.is_some() && !exceeds_threshold(current_effective, &self.config) {
                break;
            }

            let metric = recv_group.metric();
            let recv_len = recv_group.len() as f64;
            let donor_len = donor_group.len() as f64;

            // (donor id, receiver id, hypothetical difference, donor value, effective gap)
            let mut best: Option<(ParticipantId, ParticipantId, f64, f64, f64)> = None;
            for &donor_id in donor_pool {
                let Some(donor) = donor_group.get(donor_id) else { continue };
                let dv = donor.value(metric);
                for &recv_id in recv_pool {
                    let Some(recv) = recv_group.get(recv_id) else { continue };
                    let rv = recv.value(metric);
                    if boosted.is_some() && dv <= rv {
                        continue;
                    }
                    let new_recv = (recv_group.total() - rv + dv) / recv_len;
                    let new_donor = (donor_group.total() - dv + rv) / donor_len;
                    let hypothetical = (new_recv - new_donor).abs();
                    let better = match best {
                        None => true,
                        Some((_, _, best_diff, best_dv, _)) => {
                            hypothetical < best_diff - EPSILON
                                || ((hypothetical - best_diff).abs() <= EPSILON && dv > best_dv)
                        }
                    };
                    if better {
                        let effective = effective_gap(new_donor, new_recv, factor, kind);
                        best = Some((donor_id, recv_id, hypothetical, dv, effective));
                    }
                }
            }

            let Some((donor_id, recv_id, hypothetical, _, effective)) = best else {
                break;
            };
            let accepted = if boosted.is_some() {
                hypothetical <= current + EPSILON && effective < current_effective - EPSILON
            } else {
                hypothetical < current - EPSILON
            };
            if !accepted {
                debug!(current, hypothetical, "no improving swap, stopping");
                break;
            }

            let (recv_group, donor_group) = match receiver {
                Side::A => (&mut *a, &mut *b),
                _ => (&mut *b, &mut *a),
            };
            let mut donor = match donor_group.remove(donor_id) {
                Some(p) => p,
                None => break,
            };
            let mut recv = match recv_group.remove(recv_id) {
                Some(p) => p,
                None => {
                    donor_group.add(donor);
                    break;
                }
            };
            donor.move_to(recv_group.side, immunity, self.now_ms);
            recv.move_to(donor_group.side, immunity, self.now_ms);
            recv_group.add(donor);
            donor_group.add(recv);

            pool_a.retain(|id| *id != donor_id && *id != recv_id);
            pool_b.retain(|id| *id != donor_id && *id != recv_id);

            report.swaps += 1;
            report.swapped.push((donor_id, recv_id));
            debug!(
                into = %receiver,
                donor = donor_id,
                receiver = recv_id,
                before = current,
                after = hypothetical,
                boosted = boosted.is_some(),
                "skill swap"
            );

            if pool_a.is_empty() || pool_b.is_empty() {
                break;
            }
        }

        report.final_difference = mean_difference(a, b);
        report
    }
}

/// Moves that bring `diff` within `max` without overshooting past even
fn moves_needed(diff: usize, max: usize) -> usize {
    diff.saturating_sub(max).div_ceil(2).min(diff / 2)
}

/// Gap between a donor side measured at `factor` and the receiving side
fn effective_gap(donor_mean: f64, receiver_mean: f64, factor: f64, kind: ThresholdKind) -> f64 {
    match kind {
        ThresholdKind::Difference => donor_mean * factor - receiver_mean,
        ThresholdKind::Ratio => strength_gap(donor_mean * factor, receiver_mean, kind),
    }
}
