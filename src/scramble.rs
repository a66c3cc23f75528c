//! Full redistribution of both groups.
//!
//! A scramble replaces the regular balancers for the pass. Participants that
//! are not eligible (exempt, or alive outside prestart) stay pinned to their
//! side and the rest are dealt out around them.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::config::{BalanceConfig, ScrambleStyle};
use crate::eligibility::{is_eligible, EligibilityMode, Phase};
use crate::trigger::mean_difference;
use crate::types::{Group, Participant, ParticipantId, Side};

const EPSILON: f64 = 1e-9;

#[derive(Clone, Debug)]
pub struct ScrambleReport {
    /// False when there were too few eligible participants
    pub performed: bool,
    /// Everyone who took part, moved or not
    pub pool: Vec<ParticipantId>,
    /// Participants whose side changed
    pub reassigned: Vec<ParticipantId>,
    /// Refinement swaps made after the initial deal
    pub refinement_swaps: usize,
    pub a: Group,
    pub b: Group,
}

impl ScrambleReport {
    pub fn final_difference(&self) -> f64 {
        mean_difference(&self.a, &self.b)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Seat {
    id: ParticipantId,
    side: Side,
}

pub struct Scrambler {
    config: BalanceConfig,
    now_ms: u64,
}

impl Scrambler {
    pub fn new(config: BalanceConfig) -> Self {
        Self { config, now_ms: 0 }
    }

    pub fn with_clock(mut self, now_ms: u64) -> Self {
        self.now_ms = now_ms;
        self
    }

    /// Redistribute every assigned participant in `participants`.
    pub fn scramble(
        &self,
        participants: &[Participant],
        style: ScrambleStyle,
        phase: Phase,
        rng: &mut impl Rng,
    ) -> ScrambleReport {
        let metric = self.config.skill_metric;
        let mode = EligibilityMode::scramble(phase);

        let mut a = Group::new(Side::A, metric);
        let mut b = Group::new(Side::B, metric);
        let mut pool: Vec<Participant> = Vec::new();
        for p in participants.iter().filter(|p| p.side.is_assigned()) {
            if is_eligible(p, &self.config, mode) {
                pool.push(p.clone());
            } else {
                match p.side {
                    Side::A => a.add(p.clone()),
                    _ => b.add(p.clone()),
                }
            }
        }

        if pool.len() < self.config.scramble.min_participants {
            debug!(
                eligible = pool.len(),
                required = self.config.scramble.min_participants,
                "too few participants to scramble"
            );
            for p in pool {
                match p.side {
                    Side::A => a.add(p),
                    _ => b.add(p),
                }
            }
            return ScrambleReport {
                performed: false,
                pool: Vec::new(),
                reassigned: Vec::new(),
                refinement_swaps: 0,
                a,
                b,
            };
        }

        // Final sizes differ by at most one where the pinned members allow it
        let total = a.len() + b.len() + pool.len();
        let target_a = total.div_ceil(2).saturating_sub(a.len()).min(pool.len());
        let target_b = pool.len() - target_a;

        let seating: Vec<Seat> = pool.iter().map(|p| Seat { id: p.id, side: p.side }).collect();

        let seats = match style {
            ScrambleStyle::Random => {
                pool.shuffle(rng);
                pool.iter()
                    .enumerate()
                    .map(|(i, p)| Seat {
                        id: p.id,
                        side: if i < target_a { Side::A } else { Side::B },
                    })
                    .collect::<Vec<_>>()
            }
            ScrambleStyle::Skill => deal_by_skill(&mut pool, &a, &b, target_a, target_b, rng),
        };

        let mut reassigned = Vec::new();
        for mut p in pool {
            let target = seats
                .iter()
                .find(|s| s.id == p.id)
                .map(|s| s.side)
                .unwrap_or(p.side);
            if target != p.side {
                reassigned.push(p.id);
                p.move_to(target, 0, self.now_ms);
            } else {
                p.immunity_remaining = 0;
            }
            match target {
                Side::A => a.add(p),
                _ => b.add(p),
            }
        }

        let pool_ids: Vec<ParticipantId> = seating.iter().map(|s| s.id).collect();
        let refinement_swaps = if style == ScrambleStyle::Skill {
            self.refine(&mut a, &mut b, &pool_ids, &mut reassigned, &seating)
        } else {
            0
        };

        debug!(
            ?style,
            pool = pool_ids.len(),
            moved = reassigned.len(),
            refinement_swaps,
            "scramble dealt"
        );

        ScrambleReport {
            performed: true,
            pool: pool_ids,
            reassigned,
            refinement_swaps,
            a,
            b,
        }
    }

    /// Best single-pair swaps between scrambled participants until none
    /// lowers the mean difference.
    fn refine(
        &self,
        a: &mut Group,
        b: &mut Group,
        pool: &[ParticipantId],
        reassigned: &mut Vec<ParticipantId>,
        seating: &[Seat],
    ) -> usize {
        let metric = a.metric();
        let max_rounds = pool.len() * pool.len();
        let mut swaps = 0;

        for _ in 0..max_rounds {
            if a.is_empty() || b.is_empty() {
                break;
            }
            let current = mean_difference(a, b);
            let len_a = a.len() as f64;
            let len_b = b.len() as f64;

            let mut best: Option<(ParticipantId, ParticipantId, f64)> = None;
            for pa in a.members().iter().filter(|p| pool.contains(&p.id)) {
                let va = pa.value(metric);
                for pb in b.members().iter().filter(|p| pool.contains(&p.id)) {
                    let vb = pb.value(metric);
                    let new_a = (a.total() - va + vb) / len_a;
                    let new_b = (b.total() - vb + va) / len_b;
                    let hypothetical = (new_a - new_b).abs();
                    if best.map_or(true, |(_, _, d)| hypothetical < d - EPSILON) {
                        best = Some((pa.id, pb.id, hypothetical));
                    }
                }
            }

            let Some((id_a, id_b, hypothetical)) = best else { break };
            if hypothetical >= current - EPSILON {
                break;
            }
            let (Some(mut pa), Some(mut pb)) = (a.remove(id_a), b.remove(id_b)) else {
                break;
            };
            pa.move_to(Side::B, 0, self.now_ms);
            pb.move_to(Side::A, 0, self.now_ms);
            b.add(pa);
            a.add(pb);
            swaps += 1;
        }

        // Net side changes against the pre-scramble seating
        reassigned.clear();
        for seat in seating {
            let now = if a.contains(seat.id) { Side::A } else { Side::B };
            if now != seat.side {
                reassigned.push(seat.id);
            }
        }
        swaps
    }
}

/// Strongest first, each to the side with the lower total within its quota.
fn deal_by_skill(
    pool: &mut [Participant],
    pinned_a: &Group,
    pinned_b: &Group,
    target_a: usize,
    target_b: usize,
    rng: &mut impl Rng,
) -> Vec<Seat> {
    let metric = pinned_a.metric();
    pool.shuffle(rng);
    pool.sort_by(|x, y| y.value(metric).total_cmp(&x.value(metric)));

    let mut total_a = pinned_a.total();
    let mut total_b = pinned_b.total();
    let mut len_a = pinned_a.len();
    let mut len_b = pinned_b.len();
    let (mut dealt_a, mut dealt_b) = (0usize, 0usize);

    let mut seats = Vec::with_capacity(pool.len());
    for p in pool.iter() {
        let side = if dealt_a >= target_a {
            Side::B
        } else if dealt_b >= target_b {
            Side::A
        } else if total_a < total_b - EPSILON {
            Side::A
        } else if total_b < total_a - EPSILON {
            Side::B
        } else if len_b < len_a {
            Side::B
        } else {
            Side::A
        };

        let value = p.value(metric);
        if side == Side::A {
            total_a += value;
            len_a += 1;
            dealt_a += 1;
        } else {
            total_b += value;
            len_b += 1;
            dealt_b += 1;
        }
        seats.push(Seat { id: p.id, side });
    }
    seats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SkillMetric;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> BalanceConfig {
        BalanceConfig {
            skill_metric: SkillMetric::Score,
            ..BalanceConfig::default()
        }
    }

    fn roster(scores: &[i32]) -> Vec<Participant> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| {
                let side = if i % 3 == 0 { Side::B } else { Side::A };
                let mut p = Participant::new(i as u64 + 1, "p", side);
                p.counters.score = score;
                p.rounds_on_side = 4;
                p.immunity_remaining = 2;
                p
            })
            .collect()
    }

    #[test]
    fn test_random_scramble_size_bound() {
        for n in 4..=13usize {
            for seed in 0..10u64 {
                let mut rng = StdRng::seed_from_u64(seed);
                let scores: Vec<i32> = (0..n as i32).collect();
                let report = Scrambler::new(config()).scramble(
                    &roster(&scores),
                    ScrambleStyle::Random,
                    Phase::Prestart,
                    &mut rng,
                );
                assert!(report.performed);
                assert!(report.a.len().abs_diff(report.b.len()) <= 1, "n={} seed={}", n, seed);
                assert_eq!(report.a.len() + report.b.len(), n);
            }
        }
    }

    #[test]
    fn test_skill_scramble_is_locally_optimal() {
        for seed in 0..25u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let scores: Vec<i32> = (0..10).map(|_| rng.gen_range(0..50)).collect();
            let report = Scrambler::new(config()).scramble(
                &roster(&scores),
                ScrambleStyle::Skill,
                Phase::Prestart,
                &mut rng,
            );
            let (a, b) = (&report.a, &report.b);
            assert!(a.len().abs_diff(b.len()) <= 1);

            let current = mean_difference(a, b);
            for pa in a.members() {
                for pb in b.members() {
                    let va = pa.counters.score as f64;
                    let vb = pb.counters.score as f64;
                    let new_a = (a.total() - va + vb) / a.len() as f64;
                    let new_b = (b.total() - vb + va) / b.len() as f64;
                    assert!(
                        (new_a - new_b).abs() >= current - 1e-9,
                        "seed {} swap {}<->{} improves",
                        seed,
                        pa.id,
                        pb.id
                    );
                }
            }
        }
    }

    #[test]
    fn test_skill_scramble_splits_evenly_valued_roster() {
        let mut rng = StdRng::seed_from_u64(2);
        let report = Scrambler::new(config()).scramble(
            &roster(&[10, 10, 1, 1]),
            ScrambleStyle::Skill,
            Phase::Prestart,
            &mut rng,
        );
        assert_eq!(report.a.total(), 11.0);
        assert_eq!(report.b.total(), 11.0);
    }

    #[test]
    fn test_too_few_participants_is_noop() {
        let mut rng = StdRng::seed_from_u64(1);
        let participants = roster(&[5, 4, 3]);
        let report = Scrambler::new(config()).scramble(
            &participants,
            ScrambleStyle::Random,
            Phase::Prestart,
            &mut rng,
        );
        assert!(!report.performed);
        assert!(report.reassigned.is_empty());
        for p in &participants {
            let group = if p.side == Side::A { &report.a } else { &report.b };
            assert!(group.contains(p.id));
        }
    }

    #[test]
    fn test_pinned_participants_keep_their_side() {
        let mut participants = roster(&[9, 8, 7, 6, 5, 4, 3, 2]);
        participants[0].exempt = true; // id 1 on B
        participants[1].alive = true; // id 2 on A
        for seed in 0..10u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let report = Scrambler::new(config()).scramble(
                &participants,
                ScrambleStyle::Random,
                Phase::Live,
                &mut rng,
            );
            assert!(report.b.contains(1));
            assert!(report.a.contains(2));
            assert!(!report.pool.contains(&1));
            assert!(!report.pool.contains(&2));
            assert_eq!(report.a.len(), 4);
            assert_eq!(report.b.len(), 4);
        }
    }

    #[test]
    fn test_scrambled_participants_lose_immunity() {
        let mut rng = StdRng::seed_from_u64(9);
        let participants = roster(&[1, 2, 3, 4, 5, 6]);
        let report = Scrambler::new(config()).scramble(
            &participants,
            ScrambleStyle::Random,
            Phase::Prestart,
            &mut rng,
        );
        for p in report.a.members().iter().chain(report.b.members()) {
            assert_eq!(p.immunity_remaining, 0);
        }
        for id in &report.reassigned {
            let p = report
                .a
                .get(*id)
                .or_else(|| report.b.get(*id))
                .unwrap();
            assert_eq!(p.rounds_on_side, 0);
        }
    }
}
