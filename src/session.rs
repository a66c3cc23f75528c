//! Lifecycle-scoped balancing session.
//!
//! Owns the participant registry, streaks and randomness for one map/match
//! and turns host events into balancing passes. All methods take `&self` so a
//! session can be shared through an `Arc` by several event sources.

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info, warn};

use crate::balancer::Balancer;
use crate::config::{BalanceConfig, BalanceTrigger, ConfigWarning, ScrambleMode};
use crate::eligibility::Phase;
use crate::error::{BalanceError, BalanceResult};
use crate::registry::{CommitRecord, ParticipantRegistry, ReconcileReport};
use crate::scramble::Scrambler;
use crate::streak::StreakTracker;
use crate::trigger::{evaluate, mean_difference};
use crate::types::*;

/// Host clock in milliseconds
pub fn now_millis() -> u64 {
    #[cfg(target_arch = "wasm32")]
    {
        js_sys::Date::now() as u64
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Releases the pass flag when dropped
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Planned pass result before it is committed to the registry
struct Plan {
    outcome: BalanceOutcome,
    records: Vec<CommitRecord>,
}

/// Serializable view of the session for the host
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    pub round: u32,
    pub warmup: bool,
    pub halftime: bool,
    pub size_a: usize,
    pub size_b: usize,
    pub mean_a: f64,
    pub mean_b: f64,
    pub difference: f64,
    pub streaks: StreakTracker,
    pub boost: Option<Boost>,
    pub participants: Vec<Participant>,
}

/// Main session state and controller
pub struct BalanceSession {
    config: RwLock<BalanceConfig>,
    registry: ParticipantRegistry,
    streaks: Mutex<StreakTracker>,
    rng: Mutex<StdRng>,
    /// Set while a pass runs; passes are not reentrant
    pass_active: AtomicBool,
    round: AtomicU32,
    warmup: AtomicBool,
    halftime: AtomicBool,
}

impl BalanceSession {
    pub fn new(mut config: BalanceConfig, seed: u64) -> Self {
        config.sanitize();
        Self {
            config: RwLock::new(config),
            registry: ParticipantRegistry::new(),
            streaks: Mutex::new(StreakTracker::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            pass_active: AtomicBool::new(false),
            round: AtomicU32::new(0),
            warmup: AtomicBool::new(false),
            halftime: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> BalanceConfig {
        self.config.read().clone()
    }

    /// Replace the configuration. Out-of-range values are clamped and reported.
    pub fn update_config(&self, mut config: BalanceConfig) -> Vec<ConfigWarning> {
        let warnings = config.sanitize();
        *self.config.write() = config;
        warnings
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn streaks(&self) -> StreakTracker {
        self.streaks.lock().clone()
    }

    pub fn round(&self) -> u32 {
        self.round.load(Ordering::Acquire)
    }

    pub fn set_warmup(&self, warmup: bool) {
        self.warmup.store(warmup, Ordering::Release);
    }

    /// Flag the next round start as the halftime side swap
    pub fn set_halftime(&self, halftime: bool) {
        self.halftime.store(halftime, Ordering::Release);
    }

    fn try_begin_pass(&self) -> BalanceResult<PassGuard<'_>> {
        self.pass_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| PassGuard(&self.pass_active))
            .map_err(|_| {
                debug!("pass already running, trigger dropped");
                BalanceError::PassInProgress
            })
    }

    fn triggered(&self, trigger: BalanceTrigger, config: &BalanceConfig) -> bool {
        let warmup = self.warmup.load(Ordering::Acquire);
        config.triggers_on(trigger) && (!warmup || config.balance_during_warmup)
    }

    // Host events

    pub fn on_join(&self, info: ParticipantInfo) -> BalanceResult<BalanceOutcome> {
        let config = self.config();
        if self.registry.upsert(&info, config.admin_exemption) {
            info!(id = info.id, name = %info.name, side = %info.side, "participant joined");
        }
        if self.triggered(BalanceTrigger::PlayerJoin, &config) {
            self.balance_pass(&config, Phase::Live)
        } else {
            Ok(BalanceOutcome::none(self.current_difference(&config)))
        }
    }

    pub fn on_disconnect(&self, id: ParticipantId) -> BalanceResult<BalanceOutcome> {
        let config = self.config();
        let removed = self
            .registry
            .remove(id)
            .ok_or(BalanceError::UnknownParticipant(id))?;
        info!(id, name = %removed.name, side = %removed.side, "participant left");
        if self.triggered(BalanceTrigger::PlayerDisconnect, &config) {
            self.balance_pass(&config, Phase::Live)
        } else {
            Ok(BalanceOutcome::none(self.current_difference(&config)))
        }
    }

    pub fn on_spawn(&self, id: ParticipantId) -> BalanceResult<()> {
        self.registry.update(id, |p| p.alive = true)
    }

    /// Death of `victim`, credited to `attacker` and `assister` when known.
    pub fn on_death(
        &self,
        victim: ParticipantId,
        attacker: Option<ParticipantId>,
        assister: Option<ParticipantId>,
    ) -> BalanceResult<()> {
        self.registry.update(victim, |p| {
            p.alive = false;
            p.counters.deaths += 1;
        })?;
        if let Some(attacker) = attacker.filter(|a| *a != victim) {
            if self.registry.update(attacker, |p| p.counters.kills += 1).is_err() {
                debug!(attacker, "kill credited to untracked participant");
            }
        }
        if let Some(assister) = assister.filter(|a| *a != victim) {
            if self.registry.update(assister, |p| p.counters.assists += 1).is_err() {
                debug!(assister, "assist credited to untracked participant");
            }
        }
        Ok(())
    }

    pub fn on_damage(&self, attacker: ParticipantId, amount: u32) -> BalanceResult<()> {
        self.registry
            .update(attacker, |p| p.counters.damage = p.counters.damage.saturating_add(amount))
    }

    pub fn set_score(&self, id: ParticipantId, score: i32) -> BalanceResult<()> {
        self.registry.update(id, |p| p.counters.score = score)
    }

    /// Round prestart: immunity ticks down, tenure grows, then a periodic or
    /// halftime scramble or a regular pass may run.
    pub fn on_round_start(&self) -> BalanceResult<BalanceOutcome> {
        let config = self.config();
        self.registry.update_all(|p| {
            if p.immunity_remaining > 0 {
                p.immunity_remaining -= 1;
            }
            if p.side.is_assigned() {
                p.rounds_on_side += 1;
            }
        });
        let round = self.round.fetch_add(1, Ordering::AcqRel) + 1;
        let halftime = self.halftime.swap(false, Ordering::AcqRel);
        debug!(round, halftime, "round start");

        if self.warmup.load(Ordering::Acquire) && !config.balance_during_warmup {
            return Ok(BalanceOutcome::none(self.current_difference(&config)));
        }

        let reason = {
            let mut streaks = self.streaks.lock();
            let reason = streaks.should_scramble(&config, halftime);
            if reason == Some(ScrambleReason::Periodic) {
                streaks.mark_periodic();
            }
            reason
        };
        match reason {
            Some(reason @ (ScrambleReason::Periodic | ScrambleReason::Halftime)) => {
                self.scramble_pass(&config, reason, Phase::Prestart)
            }
            _ if self.triggered(BalanceTrigger::RoundStart, &config) => {
                self.balance_pass(&config, Phase::Prestart)
            }
            _ => Ok(BalanceOutcome::none(self.current_difference(&config))),
        }
    }

    /// Round end with the winning side, `None` for a draw.
    pub fn on_round_end(&self, winner: Option<Side>) -> BalanceResult<BalanceOutcome> {
        let config = self.config();
        self.registry.update_all(|p| {
            if p.side.is_assigned() {
                p.counters.rounds_played += 1;
                if Some(p.side) == winner {
                    p.counters.rounds_won += 1;
                }
            }
        });

        let (reason, boost) = {
            let mut streaks = self.streaks.lock();
            streaks.record_round_outcome(winner);
            (
                streaks.should_scramble(&config, false),
                streaks.boost_target(&config),
            )
        };

        let mut outcome = if self.warmup.load(Ordering::Acquire) && !config.balance_during_warmup {
            BalanceOutcome::none(self.current_difference(&config))
        } else if reason == Some(ScrambleReason::WinStreak) {
            self.scramble_pass(&config, ScrambleReason::WinStreak, Phase::Live)?
        } else if self.triggered(BalanceTrigger::RoundEnd, &config) {
            self.balance_pass(&config, Phase::Live)?
        } else {
            BalanceOutcome::none(self.current_difference(&config))
        };

        if let Some(boost) = boost {
            if outcome.action != BalanceAction::Scrambled {
                outcome.events.push(BalanceEvent::LoseStreak {
                    side: boost.side,
                    lose_streak: boost.lose_streak,
                });
            }
        }
        Ok(outcome)
    }

    /// Session boundary: counters, tenure, immunity and streaks start over.
    pub fn on_map_end(&self) {
        self.registry.reset_session_stats();
        self.streaks.lock().reset_all();
        self.round.store(0, Ordering::Release);
        self.halftime.store(false, Ordering::Release);
        info!("map ended, session stats reset");
    }

    /// Decide whether a participant may switch to `desired`.
    ///
    /// Allowed switches are recorded in the registry straight away.
    pub fn request_join(&self, id: ParticipantId, desired: Side) -> BalanceResult<JoinDecision> {
        let config = self.config();
        let participant = self
            .registry
            .get(id)
            .ok_or(BalanceError::UnknownParticipant(id))?;

        if participant.side == desired {
            return Ok(JoinDecision::Allow);
        }

        let switch_to = |side: Side| {
            self.registry.update(id, |p| {
                p.side = side;
                p.rounds_on_side = 0;
            })
        };

        if self.warmup.load(Ordering::Acquire) || !desired.is_assigned() {
            switch_to(desired)?;
            return Ok(JoinDecision::Allow);
        }

        let switching = participant.side.is_assigned();
        let (mut count_a, mut count_b) = self.registry.side_counts();
        match participant.side {
            Side::A => count_a -= 1,
            Side::B => count_b -= 1,
            Side::Unassigned => {}
        }
        let fits = |side: Side| {
            let (a, b) = match side {
                Side::A => (count_a + 1, count_b),
                _ => (count_a, count_b + 1),
            };
            join_fits(a.abs_diff(b), config.max_size_difference, switching)
        };

        if fits(desired) {
            switch_to(desired)?;
            return Ok(JoinDecision::Allow);
        }

        let side = desired.other();
        if !switching && fits(side) {
            switch_to(side)?;
            debug!(id, requested = %desired, assigned = %side, "join redirected");
            return Ok(JoinDecision::Redirect {
                side,
                delayed: participant.alive,
            });
        }

        debug!(id, requested = %desired, "join would break size tolerance, denied");
        Ok(JoinDecision::Deny)
    }

    /// Sync with the host's full roster
    pub fn reconcile(&self, roster: &[ParticipantInfo]) -> ReconcileReport {
        let honour = self.config.read().admin_exemption;
        self.registry.reconcile(roster, honour)
    }

    /// Explicit balance request, independent of configured triggers
    pub fn rebalance(&self) -> BalanceResult<BalanceOutcome> {
        let config = self.config();
        self.balance_pass(&config, Phase::Live)
    }

    /// Explicit scramble request
    pub fn scramble_now(&self, reason: ScrambleReason) -> BalanceResult<BalanceOutcome> {
        let config = self.config();
        self.scramble_pass(&config, reason, Phase::Live)
    }

    pub fn state(&self) -> SessionState {
        let config = self.config();
        let (a, b) = self.groups(&config);
        let streaks = self.streaks();
        SessionState {
            round: self.round(),
            warmup: self.warmup.load(Ordering::Acquire),
            halftime: self.halftime.load(Ordering::Acquire),
            size_a: a.len(),
            size_b: b.len(),
            mean_a: a.mean(),
            mean_b: b.mean(),
            difference: mean_difference(&a, &b),
            boost: streaks.boost_target(&config),
            streaks,
            participants: self.registry.snapshot(),
        }
    }

    // Passes

    fn groups(&self, config: &BalanceConfig) -> (Group, Group) {
        split_groups(self.registry.snapshot(), config)
    }

    fn current_difference(&self, config: &BalanceConfig) -> f64 {
        let (a, b) = self.groups(config);
        mean_difference(&a, &b)
    }

    fn balance_pass(&self, config: &BalanceConfig, phase: Phase) -> BalanceResult<BalanceOutcome> {
        let _guard = self.try_begin_pass()?;

        if config.scramble.mode == ScrambleMode::Always {
            return self.scramble_locked(config, ScrambleReason::Always, phase);
        }

        let plan = self.plan_balance(config, phase, config.size_only);
        if !plan.outcome.changed() {
            return Ok(plan.outcome);
        }

        match self.registry.apply(&plan.records) {
            Ok(()) => {
                log_outcome(&plan.outcome);
                Ok(plan.outcome)
            }
            Err(BalanceError::StaleSnapshot(id)) => {
                warn!(id, "participant left during the pass, result discarded");
                if plan.outcome.moved_for_size > 0 {
                    self.retry_size_only(config, phase)
                } else {
                    Ok(BalanceOutcome::none(self.current_difference(config)))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Second attempt after a stale snapshot: sizes only, on fresh data.
    fn retry_size_only(
        &self,
        config: &BalanceConfig,
        phase: Phase,
    ) -> BalanceResult<BalanceOutcome> {
        let plan = self.plan_balance(config, phase, true);
        if !plan.outcome.changed() {
            return Ok(plan.outcome);
        }
        match self.registry.apply(&plan.records) {
            Ok(()) => {
                log_outcome(&plan.outcome);
                Ok(plan.outcome)
            }
            Err(BalanceError::StaleSnapshot(id)) => {
                warn!(id, "size retry also stale, no balance this cycle");
                Ok(BalanceOutcome::none(self.current_difference(config)))
            }
            Err(e) => Err(e),
        }
    }

    fn plan_balance(&self, config: &BalanceConfig, phase: Phase, size_only: bool) -> Plan {
        let snapshot = self.registry.snapshot();
        let (mut a, mut b) = split_groups(snapshot.clone(), config);

        let trigger = evaluate(&a, &b, config);
        if !trigger.fires() {
            debug!(?trigger, "no balance needed");
            return Plan {
                outcome: BalanceOutcome::none(mean_difference(&a, &b)),
                records: Vec::new(),
            };
        }
        debug!(?trigger, ?phase, "balancing");

        let balancer = Balancer::new(config.clone()).with_clock(now_millis());
        let size = {
            let mut rng = self.rng.lock();
            balancer.balance_sizes(&mut a, &mut b, phase, &mut *rng)
        };

        let boost = if size_only {
            None
        } else {
            self.streaks.lock().boost_target(config)
        };
        let skill = if size_only {
            Default::default()
        } else {
            balancer.balance_skill(&mut a, &mut b, phase, boost)
        };

        // Moves in decision order: size first, then both halves of each swap
        let mut order: Vec<(ParticipantId, bool)> = size.reassigned.clone();
        for (into_weaker, into_stronger) in &skill.swapped {
            order.push((*into_weaker, false));
            order.push((*into_stronger, false));
        }

        let mut outcome = BalanceOutcome {
            action: BalanceAction::Balanced,
            moved_for_size: size.moved,
            forced_moves: size.forced,
            swaps: skill.swaps,
            final_difference: mean_difference(&a, &b),
            ..BalanceOutcome::default()
        };
        let mut records = Vec::new();
        for (id, forced) in order {
            let Some(before) = snapshot.iter().find(|p| p.id == id) else { continue };
            let Some(after) = a.get(id).or_else(|| b.get(id)) else { continue };
            if before.side == after.side {
                continue;
            }
            outcome.reassignments.push(Reassignment {
                id,
                name: after.name.clone(),
                from: before.side,
                to: after.side,
                forced,
            });
            records.push(CommitRecord::from_participant(after, false));
        }

        if size.moved > size.forced {
            outcome.events.push(BalanceEvent::SizeCorrected {
                moved: size.moved - size.forced,
            });
        }
        if size.forced > 0 {
            outcome.events.push(BalanceEvent::ForcedMoves { moved: size.forced });
        }
        if skill.swaps > 0 {
            outcome.events.push(BalanceEvent::SkillSwapped { swaps: skill.swaps });
            if let Some(boost) = boost {
                outcome.events.push(BalanceEvent::BoostApplied {
                    side: boost.side,
                    percentage: boost.percentage,
                    lose_streak: boost.lose_streak,
                });
            }
        }
        if outcome.reassignments.is_empty() {
            outcome.action = BalanceAction::None;
        }

        Plan { outcome, records }
    }

    fn scramble_pass(
        &self,
        config: &BalanceConfig,
        reason: ScrambleReason,
        phase: Phase,
    ) -> BalanceResult<BalanceOutcome> {
        let _guard = self.try_begin_pass()?;
        self.scramble_locked(config, reason, phase)
    }

    /// Scramble body; the caller holds the pass guard. Automatic scrambles
    /// need `min_participants` on the two sides, manual ones do not.
    fn scramble_locked(
        &self,
        config: &BalanceConfig,
        reason: ScrambleReason,
        phase: Phase,
    ) -> BalanceResult<BalanceOutcome> {
        let snapshot = self.registry.snapshot();
        if reason != ScrambleReason::Manual {
            let (a, b) = split_groups(snapshot.clone(), config);
            let participants = a.len() + b.len();
            if participants < config.min_participants {
                debug!(
                    ?reason,
                    participants,
                    required = config.min_participants,
                    "too few participants to scramble"
                );
                return Ok(BalanceOutcome::none(mean_difference(&a, &b)));
            }
        }
        let scrambler = Scrambler::new(config.clone()).with_clock(now_millis());
        let report = {
            let mut rng = self.rng.lock();
            scrambler.scramble(&snapshot, config.scramble.style, phase, &mut *rng)
        };
        if !report.performed {
            return Ok(BalanceOutcome::none(report.final_difference()));
        }

        let records: Vec<CommitRecord> = report
            .pool
            .iter()
            .filter_map(|id| report.a.get(*id).or_else(|| report.b.get(*id)))
            .map(|p| CommitRecord::from_participant(p, config.scramble.reset_stats))
            .collect();

        match self.registry.apply(&records) {
            Ok(()) => {}
            Err(BalanceError::StaleSnapshot(id)) => {
                warn!(id, ?reason, "participant left during scramble, result discarded");
                return Ok(BalanceOutcome::none(self.current_difference(config)));
            }
            Err(e) => return Err(e),
        }
        self.streaks.lock().reset();

        let reassignments: Vec<Reassignment> = report
            .reassigned
            .iter()
            .filter_map(|id| {
                let before = snapshot.iter().find(|p| p.id == *id)?;
                let after = report.a.get(*id).or_else(|| report.b.get(*id))?;
                Some(Reassignment {
                    id: *id,
                    name: after.name.clone(),
                    from: before.side,
                    to: after.side,
                    forced: false,
                })
            })
            .collect();

        info!(
            ?reason,
            pool = report.pool.len(),
            moved = reassignments.len(),
            reset_stats = config.scramble.reset_stats,
            "teams scrambled"
        );

        Ok(BalanceOutcome {
            action: BalanceAction::Scrambled,
            events: vec![BalanceEvent::Scrambled {
                reason,
                moved: reassignments.len(),
            }],
            reassignments,
            final_difference: report.final_difference(),
            ..BalanceOutcome::default()
        })
    }
}

/// Whether a join leaving the sides `diff` apart is within tolerance.
///
/// With zero tolerance a newcomer may still make the sides one apart, since
/// an odd roster can never be level.
fn join_fits(diff: usize, max: usize, switching: bool) -> bool {
    diff <= max || (!switching && max == 0 && diff == 1)
}

/// Connected participants on A and B as groups under the active metric
fn split_groups(snapshot: Vec<Participant>, config: &BalanceConfig) -> (Group, Group) {
    let metric = config.skill_metric;
    let (on_a, rest): (Vec<Participant>, Vec<Participant>) =
        snapshot.into_iter().partition(|p| p.side == Side::A);
    let on_b = rest.into_iter().filter(|p| p.side == Side::B).collect();
    (
        Group::from_members(Side::A, metric, on_a),
        Group::from_members(Side::B, metric, on_b),
    )
}

fn log_outcome(outcome: &BalanceOutcome) {
    info!(
        moved_for_size = outcome.moved_for_size,
        forced = outcome.forced_moves,
        swaps = outcome.swaps,
        final_difference = outcome.final_difference,
        "teams balanced"
    );
}
