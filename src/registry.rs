//! Session-scoped participant registry.
//!
//! Event handlers (joins, deaths, round events) may fire from several
//! threads, so every access goes through a `parking_lot::RwLock`. Balancing
//! passes never iterate the live map: they take a [`snapshot`] and hand the
//! result back through [`apply`], which commits all moves under one write
//! lock or none of them.
//!
//! [`snapshot`]: ParticipantRegistry::snapshot
//! [`apply`]: ParticipantRegistry::apply

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::{BalanceError, BalanceResult};
use crate::types::{Participant, ParticipantId, ParticipantInfo, Side};

/// Balancing-owned fields to write back for one participant
#[derive(Clone, Debug, PartialEq)]
pub struct CommitRecord {
    pub id: ParticipantId,
    pub side: Side,
    pub rounds_on_side: u32,
    pub immunity_remaining: i32,
    pub last_switch_ms: u64,
    pub reset_counters: bool,
}

impl CommitRecord {
    pub fn from_participant(p: &Participant, reset_counters: bool) -> Self {
        Self {
            id: p.id,
            side: p.side,
            rounds_on_side: p.rounds_on_side,
            immunity_remaining: p.immunity_remaining,
            last_switch_ms: p.last_switch_ms,
            reset_counters,
        }
    }
}

/// What a full roster reconciliation changed
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub added: Vec<ParticipantId>,
    pub removed: Vec<ParticipantId>,
    pub side_fixes: Vec<ParticipantId>,
}

#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: RwLock<HashMap<ParticipantId, Participant>>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a participant. Returns `true` when it was new.
    ///
    /// Existing counters are kept unless the host supplies replacements.
    pub fn upsert(&self, info: &ParticipantInfo, honour_exemption: bool) -> bool {
        let mut participants = self.participants.write();
        let exempt = honour_exemption && info.exempt;
        match participants.get_mut(&info.id) {
            Some(existing) => {
                existing.name.clone_from(&info.name);
                existing.connected = true;
                existing.alive = info.alive;
                existing.exempt = exempt;
                if existing.side != info.side {
                    debug!(
                        id = info.id,
                        from = %existing.side,
                        to = %info.side,
                        "side changed by host"
                    );
                    existing.side = info.side;
                    existing.rounds_on_side = 0;
                }
                if let Some(counters) = &info.counters {
                    existing.counters = counters.clone();
                }
                false
            }
            None => {
                let mut participant = Participant::new(info.id, &info.name, info.side);
                participant.alive = info.alive;
                participant.exempt = exempt;
                if let Some(counters) = &info.counters {
                    participant.counters = counters.clone();
                }
                participants.insert(info.id, participant);
                debug!(
                    id = info.id,
                    name = %info.name,
                    side = %info.side,
                    "participant registered"
                );
                true
            }
        }
    }

    pub fn remove(&self, id: ParticipantId) -> Option<Participant> {
        let removed = self.participants.write().remove(&id);
        if removed.is_some() {
            debug!(id, "participant removed");
        }
        removed
    }

    pub fn get(&self, id: ParticipantId) -> Option<Participant> {
        self.participants.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.read().contains_key(&id)
    }

    /// Mutate one participant in place.
    pub fn update<F>(&self, id: ParticipantId, f: F) -> BalanceResult<()>
    where
        F: FnOnce(&mut Participant),
    {
        let mut participants = self.participants.write();
        let participant = participants
            .get_mut(&id)
            .ok_or(BalanceError::UnknownParticipant(id))?;
        f(participant);
        Ok(())
    }

    /// Mutate every connected participant in place.
    pub fn update_all<F>(&self, mut f: F)
    where
        F: FnMut(&mut Participant),
    {
        for participant in self.participants.write().values_mut() {
            if participant.connected {
                f(participant);
            }
        }
    }

    /// Point-in-time copy of all connected participants, ordered by id.
    pub fn snapshot(&self) -> Vec<Participant> {
        let mut snapshot: Vec<Participant> = self
            .participants
            .read()
            .values()
            .filter(|p| p.connected)
            .cloned()
            .collect();
        snapshot.sort_by_key(|p| p.id);
        snapshot
    }

    /// Connected participants on (A, B)
    pub fn side_counts(&self) -> (usize, usize) {
        let participants = self.participants.read();
        let count = |side: Side| {
            participants
                .values()
                .filter(|p| p.connected && p.side == side)
                .count()
        };
        (count(Side::A), count(Side::B))
    }

    pub fn len(&self) -> usize {
        self.participants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.read().is_empty()
    }

    /// Commit the result of a balancing pass.
    ///
    /// Every record must still refer to a connected participant; otherwise
    /// nothing is written and the first missing id is reported.
    pub fn apply(&self, records: &[CommitRecord]) -> BalanceResult<()> {
        let mut participants = self.participants.write();
        if let Some(missing) = records
            .iter()
            .find(|r| !participants.get(&r.id).is_some_and(|p| p.connected))
        {
            return Err(BalanceError::StaleSnapshot(missing.id));
        }
        for record in records {
            if let Some(participant) = participants.get_mut(&record.id) {
                participant.side = record.side;
                participant.rounds_on_side = record.rounds_on_side;
                participant.immunity_remaining = record.immunity_remaining;
                participant.last_switch_ms = record.last_switch_ms;
                if record.reset_counters {
                    participant.counters.reset();
                }
            }
        }
        Ok(())
    }

    /// Bring the registry in line with the host's authoritative roster:
    /// unknown participants are added, vanished ones dropped, and sides the
    /// host reports differently are corrected.
    pub fn reconcile(&self, roster: &[ParticipantInfo], honour_exemption: bool) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let present: HashSet<ParticipantId> = roster.iter().map(|info| info.id).collect();

        for info in roster {
            let before = self.get(info.id);
            let inserted = self.upsert(info, honour_exemption);
            if inserted {
                report.added.push(info.id);
            } else if before.is_some_and(|p| p.side != info.side) {
                report.side_fixes.push(info.id);
            }
        }

        let mut participants = self.participants.write();
        let stale: Vec<ParticipantId> = participants
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();
        for id in stale {
            participants.remove(&id);
            report.removed.push(id);
        }
        report.removed.sort_unstable();

        debug!(
            added = report.added.len(),
            removed = report.removed.len(),
            side_fixes = report.side_fixes.len(),
            "roster reconciled"
        );
        report
    }

    /// Session boundary: zero counters, tenure and immunity for everyone.
    pub fn reset_session_stats(&self) {
        self.update_all(|p| {
            p.counters.reset();
            p.rounds_on_side = 0;
            p.immunity_remaining = 0;
        });
    }

    pub fn clear(&self) {
        self.participants.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Counters;
    use std::sync::Arc;
    use std::thread;

    fn info(id: ParticipantId, side: Side) -> ParticipantInfo {
        ParticipantInfo {
            id,
            name: format!("player{}", id),
            side,
            alive: false,
            exempt: false,
            counters: None,
        }
    }

    #[test]
    fn test_upsert_inserts_then_refreshes() {
        let registry = ParticipantRegistry::new();
        assert!(registry.upsert(&info(1, Side::A), true));

        registry
            .update(1, |p| {
                p.counters.kills = 4;
                p.rounds_on_side = 3;
            })
            .unwrap();

        let mut renamed = info(1, Side::A);
        renamed.name = "renamed".to_string();
        assert!(!registry.upsert(&renamed, true));

        let p = registry.get(1).unwrap();
        assert_eq!(p.name, "renamed");
        assert_eq!(p.counters.kills, 4);
        assert_eq!(p.rounds_on_side, 3);
    }

    #[test]
    fn test_exemption_respects_config() {
        let registry = ParticipantRegistry::new();
        let mut admin = info(1, Side::A);
        admin.exempt = true;

        registry.upsert(&admin, false);
        assert!(!registry.get(1).unwrap().exempt);
        registry.upsert(&admin, true);
        assert!(registry.get(1).unwrap().exempt);
    }

    #[test]
    fn test_update_unknown_participant() {
        let registry = ParticipantRegistry::new();
        let result = registry.update(42, |p| p.alive = true);
        assert!(matches!(result, Err(BalanceError::UnknownParticipant(42))));
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let registry = ParticipantRegistry::new();
        registry.upsert(&info(1, Side::A), true);
        registry.upsert(&info(2, Side::A), true);

        let mut moved = registry.get(1).unwrap();
        moved.move_to(Side::B, 2, 10);
        let mut gone = registry.get(2).unwrap();
        gone.move_to(Side::B, 2, 10);
        registry.remove(2);

        let records = vec![
            CommitRecord::from_participant(&moved, false),
            CommitRecord::from_participant(&gone, false),
        ];
        let result = registry.apply(&records);
        assert!(matches!(result, Err(BalanceError::StaleSnapshot(2))));
        assert_eq!(registry.get(1).unwrap().side, Side::A);

        registry.apply(&records[..1]).unwrap();
        let p = registry.get(1).unwrap();
        assert_eq!(p.side, Side::B);
        assert_eq!(p.immunity_remaining, 2);
    }

    #[test]
    fn test_apply_keeps_counters_updated_during_pass() {
        let registry = ParticipantRegistry::new();
        registry.upsert(&info(1, Side::A), true);
        let mut snapshot = registry.get(1).unwrap();

        registry.update(1, |p| p.counters.kills = 3).unwrap();
        snapshot.move_to(Side::B, 1, 0);
        registry
            .apply(&[CommitRecord::from_participant(&snapshot, false)])
            .unwrap();

        let p = registry.get(1).unwrap();
        assert_eq!(p.side, Side::B);
        assert_eq!(p.counters.kills, 3);
    }

    #[test]
    fn test_reconcile_roster() {
        let registry = ParticipantRegistry::new();
        registry.upsert(&info(1, Side::A), true);
        registry.upsert(&info(2, Side::B), true);

        let roster = vec![info(1, Side::B), info(3, Side::A)];
        let report = registry.reconcile(&roster, true);

        assert_eq!(report.added, vec![3]);
        assert_eq!(report.removed, vec![2]);
        assert_eq!(report.side_fixes, vec![1]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).unwrap().side, Side::B);
    }

    #[test]
    fn test_reset_session_stats() {
        let registry = ParticipantRegistry::new();
        let mut with_counters = info(1, Side::A);
        with_counters.counters = Some(Counters {
            kills: 10,
            deaths: 2,
            ..Counters::default()
        });
        registry.upsert(&with_counters, true);
        registry.update(1, |p| p.immunity_remaining = 2).unwrap();

        registry.reset_session_stats();
        let p = registry.get(1).unwrap();
        assert_eq!(p.counters, Counters::default());
        assert_eq!(p.immunity_remaining, 0);
    }

    #[test]
    fn test_concurrent_upserts_and_snapshots() {
        let registry = Arc::new(ParticipantRegistry::new());
        let mut handles = vec![];

        for t in 0..4u64 {
            let registry = registry.clone();
            handles.push(thread::spawn(move || {
                for i in 0..50u64 {
                    let id = t * 100 + i;
                    registry.upsert(&info(id, if i % 2 == 0 { Side::A } else { Side::B }), true);
                    let _ = registry.update(id, |p| p.counters.kills += 1);
                    let _ = registry.snapshot();
                    if i % 5 == 0 {
                        registry.remove(id);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // 4 threads x 50 inserts, every fifth removed
        assert_eq!(registry.len(), 160);
        let snapshot = registry.snapshot();
        assert!(snapshot.windows(2).all(|w| w[0].id < w[1].id));
    }
}
