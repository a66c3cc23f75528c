use serde::{Deserialize, Serialize};

use crate::config::BalanceConfig;
use crate::types::Participant;

/// When in the round a pass runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Mid-round or round end; alive participants stay put
    #[default]
    Live,
    /// Freeze time before the round, everyone is about to respawn
    Prestart,
}

/// Which rule set decides whether a participant may be moved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EligibilityMode {
    Standard,
    RoundPrestart,
    /// Last resort for size correction: immunity, tenure and liveness ignored
    Forced,
    Scramble { prestart: bool },
}

impl EligibilityMode {
    /// Regular balancing mode for a phase
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Live => EligibilityMode::Standard,
            Phase::Prestart => EligibilityMode::RoundPrestart,
        }
    }

    pub fn scramble(phase: Phase) -> Self {
        EligibilityMode::Scramble {
            prestart: phase == Phase::Prestart,
        }
    }
}

/// Whether `p` may be reassigned under `mode`.
///
/// Exemption holds in every mode, including forced correction.
pub fn is_eligible(p: &Participant, config: &BalanceConfig, mode: EligibilityMode) -> bool {
    if p.exempt || !p.connected {
        return false;
    }
    let settled = p.immunity_remaining <= 0 && p.rounds_on_side >= config.min_rounds_before_switch;
    match mode {
        EligibilityMode::Standard => settled && !p.alive,
        EligibilityMode::RoundPrestart => settled,
        EligibilityMode::Forced => true,
        EligibilityMode::Scramble { prestart } => prestart || !p.alive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn settled(id: u64) -> Participant {
        let mut p = Participant::new(id, "p", Side::A);
        p.rounds_on_side = 5;
        p
    }

    const ALL_MODES: [EligibilityMode; 5] = [
        EligibilityMode::Standard,
        EligibilityMode::RoundPrestart,
        EligibilityMode::Forced,
        EligibilityMode::Scramble { prestart: false },
        EligibilityMode::Scramble { prestart: true },
    ];

    #[test]
    fn test_exempt_is_never_eligible() {
        let config = BalanceConfig::default();
        let mut p = settled(1);
        p.exempt = true;
        for mode in ALL_MODES {
            assert!(!is_eligible(&p, &config, mode), "{:?}", mode);
        }
    }

    #[test]
    fn test_disconnected_is_never_eligible() {
        let config = BalanceConfig::default();
        let mut p = settled(1);
        p.connected = false;
        for mode in ALL_MODES {
            assert!(!is_eligible(&p, &config, mode));
        }
    }

    #[test]
    fn test_standard_requires_dead_settled_participant() {
        let config = BalanceConfig::default();
        let mut p = settled(1);
        assert!(is_eligible(&p, &config, EligibilityMode::Standard));

        p.alive = true;
        assert!(!is_eligible(&p, &config, EligibilityMode::Standard));
        assert!(is_eligible(&p, &config, EligibilityMode::RoundPrestart));

        p.alive = false;
        p.immunity_remaining = 1;
        assert!(!is_eligible(&p, &config, EligibilityMode::Standard));
        assert!(!is_eligible(&p, &config, EligibilityMode::RoundPrestart));

        p.immunity_remaining = 0;
        p.rounds_on_side = config.min_rounds_before_switch - 1;
        assert!(!is_eligible(&p, &config, EligibilityMode::Standard));
    }

    #[test]
    fn test_forced_ignores_immunity_tenure_and_liveness() {
        let config = BalanceConfig::default();
        let mut p = Participant::new(1, "fresh", Side::B);
        p.alive = true;
        p.immunity_remaining = 3;
        assert!(is_eligible(&p, &config, EligibilityMode::Forced));
    }

    #[test]
    fn test_scramble_liveness_depends_on_phase() {
        let config = BalanceConfig::default();
        let mut p = Participant::new(1, "p", Side::A);
        p.immunity_remaining = 2;
        assert!(is_eligible(&p, &config, EligibilityMode::scramble(Phase::Live)));

        p.alive = true;
        assert!(!is_eligible(&p, &config, EligibilityMode::scramble(Phase::Live)));
        assert!(is_eligible(&p, &config, EligibilityMode::scramble(Phase::Prestart)));
    }
}
