pub mod balancer;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod scramble;
pub mod session;
pub mod streak;
pub mod trigger;
pub mod types;

pub use balancer::{Balancer, SizeReport, SkillReport};
pub use config::{
    BalanceConfig, BalanceTrigger, ConfigWarning, ScrambleMode, ScrambleStyle, ThresholdKind,
};
pub use eligibility::{is_eligible, EligibilityMode, Phase};
pub use error::{BalanceError, BalanceResult};
pub use metrics::{SkillMetric, UnknownMetric};
pub use registry::ParticipantRegistry;
pub use scramble::{ScrambleReport, Scrambler};
pub use session::{BalanceSession, SessionState};
pub use streak::StreakTracker;
pub use trigger::{evaluate, needs_balance, Trigger};
pub use types::*;

use serde::Serialize;
use wasm_bindgen::prelude::*;

/// Initialize panic hook for better error messages
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn js_error(e: BalanceError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

fn parse_side(side: &str) -> Result<Side, JsValue> {
    side.parse::<Side>().map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Surface clamped config values in the host console
fn report_warnings(warnings: &[ConfigWarning]) {
    #[cfg(target_arch = "wasm32")]
    for warning in warnings {
        web_sys::console::warn_1(&JsValue::from_str(&format!(
            "config {}: {}",
            warning.field, warning.message
        )));
    }
    #[cfg(not(target_arch = "wasm32"))]
    let _ = warnings;
}

/// WASM-exposed balancing session
#[wasm_bindgen]
pub struct BalanceEngine {
    session: BalanceSession,
}

#[wasm_bindgen]
impl BalanceEngine {
    /// Create a new session with default config
    #[wasm_bindgen(constructor)]
    pub fn new(seed: u64) -> BalanceEngine {
        BalanceEngine {
            session: BalanceSession::new(BalanceConfig::default(), seed),
        }
    }

    /// Create with custom config (JSON)
    pub fn new_with_config(seed: u64, config_json: &str) -> Result<BalanceEngine, JsValue> {
        let (config, warnings) = BalanceConfig::from_json_str(config_json).map_err(js_error)?;
        report_warnings(&warnings);
        Ok(BalanceEngine {
            session: BalanceSession::new(config, seed),
        })
    }

    /// Replace the config. Returns the clamping warnings as JSON.
    pub fn update_config(&mut self, config_json: &str) -> Result<String, JsValue> {
        let (config, mut warnings) = BalanceConfig::from_json_str(config_json).map_err(js_error)?;
        warnings.extend(self.session.update_config(config));
        report_warnings(&warnings);
        to_json(&warnings)
    }

    /// Replace the config from a TOML document
    pub fn update_config_toml(&mut self, config_toml: &str) -> Result<String, JsValue> {
        let (config, mut warnings) = BalanceConfig::from_toml_str(config_toml).map_err(js_error)?;
        warnings.extend(self.session.update_config(config));
        report_warnings(&warnings);
        to_json(&warnings)
    }

    /// Get default config as JSON
    pub fn get_default_config() -> String {
        serde_json::to_string(&BalanceConfig::default()).unwrap_or_default()
    }

    pub fn get_config(&self) -> String {
        serde_json::to_string(&self.session.config()).unwrap_or_default()
    }

    /// Register or refresh a participant. Returns the pass outcome as JSON.
    pub fn upsert_participant(&mut self, info_json: &str) -> Result<String, JsValue> {
        let info: ParticipantInfo = serde_json::from_str(info_json)
            .map_err(|e| JsValue::from_str(&format!("Participant parse error: {}", e)))?;
        let outcome = self.session.on_join(info).map_err(js_error)?;
        to_json(&outcome)
    }

    pub fn remove_participant(&mut self, id: u64) -> Result<String, JsValue> {
        let outcome = self.session.on_disconnect(id).map_err(js_error)?;
        to_json(&outcome)
    }

    /// Reconcile against the host's full roster (JSON array of participants)
    pub fn sync_roster(&mut self, roster_json: &str) -> Result<String, JsValue> {
        let roster: Vec<ParticipantInfo> = serde_json::from_str(roster_json)
            .map_err(|e| JsValue::from_str(&format!("Roster parse error: {}", e)))?;
        to_json(&self.session.reconcile(&roster))
    }

    pub fn record_spawn(&mut self, id: u64) -> Result<(), JsValue> {
        self.session.on_spawn(id).map_err(js_error)
    }

    pub fn record_death(
        &mut self,
        victim: u64,
        attacker: Option<u64>,
        assister: Option<u64>,
    ) -> Result<(), JsValue> {
        self.session.on_death(victim, attacker, assister).map_err(js_error)
    }

    pub fn record_damage(&mut self, attacker: u64, amount: u32) -> Result<(), JsValue> {
        self.session.on_damage(attacker, amount).map_err(js_error)
    }

    pub fn set_score(&mut self, id: u64, score: i32) -> Result<(), JsValue> {
        self.session.set_score(id, score).map_err(js_error)
    }

    pub fn round_start(&mut self) -> Result<String, JsValue> {
        let outcome = self.session.on_round_start().map_err(js_error)?;
        to_json(&outcome)
    }

    /// `winner` is "a", "b", or "draw"
    pub fn round_end(&mut self, winner: &str) -> Result<String, JsValue> {
        let winner = match winner.trim().to_ascii_lowercase().as_str() {
            "" | "draw" | "none" => None,
            other => Some(parse_side(other)?),
        };
        let outcome = self.session.on_round_end(winner).map_err(js_error)?;
        to_json(&outcome)
    }

    pub fn map_end(&mut self) {
        self.session.on_map_end();
    }

    pub fn set_warmup(&mut self, warmup: bool) {
        self.session.set_warmup(warmup);
    }

    pub fn set_halftime(&mut self, halftime: bool) {
        self.session.set_halftime(halftime);
    }

    /// Validate a side change request. Returns the decision as JSON.
    pub fn request_join(&mut self, id: u64, side: &str) -> Result<String, JsValue> {
        let desired = parse_side(side)?;
        let decision = self.session.request_join(id, desired).map_err(js_error)?;
        to_json(&decision)
    }

    pub fn rebalance(&mut self) -> Result<String, JsValue> {
        let outcome = self.session.rebalance().map_err(js_error)?;
        to_json(&outcome)
    }

    pub fn scramble(&mut self) -> Result<String, JsValue> {
        let outcome = self
            .session
            .scramble_now(ScrambleReason::Manual)
            .map_err(js_error)?;
        to_json(&outcome)
    }

    /// Get current session state as JSON
    pub fn get_state(&self) -> String {
        serde_json::to_string(&self.session.state()).unwrap_or_default()
    }

    pub fn get_round(&self) -> u32 {
        self.session.round()
    }

    pub fn get_participant_count(&self) -> usize {
        self.session.registry().len()
    }
}

/// One-shot pass over a roster without keeping a session around
#[wasm_bindgen]
pub fn preview_balance(config_json: &str, roster_json: &str, seed: u64) -> Result<String, JsValue> {
    let (config, warnings) = BalanceConfig::from_json_str(config_json).map_err(js_error)?;
    report_warnings(&warnings);
    let roster: Vec<ParticipantInfo> = serde_json::from_str(roster_json)
        .map_err(|e| JsValue::from_str(&format!("Roster parse error: {}", e)))?;

    let session = BalanceSession::new(config, seed);
    session.reconcile(&roster);
    let outcome = session.rebalance().map_err(js_error)?;

    to_json(&serde_json::json!({
        "outcome": outcome,
        "state": session.state(),
    }))
}
