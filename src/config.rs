//! Chain parameter configuration with validation and defaults
//!
//! All tunables of the coordination core live here. The config is loaded
//! once (genesis or committee parameter update), validated, and then
//! threaded through the ledger context, never a mutable global.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};

/// Basis-point scale shared by rating and weight arithmetic.
pub const RATIO_SCALE: i64 = 10_000;

/// Span of the pre-fork pseudo-random rating perturbation.
pub const RATING_JITTER_SPAN: i64 = 100;

/// Complete chain parameter set for the coordination core
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChainConfig {
    pub reservations: ReservationConfig,
    pub matchmaking: MatchmakingConfig,
    pub voting: VotingConfig,
    pub rating: RatingConfig,
    pub liveness: LivenessConfig,
}

/// Pending buy-in (reservation) parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReservationConfig {
    /// Open reservations allowed per player
    pub slots_per_user: u32,
    /// Seconds before an unresolved reservation expires
    pub lifetime_secs: u64,
    /// Allocation work quota per block
    pub allocated_per_block: u32,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            slots_per_user: 5,
            lifetime_secs: 60,
            allocated_per_block: 300,
        }
    }
}

/// Table search window and eligibility floor for the allocation engine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MatchmakingConfig {
    pub min_desired_players: u32,
    pub max_desired_players: u32,
    /// Tables below this weight are never allocated to
    pub min_table_weight: i64,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            min_desired_players: 2,
            max_desired_players: 10,
            min_table_weight: 0,
        }
    }
}

/// Quorum and lifetime parameters of the table voting protocol
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VotingConfig {
    /// Percentage of required voters that must agree on a start claim
    pub start_quorum_percent: u32,
    /// Percentage of required voters that must agree on a result claim
    pub result_quorum_percent: u32,
    /// Share of the witness requirement players may stand in for (start)
    pub start_substitution_percent: u32,
    /// Share of the witness requirement players may stand in for (result)
    pub result_substitution_percent: u32,
    /// Seconds a voting record stays open before consensus expires
    pub expiration_secs: u64,
    /// Hard upper bound on a single hand's lifetime, seconds
    pub game_lifetime_secs: u64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            start_quorum_percent: 60,
            result_quorum_percent: 60,
            start_substitution_percent: 0,
            result_substitution_percent: 50,
            expiration_secs: 60,
            game_lifetime_secs: 3600,
        }
    }
}

/// Rating engine quotas, decay shape and formula constants
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RatingConfig {
    /// Room rescores per maintenance cycle
    pub room_recomputations_per_cycle: u32,
    /// Table weight recomputes per maintenance cycle
    pub table_weight_recomputations_per_cycle: u32,
    /// Minutes of linear decay before the halving tail starts
    pub fade_minutes: u64,
    /// Population-baseline pull term of the rating formula
    pub correction: i64,
    /// Output scale constant of the rating formula
    pub constant: i64,
    /// Measurement count where the quantity factor turns logarithmic
    pub quantity_threshold: u64,
    /// Ledger time at which the statistical formula replaces the legacy
    /// tie-break perturbation
    pub formula_fork_time: u64,
    /// Seconds a KPI measurement stays countable
    pub kpi_lifetime_secs: u64,
    /// Seconds a standby measurement stays countable
    pub standby_lifetime_secs: u64,
    /// Weight of one standby (alive-heartbeat) measurement, RATIO_SCALE units
    pub standby_weight: i64,
    /// Seconds between maintenance cycles
    pub maintenance_interval_secs: u64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            room_recomputations_per_cycle: 1000,
            table_weight_recomputations_per_cycle: 1000,
            fade_minutes: 60,
            correction: RATIO_SCALE,
            constant: 100,
            quantity_threshold: 100,
            formula_fork_time: 0,
            kpi_lifetime_secs: 86_400,
            standby_lifetime_secs: 86_400,
            standby_weight: RATIO_SCALE / 10,
            maintenance_interval_secs: 300,
        }
    }
}

/// Liveness windows for tables and seated players
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LivenessConfig {
    /// Seconds a table counts as alive after a heartbeat
    pub table_alive_secs: u64,
    /// Seconds a seated player's buy-in survives without refresh
    pub buy_in_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            table_alive_secs: 20,
            buy_in_secs: 120,
        }
    }
}

impl ChainConfig {
    /// Parse a config from TOML, falling back to defaults per section
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter sets that would stall or corrupt the engines
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn percent(field: &'static str, value: u32, min: u32) -> Result<(), ConfigError> {
            if value < min || value > 100 {
                return Err(ConfigError::InvalidValue {
                    field,
                    value: value.to_string(),
                });
            }
            Ok(())
        }

        percent("voting.start_quorum_percent", self.voting.start_quorum_percent, 1)?;
        percent("voting.result_quorum_percent", self.voting.result_quorum_percent, 1)?;
        percent(
            "voting.start_substitution_percent",
            self.voting.start_substitution_percent,
            0,
        )?;
        percent(
            "voting.result_substitution_percent",
            self.voting.result_substitution_percent,
            0,
        )?;

        if self.reservations.allocated_per_block == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reservations.allocated_per_block",
                value: "0".into(),
            });
        }
        if self.rating.room_recomputations_per_cycle == 0
            || self.rating.table_weight_recomputations_per_cycle == 0
        {
            return Err(ConfigError::InvalidValue {
                field: "rating.*_per_cycle",
                value: "0".into(),
            });
        }
        if self.matchmaking.max_desired_players == 0
            || self.matchmaking.min_desired_players > self.matchmaking.max_desired_players
        {
            return Err(ConfigError::InvalidValue {
                field: "matchmaking.min_desired_players",
                value: format!(
                    "{}..{}",
                    self.matchmaking.min_desired_players, self.matchmaking.max_desired_players
                ),
            });
        }
        if self.rating.fade_minutes == 0 || self.rating.quantity_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rating.fade_minutes / rating.quantity_threshold",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ChainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reservations.allocated_per_block, 300);
        assert_eq!(config.voting.start_quorum_percent, 60);
        assert_eq!(config.voting.result_substitution_percent, 50);
    }

    #[test]
    fn rejects_zero_quota() {
        let mut config = ChainConfig::default();
        config.reservations.allocated_per_block = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_occupancy_window() {
        let mut config = ChainConfig::default();
        config.matchmaking.min_desired_players = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrip_with_partial_sections() {
        let raw = r#"
            [voting]
            start_quorum_percent = 75

            [reservations]
            allocated_per_block = 10
        "#;
        let config = ChainConfig::from_toml_str(raw).expect("parse");
        assert_eq!(config.voting.start_quorum_percent, 75);
        assert_eq!(config.reservations.allocated_per_block, 10);
        // untouched sections keep defaults
        assert_eq!(config.rating.room_recomputations_per_cycle, 1000);
    }

    #[test]
    fn rejects_quorum_out_of_range() {
        let raw = "[voting]\nresult_quorum_percent = 140\n";
        assert!(ChainConfig::from_toml_str(raw).is_err());
    }
}
