//! Table-voting record: the transient consensus round of one table

use super::{AccountId, LedgerTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which claim the round decides
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VotingPhase {
    GameStart,
    GameResult,
}

/// Claimed composition of a starting hand
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInitiation {
    pub players: BTreeSet<AccountId>,
}

/// Claimed outcome of a finished hand: the final stake per playing
/// player (same symbol as the table, conserving the playing total) and
/// the players the game server reports as leaving the table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResultData {
    pub balances: BTreeMap<AccountId, u64>,
    pub buy_outs: BTreeSet<AccountId>,
}

/// A single submitted claim value; equality is structural
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotePayload {
    GameStart(GameInitiation),
    GameResult(GameResultData),
}

impl VotePayload {
    pub fn phase(&self) -> VotingPhase {
        match self {
            VotePayload::GameStart(_) => VotingPhase::GameStart,
            VotePayload::GameResult(_) => VotingPhase::GameResult,
        }
    }
}

/// Transient consensus state for one table, deleted once resolved,
/// expired or rolled back. Deletion is observed by the statistics index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableVoting {
    pub phase: VotingPhase,
    pub required_player_voters: BTreeSet<AccountId>,
    pub required_witness_voters: BTreeSet<AccountId>,
    /// Witness-requirement slots players may stand in for
    pub allowed_substitutions: u32,
    /// Every admitted vote in submission order, one per voter
    pub votes: Vec<(AccountId, VotePayload)>,
    /// Reference value once quorum was reached; never changes afterwards
    pub etalon_vote: Option<VotePayload>,
    pub created: LedgerTime,
    pub expiration: LedgerTime,
}

impl TableVoting {
    pub fn new(
        phase: VotingPhase,
        required_player_voters: BTreeSet<AccountId>,
        required_witness_voters: BTreeSet<AccountId>,
        allowed_substitutions: u32,
        created: LedgerTime,
        expiration: LedgerTime,
    ) -> Self {
        Self {
            phase,
            required_player_voters,
            required_witness_voters,
            allowed_substitutions,
            votes: Vec::new(),
            etalon_vote: None,
            created,
            expiration,
        }
    }

    pub fn is_eligible(&self, voter: &AccountId) -> bool {
        self.required_player_voters.contains(voter) || self.required_witness_voters.contains(voter)
    }

    pub fn has_voted(&self, voter: &AccountId) -> bool {
        self.votes.iter().any(|(v, _)| v == voter)
    }

    /// Effective required voter count: witness slots covered by the
    /// substitution allowance do not raise the bar
    pub fn required_count(&self) -> u32 {
        let witnesses = self.required_witness_voters.len() as u32;
        let players = self.required_player_voters.len() as u32;
        players + witnesses.saturating_sub(self.allowed_substitutions)
    }

    /// Matching votes needed for a value to become the etalon:
    /// `quorum_percent` of the required count, rounded up
    pub fn threshold(&self, quorum_percent: u32) -> u32 {
        let required = self.required_count();
        ((required * quorum_percent) + 99) / 100
    }

    /// How many admitted votes structurally equal `payload`
    pub fn matching_votes(&self, payload: &VotePayload) -> u32 {
        self.votes.iter().filter(|(_, p)| p == payload).count() as u32
    }

    /// True once every required voter has voted
    pub fn all_voted(&self) -> bool {
        self.required_player_voters
            .iter()
            .chain(self.required_witness_voters.iter())
            .all(|v| self.has_voted(v))
    }

    /// Voters recorded on the losing side of the resolved etalon
    pub fn disagreeing_voters(&self) -> Vec<(AccountId, VotePayload)> {
        match &self.etalon_vote {
            Some(etalon) => self
                .votes
                .iter()
                .filter(|(_, p)| p != etalon)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}
