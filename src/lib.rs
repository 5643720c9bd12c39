//! Croupier - gameplay-coordination core of a deterministic game ledger
//!
//! Matches waiting players to tables hosted by third-party game servers
//! (rooms), drives each table through a quorum-voting protocol that
//! validates game start and outcome claims, and maintains a per-room
//! reputation score that feeds back into matchmaking priority.
//!
//! Everything executes identically on every replica: single-threaded,
//! integer arithmetic only, and no clock but the shared ledger time.
//! Block production, storage, signing and the RPC surface are external
//! collaborators consumed through the narrow `ledger::Context` facade.

mod allocation;
pub mod config;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod model;
pub mod ops;
pub mod rating;
pub mod snapshot;
mod stats;
mod voting;

// Re-export the types a caller touches on every interaction
pub use config::{ChainConfig, RATIO_SCALE};
pub use errors::{CroupierError, CroupierResult, ValidationError};
pub use events::{GameEventKind, VirtualOperation};
pub use ledger::Context;
pub use model::{
    AccountId, Asset, GameInitiation, GameResultData, LedgerTime, ReservationId, RoomId, TableId,
    TablePhase,
};
pub use ops::Operation;
pub use rating::{FeeDistributor, NoFees};
pub use snapshot::{SubscriptionSet, TableSnapshot};
