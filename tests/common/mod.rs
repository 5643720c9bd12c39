//! Shared harness for integration tests: a chain context driven purely
//! through the public operation API

use croupier::snapshot::rooms_by_owner;
use croupier::{
    AccountId, Asset, ChainConfig, Context, GameEventKind, GameInitiation, GameResultData,
    LedgerTime, Operation, RoomId, TableId, VirtualOperation,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Once;

static TRACING: Once = Once::new();

pub const CHP: &str = "CHP";

pub fn chips(amount: u64) -> Asset {
    Asset::new(amount, CHP)
}

pub fn acct(name: &str) -> AccountId {
    AccountId::from(name)
}

pub struct Harness {
    pub ctx: Context,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_config(ChainConfig::default())
    }

    pub fn with_config(config: ChainConfig) -> Self {
        TRACING.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
        let mut ctx = Context::new(config);
        ctx.begin_block(LedgerTime(100)).expect("genesis block");
        Self { ctx }
    }

    pub fn advance(&mut self, to_secs: u64) {
        self.ctx.begin_block(LedgerTime(to_secs)).expect("advance block");
    }

    pub fn room(&mut self, owner: &str) -> RoomId {
        self.ctx
            .apply(Operation::CreateRoom {
                owner: acct(owner),
                server_url: format!("wss://{owner}.example"),
                protocol_version: "1.0.0".into(),
                metadata: String::new(),
            })
            .expect("create room");
        *rooms_by_owner(&self.ctx, &acct(owner), None, 100)
            .last()
            .expect("room just created")
    }

    pub fn witnesses(&mut self, owner: &str, room: RoomId, names: &[&str]) {
        let witnesses: BTreeSet<AccountId> = names.iter().map(|n| acct(n)).collect();
        self.ctx
            .apply(Operation::UpdateRoom {
                owner: acct(owner),
                room,
                server_url: None,
                protocol_version: None,
                metadata: None,
                witnesses: Some(witnesses),
            })
            .expect("update witnesses");
    }

    pub fn table(&mut self, owner: &str, room: RoomId, metadata: &str, witnesses: u32, min: u64) -> TableId {
        self.ctx
            .apply(Operation::CreateTable {
                owner: acct(owner),
                room,
                metadata: metadata.into(),
                required_witnesses: witnesses,
                min_accepted_proposal: chips(min),
            })
            .expect("create table");
        self.ctx
            .tables()
            .map(|(id, _)| id)
            .max()
            .expect("table just created")
    }

    pub fn fund(&mut self, player: &str, amount: u64) {
        self.ctx.deposit(acct(player), chips(amount)).expect("deposit");
    }

    pub fn seat(&mut self, player: &str, table: TableId, amount: u64) {
        self.fund(player, amount);
        self.ctx
            .apply(Operation::BuyIn {
                player: acct(player),
                table,
                amount: chips(amount),
            })
            .expect("buy in");
    }

    pub fn start_claim(&mut self, voter: &str, table: TableId, players: &[&str]) -> croupier::CroupierResult<()> {
        self.ctx.apply(Operation::GameStartClaim {
            table,
            voter: acct(voter),
            initiation: GameInitiation {
                players: players.iter().map(|p| acct(p)).collect(),
            },
        })
    }

    pub fn result_claim(
        &mut self,
        voter: &str,
        table: TableId,
        balances: &[(&str, u64)],
        buy_outs: &[&str],
    ) -> croupier::CroupierResult<()> {
        let balances: BTreeMap<AccountId, u64> =
            balances.iter().map(|(p, a)| (acct(p), *a)).collect();
        self.ctx.apply(Operation::GameResultClaim {
            table,
            voter: acct(voter),
            result: GameResultData {
                balances,
                buy_outs: buy_outs.iter().map(|p| acct(p)).collect(),
            },
        })
    }

    pub fn game_events(&self) -> Vec<&GameEventKind> {
        self.ctx
            .virtual_operations()
            .iter()
            .filter_map(|op| match op {
                VirtualOperation::Game { event, .. } => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn balance_of(&self, player: &str) -> u64 {
        self.ctx.balance(&acct(player)).map(|a| a.amount).unwrap_or(0)
    }
}
