//! Room registration and owner updates

use crate::errors::{CroupierResult, ValidationError};
use crate::ledger::Context;
use crate::model::{AccountId, Room, RoomId};
use std::collections::BTreeSet;
use tracing::info;

pub(crate) fn create_room(
    ctx: &mut Context,
    owner: AccountId,
    server_url: String,
    protocol_version: String,
    metadata: String,
) -> CroupierResult<RoomId> {
    let id = ctx.create_room(Room::new(owner.clone(), server_url, protocol_version, metadata));
    info!(%owner, room = %id, "room registered");
    Ok(id)
}

pub(crate) fn update_room(
    ctx: &mut Context,
    owner: AccountId,
    room: RoomId,
    server_url: Option<String>,
    protocol_version: Option<String>,
    metadata: Option<String>,
    witnesses: Option<BTreeSet<AccountId>>,
) -> CroupierResult<()> {
    let current = ctx
        .room(room)
        .ok_or(ValidationError::UnknownRoom(room))?;
    if current.owner != owner {
        return Err(ValidationError::NotAuthorized { account: owner }.into());
    }

    let target = ctx.room_mut(room)?;
    if let Some(url) = server_url {
        target.server_url = url;
    }
    if let Some(version) = protocol_version {
        target.protocol_version = version;
    }
    if let Some(meta) = metadata {
        target.metadata = meta;
    }
    if let Some(mut set) = witnesses {
        // the owner stays a witness no matter what the update says
        set.insert(owner);
        target.witnesses = set;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;

    #[test]
    fn only_the_owner_may_update() {
        let mut ctx = Context::new(ChainConfig::default());
        let id = create_room(
            &mut ctx,
            AccountId::from("host"),
            "wss://a".into(),
            "1.0.0".into(),
            String::new(),
        )
        .unwrap();
        let err = update_room(
            &mut ctx,
            AccountId::from("mallory"),
            id,
            Some("wss://evil".into()),
            None,
            None,
            None,
        );
        assert!(err.is_err());
        assert_eq!(ctx.room(id).unwrap().server_url, "wss://a");
    }

    #[test]
    fn witness_update_keeps_owner() {
        let mut ctx = Context::new(ChainConfig::default());
        let id = create_room(
            &mut ctx,
            AccountId::from("host"),
            "wss://a".into(),
            "1.0.0".into(),
            String::new(),
        )
        .unwrap();
        let witnesses: BTreeSet<_> = [AccountId::from("w1")].into_iter().collect();
        update_room(
            &mut ctx,
            AccountId::from("host"),
            id,
            None,
            None,
            None,
            Some(witnesses),
        )
        .unwrap();
        let room = ctx.room(id).unwrap();
        assert!(room.witnesses.contains(&AccountId::from("w1")));
        assert!(room.witnesses.contains(&AccountId::from("host")));
    }
}
