//! Wallet identity mapping (spec §9(d)): every ledger-touching operation
//! may be handed either an opaque operator-issued user id or a hex wallet
//! address. `resolve_user_id` makes sure the same canonical id reaches the
//! ledger either way, consulting `wallet_uid_map` rather than guessing —
//! the same `get_or_create_user` shape as `vault/user_accounts.rs`, just
//! against the document store instead of a dedicated table.

use crate::domain::{UserId, WalletUidMap};
use crate::error::ResolutionError;
use crate::store::TxContext;
use uuid::Uuid;

/// Resolves `raw_id` to a canonical `UserId`. Ids that don't look like a
/// wallet address pass through unchanged (they're already the canonical
/// form an upstream system minted). A wallet address is looked up in
/// `wallet_uid_map` and, the first time it's seen, lazily registered under
/// a fresh canonical id.
pub fn resolve_user_id(ctx: &TxContext, raw_id: &str) -> Result<UserId, ResolutionError> {
    if !looks_like_wallet_address(raw_id) {
        return Ok(raw_id.to_string());
    }
    if let Some(mapping) = ctx.get::<WalletUidMap>(raw_id)? {
        return Ok(mapping.user_id);
    }
    let user_id = Uuid::new_v4().to_string();
    ctx.put(
        &WalletUidMap {
            wallet_address: raw_id.to_string(),
            user_id: user_id.clone(),
        },
        None,
    )?;
    Ok(user_id)
}

fn looks_like_wallet_address(raw_id: &str) -> bool {
    raw_id.len() == 42
        && raw_id.starts_with("0x")
        && raw_id[2..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    const WALLET: &str = "0x1234567890abcdef1234567890abcdef12345678";

    #[test]
    fn opaque_ids_pass_through_unchanged() {
        let store = SqliteStore::open_in_memory().unwrap();
        let resolved = store.tx(1, |ctx| resolve_user_id(ctx, "operator-issued-id")).unwrap();
        assert_eq!(resolved, "operator-issued-id");
    }

    #[test]
    fn wallet_address_is_registered_once_and_then_stable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.tx(1, |ctx| resolve_user_id(ctx, WALLET)).unwrap();
        let second = store.tx(1, |ctx| resolve_user_id(ctx, WALLET)).unwrap();
        assert_eq!(first, second);

        let mapping: WalletUidMap = store.get(WALLET).unwrap().unwrap();
        assert_eq!(mapping.user_id, first);
    }
}
