//! Read-only view of the user directory used by rooms

use super::directory::UserDirectory;
use crate::core_room::errors::{handle_poison, ChatResult};
use std::collections::BTreeSet;
use std::sync::RwLock;

/// What a room needs to know about users. Rooms never mutate users.
pub trait UserLookup: Send + Sync {
    /// True if `alias` is registered and not removed
    fn is_registered(&self, alias: &str) -> ChatResult<bool>;

    /// `alias`'s blacklist; empty for unknown users
    fn blacklist(&self, alias: &str) -> ChatResult<BTreeSet<String>>;
}

impl UserLookup for RwLock<UserDirectory> {
    fn is_registered(&self, alias: &str) -> ChatResult<bool> {
        Ok(self.read().map_err(handle_poison)?.get(alias).is_some())
    }

    fn blacklist(&self, alias: &str) -> ChatResult<BTreeSet<String>> {
        Ok(self
            .read()
            .map_err(handle_poison)?
            .get(alias)
            .map(|user| user.blacklist.clone())
            .unwrap_or_default())
    }
}
