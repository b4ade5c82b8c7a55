//! User directory
//!
//! Registered aliases and their blacklists, backed by the shared user
//! collection. The collection holds one list document (the only document
//! with a `list_name` field) plus one document per user.
//!
//! Every mutation queues the user in `pending` and then persists. A failed
//! persist leaves the queue intact, so the next successful call writes the
//! backlog too.

use super::user::{UserListDocument, UserRecord};
use crate::config::ChatConfig;
use crate::core_room::errors::{ChatError, ChatResult};
use crate::core_room::types::Timestamp;
use crate::core_store::{
    to_document, DocumentId, DocumentStore, Filter, StoreResult, USERS_COLLECTION,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct UserDirectory {
    store: Arc<dyn DocumentStore>,
    list_name: String,
    min_alias_length: usize,
    create_time: Timestamp,
    modify_time: Timestamp,
    list_doc_id: Option<DocumentId>,
    list_dirty: bool,
    users: Vec<UserRecord>,
    by_alias: HashMap<String, usize>,
    pending: BTreeSet<usize>,
}

impl UserDirectory {
    /// An empty directory; nothing is read from the store
    pub fn new(store: Arc<dyn DocumentStore>, list_name: &str, min_alias_length: usize) -> Self {
        let now = Timestamp::now();
        Self {
            store,
            list_name: list_name.to_string(),
            min_alias_length,
            create_time: now,
            modify_time: now,
            list_doc_id: None,
            list_dirty: true,
            users: Vec::new(),
            by_alias: HashMap::new(),
            pending: BTreeSet::new(),
        }
    }

    /// Build from config and load whatever the store already holds
    pub fn open(store: Arc<dyn DocumentStore>, config: &ChatConfig) -> ChatResult<Self> {
        let mut directory = Self::new(store, &config.user_list_name, config.min_alias_length);
        directory.restore()?;
        Ok(directory)
    }

    pub fn name(&self) -> &str {
        &self.list_name
    }

    /// Number of users held, removed ones included
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Load the list document and every user document. Returns false when
    /// the store has no list document yet.
    pub fn restore(&mut self) -> ChatResult<bool> {
        info!(list = %self.list_name, "restoring user directory");
        let Some(list_doc) = self
            .store
            .find_one(USERS_COLLECTION, &Filter::eq("list_name", self.list_name.as_str()))?
        else {
            warn!(list = %self.list_name, "user list not found");
            return Ok(false);
        };

        let list: UserListDocument = list_doc.decode()?;
        self.create_time = list.create_time;
        self.modify_time = list.modify_time;
        self.list_doc_id = Some(list_doc.id);
        self.list_dirty = false;

        self.users.clear();
        self.by_alias.clear();
        self.pending.clear();
        for stored in self
            .store
            .find(USERS_COLLECTION, &Filter::exists("list_name", false), None)?
        {
            let user = UserRecord::from_stored(&stored)?;
            if self.by_alias.contains_key(&user.alias) {
                warn!(alias = %user.alias, "skipping duplicate user document");
                continue;
            }
            self.by_alias.insert(user.alias.clone(), self.users.len());
            self.users.push(user);
        }
        info!(users = self.users.len(), "user directory restored");
        Ok(true)
    }

    /// Register `alias`, or return the existing record if already registered
    pub fn register(&mut self, alias: &str) -> ChatResult<UserRecord> {
        if alias.chars().count() < self.min_alias_length {
            return Err(ChatError::InvalidArgument(format!(
                "alias '{}' is shorter than {} characters",
                alias, self.min_alias_length
            )));
        }

        let index = match self.by_alias.get(alias).copied() {
            Some(index) if !self.users[index].removed => {
                debug!(alias, "alias already registered");
                return Ok(self.users[index].clone());
            }
            Some(index) => {
                // Re-registering a removed alias revives its record
                let user = &mut self.users[index];
                user.removed = false;
                user.touch();
                index
            }
            None => {
                let index = self.users.len();
                self.users.push(UserRecord::new(alias));
                self.by_alias.insert(alias.to_string(), index);
                index
            }
        };

        self.pending.insert(index);
        self.modify_time = Timestamp::now();
        self.list_dirty = true;
        info!(alias, "registered user");
        self.persist()?;
        Ok(self.users[index].clone())
    }

    /// Soft-remove `alias`. Returns false if it was not registered.
    pub fn deregister(&mut self, alias: &str) -> ChatResult<bool> {
        let Some(index) = self.active_index(alias) else {
            warn!(alias, "cannot deregister unknown user");
            return Ok(false);
        };
        let user = &mut self.users[index];
        user.removed = true;
        user.touch();
        self.pending.insert(index);
        info!(alias, "deregistered user");
        self.persist()?;
        Ok(true)
    }

    /// Registered, non-removed user
    pub fn get(&self, alias: &str) -> Option<&UserRecord> {
        self.active_index(alias).map(|index| &self.users[index])
    }

    pub fn get_all_user_aliases(&self) -> Vec<String> {
        self.users
            .iter()
            .filter(|u| !u.removed)
            .map(|u| u.alias.clone())
            .collect()
    }

    /// Hide `blocked`'s messages from `owner`. False if already blacklisted.
    pub fn add_alias_to_blacklist(&mut self, owner: &str, blocked: &str) -> ChatResult<bool> {
        self.update(owner, |user| user.blacklist.insert(blocked.to_string()))
    }

    /// False if `blocked` was not on `owner`'s blacklist
    pub fn remove_alias_from_blacklist(&mut self, owner: &str, blocked: &str) -> ChatResult<bool> {
        self.update(owner, |user| user.blacklist.remove(blocked))
    }

    pub fn set_email(&mut self, alias: &str, email: &str) -> ChatResult<()> {
        self.update(alias, |user| {
            user.email = email.to_string();
            true
        })
        .map(|_| ())
    }

    pub fn set_credential_hash(&mut self, alias: &str, hash: &str) -> ChatResult<()> {
        self.update(alias, |user| {
            user.credential_hash = hash.to_string();
            true
        })
        .map(|_| ())
    }

    fn active_index(&self, alias: &str) -> Option<usize> {
        self.by_alias
            .get(alias)
            .copied()
            .filter(|&index| !self.users[index].removed)
    }

    /// Apply `change` to an active user; persist only if it reports a change
    fn update<F>(&mut self, alias: &str, change: F) -> ChatResult<bool>
    where
        F: FnOnce(&mut UserRecord) -> bool,
    {
        let index = self.active_index(alias).ok_or_else(|| {
            warn!(alias, "user not found");
            ChatError::NotFound(format!("user '{}'", alias))
        })?;
        let user = &mut self.users[index];
        if !change(user) {
            return Ok(false);
        }
        user.touch();
        self.pending.insert(index);
        self.persist()?;
        Ok(true)
    }

    /// Write the list document if needed, then every pending user.
    /// Returns how many user documents were written.
    pub fn persist(&mut self) -> ChatResult<usize> {
        if let Err(e) = self.persist_list() {
            error!(list = %self.list_name, error = %e, "failed to persist user list");
            return Err(e.into());
        }

        let mut written = 0;
        while let Some(index) = self.pending.iter().next().copied() {
            if let Err(e) = self.persist_user(index) {
                error!(
                    alias = %self.users[index].alias,
                    error = %e,
                    remaining = self.pending.len(),
                    "failed to persist user"
                );
                return Err(e.into());
            }
            self.pending.remove(&index);
            written += 1;
        }
        if written > 0 {
            debug!(written, "persisted users");
        }
        Ok(written)
    }

    fn persist_list(&mut self) -> StoreResult<()> {
        if !self.list_dirty && self.list_doc_id.is_some() {
            return Ok(());
        }
        let body = to_document(&UserListDocument {
            list_name: self.list_name.clone(),
            create_time: self.create_time,
            modify_time: self.modify_time,
        })?;
        match self.list_doc_id {
            Some(id) => {
                let outcome = self
                    .store
                    .replace_one(USERS_COLLECTION, &Filter::by_id(id), body, true)?;
                self.list_doc_id = Some(outcome.upserted.unwrap_or(id));
            }
            None => {
                self.list_doc_id = Some(self.store.insert_one(USERS_COLLECTION, body)?);
            }
        }
        self.list_dirty = false;
        Ok(())
    }

    fn persist_user(&mut self, index: usize) -> StoreResult<()> {
        let body = self.users[index].to_document()?;
        match self.users[index].doc_id {
            Some(id) => {
                let outcome = self
                    .store
                    .replace_one(USERS_COLLECTION, &Filter::by_id(id), body, true)?;
                self.users[index].doc_id = Some(outcome.upserted.unwrap_or(id));
            }
            None => {
                let id = self.store.insert_one(USERS_COLLECTION, body)?;
                self.users[index].doc_id = Some(id);
            }
        }
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
