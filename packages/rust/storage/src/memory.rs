//! In-memory contact store.
//!
//! Thread-safe implementation of [`ContactStore`] over a `BTreeMap`. Used by
//! the engine's unit tests and by servers started with `storage.in_memory`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use reconciler_shared::{
    ContactId, ContactRecord, LinkPrecedence, NewContact, ReconcilerError, Result,
};

use crate::traits::ContactStore;

#[derive(Debug, Default)]
struct MemoryState {
    contacts: BTreeMap<ContactId, ContactRecord>,
    next_id: i64,
}

impl MemoryState {
    fn live(&self) -> impl Iterator<Item = &ContactRecord> {
        self.contacts.values().filter(|c| c.deleted_at.is_none())
    }

    fn sorted(&self, pred: impl Fn(&ContactRecord) -> bool) -> Vec<ContactRecord> {
        let mut out: Vec<ContactRecord> = self.live().filter(|c| pred(c)).cloned().collect();
        out.sort_by_key(ContactRecord::age_key);
        out
    }
}

/// Process-local [`ContactStore`].
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                contacts: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Seed the store with pre-built records (explicit ids and timestamps).
    /// Ids assigned afterwards continue past the largest seeded id.
    pub fn with_records(records: impl IntoIterator<Item = ContactRecord>) -> Self {
        let contacts: BTreeMap<_, _> = records.into_iter().map(|c| (c.id, c)).collect();
        let next_id = contacts.keys().next_back().map_or(1, |id| id.0 + 1);
        Self {
            state: Mutex::new(MemoryState { contacts, next_id }),
        }
    }

    /// Every record, including soft-deleted ones, in id order.
    pub fn snapshot(&self) -> Result<Vec<ContactRecord>> {
        Ok(self.lock()?.contacts.values().cloned().collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| ReconcilerError::store("poisoned lock: memory store"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<ContactRecord>> {
        let state = self.lock()?;
        Ok(state.sorted(|c| {
            let email_hit = email.is_some() && c.email.as_deref() == email;
            let phone_hit = phone_number.is_some() && c.phone_number.as_deref() == phone_number;
            email_hit || phone_hit
        }))
    }

    async fn find_by_id(&self, id: ContactId) -> Result<Option<ContactRecord>> {
        let state = self.lock()?;
        Ok(state
            .contacts
            .get(&id)
            .filter(|c| c.deleted_at.is_none())
            .cloned())
    }

    async fn find_by_parent(&self, parent_id: ContactId) -> Result<Vec<ContactRecord>> {
        let state = self.lock()?;
        Ok(state.sorted(|c| c.linked_id == Some(parent_id)))
    }

    async fn find_group(&self, primary_id: ContactId) -> Result<Vec<ContactRecord>> {
        let state = self.lock()?;
        Ok(state.sorted(|c| c.id == primary_id || c.linked_id == Some(primary_id)))
    }

    async fn create(&self, contact: NewContact) -> Result<ContactRecord> {
        let mut state = self.lock()?;
        let id = ContactId(state.next_id);
        state.next_id += 1;

        let now = Utc::now();
        let record = ContactRecord {
            id,
            email: contact.email,
            phone_number: contact.phone_number,
            linked_id: contact.linked_id,
            link_precedence: contact.link_precedence,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.contacts.insert(id, record.clone());
        Ok(record)
    }

    async fn update_link(
        &self,
        id: ContactId,
        linked_id: Option<ContactId>,
        precedence: LinkPrecedence,
    ) -> Result<ContactRecord> {
        let mut state = self.lock()?;
        let record = state
            .contacts
            .get_mut(&id)
            .filter(|c| c.deleted_at.is_none())
            .ok_or_else(|| ReconcilerError::store(format!("contact {id} not found")))?;

        record.linked_id = linked_id;
        record.link_precedence = precedence;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn repoint_children(
        &self,
        old_parent: ContactId,
        new_parent: ContactId,
    ) -> Result<u64> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let mut moved = 0;
        for record in state.contacts.values_mut() {
            if record.deleted_at.is_none() && record.linked_id == Some(old_parent) {
                record.linked_id = Some(new_parent);
                record.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn seeded(id: i64, secs: i64, linked: Option<i64>) -> ContactRecord {
        let at = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap() + Duration::seconds(secs);
        ContactRecord {
            id: ContactId(id),
            email: Some(format!("c{id}@x.io")),
            phone_number: None,
            linked_id: linked.map(ContactId),
            link_precedence: if linked.is_some() {
                LinkPrecedence::Secondary
            } else {
                LinkPrecedence::Primary
            },
            created_at: at,
            updated_at: at,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn ids_are_assigned_sequentially() {
        let store = MemoryStore::new();
        let a = store
            .create(NewContact::primary(Some("a@x.io".into()), None))
            .await
            .unwrap();
        let b = store
            .create(NewContact::secondary(None, Some("1".into()), a.id))
            .await
            .unwrap();
        assert_eq!(a.id, ContactId(1));
        assert_eq!(b.id, ContactId(2));
        assert_eq!(b.linked_id, Some(a.id));
    }

    #[tokio::test]
    async fn seeded_ids_continue_after_max() {
        let store = MemoryStore::with_records([seeded(5, 0, None), seeded(9, 1, Some(5))]);
        let next = store.create(NewContact::primary(None, Some("1".into()))).await.unwrap();
        assert_eq!(next.id, ContactId(10));
    }

    #[tokio::test]
    async fn reads_order_by_creation_time_not_id() {
        // id 2 is older than id 1
        let mut young = seeded(1, 60, None);
        let mut old = seeded(2, 0, None);
        young.phone_number = Some("555".into());
        old.phone_number = Some("555".into());
        let store = MemoryStore::with_records([young, old]);

        let found = store.find_matching(None, Some("555")).await.unwrap();
        let ids: Vec<_> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![ContactId(2), ContactId(1)]);
    }

    #[tokio::test]
    async fn absent_inputs_do_not_match_null_columns() {
        let store = MemoryStore::with_records([seeded(1, 0, None)]);
        // record 1 has no phone; a phone-only query must not hit it
        assert!(store.find_matching(None, Some("555")).await.unwrap().is_empty());
        assert!(store.find_matching(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repoint_moves_only_direct_children() {
        let store = MemoryStore::with_records([
            seeded(1, 0, None),
            seeded(2, 1, None),
            seeded(3, 2, Some(2)),
            seeded(4, 3, Some(3)),
        ]);
        let moved = store.repoint_children(ContactId(2), ContactId(1)).await.unwrap();
        assert_eq!(moved, 1);

        let children = store.find_by_parent(ContactId(1)).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, ContactId(3));
        let untouched = store.find_by_id(ContactId(4)).await.unwrap().unwrap();
        assert_eq!(untouched.linked_id, Some(ContactId(3)));
    }

    #[tokio::test]
    async fn soft_deleted_records_are_hidden() {
        let mut gone = seeded(1, 0, None);
        gone.deleted_at = Some(gone.created_at);
        let store = MemoryStore::with_records([gone]);

        assert!(store.find_by_id(ContactId(1)).await.unwrap().is_none());
        assert!(store.update_link(ContactId(1), None, LinkPrecedence::Primary).await.is_err());
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }
}
