//! The contact store contract consumed by the reconciliation engine.

use async_trait::async_trait;
use reconciler_shared::{ContactId, ContactRecord, LinkPrecedence, NewContact, Result};

/// Durable keyed storage of contact records.
///
/// Every ordered read returns records oldest first (`created_at`, then `id`)
/// and skips soft-deleted rows. Any backend failure surfaces as
/// [`reconciler_shared::ReconcilerError::StoreUnavailable`].
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Records whose email equals `email` OR whose phone equals
    /// `phone_number`. An absent input contributes no clause.
    async fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<ContactRecord>>;

    async fn find_by_id(&self, id: ContactId) -> Result<Option<ContactRecord>>;

    /// Records whose `linked_id` equals `parent_id`.
    async fn find_by_parent(&self, parent_id: ContactId) -> Result<Vec<ContactRecord>>;

    /// The record `primary_id` itself plus every record linked to it.
    async fn find_group(&self, primary_id: ContactId) -> Result<Vec<ContactRecord>>;

    /// Insert a record, assigning its id and timestamps.
    async fn create(&self, contact: NewContact) -> Result<ContactRecord>;

    /// Rewrite one record's parent link and precedence.
    async fn update_link(
        &self,
        id: ContactId,
        linked_id: Option<ContactId>,
        precedence: LinkPrecedence,
    ) -> Result<ContactRecord>;

    /// Point every child of `old_parent` at `new_parent`. Returns the number
    /// of records updated.
    async fn repoint_children(&self, old_parent: ContactId, new_parent: ContactId)
    -> Result<u64>;
}
