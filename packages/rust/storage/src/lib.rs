//! Contact store backends.
//!
//! The [`ContactStore`] trait is the only surface the reconciliation engine
//! sees. Two implementations ship here:
//! - [`Storage`]: embedded libSQL database, the production backend
//! - [`MemoryStore`]: process-local map, for tests and throwaway servers

mod memory;
mod migrations;
mod traits;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use tracing::instrument;
use reconciler_shared::{
    ContactId, ContactRecord, LinkPrecedence, NewContact, ReconcilerError, Result,
};

pub use memory::MemoryStore;
pub use traits::ContactStore;

/// Column list shared by every contact read, in [`row_to_contact`] order.
const CONTACT_COLUMNS: &str =
    "id, email, phone_number, linked_id, link_precedence, created_at, updated_at, deleted_at";

/// Storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReconcilerError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(ReconcilerError::store)?;

        let conn = db.connect().map_err(ReconcilerError::store)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ReconcilerError::store(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Run a contact query and decode every row.
    async fn query_contacts(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ContactRecord>> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(ReconcilerError::store)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(ReconcilerError::store)? {
            results.push(row_to_contact(&row)?);
        }
        Ok(results)
    }
}

#[async_trait]
impl ContactStore for Storage {
    #[instrument(skip_all, fields(has_email = email.is_some(), has_phone = phone_number.is_some()))]
    async fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<ContactRecord>> {
        if email.is_none() && phone_number.is_none() {
            return Ok(Vec::new());
        }
        // `col = NULL` is never true, so an absent input drops its clause.
        self.query_contacts(
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE (email = ?1 OR phone_number = ?2) AND deleted_at IS NULL
                 ORDER BY created_at ASC, id ASC"
            ),
            params![email, phone_number],
        )
        .await
    }

    async fn find_by_id(&self, id: ContactId) -> Result<Option<ContactRecord>> {
        let mut found = self
            .query_contacts(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts
                     WHERE id = ?1 AND deleted_at IS NULL"
                ),
                params![id.0],
            )
            .await?;
        Ok(found.pop())
    }

    async fn find_by_parent(&self, parent_id: ContactId) -> Result<Vec<ContactRecord>> {
        self.query_contacts(
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE linked_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at ASC, id ASC"
            ),
            params![parent_id.0],
        )
        .await
    }

    async fn find_group(&self, primary_id: ContactId) -> Result<Vec<ContactRecord>> {
        self.query_contacts(
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE (id = ?1 OR linked_id = ?1) AND deleted_at IS NULL
                 ORDER BY created_at ASC, id ASC"
            ),
            params![primary_id.0],
        )
        .await
    }

    async fn create(&self, contact: NewContact) -> Result<ContactRecord> {
        let now = timestamp(Utc::now());
        let mut created = self
            .query_contacts(
                &format!(
                    "INSERT INTO contacts (email, phone_number, linked_id, link_precedence, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     RETURNING {CONTACT_COLUMNS}"
                ),
                params![
                    contact.email.as_deref(),
                    contact.phone_number.as_deref(),
                    contact.linked_id.map(|id| id.0),
                    contact.link_precedence.as_str(),
                    now.as_str(),
                ],
            )
            .await?;

        let record = created
            .pop()
            .ok_or_else(|| ReconcilerError::store("insert returned no row"))?;
        tracing::debug!(id = %record.id, precedence = %record.link_precedence, "contact inserted");
        Ok(record)
    }

    #[instrument(skip(self), level = "debug")]
    async fn update_link(
        &self,
        id: ContactId,
        linked_id: Option<ContactId>,
        precedence: LinkPrecedence,
    ) -> Result<ContactRecord> {
        let now = timestamp(Utc::now());
        let mut updated = self
            .query_contacts(
                &format!(
                    "UPDATE contacts SET linked_id = ?1, link_precedence = ?2, updated_at = ?3
                     WHERE id = ?4 AND deleted_at IS NULL
                     RETURNING {CONTACT_COLUMNS}"
                ),
                params![linked_id.map(|p| p.0), precedence.as_str(), now.as_str(), id.0],
            )
            .await?;

        updated
            .pop()
            .ok_or_else(|| ReconcilerError::store(format!("contact {id} not found")))
    }

    #[instrument(skip(self), level = "debug")]
    async fn repoint_children(
        &self,
        old_parent: ContactId,
        new_parent: ContactId,
    ) -> Result<u64> {
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "UPDATE contacts SET linked_id = ?1, updated_at = ?2
                 WHERE linked_id = ?3 AND deleted_at IS NULL",
                params![new_parent.0, now.as_str(), old_parent.0],
            )
            .await
            .map_err(ReconcilerError::store)
    }
}

/// Fixed-width RFC 3339 so that text order in SQL equals time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ReconcilerError::store(format!("invalid date '{s}': {e}")))
}

/// Convert a database row (selected with [`CONTACT_COLUMNS`]) to a [`ContactRecord`].
fn row_to_contact(row: &libsql::Row) -> Result<ContactRecord> {
    let precedence: String = row.get(4).map_err(ReconcilerError::store)?;
    let created_at: String = row.get(5).map_err(ReconcilerError::store)?;
    let updated_at: String = row.get(6).map_err(ReconcilerError::store)?;

    Ok(ContactRecord {
        id: ContactId(row.get::<i64>(0).map_err(ReconcilerError::store)?),
        email: row.get::<String>(1).ok(),
        phone_number: row.get::<String>(2).ok(),
        linked_id: row.get::<i64>(3).ok().map(ContactId),
        link_precedence: precedence.parse()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        deleted_at: row
            .get::<String>(7)
            .ok()
            .map(|s| parse_timestamp(&s))
            .transpose()?,
    })
}
