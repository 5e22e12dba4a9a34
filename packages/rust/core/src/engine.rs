//! The reconciliation engine: decides between creating a primary, linking a
//! secondary, and merging groups for each incoming contact fragment.

use std::sync::Arc;

use reconciler_shared::{
    ConsolidatedContact, ContactId, IdentifyRequest, NewContact, ReconcilerError, Result,
};
use reconciler_storage::ContactStore;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::consolidate::{
    build_view, collect_group, flatten_group, has_new_information, merge_groups,
    settle_canonical,
};
use crate::resolve::{resolve_all, resolve_chain};

/// Reconciles contact fragments against an injected [`ContactStore`].
///
/// `identify` calls are serialised within the process so that two requests
/// touching the same groups cannot interleave their merges. Concurrent
/// writers in other processes are not coordinated.
pub struct ReconciliationEngine {
    store: Arc<dyn ContactStore>,
    write_lock: Mutex<()>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Match the request against stored contacts and return the
    /// consolidated view of the customer it belongs to.
    ///
    /// 1. Find records sharing the email or phone
    /// 2. None: create a new primary
    /// 3. Resolve each match to its root; the oldest root is canonical
    /// 4. Demote the other roots under it and flatten every nested link in
    ///    the merged group
    /// 5. Add a secondary if the request carries an unseen email or phone
    #[instrument(
        skip_all,
        fields(
            has_email = request.email.is_some(),
            has_phone = request.phone_number.is_some()
        )
    )]
    pub async fn identify(&self, request: IdentifyRequest) -> Result<ConsolidatedContact> {
        let request = request.normalized()?;
        let email = request.email.as_deref();
        let phone = request.phone_number.as_deref();
        let store = self.store.as_ref();

        let _guard = self.write_lock.lock().await;

        let matches = store.find_matching(email, phone).await?;
        debug!(matched = matches.len(), "looked up matching contacts");

        if matches.is_empty() {
            let created = store
                .create(NewContact::primary(
                    request.email.clone(),
                    request.phone_number.clone(),
                ))
                .await?;
            info!(id = %created.id, "created primary contact");
            return build_view(created.id, std::slice::from_ref(&created));
        }

        let resolution = resolve_all(store, matches).await?;
        let Some((canonical, others)) = resolution.roots.split_first() else {
            return Err(ReconcilerError::store("matched contacts resolved to no root"));
        };

        let canonical = settle_canonical(store, canonical.clone()).await?;
        merge_groups(store, &canonical, others).await?;

        let members = collect_group(store, canonical.id).await?;
        let mut group = flatten_group(store, canonical.id, members).await?;
        if has_new_information(&group, email, phone) {
            let created = store
                .create(NewContact::secondary(
                    request.email.clone(),
                    request.phone_number.clone(),
                    canonical.id,
                ))
                .await?;
            info!(id = %created.id, primary = %canonical.id, "linked secondary contact");
            group.push(created);
        }

        build_view(canonical.id, &group)
    }

    /// Consolidated view of the group containing `id`, without writing.
    #[instrument(skip(self))]
    pub async fn lookup(&self, id: ContactId) -> Result<Option<ConsolidatedContact>> {
        let store = self.store.as_ref();
        let Some(start) = store.find_by_id(id).await? else {
            return Ok(None);
        };

        let chain = resolve_chain(store, start, &mut Default::default()).await?;
        let root = chain.root.id;
        let group = collect_group(store, root).await?;
        build_view(root, &group).map(Some)
    }
}
