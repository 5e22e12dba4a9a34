//! Merging identity groups, the new-information check, and the
//! consolidated view.

use std::collections::HashSet;

use reconciler_shared::{
    ConsolidatedContact, ContactId, ContactRecord, LinkPrecedence, ReconcilerError, Result,
};
use reconciler_storage::ContactStore;
use tracing::{info, warn};

/// Make sure the canonical root is stored as a primary. A root reached
/// through a dangling or cyclic link still carries its stale parent.
pub(crate) async fn settle_canonical(
    store: &dyn ContactStore,
    canonical: ContactRecord,
) -> Result<ContactRecord> {
    if canonical.is_primary() && canonical.linked_id.is_none() {
        return Ok(canonical);
    }
    warn!(id = %canonical.id, stale_parent = ?canonical.linked_id, "promoting unanchored root to primary");
    store
        .update_link(canonical.id, None, LinkPrecedence::Primary)
        .await
}

/// Demote every other root under `canonical`, oldest first, and move their
/// children across.
pub(crate) async fn merge_groups(
    store: &dyn ContactStore,
    canonical: &ContactRecord,
    others: &[ContactRecord],
) -> Result<()> {
    for other in others {
        store
            .update_link(other.id, Some(canonical.id), LinkPrecedence::Secondary)
            .await?;
        let moved = store.repoint_children(other.id, canonical.id).await?;
        info!(
            primary = %canonical.id,
            demoted = %other.id,
            children_moved = moved,
            "merged identity groups"
        );
    }
    Ok(())
}

/// Every live record reachable from `root` through child links, including
/// records nested under a secondary. Read-only.
pub(crate) async fn collect_group(
    store: &dyn ContactStore,
    root: ContactId,
) -> Result<Vec<ContactRecord>> {
    let mut group = store.find_group(root).await?;
    let mut seen: HashSet<ContactId> = group.iter().map(|c| c.id).collect();

    let mut cursor = 0;
    while cursor < group.len() {
        let parent = group[cursor].id;
        cursor += 1;
        if parent == root {
            continue;
        }
        for child in store.find_by_parent(parent).await? {
            if seen.insert(child.id) {
                group.push(child);
            }
        }
    }
    Ok(group)
}

/// Point every member of `group` other than `canonical` directly at it as a
/// secondary. Repairs groups left nested by an interrupted merge.
pub(crate) async fn flatten_group(
    store: &dyn ContactStore,
    canonical: ContactId,
    group: Vec<ContactRecord>,
) -> Result<Vec<ContactRecord>> {
    let mut flat = Vec::with_capacity(group.len());
    let mut relinked = 0usize;

    for member in group {
        let attached = member.linked_id == Some(canonical)
            && member.link_precedence == LinkPrecedence::Secondary;
        if member.id == canonical || attached {
            flat.push(member);
            continue;
        }
        flat.push(
            store
                .update_link(member.id, Some(canonical), LinkPrecedence::Secondary)
                .await?,
        );
        relinked += 1;
    }

    if relinked > 0 {
        warn!(primary = %canonical, relinked, "flattened nested contact links");
    }
    Ok(flat)
}

/// Whether the request carries an email or phone the group has not seen.
///
/// Membership is checked per field, so a pairing split across two existing
/// records is not new.
pub(crate) fn has_new_information(
    group: &[ContactRecord],
    email: Option<&str>,
    phone_number: Option<&str>,
) -> bool {
    let emails: HashSet<&str> = group.iter().filter_map(|c| c.email.as_deref()).collect();
    let phones: HashSet<&str> = group
        .iter()
        .filter_map(|c| c.phone_number.as_deref())
        .collect();

    email.is_some_and(|e| !emails.contains(e)) || phone_number.is_some_and(|p| !phones.contains(p))
}

/// Build the consolidated view of the group rooted at `primary_id`.
///
/// `group` must contain the primary; it may contain the secondaries in any
/// order.
pub(crate) fn build_view(
    primary_id: ContactId,
    group: &[ContactRecord],
) -> Result<ConsolidatedContact> {
    let primary = group
        .iter()
        .find(|c| c.id == primary_id)
        .ok_or_else(|| ReconcilerError::store(format!("primary contact {primary_id} not found")))?;

    let mut secondaries: Vec<&ContactRecord> =
        group.iter().filter(|c| c.id != primary_id).collect();
    secondaries.sort_by_key(|c| c.age_key());

    let ordered = || std::iter::once(primary).chain(secondaries.iter().copied());

    Ok(ConsolidatedContact {
        primary_contact_id: primary.id,
        emails: distinct(ordered().filter_map(|c| c.email.as_deref())),
        phone_numbers: distinct(ordered().filter_map(|c| c.phone_number.as_deref())),
        secondary_contact_ids: secondaries.iter().map(|c| c.id).collect(),
    })
}

/// First-seen order, duplicates dropped.
fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| seen.insert(*v))
        .map(str::to_owned)
        .collect()
}
