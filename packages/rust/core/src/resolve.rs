//! Root resolution: following `linked_id` pointers up to a group's primary.

use std::collections::{HashMap, HashSet};

use reconciler_shared::{ContactId, ContactRecord, ReconcilerError, Result};
use reconciler_storage::ContactStore;
use tracing::{debug, warn};

/// Upper bound on hops followed from any record.
pub(crate) const MAX_LINK_DEPTH: usize = 64;

/// Path from a matched record to its root.
#[derive(Debug, Clone)]
pub(crate) struct LinkChain {
    /// Ids visited, starting record first, root last.
    pub path: Vec<ContactId>,
    pub root: ContactRecord,
}

/// Distinct roots reached from a set of matches, oldest first.
#[derive(Debug)]
pub(crate) struct Resolution {
    pub roots: Vec<ContactRecord>,
}

/// Resolve every matched record to its root.
pub(crate) async fn resolve_all(
    store: &dyn ContactStore,
    matches: Vec<ContactRecord>,
) -> Result<Resolution> {
    let mut known: HashMap<ContactId, ContactRecord> =
        matches.iter().map(|c| (c.id, c.clone())).collect();

    let matched = matches.len();
    let mut seen = HashSet::new();
    let mut roots = Vec::new();
    for record in matches {
        let chain = resolve_chain(store, record, &mut known).await?;
        if seen.insert(chain.root.id) {
            roots.push(chain.root);
        }
    }
    roots.sort_by_key(ContactRecord::age_key);

    debug!(matched, roots = roots.len(), "resolved matches to roots");
    Ok(Resolution { roots })
}

/// Follow parent links from `start` until a record without a parent is
/// reached. A missing parent, a cycle, or an over-long chain stops the walk
/// at the last resolvable record, which is then treated as the root.
pub(crate) async fn resolve_chain(
    store: &dyn ContactStore,
    start: ContactRecord,
    known: &mut HashMap<ContactId, ContactRecord>,
) -> Result<LinkChain> {
    let start_id = start.id;
    let mut visited = HashSet::from([start_id]);
    let mut path = vec![start_id];
    let mut current = start;

    for _ in 0..MAX_LINK_DEPTH {
        let Some(parent_id) = current.linked_id else {
            return Ok(LinkChain { path, root: current });
        };

        if !visited.insert(parent_id) {
            warn!(id = %current.id, parent = %parent_id, "link cycle detected, stopping at last contact");
            return Ok(LinkChain { path, root: current });
        }

        let parent = match known.get(&parent_id) {
            Some(p) => Some(p.clone()),
            None => store.find_by_id(parent_id).await?,
        };
        let Some(parent) = parent else {
            let anomaly = ReconcilerError::InconsistentLink {
                id: current.id,
                missing_parent: parent_id,
            };
            warn!(error = %anomaly, "treating last resolvable contact as root");
            return Ok(LinkChain { path, root: current });
        };

        known.insert(parent.id, parent.clone());
        path.push(parent.id);
        current = parent;
    }

    warn!(
        start = %start_id,
        depth = MAX_LINK_DEPTH,
        "link chain too deep, stopping at last contact"
    );
    Ok(LinkChain { path, root: current })
}
