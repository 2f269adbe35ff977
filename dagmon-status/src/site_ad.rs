//! Site policy filter
//!
//! The site ad maps each node to the list of sites the scheduler could place
//! it on. The task carries whitelist/blacklist policy sets, each with
//! resubmission-specific additions unioned in; the filter intersects the
//! candidates with the whitelist (when non-empty) and then removes the
//! blacklist, except that a site on both lists is never excluded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use dagmon_core::domain::RootTaskRecord;

use crate::event_log::NodeMap;

static JOB_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Job(\d+)").unwrap());

/// The site ad did not parse; a hard failure for site-level status queries.
#[derive(Debug, Error)]
#[error("malformed site ad: {0}")]
pub struct SiteAdError(#[from] serde_json::Error);

/// Apply the task's site policy to one candidate list.
///
/// Output order carries no meaning but is sorted so results are
/// deterministic.
pub fn filter_sites(
    candidates: &[String],
    whitelist: &BTreeSet<String>,
    blacklist: &BTreeSet<String>,
) -> Vec<String> {
    let mut sites: BTreeSet<&String> = candidates.iter().collect();
    if !whitelist.is_empty() {
        sites.retain(|site| whitelist.contains(*site));
    }
    // Never blacklist something on the whitelist.
    sites.retain(|site| !blacklist.contains(*site) || whitelist.contains(*site));
    sites.into_iter().cloned().collect()
}

/// Parse the site ad and store each node's filtered `available_sites`.
///
/// The policy sets come from the root record, with the resubmission-specific
/// additions unioned in. Keys that are not `Job<N>` names are ignored.
pub fn apply_site_ad(
    input: &str,
    root: &RootTaskRecord,
    nodes: &mut NodeMap,
) -> Result<(), SiteAdError> {
    let site_ad: BTreeMap<String, Vec<String>> = serde_json::from_str(input)?;

    let mut whitelist: BTreeSet<String> = root.site_whitelist.iter().cloned().collect();
    whitelist.extend(root.site_resubmit_whitelist.iter().cloned());
    let mut blacklist: BTreeSet<String> = root.site_blacklist.iter().cloned().collect();
    blacklist.extend(root.site_resubmit_blacklist.iter().cloned());

    for (key, candidates) in &site_ad {
        let Some(node_id) = JOB_NAME_RE
            .captures(key)
            .and_then(|captures| captures[1].parse::<u32>().ok())
        else {
            continue;
        };
        let node = nodes.entry(node_id).or_default();
        node.available_sites = filter_sites(candidates, &whitelist, &blacklist);
    }
    Ok(())
}
