//! Merging and validating local and remote catalog results.
//!
//! Everything here is pure: callers own the collections and decide what to do
//! with a failed validation (the loader rolls back to its snapshot).

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::backends::CatalogMode;
use crate::models::{ItemKey, MediaItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum MergeStrategy {
    /// Keep every local item, append unknown remote items, optionally adopt
    /// remote-only fields (id, thumbnail, origin) on matches
    Additive { enhance: bool },
    /// Union with dedup; on a match either the local or the remote record wins
    Replace { prioritize_local: bool },
    /// Fill every missing field of matching local items, then append the rest
    Enhance,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Additive { enhance: true }
    }
}

impl MergeStrategy {
    /// Matched items keep their local title and path
    pub fn keeps_local_fields(&self) -> bool {
        !matches!(
            self,
            MergeStrategy::Replace {
                prioritize_local: false
            }
        )
    }

    /// Matched items become reachable through the remote source
    pub fn adopts_remote_origin(&self) -> bool {
        !matches!(self, MergeStrategy::Additive { enhance: false })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub items: Vec<MediaItem>,
    pub added: usize,
    pub enhanced: usize,
    /// Matching records that brought nothing new
    pub duplicates: usize,
    /// Incoming records without any identity
    pub rejected: usize,
}

/// Position lookup by identity key, local path and remote id
#[derive(Debug, Default)]
struct ItemIndex {
    by_key: HashMap<ItemKey, usize>,
    by_path: HashMap<String, usize>,
    by_remote_id: HashMap<String, usize>,
}

impl ItemIndex {
    fn build(items: &[MediaItem]) -> Self {
        let mut index = Self::default();
        for (pos, item) in items.iter().enumerate() {
            index.insert(item, pos);
        }
        index
    }

    fn insert(&mut self, item: &MediaItem, pos: usize) {
        if let Some(key) = item.identity_key() {
            self.by_key.entry(key).or_insert(pos);
        }
        if let Some(path) = item.local_path.as_deref().filter(|p| !p.is_empty()) {
            self.by_path.entry(path.to_string()).or_insert(pos);
        }
        if let Some(remote_id) = item.jellyfin_id.as_deref().filter(|p| !p.is_empty()) {
            self.by_remote_id.entry(remote_id.to_string()).or_insert(pos);
        }
    }

    fn find(&self, item: &MediaItem) -> Option<usize> {
        if let Some(key) = item.identity_key()
            && let Some(pos) = self.by_key.get(&key)
        {
            return Some(*pos);
        }
        if let Some(path) = item.local_path.as_deref()
            && let Some(pos) = self.by_path.get(path)
        {
            return Some(*pos);
        }
        item.jellyfin_id
            .as_deref()
            .and_then(|id| self.by_remote_id.get(id))
            .copied()
    }
}

/// Deduplicate `items` by identity, keeping the first occurrence. Items with
/// no identity at all are kept as-is.
fn dedup_local(items: &[MediaItem]) -> (Vec<MediaItem>, ItemIndex, usize) {
    let mut result = Vec::with_capacity(items.len());
    let mut index = ItemIndex::default();
    let mut duplicates = 0;

    for item in items {
        if index.find(item).is_some() {
            duplicates += 1;
            continue;
        }
        index.insert(item, result.len());
        result.push(item.clone());
    }
    (result, index, duplicates)
}

pub fn merge_media_results(
    local: &[MediaItem],
    remote: &[MediaItem],
    strategy: MergeStrategy,
) -> MergeOutcome {
    let (mut items, mut index, mut duplicates) = dedup_local(local);
    let mut added = 0;
    let mut enhanced = 0;
    let mut rejected = 0;

    for incoming in remote {
        if incoming.identity_key().is_none() {
            rejected += 1;
            continue;
        }

        match index.find(incoming) {
            Some(pos) => {
                let changed = match strategy {
                    MergeStrategy::Additive { enhance: false } => false,
                    MergeStrategy::Additive { enhance: true } => {
                        items[pos].adopt_remote_fields(incoming)
                    }
                    MergeStrategy::Enhance
                    | MergeStrategy::Replace {
                        prioritize_local: true,
                    } => items[pos].enhance_from(incoming),
                    MergeStrategy::Replace {
                        prioritize_local: false,
                    } => {
                        let mut replacement = incoming.clone();
                        replacement.enhance_from(&items[pos]);
                        replacement.enhanced = true;
                        let changed = replacement != items[pos];
                        items[pos] = replacement;
                        changed
                    }
                };
                if changed {
                    enhanced += 1;
                } else {
                    duplicates += 1;
                }
            }
            None => {
                index.insert(incoming, items.len());
                items.push(incoming.clone());
                added += 1;
            }
        }
    }

    debug!(
        "Merged {} local + {} remote ({:?}): {} total, {} added, {} enhanced, {} duplicates, {} rejected",
        local.len(),
        remote.len(),
        strategy,
        items.len(),
        added,
        enhanced,
        duplicates,
        rejected
    );

    MergeOutcome {
        items,
        added,
        enhanced,
        duplicates,
        rejected,
    }
}

/// Every item of `current` survives untouched; only items unknown to
/// `current` are taken from `incoming`.
pub fn preserve_existing_items(current: &[MediaItem], incoming: &[MediaItem]) -> MergeOutcome {
    let mut items = current.to_vec();
    let mut index = ItemIndex::build(&items);
    let mut added = 0;
    let mut duplicates = 0;
    let mut rejected = 0;

    for item in incoming {
        if item.identity_key().is_none() {
            rejected += 1;
        } else if index.find(item).is_some() {
            duplicates += 1;
        } else {
            index.insert(item, items.len());
            items.push(item.clone());
            added += 1;
        }
    }

    MergeOutcome {
        items,
        added,
        enhanced: 0,
        duplicates,
        rejected,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModeTransitionReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// A mode may stay put or widen to unified; items must fit the target mode.
pub fn validate_mode_transition(
    from: CatalogMode,
    to: CatalogMode,
    items: &[MediaItem],
) -> ModeTransitionReport {
    let mut errors = Vec::new();

    if !(from == to || to == CatalogMode::Unified) {
        errors.push(format!("mode transition {} -> {} is not allowed", from, to));
    }

    for item in items {
        let label = item
            .identity_key()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "<unidentified>".to_string());
        match to {
            CatalogMode::Local if !item.has_local() => {
                errors.push(format!("{}: not available locally in local mode", label));
            }
            CatalogMode::Remote if !item.has_remote() => {
                errors.push(format!("{}: not available remotely in remote mode", label));
            }
            _ => {}
        }
        errors.extend(item.structural_problems());
    }

    ModeTransitionReport {
        valid: errors.is_empty(),
        errors,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdditiveReport {
    pub valid: bool,
    /// Items of `existing` that the incoming set dropped
    pub removed: Vec<ItemKey>,
    pub added: usize,
    pub enhanced: usize,
    /// More than half of the existing set is gone
    pub appears_replacement: bool,
}

/// Check that `incoming` (a candidate replacement for `existing`) only adds
/// or enhances.
pub fn validate_remote_items_additive(
    existing: &[MediaItem],
    incoming: &[MediaItem],
) -> AdditiveReport {
    let index = ItemIndex::build(incoming);
    let mut removed = Vec::new();
    let mut matched = HashSet::new();
    let mut enhanced = 0;

    for item in existing {
        match index.find(item) {
            Some(pos) => {
                matched.insert(pos);
                if incoming[pos] != *item {
                    enhanced += 1;
                }
            }
            None => removed.push(item.identity_key().unwrap_or_else(|| {
                ItemKey::from_name(&format!("untitled:{}", item.title))
            })),
        }
    }

    let added = incoming.len().saturating_sub(matched.len());
    let appears_replacement = !existing.is_empty() && removed.len() * 2 > existing.len();
    if !removed.is_empty() {
        warn!(
            "Incoming set drops {} of {} existing items{}",
            removed.len(),
            existing.len(),
            if appears_replacement {
                " (looks like a replacement)"
            } else {
                ""
            }
        );
    }

    AdditiveReport {
        valid: removed.is_empty(),
        removed,
        added,
        enhanced,
        appears_replacement,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMismatch {
    pub key: ItemKey,
    pub field: &'static str,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub valid: bool,
    pub missing_local: Vec<ItemKey>,
    /// Informational: remote items may be rejected legitimately
    pub missing_remote: Vec<ItemKey>,
    pub mismatches: Vec<FieldMismatch>,
}

/// Every local item must be in `unified` with its local fields intact.
pub fn validate_media_item_consistency(
    local: &[MediaItem],
    remote: &[MediaItem],
    unified: &[MediaItem],
) -> ConsistencyReport {
    let index = ItemIndex::build(unified);
    let mut report = ConsistencyReport::default();

    for item in local {
        let Some(key) = item.identity_key() else {
            continue;
        };
        let Some(pos) = index.find(item) else {
            report.missing_local.push(key);
            continue;
        };
        let merged = &unified[pos];

        if merged.title != item.title {
            report.mismatches.push(FieldMismatch {
                key: key.clone(),
                field: "title",
                expected: item.title.clone(),
                actual: merged.title.clone(),
            });
        }
        if item.local_path.is_some() && merged.local_path != item.local_path {
            report.mismatches.push(FieldMismatch {
                key: key.clone(),
                field: "local_path",
                expected: item.local_path.clone().unwrap_or_default(),
                actual: merged.local_path.clone().unwrap_or_default(),
            });
        }
        if item.has_local() && !merged.has_local() {
            report.mismatches.push(FieldMismatch {
                key,
                field: "availability",
                expected: "local".to_string(),
                actual: format!("{:?}", merged.availability),
            });
        }
    }

    for item in remote {
        let Some(key) = item.identity_key() else {
            continue;
        };
        match index.find(item) {
            None => report.missing_remote.push(key),
            Some(pos) => {
                let merged = &unified[pos];
                if item.has_remote() && !merged.has_remote() {
                    report.mismatches.push(FieldMismatch {
                        key,
                        field: "remote_availability",
                        expected: "remote".to_string(),
                        actual: format!("{:?}", merged.availability),
                    });
                }
            }
        }
    }

    report.valid = report.missing_local.is_empty() && report.mismatches.is_empty();
    report
}

impl ConsistencyReport {
    /// Whether the findings are real damage under `strategy`. Differences the
    /// strategy produces on purpose (remote titles under a remote-first
    /// replace, no remote origin under a plain additive merge) are tolerated.
    pub fn rejects(&self, strategy: MergeStrategy) -> bool {
        if !self.missing_local.is_empty() {
            return true;
        }
        self.mismatches.iter().any(|mismatch| match mismatch.field {
            "title" | "local_path" => strategy.keeps_local_fields(),
            "remote_availability" => strategy.adopts_remote_origin(),
            _ => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Availability;

    fn locals(n: usize) -> Vec<MediaItem> {
        (0..n)
            .map(|i| {
                let mut item =
                    MediaItem::local(format!("m{i}"), format!("Local {i}"), format!("/m/{i}.mkv"));
                item.year = None;
                item
            })
            .collect()
    }

    /// `overlap` ids shared with `locals`, the rest remote-only
    fn remotes(total: usize, overlap: usize) -> Vec<MediaItem> {
        (0..total)
            .map(|i| {
                let id = if i < overlap {
                    format!("m{i}")
                } else {
                    format!("r{i}")
                };
                let mut item = MediaItem::remote(id, format!("Remote {i}"), format!("jf{i}"));
                item.year = Some(2000 + i as i32);
                item.thumbnail_url = Some(format!("http://jf/{i}.jpg"));
                item
            })
            .collect()
    }

    #[test]
    fn test_additive_merge_counts() {
        let outcome = merge_media_results(
            &locals(10),
            &remotes(15, 4),
            MergeStrategy::Additive { enhance: true },
        );

        assert_eq!(outcome.items.len(), 21);
        assert_eq!(outcome.added, 11);
        assert_eq!(outcome.enhanced, 4);

        let first = &outcome.items[0];
        assert_eq!(first.title, "Local 0");
        assert_eq!(first.availability, Availability::Both);
        assert_eq!(first.jellyfin_id.as_deref(), Some("jf0"));
        assert!(first.enhanced);
        // additive only adopts remote-only fields
        assert_eq!(first.year, None);
    }

    #[test]
    fn test_additive_without_enhancement_leaves_locals_alone() {
        let local = locals(3);
        let outcome = merge_media_results(
            &local,
            &remotes(5, 3),
            MergeStrategy::Additive { enhance: false },
        );
        assert_eq!(&outcome.items[..3], &local[..]);
        assert_eq!(outcome.duplicates, 3);
        assert_eq!(outcome.added, 2);
    }

    #[test]
    fn test_enhance_fills_missing_fields() {
        let outcome = merge_media_results(&locals(2), &remotes(2, 2), MergeStrategy::Enhance);
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.items[1].year, Some(2001));
        assert_eq!(outcome.items[1].title, "Local 1");
        assert_eq!(outcome.items[1].local_path.as_deref(), Some("/m/1.mkv"));
    }

    #[test]
    fn test_replace_remote_priority_keeps_every_key() {
        let local = locals(4);
        let outcome = merge_media_results(
            &local,
            &remotes(6, 4),
            MergeStrategy::Replace {
                prioritize_local: false,
            },
        );
        assert_eq!(outcome.items.len(), 6);
        assert_eq!(outcome.items[0].title, "Remote 0");
        assert_eq!(outcome.items[0].local_path.as_deref(), Some("/m/0.mkv"));
        assert!(validate_remote_items_additive(&local, &outcome.items).valid);
    }

    #[test]
    fn test_merge_matches_by_path_when_ids_differ() {
        let local = vec![MediaItem::local("a", "Heat", "/m/heat.mkv")];
        let mut remote = MediaItem::remote("jf-heat", "Heat", "jf-heat");
        remote.local_path = Some("/m/heat.mkv".to_string());

        let outcome = merge_media_results(&local, &[remote], MergeStrategy::default());
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].availability, Availability::Both);
    }

    #[test]
    fn test_remote_without_identity_is_rejected() {
        let outcome = merge_media_results(
            &locals(1),
            &[MediaItem::default()],
            MergeStrategy::default(),
        );
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.rejected, 1);
    }

    #[test]
    fn test_duplicate_local_keys_collapse() {
        let mut local = locals(2);
        local.push(local[0].clone());
        let outcome = merge_media_results(&local, &[], MergeStrategy::default());
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn test_preserve_existing_items_never_drops() {
        let current = locals(5);
        let mut incoming = remotes(3, 2);
        incoming[0].title = "Changed".into();

        let outcome = preserve_existing_items(&current, &incoming);
        assert_eq!(outcome.items.len(), 6);
        assert_eq!(&outcome.items[..5], &current[..]);
        assert_eq!(outcome.added, 1);
    }

    #[test]
    fn test_mode_transition_table() {
        let items = locals(2);
        assert!(validate_mode_transition(CatalogMode::Local, CatalogMode::Unified, &items).valid);
        assert!(validate_mode_transition(CatalogMode::Local, CatalogMode::Local, &items).valid);

        let report = validate_mode_transition(CatalogMode::Unified, CatalogMode::Local, &items);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);

        let report = validate_mode_transition(CatalogMode::Remote, CatalogMode::Remote, &items);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_additive_validation_detects_removal() {
        let existing = locals(10);
        let mut incoming = existing[2..].to_vec();
        incoming.extend(remotes(3, 0));

        let report = validate_remote_items_additive(&existing, &incoming);
        assert!(!report.valid);
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.added, 3);
        assert!(!report.appears_replacement);

        let report = validate_remote_items_additive(&existing, &remotes(10, 0));
        assert!(report.appears_replacement);
    }

    #[test]
    fn test_consistency_reports_missing_and_mismatch() {
        let local = locals(3);
        let remote = remotes(4, 1);
        let mut unified = merge_media_results(&local, &remote, MergeStrategy::default()).items;

        assert!(validate_media_item_consistency(&local, &remote, &unified).valid);

        unified.retain(|i| i.id != "m2");
        unified[0].title = "Renamed".into();
        let report = validate_media_item_consistency(&local, &remote, &unified);
        assert!(!report.valid);
        assert_eq!(report.missing_local, vec![ItemKey::from_id("m2")]);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].field, "title");
    }

    #[test]
    fn test_rejection_follows_merge_strategy() {
        let local = locals(3);
        let remote = remotes(5, 3);

        let remote_first = MergeStrategy::Replace {
            prioritize_local: false,
        };
        let unified = merge_media_results(&local, &remote, remote_first).items;
        let report = validate_media_item_consistency(&local, &remote, &unified);
        assert_eq!(report.mismatches.len(), 3);
        assert!(report.mismatches.iter().all(|m| m.field == "title"));
        assert!(!report.rejects(remote_first));
        assert!(report.rejects(MergeStrategy::default()));

        let plain = MergeStrategy::Additive { enhance: false };
        let unified = merge_media_results(&local, &remote, plain).items;
        let report = validate_media_item_consistency(&local, &remote, &unified);
        assert_eq!(report.mismatches.len(), 3);
        assert!(report.mismatches.iter().all(|m| m.field == "remote_availability"));
        assert!(!report.rejects(plain));
        assert!(report.rejects(MergeStrategy::Enhance));

        // a dropped local item is damage whatever the strategy
        let mut unified = merge_media_results(&local, &remote, remote_first).items;
        unified.retain(|i| i.id != "m1");
        let report = validate_media_item_consistency(&local, &remote, &unified);
        assert!(report.rejects(remote_first));
    }
}
