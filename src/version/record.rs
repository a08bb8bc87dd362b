//! Per-version change-set record and the merge operator.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

/// File-system delta between two consecutive published versions.
///
/// Deserialized from a server manifest document. Paths are relative to the
/// update directory; sets keep them deterministically ordered for logging
/// and application.
///
/// Invariant: a path never appears in both `added_files` and
/// `removed_files` of the same record (likewise for directories). Manifest
/// documents satisfy this by construction; [`apply`](Self::apply)
/// preserves it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VersionRecord {
    /// Files this version deletes.
    #[serde(rename = "old_files")]
    pub removed_files: BTreeSet<String>,

    /// Files this version adds.
    #[serde(rename = "new_files")]
    pub added_files: BTreeSet<String>,

    /// Directories this version deletes.
    #[serde(rename = "old_folders")]
    pub removed_dirs: BTreeSet<String>,

    /// Directories this version creates.
    #[serde(rename = "new_folders")]
    pub added_dirs: BTreeSet<String>,

    /// Expected byte length for every entry in `added_files`.
    #[serde(rename = "new_files_lengthes")]
    pub added_file_sizes: BTreeMap<String, u64>,
}

impl VersionRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the record describes no changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed_files.is_empty()
            && self.added_files.is_empty()
            && self.removed_dirs.is_empty()
            && self.added_dirs.is_empty()
    }

    /// Folds a later version's record into this accumulator.
    ///
    /// Cancellation is symmetric: a removal in `next` of a path currently
    /// marked added cancels the addition (the file never needs fetching),
    /// and an addition in `next` of a path currently marked removed cancels
    /// the removal. Directories follow the same rule. Expected sizes are
    /// overwritten by `next`'s entries, so the latest published size wins.
    ///
    /// Records must be applied in publication order.
    pub fn apply(&mut self, next: Self) {
        for path in next.removed_files {
            if self.added_files.remove(&path) {
                self.added_file_sizes.remove(&path);
            } else {
                self.removed_files.insert(path);
            }
        }

        for path in next.added_files {
            if !self.removed_files.remove(&path) {
                self.added_files.insert(path);
            }
        }

        for path in next.removed_dirs {
            if !self.added_dirs.remove(&path) {
                self.removed_dirs.insert(path);
            }
        }

        for path in next.added_dirs {
            if !self.removed_dirs.remove(&path) {
                self.added_dirs.insert(path);
            }
        }

        self.added_file_sizes.extend(next.added_file_sizes);
    }

    /// Folds a publication-ordered sequence of records into one cumulative
    /// record.
    #[must_use]
    pub fn merged(records: impl IntoIterator<Item = Self>) -> Self {
        let mut cumulative = Self::new();
        for record in records {
            cumulative.apply(record);
        }
        cumulative
    }
}
