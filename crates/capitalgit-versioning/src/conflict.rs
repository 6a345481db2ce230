// CapitalGit - Versioned content engine
// Copyright (C) 2025 CapitalGit Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.

//! Conflict detection for 3-way merge operations
//!
//! Each path touched since the merge base is classified from its three
//! versions (base, ours, theirs). One-sided and identical changes resolve
//! directly; everything else either needs a content merge or is a conflict.

use crate::diff::FileVersion;
use crate::FileMode;
use serde::{Deserialize, Serialize};

/// Type of merge conflict detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides modified the same file differently
    ModifyModify,

    /// Both sides added the same path with different content
    AddAdd,

    /// We deleted the file, they modified it
    DeleteModify,

    /// We modified the file, they deleted it
    ModifyDelete,

    /// One side has a file where the other has a directory
    FileDirectory,
}

/// Attempted merge of a conflicted file, with inline markers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFile {
    /// Path of the file
    pub path: String,
    /// Merged text with conflict markers
    pub content: String,
}

/// A detected merge conflict
///
/// `ancestor`, `ours` and `theirs` reference the blobs at the merge base,
/// the base branch tip and the merged branch tip. A missing side means the
/// file does not exist there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Path to the conflicting file
    pub path: String,

    /// Type of conflict
    #[serde(rename = "kind")]
    pub conflict_type: ConflictType,

    /// Merge-base version
    pub ancestor: Option<FileVersion>,

    /// Base branch version
    pub ours: Option<FileVersion>,

    /// Merged branch version
    pub theirs: Option<FileVersion>,

    /// Attempted merge result
    pub merge_file: MergeFile,
}

impl Conflict {
    /// Build a conflict entry
    pub fn new(
        path: impl Into<String>,
        conflict_type: ConflictType,
        ancestor: Option<FileVersion>,
        ours: Option<FileVersion>,
        theirs: Option<FileVersion>,
        merged_content: String,
    ) -> Self {
        let path = path.into();
        Self {
            merge_file: MergeFile {
                path: path.clone(),
                content: merged_content,
            },
            path,
            conflict_type,
            ancestor,
            ours,
            theirs,
        }
    }
}

/// How a single path resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Use this version (`None` removes the path)
    Take(Option<FileVersion>),
    /// Both sides changed an existing file; merge the contents line by line
    MergeContent {
        /// Merge-base version
        base: FileVersion,
        /// Our version
        ours: FileVersion,
        /// Their version
        theirs: FileVersion,
    },
    /// Cannot be resolved automatically
    Conflict(ConflictType),
}

/// Classify a path from its three versions
///
/// ```
/// use capitalgit_versioning::conflict::{classify, Resolution};
///
/// // deleted on our side, untouched on theirs
/// assert_eq!(classify(None, None, None), Resolution::Take(None));
/// ```
pub fn classify(
    base: Option<FileVersion>,
    ours: Option<FileVersion>,
    theirs: Option<FileVersion>,
) -> Resolution {
    if ours == theirs {
        return Resolution::Take(ours);
    }
    if ours == base {
        return Resolution::Take(theirs);
    }
    if theirs == base {
        return Resolution::Take(ours);
    }

    match (base, ours, theirs) {
        (None, _, _) => Resolution::Conflict(ConflictType::AddAdd),
        (Some(_), None, _) => Resolution::Conflict(ConflictType::DeleteModify),
        (Some(_), _, None) => Resolution::Conflict(ConflictType::ModifyDelete),
        (Some(base), Some(ours), Some(theirs)) => Resolution::MergeContent { base, ours, theirs },
    }
}

/// Three-way merge of file modes; `None` when both sides changed it differently
pub fn merge_modes(base: FileMode, ours: FileMode, theirs: FileMode) -> Option<FileMode> {
    if ours == theirs || theirs == base {
        Some(ours)
    } else if ours == base {
        Some(theirs)
    } else {
        None
    }
}

/// Statistics about detected conflicts
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictStats {
    /// Total number of conflicts
    pub total: usize,
    /// ModifyModify conflicts
    pub modify_modify: usize,
    /// AddAdd conflicts
    pub add_add: usize,
    /// DeleteModify conflicts
    pub delete_modify: usize,
    /// ModifyDelete conflicts
    pub modify_delete: usize,
    /// FileDirectory conflicts
    pub file_directory: usize,
}

impl ConflictStats {
    /// Count conflicts by type
    pub fn from_conflicts(conflicts: &[Conflict]) -> Self {
        let mut stats = ConflictStats {
            total: conflicts.len(),
            ..Default::default()
        };
        for conflict in conflicts {
            match conflict.conflict_type {
                ConflictType::ModifyModify => stats.modify_modify += 1,
                ConflictType::AddAdd => stats.add_add += 1,
                ConflictType::DeleteModify => stats.delete_modify += 1,
                ConflictType::ModifyDelete => stats.modify_delete += 1,
                ConflictType::FileDirectory => stats.file_directory += 1,
            }
        }
        stats
    }
}
