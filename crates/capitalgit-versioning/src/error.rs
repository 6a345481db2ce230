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

//! Error taxonomy of the public repository surface
//!
//! Internal components return `anyhow::Result`. When one of them needs to
//! report a classified failure it returns a [`VersionError`] boxed in the
//! `anyhow::Error`; the `From<anyhow::Error>` impl below recovers it at the
//! public boundary and classifies everything else as
//! [`VersionError::StorageFailure`].

use thiserror::Error;

/// Result alias for public repository operations
pub type VersionResult<T> = Result<T, VersionError>;

/// Failures reported by repository operations
#[derive(Error, Debug)]
pub enum VersionError {
    /// A branch, object, proposal or repository does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A path segment is a file where a directory is required (or the reverse),
    /// or the path itself is malformed
    #[error("path conflict at '{path}': {reason}")]
    PathConflict {
        /// Offending path
        path: String,
        /// What went wrong
        reason: String,
    },

    /// A merge that had to be clean produced conflicts
    #[error("merging '{branch}' produced {count} conflicting path(s)")]
    MergeConflict {
        /// Branch being merged
        branch: String,
        /// Number of conflicted paths
        count: usize,
    },

    /// The branch exists in name only and has no commits yet
    #[error("branch '{0}' has no commits")]
    Unborn(String),

    /// Rejected branch or ref name
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// Rejected name
        name: String,
        /// Why
        reason: String,
    },

    /// The object is not in a state that allows the operation
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The repository handle was closed
    #[error("repository handle is closed")]
    Closed,

    /// Object store, ref store or encoding failure
    #[error(transparent)]
    StorageFailure(anyhow::Error),
}

impl VersionError {
    /// NotFound with a description of what is missing
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        VersionError::NotFound(what.into())
    }

    /// PathConflict for `path`
    pub fn path_conflict<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        VersionError::PathConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// InvalidName for `name`
    pub fn invalid_name<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        VersionError::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, VersionError::NotFound(_))
    }

    /// Check if this is a PathConflict error
    pub fn is_path_conflict(&self) -> bool {
        matches!(self, VersionError::PathConflict { .. })
    }

    /// Check if this is a MergeConflict error
    pub fn is_merge_conflict(&self) -> bool {
        matches!(self, VersionError::MergeConflict { .. })
    }
}

impl From<anyhow::Error> for VersionError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<VersionError>() {
            Ok(classified) => classified,
            Err(other) => VersionError::StorageFailure(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classified_error_survives_anyhow() {
        let err: anyhow::Error = VersionError::path_conflict("a/b", "'a' is a file").into();
        let recovered = VersionError::from(err);
        assert!(recovered.is_path_conflict());
        assert_eq!(recovered.to_string(), "path conflict at 'a/b': 'a' is a file");
    }

    #[test]
    fn test_context_does_not_hide_classification() {
        use anyhow::Context;
        let result: anyhow::Result<()> =
            Err(VersionError::not_found("branch 'x'")).context("loading tip");
        let recovered = VersionError::from(result.unwrap_err());
        assert!(recovered.is_not_found());
    }

    #[test]
    fn test_unclassified_becomes_storage_failure() {
        let recovered = VersionError::from(anyhow::anyhow!("disk full"));
        assert!(matches!(recovered, VersionError::StorageFailure(_)));
        assert_eq!(recovered.to_string(), "disk full");
    }
}
