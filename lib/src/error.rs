// Copyright 2024 The rsvn Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error values shared by the whole client layer.
//!
//! Every error carries a stable [`ErrorKind`], a human-readable message, and
//! an optional chained cause. Cleanup failures (e.g. releasing a write lock
//! after a failed resolution) are composed onto the primary error so callers
//! see the full sequence.

#![expect(missing_docs)]

use std::fmt;

use thiserror::Error;

/// Stable error classification. The wire names returned by
/// [`ErrorKind::as_str`] are part of the public contract.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// A revision selector was not acceptable in this context.
    ClientBadRevision,
    /// A working-copy entry does not exist.
    EntryNotFound,
    /// A working-copy entry already exists.
    EntryExists,
    /// The operation does not apply to binary files.
    ClientIsBinaryFile,
    /// Unrecognized end-of-line style.
    IoUnknownEol,
    /// A repository node does not exist at the given revision.
    FsNotFound,
    /// The target is of the wrong flavor for the operation (e.g. a URL where
    /// a working-copy path is required).
    IllegalTarget,
    /// A property value is not a valid MIME type.
    BadMimeType,
    /// The conflict resolver could not apply the requested resolution.
    WcConflictResolverFailure,
    /// The requested resolution option does not apply to the conflict.
    ClientConflictOptionNotApplicable,
    /// The server refused to create the commit activity.
    RaMkactivityFailed,
    /// A repository-access request could not be created.
    RaCreatingRequest,
    /// A repository-access request failed after it was issued.
    RaRequestFailed,
    /// The caller's cancellation predicate fired.
    Cancelled,
    /// A tree-edit event sequence violated the editor protocol.
    EditorProtocolViolation,
    /// A delta base or result checksum did not match the actual content.
    ChecksumMismatch,
    /// A failure reported by the working-copy store.
    WcStore,
}

impl ErrorKind {
    /// The stable wire name for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientBadRevision => "CLIENT_BAD_REVISION",
            Self::EntryNotFound => "ENTRY_NOT_FOUND",
            Self::EntryExists => "ENTRY_EXISTS",
            Self::ClientIsBinaryFile => "CLIENT_IS_BINARY_FILE",
            Self::IoUnknownEol => "IO_UNKNOWN_EOL",
            Self::FsNotFound => "FS_NOT_FOUND",
            Self::IllegalTarget => "ILLEGAL_TARGET",
            Self::BadMimeType => "BAD_MIME_TYPE",
            Self::WcConflictResolverFailure => "WC_CONFLICT_RESOLVER_FAILURE",
            Self::ClientConflictOptionNotApplicable => "CLIENT_CONFLICT_OPTION_NOT_APPLICABLE",
            Self::RaMkactivityFailed => "RA_MKACTIVITY_FAILED",
            Self::RaCreatingRequest => "RA_CREATING_REQUEST",
            Self::RaRequestFailed => "RA_REQUEST_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::EditorProtocolViolation => "EDITOR_PROTOCOL_VIOLATION",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::WcStore => "WC_STORE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type returned by every fallible client operation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ClientError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Box<ClientError>>,
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(kind: ErrorKind, message: impl Into<String>, cause: Self) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// The error raised when a cancellation predicate reports cancelled.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The next error in the cause chain, if any.
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    /// Appends `cleanup` to the end of this error's cause chain.
    ///
    /// The primary error stays in front so its kind is what callers match
    /// on; the cleanup failure remains visible when walking the chain.
    pub fn chain_cleanup(mut self, cleanup: Self) -> Self {
        fn append(err: &mut ClientError, cleanup: ClientError) {
            match &mut err.cause {
                Some(next) => append(next, cleanup),
                None => err.cause = Some(Box::new(cleanup)),
            }
        }
        append(&mut self, cleanup);
        self
    }

    /// Iterates over this error and every chained cause, front to back.
    pub fn chain(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |err| err.cause())
    }
}

/// Merges a primary result with a cleanup result.
///
/// If both failed, the cleanup error is chained onto the primary one. If
/// only the cleanup failed, its error becomes the primary.
pub fn compose_results(primary: ClientResult<()>, cleanup: ClientResult<()>) -> ClientResult<()> {
    match (primary, cleanup) {
        (Ok(()), cleanup) => cleanup,
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => Err(err.chain_cleanup(cleanup_err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(ErrorKind::ClientBadRevision.as_str(), "CLIENT_BAD_REVISION");
        assert_eq!(ErrorKind::Cancelled.as_str(), "CANCELLED");
        assert_eq!(
            ErrorKind::ClientConflictOptionNotApplicable.as_str(),
            "CLIENT_CONFLICT_OPTION_NOT_APPLICABLE"
        );
    }

    #[test]
    fn test_compose_keeps_primary_in_front() {
        let primary = ClientError::new(ErrorKind::WcConflictResolverFailure, "resolve failed");
        let cleanup = ClientError::new(ErrorKind::WcStore, "lock release failed");
        let err = compose_results(Err(primary), Err(cleanup)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WcConflictResolverFailure);
        let kinds: Vec<_> = err.chain().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![ErrorKind::WcConflictResolverFailure, ErrorKind::WcStore]
        );
    }

    #[test]
    fn test_compose_cleanup_only() {
        let cleanup = ClientError::new(ErrorKind::WcStore, "lock release failed");
        let err = compose_results(Ok(()), Err(cleanup)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WcStore);
    }

    #[test]
    fn test_chain_cleanup_appends_at_tail() {
        let primary = ClientError::with_cause(
            ErrorKind::RaRequestFailed,
            "request failed",
            ClientError::new(ErrorKind::RaCreatingRequest, "could not create request"),
        );
        let err = primary.chain_cleanup(ClientError::new(ErrorKind::WcStore, "cleanup"));
        let kinds: Vec<_> = err.chain().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::RaRequestFailed,
                ErrorKind::RaCreatingRequest,
                ErrorKind::WcStore
            ]
        );
    }
}
