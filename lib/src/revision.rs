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

//! Revision and location identifiers.
//!
//! A [`Revision`] selects a revision symbolically; an operation that contacts
//! the repository must resolve it to a concrete [`Revnum`] first (see
//! [`resolve_revision`]). A [`Target`] names a node either by repository URL
//! or by working-copy path, and determines how an unspecified peg revision
//! defaults.

#![expect(missing_docs)]

use std::fmt;
use std::path::PathBuf;

use chrono::TimeZone as _;
use thiserror::Error;

use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;
use crate::ra::Session;
use crate::repo_url::RepoUrlBuf;
use crate::wc::WcStore;

/// A concrete, non-negative repository revision number.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize)]
#[serde(transparent)]
pub struct Revnum(pub u64);

impl Revnum {
    /// The revision immediately before this one, or `None` for revision 0.
    pub fn previous(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for Revnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
#[error("Out-of-range date")]
pub struct TimestampOutOfRange;

/// Milliseconds since the UNIX epoch.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MillisSinceEpoch(pub i64);

/// A point in time with its original UTC offset.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Timestamp {
    pub timestamp: MillisSinceEpoch,
    // time zone offset in minutes
    pub tz_offset: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(chrono::offset::Local::now())
    }

    pub fn from_datetime<Tz: chrono::TimeZone<Offset = chrono::offset::FixedOffset>>(
        datetime: chrono::DateTime<Tz>,
    ) -> Self {
        Self {
            timestamp: MillisSinceEpoch(datetime.timestamp_millis()),
            tz_offset: datetime.offset().local_minus_utc() / 60,
        }
    }

    pub fn to_datetime(
        &self,
    ) -> Result<chrono::DateTime<chrono::FixedOffset>, TimestampOutOfRange> {
        let utc = match chrono::Utc.timestamp_opt(
            self.timestamp.0.div_euclid(1000),
            (self.timestamp.0.rem_euclid(1000)) as u32 * 1000000,
        ) {
            chrono::LocalResult::None => {
                return Err(TimestampOutOfRange);
            }
            chrono::LocalResult::Single(x) => x,
            chrono::LocalResult::Ambiguous(y, _z) => y,
        };

        Ok(utc.with_timezone(
            &chrono::FixedOffset::east_opt(self.tz_offset * 60)
                .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).unwrap()),
        ))
    }
}

/// Symbolic revision selector supplied by the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Revision {
    /// No revision was given; defaults depend on the target flavor.
    Unspecified,
    /// A concrete revision number.
    Number(Revnum),
    /// The youngest revision not after the given time.
    Date(Timestamp),
    /// The revision in which the target was last committed.
    Committed,
    /// The revision before the target's last-committed revision.
    Previous,
    /// The pristine base revision of the working-copy target.
    Base,
    /// The working version of the target, including local modifications.
    Working,
    /// The repository's latest revision.
    Head,
}

impl Revision {
    /// Whether a repository-side operation (checkout/update/switch) accepts
    /// this selector as its operative revision.
    pub fn is_repository_operative(&self) -> bool {
        matches!(self, Self::Number(_) | Self::Head | Self::Date(_))
    }
}

/// The node a client operation acts on: a repository URL or a working-copy
/// path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Target {
    Url(RepoUrlBuf),
    Path(PathBuf),
}

impl Target {
    pub fn is_url(&self) -> bool {
        matches!(self, Self::Url(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => url.fmt(f),
            Self::Path(path) => path.display().fmt(f),
        }
    }
}

/// Applies the peg-revision default: `Head` for URLs, `Working` for
/// working-copy paths.
pub fn default_peg_revision(peg: Revision, target: &Target) -> Revision {
    match peg {
        Revision::Unspecified if target.is_url() => Revision::Head,
        Revision::Unspecified => Revision::Working,
        other => other,
    }
}

/// Rejects operative revisions that checkout/update/switch do not accept.
///
/// Must run before any session or store access so an inadmissible selector
/// causes no I/O.
pub fn check_repository_operative(revision: &Revision, target: &Target) -> ClientResult<()> {
    if revision.is_repository_operative() {
        Ok(())
    } else {
        Err(ClientError::new(
            ErrorKind::ClientBadRevision,
            format!("revision selector {revision:?} is not allowed for '{target}'"),
        ))
    }
}

/// Resolves a symbolic revision selector to a concrete revision number.
///
/// `Head` and `Date` contact the repository; `Base`, `Working`, `Committed`,
/// and `Previous` read the working-copy entry and are illegal for URL
/// targets. `Unspecified` is rejected outright; callers apply
/// [`default_peg_revision`] first.
pub fn resolve_revision(
    revision: &Revision,
    target: &Target,
    session: &mut dyn Session,
    store: &dyn WcStore,
) -> ClientResult<Revnum> {
    match revision {
        Revision::Number(n) => Ok(*n),
        Revision::Head => session.latest_revision(),
        Revision::Date(t) => session.dated_revision(*t),
        Revision::Unspecified => Err(ClientError::new(
            ErrorKind::ClientBadRevision,
            format!("no revision specified for '{target}'"),
        )),
        Revision::Base | Revision::Working | Revision::Committed | Revision::Previous => {
            let Target::Path(path) = target else {
                return Err(ClientError::new(
                    ErrorKind::IllegalTarget,
                    format!("revision selector {revision:?} requires a working-copy path, got URL '{target}'"),
                ));
            };
            let entry = store.read_entry(path)?;
            match revision {
                Revision::Base | Revision::Working => Ok(entry.revision),
                Revision::Committed => Ok(entry.committed_rev),
                Revision::Previous => entry.committed_rev.previous().ok_or_else(|| {
                    ClientError::new(
                        ErrorKind::ClientBadRevision,
                        format!("'{target}' has no revision before r{}", entry.committed_rev),
                    )
                }),
                _ => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_target(url: &str) -> Target {
        Target::Url(RepoUrlBuf::parse(url).unwrap())
    }

    #[test]
    fn test_revnum_previous() {
        assert_eq!(Revnum(11).previous(), Some(Revnum(10)));
        assert_eq!(Revnum(0).previous(), None);
    }

    #[test]
    fn test_peg_defaulting() {
        let url = url_target("https://svn.example.org/repo/trunk");
        let path = Target::Path(PathBuf::from("/wc/trunk"));
        assert_eq!(
            default_peg_revision(Revision::Unspecified, &url),
            Revision::Head
        );
        assert_eq!(
            default_peg_revision(Revision::Unspecified, &path),
            Revision::Working
        );
        // An explicit peg is never overridden.
        assert_eq!(
            default_peg_revision(Revision::Number(Revnum(7)), &url),
            Revision::Number(Revnum(7))
        );
        assert_eq!(default_peg_revision(Revision::Base, &path), Revision::Base);
    }

    #[test]
    fn test_repository_operative_gate() {
        let url = url_target("https://svn.example.org/repo");
        assert!(check_repository_operative(&Revision::Head, &url).is_ok());
        assert!(check_repository_operative(&Revision::Number(Revnum(3)), &url).is_ok());
        assert!(
            check_repository_operative(&Revision::Date(Timestamp::now()), &url).is_ok()
        );
        for bad in [
            Revision::Unspecified,
            Revision::Committed,
            Revision::Previous,
            Revision::Base,
            Revision::Working,
        ] {
            let err = check_repository_operative(&bad, &url).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ClientBadRevision);
        }
    }
}
