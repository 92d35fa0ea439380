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

//! Repository URLs and their path arithmetic.
//!
//! A repository URL is `scheme://authority[/segments]` in canonical form:
//! no trailing slash, no empty segments. The segment part is repository-path
//! arithmetic, so joins and ancestor computations reuse [`RepoPath`]
//! semantics.

#![expect(missing_docs)]

use std::borrow::Borrow;
use std::fmt;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::ops::Deref;

use ref_cast::RefCastCustom;
use ref_cast::ref_cast_custom;
use thiserror::Error;

use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponent;

/// The input is not a valid repository URL.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error(r#"Invalid repository URL "{value}""#)]
pub struct InvalidRepoUrlError {
    pub value: String,
}

/// Owned repository URL.
#[derive(Clone, Eq, Hash, PartialEq, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct RepoUrlBuf {
    // Don't add more fields. Eq, Hash, and Ord must be compatible with the
    // borrowed RepoUrl type.
    value: String,
}

/// Borrowed repository URL.
#[derive(Eq, Hash, PartialEq, PartialOrd, Ord, RefCastCustom, serde::Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct RepoUrl {
    value: str,
}

impl Debug for RepoUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.value)
    }
}

impl Debug for RepoUrlBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        <RepoUrl as Debug>::fmt(self, f)
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl fmt::Display for RepoUrlBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        <RepoUrl as fmt::Display>::fmt(self, f)
    }
}

impl RepoUrlBuf {
    /// Parses and canonicalizes a URL string: the scheme and authority are
    /// required, trailing slashes are stripped, and empty segments collapse.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, InvalidRepoUrlError> {
        let value = value.as_ref();
        let invalid = || InvalidRepoUrlError {
            value: value.to_owned(),
        };
        let (scheme, rest) = value.split_once("://").ok_or_else(invalid)?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(invalid());
        }
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(invalid());
        }
        let path = RepoPathBuf::canonicalize(path).map_err(|_| invalid())?;
        let mut canonical = format!("{scheme}://{authority}");
        if !path.is_root() {
            canonical.push('/');
            canonical.push_str(path.as_str());
        }
        Ok(Self { value: canonical })
    }
}

impl RepoUrl {
    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    fn root_len(&self) -> usize {
        let scheme_end = self.value.find("://").expect("canonical URL") + 3;
        match self.value[scheme_end..].find('/') {
            Some(authority_len) => scheme_end + authority_len,
            None => self.value.len(),
        }
    }

    /// The `scheme://authority` part, with no path segments.
    pub fn root(&self) -> &Self {
        Self::new_unchecked(&self.value[..self.root_len()])
    }

    /// The path segments below the URL root, as a repository path.
    pub fn path(&self) -> &RepoPath {
        let root_len = self.root_len();
        let tail = self.value[root_len..].strip_prefix('/').unwrap_or("");
        RepoPath::from_internal_string(tail).expect("canonical URL path")
    }

    #[ref_cast_custom]
    const fn new_unchecked(value: &str) -> &Self;

    /// Returns a new URL with `path` appended as trailing segments.
    pub fn join(&self, path: &RepoPath) -> RepoUrlBuf {
        if path.is_root() {
            return self.to_owned();
        }
        RepoUrlBuf {
            value: [&self.value, "/", path.as_str()].concat(),
        }
    }

    /// Returns a new URL with one component appended.
    pub fn join_component(&self, component: &RepoPathComponent) -> RepoUrlBuf {
        RepoUrlBuf {
            value: [&self.value, "/", component.as_str()].concat(),
        }
    }

    /// Returns the URL without its final segment, or `None` at the root.
    pub fn parent(&self) -> Option<&Self> {
        let (parent, _) = self.split()?;
        Some(parent)
    }

    /// Splits off the final segment, or `None` at the root.
    pub fn split(&self) -> Option<(&Self, &RepoPathComponent)> {
        let (parent_path, basename) = self.path().split()?;
        let parent_len = if parent_path.is_root() {
            self.root_len()
        } else {
            self.root_len() + 1 + parent_path.as_str().len()
        };
        Some((Self::new_unchecked(&self.value[..parent_len]), basename))
    }

    /// Returns true if `self` and `other` live in the same repository root.
    pub fn same_root(&self, other: &Self) -> bool {
        self.root() == other.root()
    }

    /// The repository path from `self` down to `descendant`, or `None` when
    /// `descendant` is not under `self`.
    pub fn relpath_to<'a>(&self, descendant: &'a Self) -> Option<&'a RepoPath> {
        if !self.same_root(descendant) {
            return None;
        }
        descendant.path().strip_prefix(self.path())
    }

    /// Returns true if `other` equals `self` or lives below it.
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.relpath_to(other).is_some()
    }

    /// The deepest URL that is an ancestor of (or equal to) both inputs, or
    /// `None` when the roots differ.
    pub fn common_ancestor(&self, other: &Self) -> Option<RepoUrlBuf> {
        if !self.same_root(other) {
            return None;
        }
        let path = self.path().common_ancestor(other.path());
        Some(self.root().join(&path))
    }
}

impl AsRef<Self> for RepoUrl {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl AsRef<RepoUrl> for RepoUrlBuf {
    fn as_ref(&self) -> &RepoUrl {
        self
    }
}

impl Borrow<RepoUrl> for RepoUrlBuf {
    fn borrow(&self) -> &RepoUrl {
        self
    }
}

impl Deref for RepoUrlBuf {
    type Target = RepoUrl;

    fn deref(&self) -> &Self::Target {
        RepoUrl::new_unchecked(&self.value)
    }
}

impl ToOwned for RepoUrl {
    type Owned = RepoUrlBuf;

    fn to_owned(&self) -> Self::Owned {
        let value = self.value.to_owned();
        RepoUrlBuf { value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(value: &str) -> RepoUrlBuf {
        RepoUrlBuf::parse(value).unwrap()
    }

    fn repo_path(value: &str) -> &RepoPath {
        RepoPath::from_internal_string(value).unwrap()
    }

    #[test]
    fn test_parse_canonicalizes() {
        assert_eq!(url("https://host/repo/").as_str(), "https://host/repo");
        assert_eq!(url("https://host//a//b").as_str(), "https://host/a/b");
        assert_eq!(url("svn+ssh://host").as_str(), "svn+ssh://host");
        assert!(RepoUrlBuf::parse("host/repo").is_err());
        assert!(RepoUrlBuf::parse("://host").is_err());
        assert!(RepoUrlBuf::parse("https://").is_err());
    }

    #[test]
    fn test_root_and_path() {
        let u = url("https://host/repo/trunk");
        assert_eq!(u.root().as_str(), "https://host");
        assert_eq!(u.path(), repo_path("repo/trunk"));
        let bare = url("https://host");
        assert_eq!(bare.root().as_str(), "https://host");
        assert!(bare.path().is_root());
    }

    #[test]
    fn test_join_and_split() {
        let base = url("https://host/repo");
        assert_eq!(
            base.join(repo_path("trunk/a.txt")).as_str(),
            "https://host/repo/trunk/a.txt"
        );
        assert_eq!(base.join(RepoPath::root()), base);
        let trunk_url = url("https://host/repo/trunk");
        let (parent, name) = trunk_url.split().unwrap();
        assert_eq!(parent.as_str(), "https://host/repo");
        assert_eq!(name.as_str(), "trunk");
        assert_eq!(url("https://host").split(), None);
        assert_eq!(
            url("https://host/repo").parent().unwrap().as_str(),
            "https://host"
        );
    }

    #[test]
    fn test_ancestry() {
        let trunk = url("https://host/repo/trunk");
        let file = url("https://host/repo/trunk/dir/a.txt");
        let branch = url("https://host/repo/branches/b1");
        assert!(trunk.is_ancestor_of(&file));
        assert!(!trunk.is_ancestor_of(&branch));
        assert_eq!(trunk.relpath_to(&file), Some(repo_path("dir/a.txt")));
        assert_eq!(
            trunk.common_ancestor(&branch).unwrap().as_str(),
            "https://host/repo"
        );
        assert_eq!(
            url("https://a/x").common_ancestor(&url("https://b/x")),
            None
        );
    }
}
