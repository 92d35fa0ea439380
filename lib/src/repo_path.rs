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

//! Canonical repository-relative paths.
//!
//! A repository path is a `/`-separated sequence of non-empty components
//! with no leading or trailing separator; the empty string is the repository
//! root. [`RepoPath`] is the borrowed form, [`RepoPathBuf`] the owned form.

#![expect(missing_docs)]

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::iter::FusedIterator;
use std::ops::Deref;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use ref_cast::RefCastCustom;
use ref_cast::ref_cast_custom;
use thiserror::Error;

/// The input is not a valid repository path or path component.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error(r#"Invalid repository path "{value}""#)]
pub struct InvalidRepoPathError {
    pub value: String,
}

fn is_valid_component_str(value: &str) -> bool {
    !value.is_empty() && value != "." && value != ".." && !value.contains('/')
}

fn is_valid_repo_path_str(value: &str) -> bool {
    value.is_empty() || value.split('/').all(is_valid_component_str)
}

/// Owned [`RepoPath`] component.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RepoPathComponentBuf {
    // Don't add more fields. Eq, Hash, and Ord must be compatible with the
    // borrowed RepoPathComponent type.
    value: String,
}

impl RepoPathComponentBuf {
    /// Wraps `value` as an owned component. Returns an error if the input is
    /// empty, `.`/`..`, or contains a path separator.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidRepoPathError> {
        let value: String = value.into();
        if is_valid_component_str(&value) {
            Ok(Self { value })
        } else {
            Err(InvalidRepoPathError { value })
        }
    }
}

/// Borrowed [`RepoPath`] component.
#[derive(Eq, Hash, Ord, PartialEq, PartialOrd, RefCastCustom)]
#[repr(transparent)]
pub struct RepoPathComponent {
    value: str,
}

impl RepoPathComponent {
    /// Wraps `value` as a component. Returns an error if the input is empty,
    /// `.`/`..`, or contains a path separator.
    pub fn new(value: &str) -> Result<&Self, InvalidRepoPathError> {
        if is_valid_component_str(value) {
            Ok(Self::new_unchecked(value))
        } else {
            Err(InvalidRepoPathError {
                value: value.to_owned(),
            })
        }
    }

    #[ref_cast_custom]
    const fn new_unchecked(value: &str) -> &Self;

    /// Returns the underlying string representation.
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl Debug for RepoPathComponent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.value)
    }
}

impl Debug for RepoPathComponentBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        <RepoPathComponent as Debug>::fmt(self, f)
    }
}

impl AsRef<Self> for RepoPathComponent {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl AsRef<RepoPathComponent> for RepoPathComponentBuf {
    fn as_ref(&self) -> &RepoPathComponent {
        self
    }
}

impl Borrow<RepoPathComponent> for RepoPathComponentBuf {
    fn borrow(&self) -> &RepoPathComponent {
        self
    }
}

impl Deref for RepoPathComponentBuf {
    type Target = RepoPathComponent;

    fn deref(&self) -> &Self::Target {
        RepoPathComponent::new_unchecked(&self.value)
    }
}

impl ToOwned for RepoPathComponent {
    type Owned = RepoPathComponentBuf;

    fn to_owned(&self) -> Self::Owned {
        let value = self.value.to_owned();
        RepoPathComponentBuf { value }
    }
}

/// Iterator over [`RepoPath`] components.
#[derive(Clone, Debug)]
pub struct RepoPathComponentsIter<'a> {
    value: &'a str,
}

impl<'a> Iterator for RepoPathComponentsIter<'a> {
    type Item = &'a RepoPathComponent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.value.is_empty() {
            return None;
        }
        let (name, remainder) = self
            .value
            .split_once('/')
            .unwrap_or_else(|| (self.value, &self.value[self.value.len()..]));
        self.value = remainder;
        Some(RepoPathComponent::new_unchecked(name))
    }
}

impl DoubleEndedIterator for RepoPathComponentsIter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.value.is_empty() {
            return None;
        }
        let (remainder, name) = self
            .value
            .rsplit_once('/')
            .unwrap_or_else(|| (&self.value[..0], self.value));
        self.value = remainder;
        Some(RepoPathComponent::new_unchecked(name))
    }
}

impl FusedIterator for RepoPathComponentsIter<'_> {}

/// Owned repository path.
#[derive(Clone, Eq, Hash, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct RepoPathBuf {
    // Don't add more fields. Eq, Hash, and Ord must be compatible with the
    // borrowed RepoPath type.
    value: String,
}

/// Borrowed repository path.
#[derive(Eq, Hash, PartialEq, RefCastCustom, serde::Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct RepoPath {
    value: str,
}

impl Debug for RepoPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.value)
    }
}

impl Debug for RepoPathBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        <RepoPath as Debug>::fmt(self, f)
    }
}

impl RepoPathBuf {
    /// Creates an owned repository path pointing to the root.
    pub const fn root() -> Self {
        Self {
            value: String::new(),
        }
    }

    /// Creates a `RepoPathBuf` from its canonical string representation.
    pub fn from_internal_string(value: impl Into<String>) -> Result<Self, InvalidRepoPathError> {
        let value: String = value.into();
        if is_valid_repo_path_str(&value) {
            Ok(Self { value })
        } else {
            Err(InvalidRepoPathError { value })
        }
    }

    /// Canonicalizes a loosely formatted repository path: leading and
    /// trailing separators are stripped and runs of separators collapse.
    /// History receivers use this for changed paths reported with a leading
    /// slash.
    pub fn canonicalize(value: &str) -> Result<Self, InvalidRepoPathError> {
        let mut canonical = String::with_capacity(value.len());
        for name in value.split('/').filter(|name| !name.is_empty()) {
            if !is_valid_component_str(name) {
                return Err(InvalidRepoPathError {
                    value: value.to_owned(),
                });
            }
            if !canonical.is_empty() {
                canonical.push('/');
            }
            canonical.push_str(name);
        }
        Ok(Self { value: canonical })
    }

    /// Converts a repository-relative `Path` into a `RepoPathBuf`.
    pub fn from_relative_path(
        relative_path: impl AsRef<Path>,
    ) -> Result<Self, InvalidRepoPathError> {
        let relative_path = relative_path.as_ref();
        if relative_path == Path::new(".") {
            return Ok(Self::root());
        }
        let mut value = String::with_capacity(relative_path.as_os_str().len());
        for component in relative_path.components() {
            let Component::Normal(name) = component else {
                return Err(InvalidRepoPathError {
                    value: relative_path.to_string_lossy().into_owned(),
                });
            };
            let Some(name) = name.to_str() else {
                return Err(InvalidRepoPathError {
                    value: relative_path.to_string_lossy().into_owned(),
                });
            };
            if !value.is_empty() {
                value.push('/');
            }
            value.push_str(name);
        }
        Ok(Self { value })
    }

    /// Appends a component in place.
    pub fn push(&mut self, component: &RepoPathComponent) {
        if !self.value.is_empty() {
            self.value.push('/');
        }
        self.value.push_str(component.as_str());
    }

    /// Consumes this and returns the underlying string representation.
    pub fn into_internal_string(self) -> String {
        self.value
    }
}

impl RepoPath {
    /// Returns the repository path pointing to the root.
    pub const fn root() -> &'static Self {
        Self::from_internal_string_unchecked("")
    }

    /// Wraps a canonical string representation as a `RepoPath`. Returns an
    /// error if the input contains an empty, `.`, or `..` component.
    pub fn from_internal_string(value: &str) -> Result<&Self, InvalidRepoPathError> {
        if is_valid_repo_path_str(value) {
            Ok(Self::from_internal_string_unchecked(value))
        } else {
            Err(InvalidRepoPathError {
                value: value.to_owned(),
            })
        }
    }

    #[ref_cast_custom]
    const fn from_internal_string_unchecked(value: &str) -> &Self;

    /// The canonical string form: components joined by `/`, empty for the
    /// root.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_root(&self) -> bool {
        self.value.is_empty()
    }

    /// Iterates over the path components, front to back.
    pub fn components(&self) -> RepoPathComponentsIter<'_> {
        RepoPathComponentsIter { value: &self.value }
    }

    /// Returns true if `base` is this path or one of its ancestors.
    pub fn starts_with(&self, base: &Self) -> bool {
        self.strip_prefix(base).is_some()
    }

    /// Returns the remaining path with the `base` path removed.
    pub fn strip_prefix(&self, base: &Self) -> Option<&Self> {
        if base.value.is_empty() {
            Some(self)
        } else {
            let tail = self.value.strip_prefix(&base.value)?;
            if tail.is_empty() {
                Some(Self::from_internal_string_unchecked(tail))
            } else {
                tail.strip_prefix('/')
                    .map(Self::from_internal_string_unchecked)
            }
        }
    }

    /// Returns the parent path without the base name component, or `None`
    /// for the root.
    pub fn parent(&self) -> Option<&Self> {
        self.split().map(|(parent, _)| parent)
    }

    /// Splits this path into the parent and the base name component, or
    /// `None` for the root.
    pub fn split(&self) -> Option<(&Self, &RepoPathComponent)> {
        let mut components = self.components();
        let basename = components.next_back()?;
        Some((
            Self::from_internal_string_unchecked(components.value),
            basename,
        ))
    }

    /// Returns a new path with `entry` appended.
    pub fn join(&self, entry: &RepoPathComponent) -> RepoPathBuf {
        let value = if self.value.is_empty() {
            entry.as_str().to_owned()
        } else {
            [&self.value, "/", entry.as_str()].concat()
        };
        RepoPathBuf { value }
    }

    /// Returns the longest path that is an ancestor of (or equal to) both
    /// `self` and `other`.
    pub fn common_ancestor(&self, other: &Self) -> RepoPathBuf {
        let mut result = RepoPathBuf::root();
        let mut other_components = other.components();
        for component in self.components() {
            if other_components.next() != Some(component) {
                break;
            }
            result.push(component);
        }
        result
    }

    /// Converts this repository path to a filesystem path under `base`.
    pub fn to_fs_path(&self, base: &Path) -> PathBuf {
        let mut result = PathBuf::with_capacity(base.as_os_str().len() + self.value.len() + 1);
        result.push(base);
        result.extend(self.components().map(RepoPathComponent::as_str));
        if result.as_os_str().is_empty() {
            result.push(".");
        }
        result
    }
}

impl AsRef<Self> for RepoPath {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl AsRef<RepoPath> for RepoPathBuf {
    fn as_ref(&self) -> &RepoPath {
        self
    }
}

impl Borrow<RepoPath> for RepoPathBuf {
    fn borrow(&self) -> &RepoPath {
        self
    }
}

impl Deref for RepoPathBuf {
    type Target = RepoPath;

    fn deref(&self) -> &Self::Target {
        RepoPath::from_internal_string_unchecked(&self.value)
    }
}

impl ToOwned for RepoPath {
    type Owned = RepoPathBuf;

    fn to_owned(&self) -> Self::Owned {
        let value = self.value.to_owned();
        RepoPathBuf { value }
    }
}

impl Ord for RepoPath {
    fn cmp(&self, other: &Self) -> Ordering {
        // Order by component so that a parent sorts before its children and
        // siblings sort by name ("a/b" < "ab" even though '/' > 'b').
        self.components().cmp(other.components())
    }
}

impl PartialOrd for RepoPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RepoPathBuf {
    fn cmp(&self, other: &Self) -> Ordering {
        <RepoPath as Ord>::cmp(self, other)
    }
}

impl PartialOrd for RepoPathBuf {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_path(value: &str) -> &RepoPath {
        RepoPath::from_internal_string(value).unwrap()
    }

    fn repo_path_component(value: &str) -> &RepoPathComponent {
        RepoPathComponent::new(value).unwrap()
    }

    #[test]
    fn test_is_root() {
        assert!(RepoPath::root().is_root());
        assert!(repo_path("").is_root());
        assert!(!repo_path("foo").is_root());
    }

    #[test]
    fn test_from_internal_string() {
        assert_eq!(
            RepoPathBuf::from_internal_string("").unwrap(),
            RepoPathBuf::root()
        );
        assert!(RepoPathBuf::from_internal_string("/").is_err());
        assert!(RepoPathBuf::from_internal_string("/x").is_err());
        assert!(RepoPathBuf::from_internal_string("x/").is_err());
        assert!(RepoPathBuf::from_internal_string("x//y").is_err());
        assert!(RepoPathBuf::from_internal_string("x/./y").is_err());
        assert!(RepoPathBuf::from_internal_string("x/../y").is_err());
        assert_eq!(repo_path("x/y").as_str(), "x/y");
    }

    #[test]
    fn test_canonicalize() {
        let canonical = |value: &str| RepoPathBuf::canonicalize(value).unwrap();
        assert_eq!(canonical("/trunk/a.txt").as_str(), "trunk/a.txt");
        assert_eq!(canonical("trunk//a.txt/").as_str(), "trunk/a.txt");
        assert_eq!(canonical("/").as_str(), "");
        assert!(RepoPathBuf::canonicalize("/a/../b").is_err());
    }

    #[test]
    fn test_order() {
        assert!(repo_path("") < repo_path("a"));
        assert!(repo_path("a") < repo_path("a/b"));
        assert!(repo_path("a/b") < repo_path("ab"));
        assert!(repo_path("a/b") < repo_path("a/c"));
    }

    #[test]
    fn test_starts_with_and_strip_prefix() {
        assert!(repo_path("x/y").starts_with(repo_path("")));
        assert!(repo_path("x/y").starts_with(repo_path("x")));
        assert!(!repo_path("xy").starts_with(repo_path("x")));
        assert_eq!(
            repo_path("x/y").strip_prefix(repo_path("x")),
            Some(repo_path("y"))
        );
        assert_eq!(repo_path("x/y").strip_prefix(repo_path("y")), None);
    }

    #[test]
    fn test_parent_split_join() {
        let path = repo_path("dir/sub/file");
        assert_eq!(path.parent(), Some(repo_path("dir/sub")));
        assert_eq!(RepoPath::root().parent(), None);
        let (parent, basename) = path.split().unwrap();
        assert_eq!(parent, repo_path("dir/sub"));
        assert_eq!(basename, repo_path_component("file"));
        assert_eq!(
            repo_path("dir").join(repo_path_component("file")).as_str(),
            "dir/file"
        );
        assert_eq!(
            RepoPath::root().join(repo_path_component("file")).as_str(),
            "file"
        );
    }

    #[test]
    fn test_components() {
        let path = repo_path("a/b/c");
        let components: Vec<_> = path.components().map(RepoPathComponent::as_str).collect();
        assert_eq!(components, vec!["a", "b", "c"]);
        let reversed: Vec<_> = path
            .components()
            .rev()
            .map(RepoPathComponent::as_str)
            .collect();
        assert_eq!(reversed, vec!["c", "b", "a"]);
        assert_eq!(RepoPath::root().components().next(), None);
    }

    #[test]
    fn test_common_ancestor() {
        assert_eq!(
            repo_path("a/b/c")
                .common_ancestor(repo_path("a/b/d"))
                .as_str(),
            "a/b"
        );
        assert_eq!(
            repo_path("a/b")
                .common_ancestor(repo_path("a/b/d"))
                .as_str(),
            "a/b"
        );
        assert_eq!(repo_path("a").common_ancestor(repo_path("b")).as_str(), "");
    }

    #[test]
    fn test_to_fs_path() {
        assert_eq!(
            repo_path("dir/file").to_fs_path(Path::new("base")),
            Path::new("base/dir/file")
        );
        assert_eq!(repo_path("").to_fs_path(Path::new("")), Path::new("."));
    }
}
