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

//! The working-copy store interface.
//!
//! The store is the local persistent collaborator: it records pristine base
//! content, entries with their schedules, write locks, and conflict
//! descriptors. The client core consumes it through [`WcStore`] and treats
//! its failures as fatal for the operation in progress. The on-disk format
//! is the store's own business.

#![expect(missing_docs)]

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use bstr::BString;

use crate::error::ClientResult;
use crate::ra::NodeKind;
use crate::ra::Props;
use crate::ra::RepoLocation;
use crate::repo_url::RepoUrlBuf;
use crate::revision::Revnum;
use crate::revision::Timestamp;

/// The scheduled operation recorded on a working-copy entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Schedule {
    Normal,
    Add,
    Delete,
    Replace,
}

/// The operation that raised a conflict.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    Update,
    Switch,
    Merge,
    None,
}

/// The incoming change that clashed with local state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IncomingChange {
    Edit,
    Add,
    Delete,
    Replace,
}

/// The local state that clashed with the incoming change.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LocalChange {
    Edited,
    Added,
    Deleted,
    Replaced,
    Missing,
    Obstructed,
    Unversioned,
    MovedAway,
    MovedHere,
}

/// Which conflict kinds are present on an entry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConflictedState {
    pub text_conflicted: bool,
    pub conflicted_props: Vec<String>,
    pub tree_conflicted: bool,
}

impl ConflictedState {
    pub fn is_conflicted(&self) -> bool {
        self.text_conflicted || !self.conflicted_props.is_empty() || self.tree_conflicted
    }
}

/// One versioned entry of the working copy.
#[derive(Clone, Debug)]
pub struct Entry {
    pub local_abspath: PathBuf,
    pub kind: NodeKind,
    pub url: RepoUrlBuf,
    /// The pristine base revision this entry was last synchronized to.
    pub revision: Revnum,
    /// The revision in which this node was last committed.
    pub committed_rev: Revnum,
    pub copyfrom: Option<(RepoUrlBuf, Revnum)>,
    pub schedule: Schedule,
    pub text_modified: bool,
    pub props_modified: bool,
    pub conflicted: ConflictedState,
}

/// On-disk artifacts of a text conflict: the pristine base, the working
/// file, and the incoming old/new texts.
#[derive(Clone, Debug)]
pub struct TextConflictDesc {
    pub mime_type: Option<String>,
    pub base_path: PathBuf,
    pub working_path: PathBuf,
    pub incoming_old_path: PathBuf,
    pub incoming_new_path: PathBuf,
}

/// The four values of one conflicted property, plus the reject file that
/// records the incoming value(s) on disk.
#[derive(Clone, Debug)]
pub struct PropConflictDesc {
    pub base_value: Option<BString>,
    pub working_value: Option<BString>,
    pub incoming_old_value: Option<BString>,
    pub incoming_new_value: Option<BString>,
    pub reject_path: PathBuf,
}

/// A structural clash between the local and the incoming change.
#[derive(Clone, Debug)]
pub struct TreeConflictDesc {
    pub victim_kind: NodeKind,
}

/// Everything the store knows about the conflicts on one path. A path may
/// carry at most one text conflict, at most one tree conflict, and any
/// number of named property conflicts at the same time.
#[derive(Clone, Debug)]
pub struct ConflictDescriptor {
    pub operation: Operation,
    pub incoming_change: IncomingChange,
    pub local_change: LocalChange,
    /// The incoming change's old ("left") coordinate, if known.
    pub left: Option<RepoLocation>,
    /// The incoming change's new ("right") coordinate, if known.
    pub right: Option<RepoLocation>,
    pub text: Option<TextConflictDesc>,
    pub props: BTreeMap<String, PropConflictDesc>,
    pub tree: Option<TreeConflictDesc>,
}

/// The content source a text or property conflict is resolved to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConflictChoice {
    Postpone,
    /// The pristine base version.
    Base,
    /// The full incoming version.
    TheirsFull,
    /// The full working version.
    MineFull,
    /// The incoming version for conflicted regions only.
    TheirsConflict,
    /// The working version for conflicted regions only.
    MineConflict,
    /// The merged file as it currently appears in the working copy.
    Merged,
}

/// The working-copy store capability consumed by the client core.
///
/// Mutating operations require the caller to hold the store's write lock
/// for the relevant subtree. Read paths take no lock but fail cleanly
/// under concurrent mutation.
pub trait WcStore: std::any::Any {
    fn as_any(&self) -> &dyn std::any::Any;

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    /// The repository root URL and UUID this working copy belongs to.
    fn repos_info(&self, path: &Path) -> ClientResult<(RepoUrlBuf, String)>;

    fn read_entry(&self, path: &Path) -> ClientResult<Entry>;

    /// All entries at and below `root`, sorted so parents precede
    /// children.
    fn walk_entries(&self, root: &Path) -> ClientResult<Vec<Entry>>;

    /// Locks the nearest ancestor suitable for conflict resolution and
    /// returns the lock root.
    fn acquire_write_lock_for_resolve(&mut self, path: &Path) -> ClientResult<PathBuf>;

    fn release_write_lock(&mut self, lock_root: &Path) -> ClientResult<()>;

    /// Requests a timestamp sleep so that file modifications made by this
    /// operation cannot share an mtime with later ones.
    fn sleep_for_timestamps(&mut self);

    fn read_conflicts(&self, path: &Path) -> ClientResult<Option<ConflictDescriptor>>;

    /// Replaces the working text with the chosen source and clears the
    /// text-conflict marker.
    fn mark_text_resolved(&mut self, path: &Path, choice: ConflictChoice) -> ClientResult<()>;

    /// As [`WcStore::mark_text_resolved`] for one property; the empty
    /// property name means every currently conflicted property.
    fn mark_prop_resolved(
        &mut self,
        path: &Path,
        propname: &str,
        choice: ConflictChoice,
    ) -> ClientResult<()>;

    /// Removes the tree-conflict marker without touching anything else.
    fn delete_tree_conflict(&mut self, path: &Path) -> ClientResult<()>;

    /// Breaks the move whose source is `path`: the move destination
    /// becomes a plain copied add, leaving no dangling move metadata.
    fn update_break_moved_away(&mut self, path: &Path) -> ClientResult<()>;

    /// Raises tree conflicts on each child moved out of the deleted or
    /// replaced directory `path`.
    fn update_raise_moved_away(&mut self, path: &Path) -> ClientResult<()>;

    /// Replays the incoming edit onto the move destination of `path`.
    fn update_moved_away_node(&mut self, path: &Path) -> ClientResult<()>;

    /// Records a conflict descriptor on `path`.
    fn record_conflict(&mut self, path: &Path, conflict: ConflictDescriptor) -> ClientResult<()>;

    fn schedule_add(&mut self, path: &Path, kind: NodeKind) -> ClientResult<()>;

    fn schedule_delete(&mut self, path: &Path) -> ClientResult<()>;

    fn schedule_copy(
        &mut self,
        dst: &Path,
        kind: NodeKind,
        copyfrom_url: &RepoUrlBuf,
        copyfrom_rev: Revnum,
        contents: Option<BString>,
    ) -> ClientResult<()>;

    /// Discards local modifications and scheduling, restoring the pristine
    /// base.
    fn revert(&mut self, path: &Path) -> ClientResult<()>;

    /// Releases stale locks and finishes interrupted operations under
    /// `root`.
    fn cleanup(&mut self, root: &Path) -> ClientResult<()>;

    /// Rewrites the entry's URL; used by relocate and switch bookkeeping.
    fn set_entry_url(&mut self, path: &Path, url: &RepoUrlBuf) -> ClientResult<()>;

    /// Records that `path` was committed in `rev`, updating its base
    /// revision and clearing its schedule and modification state.
    fn process_committed(
        &mut self,
        path: &Path,
        rev: Revnum,
        date: Timestamp,
        author: &str,
    ) -> ClientResult<()>;

    /// Stores one cached repository property ("wc-prop") on the entry.
    fn set_wcprop(
        &mut self,
        path: &Path,
        name: &str,
        value: Option<&BString>,
    ) -> ClientResult<()>;

    fn set_prop(&mut self, path: &Path, name: &str, value: Option<&BString>) -> ClientResult<()>;

    fn get_prop(&self, path: &Path, name: &str) -> ClientResult<Option<BString>>;

    /// The pristine base value of one property, as last synchronized with
    /// the repository.
    fn get_base_prop(&self, path: &Path, name: &str) -> ClientResult<Option<BString>>;

    /// Records an incoming property value as the new pristine base (and as
    /// the working value; callers only install over properties without
    /// local modifications).
    fn install_prop(
        &mut self,
        path: &Path,
        name: &str,
        value: Option<&BString>,
    ) -> ClientResult<()>;

    fn prop_list(&self, path: &Path) -> ClientResult<Props>;

    /// The property changes scheduled on `path` relative to its base, as
    /// (name, new value) pairs with `None` meaning deletion.
    fn read_prop_changes(&self, path: &Path) -> ClientResult<Vec<(String, Option<BString>)>>;

    fn read_text_base(&self, path: &Path) -> ClientResult<BString>;

    fn read_working_text(&self, path: &Path) -> ClientResult<BString>;

    fn write_working_text(&mut self, path: &Path, contents: &BString) -> ClientResult<()>;

    /// Installs a file entry with pristine `contents` at `rev`, as an
    /// update/checkout consumer does.
    fn install_file(
        &mut self,
        path: &Path,
        contents: BString,
        url: &RepoUrlBuf,
        rev: Revnum,
    ) -> ClientResult<()>;

    /// Installs a directory entry at `rev`.
    fn install_dir(&mut self, path: &Path, url: &RepoUrlBuf, rev: Revnum) -> ClientResult<()>;

    /// Removes the entry and its working file, as an incoming delete does.
    fn remove_entry(&mut self, path: &Path) -> ClientResult<()>;

    /// Moves the entry's base revision to `rev` without content changes.
    fn tweak_entry_revision(&mut self, path: &Path, rev: Revnum) -> ClientResult<()>;
}
