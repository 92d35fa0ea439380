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

//! An in-memory working-copy store.
//!
//! `SimpleWc` implements the full [`WcStore`] interface against in-memory
//! state: entries with base and working text/props, schedules, write
//! locks, conflict descriptors, and recorded moves. Every mutating
//! primitive appends to a journal, which lets tests assert exactly which
//! store operations an algorithm performed (or, for idempotence, that it
//! performed none).

#![expect(missing_docs)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use bstr::BString;

use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;
use crate::ra::NodeKind;
use crate::ra::Props;
use crate::repo_url::RepoUrlBuf;
use crate::revision::Revnum;
use crate::revision::Timestamp;
use crate::wc::ConflictChoice;
use crate::wc::ConflictDescriptor;
use crate::wc::ConflictedState;
use crate::wc::Entry;
use crate::wc::IncomingChange;
use crate::wc::LocalChange;
use crate::wc::Schedule;
use crate::wc::TreeConflictDesc;
use crate::wc::WcStore;

#[derive(Clone, Debug)]
struct WcNode {
    kind: NodeKind,
    url: RepoUrlBuf,
    revision: Revnum,
    committed_rev: Revnum,
    copyfrom: Option<(RepoUrlBuf, Revnum)>,
    schedule: Schedule,
    base_text: BString,
    working_text: BString,
    base_props: Props,
    working_props: Props,
    wcprops: Props,
}

impl WcNode {
    fn text_modified(&self) -> bool {
        self.kind == NodeKind::File
            && self.schedule == Schedule::Normal
            && self.base_text != self.working_text
    }

    fn props_modified(&self) -> bool {
        self.base_props != self.working_props
    }
}

/// An in-memory [`WcStore`].
#[derive(Debug)]
pub struct SimpleWc {
    root: PathBuf,
    repos_root: RepoUrlBuf,
    uuid: String,
    nodes: BTreeMap<PathBuf, WcNode>,
    conflicts: BTreeMap<PathBuf, ConflictDescriptor>,
    /// Incoming full texts remembered per conflicted path, so a
    /// theirs-flavored resolution has content to install.
    incoming_texts: BTreeMap<PathBuf, BString>,
    /// Recorded moves: source -> destination.
    moves: BTreeMap<PathBuf, PathBuf>,
    locks: BTreeSet<PathBuf>,
    journal: Vec<String>,
    timestamp_sleeps: usize,
}

impl SimpleWc {
    pub fn new(root: &Path, repos_root: &str, uuid: &str) -> Self {
        Self {
            root: root.to_owned(),
            repos_root: RepoUrlBuf::parse(repos_root).expect("valid repository root URL"),
            uuid: uuid.to_owned(),
            nodes: BTreeMap::new(),
            conflicts: BTreeMap::new(),
            incoming_texts: BTreeMap::new(),
            moves: BTreeMap::new(),
            locks: BTreeSet::new(),
            journal: Vec::new(),
            timestamp_sleeps: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every mutating store call made so far, in order.
    pub fn journal(&self) -> &[String] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn timestamp_sleeps(&self) -> usize {
        self.timestamp_sleeps
    }

    pub fn locked_paths(&self) -> Vec<PathBuf> {
        self.locks.iter().cloned().collect()
    }

    /// Test setup: installs a clean versioned directory.
    pub fn add_versioned_dir(&mut self, path: &Path, url: &str, rev: Revnum) {
        let url = RepoUrlBuf::parse(url).expect("valid URL");
        self.nodes.insert(
            path.to_owned(),
            WcNode {
                kind: NodeKind::Dir,
                url,
                revision: rev,
                committed_rev: rev,
                copyfrom: None,
                schedule: Schedule::Normal,
                base_text: BString::default(),
                working_text: BString::default(),
                base_props: Props::new(),
                working_props: Props::new(),
                wcprops: Props::new(),
            },
        );
    }

    /// Test setup: installs a clean versioned file.
    pub fn add_versioned_file(&mut self, path: &Path, url: &str, rev: Revnum, text: &[u8]) {
        let url = RepoUrlBuf::parse(url).expect("valid URL");
        self.nodes.insert(
            path.to_owned(),
            WcNode {
                kind: NodeKind::File,
                url,
                revision: rev,
                committed_rev: rev,
                copyfrom: None,
                schedule: Schedule::Normal,
                base_text: BString::from(text),
                working_text: BString::from(text),
                base_props: Props::new(),
                working_props: Props::new(),
                wcprops: Props::new(),
            },
        );
    }

    /// Test setup: gives a file local text modifications.
    pub fn set_working_text(&mut self, path: &Path, text: &[u8]) {
        let node = self.nodes.get_mut(path).expect("versioned file");
        node.working_text = BString::from(text);
    }

    /// Test setup: remembers the incoming text of a conflicted file so a
    /// theirs-flavored resolution can install it.
    pub fn set_incoming_text(&mut self, path: &Path, text: &[u8]) {
        self.incoming_texts.insert(path.to_owned(), BString::from(text));
    }

    /// Test setup: records a move from `src` to `dst`.
    pub fn record_move(&mut self, src: &Path, dst: &Path) {
        self.moves.insert(src.to_owned(), dst.to_owned());
    }

    pub fn has_move(&self, src: &Path) -> bool {
        self.moves.contains_key(src)
    }

    fn node(&self, path: &Path) -> ClientResult<&WcNode> {
        self.nodes.get(path).ok_or_else(|| {
            ClientError::new(
                ErrorKind::EntryNotFound,
                format!("'{}' is not under version control", path.display()),
            )
        })
    }

    fn node_mut(&mut self, path: &Path) -> ClientResult<&mut WcNode> {
        self.nodes.get_mut(path).ok_or_else(|| {
            ClientError::new(
                ErrorKind::EntryNotFound,
                format!("'{}' is not under version control", path.display()),
            )
        })
    }

    fn conflicted_state(&self, path: &Path) -> ConflictedState {
        match self.conflicts.get(path) {
            Some(desc) => ConflictedState {
                text_conflicted: desc.text.is_some(),
                conflicted_props: desc.props.keys().cloned().collect(),
                tree_conflicted: desc.tree.is_some(),
            },
            None => ConflictedState::default(),
        }
    }

    fn entry_of(&self, path: &Path, node: &WcNode) -> Entry {
        Entry {
            local_abspath: path.to_owned(),
            kind: node.kind,
            url: node.url.clone(),
            revision: node.revision,
            committed_rev: node.committed_rev,
            copyfrom: node.copyfrom.clone(),
            schedule: node.schedule,
            text_modified: node.text_modified(),
            props_modified: node.props_modified(),
            conflicted: self.conflicted_state(path),
        }
    }

    fn drop_conflict_if_empty(&mut self, path: &Path) {
        if let Some(desc) = self.conflicts.get(path) {
            if desc.text.is_none() && desc.props.is_empty() && desc.tree.is_none() {
                self.conflicts.remove(path);
            }
        }
    }
}

impl WcStore for SimpleWc {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn repos_info(&self, _path: &Path) -> ClientResult<(RepoUrlBuf, String)> {
        Ok((self.repos_root.clone(), self.uuid.clone()))
    }

    fn read_entry(&self, path: &Path) -> ClientResult<Entry> {
        let node = self.node(path)?;
        Ok(self.entry_of(path, node))
    }

    fn walk_entries(&self, root: &Path) -> ClientResult<Vec<Entry>> {
        let entries: Vec<Entry> = self
            .nodes
            .iter()
            .filter(|(path, _)| path.starts_with(root))
            .map(|(path, node)| self.entry_of(path, node))
            .collect();
        if entries.is_empty() {
            return Err(ClientError::new(
                ErrorKind::EntryNotFound,
                format!("'{}' is not under version control", root.display()),
            ));
        }
        Ok(entries)
    }

    fn acquire_write_lock_for_resolve(&mut self, path: &Path) -> ClientResult<PathBuf> {
        // Lock the nearest versioned ancestor directory, or the path
        // itself when it is the working-copy root.
        let lock_root = path
            .parent()
            .filter(|parent| self.nodes.contains_key(*parent))
            .unwrap_or(path)
            .to_owned();
        if !self.locks.insert(lock_root.clone()) {
            return Err(ClientError::new(
                ErrorKind::WcStore,
                format!("'{}' is already write-locked", lock_root.display()),
            ));
        }
        self.journal.push(format!("lock {}", lock_root.display()));
        Ok(lock_root)
    }

    fn release_write_lock(&mut self, lock_root: &Path) -> ClientResult<()> {
        if !self.locks.remove(lock_root) {
            return Err(ClientError::new(
                ErrorKind::WcStore,
                format!("'{}' is not write-locked", lock_root.display()),
            ));
        }
        self.journal.push(format!("unlock {}", lock_root.display()));
        Ok(())
    }

    fn sleep_for_timestamps(&mut self) {
        self.timestamp_sleeps += 1;
    }

    fn read_conflicts(&self, path: &Path) -> ClientResult<Option<ConflictDescriptor>> {
        Ok(self.conflicts.get(path).cloned())
    }

    fn mark_text_resolved(&mut self, path: &Path, choice: ConflictChoice) -> ClientResult<()> {
        self.journal
            .push(format!("text-resolved {} {choice:?}", path.display()));
        let desc = self.conflicts.get_mut(path).ok_or_else(|| {
            ClientError::new(
                ErrorKind::WcConflictResolverFailure,
                format!("no conflict recorded on '{}'", path.display()),
            )
        })?;
        desc.text = None;
        self.drop_conflict_if_empty(path);
        let incoming = self.incoming_texts.remove(path);
        let node = self.node_mut(path)?;
        match choice {
            ConflictChoice::Base => {
                node.working_text = node.base_text.clone();
            }
            ConflictChoice::TheirsFull | ConflictChoice::TheirsConflict => {
                if let Some(incoming) = incoming {
                    node.working_text = incoming;
                }
            }
            ConflictChoice::MineFull
            | ConflictChoice::MineConflict
            | ConflictChoice::Merged
            | ConflictChoice::Postpone => {}
        }
        Ok(())
    }

    fn mark_prop_resolved(
        &mut self,
        path: &Path,
        propname: &str,
        choice: ConflictChoice,
    ) -> ClientResult<()> {
        self.journal.push(format!(
            "prop-resolved {} \"{propname}\" {choice:?}",
            path.display()
        ));
        let desc = self.conflicts.get_mut(path).ok_or_else(|| {
            ClientError::new(
                ErrorKind::WcConflictResolverFailure,
                format!("no conflict recorded on '{}'", path.display()),
            )
        })?;
        let resolved: Vec<_> = if propname.is_empty() {
            std::mem::take(&mut desc.props).into_iter().collect()
        } else {
            desc.props
                .remove(propname)
                .map(|prop| (propname.to_owned(), prop))
                .into_iter()
                .collect()
        };
        self.drop_conflict_if_empty(path);
        let node = self.node_mut(path)?;
        for (name, prop) in resolved {
            let value = match choice {
                ConflictChoice::Base => prop.base_value,
                ConflictChoice::TheirsFull | ConflictChoice::TheirsConflict => {
                    prop.incoming_new_value
                }
                ConflictChoice::MineFull
                | ConflictChoice::MineConflict
                | ConflictChoice::Merged
                | ConflictChoice::Postpone => node.working_props.get(&name).cloned(),
            };
            match value {
                Some(value) => {
                    node.working_props.insert(name, value);
                }
                None => {
                    node.working_props.remove(&name);
                }
            }
        }
        Ok(())
    }

    fn delete_tree_conflict(&mut self, path: &Path) -> ClientResult<()> {
        self.journal
            .push(format!("del-tree-conflict {}", path.display()));
        if let Some(desc) = self.conflicts.get_mut(path) {
            desc.tree = None;
        }
        self.drop_conflict_if_empty(path);
        Ok(())
    }

    fn update_break_moved_away(&mut self, path: &Path) -> ClientResult<()> {
        self.journal
            .push(format!("break-moved-away {}", path.display()));
        // The move destination becomes a plain copied add.
        self.moves.remove(path);
        Ok(())
    }

    fn update_raise_moved_away(&mut self, path: &Path) -> ClientResult<()> {
        self.journal
            .push(format!("raise-moved-away {}", path.display()));
        let children: Vec<PathBuf> = self
            .moves
            .keys()
            .filter(|src| src.starts_with(path) && src.as_path() != path)
            .cloned()
            .collect();
        for child in children {
            let node = self.node(&child)?;
            let descriptor = ConflictDescriptor {
                operation: crate::wc::Operation::Update,
                incoming_change: IncomingChange::Edit,
                local_change: LocalChange::MovedAway,
                left: None,
                right: None,
                text: None,
                props: BTreeMap::new(),
                tree: Some(TreeConflictDesc {
                    victim_kind: node.kind,
                }),
            };
            self.conflicts.insert(child, descriptor);
        }
        Ok(())
    }

    fn update_moved_away_node(&mut self, path: &Path) -> ClientResult<()> {
        self.journal
            .push(format!("moved-away-node {}", path.display()));
        let Some(dst) = self.moves.get(path).cloned() else {
            return Err(ClientError::new(
                ErrorKind::WcConflictResolverFailure,
                format!("'{}' has no recorded move", path.display()),
            ));
        };
        // Replay the incoming text onto the move destination.
        if let Some(incoming) = self.incoming_texts.remove(path) {
            if let Some(node) = self.nodes.get_mut(&dst) {
                node.working_text = incoming;
            }
        }
        Ok(())
    }

    fn record_conflict(&mut self, path: &Path, conflict: ConflictDescriptor) -> ClientResult<()> {
        self.journal
            .push(format!("record-conflict {}", path.display()));
        match self.conflicts.get_mut(path) {
            Some(existing) => {
                if conflict.text.is_some() {
                    existing.text = conflict.text;
                }
                existing.props.extend(conflict.props);
                if conflict.tree.is_some() {
                    existing.tree = conflict.tree;
                }
                existing.operation = conflict.operation;
                existing.incoming_change = conflict.incoming_change;
                existing.local_change = conflict.local_change;
                if conflict.left.is_some() {
                    existing.left = conflict.left;
                }
                if conflict.right.is_some() {
                    existing.right = conflict.right;
                }
            }
            None => {
                self.conflicts.insert(path.to_owned(), conflict);
            }
        }
        Ok(())
    }

    fn schedule_add(&mut self, path: &Path, kind: NodeKind) -> ClientResult<()> {
        self.journal.push(format!("schedule-add {}", path.display()));
        if self.nodes.contains_key(path) {
            return Err(ClientError::new(
                ErrorKind::EntryExists,
                format!("'{}' is already under version control", path.display()),
            ));
        }
        let parent = path
            .parent()
            .and_then(|parent| self.nodes.get(parent))
            .ok_or_else(|| {
                ClientError::new(
                    ErrorKind::EntryNotFound,
                    format!("'{}' has no versioned parent", path.display()),
                )
            })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let url = RepoUrlBuf::parse(format!("{}/{name}", parent.url))
            .map_err(|err| ClientError::new(ErrorKind::IllegalTarget, err.to_string()))?;
        let kind = match kind {
            NodeKind::Unknown => NodeKind::File,
            other => other,
        };
        self.nodes.insert(
            path.to_owned(),
            WcNode {
                kind,
                url,
                revision: Revnum(0),
                committed_rev: Revnum(0),
                copyfrom: None,
                schedule: Schedule::Add,
                base_text: BString::default(),
                working_text: BString::default(),
                base_props: Props::new(),
                working_props: Props::new(),
                wcprops: Props::new(),
            },
        );
        Ok(())
    }

    fn schedule_delete(&mut self, path: &Path) -> ClientResult<()> {
        self.journal
            .push(format!("schedule-delete {}", path.display()));
        let node = self.node_mut(path)?;
        if node.schedule == Schedule::Add {
            // Deleting a not-yet-committed add leaves nothing behind.
            self.nodes.remove(path);
        } else {
            node.schedule = Schedule::Delete;
        }
        Ok(())
    }

    fn schedule_copy(
        &mut self,
        dst: &Path,
        kind: NodeKind,
        copyfrom_url: &RepoUrlBuf,
        copyfrom_rev: Revnum,
        contents: Option<BString>,
    ) -> ClientResult<()> {
        self.journal.push(format!("schedule-copy {}", dst.display()));
        if self.nodes.contains_key(dst) {
            return Err(ClientError::new(
                ErrorKind::EntryExists,
                format!("'{}' already exists", dst.display()),
            ));
        }
        let text = contents.unwrap_or_default();
        self.nodes.insert(
            dst.to_owned(),
            WcNode {
                kind,
                url: copyfrom_url.clone(),
                revision: copyfrom_rev,
                committed_rev: copyfrom_rev,
                copyfrom: Some((copyfrom_url.clone(), copyfrom_rev)),
                schedule: Schedule::Add,
                base_text: text.clone(),
                working_text: text,
                base_props: Props::new(),
                working_props: Props::new(),
                wcprops: Props::new(),
            },
        );
        Ok(())
    }

    fn revert(&mut self, path: &Path) -> ClientResult<()> {
        self.journal.push(format!("revert {}", path.display()));
        let node = self.node_mut(path)?;
        if node.schedule == Schedule::Add && node.copyfrom.is_none() {
            self.nodes.remove(path);
        } else {
            node.schedule = Schedule::Normal;
            node.working_text = node.base_text.clone();
            node.working_props = node.base_props.clone();
        }
        self.conflicts.remove(path);
        Ok(())
    }

    fn cleanup(&mut self, root: &Path) -> ClientResult<()> {
        self.journal.push(format!("cleanup {}", root.display()));
        self.locks.retain(|lock| !lock.starts_with(root));
        Ok(())
    }

    fn set_entry_url(&mut self, path: &Path, url: &RepoUrlBuf) -> ClientResult<()> {
        self.journal.push(format!("set-url {}", path.display()));
        self.node_mut(path)?.url = url.clone();
        Ok(())
    }

    fn process_committed(
        &mut self,
        path: &Path,
        rev: Revnum,
        _date: Timestamp,
        _author: &str,
    ) -> ClientResult<()> {
        self.journal
            .push(format!("process-committed {} r{rev}", path.display()));
        let node = self.node_mut(path)?;
        match node.schedule {
            Schedule::Delete => {
                self.nodes.remove(path);
                return Ok(());
            }
            _ => {
                node.schedule = Schedule::Normal;
                node.copyfrom = None;
                node.revision = rev;
                node.committed_rev = rev;
                node.base_text = node.working_text.clone();
                node.base_props = node.working_props.clone();
            }
        }
        Ok(())
    }

    fn set_wcprop(
        &mut self,
        path: &Path,
        name: &str,
        value: Option<&BString>,
    ) -> ClientResult<()> {
        self.journal.push(format!("set-wcprop {}", path.display()));
        let node = self.node_mut(path)?;
        match value {
            Some(value) => {
                node.wcprops.insert(name.to_owned(), value.clone());
            }
            None => {
                node.wcprops.remove(name);
            }
        }
        Ok(())
    }

    fn set_prop(&mut self, path: &Path, name: &str, value: Option<&BString>) -> ClientResult<()> {
        self.journal
            .push(format!("set-prop {} {name}", path.display()));
        let node = self.node_mut(path)?;
        match value {
            Some(value) => {
                node.working_props.insert(name.to_owned(), value.clone());
            }
            None => {
                node.working_props.remove(name);
            }
        }
        Ok(())
    }

    fn get_prop(&self, path: &Path, name: &str) -> ClientResult<Option<BString>> {
        Ok(self.node(path)?.working_props.get(name).cloned())
    }

    fn get_base_prop(&self, path: &Path, name: &str) -> ClientResult<Option<BString>> {
        Ok(self.node(path)?.base_props.get(name).cloned())
    }

    fn install_prop(
        &mut self,
        path: &Path,
        name: &str,
        value: Option<&BString>,
    ) -> ClientResult<()> {
        self.journal
            .push(format!("install-prop {} {name}", path.display()));
        let node = self.node_mut(path)?;
        match value {
            Some(value) => {
                node.base_props.insert(name.to_owned(), value.clone());
                node.working_props.insert(name.to_owned(), value.clone());
            }
            None => {
                node.base_props.remove(name);
                node.working_props.remove(name);
            }
        }
        Ok(())
    }

    fn prop_list(&self, path: &Path) -> ClientResult<Props> {
        Ok(self.node(path)?.working_props.clone())
    }

    fn read_prop_changes(&self, path: &Path) -> ClientResult<Vec<(String, Option<BString>)>> {
        let node = self.node(path)?;
        let mut changes = Vec::new();
        for (name, value) in &node.working_props {
            if node.base_props.get(name) != Some(value) {
                changes.push((name.clone(), Some(value.clone())));
            }
        }
        for name in node.base_props.keys() {
            if !node.working_props.contains_key(name) {
                changes.push((name.clone(), None));
            }
        }
        Ok(changes)
    }

    fn read_text_base(&self, path: &Path) -> ClientResult<BString> {
        Ok(self.node(path)?.base_text.clone())
    }

    fn read_working_text(&self, path: &Path) -> ClientResult<BString> {
        Ok(self.node(path)?.working_text.clone())
    }

    fn write_working_text(&mut self, path: &Path, contents: &BString) -> ClientResult<()> {
        self.journal
            .push(format!("write-working-text {}", path.display()));
        self.node_mut(path)?.working_text = contents.clone();
        Ok(())
    }

    fn install_file(
        &mut self,
        path: &Path,
        contents: BString,
        url: &RepoUrlBuf,
        rev: Revnum,
    ) -> ClientResult<()> {
        self.journal.push(format!("install-file {}", path.display()));
        // A content install over an existing entry keeps its properties.
        let (base_props, working_props, wcprops) = match self.nodes.get(path) {
            Some(node) => (
                node.base_props.clone(),
                node.working_props.clone(),
                node.wcprops.clone(),
            ),
            None => (Props::new(), Props::new(), Props::new()),
        };
        self.nodes.insert(
            path.to_owned(),
            WcNode {
                kind: NodeKind::File,
                url: url.clone(),
                revision: rev,
                committed_rev: rev,
                copyfrom: None,
                schedule: Schedule::Normal,
                base_text: contents.clone(),
                working_text: contents,
                base_props,
                working_props,
                wcprops,
            },
        );
        Ok(())
    }

    fn install_dir(&mut self, path: &Path, url: &RepoUrlBuf, rev: Revnum) -> ClientResult<()> {
        self.journal.push(format!("install-dir {}", path.display()));
        let (base_props, working_props, wcprops) = match self.nodes.get(path) {
            Some(node) => (
                node.base_props.clone(),
                node.working_props.clone(),
                node.wcprops.clone(),
            ),
            None => (Props::new(), Props::new(), Props::new()),
        };
        self.nodes.insert(
            path.to_owned(),
            WcNode {
                kind: NodeKind::Dir,
                url: url.clone(),
                revision: rev,
                committed_rev: rev,
                copyfrom: None,
                schedule: Schedule::Normal,
                base_text: BString::default(),
                working_text: BString::default(),
                base_props,
                working_props,
                wcprops,
            },
        );
        Ok(())
    }

    fn remove_entry(&mut self, path: &Path) -> ClientResult<()> {
        self.journal.push(format!("remove-entry {}", path.display()));
        self.nodes.retain(|entry_path, _| !entry_path.starts_with(path));
        self.conflicts.retain(|entry_path, _| !entry_path.starts_with(path));
        Ok(())
    }

    fn tweak_entry_revision(&mut self, path: &Path, rev: Revnum) -> ClientResult<()> {
        let node = self.node_mut(path)?;
        node.revision = rev;
        Ok(())
    }
}
