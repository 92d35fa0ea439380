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

//! An in-memory repository and session implementation.
//!
//! `SimpleRepo` keeps full revision snapshots in memory and hands out
//! [`Session`]s against them. It implements the whole session interface,
//! including the activity-based commit primitives, so the client core can
//! be exercised end to end without a network. Every server call is
//! recorded in a call log, which lets tests assert that an operation made
//! no network traffic at all.

#![expect(missing_docs)]

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use bstr::BString;
use itertools::Itertools as _;

use crate::checksum::Checksum;
use crate::delta::TextDelta;
use crate::delta::apply_delta;
use crate::editor::TreeEditor;
use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;
use crate::ra::ActivityId;
use crate::ra::ChangeAction;
use crate::ra::ChangedPath;
use crate::ra::CheckinResult;
use crate::ra::Dirent;
use crate::ra::LocationSegment;
use crate::ra::LocationSegmentReceiver;
use crate::ra::LogEntry;
use crate::ra::LogReceiver;
use crate::ra::NodeKind;
use crate::ra::Props;
use crate::ra::Session;
use crate::ra::WorkingResource;
use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponentBuf;
use crate::repo_url::RepoUrl;
use crate::repo_url::RepoUrlBuf;
use crate::revision::Revnum;
use crate::revision::Timestamp;

#[derive(Clone, Debug)]
struct NodeData {
    /// Lineage identifier: preserved by copies, minted by plain adds.
    id: u64,
    kind: NodeKind,
    text: BString,
    props: Props,
}

type TreeSnapshot = BTreeMap<RepoPathBuf, NodeData>;

#[derive(Clone, Debug)]
struct RevisionData {
    tree: TreeSnapshot,
    changed_paths: BTreeMap<RepoPathBuf, ChangedPath>,
    revprops: Props,
    date: Timestamp,
}

#[derive(Debug)]
struct Transaction {
    tree: TreeSnapshot,
    changed_paths: BTreeMap<RepoPathBuf, ChangedPath>,
    checked_out: Vec<RepoUrlBuf>,
}

#[derive(Debug)]
struct RepoState {
    root_url: RepoUrlBuf,
    uuid: String,
    revisions: Vec<RevisionData>,
    transactions: HashMap<String, Transaction>,
    next_node_id: u64,
    call_log: Vec<String>,
}

impl RepoState {
    fn head(&self) -> Revnum {
        Revnum(self.revisions.len() as u64 - 1)
    }

    fn revision(&self, rev: Revnum) -> ClientResult<&RevisionData> {
        self.revisions.get(rev.0 as usize).ok_or_else(|| {
            ClientError::new(ErrorKind::FsNotFound, format!("no revision r{rev}"))
        })
    }

    fn mint_node_id(&mut self) -> u64 {
        self.next_node_id += 1;
        self.next_node_id
    }
}

/// A shared in-memory repository.
#[derive(Clone, Debug)]
pub struct SimpleRepo {
    state: Arc<Mutex<RepoState>>,
}

/// One history mutation applied by [`SimpleRepo::commit_ops`].
#[derive(Clone, Copy, Debug)]
pub enum RepoOp<'a> {
    PutFile(&'a str, &'a [u8]),
    Mkdir(&'a str),
    Delete(&'a str),
    SetProp(&'a str, &'a str, &'a [u8]),
    Copy {
        from: &'a str,
        from_rev: Revnum,
        to: &'a str,
    },
}

impl SimpleRepo {
    pub fn new(root_url: &str, uuid: &str) -> Self {
        let root_url = RepoUrlBuf::parse(root_url).expect("valid repository root URL");
        let mut tree = TreeSnapshot::new();
        tree.insert(
            RepoPathBuf::root(),
            NodeData {
                id: 0,
                kind: NodeKind::Dir,
                text: BString::default(),
                props: Props::new(),
            },
        );
        let mut revprops = Props::new();
        revprops.insert("svn:log".to_owned(), BString::from(""));
        let date = Timestamp::now();
        let state = RepoState {
            root_url,
            uuid: uuid.to_owned(),
            revisions: vec![RevisionData {
                tree,
                changed_paths: BTreeMap::new(),
                revprops,
                date,
            }],
            transactions: HashMap::new(),
            next_node_id: 0,
            call_log: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn root_url(&self) -> RepoUrlBuf {
        self.state.lock().unwrap().root_url.clone()
    }

    pub fn uuid(&self) -> String {
        self.state.lock().unwrap().uuid.clone()
    }

    pub fn head(&self) -> Revnum {
        self.state.lock().unwrap().head()
    }

    /// Every server call any session has made, in order.
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().unwrap().call_log.clone()
    }

    pub fn clear_call_log(&self) {
        self.state.lock().unwrap().call_log.clear();
    }

    /// Applies `ops` directly as one new revision; test setup shorthand
    /// that bypasses the activity machinery.
    pub fn commit_ops(&self, author: &str, message: &str, ops: &[RepoOp<'_>]) -> Revnum {
        let mut state = self.state.lock().unwrap();
        let mut tree = state.revisions.last().unwrap().tree.clone();
        let mut changed_paths = BTreeMap::new();
        for op in ops {
            match *op {
                RepoOp::PutFile(path, text) => {
                    let path = RepoPathBuf::from_internal_string(path).unwrap();
                    let existed = tree.contains_key(&path);
                    let id = match tree.get(&path) {
                        Some(node) => node.id,
                        None => state.mint_node_id(),
                    };
                    tree.insert(
                        path.clone(),
                        NodeData {
                            id,
                            kind: NodeKind::File,
                            text: BString::from(text),
                            props: Props::new(),
                        },
                    );
                    changed_paths.insert(
                        path,
                        ChangedPath {
                            action: if existed {
                                ChangeAction::Modified
                            } else {
                                ChangeAction::Added
                            },
                            copy_from: None,
                        },
                    );
                }
                RepoOp::Mkdir(path) => {
                    let path = RepoPathBuf::from_internal_string(path).unwrap();
                    let id = state.mint_node_id();
                    tree.insert(
                        path.clone(),
                        NodeData {
                            id,
                            kind: NodeKind::Dir,
                            text: BString::default(),
                            props: Props::new(),
                        },
                    );
                    changed_paths.insert(
                        path,
                        ChangedPath {
                            action: ChangeAction::Added,
                            copy_from: None,
                        },
                    );
                }
                RepoOp::Delete(path) => {
                    let path = RepoPathBuf::from_internal_string(path).unwrap();
                    tree.retain(|key, _| !key.starts_with(&path));
                    changed_paths.insert(
                        path,
                        ChangedPath {
                            action: ChangeAction::Deleted,
                            copy_from: None,
                        },
                    );
                }
                RepoOp::SetProp(path, name, value) => {
                    let path = RepoPathBuf::from_internal_string(path).unwrap();
                    let node = tree.get_mut(&path).expect("node exists");
                    node.props.insert(name.to_owned(), BString::from(value));
                    changed_paths.insert(
                        path,
                        ChangedPath {
                            action: ChangeAction::Modified,
                            copy_from: None,
                        },
                    );
                }
                RepoOp::Copy { from, from_rev, to } => {
                    let from = RepoPathBuf::from_internal_string(from).unwrap();
                    let to = RepoPathBuf::from_internal_string(to).unwrap();
                    let src_tree = state.revisions[from_rev.0 as usize].tree.clone();
                    let existed = tree.contains_key(&to);
                    for (path, node) in &src_tree {
                        let Some(tail) = path.strip_prefix(&from) else {
                            continue;
                        };
                        let mut dst = to.clone();
                        for component in tail.components() {
                            dst.push(component);
                        }
                        tree.insert(dst, node.clone());
                    }
                    changed_paths.insert(
                        to,
                        ChangedPath {
                            action: if existed {
                                ChangeAction::Replaced
                            } else {
                                ChangeAction::Added
                            },
                            copy_from: Some((from, from_rev)),
                        },
                    );
                }
            }
        }
        let mut revprops = Props::new();
        revprops.insert("svn:author".to_owned(), BString::from(author));
        revprops.insert("svn:log".to_owned(), BString::from(message));
        let date = Timestamp::now();
        state.revisions.push(RevisionData {
            tree,
            changed_paths,
            revprops,
            date,
        });
        state.head()
    }

    /// Opens a session rooted at `url`, which must live under the
    /// repository root.
    pub fn session(&self, url: &RepoUrl, username: &str) -> ClientResult<SimpleSession> {
        let state = self.state.lock().unwrap();
        if !state.root_url.is_ancestor_of(url) {
            return Err(ClientError::new(
                ErrorKind::RaCreatingRequest,
                format!("'{url}' is not under the repository root '{}'", state.root_url),
            ));
        }
        let root_url = state.root_url.clone();
        let uuid = state.uuid.clone();
        drop(state);
        Ok(SimpleSession {
            repo: self.clone(),
            root_url,
            uuid,
            session_url: url.to_owned(),
            username: username.to_owned(),
        })
    }
}

/// A session against a [`SimpleRepo`].
#[derive(Debug)]
pub struct SimpleSession {
    repo: SimpleRepo,
    root_url: RepoUrlBuf,
    uuid: String,
    session_url: RepoUrlBuf,
    username: String,
}

impl SimpleSession {
    fn log_call(&self, call: impl Into<String>) {
        self.repo.state.lock().unwrap().call_log.push(call.into());
    }

    fn session_relpath(&self) -> RepoPathBuf {
        self.root_url
            .relpath_to(&self.session_url)
            .expect("session URL is under the root")
            .to_owned()
    }

    fn abs_path(&self, path: &RepoPath) -> RepoPathBuf {
        let mut abs = self.session_relpath();
        for component in path.components() {
            abs.push(component);
        }
        abs
    }

    fn url_relpath(&self, url: &RepoUrl) -> ClientResult<RepoPathBuf> {
        self.root_url
            .relpath_to(url)
            .map(|path| path.to_owned())
            .ok_or_else(|| {
                ClientError::new(
                    ErrorKind::RaRequestFailed,
                    format!("'{url}' is not under the repository root '{}'", self.root_url),
                )
            })
    }

    fn node_at(&self, abs_path: &RepoPath, rev: Revnum) -> ClientResult<Option<NodeData>> {
        let state = self.repo.state.lock().unwrap();
        Ok(state.revision(rev)?.tree.get(abs_path).cloned())
    }

    fn existing_node_at(&self, abs_path: &RepoPath, rev: Revnum) -> ClientResult<NodeData> {
        self.node_at(abs_path, rev)?.ok_or_else(|| {
            ClientError::new(
                ErrorKind::FsNotFound,
                format!("'{}' does not exist in revision r{rev}", abs_path.as_str()),
            )
        })
    }

    fn transaction_mut<'a>(
        state: &'a mut RepoState,
        activity: &ActivityId,
    ) -> ClientResult<&'a mut Transaction> {
        state.transactions.get_mut(&activity.0).ok_or_else(|| {
            ClientError::new(
                ErrorKind::RaRequestFailed,
                format!("unknown activity \"{}\"", activity.0),
            )
        })
    }

    /// Drives `editor` with the delta between two snapshots, rooted at
    /// `old_root`/`new_root`. On any editor failure the edit is aborted
    /// and the failure propagated.
    #[expect(clippy::too_many_arguments)]
    fn drive_edit(
        &self,
        base_rev: Option<Revnum>,
        old_root: &RepoPath,
        old_tree: Option<&TreeSnapshot>,
        new_root: &RepoPath,
        new_tree: &TreeSnapshot,
        recurse: bool,
        editor: &mut dyn TreeEditor,
    ) -> ClientResult<()> {
        let result = drive_edit_inner(
            base_rev, old_root, old_tree, new_root, new_tree, recurse, editor,
        );
        if let Err(err) = result {
            let err = match editor.abort_edit() {
                Ok(()) => err,
                Err(abort_err) => err.chain_cleanup(abort_err),
            };
            return Err(err);
        }
        Ok(())
    }
}

fn children_of<'a>(
    tree: &'a TreeSnapshot,
    dir: &RepoPath,
) -> BTreeMap<RepoPathComponentBuf, &'a NodeData> {
    tree.iter()
        .filter_map(|(path, node)| {
            let (parent, name) = path.split()?;
            (parent == dir).then(|| (name.to_owned(), node))
        })
        .collect()
}

fn drive_dir(
    editor: &mut dyn TreeEditor,
    token: crate::editor::DirToken,
    old_dir: Option<&RepoPath>,
    old_tree: &TreeSnapshot,
    new_dir: &RepoPath,
    new_tree: &TreeSnapshot,
    recurse: bool,
) -> ClientResult<()> {
    let empty = BTreeMap::new();
    let old_children = match old_dir {
        Some(old_dir) => children_of(old_tree, old_dir),
        None => empty,
    };
    let new_children = children_of(new_tree, new_dir);

    let names: Vec<_> = old_children
        .keys()
        .chain(new_children.keys())
        .unique()
        .cloned()
        .collect();
    for name in names {
        let old_child = old_children.get(&name);
        let new_child = new_children.get(&name);
        match (old_child, new_child) {
            (Some(_), None) => {
                editor.delete_entry(&name, None, token)?;
            }
            (None, Some(new_node)) => {
                let new_path = new_dir.join(&name);
                add_node(editor, token, &name, &new_path, new_node, new_tree, recurse)?;
            }
            (Some(old_node), Some(new_node)) => {
                let old_path = old_dir.expect("old child implies old dir").join(&name);
                let new_path = new_dir.join(&name);
                if old_node.kind != new_node.kind {
                    editor.delete_entry(&name, None, token)?;
                    add_node(editor, token, &name, &new_path, new_node, new_tree, recurse)?;
                } else if new_node.kind == NodeKind::Dir {
                    if recurse && subtree_changed_between(old_tree, &old_path, new_tree, &new_path)
                    {
                        let child_token = editor.open_directory(&name, token, None)?;
                        drive_dir(
                            editor,
                            child_token,
                            Some(&old_path),
                            old_tree,
                            &new_path,
                            new_tree,
                            recurse,
                        )?;
                        let old_props = &old_node.props;
                        let new_props = &new_node.props;
                        drive_prop_changes(old_props, new_props, |name, value| {
                            editor.change_dir_prop(child_token, name, value.map(|v| v.as_ref()))
                        })?;
                        editor.close_directory(child_token)?;
                    }
                } else if old_node.id != new_node.id
                    || old_node.text != new_node.text
                    || old_node.props != new_node.props
                {
                    let file = editor.open_file(&name, token, None)?;
                    if old_node.text != new_node.text {
                        let mut delta = TextDelta::from_contents(&new_node.text);
                        delta.base_checksum = Some(Checksum::of_contents(&old_node.text));
                        let result_checksum = delta.result_checksum.clone();
                        let mut handler =
                            editor.apply_textdelta(file, delta.base_checksum.as_ref())?;
                        for window in &delta.windows {
                            handler.window(Some(window))?;
                        }
                        handler.window(None)?;
                        drop(handler);
                        drive_prop_changes(&old_node.props, &new_node.props, |name, value| {
                            editor.change_file_prop(file, name, value.map(|v| v.as_ref()))
                        })?;
                        editor.close_file(file, result_checksum.as_ref())?;
                    } else {
                        drive_prop_changes(&old_node.props, &new_node.props, |name, value| {
                            editor.change_file_prop(file, name, value.map(|v| v.as_ref()))
                        })?;
                        editor.close_file(file, None)?;
                    }
                }
            }
            (None, None) => unreachable!(),
        }
    }
    Ok(())
}

fn subtree_changed_between(
    old_tree: &TreeSnapshot,
    old_dir: &RepoPath,
    new_tree: &TreeSnapshot,
    new_dir: &RepoPath,
) -> bool {
    let collect = |tree: &TreeSnapshot, dir: &RepoPath| -> BTreeMap<RepoPathBuf, (u64, BString, Props)> {
        tree.iter()
            .filter(|(path, _)| path.starts_with(dir))
            .map(|(path, node)| {
                let relative = path.strip_prefix(dir).expect("filtered").to_owned();
                (relative, (node.id, node.text.clone(), node.props.clone()))
            })
            .collect()
    };
    collect(old_tree, old_dir) != collect(new_tree, new_dir)
}

fn add_node(
    editor: &mut dyn TreeEditor,
    parent: crate::editor::DirToken,
    name: &RepoPathComponentBuf,
    new_path: &RepoPath,
    node: &NodeData,
    new_tree: &TreeSnapshot,
    recurse: bool,
) -> ClientResult<()> {
    match node.kind {
        NodeKind::Dir => {
            let token = editor.add_directory(name, parent, None)?;
            if recurse {
                drive_dir(editor, token, None, &TreeSnapshot::new(), new_path, new_tree, recurse)?;
            }
            drive_prop_changes(&Props::new(), &node.props, |prop_name, value| {
                editor.change_dir_prop(token, prop_name, value.map(|v| v.as_ref()))
            })?;
            editor.close_directory(token)
        }
        _ => {
            let file = editor.add_file(name, parent, None)?;
            let delta = TextDelta::from_contents(&node.text);
            let result_checksum = delta.result_checksum.clone();
            let mut handler = editor.apply_textdelta(file, None)?;
            for window in &delta.windows {
                handler.window(Some(window))?;
            }
            handler.window(None)?;
            drop(handler);
            drive_prop_changes(&Props::new(), &node.props, |prop_name, value| {
                editor.change_file_prop(file, prop_name, value.map(|v| v.as_ref()))
            })?;
            editor.close_file(file, result_checksum.as_ref())
        }
    }
}

fn drive_prop_changes(
    old_props: &Props,
    new_props: &Props,
    mut change: impl FnMut(&str, Option<&BString>) -> ClientResult<()>,
) -> ClientResult<()> {
    for (name, value) in new_props {
        if old_props.get(name) != Some(value) {
            change(name, Some(value))?;
        }
    }
    for name in old_props.keys() {
        if !new_props.contains_key(name) {
            change(name, None)?;
        }
    }
    Ok(())
}

fn drive_edit_inner(
    base_rev: Option<Revnum>,
    old_root: &RepoPath,
    old_tree: Option<&TreeSnapshot>,
    new_root: &RepoPath,
    new_tree: &TreeSnapshot,
    recurse: bool,
    editor: &mut dyn TreeEditor,
) -> ClientResult<()> {
    let empty = TreeSnapshot::new();
    let root_token = editor.open_root(base_rev)?;
    drive_dir(
        editor,
        root_token,
        old_tree.map(|_| old_root),
        old_tree.unwrap_or(&empty),
        new_root,
        new_tree,
        recurse,
    )?;
    editor.close_directory(root_token)?;
    editor.close_edit()
}

impl Session for SimpleSession {
    fn session_url(&self) -> &RepoUrl {
        &self.session_url
    }

    fn reparent(&mut self, url: &RepoUrl) -> ClientResult<()> {
        self.log_call(format!("reparent {url}"));
        if !self.root_url.is_ancestor_of(url) {
            return Err(ClientError::new(
                ErrorKind::RaRequestFailed,
                format!("'{url}' is not under the repository root '{}'", self.root_url),
            ));
        }
        self.session_url = url.to_owned();
        Ok(())
    }

    fn repos_root(&self) -> &RepoUrl {
        &self.root_url
    }

    fn repos_uuid(&self) -> &str {
        &self.uuid
    }

    fn latest_revision(&mut self) -> ClientResult<Revnum> {
        self.log_call("latest-revision");
        Ok(self.repo.state.lock().unwrap().head())
    }

    fn dated_revision(&mut self, t: Timestamp) -> ClientResult<Revnum> {
        self.log_call("dated-revision");
        let state = self.repo.state.lock().unwrap();
        let rev = state
            .revisions
            .iter()
            .enumerate()
            .rev()
            .find(|(_, revision)| revision.date <= t)
            .map(|(index, _)| Revnum(index as u64));
        rev.ok_or_else(|| {
            ClientError::new(ErrorKind::ClientBadRevision, "no revision at or before that date")
        })
    }

    fn check_path(&mut self, path: &RepoPath, rev: Revnum) -> ClientResult<NodeKind> {
        self.log_call(format!("check-path {}@{rev}", path.as_str()));
        let abs = self.abs_path(path);
        Ok(self
            .node_at(&abs, rev)?
            .map_or(NodeKind::None, |node| node.kind))
    }

    fn get_file(&mut self, path: &RepoPath, rev: Revnum) -> ClientResult<(BString, Props)> {
        self.log_call(format!("get-file {}@{rev}", path.as_str()));
        let abs = self.abs_path(path);
        let node = self.existing_node_at(&abs, rev)?;
        if node.kind == NodeKind::Dir {
            return Err(ClientError::new(
                ErrorKind::FsNotFound,
                format!("'{}' is a directory", abs.as_str()),
            ));
        }
        Ok((node.text, node.props))
    }

    fn get_dir(&mut self, path: &RepoPath, rev: Revnum) -> ClientResult<(Vec<Dirent>, Props)> {
        self.log_call(format!("get-dir {}@{rev}", path.as_str()));
        let abs = self.abs_path(path);
        let node = self.existing_node_at(&abs, rev)?;
        if node.kind != NodeKind::Dir {
            return Err(ClientError::new(
                ErrorKind::FsNotFound,
                format!("'{}' is not a directory", abs.as_str()),
            ));
        }
        let state = self.repo.state.lock().unwrap();
        let tree = &state.revision(rev)?.tree;
        let dirents = children_of(tree, &abs)
            .into_iter()
            .map(|(name, child)| Dirent {
                name,
                kind: child.kind,
                size: child.text.len() as u64,
                created_rev: rev,
            })
            .collect();
        Ok((dirents, node.props))
    }

    fn get_log(
        &mut self,
        paths: &[RepoPathBuf],
        start: Revnum,
        end: Revnum,
        limit: Option<usize>,
        discover_changed_paths: bool,
        _strict_node_history: bool,
        receiver: &mut LogReceiver<'_>,
    ) -> ClientResult<()> {
        self.log_call(format!("get-log r{start}:r{end}"));
        let entries: Vec<LogEntry> = {
            let state = self.repo.state.lock().unwrap();
            let (low, high) = if start <= end { (start, end) } else { (end, start) };
            let prefixes: Vec<RepoPathBuf> = paths
                .iter()
                .map(|path| {
                    let mut abs = self.session_relpath();
                    for component in path.components() {
                        abs.push(component);
                    }
                    abs
                })
                .collect();
            let mut revs: Vec<u64> = (low.0..=high.0.min(state.head().0)).collect();
            if start > end {
                revs.reverse();
            }
            revs.into_iter()
                .filter_map(|rev| {
                    let revision = &state.revisions[rev as usize];
                    if rev != 0
                        && !revision.changed_paths.keys().any(|changed| {
                            prefixes.iter().any(|prefix| {
                                changed.starts_with(prefix) || prefix.starts_with(changed)
                            })
                        })
                    {
                        return None;
                    }
                    let author = revision
                        .revprops
                        .get("svn:author")
                        .map(|value| String::from_utf8_lossy(value).into_owned());
                    let message = revision
                        .revprops
                        .get("svn:log")
                        .map(|value| String::from_utf8_lossy(value).into_owned());
                    Some(LogEntry {
                        revision: Revnum(rev),
                        author,
                        date: Some(revision.date),
                        message,
                        changed_paths: discover_changed_paths
                            .then(|| revision.changed_paths.clone()),
                    })
                })
                .collect()
        };
        let mut delivered = 0;
        for entry in &entries {
            if let Some(limit) = limit {
                if delivered >= limit {
                    break;
                }
            }
            receiver(entry)?;
            delivered += 1;
        }
        Ok(())
    }

    fn get_location_segments(
        &mut self,
        path: &RepoPath,
        peg: Revnum,
        start: Revnum,
        end: Revnum,
        receiver: &mut LocationSegmentReceiver<'_>,
    ) -> ClientResult<()> {
        self.log_call(format!("get-location-segments {}@{peg}", path.as_str()));
        let abs = self.abs_path(path);
        let node = self.existing_node_at(&abs, peg)?;
        let (high, low) = if start >= end { (start, end) } else { (end, start) };

        // Locate the node's path at every revision in range, youngest
        // first, then compress equal runs into segments.
        let state = self.repo.state.lock().unwrap();
        let mut runs: Vec<(Revnum, Option<RepoPathBuf>)> = Vec::new();
        for rev in (low.0..=high.0).rev() {
            let tree = &state.revision(Revnum(rev))?.tree;
            let location = tree
                .iter()
                .find(|(_, candidate)| candidate.id == node.id)
                .map(|(path, _)| path.clone());
            runs.push((Revnum(rev), location));
        }
        drop(state);

        let mut index = 0;
        while index < runs.len() {
            let (range_end, path) = runs[index].clone();
            let mut range_start = range_end;
            while index + 1 < runs.len() && runs[index + 1].1 == path {
                index += 1;
                range_start = runs[index].0;
            }
            receiver(&LocationSegment {
                range_start,
                range_end,
                path,
            })?;
            index += 1;
        }
        Ok(())
    }

    fn get_deleted_rev(
        &mut self,
        path: &RepoPath,
        start: Revnum,
        end: Revnum,
    ) -> ClientResult<Option<Revnum>> {
        self.log_call(format!("get-deleted-rev {}@{start}", path.as_str()));
        let abs = self.abs_path(path);
        let node = self.existing_node_at(&abs, start)?;
        let state = self.repo.state.lock().unwrap();
        for rev in (start.0 + 1)..=end.0.min(state.head().0) {
            let tree = &state.revisions[rev as usize].tree;
            let still_there = tree
                .get(&abs)
                .is_some_and(|candidate| candidate.id == node.id);
            if !still_there {
                return Ok(Some(Revnum(rev)));
            }
        }
        Ok(None)
    }

    fn rev_prop(&mut self, rev: Revnum, name: &str) -> ClientResult<Option<BString>> {
        self.log_call(format!("rev-prop r{rev} {name}"));
        let state = self.repo.state.lock().unwrap();
        Ok(state.revision(rev)?.revprops.get(name).cloned())
    }

    fn change_rev_prop(
        &mut self,
        rev: Revnum,
        name: &str,
        value: Option<&BString>,
    ) -> ClientResult<()> {
        self.log_call(format!("change-rev-prop r{rev} {name}"));
        let mut state = self.repo.state.lock().unwrap();
        state.revision(rev)?;
        let revprops = &mut state.revisions[rev.0 as usize].revprops;
        match value {
            Some(value) => {
                revprops.insert(name.to_owned(), value.clone());
            }
            None => {
                revprops.remove(name);
            }
        }
        Ok(())
    }

    fn rev_proplist(&mut self, rev: Revnum) -> ClientResult<Props> {
        self.log_call(format!("rev-proplist r{rev}"));
        let state = self.repo.state.lock().unwrap();
        Ok(state.revision(rev)?.revprops.clone())
    }

    fn do_update(
        &mut self,
        base_rev: Option<Revnum>,
        target_rev: Revnum,
        target: &RepoPath,
        recurse: bool,
        editor: &mut dyn TreeEditor,
    ) -> ClientResult<()> {
        self.log_call(format!("do-update r{target_rev}"));
        let root = self.abs_path(target);
        let state = self.repo.state.lock().unwrap();
        let old_tree = match base_rev {
            Some(rev) => Some(state.revision(rev)?.tree.clone()),
            None => None,
        };
        let new_tree = state.revision(target_rev)?.tree.clone();
        drop(state);
        self.drive_edit(
            base_rev,
            &root,
            old_tree.as_ref(),
            &root,
            &new_tree,
            recurse,
            editor,
        )
    }

    fn do_switch(
        &mut self,
        base_rev: Option<Revnum>,
        target_rev: Revnum,
        target: &RepoPath,
        recurse: bool,
        switch_url: &RepoUrl,
        editor: &mut dyn TreeEditor,
    ) -> ClientResult<()> {
        self.log_call(format!("do-switch r{target_rev} {switch_url}"));
        let old_root = self.abs_path(target);
        let new_root = self.url_relpath(switch_url)?;
        let state = self.repo.state.lock().unwrap();
        let old_tree = match base_rev {
            Some(rev) => Some(state.revision(rev)?.tree.clone()),
            None => None,
        };
        let new_tree = state.revision(target_rev)?.tree.clone();
        drop(state);
        self.drive_edit(
            base_rev,
            &old_root,
            old_tree.as_ref(),
            &new_root,
            &new_tree,
            recurse,
            editor,
        )
    }

    fn do_diff(
        &mut self,
        base_rev: Revnum,
        target_rev: Revnum,
        versus_url: &RepoUrl,
        recurse: bool,
        editor: &mut dyn TreeEditor,
    ) -> ClientResult<()> {
        self.log_call(format!("do-diff r{base_rev}:r{target_rev} {versus_url}"));
        let old_root = self.session_relpath();
        let new_root = self.url_relpath(versus_url)?;
        let state = self.repo.state.lock().unwrap();
        let old_tree = state.revision(base_rev)?.tree.clone();
        let new_tree = state.revision(target_rev)?.tree.clone();
        drop(state);
        self.drive_edit(
            Some(base_rev),
            &old_root,
            Some(&old_tree),
            &new_root,
            &new_tree,
            recurse,
            editor,
        )
    }

    fn do_status(
        &mut self,
        base_rev: Revnum,
        target_rev: Revnum,
        recurse: bool,
        editor: &mut dyn TreeEditor,
    ) -> ClientResult<()> {
        self.log_call(format!("do-status r{base_rev}:r{target_rev}"));
        let root = self.session_relpath();
        let state = self.repo.state.lock().unwrap();
        let old_tree = state.revision(base_rev)?.tree.clone();
        let new_tree = state.revision(target_rev)?.tree.clone();
        drop(state);
        self.drive_edit(
            Some(base_rev),
            &root,
            Some(&old_tree),
            &root,
            &new_tree,
            recurse,
            editor,
        )
    }

    fn begin_activity(&mut self, activity: &ActivityId) -> ClientResult<()> {
        self.log_call(format!("mkactivity {}", activity.0));
        let mut state = self.repo.state.lock().unwrap();
        if state.transactions.contains_key(&activity.0) {
            return Err(ClientError::new(
                ErrorKind::RaRequestFailed,
                format!("activity \"{}\" already exists", activity.0),
            ));
        }
        let tree = state.revisions.last().unwrap().tree.clone();
        state.transactions.insert(
            activity.0.clone(),
            Transaction {
                tree,
                changed_paths: BTreeMap::new(),
                checked_out: Vec::new(),
            },
        );
        Ok(())
    }

    fn checkout_resource(
        &mut self,
        url: &RepoUrl,
        activity: &ActivityId,
    ) -> ClientResult<WorkingResource> {
        self.log_call(format!("checkout {url}"));
        let relpath = self.url_relpath(url)?;
        let mut state = self.repo.state.lock().unwrap();
        let txn = Self::transaction_mut(&mut state, activity)?;
        // A resource may be checked out before it exists (a file about to
        // be added); its parent must exist in the transaction, though.
        let parent_ok = relpath
            .parent()
            .is_none_or(|parent| txn.tree.contains_key(parent));
        if !txn.tree.contains_key(&relpath) && !parent_ok {
            return Err(ClientError::new(
                ErrorKind::RaRequestFailed,
                format!("cannot check out '{url}': no such resource"),
            ));
        }
        txn.checked_out.push(url.to_owned());
        Ok(WorkingResource {
            activity: activity.clone(),
            url: url.as_str().to_owned(),
        })
    }

    fn put(&mut self, resource: &WorkingResource, delta: &TextDelta) -> ClientResult<()> {
        self.log_call(format!("put {}", resource.url));
        let url = RepoUrlBuf::parse(&resource.url)
            .map_err(|err| ClientError::new(ErrorKind::RaRequestFailed, err.to_string()))?;
        let relpath = self.url_relpath(&url)?;
        let mut state = self.repo.state.lock().unwrap();
        let fresh_id = state.mint_node_id();
        let txn = Self::transaction_mut(&mut state, &resource.activity)?;
        let (node_id, existed, base_text, props) = match txn.tree.get(&relpath) {
            Some(node) => (node.id, true, node.text.clone(), node.props.clone()),
            None => (fresh_id, false, BString::default(), Props::new()),
        };
        let new_text = apply_delta(&base_text, delta)?;
        txn.tree.insert(
            relpath.clone(),
            NodeData {
                id: node_id,
                kind: NodeKind::File,
                text: new_text,
                props,
            },
        );
        txn.changed_paths.entry(relpath).or_insert(ChangedPath {
            action: if existed {
                ChangeAction::Modified
            } else {
                ChangeAction::Added
            },
            copy_from: None,
        });
        Ok(())
    }

    fn proppatch(
        &mut self,
        resource: &WorkingResource,
        changes: &[(String, Option<BString>)],
    ) -> ClientResult<()> {
        self.log_call(format!("proppatch {}", resource.url));
        let url = RepoUrlBuf::parse(&resource.url)
            .map_err(|err| ClientError::new(ErrorKind::RaRequestFailed, err.to_string()))?;
        let relpath = self.url_relpath(&url)?;
        let mut state = self.repo.state.lock().unwrap();
        let txn = Self::transaction_mut(&mut state, &resource.activity)?;
        let node = txn.tree.get_mut(&relpath).ok_or_else(|| {
            ClientError::new(
                ErrorKind::RaRequestFailed,
                format!("cannot proppatch '{url}': no such resource"),
            )
        })?;
        for (name, value) in changes {
            match value {
                Some(value) => {
                    node.props.insert(name.clone(), value.clone());
                }
                None => {
                    node.props.remove(name);
                }
            }
        }
        txn.changed_paths.entry(relpath).or_insert(ChangedPath {
            action: ChangeAction::Modified,
            copy_from: None,
        });
        Ok(())
    }

    fn mkcol(&mut self, activity: &ActivityId, url: &RepoUrl) -> ClientResult<()> {
        self.log_call(format!("mkcol {url}"));
        let relpath = self.url_relpath(url)?;
        let mut state = self.repo.state.lock().unwrap();
        let id = state.mint_node_id();
        let txn = Self::transaction_mut(&mut state, activity)?;
        if txn.tree.contains_key(&relpath) {
            return Err(ClientError::new(
                ErrorKind::RaRequestFailed,
                format!("'{url}' already exists"),
            ));
        }
        txn.tree.insert(
            relpath.clone(),
            NodeData {
                id,
                kind: NodeKind::Dir,
                text: BString::default(),
                props: Props::new(),
            },
        );
        txn.changed_paths.insert(
            relpath,
            ChangedPath {
                action: ChangeAction::Added,
                copy_from: None,
            },
        );
        Ok(())
    }

    fn copy_resource(
        &mut self,
        src_url: &RepoUrl,
        src_rev: Revnum,
        activity: &ActivityId,
        dst_url: &RepoUrl,
    ) -> ClientResult<()> {
        self.log_call(format!("copy {src_url}@{src_rev} -> {dst_url}"));
        let src_relpath = self.url_relpath(src_url)?;
        let dst_relpath = self.url_relpath(dst_url)?;
        let mut state = self.repo.state.lock().unwrap();
        let src_tree = state.revision(src_rev)?.tree.clone();
        if !src_tree.contains_key(&src_relpath) {
            return Err(ClientError::new(
                ErrorKind::FsNotFound,
                format!("'{src_url}' does not exist in revision r{src_rev}"),
            ));
        }
        let txn = Self::transaction_mut(&mut state, activity)?;
        let existed = txn.tree.contains_key(&dst_relpath);
        for (path, node) in &src_tree {
            let Some(tail) = path.strip_prefix(&src_relpath) else {
                continue;
            };
            let mut dst = dst_relpath.clone();
            for component in tail.components() {
                dst.push(component);
            }
            txn.tree.insert(dst, node.clone());
        }
        txn.changed_paths.insert(
            dst_relpath,
            ChangedPath {
                action: if existed {
                    ChangeAction::Replaced
                } else {
                    ChangeAction::Added
                },
                copy_from: Some((src_relpath, src_rev)),
            },
        );
        Ok(())
    }

    fn delete_resource(&mut self, activity: &ActivityId, url: &RepoUrl) -> ClientResult<()> {
        self.log_call(format!("delete {url}"));
        let relpath = self.url_relpath(url)?;
        let mut state = self.repo.state.lock().unwrap();
        let txn = Self::transaction_mut(&mut state, activity)?;
        if !txn.tree.contains_key(&relpath) {
            return Err(ClientError::new(
                ErrorKind::FsNotFound,
                format!("cannot delete '{url}': no such resource"),
            ));
        }
        txn.tree.retain(|path, _| !path.starts_with(&relpath));
        txn.changed_paths.insert(
            relpath,
            ChangedPath {
                action: ChangeAction::Deleted,
                copy_from: None,
            },
        );
        Ok(())
    }

    fn checkin(
        &mut self,
        activity: &ActivityId,
        log_message: &str,
    ) -> ClientResult<CheckinResult> {
        self.log_call(format!("checkin {}", activity.0));
        let mut state = self.repo.state.lock().unwrap();
        let txn = state.transactions.remove(&activity.0).ok_or_else(|| {
            ClientError::new(
                ErrorKind::RaRequestFailed,
                format!("unknown activity \"{}\"", activity.0),
            )
        })?;
        let author = self.username.clone();
        let date = Timestamp::now();
        let mut revprops = Props::new();
        revprops.insert("svn:author".to_owned(), BString::from(author.as_str()));
        revprops.insert("svn:log".to_owned(), BString::from(log_message));
        state.revisions.push(RevisionData {
            tree: txn.tree,
            changed_paths: txn.changed_paths,
            revprops,
            date,
        });
        Ok(CheckinResult {
            revision: state.head(),
            date,
            author,
            wcprop_changes: BTreeMap::new(),
        })
    }

    fn abort_activity(&mut self, activity: &ActivityId) -> ClientResult<()> {
        self.log_call(format!("abort-activity {}", activity.0));
        let mut state = self.repo.state.lock().unwrap();
        state.transactions.remove(&activity.0);
        Ok(())
    }
}
