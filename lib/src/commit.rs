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

//! The commit driver.
//!
//! A commit translates working-copy changes into one atomic new revision:
//! harvest the changed entries into commit items, gate on the caller's log
//! message, create a server-side activity, replay the changes as a tree
//! edit whose consumer ([`CommitEditor`]) checks resources out into the
//! activity and mutates them, and finally check the activity in. Anything
//! that fails before check-in aborts the activity and leaves the working
//! copy untouched; failures after check-in are bookkeeping warnings, never
//! errors, because the new revision already exists.

#![expect(missing_docs)]

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;

use bstr::BStr;
use bstr::BString;
use rand::Rng as _;
use slab::Slab;

use crate::checksum::Checksum;
use crate::client::ClientContext;
use crate::client::NotifyAction;
use crate::delta::TextDelta;
use crate::delta::WindowCollector;
use crate::delta::WindowHandler;
use crate::editor::DirToken;
use crate::editor::FileToken;
use crate::editor::TreeEditor;
use crate::editor::ValidatingEditor;
use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;
use crate::ra::ActivityId;
use crate::ra::CheckinResult;
use crate::ra::NodeKind;
use crate::ra::Session;
use crate::ra::WorkingResource;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponent;
use crate::repo_url::RepoUrl;
use crate::repo_url::RepoUrlBuf;
use crate::revision::Revnum;
use crate::revision::Timestamp;
use crate::wc::Schedule;
use crate::wc::WcStore;

/// Which mutations a commit item carries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CommitItemFlags {
    pub add: bool,
    pub delete: bool,
    pub text_mods: bool,
    pub prop_mods: bool,
    pub is_copy: bool,
}

/// One entry of the commit: a changed working-copy node and what changed
/// about it. The log-message callback sees the full item list before any
/// network I/O happens.
#[derive(Clone, Debug)]
pub struct CommitItem {
    pub local_abspath: PathBuf,
    pub kind: NodeKind,
    pub url: RepoUrlBuf,
    pub revision: Revnum,
    pub copyfrom_url: Option<RepoUrlBuf>,
    pub copyfrom_rev: Option<Revnum>,
    pub flags: CommitItemFlags,
    /// Cached repository property changes to record after the commit.
    pub wcprop_changes: Vec<(String, Option<BString>)>,
}

/// The outcome of a commit.
#[derive(Clone, Debug, Default)]
pub struct CommitInfo {
    /// The new revision; `None` when the commit was a no-op.
    pub revision: Option<Revnum>,
    pub date: Option<Timestamp>,
    pub author: Option<String>,
    /// Set when the remote commit succeeded but the working-copy
    /// bookkeeping afterwards did not. The commit itself stands.
    pub post_commit_err: Option<String>,
}

impl CommitInfo {
    /// The result of a commit with nothing to do: no revision, no network
    /// traffic.
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// Walks the working copy under `targets` and produces the commit items.
///
/// Targets are canonicalized and deduplicated; an entry reached through
/// several targets yields one item. Unmodified entries yield none.
pub fn harvest_commit_items(
    store: &dyn WcStore,
    targets: &[PathBuf],
) -> ClientResult<Vec<CommitItem>> {
    let mut entries = BTreeMap::new();
    for target in targets {
        for entry in store.walk_entries(target)? {
            entries.insert(entry.local_abspath.clone(), entry);
        }
    }

    let mut items = Vec::new();
    for entry in entries.into_values() {
        let mut flags = CommitItemFlags::default();
        match entry.schedule {
            Schedule::Normal => {
                flags.text_mods = entry.text_modified;
                flags.prop_mods = entry.props_modified;
            }
            Schedule::Add => {
                flags.add = true;
                flags.is_copy = entry.copyfrom.is_some();
                flags.text_mods = entry.kind == NodeKind::File;
                flags.prop_mods = entry.props_modified;
            }
            Schedule::Delete => {
                flags.delete = true;
            }
            Schedule::Replace => {
                flags.add = true;
                flags.delete = true;
                flags.is_copy = entry.copyfrom.is_some();
                flags.text_mods = entry.kind == NodeKind::File;
                flags.prop_mods = entry.props_modified;
            }
        }
        if flags == CommitItemFlags::default() {
            continue;
        }
        let (copyfrom_url, copyfrom_rev) = match &entry.copyfrom {
            Some((url, rev)) => (Some(url.clone()), Some(*rev)),
            None => (None, None),
        };
        items.push(CommitItem {
            local_abspath: entry.local_abspath,
            kind: entry.kind,
            url: entry.url,
            revision: entry.revision,
            copyfrom_url,
            copyfrom_rev,
            flags,
            wcprop_changes: Vec::new(),
        });
    }
    Ok(items)
}

/// The common URL ancestor of all items: the commit base. When the
/// ancestor is one of the items itself and a file, its parent collection
/// becomes the base.
pub fn commit_base_url(items: &[CommitItem]) -> ClientResult<RepoUrlBuf> {
    let mut iter = items.iter();
    let first = iter
        .next()
        .ok_or_else(|| ClientError::new(ErrorKind::IllegalTarget, "nothing to commit"))?;
    let mut base = first.url.clone();
    for item in iter {
        base = base.common_ancestor(&item.url).ok_or_else(|| {
            ClientError::new(
                ErrorKind::IllegalTarget,
                format!(
                    "commit targets '{}' and '{}' are not in the same repository",
                    base, item.url
                ),
            )
        })?;
    }
    // When the ancestor is itself one of the targets and must be created,
    // deleted, or replaced (or is a file), the edit has to run inside its
    // parent collection.
    let base_needs_parent = items.iter().any(|item| {
        item.url == base
            && (item.kind != NodeKind::Dir || item.flags.add || item.flags.delete)
    });
    if base_needs_parent {
        base = base
            .parent()
            .ok_or_else(|| {
                ClientError::new(
                    ErrorKind::IllegalTarget,
                    format!("cannot commit the repository root '{base}' itself"),
                )
            })?
            .to_owned();
    }
    Ok(base)
}

fn generate_activity_id() -> ActivityId {
    let value: u128 = rand::rng().random();
    ActivityId(format!("{value:032x}"))
}

/// Allocates a fresh activity and creates it on the server, mapping a
/// refusal to the dedicated error kind.
pub(crate) fn begin_commit_activity(session: &mut dyn Session) -> ClientResult<ActivityId> {
    let activity = generate_activity_id();
    session.begin_activity(&activity).map_err(|err| {
        ClientError::with_cause(
            ErrorKind::RaMkactivityFailed,
            "the activity-creation request failed",
            err,
        )
    })?;
    Ok(activity)
}

#[derive(Debug)]
struct DirBaton {
    url: RepoUrlBuf,
    prop_changes: Vec<(String, Option<BString>)>,
}

#[derive(Debug)]
struct FileBaton {
    url: RepoUrlBuf,
    delta: Option<TextDelta>,
    prop_changes: Vec<(String, Option<BString>)>,
}

/// The editor consumer that turns a locally driven tree edit into activity
/// operations against the session: checkout-once per resource, then copy,
/// delete, put, proppatch, or mkcol as the events dictate. `close_edit`
/// checks the activity in and records the parsed [`CheckinResult`].
pub struct CommitEditor<'a> {
    session: &'a mut dyn Session,
    activity: ActivityId,
    base_url: RepoUrlBuf,
    log_message: String,
    dirs: Slab<DirBaton>,
    files: Slab<FileBaton>,
    // LOCAL URL -> working resource; each resource is checked out into the
    // activity at most once per commit.
    resources: HashMap<RepoUrlBuf, WorkingResource>,
    checkin: Option<CheckinResult>,
}

impl<'a> CommitEditor<'a> {
    pub fn new(
        session: &'a mut dyn Session,
        activity: ActivityId,
        base_url: RepoUrlBuf,
        log_message: String,
    ) -> Self {
        Self {
            session,
            activity,
            base_url,
            log_message,
            dirs: Slab::new(),
            files: Slab::new(),
            resources: HashMap::new(),
            checkin: None,
        }
    }

    /// The check-in result, present after a successful `close_edit`.
    pub fn into_checkin(self) -> Option<CheckinResult> {
        self.checkin
    }

    fn checkout(&mut self, url: &RepoUrl) -> ClientResult<WorkingResource> {
        if let Some(resource) = self.resources.get(url) {
            return Ok(resource.clone());
        }
        let resource = self.session.checkout_resource(url, &self.activity)?;
        self.resources.insert(url.to_owned(), resource.clone());
        Ok(resource)
    }

    fn dir_url(&self, dir: DirToken) -> ClientResult<RepoUrlBuf> {
        self.dirs
            .get(dir.0)
            .map(|baton| baton.url.clone())
            .ok_or_else(|| {
                ClientError::new(
                    ErrorKind::EditorProtocolViolation,
                    format!("unknown directory token {}", dir.0),
                )
            })
    }

    fn bad_file_token(file: FileToken) -> ClientError {
        ClientError::new(
            ErrorKind::EditorProtocolViolation,
            format!("unknown file token {}", file.0),
        )
    }
}

impl TreeEditor for CommitEditor<'_> {
    fn open_root(&mut self, _base_rev: Option<Revnum>) -> ClientResult<DirToken> {
        // The commit base collection anchors the whole edit inside the
        // activity.
        let url = self.base_url.clone();
        self.checkout(&url)?;
        let baton = DirBaton {
            url,
            prop_changes: Vec::new(),
        };
        Ok(DirToken(self.dirs.insert(baton)))
    }

    fn delete_entry(
        &mut self,
        name: &RepoPathComponent,
        _base_rev: Option<Revnum>,
        parent: DirToken,
    ) -> ClientResult<()> {
        let parent_url = self.dir_url(parent)?;
        self.checkout(&parent_url)?;
        let target_url = parent_url.join_component(name);
        tracing::debug!(url = %target_url, "commit: delete");
        self.session.delete_resource(&self.activity, &target_url)
    }

    fn add_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<DirToken> {
        let parent_url = self.dir_url(parent)?;
        self.checkout(&parent_url)?;
        let url = parent_url.join_component(name);
        match copy_from {
            Some((src_url, src_rev)) => {
                tracing::debug!(src = %src_url, %src_rev, dst = %url, "commit: copy dir");
                self.session
                    .copy_resource(src_url, src_rev, &self.activity, &url)?;
            }
            None => {
                tracing::debug!(%url, "commit: mkcol");
                self.session.mkcol(&self.activity, &url)?;
            }
        }
        let baton = DirBaton {
            url,
            prop_changes: Vec::new(),
        };
        Ok(DirToken(self.dirs.insert(baton)))
    }

    fn open_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _base_rev: Option<Revnum>,
    ) -> ClientResult<DirToken> {
        let parent_url = self.dir_url(parent)?;
        let baton = DirBaton {
            url: parent_url.join_component(name),
            prop_changes: Vec::new(),
        };
        Ok(DirToken(self.dirs.insert(baton)))
    }

    fn change_dir_prop(
        &mut self,
        dir: DirToken,
        name: &str,
        value: Option<&BStr>,
    ) -> ClientResult<()> {
        let baton = self.dirs.get_mut(dir.0).ok_or_else(|| {
            ClientError::new(
                ErrorKind::EditorProtocolViolation,
                format!("unknown directory token {}", dir.0),
            )
        })?;
        baton
            .prop_changes
            .push((name.to_owned(), value.map(|v| v.to_owned())));
        Ok(())
    }

    fn close_directory(&mut self, dir: DirToken) -> ClientResult<()> {
        let baton = self.dirs.try_remove(dir.0).ok_or_else(|| {
            ClientError::new(
                ErrorKind::EditorProtocolViolation,
                format!("unknown directory token {}", dir.0),
            )
        })?;
        if !baton.prop_changes.is_empty() {
            // Property changes are batched into one proppatch per
            // resource.
            let resource = self.checkout(&baton.url)?;
            tracing::debug!(url = %baton.url, "commit: proppatch dir");
            self.session.proppatch(&resource, &baton.prop_changes)?;
        }
        Ok(())
    }

    fn add_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<FileToken> {
        let parent_url = self.dir_url(parent)?;
        self.checkout(&parent_url)?;
        let url = parent_url.join_component(name);
        if let Some((src_url, src_rev)) = copy_from {
            tracing::debug!(src = %src_url, %src_rev, dst = %url, "commit: copy file");
            self.session
                .copy_resource(src_url, src_rev, &self.activity, &url)?;
        }
        let baton = FileBaton {
            url,
            delta: None,
            prop_changes: Vec::new(),
        };
        Ok(FileToken(self.files.insert(baton)))
    }

    fn open_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _base_rev: Option<Revnum>,
    ) -> ClientResult<FileToken> {
        let parent_url = self.dir_url(parent)?;
        let baton = FileBaton {
            url: parent_url.join_component(name),
            delta: None,
            prop_changes: Vec::new(),
        };
        Ok(FileToken(self.files.insert(baton)))
    }

    fn apply_textdelta(
        &mut self,
        file: FileToken,
        base_checksum: Option<&Checksum>,
    ) -> ClientResult<Box<dyn WindowHandler + '_>> {
        let baton = self
            .files
            .get_mut(file.0)
            .ok_or_else(|| Self::bad_file_token(file))?;
        let delta = baton.delta.insert(TextDelta {
            base_checksum: base_checksum.cloned(),
            windows: Vec::new(),
            result_checksum: None,
        });
        Ok(Box::new(WindowCollector::new(delta)))
    }

    fn change_file_prop(
        &mut self,
        file: FileToken,
        name: &str,
        value: Option<&BStr>,
    ) -> ClientResult<()> {
        let baton = self
            .files
            .get_mut(file.0)
            .ok_or_else(|| Self::bad_file_token(file))?;
        baton
            .prop_changes
            .push((name.to_owned(), value.map(|v| v.to_owned())));
        Ok(())
    }

    fn close_file(
        &mut self,
        file: FileToken,
        text_checksum: Option<&Checksum>,
    ) -> ClientResult<()> {
        let baton = self
            .files
            .try_remove(file.0)
            .ok_or_else(|| Self::bad_file_token(file))?;
        if let Some(mut delta) = baton.delta {
            delta.result_checksum = text_checksum.cloned();
            let resource = self.checkout(&baton.url)?;
            tracing::debug!(url = %baton.url, windows = delta.windows.len(), "commit: put");
            self.session.put(&resource, &delta)?;
        }
        if !baton.prop_changes.is_empty() {
            let resource = self.checkout(&baton.url)?;
            tracing::debug!(url = %baton.url, "commit: proppatch file");
            self.session.proppatch(&resource, &baton.prop_changes)?;
        }
        Ok(())
    }

    fn close_edit(&mut self) -> ClientResult<()> {
        tracing::debug!(activity = %self.activity.0, "commit: checkin");
        let checkin = self.session.checkin(&self.activity, &self.log_message)?;
        self.checkin = Some(checkin);
        Ok(())
    }

    fn abort_edit(&mut self) -> ClientResult<()> {
        tracing::debug!(activity = %self.activity.0, "commit: abort activity");
        self.session.abort_activity(&self.activity)
    }
}

/// Commits the harvested `items`: activity, edit replay, check-in,
/// post-commit bookkeeping. The caller has already gated on the log
/// message.
pub fn drive_commit(
    ctx: &mut ClientContext,
    items: &[CommitItem],
    log_message: String,
) -> ClientResult<CommitInfo> {
    let base_url = commit_base_url(items)?;
    let mut session = ctx.open_session(&base_url)?;
    let activity = begin_commit_activity(session.as_mut())?;

    let editor = CommitEditor::new(session.as_mut(), activity, base_url.clone(), log_message);
    let mut editor = ValidatingEditor::new(editor);

    let result = drive_items(&mut editor, ctx, &base_url, items);
    if let Err(err) = result {
        // Abort the activity so nothing lingers server-side; if even the
        // abort fails, chain that onto the primary error.
        let err = match editor.abort_edit() {
            Ok(()) => err,
            Err(abort_err) => err.chain_cleanup(abort_err),
        };
        return Err(err);
    }

    let checkin = editor.into_inner().into_checkin().ok_or_else(|| {
        ClientError::new(
            ErrorKind::RaRequestFailed,
            "check-in reported success but returned no revision",
        )
    })?;

    // The commit stands from here on. Bookkeeping failures are surfaced as
    // a warning on the result, never as an error.
    let mut post_commit_err = None;
    for item in items {
        // Repository-side targets have no working-copy entry to update.
        if item.local_abspath.as_os_str().is_empty() {
            continue;
        }
        let committed = ctx
            .wc
            .process_committed(
                &item.local_abspath,
                checkin.revision,
                checkin.date,
                &checkin.author,
            )
            .and_then(|()| apply_wcprop_changes(ctx.wc.as_mut(), item, &base_url, &checkin));
        if let Err(err) = committed {
            tracing::warn!(
                path = %item.local_abspath.display(),
                error = %err,
                "post-commit bookkeeping failed"
            );
            post_commit_err.get_or_insert_with(|| {
                format!(
                    "commit succeeded as r{}, but updating '{}' failed: {err}",
                    checkin.revision,
                    item.local_abspath.display()
                )
            });
        }
    }

    Ok(CommitInfo {
        revision: Some(checkin.revision),
        date: Some(checkin.date),
        author: Some(checkin.author),
        post_commit_err,
    })
}

fn apply_wcprop_changes(
    wc: &mut dyn WcStore,
    item: &CommitItem,
    base_url: &RepoUrl,
    checkin: &CheckinResult,
) -> ClientResult<()> {
    let Some(relpath) = base_url.relpath_to(&item.url) else {
        return Ok(());
    };
    if let Some(props) = checkin.wcprop_changes.get(relpath) {
        for (name, value) in props {
            wc.set_wcprop(&item.local_abspath, name, Some(value))?;
        }
    }
    Ok(())
}

/// Replays the commit items as one tree edit, parent before child, opening
/// intermediate directories as needed.
fn drive_items(
    editor: &mut dyn TreeEditor,
    ctx: &mut ClientContext,
    base_url: &RepoUrl,
    items: &[CommitItem],
) -> ClientResult<()> {
    let mut sorted: Vec<(RepoPathBuf, &CommitItem)> = items
        .iter()
        .map(|item| {
            let relpath = base_url.relpath_to(&item.url).ok_or_else(|| {
                ClientError::new(
                    ErrorKind::IllegalTarget,
                    format!("'{}' is not below the commit base '{base_url}'", item.url),
                )
            })?;
            Ok((relpath.to_owned(), item))
        })
        .collect::<ClientResult<_>>()?;
    sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

    let root = editor.open_root(None)?;
    let mut stack: Vec<(RepoPathBuf, DirToken)> = vec![(RepoPathBuf::root(), root)];

    for (relpath, item) in &sorted {
        ctx.check_cancelled()?;

        let Some((parent_path, name)) = relpath.split() else {
            // The commit base itself: only property changes apply here.
            if item.flags.prop_mods {
                let changes = ctx.wc.read_prop_changes(&item.local_abspath)?;
                for (prop_name, value) in &changes {
                    editor.change_dir_prop(root, prop_name, value.as_deref().map(BStr::new))?;
                }
            }
            continue;
        };

        // Close directories that do not enclose this item, then open the
        // missing intermediates down to its parent.
        while !parent_path.starts_with(&stack.last().expect("root stays").0) {
            let (_, token) = stack.pop().expect("non-root to close");
            editor.close_directory(token)?;
        }
        let enclosing = stack.last().expect("root stays").0.clone();
        let remainder = parent_path
            .strip_prefix(&enclosing)
            .expect("loop above stopped at an ancestor")
            .to_owned();
        for component in remainder.components() {
            let (path, parent_token) = {
                let (path, token) = stack.last().expect("root stays");
                (path.clone(), *token)
            };
            let token = editor.open_directory(component, parent_token, None)?;
            stack.push((path.join(component), token));
        }
        let parent_token = stack.last().expect("root stays").1;

        if item.flags.delete {
            editor.delete_entry(name, Some(item.revision), parent_token)?;
            if !item.flags.add {
                ctx.notify(&item.local_abspath, NotifyAction::CommitDeleted);
                continue;
            }
            // Delete followed by add of the same name: a replace.
        }

        let copy_from = match (&item.copyfrom_url, item.copyfrom_rev) {
            (Some(url), Some(rev)) if item.flags.is_copy => Some((url.as_ref(), rev)),
            _ => None,
        };

        match item.kind {
            NodeKind::Dir => {
                let token = if item.flags.add {
                    ctx.notify(&item.local_abspath, NotifyAction::CommitAdded);
                    editor.add_directory(name, parent_token, copy_from)?
                } else {
                    ctx.notify(&item.local_abspath, NotifyAction::CommitModified);
                    editor.open_directory(name, parent_token, Some(item.revision))?
                };
                stack.push((parent_path.join(name), token));
                if item.flags.prop_mods {
                    let changes = ctx.wc.read_prop_changes(&item.local_abspath)?;
                    for (prop_name, value) in &changes {
                        editor.change_dir_prop(token, prop_name, value.as_deref().map(BStr::new))?;
                    }
                }
            }
            NodeKind::File | NodeKind::Symlink => {
                let file = if item.flags.add {
                    ctx.notify(&item.local_abspath, NotifyAction::CommitAdded);
                    editor.add_file(name, parent_token, copy_from)?
                } else {
                    ctx.notify(&item.local_abspath, NotifyAction::CommitModified);
                    editor.open_file(name, parent_token, Some(item.revision))?
                };
                let mut result_checksum = None;
                if item.flags.text_mods {
                    let working = ctx.wc.read_working_text(&item.local_abspath)?;
                    let mut delta = TextDelta::from_contents(&working);
                    if !item.flags.add {
                        let base = ctx.wc.read_text_base(&item.local_abspath)?;
                        delta.base_checksum = Some(Checksum::of_contents(&base));
                    }
                    result_checksum = delta.result_checksum.clone();
                    let mut handler = editor.apply_textdelta(file, delta.base_checksum.as_ref())?;
                    for window in &delta.windows {
                        ctx.check_cancelled()?;
                        handler.window(Some(window))?;
                    }
                    handler.window(None)?;
                }
                if item.flags.prop_mods {
                    let changes = ctx.wc.read_prop_changes(&item.local_abspath)?;
                    for (prop_name, value) in &changes {
                        editor.change_file_prop(file, prop_name, value.as_deref().map(BStr::new))?;
                    }
                }
                editor.close_file(file, result_checksum.as_ref())?;
            }
            NodeKind::None | NodeKind::Unknown => {
                return Err(ClientError::new(
                    ErrorKind::IllegalTarget,
                    format!(
                        "cannot commit '{}': unknown node kind",
                        item.local_abspath.display()
                    ),
                ));
            }
        }
    }

    while let Some((_, token)) = stack.pop() {
        editor.close_directory(token)?;
    }
    editor.close_edit()
}
