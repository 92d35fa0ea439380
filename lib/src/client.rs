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

//! The public operation surface.
//!
//! Every operation takes a [`ClientContext`] carrying the working-copy
//! store, the session opener, and the caller's collaborators: auth,
//! notification sink, log-message callback, configuration, and the
//! cancellation predicate. Argument validation runs before any session or
//! store side effect.

#![expect(missing_docs)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use bstr::BString;
use bstr::ByteSlice as _;

use crate::checksum::Checksum;
use crate::commit::CommitInfo;
use crate::commit::CommitItem;
use crate::commit::CommitItemFlags;
use crate::commit::drive_commit;
use crate::commit::harvest_commit_items;
use crate::conflict::Conflict;
use crate::conflict::OptionId;
use crate::conflict::is_binary_mime_type;
use crate::delta::TextDelta;
use crate::delta::WindowCollector;
use crate::delta::WindowHandler;
use crate::delta::apply_delta;
use crate::diff::SummaryEditor;
use crate::diff::changed_line_region;
use crate::diff::write_unified_diff;
use crate::editor::DirToken;
use crate::editor::FileToken;
use crate::editor::TreeEditor;
use crate::editor::ValidatingEditor;
use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;
use crate::ra::Dirent;
use crate::ra::NodeKind;
use crate::ra::Props;
use crate::ra::Session;
use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponent;
use crate::repo_url::RepoUrl;
use crate::repo_url::RepoUrlBuf;
use crate::revision::Revision;
use crate::revision::Revnum;
use crate::revision::Target;
use crate::revision::check_repository_operative;
use crate::revision::default_peg_revision;
use crate::revision::resolve_revision;
use crate::wc::Operation;
use crate::wc::Schedule;
use crate::wc::WcStore;
use crate::wc_editor::WcEditor;

/// Caller-supplied cancellation predicate, polled between units of work.
pub type CancelPredicate = dyn Fn() -> bool;

/// Receives one notification per processed event, in processing order.
pub type NotifyFn = dyn FnMut(&Notification);

/// Produces the commit log message after seeing the commit items; `None`
/// aborts the commit before any network I/O.
pub type LogMessageFn = dyn FnMut(&[CommitItem]) -> ClientResult<Option<String>>;

/// Opens a session against the repository at `url`.
pub type SessionOpener = dyn FnMut(&RepoUrl, &AuthBaton) -> ClientResult<Box<dyn Session>>;

/// Credentials handed to the session opener.
#[derive(Clone, Debug, Default)]
pub struct AuthBaton {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// What a notification reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotifyAction {
    Add,
    Delete,
    Revert,
    Resolved,
    Skip,
    UpdateAdd,
    UpdateDelete,
    UpdateUpdate,
    UpdateCompleted,
    CommitAdded,
    CommitDeleted,
    CommitModified,
    TextConflict,
    PropConflict,
    TreeConflict,
}

/// One notification to the caller.
#[derive(Clone, Debug)]
pub struct Notification {
    pub path: PathBuf,
    pub action: NotifyAction,
    pub revision: Option<Revnum>,
}

/// The context object threaded through every public operation.
pub struct ClientContext {
    pub wc: Box<dyn WcStore>,
    pub auth: AuthBaton,
    pub notify: Option<Box<NotifyFn>>,
    pub log_message: Option<Box<LogMessageFn>>,
    pub config: BTreeMap<String, String>,
    pub cancel: Option<Box<CancelPredicate>>,
    open_session_fn: Box<SessionOpener>,
}

impl ClientContext {
    pub fn new(wc: Box<dyn WcStore>, open_session: Box<SessionOpener>) -> Self {
        Self {
            wc,
            auth: AuthBaton::default(),
            notify: None,
            log_message: None,
            config: BTreeMap::new(),
            cancel: None,
            open_session_fn: open_session,
        }
    }

    /// Polls the cancellation predicate.
    pub fn check_cancelled(&self) -> ClientResult<()> {
        match &self.cancel {
            Some(cancel) if cancel() => Err(ClientError::cancelled()),
            _ => Ok(()),
        }
    }

    /// Opens a session, checking for cancellation first.
    pub fn open_session(&mut self, url: &RepoUrl) -> ClientResult<Box<dyn Session>> {
        self.check_cancelled()?;
        (self.open_session_fn)(url, &self.auth)
    }

    pub(crate) fn notify(&mut self, path: &Path, action: NotifyAction) {
        self.notify_rev(path, action, None);
    }

    pub(crate) fn notify_rev(&mut self, path: &Path, action: NotifyAction, revision: Option<Revnum>) {
        if let Some(notify) = &mut self.notify {
            notify(&Notification {
                path: path.to_owned(),
                action,
                revision,
            });
        }
    }

    /// Invokes the log-message callback; without one, the message is
    /// empty.
    pub(crate) fn get_log_message(
        &mut self,
        items: &[CommitItem],
    ) -> ClientResult<Option<String>> {
        match &mut self.log_message {
            Some(callback) => callback(items),
            None => Ok(Some(String::new())),
        }
    }
}

/// One row of a status report.
#[derive(Clone, Debug)]
pub struct Status {
    pub local_abspath: PathBuf,
    pub kind: NodeKind,
    pub revision: Revnum,
    pub text_status: StatusKind,
    pub prop_status: StatusKind,
    pub tree_conflicted: bool,
    /// The repository has a newer version of this node.
    pub out_of_date: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusKind {
    None,
    Normal,
    Added,
    Deleted,
    Replaced,
    Modified,
    Conflicted,
}

fn url_of_target(ctx: &ClientContext, target: &Target) -> ClientResult<RepoUrlBuf> {
    match target {
        Target::Url(url) => Ok(url.clone()),
        Target::Path(path) => Ok(ctx.wc.read_entry(path)?.url),
    }
}

/// Applies peg defaulting, and the rule that an unspecified operative
/// revision falls back to the (defaulted) peg.
fn peg_and_operative(target: &Target, peg: Revision, revision: Revision) -> (Revision, Revision) {
    let peg = default_peg_revision(peg, target);
    let revision = match revision {
        Revision::Unspecified => peg,
        other => other,
    };
    (peg, revision)
}

#[expect(clippy::too_many_arguments)]
fn drive_wc_edit(
    ctx: &mut ClientContext,
    session: &mut dyn Session,
    operation: Operation,
    local_path: &Path,
    source_url: RepoUrlBuf,
    base_rev: Option<Revnum>,
    target_rev: Revnum,
    recurse: bool,
    switch_url: Option<&RepoUrl>,
) -> ClientResult<()> {
    let editor = WcEditor::new(
        ctx.wc.as_mut(),
        ctx.notify.as_deref_mut(),
        ctx.cancel.as_deref(),
        operation,
        local_path,
        source_url,
        target_rev,
    );
    let mut editor = ValidatingEditor::new(editor);
    match switch_url {
        Some(switch_url) => session.do_switch(
            base_rev,
            target_rev,
            RepoPath::root(),
            recurse,
            switch_url,
            &mut editor,
        ),
        None => session.do_update(base_rev, target_rev, RepoPath::root(), recurse, &mut editor),
    }
}

/// Creates a fresh working copy of `url` at `local_path`.
///
/// Only `Number`, `Head`, and `Date` revisions are accepted; anything else
/// fails with a bad-revision error before any network traffic.
#[tracing::instrument(skip(ctx))]
pub fn checkout(
    ctx: &mut ClientContext,
    url: &RepoUrl,
    local_path: &Path,
    peg: Revision,
    revision: Revision,
    recurse: bool,
) -> ClientResult<Revnum> {
    let target = Target::Url(url.to_owned());
    let peg = default_peg_revision(peg, &target);
    check_repository_operative(&peg, &target)?;
    check_repository_operative(&revision, &target)?;

    let mut session = ctx.open_session(url)?;
    let rev = resolve_revision(&revision, &target, session.as_mut(), ctx.wc.as_ref())?;
    drive_wc_edit(
        ctx,
        session.as_mut(),
        Operation::Update,
        local_path,
        url.to_owned(),
        None,
        rev,
        recurse,
        None,
    )?;
    ctx.notify_rev(local_path, NotifyAction::UpdateCompleted, Some(rev));
    Ok(rev)
}

/// Brings the working copy at `path` to `revision`.
#[tracing::instrument(skip(ctx))]
pub fn update(
    ctx: &mut ClientContext,
    path: &Path,
    revision: Revision,
    recurse: bool,
) -> ClientResult<Revnum> {
    let target = Target::Path(path.to_owned());
    check_repository_operative(&revision, &target)?;

    let entry = ctx.wc.read_entry(path)?;
    let mut session = ctx.open_session(&entry.url)?;
    let rev = resolve_revision(&revision, &target, session.as_mut(), ctx.wc.as_ref())?;
    drive_wc_edit(
        ctx,
        session.as_mut(),
        Operation::Update,
        path,
        entry.url.clone(),
        Some(entry.revision),
        rev,
        recurse,
        None,
    )?;
    ctx.notify_rev(path, NotifyAction::UpdateCompleted, Some(rev));
    Ok(rev)
}

/// Switches the working copy at `path` to a different URL within the same
/// repository.
#[tracing::instrument(skip(ctx))]
pub fn switch(
    ctx: &mut ClientContext,
    path: &Path,
    switch_url: &RepoUrl,
    revision: Revision,
    recurse: bool,
) -> ClientResult<Revnum> {
    let target = Target::Path(path.to_owned());
    check_repository_operative(&revision, &target)?;

    let entry = ctx.wc.read_entry(path)?;
    if !entry.url.same_root(switch_url) {
        return Err(ClientError::new(
            ErrorKind::IllegalTarget,
            format!("'{switch_url}' is not in the same repository as '{}'", entry.url),
        ));
    }
    let mut session = ctx.open_session(&entry.url)?;
    let rev = resolve_revision(&revision, &target, session.as_mut(), ctx.wc.as_ref())?;
    let old_url = entry.url.clone();
    drive_wc_edit(
        ctx,
        session.as_mut(),
        Operation::Switch,
        path,
        switch_url.to_owned(),
        Some(entry.revision),
        rev,
        recurse,
        Some(switch_url),
    )?;
    // Entries the edit did not touch still point at the old location.
    for entry in ctx.wc.walk_entries(path)? {
        if let Some(tail) = old_url.relpath_to(&entry.url) {
            let new_url = switch_url.join(tail);
            if new_url != entry.url {
                ctx.wc.set_entry_url(&entry.local_abspath, &new_url)?;
            }
        }
    }
    ctx.notify_rev(path, NotifyAction::UpdateCompleted, Some(rev));
    Ok(rev)
}

/// Schedules an unversioned node for addition.
pub fn add(ctx: &mut ClientContext, path: &Path) -> ClientResult<()> {
    ctx.check_cancelled()?;
    ctx.wc.schedule_add(path, NodeKind::Unknown)?;
    ctx.notify(path, NotifyAction::Add);
    Ok(())
}

fn split_targets(targets: &[Target]) -> ClientResult<Result<Vec<RepoUrlBuf>, Vec<PathBuf>>> {
    if targets.iter().all(Target::is_url) {
        Ok(Ok(targets
            .iter()
            .map(|target| match target {
                Target::Url(url) => url.clone(),
                Target::Path(_) => unreachable!(),
            })
            .collect()))
    } else if targets.iter().all(|target| !target.is_url()) {
        Ok(Err(targets
            .iter()
            .map(|target| match target {
                Target::Path(path) => path.clone(),
                Target::Url(_) => unreachable!(),
            })
            .collect()))
    } else {
        Err(ClientError::new(
            ErrorKind::IllegalTarget,
            "cannot mix working-copy paths and URLs in one target list",
        ))
    }
}

/// Gates a repository-side operation on the log message callback.
fn require_log_message(
    ctx: &mut ClientContext,
    items: &[CommitItem],
) -> ClientResult<String> {
    match ctx.get_log_message(items)? {
        Some(message) => Ok(message),
        None => Err(ClientError::new(
            ErrorKind::Cancelled,
            "commit aborted: no log message supplied",
        )),
    }
}

/// Schedules working-copy paths for deletion, or immediately commits a
/// deletion of repository URLs.
#[tracing::instrument(skip(ctx))]
pub fn delete(ctx: &mut ClientContext, targets: &[Target]) -> ClientResult<Option<CommitInfo>> {
    match split_targets(targets)? {
        Err(paths) => {
            for path in &paths {
                ctx.check_cancelled()?;
                ctx.wc.schedule_delete(path)?;
                ctx.notify(path, NotifyAction::Delete);
            }
            Ok(None)
        }
        Ok(urls) => {
            let mut items = Vec::new();
            for url in &urls {
                let mut session = ctx.open_session(url)?;
                let head = session.latest_revision()?;
                let kind = session.check_path(RepoPath::root(), head)?;
                if kind == NodeKind::None {
                    return Err(ClientError::new(
                        ErrorKind::FsNotFound,
                        format!("'{url}' does not exist in the repository"),
                    ));
                }
                items.push(CommitItem {
                    local_abspath: PathBuf::new(),
                    kind,
                    url: url.clone(),
                    revision: head,
                    copyfrom_url: None,
                    copyfrom_rev: None,
                    flags: CommitItemFlags {
                        delete: true,
                        ..Default::default()
                    },
                    wcprop_changes: Vec::new(),
                });
            }
            let message = require_log_message(ctx, &items)?;
            drive_commit(ctx, &items, message).map(Some)
        }
    }
}

/// Schedules new directories for addition, or immediately commits new
/// repository directories.
#[tracing::instrument(skip(ctx))]
pub fn mkdir(ctx: &mut ClientContext, targets: &[Target]) -> ClientResult<Option<CommitInfo>> {
    match split_targets(targets)? {
        Err(paths) => {
            for path in &paths {
                ctx.check_cancelled()?;
                ctx.wc.schedule_add(path, NodeKind::Dir)?;
                ctx.notify(path, NotifyAction::Add);
            }
            Ok(None)
        }
        Ok(urls) => {
            let items: Vec<_> = urls
                .iter()
                .map(|url| CommitItem {
                    local_abspath: PathBuf::new(),
                    kind: NodeKind::Dir,
                    url: url.clone(),
                    revision: Revnum(0),
                    copyfrom_url: None,
                    copyfrom_rev: None,
                    flags: CommitItemFlags {
                        add: true,
                        ..Default::default()
                    },
                    wcprop_changes: Vec::new(),
                })
                .collect();
            let message = require_log_message(ctx, &items)?;
            drive_commit(ctx, &items, message).map(Some)
        }
    }
}

/// Commits the changes under `targets` as one new revision.
///
/// A clean working copy yields a no-op: no activity is created, no network
/// traffic happens, and the returned info carries no revision.
#[tracing::instrument(skip(ctx))]
pub fn commit(ctx: &mut ClientContext, targets: &[PathBuf]) -> ClientResult<CommitInfo> {
    ctx.check_cancelled()?;
    let items = harvest_commit_items(ctx.wc.as_ref(), targets)?;
    if items.is_empty() {
        return Ok(CommitInfo::invalid());
    }
    let message = require_log_message(ctx, &items)?;
    drive_commit(ctx, &items, message)
}

/// Imports an unversioned file or directory tree into the repository at
/// `url`. The working copy is not involved; content comes straight from
/// the filesystem.
#[tracing::instrument(skip(ctx))]
pub fn import(
    ctx: &mut ClientContext,
    local_path: &Path,
    url: &RepoUrl,
    recurse: bool,
) -> ClientResult<CommitInfo> {
    ctx.check_cancelled()?;
    let metadata = std::fs::metadata(local_path).map_err(|err| {
        ClientError::new(
            ErrorKind::FsNotFound,
            format!("cannot import '{}': {err}", local_path.display()),
        )
    })?;

    let mut items = Vec::new();
    collect_import_items(local_path, url, metadata.is_dir(), recurse, &mut items)?;
    let message = require_log_message(ctx, &items)?;

    // The import lands under the parent collection of the target URL.
    let (base_url, name) = url.split().ok_or_else(|| {
        ClientError::new(
            ErrorKind::IllegalTarget,
            format!("cannot import over the repository root '{url}'"),
        )
    })?;
    let mut session = ctx.open_session(base_url)?;
    let activity = crate::commit::begin_commit_activity(session.as_mut())?;
    let editor = crate::commit::CommitEditor::new(
        session.as_mut(),
        activity,
        base_url.to_owned(),
        message,
    );
    let mut editor = ValidatingEditor::new(editor);

    let result = drive_import(&mut editor, ctx, name, local_path, metadata.is_dir(), recurse);
    if let Err(err) = result {
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
    Ok(CommitInfo {
        revision: Some(checkin.revision),
        date: Some(checkin.date),
        author: Some(checkin.author),
        post_commit_err: None,
    })
}

fn drive_import(
    editor: &mut dyn TreeEditor,
    ctx: &mut ClientContext,
    name: &RepoPathComponent,
    local_path: &Path,
    is_dir: bool,
    recurse: bool,
) -> ClientResult<()> {
    let root = editor.open_root(None)?;
    import_node(editor, ctx, root, name, local_path, is_dir, recurse)?;
    editor.close_directory(root)?;
    editor.close_edit()
}

fn import_node(
    editor: &mut dyn TreeEditor,
    ctx: &mut ClientContext,
    parent: DirToken,
    name: &RepoPathComponent,
    fs_path: &Path,
    is_dir: bool,
    recurse: bool,
) -> ClientResult<()> {
    ctx.check_cancelled()?;
    let io_err = |err: std::io::Error| {
        ClientError::new(
            ErrorKind::FsNotFound,
            format!("cannot import '{}': {err}", fs_path.display()),
        )
    };
    if is_dir {
        let dir = editor.add_directory(name, parent, None)?;
        if recurse {
            let mut children: Vec<_> = std::fs::read_dir(fs_path)
                .map_err(io_err)?
                .collect::<Result<_, _>>()
                .map_err(io_err)?;
            children.sort_by_key(std::fs::DirEntry::file_name);
            for child in children {
                let child_name = child.file_name();
                let Some(child_name) = child_name.to_str() else {
                    continue;
                };
                let component = RepoPathComponent::new(child_name)
                    .map_err(|err| ClientError::new(ErrorKind::IllegalTarget, err.to_string()))?;
                let child_is_dir = child.file_type().map_err(io_err)?.is_dir();
                import_node(
                    editor,
                    ctx,
                    dir,
                    component,
                    &child.path(),
                    child_is_dir,
                    recurse,
                )?;
            }
        }
        editor.close_directory(dir)?;
        ctx.notify(fs_path, NotifyAction::CommitAdded);
    } else {
        let file = editor.add_file(name, parent, None)?;
        let contents = std::fs::read(fs_path).map_err(io_err)?;
        let delta = TextDelta::from_contents(&contents);
        {
            let mut handler = editor.apply_textdelta(file, None)?;
            for window in &delta.windows {
                handler.window(Some(window))?;
            }
            handler.window(None)?;
        }
        editor.close_file(file, delta.result_checksum.as_ref())?;
        ctx.notify(fs_path, NotifyAction::CommitAdded);
    }
    Ok(())
}

fn collect_import_items(
    local_path: &Path,
    url: &RepoUrl,
    is_dir: bool,
    recurse: bool,
    items: &mut Vec<CommitItem>,
) -> ClientResult<()> {
    let io_err = |err: std::io::Error| {
        ClientError::new(
            ErrorKind::FsNotFound,
            format!("cannot import '{}': {err}", local_path.display()),
        )
    };
    items.push(CommitItem {
        local_abspath: local_path.to_owned(),
        kind: if is_dir { NodeKind::Dir } else { NodeKind::File },
        url: url.to_owned(),
        revision: Revnum(0),
        copyfrom_url: None,
        copyfrom_rev: None,
        flags: CommitItemFlags {
            add: true,
            text_mods: !is_dir,
            ..Default::default()
        },
        wcprop_changes: Vec::new(),
    });
    if is_dir && recurse {
        let mut children: Vec<_> = std::fs::read_dir(local_path)
            .map_err(io_err)?
            .collect::<Result<_, _>>()
            .map_err(io_err)?;
        children.sort_by_key(std::fs::DirEntry::file_name);
        for child in children {
            let name = child.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let component = RepoPathComponent::new(name).map_err(|err| {
                ClientError::new(ErrorKind::IllegalTarget, err.to_string())
            })?;
            let child_is_dir = child.file_type().map_err(io_err)?.is_dir();
            collect_import_items(
                &child.path(),
                &url.join_component(component),
                child_is_dir,
                recurse,
                items,
            )?;
        }
    }
    Ok(())
}

/// Reports the status of the working copy under `path`; with
/// `against_repo`, also marks nodes the repository has newer versions of
/// and returns the revision the comparison ran against.
#[tracing::instrument(skip(ctx))]
pub fn status(
    ctx: &mut ClientContext,
    path: &Path,
    against_repo: bool,
    recurse: bool,
) -> ClientResult<(Option<Revnum>, Vec<Status>)> {
    ctx.check_cancelled()?;
    let entries = ctx.wc.walk_entries(path)?;
    let mut statuses: Vec<Status> = entries
        .iter()
        .map(|entry| {
            let text_status = if entry.conflicted.text_conflicted {
                StatusKind::Conflicted
            } else {
                match entry.schedule {
                    Schedule::Add => StatusKind::Added,
                    Schedule::Delete => StatusKind::Deleted,
                    Schedule::Replace => StatusKind::Replaced,
                    Schedule::Normal if entry.text_modified => StatusKind::Modified,
                    Schedule::Normal => StatusKind::Normal,
                }
            };
            let prop_status = if !entry.conflicted.conflicted_props.is_empty() {
                StatusKind::Conflicted
            } else if entry.props_modified {
                StatusKind::Modified
            } else {
                StatusKind::None
            };
            Status {
                local_abspath: entry.local_abspath.clone(),
                kind: entry.kind,
                revision: entry.revision,
                text_status,
                prop_status,
                tree_conflicted: entry.conflicted.tree_conflicted,
                out_of_date: false,
            }
        })
        .collect();

    let mut result_rev = None;
    if against_repo {
        let root_entry = ctx.wc.read_entry(path)?;
        let mut session = ctx.open_session(&root_entry.url)?;
        let head = session.latest_revision()?;
        let mut editor = ValidatingEditor::new(SummaryEditor::new());
        session.do_status(root_entry.revision, head, recurse, &mut editor)?;
        for summary in editor.into_inner().into_summaries() {
            let local = summary.path.to_fs_path(path);
            if let Some(status) = statuses
                .iter_mut()
                .find(|status| status.local_abspath == local)
            {
                status.out_of_date = true;
            }
        }
        result_rev = Some(head);
    }
    Ok((result_rev, statuses))
}

/// Streams history of `target` into `receiver`.
#[expect(clippy::too_many_arguments)]
pub fn log(
    ctx: &mut ClientContext,
    target: &Target,
    peg: Revision,
    start: Revision,
    end: Revision,
    limit: Option<usize>,
    discover_changed_paths: bool,
    strict_node_history: bool,
    receiver: &mut crate::ra::LogReceiver<'_>,
) -> ClientResult<()> {
    let (_, start) = peg_and_operative(target, peg, start);
    let end = match end {
        Revision::Unspecified => Revision::Number(Revnum(0)),
        other => other,
    };
    let url = url_of_target(ctx, target)?;
    let mut session = ctx.open_session(&url)?;
    let start = resolve_revision(&start, target, session.as_mut(), ctx.wc.as_ref())?;
    let end = resolve_revision(&end, target, session.as_mut(), ctx.wc.as_ref())?;
    session.get_log(
        &[RepoPathBuf::root()],
        start,
        end,
        limit,
        discover_changed_paths,
        strict_node_history,
        receiver,
    )
}

/// Receives one attributed line: `(line_number, revision, author, line)`.
pub type BlameReceiver<'a> =
    dyn FnMut(usize, Revnum, Option<&str>, &[u8]) -> ClientResult<()> + 'a;

/// Attributes every line of a file to the revision that last changed it.
///
/// Binary files (by their `svn:mime-type`) are rejected.
#[tracing::instrument(skip(ctx, receiver))]
pub fn blame(
    ctx: &mut ClientContext,
    target: &Target,
    peg: Revision,
    start: Revision,
    end: Revision,
    receiver: &mut BlameReceiver<'_>,
) -> ClientResult<()> {
    let (_, end) = peg_and_operative(target, peg, end);
    let start = match start {
        Revision::Unspecified => Revision::Number(Revnum(1)),
        other => other,
    };
    let url = url_of_target(ctx, target)?;
    let mut session = ctx.open_session(&url)?;
    let start = resolve_revision(&start, target, session.as_mut(), ctx.wc.as_ref())?;
    let end = resolve_revision(&end, target, session.as_mut(), ctx.wc.as_ref())?;
    let (low, high) = if start <= end { (start, end) } else { (end, start) };

    let (_, props) = session.get_file(RepoPath::root(), high)?;
    if let Some(mime_type) = props.get("svn:mime-type") {
        let mime_type = String::from_utf8_lossy(mime_type);
        if is_binary_mime_type(&mime_type) {
            return Err(ClientError::new(
                ErrorKind::ClientIsBinaryFile,
                format!("cannot blame '{url}': file is marked as binary ({mime_type})"),
            ));
        }
    }

    // Revisions that touched the file, oldest first.
    let mut revisions = Vec::new();
    session.get_log(
        &[RepoPathBuf::root()],
        high,
        low,
        None,
        false,
        false,
        &mut |entry| {
            revisions.push((entry.revision, entry.author.clone()));
            Ok(())
        },
    )?;
    revisions.sort_by_key(|(rev, _)| *rev);

    let mut text = BString::default();
    let mut attribution: Vec<(Revnum, Option<String>)> = Vec::new();
    for (rev, author) in &revisions {
        ctx.check_cancelled()?;
        let (new_text, _) = session.get_file(RepoPath::root(), *rev)?;
        let (prefix, old_changed, new_changed) = changed_line_region(&text, &new_text);
        let old_line_count = text.lines_with_terminator().count();
        let suffix = old_line_count - prefix - old_changed.len();
        let mut new_attribution = Vec::with_capacity(prefix + new_changed.len() + suffix);
        new_attribution.extend_from_slice(&attribution[..prefix]);
        new_attribution
            .extend(std::iter::repeat_n((*rev, author.clone()), new_changed.len()));
        new_attribution.extend_from_slice(&attribution[old_line_count - suffix..]);
        attribution = new_attribution;
        text = new_text;
    }

    for (line_no, (line, (rev, author))) in
        text.lines_with_terminator().zip(&attribution).enumerate()
    {
        receiver(line_no + 1, *rev, author.as_deref(), line)?;
    }
    Ok(())
}

/// Writes a diff between two pegged locations to `out`.
#[tracing::instrument(skip(ctx, out))]
pub fn diff(
    ctx: &mut ClientContext,
    target1: &Target,
    rev1: Revision,
    target2: &Target,
    rev2: Revision,
    recurse: bool,
    out: &mut dyn Write,
) -> ClientResult<()> {
    let url1 = url_of_target(ctx, target1)?;
    let url2 = url_of_target(ctx, target2)?;
    let mut session = ctx.open_session(&url1)?;
    let rev1 = resolve_revision(&rev1, target1, session.as_mut(), ctx.wc.as_ref())?;
    let rev2 = resolve_revision(&rev2, target2, session.as_mut(), ctx.wc.as_ref())?;

    let mut editor = ValidatingEditor::new(SummaryEditor::new());
    session.do_diff(rev1, rev2, &url2, recurse, &mut editor)?;

    let io_err = |err: std::io::Error| {
        ClientError::new(ErrorKind::RaCreatingRequest, format!("cannot write diff: {err}"))
    };
    for summary in editor.into_inner().into_summaries() {
        ctx.check_cancelled()?;
        if summary.kind == NodeKind::Dir || !summary.text_changed {
            continue;
        }
        let old = match summary.action {
            crate::diff::DiffAction::Added => BString::default(),
            _ => {
                session.reparent(&url1)?;
                session.get_file(&summary.path, rev1).map(|(text, _)| text)?
            }
        };
        let new = match summary.action {
            crate::diff::DiffAction::Deleted => BString::default(),
            _ => {
                session.reparent(&url2)?;
                session.get_file(&summary.path, rev2).map(|(text, _)| text)?
            }
        };
        write_unified_diff(out, &summary.path, Some(rev1), Some(rev2), &old, &new)
            .map_err(io_err)?;
    }
    Ok(())
}

/// Merges the changes between two repository locations into the working
/// copy at `target_wc`, raising conflicts where they clash with local
/// state.
#[tracing::instrument(skip(ctx))]
pub fn merge(
    ctx: &mut ClientContext,
    source1: &RepoUrl,
    rev1: Revision,
    source2: &RepoUrl,
    rev2: Revision,
    target_wc: &Path,
    recurse: bool,
) -> ClientResult<()> {
    let target1 = Target::Url(source1.to_owned());
    let target2 = Target::Url(source2.to_owned());
    let mut session = ctx.open_session(source1)?;
    let rev1 = resolve_revision(&rev1, &target1, session.as_mut(), ctx.wc.as_ref())?;
    let rev2 = resolve_revision(&rev2, &target2, session.as_mut(), ctx.wc.as_ref())?;

    let editor = WcEditor::new(
        ctx.wc.as_mut(),
        ctx.notify.as_deref_mut(),
        ctx.cancel.as_deref(),
        Operation::Merge,
        target_wc,
        source2.to_owned(),
        rev2,
    );
    let mut editor = ValidatingEditor::new(editor);
    session.do_diff(rev1, rev2, source2, recurse, &mut editor)
}

/// Releases stale locks and finishes interrupted operations under `path`.
pub fn cleanup(ctx: &mut ClientContext, path: &Path) -> ClientResult<()> {
    ctx.wc.cleanup(path)
}

/// Rewrites the repository URLs recorded in the working copy, for a
/// repository that moved.
pub fn relocate(
    ctx: &mut ClientContext,
    path: &Path,
    from_prefix: &RepoUrl,
    to_prefix: &RepoUrl,
) -> ClientResult<()> {
    for entry in ctx.wc.walk_entries(path)? {
        ctx.check_cancelled()?;
        let Some(tail) = from_prefix.relpath_to(&entry.url) else {
            return Err(ClientError::new(
                ErrorKind::IllegalTarget,
                format!("'{}' is not below '{from_prefix}'", entry.url),
            ));
        };
        let new_url = to_prefix.join(tail);
        ctx.wc.set_entry_url(&entry.local_abspath, &new_url)?;
    }
    Ok(())
}

/// Discards local modifications, restoring the pristine base.
pub fn revert(ctx: &mut ClientContext, paths: &[PathBuf]) -> ClientResult<()> {
    for path in paths {
        ctx.check_cancelled()?;
        ctx.wc.revert(path)?;
        ctx.notify(path, NotifyAction::Revert);
    }
    Ok(())
}

/// Marks every conflict on `path` resolved to the working-copy state, the
/// way historical clients did. Tree conflicts go through the documented
/// remapping to the situationally correct modern option.
pub fn resolved(ctx: &mut ClientContext, path: &Path) -> ClientResult<()> {
    let mut conflict = Conflict::get(path, ctx.wc.as_ref())?;
    let (text_conflicted, conflicted_props, tree_conflicted) = conflict.get_conflicted();
    if text_conflicted {
        conflict.text_resolve_by_id(OptionId::MergedText, ctx)?;
    }
    if !conflicted_props.is_empty() {
        conflict.prop_resolve_by_id("", OptionId::MergedText, ctx)?;
    }
    if tree_conflicted {
        conflict.tree_resolve_by_id(OptionId::MergedText, ctx)?;
    }
    Ok(())
}

/// Copies a versioned node, preserving its history.
#[tracing::instrument(skip(ctx))]
pub fn copy(
    ctx: &mut ClientContext,
    src: &Target,
    src_rev: Revision,
    dst: &Target,
) -> ClientResult<Option<CommitInfo>> {
    match (src, dst) {
        (Target::Path(src_path), Target::Path(dst_path)) => {
            let entry = ctx.wc.read_entry(src_path)?;
            let contents = match entry.kind {
                NodeKind::File => Some(ctx.wc.read_working_text(src_path)?),
                _ => None,
            };
            ctx.wc.schedule_copy(
                dst_path,
                entry.kind,
                &entry.url,
                entry.revision,
                contents,
            )?;
            ctx.notify(dst_path, NotifyAction::Add);
            Ok(None)
        }
        (Target::Url(src_url), Target::Url(dst_url)) => {
            let mut session = ctx.open_session(src_url)?;
            let rev = resolve_revision(&src_rev, src, session.as_mut(), ctx.wc.as_ref())?;
            let kind = session.check_path(RepoPath::root(), rev)?;
            if kind == NodeKind::None {
                return Err(ClientError::new(
                    ErrorKind::FsNotFound,
                    format!("'{src_url}' does not exist in revision {rev}"),
                ));
            }
            drop(session);
            let items = vec![CommitItem {
                local_abspath: PathBuf::new(),
                kind,
                url: dst_url.clone(),
                revision: Revnum(0),
                copyfrom_url: Some(src_url.clone()),
                copyfrom_rev: Some(rev),
                flags: CommitItemFlags {
                    add: true,
                    is_copy: true,
                    ..Default::default()
                },
                wcprop_changes: Vec::new(),
            }];
            let message = require_log_message(ctx, &items)?;
            drive_commit(ctx, &items, message).map(Some)
        }
        (Target::Url(src_url), Target::Path(dst_path)) => {
            let mut session = ctx.open_session(src_url)?;
            let rev = resolve_revision(&src_rev, src, session.as_mut(), ctx.wc.as_ref())?;
            copy_url_into_wc(ctx, session.as_mut(), src_url, rev, dst_path)?;
            ctx.notify(dst_path, NotifyAction::Add);
            Ok(None)
        }
        (Target::Path(src_path), Target::Url(dst_url)) => {
            let entry = ctx.wc.read_entry(src_path)?;
            let items = vec![CommitItem {
                local_abspath: src_path.clone(),
                kind: entry.kind,
                url: dst_url.clone(),
                revision: entry.revision,
                copyfrom_url: Some(entry.url.clone()),
                copyfrom_rev: Some(entry.revision),
                flags: CommitItemFlags {
                    add: true,
                    is_copy: true,
                    ..Default::default()
                },
                wcprop_changes: Vec::new(),
            }];
            let message = require_log_message(ctx, &items)?;
            drive_commit(ctx, &items, message).map(Some)
        }
    }
}

fn copy_url_into_wc(
    ctx: &mut ClientContext,
    session: &mut dyn Session,
    src_url: &RepoUrl,
    rev: Revnum,
    dst_path: &Path,
) -> ClientResult<()> {
    match session.check_path(RepoPath::root(), rev)? {
        NodeKind::File | NodeKind::Symlink => {
            let (text, _) = session.get_file(RepoPath::root(), rev)?;
            ctx.wc
                .schedule_copy(dst_path, NodeKind::File, &src_url.to_owned(), rev, Some(text))
        }
        NodeKind::Dir => {
            ctx.wc
                .schedule_copy(dst_path, NodeKind::Dir, &src_url.to_owned(), rev, None)?;
            let (dirents, _) = session.get_dir(RepoPath::root(), rev)?;
            for dirent in dirents {
                ctx.check_cancelled()?;
                let child_url = src_url.join_component(&dirent.name);
                session.reparent(&child_url)?;
                copy_url_into_wc(
                    ctx,
                    session,
                    &child_url,
                    rev,
                    &dst_path.join(dirent.name.as_str()),
                )?;
                session.reparent(src_url)?;
            }
            Ok(())
        }
        NodeKind::None | NodeKind::Unknown => Err(ClientError::new(
            ErrorKind::FsNotFound,
            format!("'{src_url}' does not exist in revision {rev}"),
        )),
    }
}

/// Moves a versioned node: a copy that keeps history plus a deletion of
/// the source. Mixing a working-copy side and a URL side is not allowed.
#[tracing::instrument(skip(ctx))]
pub fn rename(
    ctx: &mut ClientContext,
    src: &Target,
    dst: &Target,
) -> ClientResult<Option<CommitInfo>> {
    match (src, dst) {
        (Target::Path(src_path), Target::Path(_)) => {
            copy(ctx, src, Revision::Working, dst)?;
            ctx.wc.schedule_delete(src_path)?;
            ctx.notify(src_path, NotifyAction::Delete);
            Ok(None)
        }
        (Target::Url(src_url), Target::Url(dst_url)) => {
            let mut session = ctx.open_session(src_url)?;
            let head = session.latest_revision()?;
            let kind = session.check_path(RepoPath::root(), head)?;
            if kind == NodeKind::None {
                return Err(ClientError::new(
                    ErrorKind::FsNotFound,
                    format!("'{src_url}' does not exist in the repository"),
                ));
            }
            drop(session);
            let items = vec![
                CommitItem {
                    local_abspath: PathBuf::new(),
                    kind,
                    url: dst_url.clone(),
                    revision: Revnum(0),
                    copyfrom_url: Some(src_url.clone()),
                    copyfrom_rev: Some(head),
                    flags: CommitItemFlags {
                        add: true,
                        is_copy: true,
                        ..Default::default()
                    },
                    wcprop_changes: Vec::new(),
                },
                CommitItem {
                    local_abspath: PathBuf::new(),
                    kind,
                    url: src_url.clone(),
                    revision: head,
                    copyfrom_url: None,
                    copyfrom_rev: None,
                    flags: CommitItemFlags {
                        delete: true,
                        ..Default::default()
                    },
                    wcprop_changes: Vec::new(),
                },
            ];
            let message = require_log_message(ctx, &items)?;
            drive_commit(ctx, &items, message).map(Some)
        }
        _ => Err(ClientError::new(
            ErrorKind::IllegalTarget,
            "cannot move between a working copy and a repository URL",
        )),
    }
}

const EOL_STYLES: [&str; 4] = ["native", "LF", "CR", "CRLF"];

/// Sets (or with `value = None` deletes) a versioned property on a
/// working-copy path. Known `svn:` properties are validated first.
pub fn propset(
    ctx: &mut ClientContext,
    target: &Target,
    name: &str,
    value: Option<&BString>,
) -> ClientResult<()> {
    let Target::Path(path) = target else {
        return Err(ClientError::new(
            ErrorKind::IllegalTarget,
            format!("cannot set property on URL target '{target}'"),
        ));
    };
    if let Some(value) = value {
        if name == "svn:mime-type" {
            let text = value.to_str().ok().filter(|text| {
                let mut parts = text.splitn(2, '/');
                matches!(
                    (parts.next(), parts.next()),
                    (Some(top), Some(sub)) if !top.is_empty() && !sub.is_empty()
                )
            });
            if text.is_none() {
                return Err(ClientError::new(
                    ErrorKind::BadMimeType,
                    format!("invalid MIME type {value:?} for '{}'", path.display()),
                ));
            }
        }
        if name == "svn:eol-style" {
            let text = value.to_str().unwrap_or("");
            if !EOL_STYLES.contains(&text) {
                return Err(ClientError::new(
                    ErrorKind::IoUnknownEol,
                    format!("unknown end-of-line style {value:?} for '{}'", path.display()),
                ));
            }
        }
    }
    ctx.check_cancelled()?;
    ctx.wc.set_prop(path, name, value)
}

/// Reads one versioned property.
pub fn propget(
    ctx: &mut ClientContext,
    target: &Target,
    name: &str,
    revision: Revision,
) -> ClientResult<Option<BString>> {
    match target {
        Target::Path(path) if matches!(revision, Revision::Working | Revision::Unspecified) => {
            ctx.wc.get_prop(path, name)
        }
        _ => Ok(proplist(ctx, target, revision)?.remove(name)),
    }
}

/// Lists all versioned properties.
pub fn proplist(
    ctx: &mut ClientContext,
    target: &Target,
    revision: Revision,
) -> ClientResult<Props> {
    match target {
        Target::Path(path) if matches!(revision, Revision::Working | Revision::Unspecified) => {
            ctx.wc.prop_list(path)
        }
        _ => {
            let url = url_of_target(ctx, target)?;
            let mut session = ctx.open_session(&url)?;
            let rev = resolve_revision(
                &default_peg_revision(revision, &Target::Url(url.clone())),
                &Target::Url(url.clone()),
                session.as_mut(),
                ctx.wc.as_ref(),
            )?;
            match session.check_path(RepoPath::root(), rev)? {
                NodeKind::Dir => session.get_dir(RepoPath::root(), rev).map(|(_, props)| props),
                NodeKind::File | NodeKind::Symlink => {
                    session.get_file(RepoPath::root(), rev).map(|(_, props)| props)
                }
                NodeKind::None | NodeKind::Unknown => Err(ClientError::new(
                    ErrorKind::FsNotFound,
                    format!("'{url}' does not exist in revision {rev}"),
                )),
            }
        }
    }
}

/// Sets an unversioned revision property.
pub fn revprop_set(
    ctx: &mut ClientContext,
    url: &RepoUrl,
    revision: Revision,
    name: &str,
    value: Option<&BString>,
) -> ClientResult<Revnum> {
    let target = Target::Url(url.to_owned());
    let mut session = ctx.open_session(url)?;
    let rev = resolve_revision(&revision, &target, session.as_mut(), ctx.wc.as_ref())?;
    session.change_rev_prop(rev, name, value)?;
    Ok(rev)
}

/// Reads an unversioned revision property.
pub fn revprop_get(
    ctx: &mut ClientContext,
    url: &RepoUrl,
    revision: Revision,
    name: &str,
) -> ClientResult<(Option<BString>, Revnum)> {
    let target = Target::Url(url.to_owned());
    let mut session = ctx.open_session(url)?;
    let rev = resolve_revision(&revision, &target, session.as_mut(), ctx.wc.as_ref())?;
    let value = session.rev_prop(rev, name)?;
    Ok((value, rev))
}

/// Lists all unversioned revision properties.
pub fn revprop_list(
    ctx: &mut ClientContext,
    url: &RepoUrl,
    revision: Revision,
) -> ClientResult<(Props, Revnum)> {
    let target = Target::Url(url.to_owned());
    let mut session = ctx.open_session(url)?;
    let rev = resolve_revision(&revision, &target, session.as_mut(), ctx.wc.as_ref())?;
    let props = session.rev_proplist(rev)?;
    Ok((props, rev))
}

/// Exports a clean tree (no administrative data) to `dst`.
#[tracing::instrument(skip(ctx))]
pub fn export(
    ctx: &mut ClientContext,
    target: &Target,
    peg: Revision,
    revision: Revision,
    dst: &Path,
) -> ClientResult<Revnum> {
    match target {
        Target::Url(url) => {
            let resolved_target = Target::Url(url.clone());
            let (_, revision) = peg_and_operative(&resolved_target, peg, revision);
            check_repository_operative(&revision, &resolved_target)?;
            let mut session = ctx.open_session(url)?;
            let rev =
                resolve_revision(&revision, &resolved_target, session.as_mut(), ctx.wc.as_ref())?;
            let mut editor = ValidatingEditor::new(ExportEditor::new(dst));
            session.do_update(None, rev, RepoPath::root(), true, &mut editor)?;
            Ok(rev)
        }
        Target::Path(path) => {
            let entry = ctx.wc.read_entry(path)?;
            for entry in ctx.wc.walk_entries(path)? {
                ctx.check_cancelled()?;
                let Ok(tail) = entry.local_abspath.strip_prefix(path) else {
                    continue;
                };
                let out_path = dst.join(tail);
                let io_err = |err: std::io::Error| {
                    ClientError::new(
                        ErrorKind::FsNotFound,
                        format!("cannot export to '{}': {err}", out_path.display()),
                    )
                };
                match entry.kind {
                    NodeKind::Dir => std::fs::create_dir_all(&out_path).map_err(io_err)?,
                    _ => {
                        if let Some(parent) = out_path.parent() {
                            std::fs::create_dir_all(parent).map_err(io_err)?;
                        }
                        let text = ctx.wc.read_working_text(&entry.local_abspath)?;
                        std::fs::write(&out_path, &text).map_err(io_err)?;
                    }
                }
            }
            Ok(entry.revision)
        }
    }
}

/// Lists the directory entries (or the single file entry) of a repository
/// location.
pub fn ls(
    ctx: &mut ClientContext,
    target: &Target,
    peg: Revision,
    revision: Revision,
) -> ClientResult<Vec<Dirent>> {
    let (_, revision) = peg_and_operative(target, peg, revision);
    let url = url_of_target(ctx, target)?;
    let mut session = ctx.open_session(&url)?;
    let rev = resolve_revision(&revision, target, session.as_mut(), ctx.wc.as_ref())?;
    match session.check_path(RepoPath::root(), rev)? {
        NodeKind::Dir => session.get_dir(RepoPath::root(), rev).map(|(entries, _)| entries),
        NodeKind::File | NodeKind::Symlink => {
            let (text, _) = session.get_file(RepoPath::root(), rev)?;
            let name = url
                .split()
                .map(|(_, name)| name.to_owned())
                .ok_or_else(|| {
                    ClientError::new(
                        ErrorKind::IllegalTarget,
                        format!("cannot list repository root '{url}' as a file"),
                    )
                })?;
            Ok(vec![Dirent {
                name,
                kind: NodeKind::File,
                size: text.len() as u64,
                created_rev: rev,
            }])
        }
        NodeKind::None | NodeKind::Unknown => Err(ClientError::new(
            ErrorKind::FsNotFound,
            format!("'{url}' does not exist in revision {rev}"),
        )),
    }
}

/// Streams a file's contents at a revision.
pub fn cat(
    ctx: &mut ClientContext,
    target: &Target,
    peg: Revision,
    revision: Revision,
) -> ClientResult<BString> {
    let (_, revision) = peg_and_operative(target, peg, revision);
    let url = url_of_target(ctx, target)?;
    let mut session = ctx.open_session(&url)?;
    let rev = resolve_revision(&revision, target, session.as_mut(), ctx.wc.as_ref())?;
    session.get_file(RepoPath::root(), rev).map(|(text, _)| text)
}

/// The repository URL a target corresponds to.
pub fn url_from_path(ctx: &ClientContext, target: &Target) -> ClientResult<RepoUrlBuf> {
    url_of_target(ctx, target)
}

/// The repository UUID behind a URL.
pub fn uuid_from_url(ctx: &mut ClientContext, url: &RepoUrl) -> ClientResult<String> {
    let session = ctx.open_session(url)?;
    Ok(session.repos_uuid().to_owned())
}

/// The repository UUID behind a working-copy path.
pub fn uuid_from_path(ctx: &ClientContext, path: &Path) -> ClientResult<String> {
    let (_, uuid) = ctx.wc.repos_info(path)?;
    Ok(uuid)
}

/// An editor consumer that writes the incoming tree as plain files under a
/// destination directory; used by export.
struct ExportEditor {
    root: PathBuf,
    dirs: slab::Slab<PathBuf>,
    files: slab::Slab<(PathBuf, Option<TextDelta>)>,
}

impl ExportEditor {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_owned(),
            dirs: slab::Slab::new(),
            files: slab::Slab::new(),
        }
    }

    fn io_err(path: &Path, err: std::io::Error) -> ClientError {
        ClientError::new(
            ErrorKind::FsNotFound,
            format!("cannot export to '{}': {err}", path.display()),
        )
    }

    fn bad_token(token: usize) -> ClientError {
        ClientError::new(
            ErrorKind::EditorProtocolViolation,
            format!("unknown token {token}"),
        )
    }
}

impl TreeEditor for ExportEditor {
    fn open_root(&mut self, _base_rev: Option<Revnum>) -> ClientResult<DirToken> {
        let root = self.root.clone();
        std::fs::create_dir_all(&root).map_err(|err| Self::io_err(&root, err))?;
        Ok(DirToken(self.dirs.insert(root)))
    }

    fn delete_entry(
        &mut self,
        _name: &RepoPathComponent,
        _base_rev: Option<Revnum>,
        _parent: DirToken,
    ) -> ClientResult<()> {
        Ok(())
    }

    fn add_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<DirToken> {
        let parent_path = self.dirs.get(parent.0).ok_or_else(|| Self::bad_token(parent.0))?;
        let path = parent_path.join(name.as_str());
        std::fs::create_dir_all(&path).map_err(|err| Self::io_err(&path, err))?;
        Ok(DirToken(self.dirs.insert(path)))
    }

    fn open_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _base_rev: Option<Revnum>,
    ) -> ClientResult<DirToken> {
        self.add_directory(name, parent, None)
    }

    fn change_dir_prop(
        &mut self,
        _dir: DirToken,
        _name: &str,
        _value: Option<&bstr::BStr>,
    ) -> ClientResult<()> {
        Ok(())
    }

    fn close_directory(&mut self, dir: DirToken) -> ClientResult<()> {
        self.dirs
            .try_remove(dir.0)
            .map(|_| ())
            .ok_or_else(|| Self::bad_token(dir.0))
    }

    fn add_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<FileToken> {
        let parent_path = self.dirs.get(parent.0).ok_or_else(|| Self::bad_token(parent.0))?;
        let path = parent_path.join(name.as_str());
        Ok(FileToken(self.files.insert((path, None))))
    }

    fn open_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _base_rev: Option<Revnum>,
    ) -> ClientResult<FileToken> {
        self.add_file(name, parent, None)
    }

    fn apply_textdelta(
        &mut self,
        file: FileToken,
        base_checksum: Option<&Checksum>,
    ) -> ClientResult<Box<dyn WindowHandler + '_>> {
        let (_, delta) = self.files.get_mut(file.0).ok_or_else(|| Self::bad_token(file.0))?;
        let delta = delta.insert(TextDelta {
            base_checksum: base_checksum.cloned(),
            windows: Vec::new(),
            result_checksum: None,
        });
        Ok(Box::new(WindowCollector::new(delta)))
    }

    fn change_file_prop(
        &mut self,
        _file: FileToken,
        _name: &str,
        _value: Option<&bstr::BStr>,
    ) -> ClientResult<()> {
        Ok(())
    }

    fn close_file(
        &mut self,
        file: FileToken,
        text_checksum: Option<&Checksum>,
    ) -> ClientResult<()> {
        let (path, delta) = self
            .files
            .try_remove(file.0)
            .ok_or_else(|| Self::bad_token(file.0))?;
        if let Some(mut delta) = delta {
            delta.result_checksum = text_checksum.cloned();
            let text = apply_delta(b"", &delta)?;
            std::fs::write(&path, &text).map_err(|err| Self::io_err(&path, err))?;
        }
        Ok(())
    }

    fn close_edit(&mut self) -> ClientResult<()> {
        Ok(())
    }

    fn abort_edit(&mut self) -> ClientResult<()> {
        Ok(())
    }
}

