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

//! Conflict resolution.
//!
//! Applies a [`ResolutionOption`] to a [`Conflict`] under the store's write
//! lock, records the chosen resolution, and clears the conflict markers.
//! Tree conflicts caused by incoming deletions are enriched with the
//! revision that materially caused the change, mined from repository
//! history via the session.

use itertools::Itertools as _;

use crate::client::ClientContext;
use crate::client::NotifyAction;
use crate::conflict::Conflict;
use crate::conflict::IncomingDeleteDetails;
use crate::conflict::OptionId;
use crate::conflict::ResolutionOption;
use crate::conflict::ResolveAction;
use crate::conflict::find_option_by_id;
use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;
use crate::error::compose_results;
use crate::ra::ChangeAction;
use crate::ra::LocationSegment;
use crate::ra::NodeKind;
use crate::ra::Session;
use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::repo_url::RepoUrl;
use crate::revision::Revnum;
use crate::wc::ConflictChoice;
use crate::wc::IncomingChange;
use crate::wc::LocalChange;
use crate::wc::Operation;
use crate::wc::WcStore;

/// The content choice a text/property option id maps to at the store
/// layer.
fn option_id_to_choice(id: OptionId) -> ConflictChoice {
    match id {
        OptionId::Postpone | OptionId::Unspecified => ConflictChoice::Postpone,
        OptionId::BaseText => ConflictChoice::Base,
        OptionId::IncomingText => ConflictChoice::TheirsFull,
        OptionId::WorkingText => ConflictChoice::MineFull,
        OptionId::IncomingTextWhereConflicted => ConflictChoice::TheirsConflict,
        OptionId::WorkingTextWhereConflicted => ConflictChoice::MineConflict,
        OptionId::MergedText
        | OptionId::AcceptCurrentWcState
        | OptionId::UpdateMoveDestination
        | OptionId::UpdateAnyMovedAwayChildren => ConflictChoice::Merged,
    }
}

fn inapplicable_option_error(conflict: &Conflict, id: OptionId) -> ClientError {
    ClientError::new(
        ErrorKind::ClientConflictOptionNotApplicable,
        format!(
            "Inapplicable conflict resolution option \"{}\" given for conflicted path '{}'",
            id.label(),
            conflict.local_abspath().display()
        ),
    )
}

/// Runs `apply` on the store while holding the resolve write lock for
/// `conflict`'s path. A lock-release failure is chained onto the primary
/// error. `sleep` requests the timestamp sleep for resolutions that touch
/// working files.
fn with_resolve_lock(
    ctx: &mut ClientContext,
    conflict: &Conflict,
    sleep: bool,
    apply: impl FnOnce(&mut dyn WcStore) -> ClientResult<()>,
) -> ClientResult<()> {
    ctx.check_cancelled()?;
    let lock_root = ctx
        .wc
        .acquire_write_lock_for_resolve(conflict.local_abspath())?;
    let result = apply(ctx.wc.as_mut());
    let result = compose_results(result, ctx.wc.release_write_lock(&lock_root));
    if sleep {
        ctx.wc.sleep_for_timestamps();
    }
    result
}

impl Conflict {
    /// Resolves this path's text conflict to `option`.
    ///
    /// Resolving a path without a text conflict is a no-op returning
    /// success.
    pub fn text_resolve(
        &mut self,
        option: &ResolutionOption,
        ctx: &mut ClientContext,
    ) -> ClientResult<()> {
        let (text_conflicted, _, _) = self.get_conflicted();
        if !text_conflicted {
            return Ok(());
        }
        match option.action {
            ResolveAction::Postpone => Ok(()),
            ResolveAction::TextChoice => {
                let choice = option_id_to_choice(option.id());
                let path = self.local_abspath().to_owned();
                with_resolve_lock(ctx, self, true, |wc| {
                    wc.mark_text_resolved(&path, choice)
                })?;
                self.resolution_text = option.id();
                if let Some(desc) = &mut self.desc {
                    desc.text = None;
                }
                ctx.notify(&path, NotifyAction::Resolved);
                Ok(())
            }
            _ => Err(inapplicable_option_error(self, option.id())),
        }
    }

    /// Resolves by option id; see [`Conflict::text_resolve`].
    pub fn text_resolve_by_id(
        &mut self,
        id: OptionId,
        ctx: &mut ClientContext,
    ) -> ClientResult<()> {
        let (text_conflicted, _, _) = self.get_conflicted();
        if !text_conflicted {
            return Ok(());
        }
        let options = self.text_get_resolution_options()?;
        let option = find_option_by_id(&options, id)
            .ok_or_else(|| inapplicable_option_error(self, id))?
            .clone();
        self.text_resolve(&option, ctx)
    }

    /// Resolves the named property conflict to `option`. The empty
    /// property name applies the option to every currently conflicted
    /// property on this path.
    pub fn prop_resolve(
        &mut self,
        propname: &str,
        option: &ResolutionOption,
        ctx: &mut ClientContext,
    ) -> ClientResult<()> {
        let (_, conflicted_props, _) = self.get_conflicted();
        if conflicted_props.is_empty() {
            return Ok(());
        }
        match option.action {
            ResolveAction::Postpone => Ok(()),
            ResolveAction::PropChoice => {
                let choice = option_id_to_choice(option.id());
                let path = self.local_abspath().to_owned();
                let merged_value = option.merged_propval().cloned();
                let propname_owned = propname.to_owned();
                with_resolve_lock(ctx, self, true, |wc| {
                    if let Some(value) = &merged_value {
                        wc.set_prop(&path, &propname_owned, Some(value))?;
                    }
                    wc.mark_prop_resolved(&path, &propname_owned, choice)
                })?;
                if let Some(desc) = &mut self.desc {
                    if propname.is_empty() {
                        for name in desc.props.keys() {
                            self.resolved_props.insert(name.clone(), option.id());
                        }
                        desc.props.clear();
                    } else {
                        self.resolved_props.insert(propname.to_owned(), option.id());
                        desc.props.remove(propname);
                    }
                }
                ctx.notify(&path, NotifyAction::Resolved);
                Ok(())
            }
            _ => Err(inapplicable_option_error(self, option.id())),
        }
    }

    /// Resolves by option id; see [`Conflict::prop_resolve`].
    pub fn prop_resolve_by_id(
        &mut self,
        propname: &str,
        id: OptionId,
        ctx: &mut ClientContext,
    ) -> ClientResult<()> {
        let (_, conflicted_props, _) = self.get_conflicted();
        if conflicted_props.is_empty() {
            return Ok(());
        }
        let options = self.prop_get_resolution_options()?;
        let option = find_option_by_id(&options, id)
            .ok_or_else(|| inapplicable_option_error(self, id))?
            .clone();
        self.prop_resolve(propname, &option, ctx)
    }

    /// Resolves this path's tree conflict to `option`.
    ///
    /// Resolving a path without a tree conflict is a no-op returning
    /// success.
    pub fn tree_resolve(
        &mut self,
        option: &ResolutionOption,
        ctx: &mut ClientContext,
    ) -> ClientResult<()> {
        let (_, _, tree_conflicted) = self.get_conflicted();
        if !tree_conflicted {
            return Ok(());
        }
        let path = self.local_abspath().to_owned();
        match option.action {
            ResolveAction::Postpone => return Ok(()),
            ResolveAction::AcceptCurrentWcState => {
                if option.id() != OptionId::AcceptCurrentWcState {
                    return Err(ClientError::new(
                        ErrorKind::WcConflictResolverFailure,
                        format!(
                            "Tree conflict on '{}' can only be resolved to the current working \
                             copy state",
                            path.display()
                        ),
                    ));
                }
                with_resolve_lock(ctx, self, false, |wc| wc.delete_tree_conflict(&path))?;
            }
            ResolveAction::BreakMovedAway => {
                // Accepting the current state while a move (or a delete or
                // replace with moved-away children) is in play must break
                // the move; otherwise its metadata would dangle.
                with_resolve_lock(ctx, self, false, |wc| {
                    wc.update_break_moved_away(&path)?;
                    wc.delete_tree_conflict(&path)
                })?;
            }
            ResolveAction::MovedAwayNode => {
                with_resolve_lock(ctx, self, true, |wc| {
                    wc.update_moved_away_node(&path)?;
                    wc.delete_tree_conflict(&path)
                })?;
            }
            ResolveAction::RaiseMovedAway => {
                with_resolve_lock(ctx, self, false, |wc| {
                    wc.update_raise_moved_away(&path)?;
                    wc.delete_tree_conflict(&path)
                })?;
            }
            ResolveAction::TextChoice | ResolveAction::PropChoice => {
                return Err(inapplicable_option_error(self, option.id()));
            }
        }
        self.resolution_tree = option.id();
        if let Some(desc) = &mut self.desc {
            desc.tree = None;
        }
        ctx.notify(&path, NotifyAction::Resolved);
        Ok(())
    }

    /// Resolves the tree conflict by option id.
    ///
    /// Callers dating from the era before situational tree options may
    /// still pass `working-text-where-conflicted` ("mine-conflict") or
    /// `merged-text`; those are remapped to the situationally correct
    /// modern option before lookup. This is the only implicit remapping
    /// the resolver performs.
    pub fn tree_resolve_by_id(
        &mut self,
        id: OptionId,
        ctx: &mut ClientContext,
    ) -> ClientResult<()> {
        let (_, _, tree_conflicted) = self.get_conflicted();
        if !tree_conflicted {
            return Ok(());
        }

        let mut id = id;
        if id == OptionId::WorkingTextWhereConflicted {
            let operation = self.get_operation();
            if matches!(operation, Operation::Update | Operation::Switch) {
                match self.get_local_change() {
                    LocalChange::MovedAway => {
                        id = OptionId::UpdateMoveDestination;
                    }
                    LocalChange::Deleted | LocalChange::Replaced => {
                        if self.get_incoming_change() == IncomingChange::Edit
                            && self.tree_get_victim_node_kind() == NodeKind::Dir
                        {
                            id = OptionId::UpdateAnyMovedAwayChildren;
                        }
                    }
                    _ => {}
                }
            }
        } else if id == OptionId::MergedText {
            id = OptionId::AcceptCurrentWcState;
        }

        let options = self.tree_get_resolution_options()?;
        let option = find_option_by_id(&options, id)
            .ok_or_else(|| inapplicable_option_error(self, id))?
            .clone();
        self.tree_resolve(&option, ctx)
    }

    /// Fetches the history details for this tree conflict, if its kind has
    /// a details-fetcher. For incoming deletions under update/switch this
    /// determines the revision that deleted (or, for reverse operations,
    /// added) the victim. An undeterminable revision leaves the details
    /// absent; that is not an error.
    pub fn tree_fetch_details(&mut self, ctx: &mut ClientContext) -> ClientResult<()> {
        let (_, _, tree_conflicted) = self.get_conflicted();
        if !tree_conflicted || self.tree_details.is_some() {
            return Ok(());
        }
        if self.get_incoming_change() != IncomingChange::Delete {
            return Ok(());
        }
        let operation = self.get_operation();
        if !matches!(operation, Operation::Update | Operation::Switch) {
            // Merge enrichment is left unspecified; the conflict keeps its
            // generic description.
            return Ok(());
        }
        let Some((root_url, uuid)) = self.get_repos_info() else {
            return Ok(());
        };
        let Some((old_relpath, old_rev, _)) = self.get_incoming_old_repos_location() else {
            return Ok(());
        };
        let Some((new_relpath, new_rev, _)) = self.get_incoming_new_repos_location() else {
            return Ok(());
        };

        tracing::debug!(
            path = %self.local_abspath().display(),
            ?operation,
            %old_rev,
            %new_rev,
            "fetching incoming-delete details"
        );

        let details = match operation {
            Operation::Update => {
                if old_rev < new_rev {
                    fetch_deleted_rev_details(ctx, &root_url, &new_relpath, old_rev, new_rev)?
                } else {
                    fetch_added_rev_details(
                        ctx,
                        &root_url,
                        &old_relpath,
                        &new_relpath,
                        old_rev,
                        new_rev,
                    )?
                }
            }
            Operation::Switch => {
                if old_rev < new_rev {
                    find_deleted_rev_by_log(
                        ctx,
                        &root_url,
                        &uuid,
                        &new_relpath,
                        new_rev,
                        &old_relpath,
                        old_rev,
                    )?
                } else {
                    fetch_added_rev_details(
                        ctx,
                        &root_url,
                        &old_relpath,
                        &new_relpath,
                        old_rev,
                        new_rev,
                    )?
                }
            }
            Operation::Merge | Operation::None => None,
        };
        self.tree_details = details;
        Ok(())
    }

    /// Renders a user-facing description of the tree conflict, using the
    /// fetched details when present and the generic reason/action sentence
    /// otherwise.
    pub fn tree_get_description(&self) -> String {
        let victim_kind = self.tree_get_victim_node_kind();
        let reason = local_reason_str(victim_kind, self.get_local_change());
        let Some(details) = self.tree_get_details() else {
            return self.generic_description(reason);
        };
        let kind_word = node_kind_word(victim_kind);
        let author = &details.rev_author;
        let action = match self.get_operation() {
            Operation::Update => {
                let new_rev = self
                    .get_incoming_new_repos_location()
                    .map_or_else(|| "?".to_owned(), |(_, rev, _)| rev.to_string());
                if let Some(deleted_rev) = details.deleted_rev {
                    format!(
                        "{kind_word} updated to r{new_rev} was deleted or moved by {author} in \
                         r{deleted_rev}"
                    )
                } else {
                    let added_rev = details.added_rev.expect("one of the revisions is set");
                    format!(
                        "{kind_word} updated to r{new_rev} did not exist before it was added by \
                         {author} in r{added_rev}"
                    )
                }
            }
            Operation::Switch => {
                let (old_path, old_rev) = self
                    .get_incoming_old_repos_location()
                    .map_or_else(|| ("?".to_owned(), "?".to_owned()), |(path, rev, _)| {
                        (path.as_str().to_owned(), rev.to_string())
                    });
                let (new_path, new_rev) = self
                    .get_incoming_new_repos_location()
                    .map_or_else(|| ("?".to_owned(), "?".to_owned()), |(path, rev, _)| {
                        (path.as_str().to_owned(), rev.to_string())
                    });
                if let Some(deleted_rev) = details.deleted_rev {
                    format!(
                        "{kind_word} switched from {old_path}@r{old_rev} to {new_path}@r{new_rev} \
                         was deleted or moved by {author} in r{deleted_rev}"
                    )
                } else {
                    let added_rev = details.added_rev.expect("one of the revisions is set");
                    format!(
                        "{kind_word} switched from {old_path}@r{old_rev} to {new_path}@r{new_rev} \
                         did not exist before it was added by {author} in r{added_rev}"
                    )
                }
            }
            Operation::Merge | Operation::None => return self.generic_description(reason),
        };
        format!("{reason}, {action}")
    }

    fn generic_description(&self, reason: String) -> String {
        let action = incoming_action_str(
            self.tree_get_victim_node_kind(),
            self.get_incoming_change(),
        );
        let operation = operation_str(self.get_operation());
        format!("{reason}, {action} {operation}")
    }
}

fn node_kind_word(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Dir => "dir",
        NodeKind::File | NodeKind::Symlink => "file",
        NodeKind::None | NodeKind::Unknown => "item",
    }
}

fn local_reason_str(kind: NodeKind, local_change: LocalChange) -> String {
    let kind_word = node_kind_word(kind);
    let reason = match local_change {
        LocalChange::Edited => "edit",
        LocalChange::Added => "add",
        LocalChange::Deleted => "delete",
        LocalChange::Replaced => "replace",
        LocalChange::Missing => "missing",
        LocalChange::Obstructed => "obstruction",
        LocalChange::Unversioned => "unversioned occupation",
        LocalChange::MovedAway => "moved away",
        LocalChange::MovedHere => "moved here",
    };
    format!("local {kind_word} {reason}")
}

fn incoming_action_str(kind: NodeKind, incoming_change: IncomingChange) -> String {
    let kind_word = node_kind_word(kind);
    let action = match incoming_change {
        IncomingChange::Edit => "edit",
        IncomingChange::Add => "add",
        IncomingChange::Delete => "delete or move",
        IncomingChange::Replace => "replace",
    };
    format!("incoming {kind_word} {action}")
}

fn operation_str(operation: Operation) -> &'static str {
    match operation {
        Operation::Update => "upon update",
        Operation::Switch => "upon switch",
        Operation::Merge => "upon merge",
        Operation::None => "upon none",
    }
}

/// Forward update: the victim was deleted somewhere in `(old_rev,
/// new_rev]`; the repository can answer directly.
fn fetch_deleted_rev_details(
    ctx: &mut ClientContext,
    root_url: &RepoUrl,
    new_relpath: &RepoPath,
    old_rev: Revnum,
    new_rev: Revnum,
) -> ClientResult<Option<IncomingDeleteDetails>> {
    let url = root_url.join(new_relpath);
    let mut session = ctx.open_session(&url)?;
    let Some(deleted_rev) = session.get_deleted_rev(RepoPath::root(), old_rev, new_rev)? else {
        return Ok(None);
    };
    let rev_author = fetch_author(session.as_mut(), deleted_rev)?;
    Ok(Some(IncomingDeleteDetails {
        deleted_rev: Some(deleted_rev),
        added_rev: None,
        repos_relpath: new_relpath.to_owned(),
        rev_author,
    }))
}

/// Reverse update/switch: the "deletion" is the reverse application of the
/// victim's addition. The first location segment's start revision is where
/// the node was added.
fn fetch_added_rev_details(
    ctx: &mut ClientContext,
    root_url: &RepoUrl,
    old_relpath: &RepoPath,
    new_relpath: &RepoPath,
    old_rev: Revnum,
    new_rev: Revnum,
) -> ClientResult<Option<IncomingDeleteDetails>> {
    let url = root_url.join(old_relpath);
    let mut session = ctx.open_session(&url)?;
    let mut added_rev = None;
    session.get_location_segments(
        RepoPath::root(),
        old_rev,
        old_rev,
        new_rev,
        &mut |segment: &LocationSegment| {
            if segment.path.is_some() {
                // Not interested in gaps; the oldest non-gap segment wins.
                added_rev = Some(segment.range_start);
            }
            Ok(())
        },
    )?;
    let Some(added_rev) = added_rev else {
        return Ok(None);
    };
    let rev_author = fetch_author(session.as_mut(), added_rev)?;
    Ok(Some(IncomingDeleteDetails {
        deleted_rev: None,
        added_rev: Some(added_rev),
        repos_relpath: new_relpath.to_owned(),
        rev_author,
    }))
}

/// Forward switch: the deletion happened on the branch switched to, at an
/// unknown revision. Scan the parent's log from `new_rev` down; each
/// deleted or replaced entry occupying the victim's path is confirmed by
/// an ancestry check against the node switched away from. The first
/// confirmed match wins and the log is stopped early via a cancellation
/// signal.
fn find_deleted_rev_by_log(
    ctx: &mut ClientContext,
    root_url: &RepoUrl,
    _uuid: &str,
    new_relpath: &RepoPath,
    new_rev: Revnum,
    old_relpath: &RepoPath,
    old_rev: Revnum,
) -> ClientResult<Option<IncomingDeleteDetails>> {
    let parent_relpath = new_relpath.parent().unwrap_or(RepoPath::root());
    let url = root_url.join(parent_relpath);
    let mut session = ctx.open_session(&url)?;

    let mut deleted_rev = None;
    let result = {
        let ctx = &mut *ctx;
        let deleted_rev = &mut deleted_rev;
        session.get_log(
            &[RepoPathBuf::root()],
            new_rev,
            Revnum(0),
            None,
            true, // need the changed paths list
            false,
            &mut |entry| {
                ctx.check_cancelled()?;
                let Some(changed_paths) = &entry.changed_paths else {
                    return Ok(());
                };
                for (path, change) in changed_paths {
                    if !matches!(change.action, ChangeAction::Deleted | ChangeAction::Replaced) {
                        continue;
                    }
                    if path.as_ref() != new_relpath {
                        continue;
                    }
                    // A deleted node occupies the right path; make sure it
                    // is ancestrally related to the node we switched away
                    // from before trusting it.
                    let Some(predecessor) = entry.revision.previous() else {
                        continue;
                    };
                    let yca = youngest_common_ancestor(
                        ctx,
                        root_url,
                        (old_relpath, old_rev),
                        (new_relpath, predecessor),
                    )?;
                    if yca.is_some() {
                        *deleted_rev = Some(entry.revision);
                        // Stop the log walk; the driver below unwraps this
                        // deliberate cancellation.
                        return Err(ClientError::cancelled());
                    }
                }
                Ok(())
            },
        )
    };
    match result {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::Cancelled && deleted_rev.is_some() => {
            // Log walk was aborted because we found the revision.
        }
        Err(err) => return Err(err),
    }
    let Some(deleted_rev) = deleted_rev else {
        return Ok(None);
    };
    let rev_author = fetch_author(session.as_mut(), deleted_rev)?;
    Ok(Some(IncomingDeleteDetails {
        deleted_rev: Some(deleted_rev),
        added_rev: None,
        repos_relpath: new_relpath.to_owned(),
        rev_author,
    }))
}

fn fetch_author(session: &mut dyn Session, rev: Revnum) -> ClientResult<String> {
    let author = session.rev_prop(rev, "svn:author")?;
    Ok(author
        .map(|value| String::from_utf8_lossy(&value).into_owned())
        .unwrap_or_default())
}

/// Computes the youngest common ancestor of two repository coordinates:
/// the latest location from which both descend by copy history. Returns
/// `None` when the coordinates are unrelated.
pub fn youngest_common_ancestor(
    ctx: &mut ClientContext,
    root_url: &RepoUrl,
    loc1: (&RepoPath, Revnum),
    loc2: (&RepoPath, Revnum),
) -> ClientResult<Option<(RepoPathBuf, Revnum)>> {
    let segments1 = collect_location_segments(ctx, root_url, loc1.0, loc1.1)?;
    let segments2 = collect_location_segments(ctx, root_url, loc2.0, loc2.1)?;

    let candidates = segments1
        .iter()
        .cartesian_product(segments2.iter())
        .filter_map(|(s1, s2)| {
            let path1 = s1.path.as_ref()?;
            let path2 = s2.path.as_ref()?;
            if path1 != path2 {
                return None;
            }
            let start = s1.range_start.max(s2.range_start);
            let end = s1.range_end.min(s2.range_end);
            (start <= end).then(|| (path1.clone(), end))
        });
    Ok(candidates.max_by_key(|(_, rev)| *rev))
}

fn collect_location_segments(
    ctx: &mut ClientContext,
    root_url: &RepoUrl,
    relpath: &RepoPath,
    peg: Revnum,
) -> ClientResult<Vec<LocationSegment>> {
    let url = root_url.join(relpath);
    let mut session = match ctx.open_session(&url) {
        Ok(session) => session,
        // The node may not exist at its peg on this side; unrelated then.
        Err(err) if err.kind() == ErrorKind::FsNotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut segments = Vec::new();
    let result = session.get_location_segments(
        RepoPath::root(),
        peg,
        peg,
        Revnum(0),
        &mut |segment: &LocationSegment| {
            segments.push(segment.clone());
            Ok(())
        },
    );
    match result {
        Ok(()) => Ok(segments),
        // The node does not exist at its peg on this side: unrelated.
        Err(err) if err.kind() == ErrorKind::FsNotFound => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}
