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

//! The conflict model.
//!
//! A [`Conflict`] aggregates everything conflicted about one working-copy
//! path: at most one text conflict, any number of named property conflicts,
//! and at most one tree conflict. It enumerates the applicable
//! [`ResolutionOption`]s per conflict kind and situation and records which
//! option each conflict was resolved to. Applying an option is the
//! resolver's job (see [`crate::resolver`]).

#![expect(missing_docs)]

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use bstr::BString;

use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;
use crate::ra::NodeKind;
use crate::repo_path::RepoPathBuf;
use crate::repo_url::RepoUrlBuf;
use crate::revision::Revnum;
use crate::wc::ConflictDescriptor;
use crate::wc::IncomingChange;
use crate::wc::LocalChange;
use crate::wc::Operation;
use crate::wc::PropConflictDesc;
use crate::wc::TextConflictDesc;
use crate::wc::WcStore;

/// Identifier of a resolution option. The labels returned by
/// [`OptionId::label`] are stable.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OptionId {
    /// No resolution recorded yet.
    Unspecified,
    /// Skip the conflict and leave it unresolved.
    Postpone,
    /// The pristine base version.
    BaseText,
    /// The full incoming version.
    IncomingText,
    /// The full working version.
    WorkingText,
    /// The incoming version where the texts conflict, the merged result
    /// elsewhere.
    IncomingTextWhereConflicted,
    /// The working version where the texts conflict, the merged result
    /// elsewhere.
    WorkingTextWhereConflicted,
    /// The merged file or value as it currently appears in the working
    /// copy.
    MergedText,
    /// Accept the current working copy state (tree conflicts).
    AcceptCurrentWcState,
    /// Apply the incoming edit to the local move destination.
    UpdateMoveDestination,
    /// Raise conflicts on children moved out of a deleted or replaced
    /// directory.
    UpdateAnyMovedAwayChildren,
}

impl OptionId {
    pub fn label(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Postpone => "postpone",
            Self::BaseText => "base-text",
            Self::IncomingText => "incoming-text",
            Self::WorkingText => "working-text",
            Self::IncomingTextWhereConflicted => "incoming-text-where-conflicted",
            Self::WorkingTextWhereConflicted => "working-text-where-conflicted",
            Self::MergedText => "merged-text",
            Self::AcceptCurrentWcState => "accept-current-wc-state",
            Self::UpdateMoveDestination => "update-move-destination",
            Self::UpdateAnyMovedAwayChildren => "update-any-moved-away-children",
        }
    }
}

/// How the resolver applies an option. Resolved at enumeration time so the
/// situational substitutions are decided exactly once.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ResolveAction {
    Postpone,
    TextChoice,
    PropChoice,
    AcceptCurrentWcState,
    /// Accept the current state, breaking moves so no dangling move
    /// metadata remains.
    BreakMovedAway,
    RaiseMovedAway,
    MovedAwayNode,
}

/// One applicable resolution for a conflict.
#[derive(Clone, Debug)]
pub struct ResolutionOption {
    id: OptionId,
    description: &'static str,
    pub(crate) action: ResolveAction,
    merged_propval: Option<BString>,
}

impl ResolutionOption {
    fn new(id: OptionId, description: &'static str, action: ResolveAction) -> Self {
        Self {
            id,
            description,
            action,
            merged_propval: None,
        }
    }

    pub fn id(&self) -> OptionId {
        self.id
    }

    /// A user-facing, single-sentence description of the option.
    pub fn describe(&self) -> &'static str {
        self.description
    }

    /// Supplies the merged property value used when resolving a property
    /// conflict to [`OptionId::MergedText`].
    pub fn set_merged_propval(&mut self, value: BString) {
        self.merged_propval = Some(value);
    }

    pub fn merged_propval(&self) -> Option<&BString> {
        self.merged_propval.as_ref()
    }
}

/// History details for a tree conflict caused by an incoming deletion.
/// Exactly one of `deleted_rev` and `added_rev` is set: a reverse-direction
/// operation turns an addition into the incoming delete.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IncomingDeleteDetails {
    pub deleted_rev: Option<Revnum>,
    pub added_rev: Option<Revnum>,
    pub repos_relpath: RepoPathBuf,
    pub rev_author: String,
}

/// All conflicts recorded on one working-copy path.
///
/// A `Conflict` has no identity beyond the path and the store contents;
/// recreating it yields the same object, modulo details populated lazily by
/// [`Conflict::tree_get_details`].
#[derive(Debug)]
pub struct Conflict {
    pub(crate) local_abspath: PathBuf,
    pub(crate) desc: Option<ConflictDescriptor>,
    pub(crate) tree_details: Option<IncomingDeleteDetails>,
    pub(crate) resolution_text: OptionId,
    pub(crate) resolution_tree: OptionId,
    pub(crate) resolved_props: BTreeMap<String, OptionId>,
}

impl Conflict {
    /// Creates the conflict object for `path` from the store's conflict
    /// descriptors. A path without conflicts yields an object whose
    /// [`Conflict::get_conflicted`] reports nothing; resolving it is a
    /// no-op.
    pub fn get(path: &Path, store: &dyn WcStore) -> ClientResult<Self> {
        let desc = store.read_conflicts(path)?;
        Ok(Self {
            local_abspath: path.to_owned(),
            desc,
            tree_details: None,
            resolution_text: OptionId::Unspecified,
            resolution_tree: OptionId::Unspecified,
            resolved_props: BTreeMap::new(),
        })
    }

    pub fn local_abspath(&self) -> &Path {
        &self.local_abspath
    }

    /// Which conflict kinds are present: `(text, conflicted property
    /// names, tree)`.
    pub fn get_conflicted(&self) -> (bool, Vec<String>, bool) {
        let Some(desc) = &self.desc else {
            return (false, Vec::new(), false);
        };
        (
            desc.text.is_some(),
            desc.props.keys().cloned().collect(),
            desc.tree.is_some(),
        )
    }

    pub fn get_operation(&self) -> Operation {
        self.desc
            .as_ref()
            .map_or(Operation::None, |desc| desc.operation)
    }

    pub fn get_incoming_change(&self) -> IncomingChange {
        self.desc
            .as_ref()
            .map_or(IncomingChange::Edit, |desc| desc.incoming_change)
    }

    pub fn get_local_change(&self) -> LocalChange {
        self.desc
            .as_ref()
            .map_or(LocalChange::Edited, |desc| desc.local_change)
    }

    /// The repository root URL and UUID, from whichever incoming coordinate
    /// is known.
    pub fn get_repos_info(&self) -> Option<(RepoUrlBuf, String)> {
        let desc = self.desc.as_ref()?;
        let coord = desc.left.as_ref().or(desc.right.as_ref())?;
        Some((coord.root_url.clone(), coord.uuid.clone()))
    }

    /// The incoming change's old coordinate: `(relpath, revision, kind)`.
    pub fn get_incoming_old_repos_location(&self) -> Option<(RepoPathBuf, Revnum, NodeKind)> {
        let coord = self.desc.as_ref()?.left.as_ref()?;
        Some((coord.relpath.clone(), coord.revision, coord.kind))
    }

    /// The incoming change's new coordinate: `(relpath, revision, kind)`.
    pub fn get_incoming_new_repos_location(&self) -> Option<(RepoPathBuf, Revnum, NodeKind)> {
        let coord = self.desc.as_ref()?.right.as_ref()?;
        Some((coord.relpath.clone(), coord.revision, coord.kind))
    }

    pub fn text_get_mime_type(&self) -> Option<&str> {
        let text = self.desc.as_ref()?.text.as_ref()?;
        text.mime_type.as_deref()
    }

    /// The on-disk artifacts of the text conflict: pristine base, working
    /// file, and incoming old/new texts.
    pub fn text_get_contents(&self) -> ClientResult<&TextConflictDesc> {
        self.desc
            .as_ref()
            .and_then(|desc| desc.text.as_ref())
            .ok_or_else(|| self.not_conflicted_error("text"))
    }

    /// The recorded values of one conflicted property.
    pub fn prop_get_propvals(&self, propname: &str) -> ClientResult<&PropConflictDesc> {
        self.desc
            .as_ref()
            .and_then(|desc| desc.props.get(propname))
            .ok_or_else(|| {
                ClientError::new(
                    ErrorKind::WcConflictResolverFailure,
                    format!(
                        "property \"{propname}\" is not in conflict on '{}'",
                        self.local_abspath.display()
                    ),
                )
            })
    }

    pub fn tree_get_victim_node_kind(&self) -> NodeKind {
        self.desc
            .as_ref()
            .and_then(|desc| desc.tree.as_ref())
            .map_or(NodeKind::Unknown, |tree| tree.victim_kind)
    }

    /// The lazily fetched incoming-delete details, if enrichment ran and
    /// succeeded.
    pub fn tree_get_details(&self) -> Option<&IncomingDeleteDetails> {
        self.tree_details.as_ref()
    }

    pub fn text_get_resolution(&self) -> OptionId {
        self.resolution_text
    }

    pub fn tree_get_resolution(&self) -> OptionId {
        self.resolution_tree
    }

    pub fn prop_get_resolution(&self, propname: &str) -> OptionId {
        self.resolved_props
            .get(propname)
            .copied()
            .unwrap_or(OptionId::Unspecified)
    }

    pub(crate) fn not_conflicted_error(&self, kind: &str) -> ClientError {
        ClientError::new(
            ErrorKind::WcConflictResolverFailure,
            format!(
                "no {kind} conflict on '{}'",
                self.local_abspath.display()
            ),
        )
    }

    /// The options applicable to this path's text conflict. Binary files
    /// offer the reduced set without region-level choices.
    pub fn text_get_resolution_options(&self) -> ClientResult<Vec<ResolutionOption>> {
        let text = self.text_get_contents()?;
        let binary = text
            .mime_type
            .as_deref()
            .is_some_and(is_binary_mime_type);
        let options = if binary {
            vec![
                ResolutionOption::new(
                    OptionId::Postpone,
                    "skip this conflict and leave it unresolved",
                    ResolveAction::Postpone,
                ),
                ResolutionOption::new(
                    OptionId::IncomingText,
                    "accept incoming version of binary file",
                    ResolveAction::TextChoice,
                ),
                ResolutionOption::new(
                    OptionId::WorkingText,
                    "accept working copy version of binary file",
                    ResolveAction::TextChoice,
                ),
                ResolutionOption::new(
                    OptionId::MergedText,
                    "accept the file as it appears in the working copy",
                    ResolveAction::TextChoice,
                ),
            ]
        } else {
            vec![
                ResolutionOption::new(
                    OptionId::Postpone,
                    "skip this conflict and leave it unresolved",
                    ResolveAction::Postpone,
                ),
                ResolutionOption::new(
                    OptionId::BaseText,
                    "discard local and incoming changes for this file",
                    ResolveAction::TextChoice,
                ),
                ResolutionOption::new(
                    OptionId::IncomingText,
                    "accept incoming version of entire file",
                    ResolveAction::TextChoice,
                ),
                ResolutionOption::new(
                    OptionId::WorkingText,
                    "reject all incoming changes for this file",
                    ResolveAction::TextChoice,
                ),
                ResolutionOption::new(
                    OptionId::IncomingTextWhereConflicted,
                    "accept changes only where they conflict",
                    ResolveAction::TextChoice,
                ),
                ResolutionOption::new(
                    OptionId::WorkingTextWhereConflicted,
                    "reject changes which conflict and accept the rest",
                    ResolveAction::TextChoice,
                ),
                ResolutionOption::new(
                    OptionId::MergedText,
                    "accept the file as it appears in the working copy",
                    ResolveAction::TextChoice,
                ),
            ]
        };
        Ok(options)
    }

    /// The options applicable to this path's property conflicts.
    pub fn prop_get_resolution_options(&self) -> ClientResult<Vec<ResolutionOption>> {
        if self.desc.as_ref().is_none_or(|desc| desc.props.is_empty()) {
            return Err(self.not_conflicted_error("property"));
        }
        Ok(vec![
            ResolutionOption::new(
                OptionId::Postpone,
                "skip this conflict and leave it unresolved",
                ResolveAction::PropChoice,
            ),
            ResolutionOption::new(
                OptionId::BaseText,
                "discard local and incoming changes for this property",
                ResolveAction::PropChoice,
            ),
            ResolutionOption::new(
                OptionId::IncomingText,
                "accept incoming version of entire property value",
                ResolveAction::PropChoice,
            ),
            ResolutionOption::new(
                OptionId::WorkingText,
                "accept working copy version of entire property value",
                ResolveAction::PropChoice,
            ),
            ResolutionOption::new(
                OptionId::IncomingTextWhereConflicted,
                "accept changes only where they conflict",
                ResolveAction::PropChoice,
            ),
            ResolutionOption::new(
                OptionId::WorkingTextWhereConflicted,
                "reject changes which conflict and accept the rest",
                ResolveAction::PropChoice,
            ),
            ResolutionOption::new(
                OptionId::MergedText,
                "accept merged version of property value",
                ResolveAction::PropChoice,
            ),
        ])
    }

    /// The options applicable to this path's tree conflict. Always offers
    /// postpone and accept-current-wc-state; update/switch situations add
    /// the automated move-repair options.
    pub fn tree_get_resolution_options(&self) -> ClientResult<Vec<ResolutionOption>> {
        let desc = self
            .desc
            .as_ref()
            .filter(|desc| desc.tree.is_some())
            .ok_or_else(|| self.not_conflicted_error("tree"))?;
        let operation = desc.operation;
        let local_change = desc.local_change;
        let incoming_change = desc.incoming_change;
        let victim_kind = self.tree_get_victim_node_kind();

        let mut options = vec![ResolutionOption::new(
            OptionId::Postpone,
            "skip this conflict and leave it unresolved",
            ResolveAction::Postpone,
        )];

        // Accepting the current state must break moves when the local
        // change moved, deleted, or replaced the victim under an incoming
        // edit; otherwise such moves would be left half-completed.
        let update_like = matches!(operation, Operation::Update | Operation::Switch);
        let accept_action = if update_like
            && matches!(
                local_change,
                LocalChange::MovedAway | LocalChange::Deleted | LocalChange::Replaced
            )
            && incoming_change == IncomingChange::Edit
        {
            ResolveAction::BreakMovedAway
        } else {
            ResolveAction::AcceptCurrentWcState
        };
        options.push(ResolutionOption::new(
            OptionId::AcceptCurrentWcState,
            "accept current working copy state",
            accept_action,
        ));

        if update_like {
            if local_change == LocalChange::MovedAway && incoming_change == IncomingChange::Edit {
                options.push(ResolutionOption::new(
                    OptionId::UpdateMoveDestination,
                    "apply incoming changes to move destination",
                    ResolveAction::MovedAwayNode,
                ));
            } else if matches!(
                local_change,
                LocalChange::Deleted | LocalChange::Replaced
            ) && incoming_change == IncomingChange::Edit
                && victim_kind == NodeKind::Dir
            {
                options.push(ResolutionOption::new(
                    OptionId::UpdateAnyMovedAwayChildren,
                    "prepare for updating moved-away children, if any",
                    ResolveAction::RaiseMovedAway,
                ));
            }
        }

        Ok(options)
    }
}

/// Finds an option by id within an enumerated option set.
pub fn find_option_by_id(
    options: &[ResolutionOption],
    id: OptionId,
) -> Option<&ResolutionOption> {
    options.iter().find(|option| option.id() == id)
}

/// Whether a MIME type names binary content. Text types are `text/*`,
/// XML-flavored types, and a couple of historically text-ish image
/// formats; everything else is treated as binary.
pub fn is_binary_mime_type(mime_type: &str) -> bool {
    let text = mime_type.starts_with("text/")
        || mime_type.ends_with("+xml")
        || matches!(mime_type, "image/x-xbitmap" | "image/x-xpixmap");
    !text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wc::TreeConflictDesc;

    fn tree_conflict_desc(
        operation: Operation,
        local_change: LocalChange,
        incoming_change: IncomingChange,
        victim_kind: NodeKind,
    ) -> ConflictDescriptor {
        ConflictDescriptor {
            operation,
            incoming_change,
            local_change,
            left: None,
            right: None,
            text: None,
            props: BTreeMap::new(),
            tree: Some(TreeConflictDesc { victim_kind }),
        }
    }

    fn conflict_with(desc: ConflictDescriptor) -> Conflict {
        Conflict {
            local_abspath: PathBuf::from("/wc/victim"),
            desc: Some(desc),
            tree_details: None,
            resolution_text: OptionId::Unspecified,
            resolution_tree: OptionId::Unspecified,
            resolved_props: BTreeMap::new(),
        }
    }

    fn text_conflict_desc(mime_type: Option<&str>) -> ConflictDescriptor {
        ConflictDescriptor {
            operation: Operation::Update,
            incoming_change: IncomingChange::Edit,
            local_change: LocalChange::Edited,
            left: None,
            right: None,
            text: Some(TextConflictDesc {
                mime_type: mime_type.map(str::to_owned),
                base_path: PathBuf::from("/wc/a.txt.r10"),
                working_path: PathBuf::from("/wc/a.txt.mine"),
                incoming_old_path: PathBuf::from("/wc/a.txt.r10"),
                incoming_new_path: PathBuf::from("/wc/a.txt.r12"),
            }),
            props: BTreeMap::new(),
            tree: None,
        }
    }

    #[test]
    fn test_binary_mime_classifier() {
        assert!(!is_binary_mime_type("text/plain"));
        assert!(!is_binary_mime_type("image/svg+xml"));
        assert!(is_binary_mime_type("application/octet-stream"));
        assert!(is_binary_mime_type("image/png"));
    }

    #[test]
    fn test_text_options_for_plain_file() {
        let conflict = conflict_with(text_conflict_desc(Some("text/plain")));
        let options = conflict.text_get_resolution_options().unwrap();
        let ids: Vec<_> = options.iter().map(|o| o.id()).collect();
        assert_eq!(
            ids,
            vec![
                OptionId::Postpone,
                OptionId::BaseText,
                OptionId::IncomingText,
                OptionId::WorkingText,
                OptionId::IncomingTextWhereConflicted,
                OptionId::WorkingTextWhereConflicted,
                OptionId::MergedText,
            ]
        );
    }

    #[test]
    fn test_text_options_for_binary_file() {
        let conflict = conflict_with(text_conflict_desc(Some("application/octet-stream")));
        let options = conflict.text_get_resolution_options().unwrap();
        let ids: Vec<_> = options.iter().map(|o| o.id()).collect();
        assert_eq!(
            ids,
            vec![
                OptionId::Postpone,
                OptionId::IncomingText,
                OptionId::WorkingText,
                OptionId::MergedText,
            ]
        );
    }

    #[test]
    fn test_tree_options_outside_update_switch() {
        let conflict = conflict_with(tree_conflict_desc(
            Operation::Merge,
            LocalChange::MovedAway,
            IncomingChange::Edit,
            NodeKind::File,
        ));
        let options = conflict.tree_get_resolution_options().unwrap();
        let ids: Vec<_> = options.iter().map(|o| o.id()).collect();
        assert_eq!(
            ids,
            vec![OptionId::Postpone, OptionId::AcceptCurrentWcState]
        );
    }

    #[test]
    fn test_tree_options_moved_away_under_update() {
        let conflict = conflict_with(tree_conflict_desc(
            Operation::Update,
            LocalChange::MovedAway,
            IncomingChange::Edit,
            NodeKind::File,
        ));
        let options = conflict.tree_get_resolution_options().unwrap();
        let ids: Vec<_> = options.iter().map(|o| o.id()).collect();
        assert_eq!(
            ids,
            vec![
                OptionId::Postpone,
                OptionId::AcceptCurrentWcState,
                OptionId::UpdateMoveDestination,
            ]
        );
        // Accepting the current state must repair the half-completed move.
        let accept =
            find_option_by_id(&options, OptionId::AcceptCurrentWcState).unwrap();
        assert_eq!(accept.action, ResolveAction::BreakMovedAway);
    }

    #[test]
    fn test_tree_options_deleted_dir_under_switch() {
        let conflict = conflict_with(tree_conflict_desc(
            Operation::Switch,
            LocalChange::Deleted,
            IncomingChange::Edit,
            NodeKind::Dir,
        ));
        let options = conflict.tree_get_resolution_options().unwrap();
        let ids: Vec<_> = options.iter().map(|o| o.id()).collect();
        assert_eq!(
            ids,
            vec![
                OptionId::Postpone,
                OptionId::AcceptCurrentWcState,
                OptionId::UpdateAnyMovedAwayChildren,
            ]
        );
    }

    #[test]
    fn test_tree_options_incoming_delete_offers_no_automation() {
        let conflict = conflict_with(tree_conflict_desc(
            Operation::Update,
            LocalChange::Edited,
            IncomingChange::Delete,
            NodeKind::File,
        ));
        let options = conflict.tree_get_resolution_options().unwrap();
        let ids: Vec<_> = options.iter().map(|o| o.id()).collect();
        assert_eq!(
            ids,
            vec![OptionId::Postpone, OptionId::AcceptCurrentWcState]
        );
        let accept =
            find_option_by_id(&options, OptionId::AcceptCurrentWcState).unwrap();
        assert_eq!(accept.action, ResolveAction::AcceptCurrentWcState);
    }
}
