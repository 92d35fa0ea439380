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

mod common;

use std::collections::BTreeMap;
use std::path::PathBuf;

use bstr::BString;
use maplit::btreemap;
use rsvn_lib::client;
use rsvn_lib::conflict::Conflict;
use rsvn_lib::conflict::OptionId;
use rsvn_lib::error::ErrorKind;
use rsvn_lib::ra::NodeKind;
use rsvn_lib::ra::RepoLocation;
use rsvn_lib::repo_path::RepoPathBuf;
use rsvn_lib::repo_url::RepoUrlBuf;
use rsvn_lib::revision::Revision;
use rsvn_lib::revision::Revnum;
use rsvn_lib::simple_ra::RepoOp;
use rsvn_lib::wc::ConflictDescriptor;
use rsvn_lib::wc::IncomingChange;
use rsvn_lib::wc::LocalChange;
use rsvn_lib::wc::Operation;
use rsvn_lib::wc::PropConflictDesc;
use rsvn_lib::wc::TreeConflictDesc;
use rsvn_lib::wc::WcStore as _;

use crate::common::make_ctx;
use crate::common::repo_url;
use crate::common::test_repo;
use crate::common::wc_of;
use crate::common::wc_of_mut;
use crate::common::wc_path;
use crate::common::wc_root;

fn coord(relpath: &str, rev: Revnum, kind: NodeKind) -> RepoLocation {
    RepoLocation {
        root_url: RepoUrlBuf::parse(common::REPO_ROOT).unwrap(),
        uuid: common::UUID.to_owned(),
        relpath: RepoPathBuf::from_internal_string(relpath).unwrap(),
        revision: rev,
        kind,
    }
}

fn tree_conflict(
    operation: Operation,
    local_change: LocalChange,
    incoming_change: IncomingChange,
    victim_kind: NodeKind,
    left: Option<RepoLocation>,
    right: Option<RepoLocation>,
) -> ConflictDescriptor {
    ConflictDescriptor {
        operation,
        incoming_change,
        local_change,
        left,
        right,
        text: None,
        props: BTreeMap::new(),
        tree: Some(TreeConflictDesc { victim_kind }),
    }
}

/// Update to a revision that deleted a locally edited file: the update
/// raises a tree conflict, details name the deleting revision and author,
/// and accept-current-wc-state clears everything.
#[test]
fn test_update_incoming_delete_of_edited_file() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "add trunk",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"alpha\n")],
    );
    repo.commit_ops("alice", "delete a.txt", &[RepoOp::Delete("trunk/a.txt")]);

    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"alpha\n");
    wc.set_working_text(&wc_path("a.txt"), b"alpha local\n");
    let (mut ctx, _) = make_ctx(&repo, wc);

    client::update(&mut ctx, &wc_root(), Revision::Number(Revnum(2)), true).unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    let (text, props, tree) = conflict.get_conflicted();
    assert!(!text);
    assert!(props.is_empty());
    assert!(tree);
    assert_eq!(conflict.get_operation(), Operation::Update);
    assert_eq!(conflict.get_incoming_change(), IncomingChange::Delete);
    assert_eq!(conflict.get_local_change(), LocalChange::Edited);

    conflict.tree_fetch_details(&mut ctx).unwrap();
    let details = conflict.tree_get_details().unwrap();
    assert_eq!(details.deleted_rev, Some(Revnum(2)));
    assert_eq!(details.added_rev, None);
    assert_eq!(details.repos_relpath.as_str(), "trunk/a.txt");
    assert_eq!(details.rev_author, "alice");

    let description = conflict.tree_get_description();
    assert!(description.contains("deleted or moved by alice in r2"), "{description}");

    conflict
        .tree_resolve_by_id(OptionId::AcceptCurrentWcState, &mut ctx)
        .unwrap();
    assert_eq!(conflict.tree_get_resolution(), OptionId::AcceptCurrentWcState);
    assert_eq!(conflict.get_conflicted(), (false, Vec::new(), false));

    // Recreating the conflict from the store agrees.
    let fresh = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    assert_eq!(fresh.get_conflicted(), (false, Vec::new(), false));
}

/// Reverse update: the "incoming delete" is an addition applied backwards;
/// details carry the added revision instead.
#[test]
fn test_reverse_update_details_record_added_rev() {
    let repo = test_repo();
    repo.commit_ops("alice", "add trunk", &[RepoOp::Mkdir("trunk")]);
    repo.commit_ops("bob", "add file", &[RepoOp::PutFile("trunk/new.txt", b"fresh\n")]);

    let (mut ctx, _) = {
        let mut wc = common::empty_wc();
        wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(2));
        wc.add_versioned_file(
            &wc_path("new.txt"),
            &repo_url("trunk/new.txt"),
            Revnum(2),
            b"fresh\n",
        );
        make_ctx(&repo, wc)
    };

    // Updating backwards from r2 to r1 deletes new.txt; pretend the file
    // was locally edited so the update conflicts.
    wc_of_mut(&mut ctx).set_working_text(&wc_path("new.txt"), b"fresh local\n");
    client::update(&mut ctx, &wc_root(), Revision::Number(Revnum(1)), true).unwrap();

    let mut conflict = Conflict::get(&wc_path("new.txt"), ctx.wc.as_ref()).unwrap();
    let (_, _, tree) = conflict.get_conflicted();
    assert!(tree);
    conflict.tree_fetch_details(&mut ctx).unwrap();
    let details = conflict.tree_get_details().unwrap();
    assert_eq!(details.deleted_rev, None);
    assert_eq!(details.added_rev, Some(Revnum(2)));
    assert_eq!(details.rev_author, "bob");

    let description = conflict.tree_get_description();
    assert!(
        description.contains("did not exist before it was added by bob in r2"),
        "{description}"
    );
}

/// Forward switch: the deleting revision is found by scanning the log of
/// the switched-to branch and confirming ancestry through the youngest
/// common ancestor.
#[test]
fn test_switch_details_found_by_log_scan() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "add trunk",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"alpha\n")],
    );
    repo.commit_ops(
        "alice",
        "branch",
        &[
            RepoOp::Mkdir("branches"),
            RepoOp::Copy {
                from: "trunk",
                from_rev: Revnum(1),
                to: "branches/b1",
            },
        ],
    );
    repo.commit_ops("bob", "prune on branch", &[RepoOp::Delete("branches/b1/a.txt")]);

    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"alpha\n");
    let (mut ctx, _) = make_ctx(&repo, wc);
    ctx.wc
        .record_conflict(
            &wc_path("a.txt"),
            tree_conflict(
                Operation::Switch,
                LocalChange::Edited,
                IncomingChange::Delete,
                NodeKind::File,
                Some(coord("trunk/a.txt", Revnum(1), NodeKind::File)),
                Some(coord("branches/b1/a.txt", Revnum(3), NodeKind::None)),
            ),
        )
        .unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    conflict.tree_fetch_details(&mut ctx).unwrap();
    let details = conflict.tree_get_details().unwrap();
    assert_eq!(details.deleted_rev, Some(Revnum(3)));
    assert_eq!(details.rev_author, "bob");
    assert_eq!(details.repos_relpath.as_str(), "branches/b1/a.txt");

    let description = conflict.tree_get_description();
    assert!(
        description.contains("switched from trunk/a.txt@r1 to branches/b1/a.txt@r3"),
        "{description}"
    );
    assert!(description.contains("deleted or moved by bob in r3"), "{description}");
}

/// When the deleting revision cannot be determined, details stay absent
/// and the description falls back to the generic sentence; not an error.
#[test]
fn test_details_fall_back_when_undeterminable() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "add trunk",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"alpha\n")],
    );
    repo.commit_ops(
        "alice",
        "unrelated branch",
        &[RepoOp::Mkdir("branches"), RepoOp::Mkdir("branches/b1")],
    );
    repo.commit_ops("alice", "noise", &[RepoOp::PutFile("branches/b1/other.txt", b"x\n")]);

    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"alpha\n");
    let (mut ctx, _) = make_ctx(&repo, wc);
    // The victim path never existed on the branch, so no deleting
    // revision can be confirmed.
    ctx.wc
        .record_conflict(
            &wc_path("a.txt"),
            tree_conflict(
                Operation::Switch,
                LocalChange::Edited,
                IncomingChange::Delete,
                NodeKind::File,
                Some(coord("trunk/a.txt", Revnum(1), NodeKind::File)),
                Some(coord("branches/b1/a.txt", Revnum(3), NodeKind::None)),
            ),
        )
        .unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    conflict.tree_fetch_details(&mut ctx).unwrap();
    assert_eq!(conflict.tree_get_details(), None);
    let description = conflict.tree_get_description();
    assert!(description.contains("local file edit"), "{description}");
    assert!(description.contains("upon switch"), "{description}");
}

/// Merge conflicts get no enrichment; details stay absent.
#[test]
fn test_merge_conflicts_are_not_enriched() {
    let repo = test_repo();
    repo.commit_ops("alice", "add trunk", &[RepoOp::Mkdir("trunk")]);
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"a\n");
    let (mut ctx, _) = make_ctx(&repo, wc);
    ctx.wc
        .record_conflict(
            &wc_path("a.txt"),
            tree_conflict(
                Operation::Merge,
                LocalChange::Edited,
                IncomingChange::Delete,
                NodeKind::File,
                Some(coord("trunk/a.txt", Revnum(1), NodeKind::File)),
                Some(coord("trunk/a.txt", Revnum(2), NodeKind::None)),
            ),
        )
        .unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    conflict.tree_fetch_details(&mut ctx).unwrap();
    assert_eq!(conflict.tree_get_details(), None);
}

/// The legacy "mine-conflict" id on a moved-away tree conflict is remapped
/// to update-move-destination, and the move destination receives the
/// incoming edit.
#[test]
fn test_legacy_mine_conflict_remaps_to_move_destination() {
    let repo = test_repo();
    repo.commit_ops("alice", "add trunk", &[RepoOp::Mkdir("trunk")]);
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"alpha\n");
    wc.add_versioned_file(&wc_path("moved.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"alpha\n");
    wc.record_move(&wc_path("a.txt"), &wc_path("moved.txt"));
    wc.set_incoming_text(&wc_path("a.txt"), b"alpha incoming\n");
    let (mut ctx, _) = make_ctx(&repo, wc);
    ctx.wc
        .record_conflict(
            &wc_path("a.txt"),
            tree_conflict(
                Operation::Update,
                LocalChange::MovedAway,
                IncomingChange::Edit,
                NodeKind::File,
                Some(coord("trunk/a.txt", Revnum(1), NodeKind::File)),
                Some(coord("trunk/a.txt", Revnum(2), NodeKind::File)),
            ),
        )
        .unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    conflict
        .tree_resolve_by_id(OptionId::WorkingTextWhereConflicted, &mut ctx)
        .unwrap();

    // The resolution was recorded as the modern option.
    assert_eq!(conflict.tree_get_resolution(), OptionId::UpdateMoveDestination);
    assert_eq!(conflict.get_conflicted(), (false, Vec::new(), false));

    let wc = wc_of(&ctx);
    assert!(wc.journal().iter().any(|entry| entry.starts_with("moved-away-node")));
    assert_eq!(
        wc.read_working_text(&wc_path("moved.txt")).unwrap(),
        "alpha incoming\n"
    );
}

/// The legacy "merged" id on a tree conflict maps to
/// accept-current-wc-state; with a moved-away local change that must break
/// the move so no dangling metadata remains.
#[test]
fn test_legacy_merged_breaks_moved_away() {
    let repo = test_repo();
    repo.commit_ops("alice", "add trunk", &[RepoOp::Mkdir("trunk")]);
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"alpha\n");
    wc.record_move(&wc_path("a.txt"), &wc_path("moved.txt"));
    let (mut ctx, _) = make_ctx(&repo, wc);
    ctx.wc
        .record_conflict(
            &wc_path("a.txt"),
            tree_conflict(
                Operation::Update,
                LocalChange::MovedAway,
                IncomingChange::Edit,
                NodeKind::File,
                None,
                None,
            ),
        )
        .unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    conflict
        .tree_resolve_by_id(OptionId::MergedText, &mut ctx)
        .unwrap();

    assert_eq!(conflict.tree_get_resolution(), OptionId::AcceptCurrentWcState);
    let wc = wc_of(&ctx);
    assert!(wc.journal().iter().any(|entry| entry.starts_with("break-moved-away")));
    assert!(!wc.has_move(&wc_path("a.txt")));
}

/// An incoming property edit on a locally modified property raises a
/// property conflict through update; an identical change on both sides
/// does not.
#[test]
fn test_update_raises_prop_conflict() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "add trunk",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"alpha\n")],
    );
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"alpha\n");
    let (mut ctx, _) = make_ctx(&repo, wc);
    ctx.wc
        .set_prop(&wc_path("a.txt"), "color", Some(&BString::from("blue")))
        .unwrap();
    ctx.wc
        .set_prop(&wc_path("a.txt"), "season", Some(&BString::from("summer")))
        .unwrap();

    // The repository changes the same properties: "color" diverges from
    // the local edit, "season" matches it.
    repo.commit_ops(
        "bob",
        "props",
        &[
            RepoOp::SetProp("trunk/a.txt", "color", b"red"),
            RepoOp::SetProp("trunk/a.txt", "season", b"summer"),
        ],
    );
    client::update(&mut ctx, &wc_root(), Revision::Number(Revnum(2)), true).unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    let (text, props, tree) = conflict.get_conflicted();
    assert!(!text);
    assert!(!tree);
    assert_eq!(props, vec!["color"]);
    assert_eq!(conflict.get_operation(), Operation::Update);

    let values = conflict.prop_get_propvals("color").unwrap();
    assert_eq!(values.working_value.clone().unwrap(), "blue");
    assert_eq!(values.incoming_new_value.clone().unwrap(), "red");
    assert_eq!(values.base_value, None);

    // The local value survived the update.
    assert_eq!(
        ctx.wc.get_prop(&wc_path("a.txt"), "color").unwrap().unwrap(),
        "blue"
    );

    conflict
        .prop_resolve_by_id("color", OptionId::IncomingText, &mut ctx)
        .unwrap();
    assert_eq!(conflict.prop_get_resolution("color"), OptionId::IncomingText);
    let (_, props, _) = conflict.get_conflicted();
    assert!(props.is_empty());
    assert_eq!(
        ctx.wc.get_prop(&wc_path("a.txt"), "color").unwrap().unwrap(),
        "red"
    );
}

/// An incoming property change on a clean property installs as the new
/// pristine base, so a later update does not see a phantom local edit.
#[test]
fn test_incoming_prop_installs_as_base() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "add trunk",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"alpha\n")],
    );
    repo.commit_ops("bob", "prop", &[RepoOp::SetProp("trunk/a.txt", "color", b"red")]);
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"alpha\n");
    let (mut ctx, _) = make_ctx(&repo, wc);

    client::update(&mut ctx, &wc_root(), Revision::Number(Revnum(2)), true).unwrap();

    let entry = ctx.wc.read_entry(&wc_path("a.txt")).unwrap();
    assert!(!entry.props_modified);
    assert!(!entry.conflicted.is_conflicted());
    assert_eq!(
        ctx.wc.get_prop(&wc_path("a.txt"), "color").unwrap().unwrap(),
        "red"
    );
}

/// Resolving all property conflicts at once with the empty property name.
#[test]
fn test_prop_resolve_all_with_empty_name() {
    let repo = test_repo();
    repo.commit_ops("alice", "add trunk", &[RepoOp::Mkdir("trunk")]);
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"a\n");
    let (mut ctx, _) = make_ctx(&repo, wc);

    let prop_conflict = |name: &str| PropConflictDesc {
        base_value: Some(BString::from(format!("{name}-base"))),
        working_value: Some(BString::from(format!("{name}-mine"))),
        incoming_old_value: Some(BString::from(format!("{name}-base"))),
        incoming_new_value: Some(BString::from(format!("{name}-theirs"))),
        reject_path: PathBuf::from("/wc/a.txt.prej"),
    };
    let props = btreemap! {
        "color".to_owned() => prop_conflict("color"),
        "flavor".to_owned() => prop_conflict("flavor"),
        "season".to_owned() => prop_conflict("season"),
    };
    ctx.wc
        .record_conflict(
            &wc_path("a.txt"),
            ConflictDescriptor {
                operation: Operation::Update,
                incoming_change: IncomingChange::Edit,
                local_change: LocalChange::Edited,
                left: None,
                right: None,
                text: None,
                props,
                tree: None,
            },
        )
        .unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    let (_, conflicted_props, _) = conflict.get_conflicted();
    assert_eq!(conflicted_props, vec!["color", "flavor", "season"]);

    conflict
        .prop_resolve_by_id("", OptionId::IncomingText, &mut ctx)
        .unwrap();

    let (_, conflicted_props, _) = conflict.get_conflicted();
    assert!(conflicted_props.is_empty());
    for name in ["color", "flavor", "season"] {
        assert_eq!(conflict.prop_get_resolution(name), OptionId::IncomingText);
        // The incoming values were installed.
        assert_eq!(
            ctx.wc.get_prop(&wc_path("a.txt"), name).unwrap().unwrap(),
            format!("{name}-theirs").as_str()
        );
    }
}

/// Resolving a path with no conflicts is a no-op returning success, with
/// no store mutations at all.
#[test]
fn test_resolve_is_idempotent() {
    let repo = test_repo();
    repo.commit_ops("alice", "add trunk", &[RepoOp::Mkdir("trunk")]);
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"a\n");
    let (mut ctx, _) = make_ctx(&repo, wc);

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    conflict
        .text_resolve_by_id(OptionId::IncomingText, &mut ctx)
        .unwrap();
    conflict
        .prop_resolve_by_id("", OptionId::IncomingText, &mut ctx)
        .unwrap();
    conflict
        .tree_resolve_by_id(OptionId::AcceptCurrentWcState, &mut ctx)
        .unwrap();

    assert!(wc_of(&ctx).journal().is_empty());
    assert_eq!(wc_of(&ctx).timestamp_sleeps(), 0);
}

/// Re-resolving with the same option after a successful resolution is
/// also a no-op.
#[test]
fn test_re_resolve_is_a_no_op() {
    let repo = test_repo();
    repo.commit_ops("alice", "add trunk", &[RepoOp::Mkdir("trunk")]);
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"a\n");
    let (mut ctx, _) = make_ctx(&repo, wc);
    ctx.wc
        .record_conflict(
            &wc_path("a.txt"),
            tree_conflict(
                Operation::Update,
                LocalChange::Edited,
                IncomingChange::Delete,
                NodeKind::File,
                None,
                None,
            ),
        )
        .unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    conflict
        .tree_resolve_by_id(OptionId::AcceptCurrentWcState, &mut ctx)
        .unwrap();
    let journal_len = wc_of(&ctx).journal().len();

    conflict
        .tree_resolve_by_id(OptionId::AcceptCurrentWcState, &mut ctx)
        .unwrap();
    assert_eq!(wc_of(&ctx).journal().len(), journal_len);
}

/// An option that does not apply to the situation is rejected with the
/// dedicated error.
#[test]
fn test_inapplicable_option_rejected() {
    let repo = test_repo();
    repo.commit_ops("alice", "add trunk", &[RepoOp::Mkdir("trunk")]);
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"a\n");
    let (mut ctx, _) = make_ctx(&repo, wc);
    // Incoming delete: no automated move options apply.
    ctx.wc
        .record_conflict(
            &wc_path("a.txt"),
            tree_conflict(
                Operation::Update,
                LocalChange::Edited,
                IncomingChange::Delete,
                NodeKind::File,
                None,
                None,
            ),
        )
        .unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    let err = conflict
        .tree_resolve_by_id(OptionId::UpdateMoveDestination, &mut ctx)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientConflictOptionNotApplicable);
    // The conflict is untouched.
    let (_, _, tree) = conflict.get_conflicted();
    assert!(tree);
}

/// A lock-release failure after a failed resolution is chained onto the
/// primary error rather than replacing it; text resolution sleeps for
/// timestamps.
#[test]
fn test_text_resolution_requests_timestamp_sleep() {
    let repo = test_repo();
    repo.commit_ops("alice", "add trunk", &[RepoOp::Mkdir("trunk")]);
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), Revnum(1), b"base\n");
    wc.set_working_text(&wc_path("a.txt"), b"mine\n");
    wc.set_incoming_text(&wc_path("a.txt"), b"theirs\n");
    let (mut ctx, _) = make_ctx(&repo, wc);
    ctx.wc
        .record_conflict(
            &wc_path("a.txt"),
            ConflictDescriptor {
                operation: Operation::Update,
                incoming_change: IncomingChange::Edit,
                local_change: LocalChange::Edited,
                left: None,
                right: None,
                text: Some(rsvn_lib::wc::TextConflictDesc {
                    mime_type: None,
                    base_path: wc_path("a.txt.r1"),
                    working_path: wc_path("a.txt.mine"),
                    incoming_old_path: wc_path("a.txt.r1"),
                    incoming_new_path: wc_path("a.txt.r2"),
                }),
                props: BTreeMap::new(),
                tree: None,
            },
        )
        .unwrap();

    let mut conflict = Conflict::get(&wc_path("a.txt"), ctx.wc.as_ref()).unwrap();
    conflict
        .text_resolve_by_id(OptionId::IncomingText, &mut ctx)
        .unwrap();

    assert_eq!(conflict.text_get_resolution(), OptionId::IncomingText);
    let wc = wc_of(&ctx);
    assert_eq!(wc.timestamp_sleeps(), 1);
    assert_eq!(wc.read_working_text(&wc_path("a.txt")).unwrap(), "theirs\n");
    // The lock was released on the way out.
    assert!(wc.locked_paths().is_empty());
}
