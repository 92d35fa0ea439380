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

use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use rsvn_lib::client;
use rsvn_lib::commit::harvest_commit_items;
use rsvn_lib::error::ErrorKind;
use rsvn_lib::ra::NodeKind;
use rsvn_lib::repo_url::RepoUrlBuf;
use rsvn_lib::revision::Revision;
use rsvn_lib::revision::Revnum;
use rsvn_lib::simple_ra::RepoOp;
use rsvn_lib::simple_wc::SimpleWc;
use rsvn_lib::wc::Schedule;
use rsvn_lib::wc::WcStore as _;

use crate::common::make_ctx;
use crate::common::repo_url;
use crate::common::test_repo;
use crate::common::wc_of;
use crate::common::wc_path;
use crate::common::wc_root;

fn wc_with_trunk_file(rev: Revnum, text: &[u8]) -> SimpleWc {
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), rev);
    wc.add_versioned_file(&wc_path("a.txt"), &repo_url("trunk/a.txt"), rev, text);
    wc
}

#[test]
fn test_empty_commit_is_a_no_op() {
    let repo = test_repo();
    repo.commit_ops("alice", "r1", &[RepoOp::Mkdir("trunk")]);
    let wc = wc_with_trunk_file(Revnum(1), b"clean\n");
    let (mut ctx, opens) = make_ctx(&repo, wc);

    let info = client::commit(&mut ctx, &[wc_root()]).unwrap();

    assert_eq!(info.revision, None);
    assert_eq!(info.date, None);
    assert_eq!(info.author, None);
    // Not a single server call happened, not even a session open.
    assert_eq!(opens.load(Ordering::SeqCst), 0);
    assert!(repo.call_log().is_empty());
}

#[test]
fn test_single_file_modify() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "r1",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"old\n")],
    );
    let mut wc = wc_with_trunk_file(Revnum(1), b"old\n");
    wc.set_working_text(&wc_path("a.txt"), b"new\n");
    let (mut ctx, _) = make_ctx(&repo, wc);
    ctx.auth.username = Some("carol".to_owned());

    let info = client::commit(&mut ctx, &[wc_root()]).unwrap();

    assert_eq!(info.revision, Some(Revnum(2)));
    assert_eq!(info.author.as_deref(), Some("carol"));
    assert_eq!(info.post_commit_err, None);

    // Exactly: activity create, checkout of the base collection, checkout
    // of the file, put, check-in.
    let calls = repo.call_log();
    assert_eq!(calls.len(), 5);
    assert!(calls[0].starts_with("mkactivity "));
    assert_eq!(calls[1], format!("checkout {}", repo_url("trunk")));
    assert_eq!(calls[2], format!("checkout {}", repo_url("trunk/a.txt")));
    assert_eq!(calls[3], format!("put {}", repo_url("trunk/a.txt")));
    assert!(calls[4].starts_with("checkin "));

    // The put carried the new text; the post-commit pass bumped the entry.
    let mut session = repo
        .session(&RepoUrlBuf::parse(repo_url("trunk/a.txt")).unwrap(), "carol")
        .unwrap();
    use rsvn_lib::ra::Session as _;
    let (text, _) = session
        .get_file(rsvn_lib::repo_path::RepoPath::root(), Revnum(2))
        .unwrap();
    assert_eq!(text, "new\n");

    let entry = wc_of(&ctx).read_entry(&wc_path("a.txt")).unwrap();
    assert_eq!(entry.revision, Revnum(2));
    assert_eq!(entry.schedule, Schedule::Normal);
    assert!(!entry.text_modified);
}

#[test]
fn test_commit_added_file_in_added_dir() {
    let repo = test_repo();
    repo.commit_ops("alice", "r1", &[RepoOp::Mkdir("trunk")]);
    let mut wc = common::empty_wc();
    wc.add_versioned_dir(&wc_root(), &repo_url("trunk"), Revnum(1));
    let (mut ctx, _) = make_ctx(&repo, wc);

    client::mkdir(
        &mut ctx,
        &[rsvn_lib::revision::Target::Path(wc_path("sub"))],
    )
    .unwrap();
    ctx.wc
        .schedule_add(&wc_path("sub/new.txt"), NodeKind::File)
        .unwrap();
    ctx.wc
        .write_working_text(&wc_path("sub/new.txt"), &"fresh\n".into())
        .unwrap();

    let info = client::commit(&mut ctx, &[wc_root()]).unwrap();
    assert_eq!(info.revision, Some(Revnum(2)));
    let calls = repo.call_log();
    assert!(calls.contains(&format!("mkcol {}", repo_url("trunk/sub"))));
    assert!(calls.contains(&format!("put {}", repo_url("trunk/sub/new.txt"))));

    let mut session = repo
        .session(&RepoUrlBuf::parse(common::REPO_ROOT).unwrap(), "alice")
        .unwrap();
    use rsvn_lib::ra::Session as _;
    let (text, _) = session
        .get_file(
            rsvn_lib::repo_path::RepoPath::from_internal_string("trunk/sub/new.txt").unwrap(),
            Revnum(2),
        )
        .unwrap();
    assert_eq!(text, "fresh\n");

    // The adds became plain versioned entries at the new revision.
    let entry = wc_of(&ctx).read_entry(&wc_path("sub/new.txt")).unwrap();
    assert_eq!(entry.schedule, Schedule::Normal);
    assert_eq!(entry.revision, Revnum(2));
}

#[test]
fn test_commit_schedule_delete() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "r1",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"x\n")],
    );
    let wc = wc_with_trunk_file(Revnum(1), b"x\n");
    let (mut ctx, _) = make_ctx(&repo, wc);
    ctx.wc.schedule_delete(&wc_path("a.txt")).unwrap();

    let info = client::commit(&mut ctx, &[wc_root()]).unwrap();
    assert_eq!(info.revision, Some(Revnum(2)));
    assert!(
        repo.call_log()
            .contains(&format!("delete {}", repo_url("trunk/a.txt")))
    );

    // The deleted entry is gone from the working copy.
    let err = wc_of(&ctx).read_entry(&wc_path("a.txt")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntryNotFound);
}

#[test]
fn test_commit_aborts_activity_on_failure() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "r1",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"server\n")],
    );
    // The working copy believes in a different base text; the delta's
    // base checksum cannot match the server content.
    let mut wc = wc_with_trunk_file(Revnum(1), b"stale base\n");
    wc.set_working_text(&wc_path("a.txt"), b"local edit\n");
    let (mut ctx, _) = make_ctx(&repo, wc);

    let err = client::commit(&mut ctx, &[wc_root()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);

    // The activity was aborted and no revision appeared.
    assert!(
        repo.call_log()
            .iter()
            .any(|call| call.starts_with("abort-activity "))
    );
    assert_eq!(repo.head(), Revnum(1));

    // The working copy was left untouched.
    let entry = wc_of(&ctx).read_entry(&wc_path("a.txt")).unwrap();
    assert_eq!(entry.revision, Revnum(1));
    assert!(entry.text_modified);
}

#[test]
fn test_null_log_message_aborts_before_network() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "r1",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"old\n")],
    );
    let mut wc = wc_with_trunk_file(Revnum(1), b"old\n");
    wc.set_working_text(&wc_path("a.txt"), b"new\n");
    let (mut ctx, opens) = make_ctx(&repo, wc);
    ctx.log_message = Some(Box::new(|_items| Ok(None)));

    let err = client::commit(&mut ctx, &[wc_root()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(opens.load(Ordering::SeqCst), 0);
    assert!(repo.call_log().is_empty());
}

#[test]
fn test_log_message_callback_sees_items() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "r1",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"old\n")],
    );
    let mut wc = wc_with_trunk_file(Revnum(1), b"old\n");
    wc.set_working_text(&wc_path("a.txt"), b"new\n");
    let (mut ctx, _) = make_ctx(&repo, wc);

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_in_callback = seen.clone();
    ctx.log_message = Some(Box::new(move |items| {
        let mut seen = seen_in_callback.lock().unwrap();
        for item in items {
            seen.push((item.url.clone(), item.flags));
        }
        Ok(Some("tweak a.txt".to_owned()))
    }));

    let info = client::commit(&mut ctx, &[wc_root()]).unwrap();
    assert_eq!(info.revision, Some(Revnum(2)));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_str(), repo_url("trunk/a.txt"));
    assert!(seen[0].1.text_mods);
    assert!(!seen[0].1.add);

    // The message was recorded on the new revision.
    let mut session = repo
        .session(&RepoUrlBuf::parse(common::REPO_ROOT).unwrap(), "alice")
        .unwrap();
    use rsvn_lib::ra::Session as _;
    let message = session.rev_prop(Revnum(2), "svn:log").unwrap().unwrap();
    assert_eq!(message, "tweak a.txt");
}

#[test]
fn test_harvest_classifies_schedules() {
    let repo = test_repo();
    repo.commit_ops("alice", "r1", &[RepoOp::Mkdir("trunk")]);
    let mut wc = wc_with_trunk_file(Revnum(1), b"x\n");
    wc.set_working_text(&wc_path("a.txt"), b"y\n");
    let copied_url = RepoUrlBuf::parse(repo_url("trunk/a.txt")).unwrap();
    wc.schedule_copy(
        &wc_path("b.txt"),
        NodeKind::File,
        &copied_url,
        Revnum(1),
        Some("y\n".into()),
    )
    .unwrap();

    let items = harvest_commit_items(&wc, &[wc_root()]).unwrap();
    assert_eq!(items.len(), 2);
    let modified = items
        .iter()
        .find(|item| item.local_abspath == wc_path("a.txt"))
        .unwrap();
    assert!(modified.flags.text_mods);
    assert!(!modified.flags.is_copy);
    let copied = items
        .iter()
        .find(|item| item.local_abspath == wc_path("b.txt"))
        .unwrap();
    assert!(copied.flags.add);
    assert!(copied.flags.is_copy);
    assert_eq!(copied.copyfrom_rev, Some(Revnum(1)));
}

#[test]
fn test_repository_side_mkdir_and_delete() {
    let repo = test_repo();
    repo.commit_ops("alice", "r1", &[RepoOp::Mkdir("trunk")]);
    let (mut ctx, _) = make_ctx(&repo, common::empty_wc());

    let url = RepoUrlBuf::parse(repo_url("trunk/newdir")).unwrap();
    let info = client::mkdir(&mut ctx, &[rsvn_lib::revision::Target::Url(url.clone())])
        .unwrap()
        .unwrap();
    assert_eq!(info.revision, Some(Revnum(2)));
    assert!(repo.call_log().contains(&format!("mkcol {url}")));

    let info = client::delete(&mut ctx, &[rsvn_lib::revision::Target::Url(url.clone())])
        .unwrap()
        .unwrap();
    assert_eq!(info.revision, Some(Revnum(3)));

    let mut session = repo
        .session(&RepoUrlBuf::parse(common::REPO_ROOT).unwrap(), "alice")
        .unwrap();
    use rsvn_lib::ra::Session as _;
    assert_matches!(
        session.check_path(
            rsvn_lib::repo_path::RepoPath::from_internal_string("trunk/newdir").unwrap(),
            Revnum(3)
        ),
        Ok(NodeKind::None)
    );
}

#[test]
fn test_repository_side_copy_keeps_history() {
    let repo = test_repo();
    repo.commit_ops(
        "alice",
        "r1",
        &[RepoOp::Mkdir("trunk"), RepoOp::PutFile("trunk/a.txt", b"alpha\n")],
    );
    repo.commit_ops("alice", "r2", &[RepoOp::Mkdir("branches")]);
    let (mut ctx, _) = make_ctx(&repo, common::empty_wc());

    let src = RepoUrlBuf::parse(repo_url("trunk")).unwrap();
    let dst = RepoUrlBuf::parse(repo_url("branches/b1")).unwrap();
    let info = client::copy(
        &mut ctx,
        &rsvn_lib::revision::Target::Url(src),
        Revision::Number(Revnum(2)),
        &rsvn_lib::revision::Target::Url(dst),
    )
    .unwrap()
    .unwrap();
    assert_eq!(info.revision, Some(Revnum(3)));

    let mut session = repo
        .session(&RepoUrlBuf::parse(common::REPO_ROOT).unwrap(), "alice")
        .unwrap();
    use rsvn_lib::ra::Session as _;
    let (text, _) = session
        .get_file(
            rsvn_lib::repo_path::RepoPath::from_internal_string("branches/b1/a.txt").unwrap(),
            Revnum(3),
        )
        .unwrap();
    assert_eq!(text, "alpha\n");
}
