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

//! The repository-access session interface.
//!
//! A [`Session`] is a handle to a remote repository rooted at a URL. The
//! client core consumes it for history walks, content reads, server-driven
//! edit streams, and the activity-based commit primitives. Opening a
//! session (`open(url, auth)`) is a constructor on the concrete transport
//! implementation.

#![expect(missing_docs)]

use std::collections::BTreeMap;

use bstr::BString;

use crate::checksum::Checksum;
use crate::delta::TextDelta;
use crate::editor::TreeEditor;
use crate::error::ClientResult;
use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponentBuf;
use crate::repo_url::RepoUrl;
use crate::repo_url::RepoUrlBuf;
use crate::revision::Revnum;
use crate::revision::Timestamp;

/// The kind of a repository node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NodeKind {
    File,
    Dir,
    Symlink,
    /// The node does not exist.
    None,
    Unknown,
}

/// A versioned property list.
pub type Props = BTreeMap<String, BString>;

/// A repository coordinate: one node at one revision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepoLocation {
    pub root_url: RepoUrlBuf,
    pub uuid: String,
    pub relpath: RepoPathBuf,
    pub revision: Revnum,
    pub kind: NodeKind,
}

impl RepoLocation {
    /// The absolute URL of this coordinate's path.
    pub fn url(&self) -> RepoUrlBuf {
        self.root_url.join(&self.relpath)
    }
}

/// One entry of a directory listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dirent {
    pub name: RepoPathComponentBuf,
    pub kind: NodeKind,
    pub size: u64,
    pub created_rev: Revnum,
}

/// How a path changed within one revision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeAction {
    Added,
    Deleted,
    Replaced,
    Modified,
}

/// A changed path reported by [`Session::get_log`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangedPath {
    pub action: ChangeAction,
    pub copy_from: Option<(RepoPathBuf, Revnum)>,
}

/// One revision reported by [`Session::get_log`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
    pub revision: Revnum,
    pub author: Option<String>,
    pub date: Option<Timestamp>,
    pub message: Option<String>,
    /// Present when the log was requested with `discover_changed_paths`.
    pub changed_paths: Option<BTreeMap<RepoPathBuf, ChangedPath>>,
}

/// A contiguous range of revisions over which a node was reachable by a
/// given path. `path = None` marks a gap during which the node did not
/// exist.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocationSegment {
    pub range_start: Revnum,
    pub range_end: Revnum,
    pub path: Option<RepoPathBuf>,
}

/// Receives log entries, youngest first unless the range is reversed.
pub type LogReceiver<'a> = dyn FnMut(&LogEntry) -> ClientResult<()> + 'a;

/// Receives location segments, youngest range first.
pub type LocationSegmentReceiver<'a> = dyn FnMut(&LocationSegment) -> ClientResult<()> + 'a;

/// Identifier of a server-side commit activity: the transactional envelope
/// that collects resource mutations until check-in.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ActivityId(pub String);

/// A mutable handle inside an activity that represents the future state of
/// a versioned resource.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct WorkingResource {
    pub activity: ActivityId,
    pub url: String,
}

/// The server's answer to a successful check-in.
#[derive(Clone, Debug)]
pub struct CheckinResult {
    pub revision: Revnum,
    pub date: Timestamp,
    pub author: String,
    /// Per-resource wc-prop updates to record in the working copy.
    pub wcprop_changes: BTreeMap<RepoPathBuf, Props>,
}

/// A session against a remote repository.
///
/// All operations are synchronous; a session is owned by exactly one
/// operation at a time. Failures surface as errors with a session-layer
/// kind and are fatal to the operation in progress.
pub trait Session {
    /// The URL this session is rooted at.
    fn session_url(&self) -> &RepoUrl;

    /// Points the session at a different URL within the same repository.
    fn reparent(&mut self, url: &RepoUrl) -> ClientResult<()>;

    /// The repository root URL.
    fn repos_root(&self) -> &RepoUrl;

    /// The repository UUID.
    fn repos_uuid(&self) -> &str;

    fn latest_revision(&mut self) -> ClientResult<Revnum>;

    /// The youngest revision not after `t`.
    fn dated_revision(&mut self, t: Timestamp) -> ClientResult<Revnum>;

    /// The kind of the node at `path` (relative to the session URL) in
    /// `rev`.
    fn check_path(&mut self, path: &RepoPath, rev: Revnum) -> ClientResult<NodeKind>;

    fn get_file(&mut self, path: &RepoPath, rev: Revnum) -> ClientResult<(BString, Props)>;

    fn get_dir(&mut self, path: &RepoPath, rev: Revnum) -> ClientResult<(Vec<Dirent>, Props)>;

    /// Streams history for `paths` from `start` back to `end` into
    /// `receiver`. A receiver error aborts the walk and propagates; a
    /// cancellation raised by the receiver is a legitimate early-stop
    /// signal for the caller to catch.
    #[expect(clippy::too_many_arguments)]
    fn get_log(
        &mut self,
        paths: &[RepoPathBuf],
        start: Revnum,
        end: Revnum,
        limit: Option<usize>,
        discover_changed_paths: bool,
        strict_node_history: bool,
        receiver: &mut LogReceiver<'_>,
    ) -> ClientResult<()>;

    /// Streams the location history of `path@peg` over `[end, start]`,
    /// youngest segment first.
    fn get_location_segments(
        &mut self,
        path: &RepoPath,
        peg: Revnum,
        start: Revnum,
        end: Revnum,
        receiver: &mut LocationSegmentReceiver<'_>,
    ) -> ClientResult<()>;

    /// The revision within `(start, end]` in which `path@start` was
    /// deleted, or `None` when it survived the whole range.
    fn get_deleted_rev(
        &mut self,
        path: &RepoPath,
        start: Revnum,
        end: Revnum,
    ) -> ClientResult<Option<Revnum>>;

    /// Reads one unversioned revision property.
    fn rev_prop(&mut self, rev: Revnum, name: &str) -> ClientResult<Option<BString>>;

    /// Sets (or with `value = None` deletes) an unversioned revision
    /// property.
    fn change_rev_prop(
        &mut self,
        rev: Revnum,
        name: &str,
        value: Option<&BString>,
    ) -> ClientResult<()>;

    /// Reads all unversioned revision properties of `rev`.
    fn rev_proplist(&mut self, rev: Revnum) -> ClientResult<Props>;

    /// Drives `editor` with the delta from `base_rev` (the client's current
    /// state, `None` for a fresh checkout) to `target_rev` at the session
    /// URL.
    fn do_update(
        &mut self,
        base_rev: Option<Revnum>,
        target_rev: Revnum,
        target: &RepoPath,
        recurse: bool,
        editor: &mut dyn TreeEditor,
    ) -> ClientResult<()>;

    /// Like [`Session::do_update`], but the delta leads to `switch_url` at
    /// `target_rev` instead of the session URL.
    fn do_switch(
        &mut self,
        base_rev: Option<Revnum>,
        target_rev: Revnum,
        target: &RepoPath,
        recurse: bool,
        switch_url: &RepoUrl,
        editor: &mut dyn TreeEditor,
    ) -> ClientResult<()>;

    /// Drives `editor` with the delta from the session URL at `base_rev`
    /// to `versus_url` at `target_rev`, without touching any working copy.
    fn do_diff(
        &mut self,
        base_rev: Revnum,
        target_rev: Revnum,
        versus_url: &RepoUrl,
        recurse: bool,
        editor: &mut dyn TreeEditor,
    ) -> ClientResult<()>;

    /// Drives `editor` with the delta the client would receive from an
    /// update to `target_rev`; used by status-against-repository.
    fn do_status(
        &mut self,
        base_rev: Revnum,
        target_rev: Revnum,
        recurse: bool,
        editor: &mut dyn TreeEditor,
    ) -> ClientResult<()>;

    /// Creates the commit activity on the server (MKACTIVITY).
    fn begin_activity(&mut self, activity: &ActivityId) -> ClientResult<()>;

    /// Checks a versioned resource out into the activity, producing a
    /// working resource that may be mutated.
    fn checkout_resource(
        &mut self,
        url: &RepoUrl,
        activity: &ActivityId,
    ) -> ClientResult<WorkingResource>;

    /// Uploads a text delta into a working resource (PUT).
    fn put(&mut self, resource: &WorkingResource, delta: &TextDelta) -> ClientResult<()>;

    /// Applies property changes to a working resource (PROPPATCH).
    fn proppatch(
        &mut self,
        resource: &WorkingResource,
        changes: &[(String, Option<BString>)],
    ) -> ClientResult<()>;

    /// Creates a new collection at `url` inside the activity (MKCOL).
    fn mkcol(&mut self, activity: &ActivityId, url: &RepoUrl) -> ClientResult<()>;

    /// Copies `src_url@src_rev` to `dst_url` inside the activity (COPY).
    fn copy_resource(
        &mut self,
        src_url: &RepoUrl,
        src_rev: Revnum,
        activity: &ActivityId,
        dst_url: &RepoUrl,
    ) -> ClientResult<()>;

    /// Deletes the resource at `url` inside the activity (DELETE).
    fn delete_resource(&mut self, activity: &ActivityId, url: &RepoUrl) -> ClientResult<()>;

    /// Commits the activity atomically with `log_message` recorded as the
    /// new revision's log, yielding the parsed revision (CHECKIN/MERGE).
    fn checkin(&mut self, activity: &ActivityId, log_message: &str)
    -> ClientResult<CheckinResult>;

    /// Abandons the activity and every working resource in it.
    fn abort_activity(&mut self, activity: &ActivityId) -> ClientResult<()>;
}

/// Verifies that `contents` matches `checksum` when one is expected.
pub fn verify_checksum(
    contents: &[u8],
    expected: Option<&Checksum>,
) -> ClientResult<()> {
    use crate::error::ClientError;
    use crate::error::ErrorKind;
    if let Some(expected) = expected {
        let actual = Checksum::of_contents(contents);
        if actual != *expected {
            return Err(ClientError::new(
                ErrorKind::ChecksumMismatch,
                format!("checksum mismatch: expected {expected}, got {actual}"),
            ));
        }
    }
    Ok(())
}
