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

//! The working-copy editor consumer.
//!
//! [`WcEditor`] applies a server-driven edit stream to the working-copy
//! store. Checkout, update, and switch install incoming content and bump
//! entries to the target revision; merge schedules the incoming changes
//! instead. Wherever an incoming change clashes with local state, the
//! editor records a conflict descriptor rather than destroying either
//! side.

#![expect(missing_docs)]

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use bstr::BStr;
use bstr::BString;
use slab::Slab;

use crate::checksum::Checksum;
use crate::client::CancelPredicate;
use crate::client::Notification;
use crate::client::NotifyAction;
use crate::client::NotifyFn;
use crate::delta::TextDelta;
use crate::delta::WindowCollector;
use crate::delta::WindowHandler;
use crate::delta::apply_delta;
use crate::editor::DirToken;
use crate::editor::FileToken;
use crate::editor::TreeEditor;
use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;
use crate::ra::NodeKind;
use crate::ra::RepoLocation;
use crate::ra::verify_checksum;
use crate::repo_path::RepoPathComponent;
use crate::repo_url::RepoUrl;
use crate::repo_url::RepoUrlBuf;
use crate::revision::Revnum;
use crate::wc::ConflictDescriptor;
use crate::wc::Entry;
use crate::wc::IncomingChange;
use crate::wc::LocalChange;
use crate::wc::Operation;
use crate::wc::PropConflictDesc;
use crate::wc::Schedule;
use crate::wc::TextConflictDesc;
use crate::wc::TreeConflictDesc;
use crate::wc::WcStore;

#[derive(Debug)]
struct WcDirBaton {
    local_path: PathBuf,
    url: RepoUrlBuf,
}

#[derive(Debug)]
struct WcFileBaton {
    local_path: PathBuf,
    url: RepoUrlBuf,
    is_add: bool,
    base_text: BString,
    delta: Option<TextDelta>,
    prop_changes: Vec<(String, Option<BString>)>,
}

/// Applies an incoming edit stream to the store.
pub struct WcEditor<'a> {
    wc: &'a mut dyn WcStore,
    notify: Option<&'a mut NotifyFn>,
    cancel: Option<&'a CancelPredicate>,
    operation: Operation,
    root_path: PathBuf,
    /// Root URL of the incoming tree: the session URL for update, the
    /// switch target for switch, the merge-right source for merge.
    source_url: RepoUrlBuf,
    target_rev: Revnum,
    dirs: Slab<WcDirBaton>,
    files: Slab<WcFileBaton>,
}

impl<'a> WcEditor<'a> {
    pub fn new(
        wc: &'a mut dyn WcStore,
        notify: Option<&'a mut NotifyFn>,
        cancel: Option<&'a CancelPredicate>,
        operation: Operation,
        root_path: &Path,
        source_url: RepoUrlBuf,
        target_rev: Revnum,
    ) -> Self {
        Self {
            wc,
            notify,
            cancel,
            operation,
            root_path: root_path.to_owned(),
            source_url,
            target_rev,
            dirs: Slab::new(),
            files: Slab::new(),
        }
    }

    fn check_cancelled(&self) -> ClientResult<()> {
        match self.cancel {
            Some(cancel) if cancel() => Err(ClientError::cancelled()),
            _ => Ok(()),
        }
    }

    fn emit(&mut self, path: &Path, action: NotifyAction) {
        if let Some(notify) = self.notify.as_deref_mut() {
            notify(&Notification {
                path: path.to_owned(),
                action,
                revision: None,
            });
        }
    }

    fn dir_baton(&self, dir: DirToken) -> ClientResult<&WcDirBaton> {
        self.dirs.get(dir.0).ok_or_else(|| {
            ClientError::new(
                ErrorKind::EditorProtocolViolation,
                format!("unknown directory token {}", dir.0),
            )
        })
    }

    fn read_entry_opt(&self, path: &Path) -> ClientResult<Option<Entry>> {
        match self.wc.read_entry(path) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) if err.kind() == ErrorKind::EntryNotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The local state of `entry` as seen by the conflict model.
    fn local_change_of(entry: &Entry) -> LocalChange {
        match entry.schedule {
            Schedule::Delete => LocalChange::Deleted,
            Schedule::Replace => LocalChange::Replaced,
            Schedule::Add => LocalChange::Added,
            Schedule::Normal => LocalChange::Edited,
        }
    }

    fn is_locally_changed(entry: &Entry) -> bool {
        entry.schedule != Schedule::Normal || entry.text_modified || entry.props_modified
    }

    fn conflict_coords(
        &self,
        entry: Option<&Entry>,
        new_url: &RepoUrl,
        incoming_kind: NodeKind,
    ) -> ClientResult<(Option<RepoLocation>, Option<RepoLocation>)> {
        let (root_url, uuid) = self.wc.repos_info(&self.root_path)?;
        let left = entry.and_then(|entry| {
            let relpath = root_url.relpath_to(&entry.url)?.to_owned();
            Some(RepoLocation {
                root_url: root_url.clone(),
                uuid: uuid.clone(),
                relpath,
                revision: entry.revision,
                kind: entry.kind,
            })
        });
        let right = root_url.relpath_to(new_url).map(|relpath| RepoLocation {
            root_url: root_url.clone(),
            uuid: uuid.clone(),
            relpath: relpath.to_owned(),
            revision: self.target_rev,
            kind: incoming_kind,
        });
        Ok((left, right))
    }

    fn raise_tree_conflict(
        &mut self,
        path: &Path,
        entry: Option<&Entry>,
        new_url: &RepoUrl,
        incoming_change: IncomingChange,
        incoming_kind: NodeKind,
        local_change: LocalChange,
    ) -> ClientResult<()> {
        let victim_kind = entry.map_or(incoming_kind, |entry| entry.kind);
        let (left, right) = self.conflict_coords(entry, new_url, incoming_kind)?;
        let descriptor = ConflictDescriptor {
            operation: self.operation,
            incoming_change,
            local_change,
            left,
            right,
            text: None,
            props: Default::default(),
            tree: Some(TreeConflictDesc { victim_kind }),
        };
        tracing::debug!(
            path = %path.display(),
            ?incoming_change,
            ?local_change,
            "raising tree conflict"
        );
        self.wc.record_conflict(path, descriptor)?;
        self.emit(path, NotifyAction::TreeConflict);
        Ok(())
    }

    fn raise_text_conflict(
        &mut self,
        path: &Path,
        entry: &Entry,
        new_url: &RepoUrl,
    ) -> ClientResult<()> {
        let (left, right) = self.conflict_coords(Some(entry), new_url, NodeKind::File)?;
        let mime_type = self.wc.get_prop(path, "svn:mime-type")?;
        let suffix = |tag: &str| {
            let mut name = path.as_os_str().to_owned();
            name.push(tag);
            PathBuf::from(name)
        };
        let old_rev = entry.revision;
        let new_rev = self.target_rev;
        let descriptor = ConflictDescriptor {
            operation: self.operation,
            incoming_change: IncomingChange::Edit,
            local_change: LocalChange::Edited,
            left,
            right,
            text: Some(TextConflictDesc {
                mime_type: mime_type.map(|value| String::from_utf8_lossy(&value).into_owned()),
                base_path: suffix(&format!(".r{old_rev}")),
                working_path: suffix(".mine"),
                incoming_old_path: suffix(&format!(".r{old_rev}")),
                incoming_new_path: suffix(&format!(".r{new_rev}")),
            }),
            props: Default::default(),
            tree: None,
        };
        tracing::debug!(path = %path.display(), "raising text conflict");
        self.wc.record_conflict(path, descriptor)?;
        self.emit(path, NotifyAction::TextConflict);
        Ok(())
    }

    fn raise_prop_conflict(
        &mut self,
        path: &Path,
        entry: &Entry,
        new_url: &RepoUrl,
        name: &str,
        incoming_value: Option<&BString>,
    ) -> ClientResult<()> {
        let base_value = self.wc.get_base_prop(path, name)?;
        let working_value = self.wc.get_prop(path, name)?;
        let (left, right) = self.conflict_coords(Some(entry), new_url, entry.kind)?;
        let reject_path = {
            let mut reject = path.as_os_str().to_owned();
            reject.push(".prej");
            PathBuf::from(reject)
        };
        let mut props = BTreeMap::new();
        props.insert(
            name.to_owned(),
            PropConflictDesc {
                // The incoming change's old value is the base both sides
                // started from.
                incoming_old_value: base_value.clone(),
                incoming_new_value: incoming_value.cloned(),
                base_value,
                working_value,
                reject_path,
            },
        );
        let descriptor = ConflictDescriptor {
            operation: self.operation,
            incoming_change: IncomingChange::Edit,
            local_change: LocalChange::Edited,
            left,
            right,
            text: None,
            props,
            tree: None,
        };
        tracing::debug!(path = %path.display(), prop = name, "raising property conflict");
        self.wc.record_conflict(path, descriptor)?;
        self.emit(path, NotifyAction::PropConflict);
        Ok(())
    }

    /// Applies one incoming property change, raising a property conflict
    /// when it collides with a local modification of the same property.
    fn apply_prop_change(
        &mut self,
        path: &Path,
        url: &RepoUrl,
        name: &str,
        value: Option<&BString>,
    ) -> ClientResult<()> {
        let Some(entry) = self.read_entry_opt(path)? else {
            return self.wc.set_prop(path, name, value);
        };
        let base_value = self.wc.get_base_prop(path, name)?;
        let working_value = self.wc.get_prop(path, name)?;
        if working_value != base_value {
            if working_value.as_ref() == value {
                // Both sides made the same change.
                return Ok(());
            }
            return self.raise_prop_conflict(path, &entry, url, name, value);
        }
        match self.operation {
            Operation::Merge => self.wc.set_prop(path, name, value),
            _ => self.wc.install_prop(path, name, value),
        }
    }
}

impl TreeEditor for WcEditor<'_> {
    fn open_root(&mut self, _base_rev: Option<Revnum>) -> ClientResult<DirToken> {
        // A fresh checkout has no root entry yet.
        if !matches!(self.operation, Operation::Merge)
            && self.read_entry_opt(&self.root_path)?.is_none()
        {
            let root_path = self.root_path.clone();
            let source_url = self.source_url.clone();
            self.wc.install_dir(&root_path, &source_url, self.target_rev)?;
        }
        let baton = WcDirBaton {
            local_path: self.root_path.clone(),
            url: self.source_url.clone(),
        };
        Ok(DirToken(self.dirs.insert(baton)))
    }

    fn delete_entry(
        &mut self,
        name: &RepoPathComponent,
        _base_rev: Option<Revnum>,
        parent: DirToken,
    ) -> ClientResult<()> {
        self.check_cancelled()?;
        let baton = self.dir_baton(parent)?;
        let local_path = baton.local_path.join(name.as_str());
        let target_url = baton.url.join_component(name);

        let Some(entry) = self.read_entry_opt(&local_path)? else {
            return Ok(());
        };
        if Self::is_locally_changed(&entry) {
            // The incoming delete clashes with local changes; neither side
            // wins silently.
            let local_change = Self::local_change_of(&entry);
            return self.raise_tree_conflict(
                &local_path,
                Some(&entry),
                &target_url,
                IncomingChange::Delete,
                NodeKind::None,
                local_change,
            );
        }
        match self.operation {
            Operation::Merge => self.wc.schedule_delete(&local_path)?,
            _ => self.wc.remove_entry(&local_path)?,
        }
        self.emit(&local_path, NotifyAction::UpdateDelete);
        Ok(())
    }

    fn add_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<DirToken> {
        self.check_cancelled()?;
        let baton = self.dir_baton(parent)?;
        let local_path = baton.local_path.join(name.as_str());
        let url = baton.url.join_component(name);

        if let Some(entry) = self.read_entry_opt(&local_path)? {
            // Something is already here; the incoming add cannot land.
            let local_change = match entry.schedule {
                Schedule::Add | Schedule::Replace => LocalChange::Added,
                _ => LocalChange::Obstructed,
            };
            self.raise_tree_conflict(
                &local_path,
                Some(&entry),
                &url,
                IncomingChange::Add,
                NodeKind::Dir,
                local_change,
            )?;
        } else {
            match self.operation {
                Operation::Merge => self.wc.schedule_add(&local_path, NodeKind::Dir)?,
                _ => self.wc.install_dir(&local_path, &url, self.target_rev)?,
            }
            self.emit(&local_path, NotifyAction::UpdateAdd);
        }
        let baton = WcDirBaton { local_path, url };
        Ok(DirToken(self.dirs.insert(baton)))
    }

    fn open_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _base_rev: Option<Revnum>,
    ) -> ClientResult<DirToken> {
        self.check_cancelled()?;
        let baton = self.dir_baton(parent)?;
        let baton = WcDirBaton {
            local_path: baton.local_path.join(name.as_str()),
            url: baton.url.join_component(name),
        };
        Ok(DirToken(self.dirs.insert(baton)))
    }

    fn change_dir_prop(
        &mut self,
        dir: DirToken,
        name: &str,
        value: Option<&BStr>,
    ) -> ClientResult<()> {
        let baton = self.dir_baton(dir)?;
        let local_path = baton.local_path.clone();
        let url = baton.url.clone();
        let value = value.map(|v| v.to_owned());
        self.apply_prop_change(&local_path, &url, name, value.as_ref())
    }

    fn close_directory(&mut self, dir: DirToken) -> ClientResult<()> {
        self.dirs.try_remove(dir.0).ok_or_else(|| {
            ClientError::new(
                ErrorKind::EditorProtocolViolation,
                format!("unknown directory token {}", dir.0),
            )
        })?;
        Ok(())
    }

    fn add_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<FileToken> {
        self.check_cancelled()?;
        let baton = self.dir_baton(parent)?;
        let baton = WcFileBaton {
            local_path: baton.local_path.join(name.as_str()),
            url: baton.url.join_component(name),
            is_add: true,
            base_text: BString::default(),
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
        self.check_cancelled()?;
        let baton = self.dir_baton(parent)?;
        let local_path = baton.local_path.join(name.as_str());
        let base_text = self.wc.read_text_base(&local_path)?;
        let baton = WcFileBaton {
            local_path,
            url: baton.url.join_component(name),
            is_add: false,
            base_text,
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
        let baton = self.files.get_mut(file.0).ok_or_else(|| {
            ClientError::new(
                ErrorKind::EditorProtocolViolation,
                format!("unknown file token {}", file.0),
            )
        })?;
        verify_checksum(&baton.base_text, base_checksum)?;
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
        let baton = self.files.get_mut(file.0).ok_or_else(|| {
            ClientError::new(
                ErrorKind::EditorProtocolViolation,
                format!("unknown file token {}", file.0),
            )
        })?;
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
        self.check_cancelled()?;
        let mut baton = self.files.try_remove(file.0).ok_or_else(|| {
            ClientError::new(
                ErrorKind::EditorProtocolViolation,
                format!("unknown file token {}", file.0),
            )
        })?;

        let new_text = match baton.delta.take() {
            Some(mut delta) => {
                delta.result_checksum = text_checksum.cloned();
                Some(apply_delta(&baton.base_text, &delta)?)
            }
            None => None,
        };

        let entry = self.read_entry_opt(&baton.local_path)?;
        let mut text_conflicted = false;
        match (&entry, baton.is_add) {
            (Some(entry), true) => {
                // Incoming add of a file that exists locally.
                let local_change = match entry.schedule {
                    Schedule::Add | Schedule::Replace => LocalChange::Added,
                    _ => LocalChange::Obstructed,
                };
                let url = baton.url.clone();
                self.raise_tree_conflict(
                    &baton.local_path,
                    Some(entry),
                    &url,
                    IncomingChange::Add,
                    NodeKind::File,
                    local_change,
                )?;
                return Ok(());
            }
            (Some(entry), false) if entry.text_modified && new_text.is_some() => {
                // Incoming text edit on a locally modified file. The
                // incoming property changes are still processed below.
                let entry = entry.clone();
                let url = baton.url.clone();
                self.raise_text_conflict(&baton.local_path, &entry, &url)?;
                text_conflicted = true;
            }
            _ => {}
        }

        if !text_conflicted {
            if let Some(new_text) = new_text {
                match self.operation {
                    Operation::Merge => {
                        if baton.is_add {
                            self.wc.schedule_add(&baton.local_path, NodeKind::File)?;
                        }
                        self.wc.write_working_text(&baton.local_path, &new_text)?;
                    }
                    _ => {
                        self.wc.install_file(
                            &baton.local_path,
                            new_text,
                            &baton.url,
                            self.target_rev,
                        )?;
                    }
                }
            }
        }
        let prop_changes = std::mem::take(&mut baton.prop_changes);
        let url = baton.url.clone();
        for (name, value) in &prop_changes {
            self.apply_prop_change(&baton.local_path, &url, name, value.as_ref())?;
        }
        if !text_conflicted {
            self.emit(
                &baton.local_path,
                if baton.is_add {
                    NotifyAction::UpdateAdd
                } else {
                    NotifyAction::UpdateUpdate
                },
            );
        }
        Ok(())
    }

    fn close_edit(&mut self) -> ClientResult<()> {
        // Entries untouched by the edit still move to the target revision.
        if !matches!(self.operation, Operation::Merge) {
            let entries = self.wc.walk_entries(&self.root_path)?;
            for entry in entries {
                if entry.schedule == Schedule::Normal && !entry.conflicted.is_conflicted() {
                    self.wc
                        .tweak_entry_revision(&entry.local_abspath, self.target_rev)?;
                }
            }
        }
        Ok(())
    }

    fn abort_edit(&mut self) -> ClientResult<()> {
        // Recovery from a partially applied edit is the store's business,
        // via its lock and cleanup machinery.
        Ok(())
    }
}

