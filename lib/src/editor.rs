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

//! The tree-editor protocol.
//!
//! A tree delta is described to a consumer as a single-pass stream of
//! open/add/modify/close events rooted at one implicit directory. The
//! stream obeys stack discipline: a parent's events fully enclose its
//! children's, and every opened directory or file is closed before its
//! parent. [`TreeEditor`] is the consumer capability; the commit driver,
//! the working-copy writer, the diff collector, and the status collector
//! are distinct implementations.
//!
//! [`ValidatingEditor`] wraps any consumer and rejects sequences that
//! violate the protocol before the consumer sees them.

#![expect(missing_docs)]

use std::collections::HashSet;

use bstr::BStr;

use crate::checksum::Checksum;
use crate::delta::DeltaWindow;
use crate::delta::WindowHandler;
use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;
use crate::repo_path::RepoPathComponent;
use crate::repo_url::RepoUrl;
use crate::revision::Revnum;

/// Consumer-issued handle for an open directory.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DirToken(pub usize);

/// Consumer-issued handle for an open file.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FileToken(pub usize);

/// The tree-editor capability.
///
/// Handlers return a failure to abort the stream; the producer must then
/// invoke [`TreeEditor::abort_edit`] and propagate the failure. Consumers
/// that do not care about an event make it a no-op, but must not fail on
/// legal sequences.
pub trait TreeEditor {
    /// Opens the edit's implicit root directory. Must be the first event.
    fn open_root(&mut self, base_rev: Option<Revnum>) -> ClientResult<DirToken>;

    /// Deletes the entry `name` inside the open directory `parent`.
    fn delete_entry(
        &mut self,
        name: &RepoPathComponent,
        base_rev: Option<Revnum>,
        parent: DirToken,
    ) -> ClientResult<()>;

    /// Adds a directory `name`, optionally copied from an existing location.
    fn add_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<DirToken>;

    /// Opens the pre-existing directory `name` for modification.
    fn open_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        base_rev: Option<Revnum>,
    ) -> ClientResult<DirToken>;

    /// Changes (or with `value = None` deletes) a property of an open
    /// directory.
    fn change_dir_prop(
        &mut self,
        dir: DirToken,
        name: &str,
        value: Option<&BStr>,
    ) -> ClientResult<()>;

    fn close_directory(&mut self, dir: DirToken) -> ClientResult<()>;

    /// Adds a file `name`, optionally copied from an existing location.
    fn add_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<FileToken>;

    /// Opens the pre-existing file `name` for modification.
    fn open_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        base_rev: Option<Revnum>,
    ) -> ClientResult<FileToken>;

    /// Installs the window handler for the file's text delta. At most one
    /// delta per file; the returned handler borrows the editor, so it must
    /// be driven to its terminator window before the next event.
    ///
    /// `base_checksum`, when present, names the base the producer deltas
    /// against; the consumer verifies it before applying.
    fn apply_textdelta(
        &mut self,
        file: FileToken,
        base_checksum: Option<&Checksum>,
    ) -> ClientResult<Box<dyn WindowHandler + '_>>;

    /// Changes (or with `value = None` deletes) a property of an open file.
    fn change_file_prop(
        &mut self,
        file: FileToken,
        name: &str,
        value: Option<&BStr>,
    ) -> ClientResult<()>;

    /// Closes an open file. `text_checksum`, when present, is the checksum
    /// of the file's resulting full text; the consumer verifies it after
    /// applying.
    fn close_file(&mut self, file: FileToken, text_checksum: Option<&Checksum>)
    -> ClientResult<()>;

    /// Finishes the edit; all effects are durable afterwards.
    fn close_edit(&mut self) -> ClientResult<()>;

    /// Aborts the edit; partially applied state is rolled back.
    fn abort_edit(&mut self) -> ClientResult<()>;
}

fn protocol_error(message: impl Into<String>) -> ClientError {
    ClientError::new(ErrorKind::EditorProtocolViolation, message)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum OpenKind {
    Dir,
    File,
}

#[derive(Debug)]
struct OpenItem {
    kind: OpenKind,
    token: usize,
    // Names added or opened in this directory so far (dirs only).
    live_names: HashSet<String>,
    // Names deleted in this directory so far (dirs only).
    deleted_names: HashSet<String>,
    // File state (files only).
    delta_started: bool,
    delta_terminated: bool,
}

impl OpenItem {
    fn new(kind: OpenKind, token: usize) -> Self {
        Self {
            kind,
            token,
            live_names: HashSet::new(),
            deleted_names: HashSet::new(),
            delta_started: false,
            delta_terminated: false,
        }
    }
}

#[derive(Debug)]
struct EditState {
    root_opened: bool,
    finished: bool,
    stack: Vec<OpenItem>,
}

/// Wraps an inner editor and rejects protocol-violating event sequences
/// with [`ErrorKind::EditorProtocolViolation`] before the inner editor sees
/// them. The inner editor's tokens pass through unchanged.
#[derive(Debug)]
pub struct ValidatingEditor<E> {
    inner: E,
    state: EditState,
}

impl<E: TreeEditor> ValidatingEditor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            state: EditState {
                root_opened: false,
                finished: false,
                stack: Vec::new(),
            },
        }
    }

    /// Returns the inner editor, e.g. to extract results after
    /// `close_edit`.
    pub fn into_inner(self) -> E {
        self.inner
    }

    fn check_in_edit(&self) -> ClientResult<()> {
        if !self.state.root_opened {
            return Err(protocol_error("event before open_root"));
        }
        if self.state.finished {
            return Err(protocol_error("event after close_edit/abort_edit"));
        }
        Ok(())
    }

    fn top_dir(&mut self, dir: DirToken) -> ClientResult<&mut OpenItem> {
        let top = self
            .state
            .stack
            .last_mut()
            .ok_or_else(|| protocol_error("no open directory"))?;
        if top.kind != OpenKind::Dir || top.token != dir.0 {
            return Err(protocol_error(format!(
                "directory token {} is not the innermost open item",
                dir.0
            )));
        }
        Ok(top)
    }

    fn top_file(&mut self, file: FileToken) -> ClientResult<&mut OpenItem> {
        let top = self
            .state
            .stack
            .last_mut()
            .ok_or_else(|| protocol_error("no open file"))?;
        if top.kind != OpenKind::File || top.token != file.0 {
            return Err(protocol_error(format!(
                "file token {} is not the innermost open item",
                file.0
            )));
        }
        Ok(top)
    }

    fn record_add(&mut self, name: &RepoPathComponent, parent: DirToken) -> ClientResult<()> {
        let dir = self.top_dir(parent)?;
        if !dir.live_names.insert(name.as_str().to_owned()) {
            return Err(protocol_error(format!(
                "entry \"{}\" already added or opened in this directory",
                name.as_str()
            )));
        }
        Ok(())
    }

    fn record_open(&mut self, name: &RepoPathComponent, parent: DirToken) -> ClientResult<()> {
        let dir = self.top_dir(parent)?;
        if dir.deleted_names.contains(name.as_str()) {
            return Err(protocol_error(format!(
                "entry \"{}\" was deleted earlier in this edit",
                name.as_str()
            )));
        }
        if !dir.live_names.insert(name.as_str().to_owned()) {
            return Err(protocol_error(format!(
                "entry \"{}\" already added or opened in this directory",
                name.as_str()
            )));
        }
        Ok(())
    }
}

impl<E: TreeEditor> TreeEditor for ValidatingEditor<E> {
    fn open_root(&mut self, base_rev: Option<Revnum>) -> ClientResult<DirToken> {
        if self.state.root_opened {
            return Err(protocol_error("open_root emitted twice"));
        }
        if self.state.finished {
            return Err(protocol_error("event after close_edit/abort_edit"));
        }
        let token = self.inner.open_root(base_rev)?;
        self.state.root_opened = true;
        self.state.stack.push(OpenItem::new(OpenKind::Dir, token.0));
        Ok(token)
    }

    fn delete_entry(
        &mut self,
        name: &RepoPathComponent,
        base_rev: Option<Revnum>,
        parent: DirToken,
    ) -> ClientResult<()> {
        self.check_in_edit()?;
        let dir = self.top_dir(parent)?;
        if dir.live_names.contains(name.as_str()) {
            return Err(protocol_error(format!(
                "cannot delete \"{}\": already added or opened in this edit",
                name.as_str()
            )));
        }
        if !dir.deleted_names.insert(name.as_str().to_owned()) {
            return Err(protocol_error(format!(
                "entry \"{}\" deleted twice",
                name.as_str()
            )));
        }
        self.inner.delete_entry(name, base_rev, parent)
    }

    fn add_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<DirToken> {
        self.check_in_edit()?;
        self.record_add(name, parent)?;
        let token = self.inner.add_directory(name, parent, copy_from)?;
        self.state.stack.push(OpenItem::new(OpenKind::Dir, token.0));
        Ok(token)
    }

    fn open_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        base_rev: Option<Revnum>,
    ) -> ClientResult<DirToken> {
        self.check_in_edit()?;
        self.record_open(name, parent)?;
        let token = self.inner.open_directory(name, parent, base_rev)?;
        self.state.stack.push(OpenItem::new(OpenKind::Dir, token.0));
        Ok(token)
    }

    fn change_dir_prop(
        &mut self,
        dir: DirToken,
        name: &str,
        value: Option<&BStr>,
    ) -> ClientResult<()> {
        self.check_in_edit()?;
        self.top_dir(dir)?;
        self.inner.change_dir_prop(dir, name, value)
    }

    fn close_directory(&mut self, dir: DirToken) -> ClientResult<()> {
        self.check_in_edit()?;
        self.top_dir(dir)?;
        self.inner.close_directory(dir)?;
        self.state.stack.pop();
        Ok(())
    }

    fn add_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<FileToken> {
        self.check_in_edit()?;
        self.record_add(name, parent)?;
        let token = self.inner.add_file(name, parent, copy_from)?;
        self.state
            .stack
            .push(OpenItem::new(OpenKind::File, token.0));
        Ok(token)
    }

    fn open_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        base_rev: Option<Revnum>,
    ) -> ClientResult<FileToken> {
        self.check_in_edit()?;
        self.record_open(name, parent)?;
        let token = self.inner.open_file(name, parent, base_rev)?;
        self.state
            .stack
            .push(OpenItem::new(OpenKind::File, token.0));
        Ok(token)
    }

    fn apply_textdelta(
        &mut self,
        file: FileToken,
        base_checksum: Option<&Checksum>,
    ) -> ClientResult<Box<dyn WindowHandler + '_>> {
        self.check_in_edit()?;
        let item = self.top_file(file)?;
        if item.delta_started {
            return Err(protocol_error(format!(
                "file token {} received a second text delta",
                file.0
            )));
        }
        item.delta_started = true;
        // Split the borrow: the inner handler borrows `inner` while the
        // terminator flag lives in `state`.
        let Self { inner, state } = self;
        let item = state.stack.last_mut().expect("file is on the stack");
        let handler = inner.apply_textdelta(file, base_checksum)?;
        Ok(Box::new(ValidatingWindowHandler {
            inner: handler,
            terminated: &mut item.delta_terminated,
        }))
    }

    fn change_file_prop(
        &mut self,
        file: FileToken,
        name: &str,
        value: Option<&BStr>,
    ) -> ClientResult<()> {
        self.check_in_edit()?;
        self.top_file(file)?;
        self.inner.change_file_prop(file, name, value)
    }

    fn close_file(
        &mut self,
        file: FileToken,
        text_checksum: Option<&Checksum>,
    ) -> ClientResult<()> {
        self.check_in_edit()?;
        let item = self.top_file(file)?;
        if item.delta_started && !item.delta_terminated {
            return Err(protocol_error(format!(
                "file token {} closed before its delta terminator window",
                file.0
            )));
        }
        self.inner.close_file(file, text_checksum)?;
        self.state.stack.pop();
        Ok(())
    }

    fn close_edit(&mut self) -> ClientResult<()> {
        self.check_in_edit()?;
        match self.state.stack.as_slice() {
            [] => {}
            [root] if root.kind == OpenKind::Dir => {}
            _ => {
                return Err(protocol_error(
                    "close_edit with directories or files still open",
                ));
            }
        }
        self.inner.close_edit()?;
        self.state.finished = true;
        Ok(())
    }

    fn abort_edit(&mut self) -> ClientResult<()> {
        if self.state.finished {
            return Err(protocol_error("event after close_edit/abort_edit"));
        }
        self.inner.abort_edit()?;
        self.state.finished = true;
        Ok(())
    }
}

struct ValidatingWindowHandler<'a> {
    inner: Box<dyn WindowHandler + 'a>,
    terminated: &'a mut bool,
}

impl WindowHandler for ValidatingWindowHandler<'_> {
    fn window(&mut self, window: Option<&DeltaWindow>) -> ClientResult<()> {
        if *self.terminated {
            return Err(protocol_error("delta window after the terminator"));
        }
        if window.is_none() {
            *self.terminated = true;
        }
        self.inner.window(window)
    }
}

/// An editor that accepts every legal event and does nothing.
#[derive(Debug, Default)]
pub struct NullEditor {
    next_token: usize,
}

impl NullEditor {
    fn next(&mut self) -> usize {
        let token = self.next_token;
        self.next_token += 1;
        token
    }
}

struct NullWindowHandler;

impl WindowHandler for NullWindowHandler {
    fn window(&mut self, _window: Option<&DeltaWindow>) -> ClientResult<()> {
        Ok(())
    }
}

impl TreeEditor for NullEditor {
    fn open_root(&mut self, _base_rev: Option<Revnum>) -> ClientResult<DirToken> {
        Ok(DirToken(self.next()))
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
        _name: &RepoPathComponent,
        _parent: DirToken,
        _copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<DirToken> {
        Ok(DirToken(self.next()))
    }

    fn open_directory(
        &mut self,
        _name: &RepoPathComponent,
        _parent: DirToken,
        _base_rev: Option<Revnum>,
    ) -> ClientResult<DirToken> {
        Ok(DirToken(self.next()))
    }

    fn change_dir_prop(
        &mut self,
        _dir: DirToken,
        _name: &str,
        _value: Option<&BStr>,
    ) -> ClientResult<()> {
        Ok(())
    }

    fn close_directory(&mut self, _dir: DirToken) -> ClientResult<()> {
        Ok(())
    }

    fn add_file(
        &mut self,
        _name: &RepoPathComponent,
        _parent: DirToken,
        _copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<FileToken> {
        Ok(FileToken(self.next()))
    }

    fn open_file(
        &mut self,
        _name: &RepoPathComponent,
        _parent: DirToken,
        _base_rev: Option<Revnum>,
    ) -> ClientResult<FileToken> {
        Ok(FileToken(self.next()))
    }

    fn apply_textdelta(
        &mut self,
        _file: FileToken,
        _base_checksum: Option<&Checksum>,
    ) -> ClientResult<Box<dyn WindowHandler + '_>> {
        Ok(Box::new(NullWindowHandler))
    }

    fn change_file_prop(
        &mut self,
        _file: FileToken,
        _name: &str,
        _value: Option<&BStr>,
    ) -> ClientResult<()> {
        Ok(())
    }

    fn close_file(
        &mut self,
        _file: FileToken,
        _text_checksum: Option<&Checksum>,
    ) -> ClientResult<()> {
        Ok(())
    }

    fn close_edit(&mut self) -> ClientResult<()> {
        Ok(())
    }

    fn abort_edit(&mut self) -> ClientResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str) -> &RepoPathComponent {
        RepoPathComponent::new(name).unwrap()
    }

    #[test]
    fn test_legal_sequence_accepted() {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        let root = editor.open_root(Some(Revnum(1))).unwrap();
        let dir = editor
            .open_directory(component("dir"), root, Some(Revnum(1)))
            .unwrap();
        let file = editor
            .add_file(component("file"), dir, None)
            .unwrap();
        {
            let mut handler = editor.apply_textdelta(file, None).unwrap();
            let window = DeltaWindow::from_new_data("contents");
            handler.window(Some(&window)).unwrap();
            handler.window(None).unwrap();
        }
        editor.close_file(file, None).unwrap();
        editor.close_directory(dir).unwrap();
        editor.close_directory(root).unwrap();
        editor.close_edit().unwrap();
    }

    #[test]
    fn test_replace_same_name_accepted() {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        let root = editor.open_root(None).unwrap();
        editor.delete_entry(component("x"), None, root).unwrap();
        let file = editor.add_file(component("x"), root, None).unwrap();
        editor.close_file(file, None).unwrap();
        editor.close_edit().unwrap();
    }

    #[test]
    fn test_event_before_open_root_rejected() {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        let err = editor
            .delete_entry(component("x"), None, DirToken(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
    }

    #[test]
    fn test_double_open_root_rejected() {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        editor.open_root(None).unwrap();
        let err = editor.open_root(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
    }

    #[test]
    fn test_close_with_open_children_rejected() {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        let root = editor.open_root(None).unwrap();
        let _dir = editor.add_directory(component("d"), root, None).unwrap();
        // Closing the root while "d" is open violates stack discipline.
        let err = editor.close_directory(root).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
        let err = editor.close_edit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
    }

    #[test]
    fn test_second_textdelta_rejected() {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        let root = editor.open_root(None).unwrap();
        let file = editor.add_file(component("f"), root, None).unwrap();
        {
            let mut handler = editor.apply_textdelta(file, None).unwrap();
            handler.window(None).unwrap();
        }
        let err = match editor.apply_textdelta(file, None) {
            Err(e) => e,
            Ok(_) => panic!("expected apply_textdelta to be rejected"),
        };
        assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
    }

    #[test]
    fn test_close_file_without_terminator_rejected() {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        let root = editor.open_root(None).unwrap();
        let file = editor.add_file(component("f"), root, None).unwrap();
        {
            let mut handler = editor.apply_textdelta(file, None).unwrap();
            let window = DeltaWindow::from_new_data("partial");
            handler.window(Some(&window)).unwrap();
        }
        let err = editor.close_file(file, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
    }

    #[test]
    fn test_add_duplicate_name_rejected() {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        let root = editor.open_root(None).unwrap();
        let file = editor.add_file(component("x"), root, None).unwrap();
        editor.close_file(file, None).unwrap();
        let err = editor.add_file(component("x"), root, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
    }

    #[test]
    fn test_event_after_close_edit_rejected() {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        editor.open_root(None).unwrap();
        editor.close_edit().unwrap();
        let err = editor.abort_edit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
    }
}
