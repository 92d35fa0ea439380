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

//! Property tests for the tree-editor protocol and the text-delta codec.

use proptest::prelude::*;
use rsvn_lib::checksum::Checksum;
use rsvn_lib::delta::DeltaOp;
use rsvn_lib::delta::DeltaWindow;
use rsvn_lib::delta::TextDelta;
use rsvn_lib::delta::apply_delta;
use rsvn_lib::editor::DirToken;
use rsvn_lib::editor::NullEditor;
use rsvn_lib::editor::TreeEditor;
use rsvn_lib::editor::ValidatingEditor;
use rsvn_lib::error::ErrorKind;
use rsvn_lib::repo_path::RepoPathComponent;
use rsvn_lib::repo_path::RepoPathComponentBuf;
use rsvn_lib::revision::Revnum;

/// A randomly generated tree of entries to drive through an editor.
#[derive(Clone, Debug)]
enum TreeEntry {
    File {
        name: RepoPathComponentBuf,
        text: Vec<u8>,
        replace: bool,
    },
    Dir {
        name: RepoPathComponentBuf,
        children: Vec<TreeEntry>,
    },
}

fn component_strategy() -> impl Strategy<Value = RepoPathComponentBuf> {
    "[a-z][a-z0-9]{0,7}".prop_map(|name| RepoPathComponentBuf::new(name).unwrap())
}

fn tree_entry_strategy() -> impl Strategy<Value = Vec<TreeEntry>> {
    let leaf = (component_strategy(), prop::collection::vec(any::<u8>(), 0..64), any::<bool>())
        .prop_map(|(name, text, replace)| TreeEntry::File {
            name,
            text,
            replace,
        });
    let entries = leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            inner.clone(),
            (component_strategy(), prop::collection::vec(inner, 0..4)).prop_map(
                |(name, children)| TreeEntry::Dir {
                    name,
                    children: dedup_names(children),
                }
            ),
        ]
    });
    prop::collection::vec(entries, 0..5).prop_map(dedup_names)
}

fn dedup_names(entries: Vec<TreeEntry>) -> Vec<TreeEntry> {
    let mut seen = std::collections::HashSet::new();
    entries
        .into_iter()
        .filter(|entry| {
            let name = match entry {
                TreeEntry::File { name, .. } | TreeEntry::Dir { name, .. } => name.clone(),
            };
            seen.insert(name)
        })
        .collect()
}

/// Emits the canonical balanced edit sequence for `entries` under
/// `parent`.
fn drive_entries(
    editor: &mut dyn TreeEditor,
    parent: DirToken,
    entries: &[TreeEntry],
) -> rsvn_lib::error::ClientResult<()> {
    for entry in entries {
        match entry {
            TreeEntry::File {
                name,
                text,
                replace,
            } => {
                if *replace {
                    editor.delete_entry(name, Some(Revnum(1)), parent)?;
                }
                let file = editor.add_file(name, parent, None)?;
                let delta = TextDelta::from_contents(text);
                {
                    let mut handler = editor.apply_textdelta(file, None)?;
                    for window in &delta.windows {
                        handler.window(Some(window))?;
                    }
                    handler.window(None)?;
                }
                editor.close_file(file, delta.result_checksum.as_ref())?;
            }
            TreeEntry::Dir { name, children } => {
                let dir = editor.add_directory(name, parent, None)?;
                drive_entries(editor, dir, children)?;
                editor.close_directory(dir)?;
            }
        }
    }
    Ok(())
}

proptest! {
    /// Every well-formed (balanced, nested) edit sequence is accepted by
    /// the validator.
    #[test]
    fn test_balanced_sequences_accepted(entries in tree_entry_strategy()) {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        let root = editor.open_root(Some(Revnum(1))).unwrap();
        drive_entries(&mut editor, root, &entries).unwrap();
        editor.close_directory(root).unwrap();
        editor.close_edit().unwrap();
    }

    /// A sequence that leaves a directory open is rejected, and the editor
    /// is not corrupted: aborting afterwards still works.
    #[test]
    fn test_unclosed_directory_rejected(entries in tree_entry_strategy()) {
        let mut editor = ValidatingEditor::new(NullEditor::default());
        let root = editor.open_root(Some(Revnum(1))).unwrap();
        drive_entries(&mut editor, root, &entries).unwrap();
        // Generated names never contain '-', so this cannot collide.
        let name = RepoPathComponentBuf::new("left-open").unwrap();
        let _open = editor.add_directory(&name, root, None).unwrap();
        let err = editor.close_edit().unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
        // Consumer state survives the rejection.
        editor.abort_edit().unwrap();
    }

    /// Events on a directory that is not the innermost open item violate
    /// stack discipline.
    #[test]
    fn test_sibling_interleaving_rejected(a in component_strategy(), b in component_strategy()) {
        prop_assume!(a != b);
        let mut editor = ValidatingEditor::new(NullEditor::default());
        let root = editor.open_root(None).unwrap();
        let _first = editor.add_directory(&a, root, None).unwrap();
        // The parent is no longer the innermost open item.
        let err = editor.add_directory(&b, root, None).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
        editor.abort_edit().unwrap();
    }

    /// Applying the windows generated for arbitrary contents reconstructs
    /// those contents exactly, and the result checksum matches.
    #[test]
    fn test_delta_round_trip(base in prop::collection::vec(any::<u8>(), 0..512),
                             target in prop::collection::vec(any::<u8>(), 0..4096)) {
        let mut delta = TextDelta::from_contents(&target);
        delta.base_checksum = Some(Checksum::of_contents(&base));
        let result = apply_delta(&base, &delta).unwrap();
        prop_assert_eq!(result.as_slice(), target.as_slice());
    }

    /// A delta whose windows copy from the source view reconstructs the
    /// expected bytes.
    #[test]
    fn test_delta_source_copy_round_trip(base in prop::collection::vec(any::<u8>(), 1..256),
                                         extra in prop::collection::vec(any::<u8>(), 0..64)) {
        // Target = base + extra, expressed as one source copy plus
        // literal data.
        let window = DeltaWindow {
            source_offset: 0,
            source_len: base.len(),
            target_len: base.len() + extra.len(),
            ops: vec![
                DeltaOp::CopyFromSource { offset: 0, len: base.len() },
                DeltaOp::CopyFromNewData { offset: 0, len: extra.len() },
            ],
            new_data: extra.clone().into(),
        };
        let mut expected = base.clone();
        expected.extend_from_slice(&extra);
        let delta = TextDelta {
            base_checksum: None,
            windows: vec![window],
            result_checksum: Some(Checksum::of_contents(&expected)),
        };
        let result = apply_delta(&base, &delta).unwrap();
        prop_assert_eq!(result.as_slice(), expected.as_slice());
    }
}

/// The delete-then-add form of a replace passes validation, and the
/// validator still rejects the plain double add.
#[test]
fn test_replace_vs_double_add() {
    let name = RepoPathComponent::new("victim").unwrap();

    let mut editor = ValidatingEditor::new(NullEditor::default());
    let root = editor.open_root(None).unwrap();
    editor.delete_entry(name, Some(Revnum(1)), root).unwrap();
    let file = editor.add_file(name, root, None).unwrap();
    editor.close_file(file, None).unwrap();
    editor.close_edit().unwrap();

    let mut editor = ValidatingEditor::new(NullEditor::default());
    let root = editor.open_root(None).unwrap();
    let file = editor.add_file(name, root, None).unwrap();
    editor.close_file(file, None).unwrap();
    let err = editor.add_file(name, root, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
}

/// A checksummed close_file is verified by consumers that apply deltas:
/// corrupting the checksum makes application fail.
#[test]
fn test_result_checksum_guards_content() {
    let contents = b"guarded contents\n";
    let mut delta = TextDelta::from_contents(contents);
    delta.result_checksum = Some(Checksum::of_contents(b"other contents\n"));
    let err = apply_delta(b"", &delta).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
}
