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

//! Diff collection and rendering.
//!
//! [`SummaryEditor`] is the editor consumer used by diff, repository
//! status, and merge pre-scans: it records which paths an edit stream
//! touches and how, without applying anything. The text-diff rendering
//! here is deliberately simple (common prefix/suffix hunking); the exact
//! diff algorithm is not part of this crate's contract.

#![expect(missing_docs)]

use std::io;
use std::io::Write;

use bstr::BStr;
use bstr::ByteSlice as _;
use slab::Slab;

use crate::checksum::Checksum;
use crate::delta::WindowHandler;
use crate::delta::DeltaWindow;
use crate::editor::DirToken;
use crate::editor::FileToken;
use crate::editor::TreeEditor;
use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;
use crate::ra::NodeKind;
use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponent;
use crate::repo_url::RepoUrl;
use crate::revision::Revnum;

/// How a path differs between the two sides of a diff.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiffAction {
    Added,
    Modified,
    Deleted,
}

/// One path touched by a diff edit stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiffSummary {
    pub path: RepoPathBuf,
    pub kind: NodeKind,
    pub action: DiffAction,
    pub text_changed: bool,
    pub props_changed: bool,
}

#[derive(Debug)]
struct SummaryDirBaton {
    path: RepoPathBuf,
    is_add: bool,
    props_changed: bool,
}

#[derive(Debug)]
struct SummaryFileBaton {
    path: RepoPathBuf,
    is_add: bool,
    text_changed: bool,
    props_changed: bool,
}

/// Collects an edit stream into a list of [`DiffSummary`] entries.
#[derive(Debug, Default)]
pub struct SummaryEditor {
    dirs: Slab<SummaryDirBaton>,
    files: Slab<SummaryFileBaton>,
    summaries: Vec<DiffSummary>,
}

impl SummaryEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_summaries(self) -> Vec<DiffSummary> {
        self.summaries
    }

    fn bad_token(token: usize) -> ClientError {
        ClientError::new(
            ErrorKind::EditorProtocolViolation,
            format!("unknown token {token}"),
        )
    }
}

struct MarkTextChanged<'a> {
    text_changed: &'a mut bool,
}

impl WindowHandler for MarkTextChanged<'_> {
    fn window(&mut self, _window: Option<&DeltaWindow>) -> ClientResult<()> {
        *self.text_changed = true;
        Ok(())
    }
}

impl TreeEditor for SummaryEditor {
    fn open_root(&mut self, _base_rev: Option<Revnum>) -> ClientResult<DirToken> {
        let baton = SummaryDirBaton {
            path: RepoPathBuf::root(),
            is_add: false,
            props_changed: false,
        };
        Ok(DirToken(self.dirs.insert(baton)))
    }

    fn delete_entry(
        &mut self,
        name: &RepoPathComponent,
        _base_rev: Option<Revnum>,
        parent: DirToken,
    ) -> ClientResult<()> {
        let parent_path = {
            let baton = self.dirs.get(parent.0).ok_or_else(|| Self::bad_token(parent.0))?;
            baton.path.clone()
        };
        self.summaries.push(DiffSummary {
            path: parent_path.join(name),
            kind: NodeKind::Unknown,
            action: DiffAction::Deleted,
            text_changed: false,
            props_changed: false,
        });
        Ok(())
    }

    fn add_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<DirToken> {
        let parent_path = {
            let baton = self.dirs.get(parent.0).ok_or_else(|| Self::bad_token(parent.0))?;
            baton.path.clone()
        };
        let baton = SummaryDirBaton {
            path: parent_path.join(name),
            is_add: true,
            props_changed: false,
        };
        Ok(DirToken(self.dirs.insert(baton)))
    }

    fn open_directory(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _base_rev: Option<Revnum>,
    ) -> ClientResult<DirToken> {
        let parent_path = {
            let baton = self.dirs.get(parent.0).ok_or_else(|| Self::bad_token(parent.0))?;
            baton.path.clone()
        };
        let baton = SummaryDirBaton {
            path: parent_path.join(name),
            is_add: false,
            props_changed: false,
        };
        Ok(DirToken(self.dirs.insert(baton)))
    }

    fn change_dir_prop(
        &mut self,
        dir: DirToken,
        _name: &str,
        _value: Option<&BStr>,
    ) -> ClientResult<()> {
        let baton = self.dirs.get_mut(dir.0).ok_or_else(|| Self::bad_token(dir.0))?;
        baton.props_changed = true;
        Ok(())
    }

    fn close_directory(&mut self, dir: DirToken) -> ClientResult<()> {
        let baton = self
            .dirs
            .try_remove(dir.0)
            .ok_or_else(|| Self::bad_token(dir.0))?;
        if baton.is_add || baton.props_changed {
            self.summaries.push(DiffSummary {
                path: baton.path,
                kind: NodeKind::Dir,
                action: if baton.is_add {
                    DiffAction::Added
                } else {
                    DiffAction::Modified
                },
                text_changed: false,
                props_changed: baton.props_changed,
            });
        }
        Ok(())
    }

    fn add_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _copy_from: Option<(&RepoUrl, Revnum)>,
    ) -> ClientResult<FileToken> {
        let parent_path = {
            let baton = self.dirs.get(parent.0).ok_or_else(|| Self::bad_token(parent.0))?;
            baton.path.clone()
        };
        let baton = SummaryFileBaton {
            path: parent_path.join(name),
            is_add: true,
            text_changed: false,
            props_changed: false,
        };
        Ok(FileToken(self.files.insert(baton)))
    }

    fn open_file(
        &mut self,
        name: &RepoPathComponent,
        parent: DirToken,
        _base_rev: Option<Revnum>,
    ) -> ClientResult<FileToken> {
        let parent_path = {
            let baton = self.dirs.get(parent.0).ok_or_else(|| Self::bad_token(parent.0))?;
            baton.path.clone()
        };
        let baton = SummaryFileBaton {
            path: parent_path.join(name),
            is_add: false,
            text_changed: false,
            props_changed: false,
        };
        Ok(FileToken(self.files.insert(baton)))
    }

    fn apply_textdelta(
        &mut self,
        file: FileToken,
        _base_checksum: Option<&Checksum>,
    ) -> ClientResult<Box<dyn WindowHandler + '_>> {
        let baton = self
            .files
            .get_mut(file.0)
            .ok_or_else(|| Self::bad_token(file.0))?;
        Ok(Box::new(MarkTextChanged {
            text_changed: &mut baton.text_changed,
        }))
    }

    fn change_file_prop(
        &mut self,
        file: FileToken,
        _name: &str,
        _value: Option<&BStr>,
    ) -> ClientResult<()> {
        let baton = self
            .files
            .get_mut(file.0)
            .ok_or_else(|| Self::bad_token(file.0))?;
        baton.props_changed = true;
        Ok(())
    }

    fn close_file(
        &mut self,
        file: FileToken,
        _text_checksum: Option<&Checksum>,
    ) -> ClientResult<()> {
        let baton = self
            .files
            .try_remove(file.0)
            .ok_or_else(|| Self::bad_token(file.0))?;
        if baton.is_add || baton.text_changed || baton.props_changed {
            self.summaries.push(DiffSummary {
                path: baton.path,
                kind: NodeKind::File,
                action: if baton.is_add {
                    DiffAction::Added
                } else {
                    DiffAction::Modified
                },
                text_changed: baton.text_changed,
                props_changed: baton.props_changed,
            });
        }
        Ok(())
    }

    fn close_edit(&mut self) -> ClientResult<()> {
        self.summaries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(())
    }

    fn abort_edit(&mut self) -> ClientResult<()> {
        self.summaries.clear();
        Ok(())
    }
}

/// Splits two texts into lines and locates the changed middle region:
/// `(common_prefix_lines, old_changed, new_changed)`. The common suffix is
/// whatever follows the changed regions on both sides.
pub fn changed_line_region<'a>(
    old: &'a [u8],
    new: &'a [u8],
) -> (usize, Vec<&'a [u8]>, Vec<&'a [u8]>) {
    let old_lines: Vec<&[u8]> = old.lines_with_terminator().collect();
    let new_lines: Vec<&[u8]> = new.lines_with_terminator().collect();

    let mut prefix = 0;
    while prefix < old_lines.len()
        && prefix < new_lines.len()
        && old_lines[prefix] == new_lines[prefix]
    {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old_lines.len() - prefix
        && suffix < new_lines.len() - prefix
        && old_lines[old_lines.len() - 1 - suffix] == new_lines[new_lines.len() - 1 - suffix]
    {
        suffix += 1;
    }
    let old_changed = old_lines[prefix..old_lines.len() - suffix].to_vec();
    let new_changed = new_lines[prefix..new_lines.len() - suffix].to_vec();
    (prefix, old_changed, new_changed)
}

/// Writes a minimal unified diff of one file: a header and a single hunk
/// covering the changed region.
pub fn write_unified_diff(
    out: &mut dyn Write,
    label: &RepoPath,
    old_rev: Option<Revnum>,
    new_rev: Option<Revnum>,
    old: &[u8],
    new: &[u8],
) -> io::Result<()> {
    if old == new {
        return Ok(());
    }
    let rev_label = |rev: Option<Revnum>| match rev {
        Some(rev) => format!("(revision {rev})"),
        None => "(working copy)".to_owned(),
    };
    writeln!(out, "Index: {}", label.as_str())?;
    writeln!(out, "===================================================================")?;
    writeln!(out, "--- {}\t{}", label.as_str(), rev_label(old_rev))?;
    writeln!(out, "+++ {}\t{}", label.as_str(), rev_label(new_rev))?;

    let (prefix, old_changed, new_changed) = changed_line_region(old, new);
    writeln!(
        out,
        "@@ -{},{} +{},{} @@",
        prefix + usize::from(!old_changed.is_empty()),
        old_changed.len(),
        prefix + usize::from(!new_changed.is_empty()),
        new_changed.len(),
    )?;
    for line in &old_changed {
        out.write_all(b"-")?;
        write_line(out, line)?;
    }
    for line in &new_changed {
        out.write_all(b"+")?;
        write_line(out, line)?;
    }
    Ok(())
}

fn write_line(out: &mut dyn Write, line: &[u8]) -> io::Result<()> {
    out.write_all(line)?;
    if !line.ends_with(b"\n") {
        out.write_all(b"\n\\ No newline at end of file\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_line_region() {
        let old = b"a\nb\nc\nd\n";
        let new = b"a\nx\ny\nd\n";
        let (prefix, old_changed, new_changed) = changed_line_region(old, new);
        assert_eq!(prefix, 1);
        assert_eq!(old_changed, vec![b"b\n".as_slice(), b"c\n".as_slice()]);
        assert_eq!(new_changed, vec![b"x\n".as_slice(), b"y\n".as_slice()]);
    }

    #[test]
    fn test_changed_line_region_identical() {
        let (prefix, old_changed, new_changed) = changed_line_region(b"a\n", b"a\n");
        assert_eq!(prefix, 1);
        assert!(old_changed.is_empty());
        assert!(new_changed.is_empty());
    }

    #[test]
    fn test_unified_diff_output() {
        let mut out = Vec::new();
        let path = RepoPath::from_internal_string("dir/a.txt").unwrap();
        write_unified_diff(
            &mut out,
            path,
            Some(Revnum(10)),
            Some(Revnum(12)),
            b"one\ntwo\n",
            b"one\nthree\n",
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Index: dir/a.txt\n"));
        assert!(text.contains("--- dir/a.txt\t(revision 10)"));
        assert!(text.contains("+++ dir/a.txt\t(revision 12)"));
        assert!(text.contains("-two\n"));
        assert!(text.contains("+three\n"));
    }

    #[test]
    fn test_unified_diff_skips_identical() {
        let mut out = Vec::new();
        let path = RepoPath::from_internal_string("a").unwrap();
        write_unified_diff(&mut out, path, None, None, b"same\n", b"same\n").unwrap();
        assert!(out.is_empty());
    }
}
