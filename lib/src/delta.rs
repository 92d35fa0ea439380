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

//! Binary text deltas.
//!
//! A delta is an ordered sequence of windows. Each window reconstructs a
//! slice of the target from three sources: a view into the delta base,
//! bytes already produced within the same window, and fresh literal bytes
//! carried by the window. Applying all windows in order against the base
//! yields the full target.

#![expect(missing_docs)]

use bstr::BString;

use crate::checksum::Checksum;
use crate::error::ClientError;
use crate::error::ClientResult;
use crate::error::ErrorKind;

/// Maximum amount of literal data carried per generated window.
const WINDOW_SIZE: usize = 64 * 1024;

/// A single instruction within a [`DeltaWindow`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeltaOp {
    /// Copy `len` bytes from the window's source view, starting at `offset`
    /// within the view.
    CopyFromSource { offset: usize, len: usize },
    /// Copy `len` bytes from the target produced so far by this window,
    /// starting at `offset`. The region may overlap the output position;
    /// bytes are copied front to back, which makes runs self-replicating.
    CopyFromTarget { offset: usize, len: usize },
    /// Copy `len` bytes of literal data, starting at `offset` within the
    /// window's `new_data`.
    CopyFromNewData { offset: usize, len: usize },
}

/// One window of a binary text delta.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeltaWindow {
    /// Offset of the source view within the delta base.
    pub source_offset: usize,
    /// Length of the source view.
    pub source_len: usize,
    /// Total number of target bytes this window produces.
    pub target_len: usize,
    pub ops: Vec<DeltaOp>,
    pub new_data: BString,
}

impl DeltaWindow {
    /// Builds a self-contained window carrying `data` as literal bytes.
    pub fn from_new_data(data: impl Into<BString>) -> Self {
        let new_data: BString = data.into();
        Self {
            source_offset: 0,
            source_len: 0,
            target_len: new_data.len(),
            ops: vec![DeltaOp::CopyFromNewData {
                offset: 0,
                len: new_data.len(),
            }],
            new_data,
        }
    }
}

/// A complete text delta with the checksums that guard its application.
#[derive(Clone, Debug, Default)]
pub struct TextDelta {
    /// Checksum of the base the producer generated this delta against.
    pub base_checksum: Option<Checksum>,
    pub windows: Vec<DeltaWindow>,
    /// Checksum of the full target text.
    pub result_checksum: Option<Checksum>,
}

impl TextDelta {
    /// Encodes `contents` as a sequence of self-contained windows, for
    /// producers that do not delta against a base.
    pub fn from_contents(contents: &[u8]) -> Self {
        let windows = contents
            .chunks(WINDOW_SIZE)
            .map(DeltaWindow::from_new_data)
            .collect();
        Self {
            base_checksum: None,
            windows,
            result_checksum: Some(Checksum::of_contents(contents)),
        }
    }
}

/// Consumes the windows of one text delta, in order. A `None` window
/// terminates the delta; no further windows may follow.
pub trait WindowHandler {
    fn window(&mut self, window: Option<&DeltaWindow>) -> ClientResult<()>;
}

/// A [`WindowHandler`] that appends windows to a [`TextDelta`] under
/// construction. Editor consumers that defer application until
/// `close_file` install one of these over their file baton's delta.
#[derive(Debug)]
pub struct WindowCollector<'a> {
    delta: &'a mut TextDelta,
}

impl<'a> WindowCollector<'a> {
    pub fn new(delta: &'a mut TextDelta) -> Self {
        Self { delta }
    }
}

impl WindowHandler for WindowCollector<'_> {
    fn window(&mut self, window: Option<&DeltaWindow>) -> ClientResult<()> {
        if let Some(window) = window {
            self.delta.windows.push(window.clone());
        }
        Ok(())
    }
}

fn protocol_error(message: impl Into<String>) -> ClientError {
    ClientError::new(ErrorKind::EditorProtocolViolation, message)
}

/// Applies delta windows to a base buffer, producing the target.
#[derive(Debug)]
pub struct DeltaApplier<'a> {
    base: &'a [u8],
    target: Vec<u8>,
}

impl<'a> DeltaApplier<'a> {
    pub fn new(base: &'a [u8]) -> Self {
        Self {
            base,
            target: Vec::new(),
        }
    }

    /// Applies one window. Windows must arrive in order.
    pub fn apply_window(&mut self, window: &DeltaWindow) -> ClientResult<()> {
        let source_end = window
            .source_offset
            .checked_add(window.source_len)
            .filter(|end| *end <= self.base.len())
            .ok_or_else(|| {
                protocol_error(format!(
                    "delta source view [{}, +{}) exceeds base length {}",
                    window.source_offset,
                    window.source_len,
                    self.base.len()
                ))
            })?;
        let source_view = &self.base[window.source_offset..source_end];

        let window_start = self.target.len();
        for op in &window.ops {
            match *op {
                DeltaOp::CopyFromSource { offset, len } => {
                    let end = offset
                        .checked_add(len)
                        .filter(|end| *end <= source_view.len())
                        .ok_or_else(|| protocol_error("delta op reads past the source view"))?;
                    self.target.extend_from_slice(&source_view[offset..end]);
                }
                DeltaOp::CopyFromTarget { offset, len } => {
                    let produced = self.target.len() - window_start;
                    if offset >= produced {
                        return Err(protocol_error(
                            "delta op reads target bytes that were not produced yet",
                        ));
                    }
                    // The run may overlap its own output; copy bytewise.
                    for i in 0..len {
                        let byte = self.target[window_start + offset + i];
                        self.target.push(byte);
                    }
                }
                DeltaOp::CopyFromNewData { offset, len } => {
                    let end = offset
                        .checked_add(len)
                        .filter(|end| *end <= window.new_data.len())
                        .ok_or_else(|| protocol_error("delta op reads past the literal data"))?;
                    self.target.extend_from_slice(&window.new_data[offset..end]);
                }
            }
        }

        let produced = self.target.len() - window_start;
        if produced != window.target_len {
            return Err(protocol_error(format!(
                "delta window produced {produced} bytes, expected {}",
                window.target_len
            )));
        }
        Ok(())
    }

    pub fn finish(self) -> BString {
        self.target.into()
    }
}

/// Applies a complete [`TextDelta`] to `base`, verifying both checksums.
pub fn apply_delta(base: &[u8], delta: &TextDelta) -> ClientResult<BString> {
    if let Some(expected) = &delta.base_checksum {
        let actual = Checksum::of_contents(base);
        if actual != *expected {
            return Err(ClientError::new(
                ErrorKind::ChecksumMismatch,
                format!("delta base checksum mismatch: expected {expected}, got {actual}"),
            ));
        }
    }
    let mut applier = DeltaApplier::new(base);
    for window in &delta.windows {
        applier.apply_window(window)?;
    }
    let target = applier.finish();
    if let Some(expected) = &delta.result_checksum {
        let actual = Checksum::of_contents(&target);
        if actual != *expected {
            return Err(ClientError::new(
                ErrorKind::ChecksumMismatch,
                format!("delta result checksum mismatch: expected {expected}, got {actual}"),
            ));
        }
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_contents_round_trip() {
        let contents = b"some file contents\n".as_slice();
        let delta = TextDelta::from_contents(contents);
        assert_eq!(apply_delta(b"old base", &delta).unwrap(), contents);
        assert_eq!(apply_delta(b"", &delta).unwrap(), contents);
    }

    #[test]
    fn test_source_and_target_copies() {
        // Base "abcdef"; produce "abcabcXYXYXY".
        let window = DeltaWindow {
            source_offset: 0,
            source_len: 3,
            target_len: 12,
            ops: vec![
                DeltaOp::CopyFromSource { offset: 0, len: 3 },
                DeltaOp::CopyFromTarget { offset: 0, len: 3 },
                DeltaOp::CopyFromNewData { offset: 0, len: 2 },
                // Overlapping target run: replicates "XY" twice more.
                DeltaOp::CopyFromTarget { offset: 6, len: 4 },
            ],
            new_data: BString::from("XY"),
        };
        let delta = TextDelta {
            base_checksum: None,
            windows: vec![window],
            result_checksum: None,
        };
        assert_eq!(apply_delta(b"abcdef", &delta).unwrap(), "abcabcXYXYXY");
    }

    #[test]
    fn test_window_length_mismatch_rejected() {
        let mut window = DeltaWindow::from_new_data("data");
        window.target_len = 3;
        let mut applier = DeltaApplier::new(b"");
        let err = applier.apply_window(&window).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EditorProtocolViolation);
    }

    #[test]
    fn test_base_checksum_verified() {
        let mut delta = TextDelta::from_contents(b"new");
        delta.base_checksum = Some(Checksum::of_contents(b"expected base"));
        let err = apply_delta(b"other base", &delta).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert!(apply_delta(b"expected base", &delta).is_ok());
    }

    #[test]
    fn test_result_checksum_verified() {
        let mut delta = TextDelta::from_contents(b"new contents");
        delta.result_checksum = Some(Checksum::of_contents(b"something else"));
        let err = apply_delta(b"", &delta).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    }

    #[test]
    fn test_window_collector_gathers_windows() {
        let mut delta = TextDelta::default();
        let window = DeltaWindow::from_new_data("x");
        {
            let mut handler = WindowCollector::new(&mut delta);
            handler.window(Some(&window)).unwrap();
            handler.window(None).unwrap();
        }
        assert_eq!(delta.windows, vec![window]);
    }
}
