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

//! Content checksums used to verify text-delta bases and results.

#![expect(missing_docs)]

use std::fmt;

use blake2::Blake2b512;
use digest::Digest as _;

/// A content checksum. Compared bytewise; rendered as lowercase hex.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Checksum(Vec<u8>);

impl Checksum {
    /// Computes the checksum of `contents`.
    pub fn of_contents(contents: impl AsRef<[u8]>) -> Self {
        let mut hasher = Blake2b512::default();
        hasher.update(contents.as_ref());
        Self(hasher.finalize().to_vec())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parses a lowercase hex string into a checksum.
    pub fn try_from_hex(hex: impl AsRef<[u8]>) -> Option<Self> {
        let hex = hex.as_ref();
        if hex.len() % 2 != 0 {
            return None;
        }
        let value = |b: u8| -> Option<u8> {
            match b {
                b'0'..=b'9' => Some(b - b'0'),
                b'a'..=b'f' => Some(b - b'a' + 10),
                _ => None,
            }
        };
        hex.chunks(2)
            .map(|pair| Some(value(pair[0])? * 16 + value(pair[1])?))
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Checksum").field(&self.hex()).finish()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_and_distinct() {
        let a = Checksum::of_contents(b"hello");
        let b = Checksum::of_contents(b"hello");
        let c = Checksum::of_contents(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hex_round_trip() {
        let checksum = Checksum::of_contents(b"content");
        assert_eq!(
            Checksum::try_from_hex(checksum.hex()).unwrap(),
            checksum
        );
        assert_eq!(Checksum::try_from_hex("0g"), None);
        assert_eq!(Checksum::try_from_hex("abc"), None);
    }
}
