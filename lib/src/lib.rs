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

//! Client library for rsvn, a Subversion-compatible version control
//! client.
//!
//! The crate drives operations against a versioned repository while
//! maintaining a local working copy. The two load-bearing subsystems are
//! the streaming tree-editor protocol with its commit driver
//! ([`editor`], [`delta`], [`commit`]) and the conflict model with its
//! resolver ([`conflict`], [`resolver`]). The repository transport and
//! the working-copy metadata store are external collaborators consumed
//! through the [`ra`] and [`wc`] interfaces; [`simple_ra`] and
//! [`simple_wc`] are in-memory implementations of those interfaces.

#![warn(missing_docs)]

pub mod checksum;
pub mod client;
pub mod commit;
pub mod conflict;
pub mod delta;
pub mod diff;
pub mod editor;
pub mod error;
pub mod ra;
pub mod repo_path;
pub mod repo_url;
pub mod resolver;
pub mod revision;
pub mod simple_ra;
pub mod simple_wc;
pub mod wc;
pub mod wc_editor;
