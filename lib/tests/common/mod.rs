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

//! Shared setup for the integration tests: an in-memory repository, an
//! in-memory working copy, and a client context wired to both.

// Not every test file uses every helper.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use rsvn_lib::client::AuthBaton;
use rsvn_lib::client::ClientContext;
use rsvn_lib::error::ClientResult;
use rsvn_lib::ra::Session;
use rsvn_lib::repo_url::RepoUrl;
use rsvn_lib::simple_ra::SimpleRepo;
use rsvn_lib::simple_wc::SimpleWc;

pub const REPO_ROOT: &str = "https://svn.example.org/repo";
pub const UUID: &str = "c5c7cf35-4a2d-4b6f-a1ce-f8c0e31fbb6b";

pub fn test_repo() -> SimpleRepo {
    SimpleRepo::new(REPO_ROOT, UUID)
}

pub fn wc_root() -> PathBuf {
    PathBuf::from("/wc")
}

pub fn empty_wc() -> SimpleWc {
    SimpleWc::new(&wc_root(), REPO_ROOT, UUID)
}

/// Builds a context over `repo` and `wc`. The returned counter tracks how
/// many sessions were opened, so tests can assert that an operation made
/// no network contact at all.
pub fn make_ctx(repo: &SimpleRepo, wc: SimpleWc) -> (ClientContext, Arc<AtomicUsize>) {
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = opens.clone();
    let repo = repo.clone();
    let opener = move |url: &RepoUrl, auth: &AuthBaton| -> ClientResult<Box<dyn Session>> {
        counter.fetch_add(1, Ordering::SeqCst);
        let username = auth.username.as_deref().unwrap_or("test-user");
        Ok(Box::new(repo.session(url, username)?))
    };
    let ctx = ClientContext::new(Box::new(wc), Box::new(opener));
    (ctx, opens)
}

pub fn wc_of(ctx: &ClientContext) -> &SimpleWc {
    ctx.wc.as_any().downcast_ref().expect("SimpleWc store")
}

pub fn wc_of_mut(ctx: &mut ClientContext) -> &mut SimpleWc {
    ctx.wc.as_any_mut().downcast_mut().expect("SimpleWc store")
}

pub fn wc_path(tail: &str) -> PathBuf {
    wc_root().join(tail)
}

pub fn repo_url(tail: &str) -> String {
    format!("{REPO_ROOT}/{tail}")
}
