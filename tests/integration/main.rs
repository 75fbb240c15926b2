//! Integration tests, built as one binary against a temp-file store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod catalog_sync;
mod lifecycle_expiry;
mod progress_completion;
mod quota_concurrency;
mod reroll_partial;
