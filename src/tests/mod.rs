//! tests/mod.rs
//! Service-level tests against an in-memory store and queue.

mod ingest_tests;
mod support;
