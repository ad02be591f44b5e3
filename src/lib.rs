//! Quire - git-backed tasks and documents with real-time collaborative editing
//!
//! The library holds everything the `quire` binary runs: repository sync and
//! the commit pipeline (`git`), collaborative document sessions (`collab`),
//! and the HTTP surface over both (`rest`).

pub mod collab;
pub mod config;
pub mod content;
pub mod git;
pub mod logging;
pub mod repos;
pub mod rest;
