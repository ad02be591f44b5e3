//! Route handlers for the REST API.

pub mod collab;
pub mod health;
pub mod repos;
pub mod sessions;
