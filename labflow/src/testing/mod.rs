//! Test doubles and fixtures.
//!
//! Exposed as a regular module so downstream crates can drive a pipeline
//! against scripted collaborators without standing up real services.

pub mod fixtures;
pub mod mocks;

pub use mocks::{InMemoryStore, MockTextService, ScriptedJobApi};
