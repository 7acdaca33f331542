//! Core types for the Mimo semantic store.
//!
//! This crate defines the triple data model, traversal result shapes, entity
//! resolution and suggestion types, configuration, and the shared error
//! taxonomy. It contains no storage logic.

pub mod config;
pub mod error;
pub mod resolution;
pub mod suggestion;
pub mod triple;
