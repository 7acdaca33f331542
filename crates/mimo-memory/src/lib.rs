//! Semantic store for the Mimo memory operating system.
//!
//! Provides a typed Subject-Predicate-Object triple graph over SQLite:
//! - **Repository**: validated CRUD, upsert, bulk insert, and TTL cleanup
//! - **Query engine**: transitive closure, pattern matching, path search
//! - **Resolver**: maps free-text mentions to canonical ids via entity anchors
//! - **Observer**: filters high-confidence relationships into suggestions
//!
//! Reads degrade to empty results on storage failure; writes surface errors.

pub mod anchors;
pub mod enrichment;
pub mod migration;
pub mod observer;
pub mod query;
pub mod repository;
pub mod resolver;
pub mod vector;

mod sql;
mod substrate;
pub use substrate::SemanticSubstrate;
