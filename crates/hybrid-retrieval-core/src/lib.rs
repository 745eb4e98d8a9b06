//! # Hybrid Retrieval Core
//!
//! Storage-agnostic logic for the hybrid retrieval engine: data models,
//! chunking, entity/relation extraction, the flat inner-product vector
//! index, the graph store abstraction, hybrid retrieval, conversation
//! memory, and answer composition.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Persistence of
//! the vector index and the SQLite graph store live in the
//! `hybrid-retrieval` app crate.

pub mod chunk;
pub mod compose;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod graph;
pub mod memory;
pub mod models;
pub mod retrieve;
pub mod vector;
