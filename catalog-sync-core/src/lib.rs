#![doc = "catalog-sync-core: core logic library for catalog-sync."]

//! Vendor driver-catalog synchronisation: change detection, archive
//! extraction, catalog parsing, dependency-ordered publication into an
//! update repository, and the per-run bookkeeping around it all.
//!
//! The binary crate (`catalog-sync`) owns configuration loading, the CLI
//! surface and the scheduler loop; everything testable lives here behind
//! the trait seams in [`contract`].

pub mod compare;
pub mod contract;
pub mod executor;
pub mod extract;
pub mod fetch;
pub mod graph;
pub mod importer;
pub mod layout;
pub mod model;
pub mod parse;
pub mod sync;
pub mod vendor;
