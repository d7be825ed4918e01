//! `sbom-parsers` discovers the dependency graph of a software project.
//!
//! # Flow
//! 1. Load settings ([`config::load_config`]).
//! 2. Select every ecosystem parser that recognizes the project
//!    ([`orchestrator::Orchestrator::new`]).
//! 3. Each parser checks its tooling and installed modules, then builds a
//!    root [`models::Package`] whose `packages` map holds the dependency tree
//!    ([`parser::Parser`], [`graph`]).
//! 4. Packages are enriched with licenses found on disk ([`license`]) and,
//!    where the ecosystem needs it, upstream registries ([`registry`]).

pub mod command;
pub mod config;
pub mod error;
pub mod graph;
pub mod license;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod registry;

pub use error::{Error, Result};
pub use models::Package;
pub use orchestrator::{Orchestrator, ParserResult};
