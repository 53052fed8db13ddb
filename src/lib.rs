//! # nest - Recursive C/C++ Build Orchestrator
//!
//! nest builds trees of native projects. A root project names its
//! dependencies (local paths, git repositories, downloaded archives or
//! installed packages); nest fetches them, builds them in dependency order
//! and feeds headers and libraries up the tree.
//!
//! ## Quick Start
//!
//! ```bash
//! # Build the project in the current directory
//! nest build
//!
//! # Show the resolved dependency graph
//! nest tree
//! ```
//!
//! ## Module Organization
//!
//! - [`build`] - Build session: processing, staleness, steps, relocation
//! - [`graph`] - Context/target arena with dedup caches
//! - [`deps`] - Dependency resolution and fetching
//! - [`backend`] - Native build backend (CMake)
//! - [`descriptor`] - Project descriptor parsing (`nest.toml`)

/// Native build backend interface and the CMake implementation.
pub mod backend;

/// Build session, step runner and artifact handling.
pub mod build;

/// Layered tool settings.
pub mod config;

/// Dependency resolution, git fetching and archive extraction.
pub mod deps;

/// Project descriptor parsing (`nest.toml` / `nest.json`).
pub mod descriptor;

/// Error taxonomy and recoverable warnings.
pub mod error;

/// Build graph of contexts and targets.
pub mod graph;

/// Buildable units and their lifecycle.
pub mod target;

/// Dependency tree visualization.
pub mod tree;

/// Terminal UI utilities (tables).
pub mod ui;
