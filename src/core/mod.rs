//! Core data model for slipway.
//!
//! This module contains the foundational types:
//! - Target declarations, rebuild policies, and build actions
//! - Dependency specifications and their resolution
//! - The build graph (target registry)

pub mod deps;
pub mod graph;
pub mod target;

pub use deps::{Dep, DepEntry, DepShape, DepSpec, ResolvedDeps};
pub use graph::BuildGraph;
pub use target::{ActionContext, Rebuild, Target, TargetBuilder};
