//! Slipway - a programmable build orchestrator.
//!
//! Host code declares named build targets with dependencies and an async
//! build action, and the engine decides which targets are stale, builds
//! them in dependency order with bounded concurrency, and persists
//! fingerprints to skip unchanged work on the next invocation.
//!
//! ```no_run
//! use slipway::{BuildGraph, Driver};
//!
//! let graph = BuildGraph::new();
//!
//! graph
//!     .target("out/app")
//!     .deps(["src/main.c"])
//!     .doc("Link the application")
//!     .run(|cx| async move {
//!         // compile, download, clone... any side effect goes here
//!         println!("building {} from {:?}", cx.name, cx.deps.names());
//!         Ok(())
//!     });
//!
//! let driver = Driver::new(graph);
//! driver.run(std::env::args()).unwrap();
//! ```

pub mod builder;
pub mod cli;
pub mod core;
pub mod error;
pub mod util;

pub use builder::{BuildExecutor, FingerprintStore};
pub use cli::{init_logging, Cli, Driver, Options};
pub use crate::core::{
    ActionContext, BuildGraph, Dep, DepEntry, DepShape, DepSpec, Rebuild, ResolvedDeps, Target,
    TargetBuilder,
};
pub use error::{fail, fail_with, with_fallback, with_fallback_async, BuildError, BuildResult};
pub use util::Config;
