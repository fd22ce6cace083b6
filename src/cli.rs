//! Driver surface: argument parsing, runtime options, and the top-level
//! build loop.
//!
//! Host programs register targets on a [`BuildGraph`], register any
//! runtime options, then hand the process argv to [`Driver::run`].
//! Positional arguments are target names to bring up to date;
//! `-DKEY=VALUE` defines invoke the matching option callback (`-DKEY`
//! alone passes `"ON"`); the literal target `help` (or an empty target
//! list) prints every phony target with its documentation plus all
//! registered options, without building anything.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::builder::executor::BuildExecutor;
use crate::core::graph::BuildGraph;
use crate::error::{BuildError, BuildResult};
use crate::util::config::Config;

/// Parsed command line for a build invocation.
#[derive(Parser, Debug)]
#[command(name = "slipway", about = "Programmable build orchestrator", disable_version_flag = true)]
pub struct Cli {
    /// Set a runtime option; bare KEY means KEY=ON
    #[arg(short = 'D', value_name = "KEY[=VALUE]")]
    pub define: Vec<String>,

    /// Target names to build; `help` lists targets and options
    pub targets: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Callback invoked when a `-D` define names this option.
pub type OptionCallback = Box<dyn Fn(&str) -> BuildResult<()> + Send + Sync>;

struct OptionDef {
    doc: String,
    callback: OptionCallback,
}

/// Registry of runtime options settable via `-DKEY=VALUE`.
#[derive(Default)]
pub struct Options {
    defs: BTreeMap<String, OptionDef>,
}

impl Options {
    /// Create an empty registry.
    pub fn new() -> Self {
        Options::default()
    }

    /// Register an option. Registering the same name twice is a
    /// configuration error.
    pub fn register<F>(&mut self, name: impl Into<String>, doc: impl Into<String>, callback: F) -> BuildResult<()>
    where
        F: Fn(&str) -> BuildResult<()> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.defs.contains_key(&name) {
            return Err(BuildError::DuplicateOption(name));
        }
        self.defs.insert(
            name,
            OptionDef {
                doc: doc.into(),
                callback: Box::new(callback),
            },
        );
        Ok(())
    }

    /// Invoke the callback for a define. Unknown names are a
    /// configuration error.
    pub fn apply(&self, key: &str, value: &str) -> BuildResult<()> {
        match self.defs.get(key) {
            Some(def) => (def.callback)(value),
            None => Err(BuildError::UnknownOption(key.to_string())),
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defs.iter().map(|(name, def)| (name.as_str(), def.doc.as_str()))
    }
}

/// Top-level build driver.
pub struct Driver {
    graph: Arc<BuildGraph>,
    options: Options,
    config: Config,
}

impl Driver {
    /// Create a driver with configuration read from the environment.
    pub fn new(graph: Arc<BuildGraph>) -> Self {
        Driver {
            graph,
            options: Options::new(),
            config: Config::from_env(),
        }
    }

    /// Override the configuration (used by tests and embedding hosts).
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// The option registry, for configuration-time registration.
    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// Parse argv, apply defines, and build the requested targets in
    /// order, stopping at the first failure. Owns the async runtime.
    pub fn run<I, T>(&self, args: I) -> BuildResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = Cli::parse_from(args);
        init_logging(cli.verbose);

        for define in &cli.define {
            let (key, value) = split_define(define);
            self.options.apply(key, value)?;
        }

        if cli.targets.is_empty() || cli.targets.iter().any(|t| t == "help") {
            self.print_help();
            return Ok(());
        }

        let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
        runtime.block_on(self.run_targets(&cli.targets))
    }

    /// Build the given targets in order, stopping at the first failure.
    /// Siblings of a failed target that are already running finish on
    /// their own; no further top-level targets are started.
    pub async fn run_targets(&self, targets: &[String]) -> BuildResult<()> {
        let executor = Arc::new(BuildExecutor::new(
            Arc::clone(&self.graph),
            self.config.clone(),
        ));

        for target in targets {
            if let Err(error) = executor.ensure(target).await {
                tracing::error!("build of `{target}` failed: {error}");
                return Err(error);
            }
        }
        Ok(())
    }

    fn print_help(&self) {
        println!("Targets:");
        for (name, target) in self.graph.targets() {
            if !target.phony() {
                continue;
            }
            println!("  [{name}] {}", target.doc().unwrap_or("Undocumented"));
        }

        println!("Options:");
        for (name, doc) in self.options.iter() {
            println!("  -D{name}  {doc}");
        }
    }
}

/// Initialize tracing output for a build invocation. Safe to call more
/// than once; later calls are no-ops.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("slipway=debug")
    } else {
        EnvFilter::new("slipway=info")
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Split a `-D` define into key and value; a bare key means `"ON"`.
fn split_define(define: &str) -> (&str, &str) {
    match define.split_once('=') {
        Some((key, value)) => (key, value),
        None => (define, "ON"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_split_define() {
        assert_eq!(split_define("key=value"), ("key", "value"));
        assert_eq!(split_define("flag"), ("flag", "ON"));
        assert_eq!(split_define("key=a=b"), ("key", "a=b"));
    }

    #[test]
    fn test_cli_parses_defines_and_targets() {
        let cli = Cli::parse_from(["slipway", "-Dmode=release", "-Dfast", "build", "test"]);
        assert_eq!(cli.define, vec!["mode=release", "fast"]);
        assert_eq!(cli.targets, vec!["build", "test"]);
    }

    #[test]
    fn test_duplicate_option_registration() {
        let mut options = Options::new();
        options.register("mode", "build mode", |_| Ok(())).unwrap();
        let err = options.register("mode", "again", |_| Ok(())).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateOption(_)));
    }

    #[test]
    fn test_unknown_option_is_error() {
        let options = Options::new();
        let err = options.apply("nope", "ON").unwrap_err();
        assert!(matches!(err, BuildError::UnknownOption(_)));
    }

    #[test]
    fn test_option_callback_receives_value() {
        let seen = Arc::new(Mutex::new(String::new()));
        let mut options = Options::new();
        let s = Arc::clone(&seen);
        options
            .register("mode", "build mode", move |value| {
                *s.lock().unwrap() = value.to_string();
                Ok(())
            })
            .unwrap();

        options.apply("mode", "release").unwrap();
        assert_eq!(*seen.lock().unwrap(), "release");
    }

    #[test]
    fn test_help_invocation_builds_nothing() {
        let tmp = TempDir::new().unwrap();
        let graph = BuildGraph::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        graph
            .target("all")
            .phony()
            .doc("Build everything")
            .run(move |_cx| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });

        let driver =
            Driver::new(graph).with_config(Config::with_cache_dir(tmp.path().join("cache")));
        driver.run(["slipway", "help"]).unwrap();
        driver.run(["slipway"]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_defines_applied_before_building() {
        let tmp = TempDir::new().unwrap();
        let graph = BuildGraph::new();
        let seen = Arc::new(Mutex::new(String::new()));

        graph.target("all").phony().run(|_cx| async { Ok(()) });

        let mut driver =
            Driver::new(graph).with_config(Config::with_cache_dir(tmp.path().join("cache")));
        let s = Arc::clone(&seen);
        driver
            .options_mut()
            .register("mode", "build mode", move |value| {
                *s.lock().unwrap() = value.to_string();
                Ok(())
            })
            .unwrap();

        driver.run(["slipway", "-Dmode=debug", "all"]).unwrap();
        assert_eq!(*seen.lock().unwrap(), "debug");
    }
}
