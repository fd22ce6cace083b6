//! The scheduler/executor driving the "ensure target is up to date"
//! protocol.
//!
//! `ensure(name)` resolves the target's dependencies, fans out over every
//! prerequisite concurrently, computes the combined fingerprint, consults
//! the rebuild policy, executes the build action if needed, and persists
//! the new fingerprint. Two pieces of state are kept across a run:
//!
//! - `done`: names whose build action fully completed this run
//! - `inflight`: names currently being built, each paired with a one-shot
//!   completion signal
//!
//! Together they give the single-flight guarantee: a target's build
//! action runs at most once per run no matter how many dependents request
//! it concurrently. Concurrent requesters await the completion signal
//! instead of starting a second build; the signal carries the outcome, so
//! a dependent never runs its own action after a failed prerequisite.
//!
//! There is no cooperative cancellation: prerequisite fan-out is drained
//! fully even after the first error, so already-started sibling subtrees
//! run to completion or failure on their own.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::builder::fingerprint::FingerprintStore;
use crate::core::deps::ResolvedDeps;
use crate::core::graph::BuildGraph;
use crate::core::target::{ActionContext, Rebuild, Target};
use crate::error::{BuildError, BuildResult};
use crate::util::config::Config;

/// Interval between "still waiting" warnings while blocked on a sibling
/// build of the same target.
const WAIT_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// Per-run bookkeeping for deduplication and cross-dependency
/// synchronization.
#[derive(Default)]
struct RunState {
    done: HashSet<String>,
    inflight: HashMap<String, watch::Receiver<Option<bool>>>,
}

/// How `ensure` should proceed for a given name.
enum Admission {
    /// Completed earlier this run; nothing to do.
    Done,
    /// Another caller is building it; await its completion signal.
    Wait(watch::Receiver<Option<bool>>),
    /// This caller owns the build and resolves the signal when finished.
    Run(watch::Sender<Option<bool>>),
}

/// What happened to a target during one `ensure` pass.
enum Outcome {
    /// The build action ran.
    Built,
    /// Up to date, accepted as-is, or a leaf input; no action ran.
    Fresh,
}

/// Executor for one build run.
pub struct BuildExecutor {
    graph: Arc<BuildGraph>,
    store: FingerprintStore,
    config: Config,
    state: Mutex<RunState>,
}

impl BuildExecutor {
    /// Create an executor over a graph, with the fingerprint store rooted
    /// at the configured cache directory.
    pub fn new(graph: Arc<BuildGraph>, config: Config) -> Self {
        let store = FingerprintStore::new(&config.cache_dir);
        BuildExecutor {
            graph,
            store,
            config,
            state: Mutex::new(RunState::default()),
        }
    }

    /// The fingerprint store backing this run.
    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Bring `name` up to date: prerequisites first, then the target
    /// itself, rebuilding only when its policy requires it.
    pub fn ensure<'a>(self: &'a Arc<Self>, name: &'a str) -> BoxFuture<'a, BuildResult<()>> {
        Box::pin(self.ensure_inner(name))
    }

    async fn ensure_inner(self: &Arc<Self>, name: &str) -> BuildResult<()> {
        self.store.prepare()?;

        match self.admit(name) {
            Admission::Done => Ok(()),
            Admission::Wait(rx) => self.wait_for_sibling(name, rx).await,
            Admission::Run(tx) => {
                let started = Instant::now();
                let result = self.build(name).await;

                let succeeded = result.is_ok();
                {
                    let mut state = self.state.lock().expect("run state lock poisoned");
                    if matches!(result, Ok(Outcome::Built)) {
                        state.done.insert(name.to_string());
                    }
                    state.inflight.remove(name);
                }
                // Resolved exactly once; waiters observe the outcome.
                let _ = tx.send(Some(succeeded));

                if self.config.profile {
                    tracing::info!(
                        "[{name}]: {:.3}s",
                        started.elapsed().as_secs_f64()
                    );
                }

                result.map(|_| ())
            }
        }
    }

    fn admit(&self, name: &str) -> Admission {
        let mut state = self.state.lock().expect("run state lock poisoned");
        if state.done.contains(name) {
            return Admission::Done;
        }
        if let Some(rx) = state.inflight.get(name) {
            return Admission::Wait(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        state.inflight.insert(name.to_string(), rx);
        Admission::Run(tx)
    }

    /// Await the completion signal of a concurrent build of the same
    /// target, warning periodically while the wait drags on.
    async fn wait_for_sibling(
        &self,
        name: &str,
        mut rx: watch::Receiver<Option<bool>>,
    ) -> BuildResult<()> {
        loop {
            match timeout(WAIT_WARN_INTERVAL, rx.changed()).await {
                Ok(Ok(())) => {
                    if let Some(succeeded) = *rx.borrow() {
                        if succeeded {
                            return Ok(());
                        }
                        return Err(BuildError::Failure {
                            message: Some(format!("`{name}` failed in a concurrent build")),
                        });
                    }
                }
                Ok(Err(_)) => {
                    // Builder dropped without resolving the signal.
                    return Err(BuildError::Failure {
                        message: Some(format!("build of `{name}` was abandoned")),
                    });
                }
                Err(_) => tracing::warn!("waiting for `{name}`"),
            }
        }
    }

    async fn build(self: &Arc<Self>, name: &str) -> BuildResult<Outcome> {
        match self.graph.get(name) {
            Some(target) => {
                let resolved = target.resolved_deps().await?.clone();
                self.ensure_prereqs(&resolved).await?;
                self.refresh_target(&target, resolved, name).await
            }
            None => self.refresh_leaf(name),
        }
    }

    /// Fan out `ensure` over every prerequisite and wait for all of them,
    /// even when one fails early.
    async fn ensure_prereqs(self: &Arc<Self>, resolved: &ResolvedDeps) -> BuildResult<()> {
        if self.config.sequential {
            for prereq in &resolved.flat {
                self.ensure(prereq).await?;
            }
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        for prereq in resolved.flat.iter().cloned() {
            let executor = Arc::clone(self);
            tasks.spawn(async move { executor.ensure(&prereq).await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) => Err(BuildError::Other(anyhow!(
                    "prerequisite task panicked: {join_error}"
                ))),
            };
            if let Err(error) = result {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// An unregistered name is a leaf filesystem input: fingerprint it
    /// and persist the digest if it changed. A missing path means a
    /// phony-like reference with no rule, which is a configuration error.
    fn refresh_leaf(&self, name: &str) -> BuildResult<Outcome> {
        if !Path::new(name).exists() {
            tracing::error!("no rule to make target `{name}`");
            return Err(BuildError::NoRule(name.to_string()));
        }

        let empty = Default::default();
        let digest = self.store.compute(&self.graph, &empty, name, false);
        if self.store.stored(name).as_deref() != Some(digest.as_str()) {
            self.store.save(name, &digest)?;
        }
        Ok(Outcome::Fresh)
    }

    /// Apply the rebuild policy and, when required, execute the build
    /// action and re-fingerprint.
    async fn refresh_target(
        &self,
        target: &Target,
        resolved: ResolvedDeps,
        name: &str,
    ) -> BuildResult<Outcome> {
        let phony = target.phony();
        let digest = self.store.compute(&self.graph, &resolved.flat, name, phony);
        let stored = self.store.stored(name);
        let artifact_exists = || Path::new(name).exists();

        match target.rebuild() {
            Rebuild::OnChanged
                if stored.as_deref() == Some(digest.as_str())
                    && (phony || artifact_exists()) =>
            {
                tracing::info!("skipping `{name}`");
                return Ok(Outcome::Fresh);
            }
            Rebuild::Never if !phony && artifact_exists() => {
                // Accept the artifact as-is; just persist its state.
                self.store.save(name, &digest)?;
                return Ok(Outcome::Fresh);
            }
            _ => {}
        }

        if !phony {
            tracing::info!("building `{name}`");
            if artifact_exists() && target.rebuild() != Rebuild::Never {
                // A stale leftover could mask an action that fails to
                // write its output.
                remove_artifact(name);
            }
        }

        let cx = ActionContext {
            name: name.to_string(),
            deps: resolved.shape.clone(),
        };
        if let Err(error) = target.invoke(cx).await {
            if !target.silent() {
                tracing::error!("target `{name}` failed: {error}");
            }
            return Err(error);
        }

        let digest = self.store.compute(&self.graph, &resolved.flat, name, phony);
        self.store.save(name, &digest)?;
        Ok(Outcome::Built)
    }
}

/// Remove a stale artifact, file or directory. Failures are not fatal;
/// the build action decides what to do with whatever is left.
fn remove_artifact(name: &str) {
    let path = Path::new(name);
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(error) = result {
        tracing::debug!("could not remove stale artifact `{name}`: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn executor(graph: Arc<BuildGraph>, tmp: &TempDir) -> Arc<BuildExecutor> {
        let config = Config::with_cache_dir(tmp.path().join("cache"));
        Arc::new(BuildExecutor::new(graph, config))
    }

    #[tokio::test]
    async fn test_ensure_done_is_idempotent_within_run() {
        let tmp = TempDir::new().unwrap();
        let graph = BuildGraph::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        graph.target("all").phony().run(move |_cx| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let exec = executor(Arc::clone(&graph), &tmp);
        exec.ensure("all").await.unwrap();
        exec.ensure("all").await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_rule_and_file_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let graph = BuildGraph::new();
        let exec = executor(graph, &tmp);

        let missing = tmp.path().join("nope.txt");
        let err = exec
            .ensure(missing.to_string_lossy().as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::NoRule(_)));
    }

    #[tokio::test]
    async fn test_leaf_input_gets_cache_entry() {
        let tmp = TempDir::new().unwrap();
        let graph = BuildGraph::new();
        let exec = executor(graph, &tmp);

        let leaf = tmp.path().join("input.txt");
        std::fs::write(&leaf, "data").unwrap();
        let name = leaf.to_string_lossy().to_string();

        exec.ensure(&name).await.unwrap();
        assert!(exec.store().has_entry(&name));
    }

    #[tokio::test]
    async fn test_failed_prereq_blocks_dependent_action() {
        let tmp = TempDir::new().unwrap();
        let graph = BuildGraph::new();
        let ran = Arc::new(AtomicUsize::new(0));

        graph
            .target("bad")
            .phony()
            .silent()
            .run(|_cx| async { crate::error::fail() });

        let r = Arc::clone(&ran);
        graph.target("top").phony().deps(["bad"]).run(move |_cx| {
            let r = Arc::clone(&r);
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let exec = executor(Arc::clone(&graph), &tmp);
        let err = exec.ensure("top").await.unwrap_err();
        assert!(err.is_failure());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sequential_mode_builds_all_prereqs() {
        let tmp = TempDir::new().unwrap();
        let graph = BuildGraph::new();
        let count = Arc::new(AtomicUsize::new(0));

        for name in ["a", "b", "c"] {
            let c = Arc::clone(&count);
            graph.target(name).phony().run(move |_cx| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        graph
            .target("all")
            .phony()
            .deps(["a", "b", "c"])
            .run(|_cx| async { Ok(()) });

        let mut config = Config::with_cache_dir(tmp.path().join("cache"));
        config.sequential = true;
        let exec = Arc::new(BuildExecutor::new(graph, config));

        exec.ensure("all").await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_action_receives_shape_and_name() {
        let tmp = TempDir::new().unwrap();
        let graph = BuildGraph::new();

        let leaf = tmp.path().join("x.txt");
        std::fs::write(&leaf, "x").unwrap();
        let leaf_name = leaf.to_string_lossy().to_string();

        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let spec = crate::core::deps::DepSpec::record([("inputs", vec![leaf_name.clone()])]);
        graph.target("all").phony().deps(spec).run(move |cx| {
            let s = Arc::clone(&s);
            async move {
                *s.lock().unwrap() = Some(cx);
                Ok(())
            }
        });

        let exec = executor(graph, &tmp);
        exec.ensure("all").await.unwrap();

        let cx = seen.lock().unwrap().take().unwrap();
        assert_eq!(cx.name, "all");
        assert_eq!(
            cx.deps.get("inputs").unwrap().as_list().unwrap(),
            std::slice::from_ref(&leaf_name)
        );
    }
}
