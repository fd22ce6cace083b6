//! Target declarations - named build rules with actions and policies.
//!
//! A target's name doubles as its filesystem artifact path unless the
//! target is phony. Targets are created through [`TargetBuilder`]
//! (obtained from [`BuildGraph::target`](crate::core::graph::BuildGraph::target))
//! at configuration time and are immutable afterwards, except for the
//! memoized dependency resolution.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use crate::core::deps::{DepShape, DepSpec, ResolvedDeps};
use crate::core::graph::BuildGraph;
use crate::error::BuildResult;

/// What a build action receives when it runs.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// The target's own name.
    pub name: String,

    /// Resolved dependency names, preserving the declared shape.
    pub deps: DepShape,
}

/// Boxed asynchronous build action.
pub type BuildAction = Box<dyn Fn(ActionContext) -> BoxFuture<'static, BuildResult<()>> + Send + Sync>;

/// When a target's build action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebuild {
    /// Run the action on every invocation.
    Always,

    /// Accept an existing artifact as-is; run the action only to create
    /// a missing one.
    Never,

    /// Run the action when the combined fingerprint changed or the
    /// artifact is missing.
    OnChanged,
}

/// A named, registered build rule.
pub struct Target {
    name: String,
    action: BuildAction,
    rebuild: Rebuild,
    phony: bool,
    doc: Option<String>,
    silent: bool,
    deps: DepSpec,
    resolved: OnceCell<ResolvedDeps>,
}

impl Target {
    /// The target's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rebuild policy.
    pub fn rebuild(&self) -> Rebuild {
        self.rebuild
    }

    /// Whether this target has no filesystem artifact.
    pub fn phony(&self) -> bool {
        self.phony
    }

    /// Documentation shown in help listings.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Whether target-level error logging is suppressed.
    pub fn silent(&self) -> bool {
        self.silent
    }

    /// Resolve the dependency spec, memoizing the result. Lazy producers
    /// are drained on the first call only.
    pub async fn resolved_deps(&self) -> BuildResult<&ResolvedDeps> {
        self.resolved
            .get_or_try_init(|| self.deps.resolve())
            .await
    }

    /// Invoke the build action.
    pub(crate) async fn invoke(&self, cx: ActionContext) -> BuildResult<()> {
        (self.action)(cx).await
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("rebuild", &self.rebuild)
            .field("phony", &self.phony)
            .field("silent", &self.silent)
            .finish_non_exhaustive()
    }
}

/// Builder for registering a target on a [`BuildGraph`].
pub struct TargetBuilder<'g> {
    graph: &'g BuildGraph,
    name: String,
    deps: Option<DepSpec>,
    rebuild: Option<Rebuild>,
    phony: bool,
    doc: Option<String>,
    silent: bool,
}

impl<'g> TargetBuilder<'g> {
    pub(crate) fn new(graph: &'g BuildGraph, name: String) -> Self {
        TargetBuilder {
            graph,
            name,
            deps: None,
            rebuild: None,
            phony: false,
            doc: None,
            silent: false,
        }
    }

    /// Declare the dependency specification.
    pub fn deps(mut self, spec: impl Into<DepSpec>) -> Self {
        self.deps = Some(spec.into());
        self
    }

    /// Override the rebuild policy. Defaults to [`Rebuild::OnChanged`]
    /// when dependencies were declared and [`Rebuild::Always`] otherwise.
    pub fn rebuild(mut self, rebuild: Rebuild) -> Self {
        self.rebuild = Some(rebuild);
        self
    }

    /// Mark the target phony: no filesystem artifact is expected.
    pub fn phony(mut self) -> Self {
        self.phony = true;
        self
    }

    /// Attach documentation for help listings.
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Suppress target-level error logging when the action fails.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Attach the build action, register the target, and return its
    /// handle for use as a dependency elsewhere.
    pub fn run<F, Fut>(self, action: F) -> Arc<Target>
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BuildResult<()>> + Send + 'static,
    {
        let rebuild = self.rebuild.unwrap_or(match self.deps {
            Some(_) => Rebuild::OnChanged,
            None => Rebuild::Always,
        });

        let target = Arc::new(Target {
            name: self.name,
            action: Box::new(move |cx| Box::pin(action(cx))),
            rebuild,
            phony: self.phony,
            doc: self.doc,
            silent: self.silent,
            deps: self.deps.unwrap_or_default(),
            resolved: OnceCell::new(),
        });

        self.graph.register(Arc::clone(&target));
        target
    }
}
