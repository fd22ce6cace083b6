//! Dependency specifications and their resolution.
//!
//! A target may declare its prerequisites in several shapes: a single
//! dependency, an ordered list, a named record of dependencies or lists
//! of dependencies, or a lazily-produced sequence that is drained exactly
//! once. Resolving any shape yields two parallel results: a flat sorted
//! set of prerequisite names for the scheduler, and a shape-preserving
//! structure of names handed back to the build action.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::core::target::Target;
use crate::error::{BuildError, BuildResult};

/// A single dependency: either a bare name (usually a file path) or a
/// reference to a registered target.
#[derive(Debug, Clone)]
pub enum Dep {
    /// A name, doubling as a filesystem path when it is not a registered
    /// target.
    Name(String),

    /// A handle returned by target registration.
    Target(Arc<Target>),
}

impl Dep {
    /// The prerequisite name this dependency schedules.
    pub fn name(&self) -> &str {
        match self {
            Dep::Name(name) => name,
            Dep::Target(target) => target.name(),
        }
    }
}

impl From<&str> for Dep {
    fn from(name: &str) -> Self {
        Dep::Name(name.to_string())
    }
}

impl From<String> for Dep {
    fn from(name: String) -> Self {
        Dep::Name(name)
    }
}

impl From<&String> for Dep {
    fn from(name: &String) -> Self {
        Dep::Name(name.clone())
    }
}

impl From<Arc<Target>> for Dep {
    fn from(target: Arc<Target>) -> Self {
        Dep::Target(target)
    }
}

impl From<&Arc<Target>> for Dep {
    fn from(target: &Arc<Target>) -> Self {
        Dep::Target(Arc::clone(target))
    }
}

/// A record value: one dependency or a list of dependencies.
#[derive(Debug, Clone)]
pub enum DepEntry {
    /// A single dependency under this key.
    One(Dep),

    /// An ordered list of dependencies under this key.
    Many(Vec<Dep>),
}

impl From<Dep> for DepEntry {
    fn from(dep: Dep) -> Self {
        DepEntry::One(dep)
    }
}

impl From<&str> for DepEntry {
    fn from(name: &str) -> Self {
        DepEntry::One(name.into())
    }
}

impl From<String> for DepEntry {
    fn from(name: String) -> Self {
        DepEntry::One(name.into())
    }
}

impl From<Arc<Target>> for DepEntry {
    fn from(target: Arc<Target>) -> Self {
        DepEntry::One(target.into())
    }
}

impl From<&Arc<Target>> for DepEntry {
    fn from(target: &Arc<Target>) -> Self {
        DepEntry::One(target.into())
    }
}

impl<T: Into<Dep>> From<Vec<T>> for DepEntry {
    fn from(deps: Vec<T>) -> Self {
        DepEntry::Many(deps.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Dep>, const N: usize> From<[T; N]> for DepEntry {
    fn from(deps: [T; N]) -> Self {
        DepEntry::Many(deps.into_iter().map(Into::into).collect())
    }
}

/// Producer for a lazily-evaluated dependency sequence.
type LazyDepsFn = Box<dyn FnOnce() -> BoxFuture<'static, BuildResult<Vec<Dep>>> + Send>;

/// A finite, non-restartable dependency producer. It is drained exactly
/// once; the drained result is memoized on the owning target, so repeated
/// resolution never re-runs the producer.
pub struct LazyDeps(Mutex<Option<LazyDepsFn>>);

impl LazyDeps {
    fn new(producer: LazyDepsFn) -> Self {
        LazyDeps(Mutex::new(Some(producer)))
    }

    fn take(&self) -> Option<LazyDepsFn> {
        self.0.lock().expect("lazy deps lock poisoned").take()
    }
}

impl fmt::Debug for LazyDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LazyDeps(..)")
    }
}

/// The dependency specification of a target.
#[derive(Debug)]
pub enum DepSpec {
    /// Exactly one dependency.
    Single(Dep),

    /// An ordered list of dependencies.
    List(Vec<Dep>),

    /// A named record mapping keys to dependencies or lists thereof.
    Record(BTreeMap<String, DepEntry>),

    /// A lazily-produced sequence, drained once.
    Lazy(LazyDeps),
}

impl Default for DepSpec {
    fn default() -> Self {
        DepSpec::List(Vec::new())
    }
}

impl DepSpec {
    /// Build a record spec from key/value pairs.
    pub fn record<K, E>(entries: impl IntoIterator<Item = (K, E)>) -> Self
    where
        K: Into<String>,
        E: Into<DepEntry>,
    {
        DepSpec::Record(
            entries
                .into_iter()
                .map(|(k, e)| (k.into(), e.into()))
                .collect(),
        )
    }

    /// Build a lazy spec from an async producer. The producer runs at
    /// most once, when the target is first scheduled.
    pub fn lazy<F, Fut>(producer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = BuildResult<Vec<Dep>>> + Send + 'static,
    {
        DepSpec::Lazy(LazyDeps::new(Box::new(move || Box::pin(producer()))))
    }

    /// Resolve this spec into a flat set of prerequisite names and a
    /// shape-preserving structure of names.
    ///
    /// Resolving a [`DepSpec::Lazy`] spec a second time is an error;
    /// callers are expected to memoize the first result.
    pub async fn resolve(&self) -> BuildResult<ResolvedDeps> {
        match self {
            DepSpec::Single(dep) => {
                let name = dep.name().to_string();
                Ok(ResolvedDeps {
                    flat: BTreeSet::from([name.clone()]),
                    shape: DepShape::Single(name),
                })
            }
            DepSpec::List(deps) => Ok(resolve_list(deps)),
            DepSpec::Record(entries) => {
                let mut flat = BTreeSet::new();
                let mut shape = BTreeMap::new();
                for (key, entry) in entries {
                    let value = match entry {
                        DepEntry::One(dep) => {
                            let name = dep.name().to_string();
                            flat.insert(name.clone());
                            DepShape::Single(name)
                        }
                        DepEntry::Many(deps) => {
                            let names: Vec<String> =
                                deps.iter().map(|d| d.name().to_string()).collect();
                            flat.extend(names.iter().cloned());
                            DepShape::List(names)
                        }
                    };
                    shape.insert(key.clone(), value);
                }
                Ok(ResolvedDeps {
                    flat,
                    shape: DepShape::Record(shape),
                })
            }
            DepSpec::Lazy(producer) => {
                let producer = producer.take().ok_or(BuildError::LazyDepsConsumed)?;
                let deps = producer().await?;
                Ok(resolve_list(&deps))
            }
        }
    }
}

impl From<Dep> for DepSpec {
    fn from(dep: Dep) -> Self {
        DepSpec::Single(dep)
    }
}

impl From<&str> for DepSpec {
    fn from(name: &str) -> Self {
        DepSpec::Single(name.into())
    }
}

impl From<String> for DepSpec {
    fn from(name: String) -> Self {
        DepSpec::Single(name.into())
    }
}

impl From<Arc<Target>> for DepSpec {
    fn from(target: Arc<Target>) -> Self {
        DepSpec::Single(target.into())
    }
}

impl From<&Arc<Target>> for DepSpec {
    fn from(target: &Arc<Target>) -> Self {
        DepSpec::Single(target.into())
    }
}

impl<T: Into<Dep>> From<Vec<T>> for DepSpec {
    fn from(deps: Vec<T>) -> Self {
        DepSpec::List(deps.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Dep>, const N: usize> From<[T; N]> for DepSpec {
    fn from(deps: [T; N]) -> Self {
        DepSpec::List(deps.into_iter().map(Into::into).collect())
    }
}

fn resolve_list(deps: &[Dep]) -> ResolvedDeps {
    let names: Vec<String> = deps.iter().map(|d| d.name().to_string()).collect();
    ResolvedDeps {
        flat: names.iter().cloned().collect(),
        shape: DepShape::List(names),
    }
}

/// Shape-preserving resolution result handed to build actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepShape {
    /// Resolution of a single dependency.
    Single(String),

    /// Resolution of a list (or drained lazy sequence), order preserved.
    List(Vec<String>),

    /// Resolution of a record, key by key.
    Record(BTreeMap<String, DepShape>),
}

impl DepShape {
    /// The single resolved name, if this is a `Single` shape.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            DepShape::Single(name) => Some(name),
            _ => None,
        }
    }

    /// The resolved list, if this is a `List` shape.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            DepShape::List(names) => Some(names),
            _ => None,
        }
    }

    /// Look up a record key.
    pub fn get(&self, key: &str) -> Option<&DepShape> {
        match self {
            DepShape::Record(entries) => entries.get(key),
            _ => None,
        }
    }

    /// All names in this shape, in declaration order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            DepShape::Single(name) => vec![name.as_str()],
            DepShape::List(names) => names.iter().map(String::as_str).collect(),
            DepShape::Record(entries) => entries.values().flat_map(|v| v.names()).collect(),
        }
    }
}

/// Full resolution of a target's dependency spec.
#[derive(Debug, Clone)]
pub struct ResolvedDeps {
    /// Deduplicated prerequisite names, sorted.
    pub flat: BTreeSet<String>,

    /// Structurally-equivalent names for the build action.
    pub shape: DepShape,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_single() {
        let spec = DepSpec::from("input.txt");
        let resolved = spec.resolve().await.unwrap();
        assert_eq!(resolved.flat, BTreeSet::from(["input.txt".to_string()]));
        assert_eq!(resolved.shape.as_single(), Some("input.txt"));
    }

    #[tokio::test]
    async fn test_resolve_list_preserves_order_dedups_flat() {
        let spec = DepSpec::from(["b", "a", "b"]);
        let resolved = spec.resolve().await.unwrap();
        assert_eq!(resolved.flat.len(), 2);
        assert_eq!(resolved.shape.as_list().unwrap(), &["b", "a", "b"]);
    }

    #[tokio::test]
    async fn test_resolve_record_shape_fidelity() {
        let spec = DepSpec::record([
            ("a", DepEntry::from(["x", "y"])),
            ("b", DepEntry::from("z")),
        ]);
        let resolved = spec.resolve().await.unwrap();

        let expected: BTreeSet<String> =
            ["x", "y", "z"].iter().map(|s| s.to_string()).collect();
        assert_eq!(resolved.flat, expected);

        assert_eq!(
            resolved.shape.get("a").unwrap().as_list().unwrap(),
            &["x", "y"]
        );
        assert_eq!(resolved.shape.get("b").unwrap().as_single(), Some("z"));
    }

    #[tokio::test]
    async fn test_resolve_lazy_drains_once() {
        let spec = DepSpec::lazy(|| async { Ok(vec![Dep::from("gen.txt")]) });

        let resolved = spec.resolve().await.unwrap();
        assert_eq!(resolved.shape.as_list().unwrap(), &["gen.txt"]);

        // Without memoization the second drain is a configuration error.
        let err = spec.resolve().await.unwrap_err();
        assert!(matches!(err, BuildError::LazyDepsConsumed));
    }

    #[tokio::test]
    async fn test_resolve_empty_list() {
        let spec = DepSpec::default();
        let resolved = spec.resolve().await.unwrap();
        assert!(resolved.flat.is_empty());
        assert_eq!(resolved.shape.as_list().unwrap().len(), 0);
    }

    #[test]
    fn test_shape_names_order() {
        let shape = DepShape::Record(BTreeMap::from([
            ("a".to_string(), DepShape::List(vec!["x".into(), "y".into()])),
            ("b".to_string(), DepShape::Single("z".into())),
        ]));
        assert_eq!(shape.names(), vec!["x", "y", "z"]);
    }
}
