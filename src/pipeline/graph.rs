//! Declarative task graph.
//!
//! A job is described as a DAG of named stages before anything runs. Each
//! stage names the stages it consumes, how it derives output file names, and
//! the async runner that does the work for one task. The graph is validated
//! as it is built: a stage may only consume stages declared before it, so
//! the graph is acyclic by construction and declaration order is a valid
//! topological order.
//!
//! ```text
//!   Transform: one task per upstream artifact
//!   Split:     one task, N page artifacts
//!   Collate:   one task per page, once every input has that page
//!   Merge:     one task, after every input stage is complete
//! ```

use crate::error::{OcrPdfError, StateError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a stage maps upstream artifacts onto tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// One task per upstream artifact, one output each.
    Transform,
    /// One task per upstream artifact, many page artifacts out.
    Split,
    /// One task per page, once every input stage has produced that page.
    Collate,
    /// One task over everything, once every input stage is complete.
    Merge,
}

/// A file flowing along a graph edge.
///
/// The page index travels with the file; nothing ever parses it back out of
/// the file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub page: Option<usize>,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, page: Option<usize>) -> Self {
        Self {
            path: path.into(),
            page,
        }
    }

    pub fn page(path: impl Into<PathBuf>, index: usize) -> Self {
        Self::new(path, Some(index))
    }
}

/// Deterministic output naming for a stage's tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Naming {
    /// Replace suffix `from` of the first input's file name with `to`.
    /// The output lands in `dir`, or next to the input when `None`.
    ReplaceSuffix {
        from: String,
        to: String,
        dir: Option<PathBuf>,
    },
    /// `<dir>/<NNNNNN><suffix>` with the 1-based, zero-padded page number.
    PagePrefixed { dir: PathBuf, suffix: String },
    /// Always the same file.
    Fixed(PathBuf),
    /// The runner reports its outputs; used by split stages.
    Dynamic,
}

impl Naming {
    pub fn replace_suffix(from: &str, to: &str) -> Self {
        Naming::ReplaceSuffix {
            from: from.to_string(),
            to: to.to_string(),
            dir: None,
        }
    }

    pub fn page_prefixed(dir: impl Into<PathBuf>, suffix: &str) -> Self {
        Naming::PagePrefixed {
            dir: dir.into(),
            suffix: suffix.to_string(),
        }
    }

    /// Output paths of the task consuming `inputs` for `page`.
    ///
    /// Empty for [`Naming::Dynamic`].
    pub fn plan(&self, inputs: &[Artifact], page: Option<usize>) -> Result<Vec<PathBuf>, StateError> {
        match self {
            Naming::ReplaceSuffix { from, to, dir } => {
                let input = inputs.first().ok_or_else(|| {
                    StateError::GraphDefinition("suffix naming without an input".into())
                })?;
                let name = input
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let stem = name.strip_suffix(from.as_str()).ok_or_else(|| {
                    StateError::GraphDefinition(format!(
                        "input '{}' does not end with '{from}'",
                        input.path.display()
                    ))
                })?;
                let parent = match dir {
                    Some(d) => d.as_path(),
                    None => input.path.parent().unwrap_or(Path::new("")),
                };
                Ok(vec![parent.join(format!("{stem}{to}"))])
            }
            Naming::PagePrefixed { dir, suffix } => {
                let page = page.ok_or_else(|| {
                    StateError::GraphDefinition("page-prefixed naming for a task without a page".into())
                })?;
                Ok(vec![dir.join(format!("{:06}{suffix}", page + 1))])
            }
            Naming::Fixed(p) => Ok(vec![p.clone()]),
            Naming::Dynamic => Ok(Vec::new()),
        }
    }
}

/// Lifecycle of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// One unit of work: a stage applied to specific input artifacts.
#[derive(Debug, Clone)]
pub struct StageTask {
    pub stage: Arc<str>,
    pub kind: StageKind,
    pub page: Option<usize>,
    /// Ordered by declared input stage, then by page.
    pub inputs: Vec<Artifact>,
    /// Planned outputs; empty for dynamically named stages.
    pub outputs: Vec<PathBuf>,
    pub status: TaskStatus,
}

impl StageTask {
    /// First planned output. Errors for dynamically named stages.
    pub fn output(&self) -> Result<&Path, OcrPdfError> {
        self.outputs.first().map(PathBuf::as_path).ok_or_else(|| {
            StateError::GraphDefinition(format!("stage '{}' has no planned output", self.stage)).into()
        })
    }

    /// The single planned output, tagged with this task's page.
    pub fn output_artifact(&self) -> Result<Vec<Artifact>, OcrPdfError> {
        Ok(vec![Artifact::new(self.output()?, self.page)])
    }

    /// Input produced by the `n`-th declared input stage (collate tasks).
    pub fn input(&self, n: usize) -> Result<&Artifact, OcrPdfError> {
        self.inputs.get(n).ok_or_else(|| {
            StateError::GraphDefinition(format!("stage '{}' has no input #{n}", self.stage)).into()
        })
    }
}

/// Async work for one task; returns the artifacts it produced.
pub type StageRunner =
    Arc<dyn Fn(StageTask) -> BoxFuture<'static, Result<Vec<Artifact>, OcrPdfError>> + Send + Sync>;

/// Wrap an async closure as a [`StageRunner`].
pub fn runner<F, Fut>(f: F) -> StageRunner
where
    F: Fn(StageTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Artifact>, OcrPdfError>> + Send + 'static,
{
    Arc::new(move |task| f(task).boxed())
}

/// Declaration of one stage.
pub struct StageSpec {
    pub name: String,
    pub kind: StageKind,
    pub inputs: Vec<String>,
    pub naming: Naming,
    pub runner: StageRunner,
}

impl StageSpec {
    pub fn new(name: &str, kind: StageKind, naming: Naming, runner: StageRunner) -> Self {
        Self {
            name: name.to_string(),
            kind,
            inputs: Vec::new(),
            naming,
            runner,
        }
    }

    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("naming", &self.naming)
            .finish_non_exhaustive()
    }
}

pub(crate) enum NodeBody {
    /// Artifacts that exist before the graph runs (the job input).
    Source(Vec<Artifact>),
    Stage {
        kind: StageKind,
        naming: Naming,
        runner: StageRunner,
    },
}

pub(crate) struct Node {
    pub name: Arc<str>,
    /// Indices of input nodes, in declared order.
    pub inputs: Vec<usize>,
    pub body: NodeBody,
}

/// A validated DAG of stages.
#[derive(Default)]
pub struct TaskGraph {
    pub(crate) nodes: Vec<Node>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a source of pre-existing artifacts.
    pub fn add_source(&mut self, name: &str, artifacts: Vec<Artifact>) -> Result<(), StateError> {
        self.check_unique(name)?;
        self.nodes.push(Node {
            name: Arc::from(name),
            inputs: Vec::new(),
            body: NodeBody::Source(artifacts),
        });
        Ok(())
    }

    /// Declare a stage consuming already-declared stages.
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<(), StateError> {
        let StageSpec {
            name,
            kind,
            inputs,
            naming,
            runner,
        } = spec;
        self.check_unique(&name)?;

        let arity_ok = match kind {
            StageKind::Transform | StageKind::Split => inputs.len() == 1,
            StageKind::Collate => inputs.len() >= 2,
            StageKind::Merge => !inputs.is_empty(),
        };
        if !arity_ok {
            return Err(StateError::GraphDefinition(format!(
                "{kind:?} stage '{name}' cannot take {} input stage(s)",
                inputs.len()
            )));
        }
        let naming_ok = match (&naming, kind) {
            (Naming::Dynamic, StageKind::Split) => true,
            (Naming::Dynamic, _) | (_, StageKind::Split) => false,
            (Naming::PagePrefixed { .. }, StageKind::Merge) => false,
            _ => true,
        };
        if !naming_ok {
            return Err(StateError::GraphDefinition(format!(
                "{kind:?} stage '{name}' cannot use {naming:?}"
            )));
        }

        let mut input_ids = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let id = self.index_of(input).ok_or_else(|| {
                StateError::GraphDefinition(format!(
                    "stage '{name}' consumes unknown stage '{input}'"
                ))
            })?;
            if input_ids.contains(&id) {
                return Err(StateError::GraphDefinition(format!(
                    "stage '{name}' lists '{input}' twice"
                )));
            }
            input_ids.push(id);
        }

        self.nodes.push(Node {
            name: Arc::from(name.as_str()),
            inputs: input_ids,
            body: NodeBody::Stage {
                kind,
                naming,
                runner,
            },
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| &*n.name == name)
    }

    fn check_unique(&self, name: &str) -> Result<(), StateError> {
        if self.index_of(name).is_some() {
            return Err(StateError::GraphDefinition(format!(
                "stage '{name}' declared twice"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn noop_runner() -> StageRunner {
    runner(|task: StageTask| async move { task.output_artifact() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_source() -> TaskGraph {
        let mut g = TaskGraph::new();
        g.add_source("input", vec![Artifact::new("/w/origin.pdf", None)])
            .unwrap();
        g
    }

    #[test]
    fn unknown_input_rejected() {
        let mut g = graph_with_source();
        let err = g
            .add_stage(
                StageSpec::new("repair", StageKind::Transform, Naming::replace_suffix(".pdf", ".repaired.pdf"), noop_runner())
                    .inputs(["nope"]),
            )
            .unwrap_err();
        assert!(matches!(err, StateError::GraphDefinition(m) if m.contains("nope")));
    }

    #[test]
    fn duplicate_stage_rejected() {
        let mut g = graph_with_source();
        let spec = || {
            StageSpec::new("repair", StageKind::Transform, Naming::replace_suffix(".pdf", ".r.pdf"), noop_runner())
                .inputs(["input"])
        };
        g.add_stage(spec()).unwrap();
        assert!(g.add_stage(spec()).is_err());
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn arity_and_naming_checked() {
        let mut g = graph_with_source();
        let collate_one = StageSpec::new("render", StageKind::Collate, Naming::page_prefixed("/w", ".pdf"), noop_runner())
            .inputs(["input"]);
        assert!(g.add_stage(collate_one).is_err());

        let split_fixed = StageSpec::new("split", StageKind::Split, Naming::Fixed("/w/x".into()), noop_runner())
            .inputs(["input"]);
        assert!(g.add_stage(split_fixed).is_err());

        let transform_dynamic = StageSpec::new("t", StageKind::Transform, Naming::Dynamic, noop_runner())
            .inputs(["input"]);
        assert!(g.add_stage(transform_dynamic).is_err());

        let merge_paged = StageSpec::new("merge", StageKind::Merge, Naming::page_prefixed("/w", ".pdf"), noop_runner())
            .inputs(["input"]);
        assert!(g.add_stage(merge_paged).is_err());
    }

    #[test]
    fn suffix_replacement() {
        let naming = Naming::replace_suffix(".page.pdf", ".page.png");
        let out = naming
            .plan(&[Artifact::page("/w/000003.page.pdf", 2)], Some(2))
            .unwrap();
        assert_eq!(out, vec![PathBuf::from("/w/000003.page.png")]);

        let err = naming.plan(&[Artifact::page("/w/000003.hocr", 2)], Some(2));
        assert!(err.is_err());
    }

    #[test]
    fn page_prefix_is_one_based() {
        let naming = Naming::page_prefixed("/w", ".rendered.pdf");
        assert_eq!(
            naming.plan(&[], Some(0)).unwrap(),
            vec![PathBuf::from("/w/000001.rendered.pdf")]
        );
        assert!(naming.plan(&[], None).is_err());
    }

    #[test]
    fn dynamic_plans_nothing() {
        assert!(Naming::Dynamic.plan(&[], None).unwrap().is_empty());
    }
}
