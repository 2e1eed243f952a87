//! Dependency-driven execution of a [`TaskGraph`].
//!
//! ## How tasks become ready
//!
//! Artifacts are pushed downstream the moment a task produces them:
//!
//! - **Transform / Split** consumers get one task per artifact immediately,
//!   so page 1 can be rasterised while page 7 is still being split off.
//! - **Collate** consumers buffer artifacts by page; the task for page `i`
//!   is released when every input stage has produced page `i`.
//! - **Merge** consumers wait for *all* input stages to complete (the
//!   barrier), then run once over every artifact, ordered by declared input
//!   stage and then page index, never by completion order.
//!
//! ## Concurrency
//!
//! Ready tasks are polled on a [`FuturesUnordered`] capped at `jobs` in
//! flight. The futures are polled by the scheduler itself rather than
//! spawned, so dropping the set on the first failure drops every running
//! task, and with it any child process (`kill_on_drop`).
//!
//! ## Re-entry
//!
//! A task whose planned outputs all exist and are at least as new as each of
//! its inputs is skipped; its planned outputs are forwarded as if it had run.

use crate::error::{OcrPdfError, StateError};
use crate::pipeline::graph::{Artifact, NodeBody, StageKind, StageTask, TaskGraph, TaskStatus};
use crate::progress::ProgressCallback;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info};

/// Per-stage outcome of a graph run.
#[derive(Debug, Clone)]
pub struct StageSummary {
    pub name: String,
    pub tasks_run: usize,
    pub tasks_skipped: usize,
    /// Everything the stage produced, in production order.
    pub artifacts: Vec<Artifact>,
}

/// Outcome of a complete graph run.
#[derive(Debug, Clone, Default)]
pub struct GraphReport {
    pub stages: Vec<StageSummary>,
}

impl GraphReport {
    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Artifacts of `name` sorted by page.
    pub fn artifacts_by_page(&self, name: &str) -> Vec<Artifact> {
        let mut out = self
            .stage(name)
            .map(|s| s.artifacts.clone())
            .unwrap_or_default();
        out.sort_by_key(|a| a.page);
        out
    }

    pub fn tasks_run(&self) -> usize {
        self.stages.iter().map(|s| s.tasks_run).sum()
    }

    pub fn tasks_skipped(&self) -> usize {
        self.stages.iter().map(|s| s.tasks_skipped).sum()
    }
}

#[derive(Default)]
struct NodeState {
    produced: Vec<Artifact>,
    /// Tasks created but not yet finished.
    outstanding: usize,
    complete: bool,
    tasks_run: usize,
    tasks_skipped: usize,
    /// Collate buffer: page → one slot per input stage.
    groups: BTreeMap<usize, Vec<Option<Artifact>>>,
}

type Finished = (usize, StageTask, Result<Vec<Artifact>, OcrPdfError>);

struct Scheduler<'g> {
    graph: &'g TaskGraph,
    state: Vec<NodeState>,
    consumers: Vec<Vec<usize>>,
    ready: VecDeque<(usize, StageTask)>,
    progress: Option<ProgressCallback>,
}

/// Run every stage of `graph` with at most `jobs` tasks in flight.
///
/// The first task failure aborts the run and is returned.
pub async fn run(
    graph: &TaskGraph,
    jobs: usize,
    progress: Option<ProgressCallback>,
) -> Result<GraphReport, OcrPdfError> {
    let mut consumers = vec![Vec::new(); graph.nodes.len()];
    for (id, node) in graph.nodes.iter().enumerate() {
        for &input in &node.inputs {
            consumers[input].push(id);
        }
    }
    let mut sched = Scheduler {
        graph,
        state: graph.nodes.iter().map(|_| NodeState::default()).collect(),
        consumers,
        ready: VecDeque::new(),
        progress,
    };

    for (id, node) in graph.nodes.iter().enumerate() {
        if let NodeBody::Source(artifacts) = &node.body {
            sched.deliver(id, artifacts.clone())?;
        }
    }
    sched.settle()?;

    let jobs = jobs.max(1);
    let mut in_flight: FuturesUnordered<BoxFuture<'static, Finished>> = FuturesUnordered::new();

    loop {
        while in_flight.len() < jobs {
            let Some((id, mut task)) = sched.ready.pop_front() else {
                break;
            };
            if up_to_date(&task) {
                debug!(stage = %task.stage, page = ?task.page, "Up to date, skipping");
                let forwarded: Vec<Artifact> = task
                    .outputs
                    .iter()
                    .map(|p| Artifact::new(p.clone(), task.page))
                    .collect();
                sched.state[id].tasks_skipped += 1;
                task.status = TaskStatus::Done;
                sched.finish(id, &task, forwarded)?;
                continue;
            }

            let NodeBody::Stage { runner, .. } = &graph.nodes[id].body else {
                return Err(StateError::GraphDefinition("source scheduled as a task".into()).into());
            };
            task.status = TaskStatus::Running;
            debug!(stage = %task.stage, page = ?task.page, inputs = task.inputs.len(), "Task started");
            let fut = runner(task.clone());
            in_flight.push(Box::pin(async move {
                let result = fut.await;
                (id, task, result)
            }));
        }

        let Some((id, mut task, result)) = in_flight.next().await else {
            break;
        };
        match result {
            Ok(artifacts) => {
                task.status = TaskStatus::Done;
                debug!(stage = %task.stage, page = ?task.page, outputs = artifacts.len(), "Task done");
                sched.state[id].tasks_run += 1;
                sched.finish(id, &task, artifacts)?;
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                error!(stage = %task.stage, page = ?task.page, "Task failed: {}", e);
                // Dropping `in_flight` cancels the remaining tasks.
                return Err(e);
            }
        }
    }

    if let Some(node) = sched
        .state
        .iter()
        .zip(&graph.nodes)
        .find_map(|(s, n)| (!s.complete).then_some(n))
    {
        return Err(StateError::GraphDefinition(format!(
            "stage '{}' never completed",
            node.name
        ))
        .into());
    }

    let report = GraphReport {
        stages: graph
            .nodes
            .iter()
            .zip(sched.state)
            .map(|(node, st)| StageSummary {
                name: node.name.to_string(),
                tasks_run: st.tasks_run,
                tasks_skipped: st.tasks_skipped,
                artifacts: st.produced,
            })
            .collect(),
    };
    info!(
        tasks_run = report.tasks_run(),
        tasks_skipped = report.tasks_skipped(),
        "Task graph complete"
    );
    Ok(report)
}

impl Scheduler<'_> {
    /// Record a finished task and push its artifacts downstream.
    fn finish(&mut self, id: usize, task: &StageTask, artifacts: Vec<Artifact>) -> Result<(), OcrPdfError> {
        self.state[id].outstanding -= 1;
        if let Some(cb) = &self.progress {
            cb.on_task_complete(&task.stage, task.page);
        }
        self.deliver(id, artifacts)?;
        self.settle()
    }

    /// Append `artifacts` to node `id` and create consumer tasks that can
    /// start right away.
    fn deliver(&mut self, id: usize, artifacts: Vec<Artifact>) -> Result<(), OcrPdfError> {
        let graph = self.graph;
        for artifact in artifacts {
            for c in self.consumers[id].clone() {
                let NodeBody::Stage { kind, .. } = &graph.nodes[c].body else {
                    continue;
                };
                match kind {
                    StageKind::Transform | StageKind::Split => {
                        self.enqueue(c, artifact.page, vec![artifact.clone()])?;
                    }
                    StageKind::Collate => self.collate(c, id, &artifact)?,
                    StageKind::Merge => {}
                }
            }
            self.state[id].produced.push(artifact);
        }
        Ok(())
    }

    fn collate(&mut self, consumer: usize, from: usize, artifact: &Artifact) -> Result<(), OcrPdfError> {
        let graph = self.graph;
        let node = &graph.nodes[consumer];
        let page = artifact.page.ok_or_else(|| {
            StateError::GraphDefinition(format!(
                "collate stage '{}' received '{}' without a page",
                node.name,
                artifact.path.display()
            ))
        })?;
        let slot = node
            .inputs
            .iter()
            .position(|&i| i == from)
            .ok_or_else(|| StateError::GraphDefinition("collate input not declared".into()))?;
        let width = node.inputs.len();

        let group = self.state[consumer]
            .groups
            .entry(page)
            .or_insert_with(|| vec![None; width]);
        if group[slot].is_some() {
            return Err(StateError::GraphDefinition(format!(
                "stage '{}' produced page {page} twice",
                graph.nodes[from].name
            ))
            .into());
        }
        group[slot] = Some(artifact.clone());

        if group.iter().all(Option::is_some) {
            let inputs = self.state[consumer]
                .groups
                .remove(&page)
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .collect();
            self.enqueue(consumer, Some(page), inputs)?;
        }
        Ok(())
    }

    fn enqueue(&mut self, id: usize, page: Option<usize>, inputs: Vec<Artifact>) -> Result<(), OcrPdfError> {
        let graph = self.graph;
        let node = &graph.nodes[id];
        let NodeBody::Stage { kind, naming, .. } = &node.body else {
            return Err(StateError::GraphDefinition("cannot enqueue a source".into()).into());
        };
        let outputs = naming.plan(&inputs, page)?;
        self.state[id].outstanding += 1;
        self.ready.push_back((
            id,
            StageTask {
                stage: Arc::clone(&node.name),
                kind: *kind,
                page,
                inputs,
                outputs,
                status: TaskStatus::Pending,
            },
        ));
        Ok(())
    }

    /// Mark every stage complete whose inputs are complete and which has no
    /// outstanding work, releasing merge barriers along the way.
    fn settle(&mut self) -> Result<(), OcrPdfError> {
        let graph = self.graph;
        loop {
            let mut changed = false;
            for (id, node) in graph.nodes.iter().enumerate() {
                if self.state[id].complete {
                    continue;
                }
                if !node.inputs.iter().all(|&i| self.state[i].complete) {
                    continue;
                }
                match &node.body {
                    NodeBody::Source(_) => {}
                    NodeBody::Stage { kind: StageKind::Merge, .. } if self.state[id].tasks_run
                        + self.state[id].tasks_skipped
                        + self.state[id].outstanding
                        == 0 =>
                    {
                        let inputs = self.merge_inputs(id);
                        self.enqueue(id, None, inputs)?;
                        changed = true;
                        continue;
                    }
                    NodeBody::Stage { kind: StageKind::Collate, .. } => {
                        if let Some((&page, _)) = self.state[id].groups.iter().next() {
                            return Err(StateError::GraphDefinition(format!(
                                "stage '{}' is missing inputs for page {page}",
                                node.name
                            ))
                            .into());
                        }
                    }
                    _ => {}
                }
                if self.state[id].outstanding == 0 {
                    self.state[id].complete = true;
                    debug!(stage = %node.name, produced = self.state[id].produced.len(), "Stage complete");
                    changed = true;
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    fn merge_inputs(&self, id: usize) -> Vec<Artifact> {
        let mut inputs = Vec::new();
        for &input in &self.graph.nodes[id].inputs {
            let mut produced = self.state[input].produced.clone();
            produced.sort_by_key(|a| a.page);
            inputs.extend(produced);
        }
        inputs
    }
}

/// All planned outputs exist and none is older than any input.
fn up_to_date(task: &StageTask) -> bool {
    if task.outputs.is_empty() {
        return false;
    }
    let newest_input = task
        .inputs
        .iter()
        .map(|a| mtime(&a.path))
        .try_fold(SystemTime::UNIX_EPOCH, |acc, t| t.map(|t| acc.max(t)));
    let Some(newest_input) = newest_input else {
        return false;
    };
    task.outputs
        .iter()
        .all(|p| mtime(p).is_some_and(|t| t >= newest_input))
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
