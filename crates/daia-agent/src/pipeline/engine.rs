//! Node graph executor.
//!
//! A node runs in three phases: `prepare` projects what it needs out of the
//! shared context, `execute` does the work (and is the only phase that may
//! await), `finalize` writes results back and names an [`Action`]. The flow
//! looks up `(node, action)` in its transition table; no entry ends the run.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::PipelineError;

/// Upper bound on node visits per run, so a cyclic graph cannot spin forever.
pub const DEFAULT_MAX_STEPS: usize = 64;

/// Outcome label returned by a node's `finalize` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Success,
    Failed,
    Processed,
    TablesFound,
    NoTables,
    ImagesRendered,
    NoImages,
    Sent,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Success => "success",
            Action::Failed => "failed",
            Action::Processed => "processed",
            Action::TablesFound => "tables_found",
            Action::NoTables => "no_tables",
            Action::ImagesRendered => "images_rendered",
            Action::NoImages => "no_images",
            Action::Sent => "sent",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline stage over context type `C`.
///
/// Only `finalize` receives `&mut C`; a node cannot change the context while
/// it is executing.
#[async_trait]
pub trait Node<C>: Send + Sync {
    type Prep: Send;
    type Output: Send;

    fn name(&self) -> &'static str;

    fn prepare(&self, ctx: &C) -> Result<Self::Prep, PipelineError>;

    async fn execute(&self, prep: Self::Prep) -> Result<Self::Output, PipelineError>;

    fn finalize(&self, ctx: &mut C, output: Self::Output) -> Result<Action, PipelineError>;
}

/// Object-safe wrapper so differently-typed nodes share one graph.
#[async_trait]
trait Step<C>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut C, cancel: &CancellationToken) -> Result<Action, PipelineError>;
}

#[async_trait]
impl<C, N> Step<C> for N
where
    C: Send + Sync + 'static,
    N: Node<C>,
{
    fn name(&self) -> &'static str {
        <N as Node<C>>::name(self)
    }

    async fn run(&self, ctx: &mut C, cancel: &CancellationToken) -> Result<Action, PipelineError> {
        let node = <N as Node<C>>::name(self);
        let prep = <N as Node<C>>::prepare(self, &*ctx)?;
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled { node }),
            out = <N as Node<C>>::execute(self, prep) => out?,
        };
        <N as Node<C>>::finalize(self, ctx, output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// How a run ended: the last node visited and the action it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub last_node: &'static str,
    pub action: Action,
    pub visited: Vec<&'static str>,
}

pub struct FlowBuilder<C> {
    steps: Vec<Box<dyn Step<C>>>,
    edges: HashMap<(NodeId, Action), NodeId>,
    max_steps: usize,
}

impl<C: Send + Sync + 'static> Default for FlowBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + Sync + 'static> FlowBuilder<C> {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            edges: HashMap::new(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn add<N: Node<C> + 'static>(&mut self, node: N) -> NodeId {
        self.steps.push(Box::new(node));
        NodeId(self.steps.len() - 1)
    }

    /// Route `action` from `from` to `to`. A later call for the same pair wins.
    pub fn on(&mut self, from: NodeId, action: Action, to: NodeId) -> &mut Self {
        self.edges.insert((from, action), to);
        self
    }

    pub fn max_steps(&mut self, limit: usize) -> &mut Self {
        self.max_steps = limit;
        self
    }

    pub fn build(self, start: NodeId) -> Flow<C> {
        Flow {
            steps: self.steps,
            edges: self.edges,
            start,
            max_steps: self.max_steps,
        }
    }
}

/// An immutable node graph. One flow can serve many concurrent runs; each
/// run brings its own context.
pub struct Flow<C> {
    steps: Vec<Box<dyn Step<C>>>,
    edges: HashMap<(NodeId, Action), NodeId>,
    start: NodeId,
    max_steps: usize,
}

impl<C: Send + Sync + 'static> Flow<C> {
    pub fn builder() -> FlowBuilder<C> {
        FlowBuilder::new()
    }

    /// Run nodes one at a time from the start node until an action has no
    /// transition. Any node error aborts the run and is returned as is.
    pub async fn run(
        &self,
        ctx: &mut C,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let mut current = self.start;
        let mut visited = Vec::new();

        loop {
            if visited.len() >= self.max_steps {
                return Err(PipelineError::StepLimit(self.max_steps));
            }
            let step = self
                .steps
                .get(current.0)
                .ok_or(PipelineError::UnknownNode(current.0))?;
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { node: step.name() });
            }

            debug!(node = step.name(), "entering node");
            visited.push(step.name());
            let action = step.run(ctx, cancel).await?;

            match self.edges.get(&(current, action)) {
                Some(next) => {
                    let next_name = self
                        .steps
                        .get(next.0)
                        .map(|s| s.name())
                        .unwrap_or("?");
                    info!(from = step.name(), %action, to = next_name, "transition");
                    current = *next;
                }
                None => {
                    debug!(node = step.name(), %action, "no transition, run complete");
                    return Ok(RunOutcome {
                        last_node: step.name(),
                        action,
                        visited,
                    });
                }
            }
        }
    }
}
