//! Pipeline definitions: steps, guarded edges, and the terminal marker.
//!
//! A definition is a finite step graph. Every edge target must be a known
//! step or the terminal marker; the builder validates this once so the
//! executor can assume a well-formed graph.

use crate::errors::DefinitionError;
use crate::state::{PipelineState, StateDelta};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Trait for pipeline steps.
///
/// A step declares the state fields it reads and writes. The executor
/// enforces both declarations: `execute` receives only the input
/// projection, and the returned delta may only contain declared output
/// fields. This keeps steps testable with literal inputs and prevents
/// hidden coupling through the shared state.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Returns the name of the step.
    fn name(&self) -> &str;

    /// Returns the state fields this step reads.
    fn inputs(&self) -> Vec<String>;

    /// Returns the state fields this step writes.
    fn outputs(&self) -> Vec<String>;

    /// Executes the step over its input projection.
    ///
    /// Steps may suspend on I/O; from the executor's perspective each call
    /// is one atomic unit.
    async fn execute(&self, inputs: &PipelineState) -> anyhow::Result<StateDelta>;
}

/// A synchronous function-based step, mainly for tests and glue.
pub struct FnStep<F>
where
    F: Fn(&PipelineState) -> anyhow::Result<StateDelta> + Send + Sync,
{
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&PipelineState) -> anyhow::Result<StateDelta> + Send + Sync,
{
    /// Creates a new function-based step.
    pub fn new(name: impl Into<String>, inputs: &[&str], outputs: &[&str], func: F) -> Self {
        Self {
            name: name.into(),
            inputs: inputs.iter().map(|s| (*s).to_string()).collect(),
            outputs: outputs.iter().map(|s| (*s).to_string()).collect(),
            func,
        }
    }
}

impl<F> Debug for FnStep<F>
where
    F: Fn(&PipelineState) -> anyhow::Result<StateDelta> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&PipelineState) -> anyhow::Result<StateDelta> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<String> {
        self.outputs.clone()
    }

    async fn execute(&self, inputs: &PipelineState) -> anyhow::Result<StateDelta> {
        (self.func)(inputs)
    }
}

/// A pure predicate over the freshly merged state.
pub type EdgeGuard = Arc<dyn Fn(&PipelineState) -> bool + Send + Sync>;

/// Where an edge leads: another step, or done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeTarget {
    /// A named step.
    Step(String),
    /// The terminal marker.
    End,
}

/// An outgoing edge of a step, optionally guarded.
///
/// Edges are evaluated in declaration order right after a step completes;
/// the first edge whose guard passes (an unguarded edge always passes) is
/// taken.
#[derive(Clone)]
pub struct Edge {
    /// Where the edge leads.
    pub target: EdgeTarget,
    /// Optional guard predicate.
    pub guard: Option<EdgeGuard>,
}

impl Edge {
    /// Creates an unconditional edge to a step.
    #[must_use]
    pub fn to(step: impl Into<String>) -> Self {
        Self {
            target: EdgeTarget::Step(step.into()),
            guard: None,
        }
    }

    /// Creates an unconditional edge to the terminal marker.
    #[must_use]
    pub fn to_end() -> Self {
        Self {
            target: EdgeTarget::End,
            guard: None,
        }
    }

    /// Attaches a guard predicate to the edge.
    #[must_use]
    pub fn when<G>(mut self, guard: G) -> Self
    where
        G: Fn(&PipelineState) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Evaluates the edge against the current state.
    #[must_use]
    pub fn matches(&self, state: &PipelineState) -> bool {
        self.guard.as_ref().map_or(true, |guard| guard(state))
    }
}

impl Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("target", &self.target)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// A validated pipeline definition.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: String,
    steps: HashMap<String, Arc<dyn Step>>,
    edges: HashMap<String, Vec<Edge>>,
    start: String,
    recursion_limit: usize,
}

/// Default transition budget for a run.
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

impl PipelineDefinition {
    /// Starts building a definition.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the start step name.
    #[must_use]
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Returns the transition budget.
    #[must_use]
    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Looks up a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&Arc<dyn Step>> {
        self.steps.get(name)
    }

    /// Returns the outgoing edges of a step.
    #[must_use]
    pub fn edges(&self, name: &str) -> &[Edge] {
        self.edges.get(name).map_or(&[], Vec::as_slice)
    }
}

/// Builder for [`PipelineDefinition`].
#[derive(Default)]
pub struct PipelineBuilder {
    name: String,
    steps: HashMap<String, Arc<dyn Step>>,
    order: Vec<String>,
    edges: HashMap<String, Vec<Edge>>,
    start: Option<String>,
    recursion_limit: usize,
}

impl PipelineBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            ..Self::default()
        }
    }

    /// Adds a step. The first added step becomes the start unless
    /// [`Self::start_at`] overrides it.
    #[must_use]
    pub fn step(mut self, step: Arc<dyn Step>) -> Self {
        let name = step.name().to_string();
        if self.start.is_none() {
            self.start = Some(name.clone());
        }
        self.order.push(name.clone());
        self.steps.insert(name, step);
        self
    }

    /// Adds an unconditional edge between two steps.
    #[must_use]
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges
            .entry(from.into())
            .or_default()
            .push(Edge::to(to));
        self
    }

    /// Adds a guarded edge between two steps.
    #[must_use]
    pub fn edge_when<G>(mut self, from: impl Into<String>, to: impl Into<String>, guard: G) -> Self
    where
        G: Fn(&PipelineState) -> bool + Send + Sync + 'static,
    {
        self.edges
            .entry(from.into())
            .or_default()
            .push(Edge::to(to).when(guard));
        self
    }

    /// Adds an edge to the terminal marker.
    #[must_use]
    pub fn edge_to_end(mut self, from: impl Into<String>) -> Self {
        self.edges.entry(from.into()).or_default().push(Edge::to_end());
        self
    }

    /// Overrides the start step.
    #[must_use]
    pub fn start_at(mut self, name: impl Into<String>) -> Self {
        self.start = Some(name.into());
        self
    }

    /// Sets the transition budget.
    #[must_use]
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Validates and builds the definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] when the pipeline has no steps, the
    /// start step is unknown, an edge leaves or enters an unknown step, or
    /// some step has no outgoing edge at all.
    pub fn build(self) -> Result<PipelineDefinition, DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::new("pipeline has no steps"));
        }

        let start = self
            .start
            .ok_or_else(|| DefinitionError::new("pipeline has no start step"))?;
        if !self.steps.contains_key(&start) {
            return Err(
                DefinitionError::new(format!("start step '{start}' is not defined"))
                    .with_steps(vec![start]),
            );
        }

        for (from, edges) in &self.edges {
            if !self.steps.contains_key(from) {
                return Err(
                    DefinitionError::new(format!("edge from unknown step '{from}'"))
                        .with_steps(vec![from.clone()]),
                );
            }
            for edge in edges {
                if let EdgeTarget::Step(to) = &edge.target {
                    if !self.steps.contains_key(to) {
                        return Err(DefinitionError::new(format!(
                            "edge from '{from}' to unknown step '{to}'"
                        ))
                        .with_steps(vec![from.clone(), to.clone()]));
                    }
                }
            }
        }

        for name in &self.order {
            if !self.edges.contains_key(name) {
                return Err(DefinitionError::new(format!(
                    "step '{name}' has no outgoing edge; add one to another step or to the terminal marker"
                ))
                .with_steps(vec![name.clone()]));
            }
        }

        Ok(PipelineDefinition {
            name: self.name,
            steps: self.steps,
            edges: self.edges,
            start,
            recursion_limit: self.recursion_limit,
        })
    }
}
