//! Task graph orchestration
//!
//! Every unit of pipeline work is a node in a dependency graph. A node runs
//! only when every predecessor succeeded; a node downstream of a failure is
//! skipped without running. Independent branches execute concurrently,
//! bounded by a worker limit. Only transient errors are retried, under the
//! node's own retry policy.

pub mod retry;

pub use retry::{Backoff, RetryPolicy};

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use mdp_common::{EtlError, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Boxed future a task node runs.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Lifecycle state of one graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never ran: an upstream node failed, or the run was cancelled.
    Skipped,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Succeeded => "succeeded",
            NodeState::Failed => "failed",
            NodeState::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TaskNode {
    name: String,
    deps: Vec<usize>,
    retry: Option<RetryPolicy>,
    run: TaskFn,
}

/// A dependency graph of named tasks.
///
/// Dependencies must be registered before their dependents, which keeps the
/// graph acyclic by construction.
#[derive(Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. `deps` name tasks that must succeed first; all of
    /// them must already be registered.
    pub fn add_task<F, Fut>(
        &mut self,
        name: &str,
        deps: &[&str],
        retry: Option<RetryPolicy>,
        task: F,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.index.contains_key(name) {
            return Err(EtlError::Config(format!("duplicate task name: {}", name)));
        }

        let deps = deps
            .iter()
            .map(|dep| {
                self.index.get(*dep).copied().ok_or_else(|| {
                    EtlError::Config(format!("task {} depends on unknown task {}", name, dep))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let run: TaskFn = Arc::new(move || Box::pin(task()) as TaskFuture);

        self.index.insert(name.to_string(), self.nodes.len());
        self.nodes.push(TaskNode {
            name: name.to_string(),
            deps,
            retry,
            run,
        });

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Terminal record for one node.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub name: String,
    pub state: NodeState,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Aggregate result of a run, enumerating every node's final state so an
/// operator can see exactly which warehouse objects may be partially loaded
/// and re-run safely.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub cancelled: bool,
    pub nodes: Vec<NodeOutcome>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|n| n.state == NodeState::Succeeded)
    }

    pub fn outcome(&self, name: &str) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn state_of(&self, name: &str) -> Option<NodeState> {
        self.outcome(name).map(|n| n.state)
    }

    fn count(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "run {}: {} succeeded, {} failed, {} skipped{}",
            self.run_id,
            self.count(NodeState::Succeeded),
            self.count(NodeState::Failed),
            self.count(NodeState::Skipped),
            if self.cancelled { " (cancelled)" } else { "" },
        )?;
        for node in &self.nodes {
            match &node.error {
                Some(err) => writeln!(f, "  {:<40} {} ({})", node.name, node.state, err)?,
                None => writeln!(f, "  {:<40} {}", node.name, node.state)?,
            }
        }
        Ok(())
    }
}

/// Executes a [`TaskGraph`] with bounded parallelism and fail-fast
/// propagation.
pub struct Orchestrator {
    worker_limit: usize,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(worker_limit: usize) -> Self {
        Self {
            worker_limit: worker_limit.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops scheduling new nodes when cancelled. In-flight nodes
    /// finish or fail naturally; a half-built table is worse than a late one.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the graph to completion and report every node's terminal state.
    pub async fn run(&self, graph: TaskGraph) -> RunReport {
        let run_id = Uuid::new_v4();
        let n = graph.nodes.len();
        let mut states = vec![NodeState::Pending; n];
        let mut attempts = vec![0u32; n];
        let mut errors: Vec<Option<String>> = vec![None; n];
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let mut join_set: JoinSet<(usize, u32, Result<()>)> = JoinSet::new();

        info!(run_id = %run_id, nodes = n, workers = self.worker_limit, "Run started");

        loop {
            // Fail-fast propagation to a fixpoint: anything downstream of a
            // failed or skipped node is skipped without running.
            loop {
                let mut changed = false;
                for i in 0..n {
                    if states[i] == NodeState::Pending
                        && graph.nodes[i].deps.iter().any(|d| {
                            matches!(states[*d], NodeState::Failed | NodeState::Skipped)
                        })
                    {
                        states[i] = NodeState::Skipped;
                        warn!(run_id = %run_id, node = %graph.nodes[i].name, "Skipped: upstream failure");
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }

            // Schedule every node whose predecessors all succeeded. A
            // cancelled run schedules nothing further.
            if !self.cancel.is_cancelled() {
                for i in 0..n {
                    if states[i] == NodeState::Pending
                        && graph.nodes[i]
                            .deps
                            .iter()
                            .all(|d| states[*d] == NodeState::Succeeded)
                    {
                        states[i] = NodeState::Running;
                        let name = graph.nodes[i].name.clone();
                        let run = graph.nodes[i].run.clone();
                        let retry = graph.nodes[i].retry;
                        let semaphore = semaphore.clone();
                        join_set.spawn(async move {
                            // The permit bounds execution, not scheduling.
                            let _permit = semaphore.acquire_owned().await;
                            let (node_attempts, result) =
                                execute_with_retry(&name, run, retry).await;
                            (i, node_attempts, result)
                        });
                    }
                }
            }

            let Some(joined) = join_set.join_next().await else {
                // Nothing running and nothing schedulable.
                break;
            };

            match joined {
                Ok((i, node_attempts, result)) => {
                    attempts[i] = node_attempts;
                    match result {
                        Ok(()) => {
                            states[i] = NodeState::Succeeded;
                            info!(run_id = %run_id, node = %graph.nodes[i].name, attempts = node_attempts, "Node succeeded");
                        }
                        Err(err) => {
                            states[i] = NodeState::Failed;
                            error!(run_id = %run_id, node = %graph.nodes[i].name, attempts = node_attempts, error = %err, "Node failed");
                            errors[i] = Some(err.to_string());
                        }
                    }
                }
                Err(join_err) => {
                    // Tasks catch their own panics; this is an aborted task.
                    error!(run_id = %run_id, error = %join_err, "Task join failed");
                }
            }
        }

        for i in 0..n {
            match states[i] {
                // Cancelled before becoming schedulable.
                NodeState::Pending => states[i] = NodeState::Skipped,
                NodeState::Running => {
                    states[i] = NodeState::Failed;
                    errors[i].get_or_insert_with(|| "task aborted".to_string());
                }
                _ => {}
            }
        }

        let report = RunReport {
            run_id,
            cancelled: self.cancel.is_cancelled(),
            nodes: graph
                .nodes
                .iter()
                .enumerate()
                .map(|(i, node)| NodeOutcome {
                    name: node.name.clone(),
                    state: states[i],
                    attempts: attempts[i],
                    error: errors[i].take(),
                })
                .collect(),
        };

        info!(
            run_id = %run_id,
            succeeded = report.count(NodeState::Succeeded),
            failed = report.count(NodeState::Failed),
            skipped = report.count(NodeState::Skipped),
            cancelled = report.cancelled,
            "Run finished"
        );

        report
    }
}

/// Run one node under its retry policy. Only transient errors consume the
/// budget; the policy's backoff spaces the attempts.
async fn execute_with_retry(
    name: &str,
    run: TaskFn,
    retry: Option<RetryPolicy>,
) -> (u32, Result<()>) {
    let mut attempt = 1u32;
    loop {
        let outcome = AssertUnwindSafe(run()).catch_unwind().await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(EtlError::Internal(format!("task {} panicked", name))),
        };

        match result {
            Ok(()) => return (attempt, Ok(())),
            Err(err) if err.is_transient() => {
                let Some(policy) = retry else {
                    return (attempt, Err(err));
                };
                if !policy.allows_retry(attempt) {
                    return (attempt, Err(err));
                }
                let delay = policy.backoff.delay(attempt);
                warn!(
                    node = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return (attempt, Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_task_name_rejected() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", &[], None, || async { Ok(()) }).unwrap();
        let err = graph
            .add_task("a", &[], None, || async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let mut graph = TaskGraph::new();
        let err = graph
            .add_task("b", &["missing"], None, || async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[tokio::test]
    async fn empty_graph_is_a_successful_run() {
        let orchestrator = Orchestrator::new(2);
        let report = orchestrator.run(TaskGraph::new()).await;
        assert!(report.is_success());
        assert!(!report.cancelled);
    }
}
