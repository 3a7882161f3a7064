//! # Scheduler
//!
//! The core loop of the engine: pick the most urgent ready task, dispatch it
//! to the worker pool, wait for completions, apply the error strategy, prune
//! deactivated subgraphs, and terminate when the working graph is empty.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::digraph::WorkingGraph;
use crate::error::{ErrorStrategy, ExecError};
use crate::node::{copy_non_setup_nodes, Activation, TaskNode, TaskTable, Truthy};
use crate::worker_pool::{Completion, WorkerPool};

/// Bookkeeping for one submitted task. The "done" and "running" sets of the
/// pool are collapsed into the `done` flag.
struct TaskHandle {
    done: bool,
    error: Option<crate::error::UserFnError>,
    launched_at: Instant,
}

impl TaskHandle {
    fn launched() -> Self {
        Self {
            done: false,
            error: None,
            launched_at: Instant::now(),
        }
    }
}

fn num_running(handles: &HashMap<String, TaskHandle>) -> usize {
    handles.values().filter(|handle| !handle.done).count()
}

/// The relative timeout to use for the next blocking wait: the earliest
/// moment at which some in-flight task will have exhausted its own budget.
/// `None` when no in-flight task has a timeout configured.
fn next_deadline<V>(
    handles: &HashMap<String, TaskHandle>,
    state: &TaskTable<V>,
) -> Option<Duration> {
    let mut earliest: Option<Instant> = None;
    for (id, handle) in handles {
        if handle.done {
            continue;
        }
        if let Some(timeout) = state.get(id).and_then(|node| node.timeout()) {
            let deadline = handle.launched_at + timeout;
            earliest = Some(earliest.map_or(deadline, |current| current.min(deadline)));
        }
    }
    earliest.map(|deadline| deadline.saturating_duration_since(Instant::now()))
}

/// Blocks until at least one in-flight task finishes and records the
/// completions. A wait that elapses without any completion means some task
/// has overrun its own budget, which aborts the invocation.
fn wait_for_completion(
    pool: &WorkerPool,
    handles: &mut HashMap<String, TaskHandle>,
    deadline: Option<Duration>,
) -> Result<(), ExecError> {
    let completed = pool.wait_any(deadline);
    if completed.is_empty() {
        let pending: Vec<String> = handles
            .iter()
            .filter(|(_, handle)| !handle.done)
            .map(|(id, _)| id.clone())
            .collect();
        return Err(ExecError::Timeout {
            pending,
            waited: deadline.unwrap_or_default(),
        });
    }
    for Completion { id, error } in completed {
        if let Some(handle) = handles.get_mut(&id) {
            handle.done = true;
            handle.error = error;
        }
    }
    Ok(())
}

/// Applies the error strategy to a finished task before it is reaped.
fn handle_failure(
    strategy: ErrorStrategy,
    graph: &mut WorkingGraph,
    handle: &mut TaskHandle,
    id: &str,
) -> Result<(), ExecError> {
    let Some(failure) = handle.error.take() else {
        return Ok(());
    };
    error!("task {id} encountered the following error: {failure}");

    match strategy {
        ErrorStrategy::Strict => Err(ExecError::UserNode {
            id: id.to_string(),
            source: failure,
        }),
        ErrorStrategy::Permissive => {
            warn!("Ignoring the error because the strategy is permissive.");
            Ok(())
        }
        ErrorStrategy::AllChildren => {
            // The failed task itself is removed by the caller right after.
            for successor in graph.successor_ids(id)? {
                if graph.contains(&successor) {
                    graph.remove_recursively(&successor)?;
                }
            }
            Ok(())
        }
    }
}

/// Evaluates the activation of a task: a literal, or the truthiness of the
/// referenced task's result. A reference to an unknown task is a
/// configuration error.
fn is_active_in_call<V: Truthy>(
    node: &TaskNode<V>,
    state: &TaskTable<V>,
) -> Result<bool, ExecError> {
    match node.active() {
        Activation::Literal(active) => Ok(*active),
        Activation::DependsOn(gate_id) => {
            let gate = state.get(gate_id).ok_or_else(|| {
                ExecError::Configuration(format!(
                    "task {} is gated by unknown task {gate_id}",
                    node.id()
                ))
            })?;
            Ok(gate.result().map_or(false, Truthy::is_truthy))
        }
    }
}

/// Selection rule: maximum priority first, maximum compound priority second,
/// first-in-ready-order on remaining ties.
fn pick_next_task<V>(
    runnable: &[String],
    state: &TaskTable<V>,
) -> Result<Arc<TaskNode<V>>, ExecError> {
    let mut best: Option<&Arc<TaskNode<V>>> = None;
    for id in runnable {
        let node = state.get(id).ok_or_else(|| {
            ExecError::Configuration(format!("task {id} is in the graph but not in the node table"))
        })?;
        let better = best.map_or(true, |current| {
            (node.priority(), node.compound_priority())
                > (current.priority(), current.compound_priority())
        });
        if better {
            best = Some(node);
        }
    }
    best.map(Arc::clone).ok_or_else(|| {
        ExecError::Graph("cannot pick a task from an empty ready set".to_string())
    })
}

/// Executes the task graph across a bounded worker pool and returns the
/// final state table.
///
/// A fresh state table is built from `node_table` unless the caller passes
/// `modified_node_table`, which is then used as-is (this is how call-time
/// inputs are injected as pre-executed tasks). Tasks whose result is already
/// materialized are removed from the working graph without being submitted.
///
/// `call_id` only names the worker threads of this invocation.
///
/// Failure semantics:
/// - With [`ErrorStrategy::Permissive`], dependents of a failed task still
///   run and observe an empty result slot for that dependency; their
///   closures must tolerate the missing value.
/// - On abort (strict failure or timeout), the pool is shut down by joining
///   its workers: still-running closures finish, their results are
///   discarded, and nothing is forcibly killed.
pub fn execute<V>(
    node_table: &TaskTable<V>,
    max_concurrency: usize,
    error_strategy: ErrorStrategy,
    mut graph: WorkingGraph,
    modified_node_table: Option<TaskTable<V>>,
    call_id: &str,
) -> Result<Arc<TaskTable<V>>, ExecError>
where
    V: Truthy + Send + Sync + 'static,
{
    if max_concurrency == 0 {
        return Err(ExecError::Configuration(
            "max_concurrency must be at least 1".to_string(),
        ));
    }

    let state = Arc::new(modified_node_table.unwrap_or_else(|| copy_non_setup_nodes(node_table)));

    for id in graph.ids() {
        if !state.contains_key(&id) {
            return Err(ExecError::Configuration(format!(
                "task {id} is in the graph but not in the node table"
            )));
        }
    }

    // Short-circuit tasks whose result is already materialized (call-time
    // inputs and setup tasks executed by an earlier invocation).
    let precomputed: Vec<String> = graph
        .ids()
        .into_iter()
        .filter(|id| state.get(id).map_or(false, |node| node.executed()))
        .collect();
    for id in &precomputed {
        debug!("Remove pre-executed task {id} from the graph");
        graph.remove(id)?;
    }

    let pool = WorkerPool::new(max_concurrency, call_id)?;
    let mut handles: HashMap<String, TaskHandle> = HashMap::new();
    let mut runnable = graph.root_ids();

    while !graph.is_empty() {
        // Block if the pool is saturated or no root is ready: either way a
        // completion must arrive before anything new can be submitted.
        if num_running(&handles) == max_concurrency || runnable.is_empty() {
            debug!("Waiting for an in-flight task to finish.");
            let deadline = next_deadline(&handles, &state);
            wait_for_completion(&pool, &mut handles, deadline)?;
        }

        // Reap: apply the error strategy to every finished task still in the
        // graph, then remove it so its dependents can become roots.
        let finished: Vec<String> = handles
            .iter()
            .filter(|(id, handle)| handle.done && graph.contains(id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in finished {
            debug!("Remove task {id} from the graph");
            if let Some(handle) = handles.get_mut(&id) {
                handle_failure(error_strategy, &mut graph, handle, &id)?;
            }
            graph.remove(&id)?;
        }

        // Roots that are not already in flight.
        runnable = graph
            .root_ids()
            .into_iter()
            .filter(|id| !handles.contains_key(id))
            .collect();
        if runnable.is_empty() {
            debug!("No runnable task available.");
            continue;
        }

        let node = pick_next_task(&runnable, &state)?;
        let id = node.id().clone();
        info!("{id} will run!");

        // A sequential task must run alone. Wait for a completion and
        // restart the loop: the reap may surface a new, more urgent root.
        if node.is_sequential() && num_running(&handles) != 0 {
            debug!("{id} must not run in parallel. Waiting for in-flight tasks.");
            let deadline = next_deadline(&handles, &state);
            wait_for_completion(&pool, &mut handles, deadline)?;
            continue;
        }

        if !is_active_in_call(&node, &state)? {
            debug!("Prune inactive task {id} from the graph");
            graph.remove_recursively(&id)?;
            continue;
        }

        let thunk = {
            let state = Arc::clone(&state);
            let node = Arc::clone(&node);
            move || match node.invoke(&state) {
                Ok(value) => {
                    if !node.put_result(value) {
                        warn!("The result of task {} was already set.", node.id());
                    }
                    None
                }
                Err(failure) => Some(failure),
            }
        };
        pool.submit(id.clone(), thunk)?;
        handles.insert(id.clone(), TaskHandle::launched());

        // Drain the pool before the next pick.
        if node.is_sequential() {
            debug!("Waiting for sequential task {id} to finish.");
            let deadline = next_deadline(&handles, &state);
            wait_for_completion(&pool, &mut handles, deadline)?;
        }
    }

    drop(pool);
    Ok(state)
}
