use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use getset::{CopyGetters, Getters};

use crate::error::UserFnError;

/// Per-invocation state: task id to task record.
pub type TaskTable<V> = HashMap<String, Arc<TaskNode<V>>>;

/// The user function of a task, already bound to its dependencies. It reads
/// their results from the state table and returns its own.
pub type RunFn<V> = Arc<dyn Fn(&TaskTable<V>) -> Result<V, UserFnError> + Send + Sync>;

/// Conditional activation of a task: a constant, or the id of another task
/// whose result is evaluated for truthiness at pick time.
///
/// The reference is resolved through the state table, never held as a pointer
/// to the other record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Activation {
    Literal(bool),
    DependsOn(String),
}

/// Truthiness of a task result, used to evaluate [`Activation::DependsOn`].
pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

impl Truthy for () {
    fn is_truthy(&self) -> bool {
        false
    }
}

macro_rules! impl_truthy_for_number {
    ($($t:ty),*) => {
        $(impl Truthy for $t {
            fn is_truthy(&self) -> bool {
                *self != 0 as $t
            }
        })*
    };
}

impl_truthy_for_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl Truthy for String {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for &str {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Truthy> Truthy for Option<T> {
    fn is_truthy(&self) -> bool {
        self.as_ref().map_or(false, Truthy::is_truthy)
    }
}

impl<T> Truthy for Vec<T> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

/// A single task record: scheduling metadata, a write-once result slot and
/// the bound user function.
///
/// The result slot is the only field written after construction. It is set
/// exactly once by the worker that runs the task, and read by dependents only
/// after the task has been reaped, so no locking is needed around it.
#[derive(Getters, CopyGetters)]
pub struct TaskNode<V> {
    /// Stable identifier, unique within a graph.
    #[getset(get = "pub")]
    id: String,
    /// Higher wins among simultaneously-ready tasks.
    #[getset(get_copy = "pub")]
    priority: i32,
    /// Secondary pick key; at least `priority`. Precomputed outside the
    /// scheduler, which only relies on "bigger is preferred".
    #[getset(get_copy = "pub")]
    compound_priority: i32,
    /// A sequential task runs with zero other tasks in flight.
    #[getset(get_copy = "pub")]
    is_sequential: bool,
    /// Wall-clock budget measured from submission.
    #[getset(get_copy = "pub")]
    timeout: Option<Duration>,
    /// Setup tasks persist across invocations and are never copied.
    #[getset(get_copy = "pub")]
    setup: bool,
    #[getset(get = "pub")]
    active: Activation,
    result: OnceLock<V>,
    run: RunFn<V>,
}

impl<V> TaskNode<V> {
    pub fn new<F>(id: impl Into<String>, run: F) -> Self
    where
        F: Fn(&TaskTable<V>) -> Result<V, UserFnError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            priority: 0,
            compound_priority: 0,
            is_sequential: false,
            timeout: None,
            setup: false,
            active: Activation::Literal(true),
            result: OnceLock::new(),
            run: Arc::new(run),
        }
    }

    /// An input task: its result is materialized at build time and the
    /// scheduler never submits it.
    pub fn precomputed(id: impl Into<String>, value: V) -> Self {
        let id = id.into();
        let node = Self::new(id.clone(), move |_: &TaskTable<V>| {
            Err(UserFnError::from(format!(
                "precomputed task {id} cannot be run"
            )))
        });
        let _ = node.result.set(value);
        node
    }

    /// Sets the priority and lifts the compound priority to the same value.
    /// Call [`TaskNode::with_compound_priority`] afterwards to override it.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self.compound_priority = self.compound_priority.max(priority);
        self
    }

    pub fn with_compound_priority(mut self, compound_priority: i32) -> Self {
        self.compound_priority = compound_priority;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.is_sequential = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn as_setup(mut self) -> Self {
        self.setup = true;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Activation::Literal(active);
        self
    }

    /// Activates this task only if the result of `gate_id` is truthy.
    pub fn gated_by(mut self, gate_id: impl Into<String>) -> Self {
        self.active = Activation::DependsOn(gate_id.into());
        self
    }

    /// True once the result slot is populated. Pre-set on input tasks, and
    /// how setup tasks skip re-execution on later invocations.
    pub fn executed(&self) -> bool {
        self.result.get().is_some()
    }

    pub fn result(&self) -> Option<&V> {
        self.result.get()
    }

    pub(crate) fn put_result(&self, value: V) -> bool {
        self.result.set(value).is_ok()
    }

    pub(crate) fn invoke(&self, state: &TaskTable<V>) -> Result<V, UserFnError> {
        (self.run)(state)
    }

    /// Copy for a new invocation: metadata and the shared run closure, with
    /// an empty result slot.
    pub(crate) fn fresh_copy(&self) -> Self {
        Self {
            id: self.id.clone(),
            priority: self.priority,
            compound_priority: self.compound_priority,
            is_sequential: self.is_sequential,
            timeout: self.timeout,
            setup: self.setup,
            active: self.active.clone(),
            result: OnceLock::new(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<V> std::fmt::Debug for TaskNode<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("compound_priority", &self.compound_priority)
            .field("is_sequential", &self.is_sequential)
            .field("timeout", &self.timeout)
            .field("setup", &self.setup)
            .field("active", &self.active)
            .field("executed", &self.executed())
            .finish()
    }
}

/// Builds the per-invocation state table. Setup tasks and pre-executed input
/// tasks are shared by reference because their records are immutable by the
/// time an invocation starts; every other task gets a copy with an empty
/// result slot, so results never leak across invocations.
pub fn copy_non_setup_nodes<V>(node_table: &TaskTable<V>) -> TaskTable<V> {
    node_table
        .iter()
        .map(|(id, node)| {
            let entry = if node.setup() || node.executed() {
                Arc::clone(node)
            } else {
                Arc::new(node.fresh_copy())
            };
            (id.clone(), entry)
        })
        .collect()
}
