//! Per-Node Scheduler (§4.5 / Component E)
//!
//! Each vertex under evaluation owns a `NodeContext`: a condition bitset, a
//! pool of `Task`s, and a FIFO list of tasks blocked on conditions this node
//! has not yet reached. The scheduler itself is condition-bookkeeping only;
//! dispatching a `Task`'s handler (deciding what running it actually does)
//! is the unifier's job (§4.6), kept out of this module so the bitset
//! arithmetic here can be tested in isolation.

use crate::arena::{Arena, Id};
use crate::conjunct::{Conjunct, VertexId};
use crate::env::EnvId;

pub type NodeContextId = Id<NodeContext>;
pub type TaskId = Id<Task>;

/// Scheduler condition bits (§4.5 table). Counter conditions are satisfied
/// when their backing counter reaches zero; signal conditions are raised
/// explicitly and never reset.
pub mod cond {
    pub const ALL_ANCESTORS_PROCESSED: u32 = 1 << 0;
    pub const ARC_TYPE_KNOWN: u32 = 1 << 1;
    pub const VALUE_KNOWN: u32 = 1 << 2;
    pub const SCALAR_KNOWN: u32 = 1 << 3;
    pub const LIST_TYPE_KNOWN: u32 = 1 << 4;
    pub const FIELD_CONJUNCTS_KNOWN: u32 = 1 << 5;
    pub const FIELD_SET_KNOWN: u32 = 1 << 6;
    pub const ALL_TASKS_COMPLETED: u32 = 1 << 7;
    pub const SUB_FIELDS_PROCESSED: u32 = 1 << 8;

    pub const ALL: u32 = ALL_ANCESTORS_PROCESSED
        | ARC_TYPE_KNOWN
        | VALUE_KNOWN
        | SCALAR_KNOWN
        | LIST_TYPE_KNOWN
        | FIELD_CONJUNCTS_KNOWN
        | FIELD_SET_KNOWN
        | ALL_TASKS_COMPLETED
        | SUB_FIELDS_PROCESSED;

    /// Conditions satisfied by a counter reaching zero, vs. raised as a
    /// one-shot signal.
    pub const COUNTERS: [u32; 5] = [
        ARC_TYPE_KNOWN,
        VALUE_KNOWN,
        FIELD_CONJUNCTS_KNOWN,
        FIELD_SET_KNOWN,
        ALL_TASKS_COMPLETED,
    ];
}

/// Scheduler step intensity (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Do nothing.
    Ignore,
    /// Run one pass of ready tasks.
    AttemptOnly,
    /// Run until blocked (no more ready tasks and `needs` unmet).
    Yield,
    /// Additionally force unblocking of waiting tasks once all possible
    /// ancestors are settled.
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Waiting,
    Success,
    Defunct,
}

/// Which handler a task dispatches to when run (§3.6). The scheduler does
/// not interpret these; the unifier does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskHandler {
    Expr,
    Resolver,
    ListLit,
    ListVertex,
    DynamicField,
    PatternConstraint,
    Disjunctions,
    Comprehension,
}

/// A unit of deferred work on a node (§3.6).
#[derive(Debug, Clone)]
pub struct Task {
    pub handler: TaskHandler,
    pub state: TaskState,
    pub completes: u32,
    pub block_condition: u32,
    pub blocked_on: Option<NodeContextId>,
    pub env: EnvId,
    pub conjunct: Conjunct,
    pub node: VertexId,
}

/// Per-node scheduler state, referenced from `Vertex::state` while
/// `status < Finalized` (§3.2, §4.5).
pub struct NodeContext {
    pub vertex: VertexId,
    pub ref_count: u32,
    pub generation: u32,
    completed: u32,
    counters: [u32; cond::COUNTERS.len()],
    pub tasks: Vec<TaskId>,
    /// FIFO list of `(task, missing conditions)` waiting on this node.
    blocking: Vec<(TaskId, u32)>,
}

impl NodeContext {
    fn new(vertex: VertexId, generation: u32) -> Self {
        NodeContext {
            vertex,
            ref_count: 0,
            generation,
            completed: 0,
            counters: [0; cond::COUNTERS.len()],
            tasks: Vec::new(),
            blocking: Vec::new(),
        }
    }

    fn counter_index(condition: u32) -> usize {
        cond::COUNTERS
            .iter()
            .position(|&c| c == condition)
            .expect("condition is not counter-backed")
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn needs(&self, req: u32) -> bool {
        (self.completed & req) == req
    }

    /// Raise a signal condition (idempotent).
    fn signal_bit(&mut self, condition: u32) {
        self.completed |= condition;
    }

    /// Register `count` outstanding units of work for a counter condition.
    pub fn expect(&mut self, condition: u32, count: u32) {
        let idx = Self::counter_index(condition);
        self.counters[idx] += count;
        if self.counters[idx] == 0 {
            self.signal_bit(condition);
        }
    }

    /// One outstanding unit of work for `condition` completed. Returns
    /// `true` if this decrement satisfied the condition (counter hit zero).
    pub fn decrement(&mut self, condition: u32) -> bool {
        let idx = Self::counter_index(condition);
        assert!(self.counters[idx] > 0, "decrement below zero for condition {condition:#x}");
        self.counters[idx] -= 1;
        if self.counters[idx] == 0 {
            self.signal_bit(condition);
            true
        } else {
            false
        }
    }
}

/// Owns the pools of `Task`s and `NodeContext`s for one evaluator context.
#[derive(Default)]
pub struct Scheduler {
    tasks: Arena<Task>,
    contexts: Arena<NodeContext>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_context(&mut self, vertex: VertexId) -> NodeContextId {
        self.contexts.insert(NodeContext::new(vertex, 0))
    }

    pub fn context(&self, id: NodeContextId) -> &NodeContext {
        self.contexts.get(id).expect("NodeContextId must be live")
    }

    pub fn context_mut(&mut self, id: NodeContextId) -> &mut NodeContext {
        self.contexts.get_mut(id).expect("NodeContextId must be live")
    }

    pub fn retain(&mut self, id: NodeContextId) {
        self.context_mut(id).ref_count += 1;
    }

    /// Release a reference; returns `true` if the context was actually
    /// freed (ref count hit zero). The generation counter on the freed
    /// slot bumps automatically via the arena, satisfying the "below the
    /// last resolved disjunction" retention rule (§5, §9) as long as
    /// callers holding a disjunct's close-info retain past this point.
    pub fn release(&mut self, id: NodeContextId) -> bool {
        let ctx = self.context_mut(id);
        assert!(ctx.ref_count > 0, "release called with zero ref_count");
        ctx.ref_count -= 1;
        if ctx.ref_count == 0 {
            self.contexts.remove(id);
            true
        } else {
            false
        }
    }

    pub fn add_task(&mut self, ctx_id: NodeContextId, task: Task) -> TaskId {
        let task_id = self.tasks.insert(task);
        self.context_mut(ctx_id).tasks.push(task_id);
        task_id
    }

    pub fn task(&self, id: TaskId) -> &Task {
        self.tasks.get(id).expect("TaskId must be live")
    }

    pub fn task_mut(&mut self, id: TaskId) -> &mut Task {
        self.tasks.get_mut(id).expect("TaskId must be live")
    }

    /// Raise a signal condition on `ctx_id` and return the tasks anywhere
    /// in the system that are now unblocked. The scheduler processes
    /// `blocking` FIFO on wake (§5 ordering guarantee).
    pub fn signal(&mut self, ctx_id: NodeContextId, condition: u32) -> Vec<TaskId> {
        self.context_mut(ctx_id).signal_bit(condition);
        self.wake(ctx_id, condition)
    }

    /// Decrement a counter condition; if it reaches zero, wake blocked
    /// tasks the same way `signal` does.
    pub fn decrement(&mut self, ctx_id: NodeContextId, condition: u32) -> Vec<TaskId> {
        if self.context_mut(ctx_id).decrement(condition) {
            self.wake(ctx_id, condition)
        } else {
            Vec::new()
        }
    }

    fn wake(&mut self, ctx_id: NodeContextId, condition: u32) -> Vec<TaskId> {
        let ctx = self.context_mut(ctx_id);
        let completed = ctx.completed;
        let mut woken = Vec::new();
        let mut still_blocked = Vec::with_capacity(ctx.blocking.len());
        for (task_id, missing) in ctx.blocking.drain(..) {
            if missing & condition != 0 && (missing & completed) == missing {
                woken.push(task_id);
            } else {
                still_blocked.push((task_id, missing));
            }
        }
        ctx.blocking = still_blocked;
        for &task_id in &woken {
            if let Some(task) = self.tasks.get_mut(task_id) {
                if task.state == TaskState::Waiting {
                    task.state = TaskState::Ready;
                    task.blocked_on = None;
                }
            }
        }
        woken
    }

    /// Park a task on `ctx_id` waiting for `condition`, which may already
    /// be partially satisfied.
    pub fn block(&mut self, ctx_id: NodeContextId, task_id: TaskId, condition: u32) {
        {
            let task = self.tasks.get_mut(task_id).expect("TaskId must be live");
            task.state = TaskState::Waiting;
            task.blocked_on = Some(ctx_id);
            task.block_condition = condition;
        }
        self.context_mut(ctx_id).blocking.push((task_id, condition));
    }

    pub fn mark_defunct(&mut self, task_id: TaskId) {
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.state = TaskState::Defunct;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena as GenericArena;
    use crate::conjunct::{CloseInfo, ConjunctExpr};
    use crate::env::Environments;
    use crate::term::Expr;
    use crate::vertex::Vertex;

    fn sample_task(node: VertexId, env: EnvId) -> Task {
        Task {
            handler: TaskHandler::Expr,
            state: TaskState::Ready,
            completes: 0,
            block_condition: 0,
            blocked_on: None,
            env,
            conjunct: Conjunct::new(env, ConjunctExpr::Expr(Expr::Top), CloseInfo::root(0)),
            node,
        }
    }

    fn sample_node_and_env() -> (VertexId, EnvId) {
        let mut arena: GenericArena<Vertex> = GenericArena::new();
        let v = arena.insert(Vertex::new_unset(None, 0));
        let mut envs = Environments::new();
        let e = envs.root(v);
        (v, e)
    }

    #[test]
    fn counter_condition_signals_only_at_zero() {
        let mut sched = Scheduler::new();
        let (v, _) = sample_node_and_env();
        let ctx = sched.create_context(v);
        sched.context_mut(ctx).expect(cond::FIELD_CONJUNCTS_KNOWN, 2);
        assert!(!sched.context(ctx).needs(cond::FIELD_CONJUNCTS_KNOWN));
        sched.decrement(ctx, cond::FIELD_CONJUNCTS_KNOWN);
        assert!(!sched.context(ctx).needs(cond::FIELD_CONJUNCTS_KNOWN));
        sched.decrement(ctx, cond::FIELD_CONJUNCTS_KNOWN);
        assert!(sched.context(ctx).needs(cond::FIELD_CONJUNCTS_KNOWN));
    }

    #[test]
    fn expect_zero_count_signals_immediately() {
        let mut sched = Scheduler::new();
        let (v, _) = sample_node_and_env();
        let ctx = sched.create_context(v);
        sched.context_mut(ctx).expect(cond::VALUE_KNOWN, 0);
        assert!(sched.context(ctx).needs(cond::VALUE_KNOWN));
    }

    #[test]
    fn blocked_task_wakes_when_condition_satisfied() {
        let mut sched = Scheduler::new();
        let (v, e) = sample_node_and_env();
        let ctx = sched.create_context(v);
        let task_id = sched.add_task(ctx, sample_task(v, e));
        sched.block(ctx, task_id, cond::SCALAR_KNOWN);
        assert_eq!(sched.task(task_id).state, TaskState::Waiting);
        let woken = sched.signal(ctx, cond::SCALAR_KNOWN);
        assert_eq!(woken, vec![task_id]);
        assert_eq!(sched.task(task_id).state, TaskState::Ready);
    }

    #[test]
    fn task_blocked_on_multiple_conditions_waits_for_all() {
        let mut sched = Scheduler::new();
        let (v, e) = sample_node_and_env();
        let ctx = sched.create_context(v);
        let task_id = sched.add_task(ctx, sample_task(v, e));
        let need = cond::SCALAR_KNOWN | cond::LIST_TYPE_KNOWN;
        sched.block(ctx, task_id, need);
        let woken = sched.signal(ctx, cond::SCALAR_KNOWN);
        assert!(woken.is_empty(), "must not wake until all bits in block_condition are set");
        let woken = sched.signal(ctx, cond::LIST_TYPE_KNOWN);
        assert_eq!(woken, vec![task_id]);
    }

    #[test]
    fn defunct_task_state_is_sticky_until_overwritten() {
        let mut sched = Scheduler::new();
        let (v, e) = sample_node_and_env();
        let ctx = sched.create_context(v);
        let task_id = sched.add_task(ctx, sample_task(v, e));
        sched.mark_defunct(task_id);
        assert_eq!(sched.task(task_id).state, TaskState::Defunct);
    }

    #[test]
    fn ref_counted_context_frees_at_zero() {
        let mut sched = Scheduler::new();
        let (v, _) = sample_node_and_env();
        let ctx = sched.create_context(v);
        sched.retain(ctx);
        sched.retain(ctx);
        assert!(!sched.release(ctx));
        assert!(sched.release(ctx));
    }
}
