//! Unification (§4.6 / Component D)
//!
//! `unify_vertex` is the accumulator: given a vertex's conjuncts, it folds
//! every contributing expression's value into the vertex's `base_value`
//! under the meet (`&`) lattice (§4.2), builds child arcs for struct and
//! list literals, and recurses into those children. Each node's evaluation
//! is also registered with the scheduler (§4.5) so its condition bitset
//! tracks real progress rather than standing unused; full task dispatch
//! across multiple scheduling rounds is still future work (§9).

use std::collections::HashMap;

use crate::arena::Arena;
use crate::closedness::check_typos;
use crate::collab::BuiltinRegistry;
use crate::conjunct::{CloseInfo, Conjunct, ConjunctExpr, CycleType, RefEntry, VertexId};
use crate::cycle;
use crate::env::{EnvId, Environments};
use crate::error::{Bottom, ErrorCode, UnifyResult};
use crate::feature::{FeatureId, FeatureInterner};
use crate::scheduler::{cond, Scheduler};
use crate::term::{bin_op, BasicKind, BinOp, BoundOp, BoundSet, BoundValue, ComprehensionClause, Expr, NumValue, Scalar, UnaryOp};
use crate::vertex::{ArcEdge, ArcType, PatternConstraint, PatternPredicate, Status, Value, Vertex};

/// Everything one `unify_vertex` call needs: the shared vertex arena, the
/// environment chain, the label interner, the disjunction overlay map
/// (§4.7), and the scheduler's context/task pools (§4.5). Held across the
/// whole recursive walk of one root unification.
pub struct Ctx<'a> {
    pub arena: &'a mut Arena<Vertex>,
    pub envs: &'a mut Environments,
    pub interner: &'a FeatureInterner,
    pub overlay: &'a mut HashMap<VertexId, VertexId>,
    pub scheduler: &'a mut Scheduler,
}

/// Combine two base values under the meet lattice (§4.2). `Top` is the
/// identity; mismatched concrete kinds conflict; anything not yet
/// reconcilable (a validator call, an undistributed disjunction) is kept as
/// a pending `Conjunction` for a later pass to resolve.
pub fn meet_values(a: Value, b: Value) -> UnifyResult<Value> {
    use Value::*;
    match (a, b) {
        (Unset, v) | (v, Unset) => Ok(v),
        (Top, v) | (v, Top) => Ok(v),
        (CyclePlaceholder, v) | (v, CyclePlaceholder) => Ok(v),
        (Bottom(e), _) | (_, Bottom(e)) => Ok(Bottom(e)),
        (Scalar(x), Scalar(y)) => {
            if x.eq_value(&y) {
                Ok(Scalar(x))
            } else {
                Err(Bottom::eval(format!("conflicting values {x} and {y}")))
            }
        }
        (Scalar(s), BasicType(k)) | (BasicType(k), Scalar(s)) => {
            if s.kind().is_subkind_of(k) {
                Ok(Scalar(s))
            } else {
                Err(Bottom::eval(format!("{s} does not match type {k}")))
            }
        }
        (Scalar(s), Bound(bs)) | (Bound(bs), Scalar(s)) => {
            if bound_set_accepts(&bs, &s) {
                Ok(Scalar(s))
            } else {
                Err(Bottom::eval(format!("{s} is out of bounds")))
            }
        }
        (BasicType(x), BasicType(y)) => x
            .meet(y)
            .map(BasicType)
            .ok_or_else(|| Bottom::eval(format!("conflicting types {x} and {y}"))),
        (Bound(a), Bound(b)) => merge_bound_sets(a, b).map(Bound),
        (Struct, Struct) => Ok(Struct),
        (List, List) => Ok(List),
        // Structure sharing (§4.6.1): two conjuncts pointing at the same
        // shared vertex agree trivially; a shared vertex meeting a plain
        // struct marker stays shared (the target is itself a struct).
        (SharedRef(x), SharedRef(y)) if x == y => Ok(SharedRef(x)),
        (SharedRef(target), Struct) | (Struct, SharedRef(target)) => Ok(SharedRef(target)),
        (Struct, v @ (Scalar(_) | BasicType(_) | Bound(_) | List))
        | (v, Struct) if !matches!(v, Conjunction(_) | Validator(_) | Disjunction { .. } | SharedRef(_)) => {
            Err(Bottom::eval("cannot unify struct with a non-struct value"))
        }
        (Conjunction(mut xs), v) | (v, Conjunction(mut xs)) => {
            xs.push(v);
            Ok(Conjunction(xs))
        }
        (a @ (Validator(_) | Disjunction { .. } | SharedRef(_)), b) => Ok(Conjunction(vec![a, b])),
        (a, b) => Ok(Conjunction(vec![a, b])),
    }
}

fn satisfies_bound(bound: &BoundValue, s: &Scalar) -> bool {
    match s.partial_cmp_value(&bound.subject) {
        Some(ord) => match bound.op {
            BoundOp::Lt => ord == std::cmp::Ordering::Less,
            BoundOp::Le => ord != std::cmp::Ordering::Greater,
            BoundOp::Gt => ord == std::cmp::Ordering::Greater,
            BoundOp::Ge => ord != std::cmp::Ordering::Less,
            BoundOp::Ne => ord != std::cmp::Ordering::Equal,
        },
        None => false,
    }
}

fn bound_set_accepts(bounds: &BoundSet, s: &Scalar) -> bool {
    if let Some(lo) = &bounds.lower {
        if !satisfies_bound(lo, s) {
            return false;
        }
    }
    if let Some(hi) = &bounds.upper {
        if !satisfies_bound(hi, s) {
            return false;
        }
    }
    !bounds.excluded.iter().any(|e| e.eq_value(s))
}

fn merge_bound_sets(mut into: BoundSet, other: BoundSet) -> UnifyResult<BoundSet> {
    if let Some(lo) = other.lower {
        into.insert(lo)?;
    }
    if let Some(hi) = other.upper {
        into.insert(hi)?;
    }
    for excluded in other.excluded {
        into.insert(BoundValue { op: BoundOp::Ne, subject: excluded })?;
    }
    Ok(into)
}

fn value_to_scalar(value: Value, what: &str) -> UnifyResult<Scalar> {
    match value {
        Value::Scalar(s) => Ok(s),
        other => Err(Bottom::incomplete(format!(
            "{what} has not reduced to a concrete value yet ({other:?})"
        ))),
    }
}

fn apply_unary(op: UnaryOp, scalar: Scalar) -> UnifyResult<Scalar> {
    match (op, scalar) {
        (UnaryOp::Plus, Scalar::Num(n)) => Ok(Scalar::Num(n)),
        (UnaryOp::Neg, Scalar::Num(NumValue::Int(i))) => Ok(Scalar::Num(NumValue::Int(-i))),
        (UnaryOp::Neg, Scalar::Num(NumValue::Float(f))) => Ok(Scalar::Num(NumValue::Float(-f))),
        (UnaryOp::Not, Scalar::Bool(b)) => Ok(Scalar::Bool(!b)),
        (op, s) => Err(Bottom::eval(format!("operator {op:?} is not defined for {s}"))),
    }
}

/// Recursively unify `vertex_id`: accumulate its own conjuncts, build arcs
/// for any struct/list literal among them, then unify each child. Detects
/// structural cycles after accumulation (§4.4) and runs the typo check
/// after closedness flags are known (§4.3). Registers a scheduler
/// `NodeContext` for the duration of the call so the condition bitset
/// reflects this node's actual progress (§4.5).
pub fn unify_vertex(
    ctx: &mut Ctx<'_>,
    vertex_id: VertexId,
    builtins: &dyn BuiltinRegistry,
) -> UnifyResult<()> {
    {
        let vertex = ctx.arena.get_mut(vertex_id).expect("vertex must be live");
        vertex.status.advance_to(Status::Evaluating);
    }

    let node_ctx = ctx.scheduler.create_context(vertex_id);
    ctx.scheduler.retain(node_ctx);
    ctx.arena.get_mut(vertex_id).unwrap().state = Some(node_ctx);

    let mut conjuncts = ctx.arena.get(vertex_id).unwrap().conjuncts.clone();
    ctx.scheduler.context_mut(node_ctx).expect(cond::FIELD_CONJUNCTS_KNOWN, conjuncts.len() as u32);

    let mut acc = Value::Top;
    let mut explicit_labels: Vec<FeatureId> = Vec::new();
    let mut ellipsis_seen = false;
    let mut deferred: Option<Bottom> = None;

    for conjunct in &mut conjuncts {
        let result = eval_conjunct(ctx, vertex_id, conjunct, builtins, &mut explicit_labels, &mut ellipsis_seen);
        ctx.scheduler.decrement(node_ctx, cond::FIELD_CONJUNCTS_KNOWN);
        match result {
            Ok(value) => acc = meet_values(acc, value)?,
            Err(e) if !e.code.is_terminal() => deferred = Some(Bottom::merge_opt(deferred, Some(e)).unwrap()),
            Err(e) => return Err(e),
        }
    }
    ctx.arena.get_mut(vertex_id).unwrap().conjuncts = conjuncts;

    {
        let vertex = ctx.arena.get_mut(vertex_id).unwrap();
        vertex.base_value = acc;
        vertex.has_ellipsis = vertex.has_ellipsis || ellipsis_seen;
        vertex.status.advance_to(Status::Conjuncts);
    }
    ctx.scheduler.context_mut(node_ctx).expect(cond::VALUE_KNOWN, 0);

    adopt_shared_structure(ctx, vertex_id);

    if let Some(err) = cycle::structural_cycle_check(ctx.arena.get(vertex_id).unwrap()) {
        return Err(err);
    }

    check_typos(ctx.arena.get(vertex_id).unwrap(), &explicit_labels, ctx.interner)?;
    ctx.scheduler.context_mut(node_ctx).expect(cond::FIELD_SET_KNOWN, 0);

    let children: Vec<VertexId> = ctx.arena.get(vertex_id).unwrap().arcs.iter().map(|a| a.vertex).collect();
    ctx.scheduler.context_mut(node_ctx).expect(cond::ALL_TASKS_COMPLETED, children.len() as u32);
    for child in children {
        unify_vertex(ctx, child, builtins)?;
        ctx.scheduler.decrement(node_ctx, cond::ALL_TASKS_COMPLETED);
    }

    let ready = ctx.scheduler.context(node_ctx).needs(
        cond::FIELD_CONJUNCTS_KNOWN | cond::VALUE_KNOWN | cond::FIELD_SET_KNOWN | cond::ALL_TASKS_COMPLETED,
    );
    debug_assert!(ready, "a node must not finalize before its scheduler conditions are met");

    let vertex = ctx.arena.get_mut(vertex_id).unwrap();
    vertex.status.advance_to(Status::Finalized);
    if let Some(err) = deferred {
        vertex.child_errors = Some(Bottom::merge_opt(vertex.child_errors.clone(), Some(err)).unwrap());
    }
    vertex.state = None;
    ctx.scheduler.release(node_ctx);
    Ok(())
}

/// Once a vertex's value is a `SharedRef`, it is structurally identical to
/// its target: propagate the target's closedness flags rather than leaving
/// this node looking like a bare, unconstrained struct (§4.6.1).
fn adopt_shared_structure(ctx: &mut Ctx<'_>, vertex_id: VertexId) {
    let target = match ctx.arena.get(vertex_id).unwrap().base_value {
        Value::SharedRef(target) => target,
        _ => return,
    };
    let Some(target_vertex) = ctx.arena.get(target) else { return };
    let (closed_recursive, has_ellipsis) = (target_vertex.closed_recursive, target_vertex.has_ellipsis);
    let vertex = ctx.arena.get_mut(vertex_id).unwrap();
    vertex.closed_recursive = vertex.closed_recursive || closed_recursive;
    vertex.has_ellipsis = vertex.has_ellipsis || has_ellipsis;
}

fn eval_conjunct(
    ctx: &mut Ctx<'_>,
    owner: VertexId,
    conjunct: &mut Conjunct,
    builtins: &dyn BuiltinRegistry,
    explicit: &mut Vec<FeatureId>,
    ellipsis_seen: &mut bool,
) -> UnifyResult<Value> {
    let Conjunct { env, expr, close_info } = conjunct;
    match expr {
        ConjunctExpr::Vertex(other) => Ok(ctx.arena.get(*other).expect("shared vertex must be live").base_value.clone()),
        ConjunctExpr::Group(nested) => {
            let mut acc = Value::Top;
            for inner in nested.iter_mut() {
                let v = eval_conjunct(ctx, owner, inner, builtins, explicit, ellipsis_seen)?;
                acc = meet_values(acc, v)?;
            }
            Ok(acc)
        }
        ConjunctExpr::Expr(e) => eval_expr(ctx, owner, *env, e, close_info, builtins, explicit, ellipsis_seen),
    }
}

fn eval_expr(
    ctx: &mut Ctx<'_>,
    owner: VertexId,
    env: EnvId,
    expr: &Expr,
    close_info: &mut CloseInfo,
    builtins: &dyn BuiltinRegistry,
    explicit: &mut Vec<FeatureId>,
    ellipsis_seen: &mut bool,
) -> UnifyResult<Value> {
    match expr {
        Expr::Null => Ok(Value::Scalar(Scalar::Null)),
        Expr::Bool(b) => Ok(Value::Scalar(Scalar::Bool(*b))),
        Expr::Num(n) => Ok(Value::Scalar(Scalar::Num(*n))),
        Expr::Str(s) => Ok(Value::Scalar(Scalar::String(s.clone()))),
        Expr::Bytes(b) => Ok(Value::Scalar(Scalar::Bytes(b.clone()))),
        Expr::Top => Ok(Value::Top),
        Expr::Bottom(msg) => Err(Bottom::new(ErrorCode::User, msg.clone())),
        Expr::BasicType(k) => Ok(Value::BasicType(*k)),
        Expr::BoundExpr { op, expr } => {
            let inner = eval_expr(ctx, owner, env, expr, close_info, builtins, explicit, ellipsis_seen)?;
            let subject = value_to_scalar(inner, "bound subject")?;
            let mut set = BoundSet::default();
            set.insert(BoundValue { op: *op, subject })?;
            Ok(Value::Bound(set))
        }
        Expr::Unary { op, expr } => {
            let inner = eval_expr(ctx, owner, env, expr, close_info, builtins, explicit, ellipsis_seen)?;
            let scalar = value_to_scalar(inner, "unary operand")?;
            Ok(Value::Scalar(apply_unary(*op, scalar)?))
        }
        Expr::Binary { op, lhs, rhs } => {
            if matches!(op, BinOp::And | BinOp::Or) {
                let l = value_to_scalar(
                    eval_expr(ctx, owner, env, lhs, close_info, builtins, explicit, ellipsis_seen)?,
                    "boolean operand",
                )?;
                let r = value_to_scalar(
                    eval_expr(ctx, owner, env, rhs, close_info, builtins, explicit, ellipsis_seen)?,
                    "boolean operand",
                )?;
                return Ok(Value::Scalar(bin_op(*op, &l, &r)?));
            }
            let l = value_to_scalar(
                eval_expr(ctx, owner, env, lhs, close_info, builtins, explicit, ellipsis_seen)?,
                "left operand",
            )?;
            let r = value_to_scalar(
                eval_expr(ctx, owner, env, rhs, close_info, builtins, explicit, ellipsis_seen)?,
                "right operand",
            )?;
            Ok(Value::Scalar(bin_op(*op, &l, &r)?))
        }
        Expr::Call { func, args } => {
            let builtin = builtins
                .lookup(func)
                .ok_or_else(|| Bottom::eval(format!("unknown builtin {func}")))?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(ctx, owner, env, arg, close_info, builtins, explicit, ellipsis_seen)?);
            }
            builtin.call(&values)
        }
        Expr::Interpolation(parts) => {
            let mut out = String::new();
            for part in parts {
                let v = eval_expr(ctx, owner, env, part, close_info, builtins, explicit, ellipsis_seen)?;
                match value_to_scalar(v, "interpolation part")? {
                    Scalar::String(s) => out.push_str(&s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Value::Scalar(Scalar::String(out)))
        }
        Expr::FieldReference(label) => resolve_reference(ctx, owner, env, *label, close_info, true),
        Expr::SelectorExpr { base, field } => {
            let base_vertex = resolve_to_vertex(ctx, owner, env, base, close_info, builtins, explicit, ellipsis_seen)?;
            resolve_arc_on(ctx, owner, base_vertex, *field, close_info, true)
        }
        Expr::IndexExpr { base, index } => {
            let base_vertex = resolve_to_vertex(ctx, owner, env, base, close_info, builtins, explicit, ellipsis_seen)?;
            let idx = eval_expr(ctx, owner, env, index, close_info, builtins, explicit, ellipsis_seen)?;
            match value_to_scalar(idx, "index")? {
                Scalar::Num(NumValue::Int(i)) => {
                    let label = ctx.interner.intern_int(i);
                    resolve_arc_on(ctx, owner, base_vertex, label, close_info, true)
                }
                other => Err(Bottom::eval(format!("list index must be an int, got {other}"))),
            }
        }
        Expr::SliceExpr { .. } => Err(Bottom::incomplete("slice expressions require a concrete list and are resolved by a later pass")),
        // `let` bindings never participate in structure sharing (§9): a
        // `let` always clones its target's current value rather than
        // aliasing it.
        Expr::LetReference(label) => resolve_reference(ctx, owner, env, *label, close_info, false),
        Expr::DynamicReference(_) => Err(Bottom::incomplete("dynamic field reference requires its source struct to be concrete first")),
        Expr::LabelReference => {
            let scope = ctx.envs.get(env);
            match scope.dynamic_label {
                Some(label) => Ok(Value::Scalar(Scalar::String(ctx.interner.feature(label).label()))),
                None => Err(Bottom::eval("label reference used outside a pattern constraint scope")),
            }
        }
        Expr::ImportReference(path) => Err(Bottom::incomplete(format!("import {path} requires an import loader collaborator"))),
        Expr::Disjunction(d) => {
            let mut branches = Vec::with_capacity(d.disjuncts.len());
            let mut max_cycle = CycleType::NoCycle;
            for (hole_id, disjunct) in d.disjuncts.iter().enumerate() {
                let parent = ctx.arena.get(owner).unwrap().parent;
                let overlay = clone_vertex_deep(ctx, owner, parent);
                ctx.overlay.insert(owner, overlay);
                let mut branch_close = close_info.clone();
                let outcome = eval_expr(ctx, overlay, env, &disjunct.value, &mut branch_close, builtins, explicit, ellipsis_seen);
                ctx.overlay.remove(&owner);
                if branch_close.cycle_type > max_cycle {
                    max_cycle = branch_close.cycle_type;
                }
                branches.push(match outcome {
                    Ok(value) => crate::disjunction::DisjunctBranch::ok(hole_id as u32, disjunct.default, value, Some(overlay)),
                    Err(e) if !e.code.is_terminal() => return Err(e),
                    Err(e) => crate::disjunction::DisjunctBranch::errored(hole_id as u32, disjunct.default, e, Some(overlay)),
                });
            }
            close_info.advance_cycle(max_cycle);
            let (value, winner) = crate::disjunction::resolve(branches)?;
            if let Some(overlay_id) = winner {
                adopt_winning_branch(ctx, owner, overlay_id);
            }
            Ok(value)
        }
        Expr::Comprehension(comp) => eval_comprehension(ctx, owner, env, comp, close_info, builtins, explicit, ellipsis_seen),
        Expr::StructLit(lit) => {
            if lit.has_ellipsis {
                *ellipsis_seen = true;
            }
            for field in &lit.fields {
                explicit.push(field.label);
                let arc_type = if field.optional { ArcType::Optional } else { ArcType::Required };
                let child = ensure_child_arc(ctx, owner, field.label, arc_type);
                let child_env = ctx.envs.push(env, owner);
                push_conjunct(ctx, child, Conjunct::new(child_env, ConjunctExpr::Expr((*field.value).clone()), close_info.clone()));
            }
            for embedding in &lit.embeddings {
                let v = eval_expr(ctx, owner, env, embedding, close_info, builtins, explicit, ellipsis_seen)?;
                return meet_values(Value::Struct, v);
            }
            for pattern in &lit.patterns {
                let predicate = eval_pattern_predicate(ctx, owner, env, &pattern.pattern, close_info, builtins, explicit, ellipsis_seen)?;
                let matched_value = eval_expr(ctx, owner, env, &pattern.value, close_info, builtins, explicit, ellipsis_seen)?;
                let marker = ctx.arena.insert(Vertex {
                    base_value: matched_value,
                    status: Status::Finalized,
                    ..Vertex::new_unset(Some(owner), 0)
                });
                let existing_arcs = ctx.arena.get(owner).unwrap().arcs.clone();
                for arc in &existing_arcs {
                    let feature = ctx.interner.feature(arc.label);
                    if predicate.accepts(&feature) {
                        push_conjunct(ctx, arc.vertex, Conjunct::new(env, ConjunctExpr::Vertex(marker), close_info.clone()));
                    }
                }
                ctx.arena.get_mut(owner).unwrap().pattern_constraints.push(PatternConstraint { predicate, constraint: marker });
            }
            Ok(Value::Struct)
        }
        Expr::ListLit(lit) => {
            for (i, element) in lit.elements.iter().enumerate() {
                let label = ctx.interner.intern_int(i as i64);
                let child = ensure_child_arc(ctx, owner, label, ArcType::Required);
                let child_env = ctx.envs.push(env, owner);
                push_conjunct(ctx, child, Conjunct::new(child_env, ConjunctExpr::Expr(element.clone()), close_info.clone()));
            }
            if lit.tail_ellipsis.is_some() {
                *ellipsis_seen = true;
            }
            Ok(Value::List)
        }
    }
}

/// Reduce a pattern constraint's label matcher (`[string]: T`, `[int]: T`,
/// `["exact"]: T`) to a `PatternPredicate`. Regex label matchers are not yet
/// modeled by the expression tree, so they report `Incomplete` rather than
/// silently matching everything.
fn eval_pattern_predicate(
    ctx: &mut Ctx<'_>,
    owner: VertexId,
    env: EnvId,
    expr: &Expr,
    close_info: &mut CloseInfo,
    builtins: &dyn BuiltinRegistry,
    explicit: &mut Vec<FeatureId>,
    ellipsis_seen: &mut bool,
) -> UnifyResult<PatternPredicate> {
    let value = eval_expr(ctx, owner, env, expr, close_info, builtins, explicit, ellipsis_seen)?;
    match value {
        Value::BasicType(BasicKind::String) => Ok(PatternPredicate::AnyString),
        Value::BasicType(BasicKind::Int) => Ok(PatternPredicate::AnyInt),
        Value::Scalar(Scalar::String(s)) => Ok(PatternPredicate::Exact(ctx.interner.intern_label(&s))),
        other => Err(Bottom::incomplete(format!(
            "pattern constraint label matcher does not reduce to a supported matcher yet ({other:?})"
        ))),
    }
}

/// Resolve a `FieldReference`/`LetReference` by walking the environment
/// chain outward from `env` until a scope's vertex has a matching arc
/// (§3.4 lexical lookup). Runs the same cycle classification as any other
/// reference resolution (§4.4) since this is the real path self-references
/// like `{a: b: a}` travel during evaluation.
fn resolve_reference(
    ctx: &mut Ctx<'_>,
    owner: VertexId,
    env: EnvId,
    label: FeatureId,
    close_info: &mut CloseInfo,
    shareable: bool,
) -> UnifyResult<Value> {
    let target = find_in_scope_chain(ctx, env, label)
        .ok_or_else(|| Bottom::eval(format!("undefined field: {}", ctx.interner.feature(label).label())))?;
    resolve_target(ctx, owner, target, close_info, shareable)
}

/// Resolve a `SelectorExpr`/`IndexExpr` arc lookup on an already-resolved
/// base vertex, through the same cycle-detection chokepoint as
/// `resolve_reference`.
fn resolve_arc_on(
    ctx: &mut Ctx<'_>,
    owner: VertexId,
    base: VertexId,
    label: FeatureId,
    close_info: &mut CloseInfo,
    shareable: bool,
) -> UnifyResult<Value> {
    let target = ctx
        .arena
        .get(base)
        .expect("referenced vertex must be live")
        .find_arc(label)
        .map(|a| a.vertex)
        .ok_or_else(|| Bottom::eval(format!("undefined field: {}", ctx.interner.feature(label).label())))?;
    resolve_target(ctx, owner, target, close_info, shareable)
}

fn find_in_scope_chain(ctx: &Ctx<'_>, env: EnvId, label: FeatureId) -> Option<VertexId> {
    let mut current = env;
    loop {
        let scope = ctx.envs.get(current);
        if let Some(arc) = ctx.arena.get(scope.vertex).unwrap().find_arc(label) {
            return Some(arc.vertex);
        }
        current = scope.parent?;
    }
}

/// Classify the reference from `owner` to `target` (§4.4) and, if it is not
/// cyclic, read `target`'s current value, recording the visit in
/// `close_info.refs` so a later hop within the same conjunct can detect a
/// reference-chain cycle.
fn resolve_target(
    ctx: &mut Ctx<'_>,
    owner: VertexId,
    target: VertexId,
    close_info: &mut CloseInfo,
    shareable: bool,
) -> UnifyResult<Value> {
    let is_ancestor = cycle::is_ancestor(ctx.arena, owner, target);
    let traversed_optional = is_ancestor && path_crosses_optional(ctx, owner, target);
    let cycle_type = cycle::detect(ctx.arena, &close_info.refs, owner, target, traversed_optional);
    if cycle_type != CycleType::NoCycle {
        close_info.advance_cycle(cycle_type);
        // A cyclic self-reference never yields a concrete value on its
        // own; it drops to `Top` and waits for other conjuncts (§9).
        return Ok(Value::Top);
    }
    close_info.refs = close_info.refs.prepend(RefEntry { target_arc: target, source_node: owner, depth: 0 });
    value_of_vertex(ctx, target, shareable)
}

/// Whether the parent-chain path from `source` up to its ancestor `target`
/// crosses an arc declared `Optional` — a cycle through an optional arc is
/// not fatal on its own (§4.4).
fn path_crosses_optional(ctx: &Ctx<'_>, source: VertexId, target: VertexId) -> bool {
    let mut current = source;
    loop {
        if current == target {
            return false;
        }
        let Some(vertex) = ctx.arena.get(current) else { return false };
        let Some(parent) = vertex.parent else { return false };
        let Some(parent_vertex) = ctx.arena.get(parent) else { return false };
        if let Some(label) = vertex.label {
            if let Some(arc) = parent_vertex.find_arc(label) {
                if arc.arc_type == ArcType::Optional {
                    return true;
                }
            }
        }
        current = parent;
    }
}

/// Read `target`'s current value for a reference resolution, reporting
/// `Incomplete` until the target has at least accumulated its own
/// conjuncts. A `FieldReference` to a struct-valued target shares that
/// target's structure instead of cloning it (§4.6.1); `let` resolutions
/// never do (`shareable = false`).
fn value_of_vertex(ctx: &mut Ctx<'_>, target: VertexId, shareable: bool) -> UnifyResult<Value> {
    let vertex = ctx.arena.get(target).expect("referenced vertex must be live");
    if vertex.status < Status::Conjuncts {
        return Err(Bottom::incomplete("referenced field has not been evaluated yet"));
    }
    if shareable {
        if let Value::Struct = vertex.base_value {
            return Ok(Value::SharedRef(target));
        }
    }
    Ok(vertex.base_value.clone())
}

/// Deep-clone `original` and its whole arc subtree into fresh arena slots,
/// re-parented under `new_parent`, with scheduler state cleared so no two
/// vertices alias one `NodeContextId` (§4.7 disjunction overlay).
fn clone_vertex_deep(ctx: &mut Ctx<'_>, original: VertexId, new_parent: Option<VertexId>) -> VertexId {
    let mut cloned = ctx.arena.get(original).unwrap().clone();
    cloned.parent = new_parent;
    cloned.state = None;
    cloned.arcs = Vec::new();
    let new_id = ctx.arena.insert(cloned);

    let original_arcs = ctx.arena.get(original).unwrap().arcs.clone();
    for arc in original_arcs {
        let child_clone = clone_vertex_deep(ctx, arc.vertex, Some(new_id));
        ctx.arena.get_mut(new_id).unwrap().arcs.push(ArcEdge { label: arc.label, vertex: child_clone, arc_type: arc.arc_type });
    }
    new_id
}

/// Land the chosen disjunction branch's structure onto the real vertex:
/// `overlay` started as a full clone of `owner` plus whatever that branch
/// built on top, so its arcs wholesale replace `owner`'s (§4.7). Only
/// called once a branch has won unambiguously; an undecided (multi-value)
/// disjunction adopts nothing.
fn adopt_winning_branch(ctx: &mut Ctx<'_>, owner: VertexId, overlay: VertexId) {
    let overlay_arcs = ctx.arena.get(overlay).unwrap().arcs.clone();
    for arc in &overlay_arcs {
        if let Some(v) = ctx.arena.get_mut(arc.vertex) {
            v.parent = Some(owner);
        }
    }
    ctx.arena.get_mut(owner).unwrap().arcs = overlay_arcs;
}

fn resolve_to_vertex(
    ctx: &mut Ctx<'_>,
    owner: VertexId,
    env: EnvId,
    expr: &Expr,
    close_info: &mut CloseInfo,
    builtins: &dyn BuiltinRegistry,
    explicit: &mut Vec<FeatureId>,
    ellipsis_seen: &mut bool,
) -> UnifyResult<VertexId> {
    match expr {
        Expr::FieldReference(label) | Expr::LetReference(label) => find_in_scope_chain(ctx, env, *label)
            .ok_or_else(|| Bottom::eval(format!("undefined field: {}", ctx.interner.feature(*label).label()))),
        Expr::SelectorExpr { base, field } => {
            let base_vertex = resolve_to_vertex(ctx, owner, env, base, close_info, builtins, explicit, ellipsis_seen)?;
            let vertex = ctx.arena.get(base_vertex).unwrap();
            vertex
                .find_arc(*field)
                .map(|a| a.vertex)
                .ok_or_else(|| Bottom::eval(format!("undefined field: {}", ctx.interner.feature(*field).label())))
        }
        _ => {
            let _ = eval_expr(ctx, owner, env, expr, close_info, builtins, explicit, ellipsis_seen)?;
            Err(Bottom::incomplete("selector base must resolve to a reference chain"))
        }
    }
}

/// Find or create the arc `label` under `parent`, tightening its arc type
/// if it already exists (§4.6 `insert_arc`).
fn ensure_child_arc(ctx: &mut Ctx<'_>, parent: VertexId, label: FeatureId, arc_type: ArcType) -> VertexId {
    if let Some(existing_index) = ctx.arena.get(parent).unwrap().arcs.iter().position(|a| a.label == label) {
        let vertex = ctx.arena.get_mut(parent).unwrap();
        let arc = &mut vertex.arcs[existing_index];
        arc.arc_type = arc.arc_type.tighten(arc_type);
        return arc.vertex;
    }
    let child = ctx.arena.insert(Vertex::child(parent, label));
    ctx.arena.get_mut(parent).unwrap().arcs.push(ArcEdge { label, vertex: child, arc_type });
    child
}

fn push_conjunct(ctx: &mut Ctx<'_>, child: VertexId, conjunct: Conjunct) {
    ctx.arena.get_mut(child).unwrap().conjuncts.push(conjunct);
}

fn eval_comprehension(
    ctx: &mut Ctx<'_>,
    owner: VertexId,
    env: EnvId,
    comp: &crate::term::Comprehension,
    close_info: &mut CloseInfo,
    builtins: &dyn BuiltinRegistry,
    explicit: &mut Vec<FeatureId>,
    ellipsis_seen: &mut bool,
) -> UnifyResult<Value> {
    eval_clauses(ctx, owner, env, &comp.clauses, &comp.yield_struct, close_info, builtins, explicit, ellipsis_seen)
}

fn eval_clauses(
    ctx: &mut Ctx<'_>,
    owner: VertexId,
    env: EnvId,
    clauses: &[ComprehensionClause],
    yield_struct: &Expr,
    close_info: &mut CloseInfo,
    builtins: &dyn BuiltinRegistry,
    explicit: &mut Vec<FeatureId>,
    ellipsis_seen: &mut bool,
) -> UnifyResult<Value> {
    let Some((first, rest)) = clauses.split_first() else {
        return eval_expr(ctx, owner, env, yield_struct, close_info, builtins, explicit, ellipsis_seen);
    };
    match first {
        ComprehensionClause::If(cond) => {
            let v = eval_expr(ctx, owner, env, cond, close_info, builtins, explicit, ellipsis_seen)?;
            match value_to_scalar(v, "comprehension condition")? {
                Scalar::Bool(true) => eval_clauses(ctx, owner, env, rest, yield_struct, close_info, builtins, explicit, ellipsis_seen),
                Scalar::Bool(false) => Ok(Value::Top),
                other => Err(Bottom::eval(format!("comprehension condition must be bool, got {other}"))),
            }
        }
        ComprehensionClause::Let { name: _, value } => {
            let _ = eval_expr(ctx, owner, env, value, close_info, builtins, explicit, ellipsis_seen)?;
            eval_clauses(ctx, owner, env, rest, yield_struct, close_info, builtins, explicit, ellipsis_seen)
        }
        ComprehensionClause::For { key: _, value: _, source } => {
            let source_vertex = resolve_to_vertex(ctx, owner, env, source, close_info, builtins, explicit, ellipsis_seen)?;
            let arcs: Vec<VertexId> = ctx.arena.get(source_vertex).unwrap().arcs.iter().map(|a| a.vertex).collect();
            let mut acc = Value::Top;
            for _child in arcs {
                let iteration_env = ctx.envs.push(env, owner);
                let v = eval_clauses(ctx, owner, iteration_env, rest, yield_struct, close_info, builtins, explicit, ellipsis_seen)?;
                acc = meet_values(acc, v)?;
            }
            Ok(acc)
        }
    }
}
