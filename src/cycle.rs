//! Cycle Detection (§4.4)
//!
//! Three kinds of self-reference are distinguished:
//!
//! - an **ancestor cycle**: a reference resolves to one of its own
//!   evaluating ancestors in the vertex tree;
//! - a **reference cycle**: a reference's resolution path revisits an arc
//!   already in its `refs` chain (§3.5);
//! - a **structural cycle**: every conjunct contributed to a node reduces to
//!   a cyclic reference, so the node can never acquire a concrete value no
//!   matter how evaluation proceeds (§7 `StructuralCycle`).
//!
//! A cycle that passes through an optional arc is not fatal on its own —
//! `[X=string]: { next?: X }` is satisfiable by never instantiating `next`.
//! Classification therefore tracks whether an optional arc was crossed, and
//! revisits that classification if the arc later tightens to required.

use crate::arena::Arena;
use crate::conjunct::{CycleType, Refs, VertexId};
use crate::error::Bottom;
use crate::vertex::Vertex;

/// Walk `source`'s parent chain looking for `target` (an ancestor cycle).
pub fn is_ancestor(arena: &Arena<Vertex>, source: VertexId, target: VertexId) -> bool {
    let mut current = source;
    loop {
        if current == target {
            return true;
        }
        match arena.get(current).and_then(|v| v.parent) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// Classify a reference resolving to `target` given the `refs` chain
/// accumulated so far on the conjunct performing the resolution, and
/// whether the path from the referring conjunct to `target` crossed an
/// optional arc.
pub fn classify_reference(refs: &Refs, target: VertexId, traversed_optional: bool) -> CycleType {
    if !refs.contains_target(target) {
        return CycleType::NoCycle;
    }
    if traversed_optional {
        CycleType::IsOptional
    } else {
        CycleType::IsCyclic
    }
}

/// Re-evaluate a prior `IsOptional` classification after the optional arc it
/// depended on tightens to `Required`/`Member` without the cycle resolving.
/// Needs one extra scheduler round since the node's completeness condition
/// may already have fired under the weaker classification.
pub fn promote_after_arc_tightened(previous: CycleType, arc_now_required: bool) -> CycleType {
    if previous == CycleType::IsOptional && arc_now_required {
        CycleType::MaybeCyclic
    } else {
        previous
    }
}

/// Four-step detection procedure run when scheduling a conjunct's
/// reference expression (§4.4):
///
/// 1. direct self-reference (`target == source`);
/// 2. ancestor cycle (`target` is an ancestor of `source` in the tree);
/// 3. reference-chain cycle (`target` already occurs in `refs`);
/// 4. otherwise no cycle — extend `refs` with the new entry at the caller.
pub fn detect(
    arena: &Arena<Vertex>,
    refs: &Refs,
    source: VertexId,
    target: VertexId,
    traversed_optional: bool,
) -> CycleType {
    if source == target {
        return if traversed_optional { CycleType::IsOptional } else { CycleType::IsCyclic };
    }
    if is_ancestor(arena, source, target) {
        return if traversed_optional { CycleType::IsOptional } else { CycleType::IsCyclic };
    }
    classify_reference(refs, target, traversed_optional)
}

/// A node is structurally cyclic once it has at least one conjunct and
/// every surviving conjunct's cycle classification is `IsCyclic`: no matter
/// how much more scheduling runs, nothing on this node can resolve to a
/// concrete value.
pub fn structural_cycle_check(vertex: &Vertex) -> Option<Bottom> {
    if vertex.conjuncts.is_empty() {
        return None;
    }
    let all_cyclic = vertex
        .conjuncts
        .iter()
        .all(|c| c.close_info.cycle_type == CycleType::IsCyclic);
    if all_cyclic {
        Some(Bottom::structural_cycle(
            "cycle detected: every conjunct contributing to this value resolves back to it",
        ))
    } else {
        None
    }
}
