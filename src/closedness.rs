//! Closedness and the Typo Check (§4.3)
//!
//! A struct closed by a definition or an enclosing closed struct rejects any
//! regular field that no contributing struct literal named and no pattern
//! constraint matches — the "typo check". An ellipsis (`...`) in any
//! contributing struct literal reopens the node regardless of how many
//! closed conjuncts it has.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Bottom, UnifyResult};
use crate::feature::{Feature, FeatureId, FeatureInterner};
use crate::vertex::{ArcType, Vertex};

/// Allocates fresh definition-scope identifiers, one per `#Def { ... }` or
/// closed embedding encountered while building conjuncts (§3.5 `CloseInfo`).
/// Id `0` is reserved for the document root (`CloseInfo::root(0)`).
#[derive(Debug, Default)]
pub struct DefIdAllocator {
    next: AtomicU32,
}

impl DefIdAllocator {
    pub fn new() -> Self {
        DefIdAllocator { next: AtomicU32::new(1) }
    }

    pub fn alloc(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Whether a vertex is closed at this level: either explicitly closed
/// (by a definition reference or embedding) or recursively closed from an
/// ancestor, and not reopened by an ellipsis among its own contributing
/// struct literals.
pub fn effectively_closed(vertex: &Vertex) -> bool {
    (vertex.closed_recursive || vertex.closed_nonrecursive) && !vertex.has_ellipsis
}

/// Run the typo check for one vertex: every `Member` arc with a regular or
/// definition/hidden string label must be named by some contributing struct
/// literal's explicit field list, or matched by one of the vertex's pattern
/// constraints. Integer (list) labels are exempt; `let` labels never reach
/// here since they are not arcs.
///
/// `explicit` is the union of field labels named by the struct literals that
/// contributed a conjunct to this vertex (computed by the unifier while
/// accumulating conjuncts, §4.6).
pub fn check_typos(
    vertex: &Vertex,
    explicit: &[FeatureId],
    interner: &FeatureInterner,
) -> UnifyResult<()> {
    if !effectively_closed(vertex) {
        return Ok(());
    }
    for arc in &vertex.arcs {
        if arc.arc_type == ArcType::NotPresent {
            continue;
        }
        let feature: Feature = interner.feature(arc.label);
        if !feature.is_string() {
            continue;
        }
        if !vertex.accepts_label(&feature, explicit) {
            return Err(Bottom::eval(format!(
                "field not allowed: {} is not defined by the enclosing closed struct",
                feature.label()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::vertex::{ArcEdge, PatternConstraint, PatternPredicate};

    fn sample_closed_vertex(interner: &FeatureInterner, explicit: &[&str]) -> (Vertex, Vec<FeatureId>) {
        let mut vertex = Vertex::new_unset(None, 0);
        vertex.closed_recursive = true;
        let labels: Vec<FeatureId> = explicit.iter().map(|s| interner.intern_label(s)).collect();
        (vertex, labels)
    }

    #[test]
    fn def_ids_allocate_sequentially_from_one() {
        let alloc = DefIdAllocator::new();
        assert_eq!(alloc.alloc(), 1);
        assert_eq!(alloc.alloc(), 2);
    }

    #[test]
    fn open_struct_always_passes() {
        let interner = FeatureInterner::new();
        let mut vertex = Vertex::new_unset(None, 0);
        let label = interner.intern_label("oops");
        vertex.arcs.push(ArcEdge { label, vertex: dummy_arena_id(), arc_type: ArcType::Member });
        assert!(check_typos(&vertex, &[], &interner).is_ok());
    }

    #[test]
    fn closed_struct_rejects_undeclared_field() {
        let interner = FeatureInterner::new();
        let (mut vertex, explicit) = sample_closed_vertex(&interner, &["name"]);
        let extra = interner.intern_label("typo");
        vertex.arcs.push(ArcEdge { label: extra, vertex: dummy_arena_id(), arc_type: ArcType::Member });
        let result = check_typos(&vertex, &explicit, &interner);
        assert!(result.is_err());
    }

    #[test]
    fn closed_struct_accepts_declared_field() {
        let interner = FeatureInterner::new();
        let (mut vertex, explicit) = sample_closed_vertex(&interner, &["name"]);
        vertex.arcs.push(ArcEdge { label: explicit[0], vertex: dummy_arena_id(), arc_type: ArcType::Member });
        assert!(check_typos(&vertex, &explicit, &interner).is_ok());
    }

    #[test]
    fn pattern_constraint_admits_matching_label() {
        let interner = FeatureInterner::new();
        let (mut vertex, explicit) = sample_closed_vertex(&interner, &[]);
        vertex.pattern_constraints.push(PatternConstraint {
            predicate: PatternPredicate::AnyString,
            constraint: dummy_arena_id(),
        });
        let label = interner.intern_label("anything");
        vertex.arcs.push(ArcEdge { label, vertex: dummy_arena_id(), arc_type: ArcType::Member });
        assert!(check_typos(&vertex, &explicit, &interner).is_ok());
    }

    #[test]
    fn ellipsis_reopens_a_closed_struct() {
        let interner = FeatureInterner::new();
        let (mut vertex, explicit) = sample_closed_vertex(&interner, &["name"]);
        vertex.has_ellipsis = true;
        let extra = interner.intern_label("anything_goes");
        vertex.arcs.push(ArcEdge { label: extra, vertex: dummy_arena_id(), arc_type: ArcType::Member });
        assert!(check_typos(&vertex, &explicit, &interner).is_ok());
    }

    #[test]
    fn not_present_arcs_are_exempt_from_the_check() {
        let interner = FeatureInterner::new();
        let (mut vertex, explicit) = sample_closed_vertex(&interner, &[]);
        let extra = interner.intern_label("was_optional_and_dropped");
        vertex.arcs.push(ArcEdge { label: extra, vertex: dummy_arena_id(), arc_type: ArcType::NotPresent });
        assert!(check_typos(&vertex, &explicit, &interner).is_ok());
    }

    fn dummy_arena_id() -> crate::conjunct::VertexId {
        let mut arena: Arena<Vertex> = Arena::new();
        arena.insert(Vertex::new_unset(None, 0))
    }
}
