//! Conjuncts, Close-Info and Environments (§3.3-3.5)

use std::rc::Rc;

use crate::arena::Id;
use crate::env::EnvId;
use crate::term::Expr;
use crate::vertex::Vertex;

pub type VertexId = Id<Vertex>;

/// Monotone cycle classification carried per-conjunct (§3.5, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CycleType {
    NoCycle,
    IsOptional,
    MaybeCyclic,
    IsCyclic,
}

impl CycleType {
    /// Whether `self` may advance to `next` (monotone descent, §3.5).
    pub fn can_advance_to(self, next: CycleType) -> bool {
        next >= self
    }
}

/// One entry in a `refs` chain: a reference that was resolved while
/// producing the conjunct it is attached to.
#[derive(Debug, Clone, PartialEq)]
pub struct RefEntry {
    pub target_arc: VertexId,
    pub source_node: VertexId,
    pub depth: u32,
}

/// Persistent singly-linked list of visited references (§3.5, §9: "copy on
/// extend; share tails across conjuncts").
#[derive(Debug, Clone, Default)]
pub struct Refs(Option<Rc<RefsNode>>);

#[derive(Debug)]
struct RefsNode {
    entry: RefEntry,
    tail: Refs,
}

impl Refs {
    pub fn empty() -> Self {
        Refs(None)
    }

    pub fn prepend(&self, entry: RefEntry) -> Refs {
        Refs(Some(Rc::new(RefsNode { entry, tail: self.clone() })))
    }

    pub fn contains_target(&self, target: VertexId) -> bool {
        self.iter().any(|e| e.target_arc == target)
    }

    pub fn iter(&self) -> RefsIter<'_> {
        RefsIter(self.0.as_deref())
    }
}

pub struct RefsIter<'a>(Option<&'a RefsNode>);

impl<'a> Iterator for RefsIter<'a> {
    type Item = &'a RefEntry;
    fn next(&mut self) -> Option<Self::Item> {
        let node = self.0?;
        self.0 = node.tail.0.as_deref();
        Some(&node.entry)
    }
}

/// Per-conjunct provenance and cycle state (§3.5).
#[derive(Debug, Clone)]
pub struct CloseInfo {
    pub cycle_type: CycleType,
    pub is_cyclic: bool,
    pub refs: Refs,
    pub def_id: u32,
    pub outer_id: u32,
    pub enclosing_embed: Option<u32>,
    pub top_def: Option<u32>,
    pub from_def: bool,
    pub from_embed: bool,
    pub inline: bool,
}

impl CloseInfo {
    pub fn root(def_id: u32) -> Self {
        CloseInfo {
            cycle_type: CycleType::NoCycle,
            is_cyclic: false,
            refs: Refs::empty(),
            def_id,
            outer_id: def_id,
            enclosing_embed: None,
            top_def: None,
            from_def: false,
            from_embed: false,
            inline: false,
        }
    }

    /// Advance the cycle type, enforcing monotonicity (§3.5).
    pub fn advance_cycle(&mut self, next: CycleType) {
        debug_assert!(self.cycle_type.can_advance_to(next), "cycle_type must not regress");
        if next > self.cycle_type {
            self.cycle_type = next;
        }
    }

    pub fn child_for_def(&self, def_id: u32) -> CloseInfo {
        let mut child = self.clone();
        child.outer_id = self.def_id;
        child.def_id = def_id;
        child.from_def = true;
        child
    }

    pub fn child_for_embed(&self) -> CloseInfo {
        let mut child = self.clone();
        child.enclosing_embed = Some(self.def_id);
        child.from_embed = true;
        child
    }
}

/// One contribution to a vertex's value (§3.3). The value of a vertex is
/// the meet of all its conjuncts.
#[derive(Debug, Clone)]
pub enum ConjunctExpr {
    /// A raw expression to evaluate in `env`.
    Expr(Expr),
    /// A fully evaluated vertex being adopted wholesale (structure sharing
    /// candidate, or a resolved reference).
    Vertex(VertexId),
    /// A nested group reflecting original embedding/definition nesting,
    /// used for closedness (§3.2: "`conjuncts`... may be nested via
    /// ConjunctGroup").
    Group(Vec<Conjunct>),
}

#[derive(Debug, Clone)]
pub struct Conjunct {
    pub env: EnvId,
    pub expr: ConjunctExpr,
    pub close_info: CloseInfo,
}

impl Conjunct {
    pub fn new(env: EnvId, expr: ConjunctExpr, close_info: CloseInfo) -> Self {
        Conjunct { env, expr, close_info }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vid(n: u32) -> VertexId {
        // Tests only need distinct Ids; built via an Arena in vertex tests.
        // Here we construct through a throwaway arena to get real Ids.
        let mut arena: crate::arena::Arena<Vertex> = crate::arena::Arena::new();
        let mut last = arena.insert(Vertex::new_unset(None, 0));
        for _ in 0..n {
            last = arena.insert(Vertex::new_unset(None, 0));
        }
        last
    }

    #[test]
    fn refs_chain_prepend_preserves_tail() {
        let refs = Refs::empty();
        let a = RefEntry { target_arc: vid(0), source_node: vid(1), depth: 0 };
        let b = RefEntry { target_arc: vid(2), source_node: vid(3), depth: 1 };
        let refs = refs.prepend(a.clone());
        let refs2 = refs.prepend(b.clone());
        let collected: Vec<_> = refs2.iter().cloned().collect();
        assert_eq!(collected, vec![b, a]);
    }

    #[test]
    fn refs_contains_target_detects_reoccurrence() {
        let target = vid(5);
        let refs = Refs::empty().prepend(RefEntry { target_arc: target, source_node: vid(0), depth: 0 });
        assert!(refs.contains_target(target));
        assert!(!refs.contains_target(vid(9)));
    }

    #[test]
    fn cycle_type_monotonicity() {
        let mut info = CloseInfo::root(0);
        info.advance_cycle(CycleType::IsOptional);
        assert_eq!(info.cycle_type, CycleType::IsOptional);
        info.advance_cycle(CycleType::MaybeCyclic);
        assert_eq!(info.cycle_type, CycleType::MaybeCyclic);
    }

    #[test]
    #[should_panic(expected = "must not regress")]
    fn cycle_type_regression_panics_in_debug() {
        let mut info = CloseInfo::root(0);
        info.advance_cycle(CycleType::IsCyclic);
        info.advance_cycle(CycleType::NoCycle);
    }
}
