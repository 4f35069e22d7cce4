//! Vertex: a node in the value tree (§3.2)

use std::sync::Arc as StdArc;

use regex::Regex;

use crate::conjunct::{Conjunct, VertexId};
use crate::error::Bottom;
use crate::feature::{Feature, FeatureId};
use crate::scheduler::NodeContextId;
use crate::term::{BasicKind, BoundSet, Scalar, StructLit};

/// How firmly an arc is attached to its parent's struct. Tightens toward
/// `Member`, or widens to `NotPresent` (only ever from `Pending`) (§3.2,
/// §9: invariant list, "Monotonicity of `arc_type`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArcType {
    Pending,
    Required,
    Optional,
    Member,
    NotPresent,
}

impl ArcType {
    fn rank(self) -> u8 {
        match self {
            ArcType::Pending => 0,
            ArcType::Required => 1,
            ArcType::Optional => 2,
            ArcType::Member => 3,
            ArcType::NotPresent => 4,
        }
    }

    /// Combine two arc-type observations for the same arc, tightening
    /// toward `Member`. Panics if the transition would violate
    /// monotonicity (a `Member` regressing, or `NotPresent` arising from
    /// anything but `Pending`).
    pub fn tighten(self, other: ArcType) -> ArcType {
        if self == other {
            return self;
        }
        if other == ArcType::NotPresent {
            assert!(
                self == ArcType::Pending || self == ArcType::NotPresent,
                "only a Pending arc may be demoted to NotPresent, got {self:?}"
            );
            return ArcType::NotPresent;
        }
        if self == ArcType::NotPresent {
            assert!(
                other == ArcType::Pending,
                "NotPresent arc cannot be reopened except by a Pending observation"
            );
            return self;
        }
        assert!(
            !(self == ArcType::Member && other.rank() < ArcType::Member.rank()),
            "Member arc must not regress to {other:?}"
        );
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// Evaluation progress of a vertex. Monotone except that a regression from
/// `Evaluating` back to `Unprocessed` panics (§3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Unprocessed,
    Evaluating,
    Partial,
    Conjuncts,
    Finalized,
}

impl Status {
    pub fn advance_to(&mut self, next: Status) {
        assert!(
            !(*self >= Status::Evaluating && next == Status::Unprocessed),
            "status must not regress from Evaluating to Unprocessed"
        );
        if next > *self {
            *self = next;
        }
    }
}

/// A validator call pending evaluation against the node's committed value
/// (§3.2 `base_value` variant `Validator`, §6 "Builtins/validators").
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorCall {
    pub name: String,
    pub args: Vec<Value>,
    /// Bitmask over `BasicKind` the validator advertises for its first
    /// argument, used by the unifier to pre-check concreteness (§6).
    pub kind_mask: u32,
}

/// The current best-known value of a vertex (§3.2 `base_value`).
#[derive(Debug, Clone)]
pub enum Value {
    Unset,
    /// Sentinel installed while a node is mid-evaluation, enabling
    /// self-reference/cycle detection (§4.6 step 3).
    CyclePlaceholder,
    Struct,
    List,
    Scalar(Scalar),
    Top,
    BasicType(BasicKind),
    Bound(BoundSet),
    Validator(ValidatorCall),
    Disjunction { values: Vec<Value>, num_defaults: usize },
    Conjunction(Vec<Value>),
    /// Structure sharing: this vertex's value is wholly `w`'s (§4.6.1).
    SharedRef(VertexId),
    Bottom(Bottom),
}

impl Value {
    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Value::Bottom(_))
    }

    pub fn as_bottom(&self) -> Option<&Bottom> {
        match self {
            Value::Bottom(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_concrete_scalar(&self) -> bool {
        matches!(self, Value::Scalar(_))
    }
}

/// A matcher for a pattern constraint's label pattern `[P]: T` (§3.2,
/// §4.3).
#[derive(Debug, Clone)]
pub enum PatternPredicate {
    Regex(StdArc<Regex>),
    Exact(FeatureId),
    AnyString,
    AnyInt,
}

impl PatternPredicate {
    pub fn accepts(&self, feature: &Feature) -> bool {
        match self {
            PatternPredicate::Regex(re) => feature.is_string() && re.is_match(&feature.label()),
            PatternPredicate::Exact(id) => feature.id == *id,
            PatternPredicate::AnyString => feature.is_string(),
            PatternPredicate::AnyInt => feature.is_int(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatternConstraint {
    pub predicate: PatternPredicate,
    pub constraint: VertexId,
}

/// A labeled edge to a child vertex (§Glossary "Arc").
#[derive(Debug, Clone)]
pub struct ArcEdge {
    pub label: FeatureId,
    pub vertex: VertexId,
    pub arc_type: ArcType,
}

/// A node in the value tree (§3.2).
#[derive(Debug, Clone)]
pub struct Vertex {
    pub parent: Option<VertexId>,
    pub label: Option<FeatureId>,
    pub arc_type: ArcType,
    pub base_value: Value,
    pub arcs: Vec<ArcEdge>,
    pub conjuncts: Vec<Conjunct>,
    pub structs: Vec<StructLit>,
    pub pattern_constraints: Vec<PatternConstraint>,

    pub closed_recursive: bool,
    pub closed_nonrecursive: bool,
    pub has_ellipsis: bool,
    pub is_disjunct: bool,
    pub is_shared: bool,
    pub is_dynamic: bool,
    pub non_rooted: bool,
    pub is_pattern_constraint: bool,

    pub status: Status,
    pub state: Option<NodeContextId>,

    /// Child arcs' terminal errors, chained for promotion to this vertex's
    /// own value when it has no overriding terminal error (§7).
    pub child_errors: Option<Bottom>,
}

impl Vertex {
    pub fn new_unset(parent: Option<VertexId>, label: u32) -> Self {
        Vertex {
            parent,
            label: if label == 0 { None } else { Some(FeatureId(label)) },
            arc_type: ArcType::Member,
            base_value: Value::Unset,
            arcs: Vec::new(),
            conjuncts: Vec::new(),
            structs: Vec::new(),
            pattern_constraints: Vec::new(),
            closed_recursive: false,
            closed_nonrecursive: false,
            has_ellipsis: false,
            is_disjunct: false,
            is_shared: false,
            is_dynamic: false,
            non_rooted: false,
            is_pattern_constraint: false,
            status: Status::Unprocessed,
            state: None,
            child_errors: None,
        }
    }

    pub fn root() -> Self {
        Self::new_unset(None, 0)
    }

    pub fn child(parent: VertexId, label: FeatureId) -> Self {
        Vertex {
            parent: Some(parent),
            label: Some(label),
            ..Self::new_unset(None, 0)
        }
    }

    pub fn find_arc(&self, label: FeatureId) -> Option<&ArcEdge> {
        self.arcs.iter().find(|a| a.label == label)
    }

    pub fn find_arc_mut(&mut self, label: FeatureId) -> Option<&mut ArcEdge> {
        self.arcs.iter_mut().find(|a| a.label == label)
    }

    /// Whether this node, if closed, accepts `feature` as a defined label:
    /// explicitly listed by some contributing struct, or matched by a
    /// recorded pattern (§4.3). Does not itself decide closedness.
    pub fn accepts_label(&self, feature: &Feature, explicit: &[FeatureId]) -> bool {
        explicit.contains(&feature.id)
            || self.pattern_constraints.iter().any(|p| p.predicate.accepts(feature))
    }

    pub fn is_recursively_closed(&self) -> bool {
        self.closed_recursive && !self.has_ellipsis
    }
}
