//! Disjunction (§4.7)
//!
//! Each branch of a `|` expression is evaluated independently against an
//! overlay of the surrounding conjuncts. A branch that errors is dropped,
//! not propagated — only when every branch errors does the disjunction
//! itself fail. If any branch is marked default (`*x`), the result
//! collapses to the defaults; otherwise all surviving branches remain,
//! deduplicated by value.

use crate::conjunct::VertexId;
use crate::error::Bottom;
use crate::vertex::Value;

/// One evaluated `|` branch, tagged with its origin hole for cross-product
/// recombination and whether it was marked `*default`. `overlay_vertex` is
/// the disposable clone the branch was evaluated against (§4.7); only the
/// winning branch's overlay ever gets adopted onto the real vertex.
#[derive(Debug, Clone)]
pub struct DisjunctBranch {
    pub hole_id: u32,
    pub is_default: bool,
    pub outcome: Result<Value, Bottom>,
    pub overlay_vertex: Option<VertexId>,
}

impl DisjunctBranch {
    pub fn ok(hole_id: u32, is_default: bool, value: Value, overlay_vertex: Option<VertexId>) -> Self {
        DisjunctBranch { hole_id, is_default, outcome: Ok(value), overlay_vertex }
    }

    pub fn errored(hole_id: u32, is_default: bool, err: Bottom, overlay_vertex: Option<VertexId>) -> Self {
        DisjunctBranch { hole_id, is_default, outcome: Err(err), overlay_vertex }
    }
}

/// Two values are equivalent for deduplication purposes if they are
/// structurally identical scalars/types, or the same non-scalar kind
/// (structs/lists are only deduplicated once concrete, which is outside
/// this module's scope; treated as distinct here rather than silently
/// merging non-equal structures).
fn value_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Scalar(x), Value::Scalar(y)) => x.eq_value(y),
        (Value::Top, Value::Top) | (Value::Struct, Value::Struct) | (Value::List, Value::List) => true,
        (Value::BasicType(x), Value::BasicType(y)) => x == y,
        _ => false,
    }
}

fn dedupe(values: Vec<(Value, Option<VertexId>)>) -> Vec<(Value, Option<VertexId>)> {
    let mut out: Vec<(Value, Option<VertexId>)> = Vec::new();
    for (value, overlay) in values {
        if !out.iter().any(|(existing, _)| value_equivalent(existing, &value)) {
            out.push((value, overlay));
        }
    }
    out
}

/// Resolve a disjunction's evaluated branches to its final value (§4.7
/// "evaluate, classify default/non-default, dedupe, collapse").
///
/// Evaluation order: drop errored branches; if any default survives, keep
/// only defaults; dedupe what remains; collapse to a bare value if exactly
/// one remains, otherwise keep it as a (smaller) disjunction. The second
/// element of the returned tuple is the winning branch's overlay vertex,
/// `Some` only when exactly one branch survived unambiguously — an
/// undecided multi-value result adopts no branch's structure.
pub fn resolve(branches: Vec<DisjunctBranch>) -> Result<(Value, Option<VertexId>), Bottom> {
    let mut surviving: Vec<(bool, Value, Option<VertexId>)> = Vec::new();
    let mut last_err: Option<Bottom> = None;
    for branch in branches {
        match branch.outcome {
            Ok(value) => surviving.push((branch.is_default, value, branch.overlay_vertex)),
            Err(e) => last_err = Some(last_err.map_or_else(|| e.clone(), |prev| prev.merge(e))),
        }
    }

    if surviving.is_empty() {
        return Err(last_err.unwrap_or_else(|| Bottom::eval("no disjunct satisfies its constraints")));
    }

    let any_default = surviving.iter().any(|(is_default, _, _)| *is_default);
    let chosen: Vec<(Value, Option<VertexId>)> = if any_default {
        surviving.into_iter().filter(|(is_default, _, _)| *is_default).map(|(_, v, o)| (v, o)).collect()
    } else {
        surviving.into_iter().map(|(_, v, o)| (v, o)).collect()
    };

    let deduped = dedupe(chosen);
    if deduped.len() == 1 {
        let (value, overlay) = deduped.into_iter().next().unwrap();
        Ok((value, overlay))
    } else {
        let values = deduped.into_iter().map(|(v, _)| v).collect::<Vec<_>>();
        let num_defaults = if any_default { values.len() } else { 0 };
        Ok((Value::Disjunction { num_defaults, values }, None))
    }
}

/// Combine multiple independent disjunction holes in the same struct into
/// their cross product: one branch set per combination, carrying forward
/// each hole's originating `hole_id` so callers can tell which holes a
/// combination picked (§4.7 "cross-product with hole_id").
pub fn cross_product(holes: Vec<Vec<DisjunctBranch>>) -> Vec<Vec<DisjunctBranch>> {
    holes.into_iter().fold(vec![Vec::new()], |acc, hole_branches| {
        let mut combined = Vec::with_capacity(acc.len() * hole_branches.len());
        for prefix in &acc {
            for branch in &hole_branches {
                let mut next = prefix.clone();
                next.push(branch.clone());
                combined.push(next);
            }
        }
        combined
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{NumValue, Scalar};

    fn int(n: i64) -> Scalar {
        Scalar::Num(NumValue::Int(n))
    }

    #[test]
    fn single_default_wins_over_non_defaults() {
        let branches = vec![
            DisjunctBranch::ok(0, true, Value::Scalar(int(1)), None),
            DisjunctBranch::ok(0, false, Value::Scalar(int(2)), None),
        ];
        let (result, _) = resolve(branches).unwrap();
        assert!(matches!(result, Value::Scalar(s) if s == int(1)));
    }

    #[test]
    fn no_defaults_keeps_all_surviving_branches() {
        let branches = vec![
            DisjunctBranch::ok(0, false, Value::Scalar(int(1)), None),
            DisjunctBranch::ok(0, false, Value::Scalar(int(2)), None),
        ];
        let (result, _) = resolve(branches).unwrap();
        match result {
            Value::Disjunction { values, num_defaults } => {
                assert_eq!(values.len(), 2);
                assert_eq!(num_defaults, 0);
            }
            _ => panic!("expected an undecided disjunction"),
        }
    }

    #[test]
    fn errored_branch_is_dropped_not_propagated() {
        let branches = vec![
            DisjunctBranch::errored(0, false, Bottom::eval("conflict"), None),
            DisjunctBranch::ok(0, false, Value::Scalar(int(3)), None),
        ];
        let (result, _) = resolve(branches).unwrap();
        assert!(matches!(result, Value::Scalar(s) if s == int(3)));
    }

    #[test]
    fn all_branches_erroring_fails_the_disjunction() {
        let branches = vec![
            DisjunctBranch::errored(0, false, Bottom::eval("a"), None),
            DisjunctBranch::errored(0, false, Bottom::eval("b"), None),
        ];
        assert!(resolve(branches).is_err());
    }

    #[test]
    fn duplicate_values_are_deduplicated() {
        let branches = vec![
            DisjunctBranch::ok(0, false, Value::Scalar(int(1)), None),
            DisjunctBranch::ok(0, false, Value::Scalar(int(1)), None),
        ];
        let (result, _) = resolve(branches).unwrap();
        assert!(matches!(result, Value::Scalar(s) if s == int(1)));
    }

    #[test]
    fn cross_product_multiplies_independent_holes() {
        let hole_a = vec![
            DisjunctBranch::ok(0, false, Value::Scalar(int(1)), None),
            DisjunctBranch::ok(0, false, Value::Scalar(int(2)), None),
        ];
        let hole_b = vec![DisjunctBranch::ok(1, false, Value::Scalar(int(10)), None)];
        let combos = cross_product(vec![hole_a, hole_b]);
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0].len(), 2);
    }
}
