//! Algebraic properties the meet (`&`) lattice operator must hold over any
//! pair/triple of values drawn from a small, pairwise-compatible domain.
//! Values outside that domain (e.g. two distinct concrete scalars) legitimately
//! conflict, so the domain here is restricted to combinations that are
//! always reconcilable — `Top`, `Int`-kinded scalars/types, and a fixed
//! bound — rather than asserting commutativity over arbitrary conflicting
//! inputs.

use proptest::prelude::*;
use vertexeval::term::{BasicKind, BoundOp, BoundSet, BoundValue, NumValue, Scalar};
use vertexeval::unify::meet_values;
use vertexeval::vertex::Value;

fn sample_value(tag: u8) -> Value {
    match tag % 4 {
        0 => Value::Top,
        1 => Value::Scalar(Scalar::Num(NumValue::Int(7))),
        2 => Value::BasicType(BasicKind::Int),
        _ => {
            let mut bounds = BoundSet::default();
            bounds.insert(BoundValue { op: BoundOp::Ge, subject: Scalar::Num(NumValue::Int(0)) }).unwrap();
            Value::Bound(bounds)
        }
    }
}

fn repr(value: &Value) -> String {
    format!("{value:?}")
}

proptest! {
    #[test]
    fn meet_is_commutative(a_tag in 0u8..4, b_tag in 0u8..4) {
        let a = sample_value(a_tag);
        let b = sample_value(b_tag);
        let ab = meet_values(a.clone(), b.clone());
        let ba = meet_values(b, a);
        prop_assert_eq!(ab.is_ok(), ba.is_ok());
        if let (Ok(ab), Ok(ba)) = (ab, ba) {
            prop_assert_eq!(repr(&ab), repr(&ba));
        }
    }

    #[test]
    fn meet_is_associative(a_tag in 0u8..4, b_tag in 0u8..4, c_tag in 0u8..4) {
        let a = sample_value(a_tag);
        let b = sample_value(b_tag);
        let c = sample_value(c_tag);

        let left = meet_values(a.clone(), b.clone()).and_then(|ab| meet_values(ab, c.clone()));
        let right = meet_values(b, c).and_then(|bc| meet_values(a, bc));
        prop_assert_eq!(left.is_ok(), right.is_ok());
        if let (Ok(left), Ok(right)) = (left, right) {
            prop_assert_eq!(repr(&left), repr(&right));
        }
    }

    #[test]
    fn meet_is_idempotent(tag in 0u8..4) {
        let a = sample_value(tag);
        let result = meet_values(a.clone(), a).unwrap();
        prop_assert_eq!(repr(&result), repr(&sample_value(tag)));
    }
}

#[test]
fn top_is_a_two_sided_identity() {
    let scalar = Value::Scalar(Scalar::Bool(true));
    assert!(matches!(meet_values(Value::Top, scalar.clone()).unwrap(), Value::Scalar(Scalar::Bool(true))));
    assert!(matches!(meet_values(scalar, Value::Top).unwrap(), Value::Scalar(Scalar::Bool(true))));
}
