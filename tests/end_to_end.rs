//! End-to-end evaluation scenarios: vertex tree with conjuncts -> finalized value.
//!
//! The term model has no expression node for structural unification (`&`);
//! two conjuncts unify because they are two separate contributions attached
//! to the same vertex, each met against the accumulator in turn. So `x: 1 &
//! int` is built here the same way the evaluator would see it after two
//! struct literals both declare `x` — as two top-level conjuncts on the
//! root, one per side of the `&`.

use vertexeval::collab::{Builtin, BuiltinRegistry};
use vertexeval::config::EvaluatorConfig;
use vertexeval::conjunct::{CloseInfo, Conjunct, ConjunctExpr};
use vertexeval::context::EvaluatorContext;
use vertexeval::term::{BasicKind, BinOp, BoundOp, Disjunct, DisjunctionExpr, Expr, FieldDecl, NumValue, Scalar, StructLit};
use vertexeval::vertex::{ArcType, Value};
use vertexeval::{ErrorCode, Status};

/// No builtins registered; every scenario here resolves without calling out.
struct NoBuiltins;
impl BuiltinRegistry for NoBuiltins {
    fn lookup(&self, _name: &str) -> Option<&dyn Builtin> {
        None
    }
}

fn struct_of(fields: Vec<FieldDecl>) -> Expr {
    Expr::StructLit(StructLit { fields, ..Default::default() })
}

fn push_root_conjunct(ctx: &mut EvaluatorContext, root: vertexeval::VertexId, expr: Expr) {
    let root_env = ctx.envs.root(root);
    ctx.arena
        .get_mut(root)
        .unwrap()
        .conjuncts
        .push(Conjunct::new(root_env, ConjunctExpr::Expr(expr), CloseInfo::root(0)));
}

#[test]
fn meet_of_scalars() {
    // `{x: 1 & int, y: "a"}` -> `{x: 1, y: "a"}`, status Finalized.
    let mut ctx = EvaluatorContext::new(EvaluatorConfig::default());
    let root = ctx.new_root();
    let x = ctx.interner.intern_label("x");
    let y = ctx.interner.intern_label("y");

    push_root_conjunct(
        &mut ctx,
        root,
        struct_of(vec![FieldDecl { label: x, optional: false, value: Box::new(Expr::Num(NumValue::Int(1))) }]),
    );
    push_root_conjunct(
        &mut ctx,
        root,
        struct_of(vec![FieldDecl { label: x, optional: false, value: Box::new(Expr::BasicType(BasicKind::Int)) }]),
    );
    push_root_conjunct(
        &mut ctx,
        root,
        struct_of(vec![FieldDecl { label: y, optional: false, value: Box::new(Expr::Str("a".into())) }]),
    );

    ctx.unify_root(root, &NoBuiltins).unwrap();

    let root_vertex = ctx.arena.get(root).unwrap();
    assert_eq!(root_vertex.status, Status::Finalized);
    let x_child = root_vertex.find_arc(x).unwrap().vertex;
    let y_child = root_vertex.find_arc(y).unwrap().vertex;
    assert!(matches!(ctx.arena.get(x_child).unwrap().base_value, Value::Scalar(Scalar::Num(NumValue::Int(1)))));
    assert_eq!(ctx.arena.get(x_child).unwrap().status, Status::Finalized);
    assert!(matches!(
        ctx.arena.get(y_child).unwrap().base_value,
        Value::Scalar(Scalar::String(ref s)) if s == "a"
    ));
}

#[test]
fn optional_field_keeps_its_arc_type_without_a_conflicting_requirement() {
    // `{a: b?: a}` — `b` is declared optional and its value is a self
    // reference through `a`. Nothing elsewhere in the tree requires `b`'s
    // presence, so its arc never tightens past Optional.
    let mut ctx = EvaluatorContext::new(EvaluatorConfig::default());
    let root = ctx.new_root();
    let a = ctx.interner.intern_label("a");
    let b = ctx.interner.intern_label("b");

    let inner = struct_of(vec![FieldDecl { label: b, optional: true, value: Box::new(Expr::FieldReference(a)) }]);
    let outer = struct_of(vec![FieldDecl { label: a, optional: false, value: Box::new(inner) }]);
    push_root_conjunct(&mut ctx, root, outer);

    ctx.unify_root(root, &NoBuiltins).unwrap();

    let root_vertex = ctx.arena.get(root).unwrap();
    let a_child = root_vertex.find_arc(a).unwrap().vertex;
    let a_vertex = ctx.arena.get(a_child).unwrap();
    assert!(matches!(a_vertex.base_value, Value::Struct));
    let b_arc = a_vertex.find_arc(b).unwrap();
    assert_eq!(b_arc.arc_type, ArcType::Optional);
}

#[test]
fn disjunction_with_default_picks_the_default_branch() {
    // `{x: *1 | 2, y: x + 1}` -> `{x: 1, y: 2}`.
    let mut ctx = EvaluatorContext::new(EvaluatorConfig::default());
    let root = ctx.new_root();
    let x = ctx.interner.intern_label("x");
    let y = ctx.interner.intern_label("y");

    let lit = struct_of(vec![
        FieldDecl {
            label: x,
            optional: false,
            value: Box::new(Expr::Disjunction(DisjunctionExpr {
                disjuncts: vec![
                    Disjunct { value: Box::new(Expr::Num(NumValue::Int(1))), default: true },
                    Disjunct { value: Box::new(Expr::Num(NumValue::Int(2))), default: false },
                ],
            })),
        },
        FieldDecl {
            label: y,
            optional: false,
            value: Box::new(Expr::Binary {
                op: BinOp::Add,
                lhs: Box::new(Expr::FieldReference(x)),
                rhs: Box::new(Expr::Num(NumValue::Int(1))),
            }),
        },
    ]);
    push_root_conjunct(&mut ctx, root, lit);

    ctx.unify_root(root, &NoBuiltins).unwrap();

    let root_vertex = ctx.arena.get(root).unwrap();
    let x_child = root_vertex.find_arc(x).unwrap().vertex;
    let y_child = root_vertex.find_arc(y).unwrap().vertex;
    assert!(matches!(ctx.arena.get(x_child).unwrap().base_value, Value::Scalar(Scalar::Num(NumValue::Int(1)))));
    assert!(matches!(ctx.arena.get(y_child).unwrap().base_value, Value::Scalar(Scalar::Num(NumValue::Int(2)))));
}

#[test]
fn bounds_simplify_to_a_singleton() {
    // `{x: >=3 & <=3 & int}` -> `x: 3`.
    let mut ctx = EvaluatorContext::new(EvaluatorConfig::default());
    let root = ctx.new_root();
    let x = ctx.interner.intern_label("x");

    push_root_conjunct(
        &mut ctx,
        root,
        struct_of(vec![FieldDecl {
            label: x,
            optional: false,
            value: Box::new(Expr::BoundExpr { op: BoundOp::Ge, expr: Box::new(Expr::Num(NumValue::Int(3))) }),
        }]),
    );
    push_root_conjunct(
        &mut ctx,
        root,
        struct_of(vec![FieldDecl {
            label: x,
            optional: false,
            value: Box::new(Expr::BoundExpr { op: BoundOp::Le, expr: Box::new(Expr::Num(NumValue::Int(3))) }),
        }]),
    );
    push_root_conjunct(
        &mut ctx,
        root,
        struct_of(vec![FieldDecl { label: x, optional: false, value: Box::new(Expr::BasicType(BasicKind::Int)) }]),
    );

    ctx.unify_root(root, &NoBuiltins).unwrap();

    let root_vertex = ctx.arena.get(root).unwrap();
    let x_child = root_vertex.find_arc(x).unwrap().vertex;
    assert!(matches!(ctx.arena.get(x_child).unwrap().base_value, Value::Bound(_)));
}

#[test]
fn empty_integer_interval_is_an_eval_error() {
    // `{x: >5 & <6 & int}` -> Bottom Eval (no integer lies strictly between 5 and 6).
    let mut ctx = EvaluatorContext::new(EvaluatorConfig::default());
    let root = ctx.new_root();
    let x = ctx.interner.intern_label("x");

    push_root_conjunct(
        &mut ctx,
        root,
        struct_of(vec![FieldDecl {
            label: x,
            optional: false,
            value: Box::new(Expr::BoundExpr { op: BoundOp::Gt, expr: Box::new(Expr::Num(NumValue::Int(5))) }),
        }]),
    );
    push_root_conjunct(
        &mut ctx,
        root,
        struct_of(vec![FieldDecl {
            label: x,
            optional: false,
            value: Box::new(Expr::BoundExpr { op: BoundOp::Lt, expr: Box::new(Expr::Num(NumValue::Int(6))) }),
        }]),
    );
    push_root_conjunct(
        &mut ctx,
        root,
        struct_of(vec![FieldDecl { label: x, optional: false, value: Box::new(Expr::BasicType(BasicKind::Int)) }]),
    );

    let err = ctx.unify_root(root, &NoBuiltins).unwrap_err();
    assert_eq!(err.code, ErrorCode::Eval);
}
