//! Term Model (§4.1 / Component A)
//!
//! Expressions are algebraic. This module defines the expression tree the
//! compiler hands to the evaluator, plus the scalar arithmetic/comparison
//! and bound-simplification machinery that backs the `&`/`|` lattice
//! operators once operands have reduced to concrete values.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Bottom, UnifyResult};
use crate::feature::FeatureId;

/// A concrete leaf value: what a `BasicType`-typed vertex collapses to once
/// fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Num(NumValue),
    String(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    pub fn kind(&self) -> BasicKind {
        match self {
            Scalar::Null => BasicKind::Null,
            Scalar::Bool(_) => BasicKind::Bool,
            Scalar::Num(NumValue::Int(_)) => BasicKind::Int,
            Scalar::Num(NumValue::Float(_)) => BasicKind::Float,
            Scalar::String(_) => BasicKind::String,
            Scalar::Bytes(_) => BasicKind::Bytes,
        }
    }

    /// Structural equality used by `insert_value_conjunct` to detect
    /// conflicting concrete scalars (§4.6: "concrete scalars must compare
    /// equal to any previously-seen scalar, else report conflict").
    pub fn eq_value(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Num(a), Scalar::Num(b)) => a.eq_value(b),
            _ => self == other,
        }
    }

    pub fn partial_cmp_value(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Num(a), Scalar::Num(b)) => a.partial_cmp(b),
            (Scalar::String(a), Scalar::String(b)) => Some(a.cmp(b)),
            (Scalar::Bytes(a), Scalar::Bytes(b)) => Some(a.cmp(b)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Num(n) => write!(f, "{n}"),
            Scalar::String(s) => write!(f, "{s:?}"),
            Scalar::Bytes(b) => write!(f, "'{}'", hex(b)),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Numbers keep int/float distinct (mirrors the source language's `int`
/// sub-kind of `number`), but compare across the distinction.
#[derive(Debug, Clone, Copy)]
pub enum NumValue {
    Int(i64),
    Float(f64),
}

impl NumValue {
    pub fn as_f64(self) -> f64 {
        match self {
            NumValue::Int(i) => i as f64,
            NumValue::Float(f) => f,
        }
    }

    pub fn eq_value(&self, other: &NumValue) -> bool {
        match (self, other) {
            (NumValue::Int(a), NumValue::Int(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }

    pub fn partial_cmp(&self, other: &NumValue) -> Option<Ordering> {
        match (self, other) {
            (NumValue::Int(a), NumValue::Int(b)) => Some(a.cmp(b)),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, NumValue::Int(_))
    }
}

impl PartialEq for NumValue {
    fn eq(&self, other: &Self) -> bool {
        self.eq_value(other)
    }
}

impl fmt::Display for NumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumValue::Int(i) => write!(f, "{i}"),
            NumValue::Float(x) => write!(f, "{x}"),
        }
    }
}

/// The basic type lattice above concrete scalars: `Top > Number > Int`, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicKind {
    Null,
    Bool,
    Number,
    Int,
    Float,
    String,
    Bytes,
    List,
    Struct,
}

impl BasicKind {
    /// Whether `self` is a sub-kind of (narrower than or equal to) `other`,
    /// used to decide whether two `BasicType` conjuncts narrow to the
    /// tighter one or conflict.
    pub fn is_subkind_of(self, other: BasicKind) -> bool {
        use BasicKind::*;
        if self == other {
            return true;
        }
        matches!((self, other), (Int, Number) | (Float, Number))
    }

    /// The tighter of two basic kinds, or `None` if they are unrelated
    /// (a conflict).
    pub fn meet(self, other: BasicKind) -> Option<BasicKind> {
        if self.is_subkind_of(other) {
            Some(self)
        } else if other.is_subkind_of(self) {
            Some(other)
        } else {
            None
        }
    }
}

impl fmt::Display for BasicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BasicKind::Null => "null",
            BasicKind::Bool => "bool",
            BasicKind::Number => "number",
            BasicKind::Int => "int",
            BasicKind::Float => "float",
            BasicKind::String => "string",
            BasicKind::Bytes => "bytes",
            BasicKind::List => "list",
            BasicKind::Struct => "struct",
        };
        write!(f, "{s}")
    }
}

/// Comparison/bound operators, as lifted by `BoundExpr` (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundOp {
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

impl BoundOp {
    fn is_upper(self) -> bool {
        matches!(self, BoundOp::Lt | BoundOp::Le)
    }
    fn is_lower(self) -> bool {
        matches!(self, BoundOp::Gt | BoundOp::Ge)
    }
    fn is_strict(self) -> bool {
        matches!(self, BoundOp::Lt | BoundOp::Gt)
    }
}

impl fmt::Display for BoundOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BoundOp::Lt => "<",
            BoundOp::Le => "<=",
            BoundOp::Gt => ">",
            BoundOp::Ge => ">=",
            BoundOp::Ne => "!=",
        };
        write!(f, "{s}")
    }
}

/// A single bound conjunct: `op subject`, e.g. `>= 3`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundValue {
    pub op: BoundOp,
    pub subject: Scalar,
}

impl fmt::Display for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.subject)
    }
}

/// The accumulated bound state of a vertex: independent lower/upper bounds
/// plus a deduplicated `!=` exclusion list. This is what
/// `insert_value_conjunct` folds `BoundValue`s into, and what
/// `simplify_bounds` reduces pairwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundSet {
    pub lower: Option<BoundValue>,
    pub upper: Option<BoundValue>,
    pub excluded: Vec<Scalar>,
}

impl BoundSet {
    pub fn is_empty(&self) -> bool {
        self.lower.is_none() && self.upper.is_none() && self.excluded.is_empty()
    }

    /// Insert one more bound conjunct, simplifying against whatever is
    /// already accumulated. Returns `Err` on an empty interval.
    pub fn insert(&mut self, bound: BoundValue) -> UnifyResult<()> {
        match bound.op {
            BoundOp::Ne => {
                if !self.conflicts_with_existing_bounds(&bound.subject) {
                    if !self.excluded.iter().any(|s| s.eq_value(&bound.subject)) {
                        self.excluded.push(bound.subject);
                    }
                }
                // If it lies outside an existing bound it is redundant and
                // dropped per §4.1.
                Ok(())
            }
            BoundOp::Lt | BoundOp::Le => {
                self.upper = Some(match self.upper.take() {
                    Some(existing) => simplify_same_side(existing, bound)?,
                    None => bound,
                });
                self.check_interval()
            }
            BoundOp::Gt | BoundOp::Ge => {
                self.lower = Some(match self.lower.take() {
                    Some(existing) => simplify_same_side(existing, bound)?,
                    None => bound,
                });
                self.check_interval()
            }
        }
    }

    fn conflicts_with_existing_bounds(&self, subject: &Scalar) -> bool {
        let outside_upper = self
            .upper
            .as_ref()
            .and_then(|u| u.subject.partial_cmp_value(subject))
            .map(|ord| match self.upper.as_ref().unwrap().op {
                BoundOp::Lt => ord != Ordering::Greater,
                BoundOp::Le => ord == Ordering::Less,
                _ => false,
            })
            .unwrap_or(false);
        let outside_lower = self
            .lower
            .as_ref()
            .and_then(|l| l.subject.partial_cmp_value(subject))
            .map(|ord| match self.lower.as_ref().unwrap().op {
                BoundOp::Gt => ord != Ordering::Less,
                BoundOp::Ge => ord == Ordering::Greater,
                _ => false,
            })
            .unwrap_or(false);
        outside_upper || outside_lower
    }

    fn check_interval(&self) -> UnifyResult<()> {
        if let (Some(lo), Some(hi)) = (&self.lower, &self.upper) {
            // Only an empty interval is an error here; "not yet a
            // singleton" just means the bound set stays as two bounds.
            simplify_opposite_sides(lo.clone(), hi.clone())?;
        }
        Ok(())
    }

    /// If lower and upper bounds collapse to a single point, return it.
    pub fn as_singleton(&self) -> Option<Scalar> {
        let lo = self.lower.as_ref()?;
        let hi = self.upper.as_ref()?;
        if lo.op == BoundOp::Ge && hi.op == BoundOp::Le && lo.subject.eq_value(&hi.subject) {
            Some(lo.subject.clone())
        } else {
            None
        }
    }
}

/// Collapse two bounds on the same side (`>a & >=b`, or `<a & <=b`):
/// return the strictly tighter one; ties keep the strict form.
fn simplify_same_side(a: BoundValue, b: BoundValue) -> UnifyResult<BoundValue> {
    let cmp = a
        .subject
        .partial_cmp_value(&b.subject)
        .ok_or_else(|| Bottom::eval(format!("cannot compare bounds {a} and {b}")))?;
    let upper = a.op.is_upper();
    let tighter = match cmp {
        Ordering::Equal => {
            if a.op.is_strict() {
                a
            } else {
                b
            }
        }
        Ordering::Less => {
            if upper {
                a
            } else {
                b
            }
        }
        Ordering::Greater => {
            if upper {
                b
            } else {
                a
            }
        }
    };
    Ok(tighter)
}

/// Collapse opposite-side bounds (`>=a & <=b`): integer subjects round `a`
/// up and `b` down; an empty resulting interval is a conflict (`Err`); a
/// singleton returns `Ok(Some(point))`; a valid non-singleton range returns
/// `Ok(None)` and the caller keeps both bounds.
pub fn simplify_opposite_sides(lower: BoundValue, upper: BoundValue) -> UnifyResult<Option<Scalar>> {
    debug_assert!(lower.op.is_lower() && upper.op.is_upper());

    if let (Scalar::Num(NumValue::Int(_)), Scalar::Num(_)) = (&lower.subject, &upper.subject) {
        // Integer subject: round bounds toward the interior.
        let lo = int_round_up(&lower);
        let hi = int_round_down(&upper);
        return match lo.cmp(&hi) {
            Ordering::Greater => Err(Bottom::eval(format!(
                "conflicting bounds: empty interval [{lower}, {upper}]"
            ))),
            Ordering::Equal => Ok(Some(Scalar::Num(NumValue::Int(lo)))),
            Ordering::Less => Ok(None),
        };
    }

    let cmp = lower
        .subject
        .partial_cmp_value(&upper.subject)
        .ok_or_else(|| Bottom::eval(format!("cannot compare bounds {lower} and {upper}")))?;
    match cmp {
        Ordering::Greater => Err(Bottom::eval(format!(
            "conflicting bounds: empty interval [{lower}, {upper}]"
        ))),
        Ordering::Equal => {
            if lower.op == BoundOp::Ge && upper.op == BoundOp::Le {
                Ok(Some(lower.subject))
            } else {
                Err(Bottom::eval(format!(
                    "conflicting bounds: empty interval [{lower}, {upper}]"
                )))
            }
        }
        Ordering::Less => Ok(None),
    }
}

fn int_round_up(lower: &BoundValue) -> i64 {
    match (&lower.op, &lower.subject) {
        (BoundOp::Ge, Scalar::Num(NumValue::Int(i))) => *i,
        (BoundOp::Gt, Scalar::Num(NumValue::Int(i))) => i.saturating_add(1),
        (BoundOp::Ge, Scalar::Num(NumValue::Float(f))) => f.ceil() as i64,
        (BoundOp::Gt, Scalar::Num(NumValue::Float(f))) => (f.floor() as i64).saturating_add(1),
        _ => unreachable!("int_round_up called on non-lower bound"),
    }
}

fn int_round_down(upper: &BoundValue) -> i64 {
    match (&upper.op, &upper.subject) {
        (BoundOp::Le, Scalar::Num(NumValue::Int(i))) => *i,
        (BoundOp::Lt, Scalar::Num(NumValue::Int(i))) => i.saturating_sub(1),
        (BoundOp::Le, Scalar::Num(NumValue::Float(f))) => f.floor() as i64,
        (BoundOp::Lt, Scalar::Num(NumValue::Float(f))) => (f.ceil() as i64).saturating_sub(1),
        _ => unreachable!("int_round_down called on non-upper bound"),
    }
}

/// Arithmetic/comparison operators for `BinaryExpr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Plus,
}

/// Scalar arithmetic and comparison, lifted from the `&`/`|` lattice
/// operators once both operands are concrete (§4.1: "`bin_op(ctx, op, a,
/// b)` ... performs scalar arithmetic and comparison").
pub fn bin_op(op: BinOp, a: &Scalar, b: &Scalar) -> UnifyResult<Scalar> {
    use BinOp::*;
    match op {
        Eq => Ok(Scalar::Bool(a.eq_value(b))),
        Neq => Ok(Scalar::Bool(!a.eq_value(b))),
        Lt | Le | Gt | Ge => {
            let ord = a
                .partial_cmp_value(b)
                .ok_or_else(|| Bottom::eval(format!("cannot compare {a} and {b}")))?;
            let result = match op {
                Lt => ord == Ordering::Less,
                Le => ord != Ordering::Greater,
                Gt => ord == Ordering::Greater,
                Ge => ord != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Scalar::Bool(result))
        }
        And => match (a, b) {
            (Scalar::Bool(x), Scalar::Bool(y)) => Ok(Scalar::Bool(*x && *y)),
            _ => Err(Bottom::eval("'&&' requires bool operands")),
        },
        Or => match (a, b) {
            (Scalar::Bool(x), Scalar::Bool(y)) => Ok(Scalar::Bool(*x || *y)),
            _ => Err(Bottom::eval("'||' requires bool operands")),
        },
        Add => match (a, b) {
            (Scalar::String(x), Scalar::String(y)) => Ok(Scalar::String(format!("{x}{y}"))),
            (Scalar::Bytes(x), Scalar::Bytes(y)) => {
                let mut out = x.clone();
                out.extend_from_slice(y);
                Ok(Scalar::Bytes(out))
            }
            (Scalar::Num(x), Scalar::Num(y)) => num_arith(*x, *y, |a, b| a + b, |a, b| a + b),
            _ => Err(Bottom::eval("'+' requires matching numeric/string/bytes operands")),
        },
        Sub => match (a, b) {
            (Scalar::Num(x), Scalar::Num(y)) => num_arith(*x, *y, |a, b| a - b, |a, b| a - b),
            _ => Err(Bottom::eval("'-' requires numeric operands")),
        },
        Mul => match (a, b) {
            (Scalar::Num(x), Scalar::Num(y)) => num_arith(*x, *y, |a, b| a * b, |a, b| a * b),
            _ => Err(Bottom::eval("'*' requires numeric operands")),
        },
        Div => match (a, b) {
            (Scalar::Num(x), Scalar::Num(y)) => {
                if y.as_f64() == 0.0 {
                    return Err(Bottom::eval("division by zero"));
                }
                Ok(Scalar::Num(NumValue::Float(x.as_f64() / y.as_f64())))
            }
            _ => Err(Bottom::eval("'/' requires numeric operands")),
        },
        Rem => match (a, b) {
            (Scalar::Num(NumValue::Int(x)), Scalar::Num(NumValue::Int(y))) => {
                if *y == 0 {
                    return Err(Bottom::eval("division by zero"));
                }
                Ok(Scalar::Num(NumValue::Int(x % y)))
            }
            _ => Err(Bottom::eval("'%' requires integer operands")),
        },
    }
}

fn num_arith(
    x: NumValue,
    y: NumValue,
    fi: fn(i64, i64) -> i64,
    ff: fn(f64, f64) -> f64,
) -> UnifyResult<Scalar> {
    match (x, y) {
        (NumValue::Int(a), NumValue::Int(b)) => Ok(Scalar::Num(NumValue::Int(fi(a, b)))),
        _ => Ok(Scalar::Num(NumValue::Float(ff(x.as_f64(), y.as_f64())))),
    }
}

// ---------------------------------------------------------------------
// Expression tree
// ---------------------------------------------------------------------

/// A field declaration inside a `StructLit`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub label: FeatureId,
    pub optional: bool,
    pub value: Box<Expr>,
}

/// A pattern constraint `[P]: T`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternConstraintDecl {
    pub pattern: Box<Expr>,
    pub value: Box<Expr>,
}

/// A struct literal: explicit fields, embeddings, pattern constraints, and
/// whether `...` was present (disables closedness for this contribution).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructLit {
    pub fields: Vec<FieldDecl>,
    pub embeddings: Vec<Expr>,
    pub patterns: Vec<PatternConstraintDecl>,
    pub has_ellipsis: bool,
    pub is_def_scope: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListLit {
    pub elements: Vec<Expr>,
    pub tail_ellipsis: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Disjunct {
    pub value: Box<Expr>,
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisjunctionExpr {
    pub disjuncts: Vec<Disjunct>,
}

impl DisjunctionExpr {
    pub fn has_defaults(&self) -> bool {
        self.disjuncts.iter().any(|d| d.default)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComprehensionClause {
    For { key: Option<FeatureId>, value: FeatureId, source: Box<Expr> },
    If(Box<Expr>),
    Let { name: FeatureId, value: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub clauses: Vec<ComprehensionClause>,
    pub yield_struct: Box<Expr>,
}

/// The expression tree consumed by the unifier. This is the evaluator's
/// side of the compiler/evaluator contract (§6): the compiler guarantees
/// references resolve and environment links are correct.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    StructLit(StructLit),
    ListLit(ListLit),
    Null,
    Bool(bool),
    Num(NumValue),
    Str(String),
    Bytes(Vec<u8>),
    Top,
    Bottom(String),
    BasicType(BasicKind),
    BoundExpr { op: BoundOp, expr: Box<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { func: String, args: Vec<Expr> },
    Interpolation(Vec<Expr>),
    FieldReference(FeatureId),
    SelectorExpr { base: Box<Expr>, field: FeatureId },
    IndexExpr { base: Box<Expr>, index: Box<Expr> },
    SliceExpr { base: Box<Expr>, lo: Option<Box<Expr>>, hi: Option<Box<Expr>> },
    LetReference(FeatureId),
    DynamicReference(Box<Expr>),
    LabelReference,
    ImportReference(String),
    Disjunction(DisjunctionExpr),
    Comprehension(Comprehension),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Scalar {
        Scalar::Num(NumValue::Int(n))
    }

    #[test]
    fn same_side_bounds_keep_tighter_and_strict_ties() {
        let a = BoundValue { op: BoundOp::Gt, subject: int(3) };
        let b = BoundValue { op: BoundOp::Ge, subject: int(3) };
        let tighter = simplify_same_side(a, b).unwrap();
        assert_eq!(tighter.op, BoundOp::Gt);
    }

    #[test]
    fn opposite_side_singleton_collapses_to_point() {
        let lo = BoundValue { op: BoundOp::Ge, subject: int(3) };
        let hi = BoundValue { op: BoundOp::Le, subject: int(3) };
        let point = simplify_opposite_sides(lo, hi).unwrap();
        assert_eq!(point, Some(int(3)));
    }

    #[test]
    fn opposite_side_wide_range_is_not_a_singleton() {
        let lo = BoundValue { op: BoundOp::Ge, subject: int(3) };
        let hi = BoundValue { op: BoundOp::Le, subject: int(10) };
        assert_eq!(simplify_opposite_sides(lo, hi).unwrap(), None);
    }

    #[test]
    fn opposite_side_empty_interval_is_conflict() {
        let lo = BoundValue { op: BoundOp::Gt, subject: int(5) };
        let hi = BoundValue { op: BoundOp::Lt, subject: int(6) };
        // >5 & <6 over integers: empty interval.
        let err = simplify_opposite_sides(lo, hi).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Eval);
    }

    #[test]
    fn bound_set_accumulates_and_rejects_redundant_ne() {
        let mut set = BoundSet::default();
        set.insert(BoundValue { op: BoundOp::Ge, subject: int(3) }).unwrap();
        set.insert(BoundValue { op: BoundOp::Le, subject: int(10) }).unwrap();
        set.insert(BoundValue { op: BoundOp::Ne, subject: int(20) }).unwrap();
        assert!(set.excluded.is_empty(), "!=20 outside [3,10] should be dropped");
        set.insert(BoundValue { op: BoundOp::Ne, subject: int(5) }).unwrap();
        assert_eq!(set.excluded, vec![int(5)]);
    }

    #[test]
    fn bin_op_int_add_stays_int() {
        let result = bin_op(BinOp::Add, &int(1), &int(2)).unwrap();
        assert_eq!(result, int(3));
    }

    #[test]
    fn bin_op_mixed_int_float_promotes_to_float() {
        let result = bin_op(BinOp::Add, &int(1), &Scalar::Num(NumValue::Float(0.5))).unwrap();
        assert_eq!(result, Scalar::Num(NumValue::Float(1.5)));
    }

    #[test]
    fn bin_op_division_by_zero_is_eval_error() {
        let err = bin_op(BinOp::Div, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Eval);
    }

    #[test]
    fn basic_kind_meet_narrows_to_subkind() {
        assert_eq!(BasicKind::Int.meet(BasicKind::Number), Some(BasicKind::Int));
        assert_eq!(BasicKind::Int.meet(BasicKind::String), None);
    }
}
