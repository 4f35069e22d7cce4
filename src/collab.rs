//! Collaborator Boundary (§6)
//!
//! The unifier resolves builtin calls, validator constraints, and imports by
//! delegating across a narrow trait boundary rather than owning their
//! implementations — the builtin library, the validator catalog, and import
//! resolution are a separate concern from unification proper. Callers supply
//! a `Collaborators` bundle; the core never constructs one itself.

use crate::error::UnifyResult;
use crate::term::Expr;
use crate::vertex::{Value, ValidatorCall};

/// A callable builtin function, e.g. `len`, `strings.ToUpper`.
pub trait Builtin: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, args: &[Value]) -> UnifyResult<Value>;
}

/// A validator constraint installed as a vertex's `base_value` (§3.2
/// `Value::Validator`), checked once the vertex's value is otherwise
/// concrete.
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;
    fn validate(&self, call: &ValidatorCall, subject: &Value) -> UnifyResult<()>;
}

/// Resolves an import path to the expression tree it denotes.
pub trait ImportLoader: Send + Sync {
    fn load(&self, path: &str) -> UnifyResult<Expr>;
}

/// The bundle of collaborators a unification run is given. Held by
/// reference for the duration of one `unify` call; nothing here is part of
/// the persistent evaluator state.
pub struct Collaborators<'a> {
    pub builtins: &'a dyn BuiltinRegistry,
    pub validators: &'a dyn ValidatorRegistry,
    pub imports: &'a dyn ImportLoader,
}

pub trait BuiltinRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<&dyn Builtin>;
}

pub trait ValidatorRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<&dyn Validator>;
}
