//! # Unification Engine
//!
//! A constraint-solving core for a lattice of partial values: scalars,
//! structs, lists, bounds, and disjunctions meet and join into a single
//! most-specific value per node, or fail with a positioned error.
//!
//! ## Pipeline
//!
//! This crate begins downstream of parsing and term construction — it takes
//! an already-built tree of [`term::Expr`] conjuncts attached to [`vertex::Vertex`]
//! nodes and resolves it to concrete values. Surface syntax, source-to-term
//! compilation, query APIs, builtin/validator implementations, and import
//! resolution all live outside this crate; see [`collab`] for the boundary
//! across which this crate calls into them.
//!
//! ```text
//! Vertex tree + Conjuncts (built upstream)
//!     ↓
//! [EvaluatorContext::unify_root]     → drives evaluation of one vertex and its descendants
//!     ↓
//! [unify::unify_vertex]              → accumulates conjuncts via meet, schedules children
//!     ├── [cycle]                    → classifies self-references as the tree is walked
//!     ├── [disjunction]              → resolves `|` holes to a value or smaller disjunction
//!     ├── [closedness]               → rejects fields not admitted by a closed struct
//!     └── [collab]                   → delegates builtin calls, validators, imports
//!     ↓
//! Vertex.base_value: Value           → the node's resolved lattice value, or a Bottom error
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`arena`] | Generation-checked slot arena (`Id<T>`) backing the vertex and scope graphs |
//! | [`error`] | `Bottom` error type and severity-ordered `ErrorCode` |
//! | [`config`] | Layered resource-limit and logging configuration |
//! | [`feature`] | Field-name interning and label-kind classification |
//! | [`interner`] | Weak-referenced regex compilation cache |
//! | [`term`] | Scalar/bound/expression term types the evaluator consumes |
//! | [`conjunct`] | Conjuncts, cycle-provenance chains, closedness-context |
//! | [`env`] | Lexical scope chain for `let` bindings and comprehension variables |
//! | [`vertex`] | The value-tree node: arcs, base value, status, conjuncts |
//! | [`scheduler`] | Per-node task scheduling and completeness-condition tracking |
//! | [`closedness`] | Def-id allocation and closed-struct typo checking |
//! | [`cycle`] | Structural-cycle and self-reference classification |
//! | [`collab`] | Builtin/validator/import trait boundary |
//! | [`unify`] | The meet-based value accumulator and expression evaluator |
//! | [`disjunction`] | Disjunction branch evaluation, dedup, and collapse |
//! | [`context`] | `EvaluatorContext`: owns one evaluation run's ambient state |

pub mod arena;
pub mod error;
pub mod config;
pub mod feature;
pub mod interner;
pub mod term;
pub mod conjunct;
pub mod env;
pub mod vertex;
pub mod scheduler;
pub mod closedness;
pub mod cycle;
pub mod collab;
pub mod unify;
pub mod disjunction;
pub mod context;

pub use crate::conjunct::{CloseInfo, Conjunct, ConjunctExpr, CycleType, Refs, VertexId};
pub use crate::context::EvaluatorContext;
pub use crate::error::{Bottom, ErrorCode, Position, UnifyResult};
pub use crate::vertex::{ArcType, Status, Value, Vertex};
