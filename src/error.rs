//! Error Handling
//!
//! `Bottom` is the terminal/non-terminal failure value that flows through
//! the unifier exactly as a concrete value would (§7 of the design spec).
//! Every component-local error enum implements `From` into `ErrorCode` so
//! that a `Bottom` can be built from whichever layer first observed the
//! failure.

use std::fmt;
use thiserror::Error;

/// Severity-ordered error classification.
///
/// Ordering (least to most severe) matches the combination rule in §7:
/// `Incomplete`/`Cycle` are weaker than any terminal code, and merging two
/// errors keeps the more severe one.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    /// Evaluation cannot complete with current information; may resolve
    /// once more conjuncts arrive.
    #[error("incomplete")]
    Incomplete,
    /// A reference cycle was observed; a specialization of `Incomplete`.
    #[error("cycle")]
    Cycle,
    /// Raised by the `error` builtin, or a literal bottom in source.
    #[error("user error")]
    User,
    /// A structural cycle was proven (every conjunct on the node is cyclic).
    #[error("structural cycle")]
    StructuralCycle,
    /// Unconditional evaluation failure: type conflict, concrete mismatch,
    /// closedness violation.
    #[error("evaluation error")]
    Eval,
}

impl ErrorCode {
    /// `Incomplete`/`Cycle` never block ancestors from finalizing; everything
    /// else is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ErrorCode::Incomplete | ErrorCode::Cycle)
    }
}

/// A source position attached to an error for diagnostics. The core does not
/// interpret these beyond deduplicating identical ones; rendering is an
/// exporter concern (§6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{file}:{}:{}", self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

/// The `Bottom` value: a failed unification result. Carries enough to
/// report to the caller and to be merged with sibling failures.
#[derive(Debug, Clone, PartialEq)]
pub struct Bottom {
    pub code: ErrorCode,
    pub message: String,
    pub positions: Vec<Position>,
    /// Set when this bottom was promoted from a child arc's terminal error
    /// rather than produced directly at this vertex (§7 propagation).
    pub has_recursive: bool,
}

impl Bottom {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Bottom {
            code,
            message: message.into(),
            positions: Vec::new(),
            has_recursive: false,
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Eval, message)
    }

    pub fn incomplete(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Incomplete, message)
    }

    pub fn structural_cycle(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StructuralCycle, message)
    }

    pub fn with_position(mut self, pos: Position) -> Self {
        self.positions.push(pos);
        self
    }

    pub fn child_error(message: impl Into<String>) -> Self {
        Bottom {
            code: ErrorCode::Eval,
            message: message.into(),
            positions: Vec::new(),
            has_recursive: true,
        }
    }

    /// Merge rule from §7: most severe code wins; equal codes merge
    /// messages/positions; positions are deduplicated.
    pub fn merge(self, other: Bottom) -> Bottom {
        let (mut winner, loser) = if other.code > self.code {
            (other, self)
        } else {
            (self, other)
        };
        if winner.code == loser.code {
            winner.message = format!("{}; {}", winner.message, loser.message);
        }
        for pos in loser.positions {
            if !winner.positions.contains(&pos) {
                winner.positions.push(pos);
            }
        }
        winner.has_recursive = winner.has_recursive || loser.has_recursive;
        winner
    }

    pub fn merge_opt(a: Option<Bottom>, b: Option<Bottom>) -> Option<Bottom> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

impl fmt::Display for Bottom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Bottom {}

pub type UnifyResult<T> = Result<T, Bottom>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_spec() {
        assert!(ErrorCode::Incomplete < ErrorCode::Cycle);
        assert!(ErrorCode::Cycle < ErrorCode::User);
        assert!(ErrorCode::User < ErrorCode::StructuralCycle);
        assert!(ErrorCode::StructuralCycle < ErrorCode::Eval);
    }

    #[test]
    fn merge_keeps_more_severe_code() {
        let a = Bottom::incomplete("waiting");
        let b = Bottom::eval("conflict");
        let merged = a.merge(b);
        assert_eq!(merged.code, ErrorCode::Eval);
    }

    #[test]
    fn merge_same_code_combines_messages_and_dedupes_positions() {
        let pos = Position { file: Some("x.conf".into()), line: 1, column: 2 };
        let a = Bottom::eval("left").with_position(pos.clone());
        let b = Bottom::eval("right").with_position(pos.clone());
        let merged = a.merge(b);
        assert_eq!(merged.positions.len(), 1);
        assert!(merged.message.contains("left") && merged.message.contains("right"));
    }

    #[test]
    fn incomplete_and_cycle_are_non_terminal() {
        assert!(!ErrorCode::Incomplete.is_terminal());
        assert!(!ErrorCode::Cycle.is_terminal());
        assert!(ErrorCode::Eval.is_terminal());
        assert!(ErrorCode::StructuralCycle.is_terminal());
        assert!(ErrorCode::User.is_terminal());
    }
}
