//! Errors produced while building a rule set, reported as `file:line:col`.

use core::fmt;

/// A position in a source file, 1-indexed, matching the convention most
/// editors and compilers use when printing diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    /// Name of the source the rule set was parsed from (a file name, or a
    /// caller-supplied label for an in-memory string).
    pub file: &'static str,
    /// 1-indexed line number.
    pub line: usize,
    /// 1-indexed column number.
    pub col: usize,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// Everything that can go wrong while lexing, parsing, analyzing, or
/// compiling a rule set into a dispatcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IsleError {
    /// A malformed token (unterminated block comment, bad integer literal).
    #[error("{pos}: parse error: {message}")]
    Parse {
        /// Where the error was found.
        pos: Pos,
        /// Human-readable description.
        message: String,
    },
    /// A name used in a rule's pattern or right-hand side has no declaration.
    #[error("{pos}: unknown symbol `{name}`")]
    UnknownSymbol {
        /// Where the reference appears.
        pos: Pos,
        /// The undeclared name.
        name: String,
    },
    /// A term's declared argument/return types disagree with its use.
    #[error("{pos}: type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        /// Where the mismatch was found.
        pos: Pos,
        /// The type the context required.
        expected: String,
        /// The type the expression actually had.
        found: String,
    },
    /// A variable appears on the right-hand side of a rule but is never
    /// bound by the left-hand side pattern.
    #[error("{pos}: unbound variable `{name}`")]
    UnboundVariable {
        /// Where the unbound use appears.
        pos: Pos,
        /// The variable's name.
        name: String,
    },
    /// Two rules' patterns can both match the same input and neither is
    /// declared higher-priority than the other.
    #[error("{first}: rule conflicts with rule at {second}: {message}")]
    ConflictingConstraint {
        /// Position of the first rule.
        first: Pos,
        /// Position of the second, overlapping rule.
        second: Pos,
        /// Description of the overlap.
        message: String,
    },
    /// Two rules with equal priority both match an input with no way to
    /// decide which should fire.
    #[error("{first}: ambiguous priority with rule at {second}")]
    PriorityAmbiguous {
        /// Position of the first rule.
        first: Pos,
        /// Position of the second rule.
        second: Pos,
    },
}

/// Convenience alias for fallible ISLE operations.
pub type Result<T> = core::result::Result<T, IsleError>;
