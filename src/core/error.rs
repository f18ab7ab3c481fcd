//! Error types for parsing, shape checking and gradient synthesis
//!
//! This module provides:
//! - `TensorError` - The main error enum for every failure in the crate
//! - `Span` - Source location tracking for precise parser messages

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TensorError>;

/// Source location span for error reporting.
/// Represents a range of characters in the input program text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Start position (0-indexed byte offset)
    start: usize,
    /// End position (exclusive, 0-indexed byte offset)
    end: usize,
}

impl Span {
    /// Create a new span. If end < start, they will be swapped.
    #[inline]
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        if end < start {
            Span {
                start: end,
                end: start,
            }
        } else {
            Span { start, end }
        }
    }

    /// Create a span for a single position.
    #[inline]
    #[must_use]
    pub fn at(pos: usize) -> Self {
        Span {
            start: pos,
            end: pos + 1,
        }
    }

    /// Get the start position.
    #[inline]
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Get the end position.
    #[inline]
    #[must_use]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Format the span for display (1-indexed for users).
    #[must_use]
    pub fn display(&self) -> String {
        if self.end <= self.start {
            String::new()
        } else if self.end - self.start == 1 {
            format!(" at position {}", self.start + 1)
        } else {
            format!(" at positions {}-{}", self.start + 1, self.end)
        }
    }
}

/// Errors that can occur while compiling or differentiating a tensor program.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TensorError {
    // Parsing errors
    /// The input program was empty or contained only whitespace.
    EmptyProgram,
    /// An unrecognized token was encountered.
    InvalidToken {
        /// The invalid token.
        token: String,
        /// Location of the error in the source.
        span: Option<Span>,
    },
    /// A numeric literal could not be parsed.
    InvalidNumber {
        /// The invalid number string.
        value: String,
        /// Location of the error in the source.
        span: Option<Span>,
    },
    /// A different token was expected at this position.
    UnexpectedToken {
        /// What was expected.
        expected: String,
        /// What was found.
        got: String,
        /// Location of the error in the source.
        span: Option<Span>,
    },
    /// The input ended unexpectedly while parsing.
    UnexpectedEndOfInput,

    // Shape checking errors
    /// An index extent could not be determined from any access.
    UnresolvedExtent {
        /// The index name.
        index: String,
    },
    /// Two accesses imply different extents for the same index.
    ExtentMismatch {
        /// The index name.
        index: String,
        /// Extent implied by an earlier access.
        expected: u64,
        /// Extent implied by the conflicting access.
        got: u64,
    },
    /// A tensor is accessed with the wrong number of indices, or a matrix
    /// operation was attempted on incompatible shapes.
    ShapeMismatch {
        /// Description of the mismatching operation.
        msg: String,
    },

    // Engine errors
    /// A traversal reached a node kind the pass refuses to handle.
    UnsupportedNode {
        /// The pass that refused the node.
        pass: &'static str,
        /// Display form of the offending node.
        node: String,
    },
    /// The differentiator reached a node kind it cannot differentiate.
    UnsupportedInGradient {
        /// Display form of the offending node.
        node: String,
    },
    /// Floor-div/mod bookkeeping resolved to conflicting entries.
    MalformedSubstitution {
        /// Description of the conflict.
        msg: String,
    },
    /// A reduction index remained unbounded after range inference.
    IndeterminateRange {
        /// The index name.
        index: String,
    },
    /// Floor division by a literal zero during range inference.
    DivisionByZero {
        /// Display form of the offending expression.
        node: String,
    },
    /// Caller-supplied forward indices collide after renaming.
    RepeatedAxis {
        /// The colliding axis name.
        name: String,
    },
}

impl TensorError {
    // Convenience constructors for the common span-less cases

    /// Create `InvalidToken` without a span.
    pub fn invalid_token(token: impl Into<String>) -> Self {
        TensorError::InvalidToken {
            token: token.into(),
            span: None,
        }
    }

    /// Create `UnexpectedToken` without a span.
    pub fn unexpected(expected: impl Into<String>, got: impl Into<String>) -> Self {
        TensorError::UnexpectedToken {
            expected: expected.into(),
            got: got.into(),
            span: None,
        }
    }

    /// Create `ShapeMismatch` from a message.
    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        TensorError::ShapeMismatch { msg: msg.into() }
    }

    /// Create `UnsupportedNode` for the given pass.
    pub fn unsupported(pass: &'static str, node: impl Into<String>) -> Self {
        TensorError::UnsupportedNode {
            pass,
            node: node.into(),
        }
    }

    /// Create `MalformedSubstitution` from a message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        TensorError::MalformedSubstitution { msg: msg.into() }
    }
}

impl fmt::Display for TensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorError::EmptyProgram => write!(f, "Program cannot be empty"),
            TensorError::InvalidToken { token, span } => {
                write!(
                    f,
                    "Invalid token: '{}'{}",
                    token,
                    span.map_or(String::new(), |s| s.display())
                )
            }
            TensorError::InvalidNumber { value, span } => {
                write!(
                    f,
                    "Invalid number format: '{}'{}",
                    value,
                    span.map_or(String::new(), |s| s.display())
                )
            }
            TensorError::UnexpectedToken {
                expected,
                got,
                span,
            } => {
                write!(
                    f,
                    "Expected '{}', but got '{}'{}",
                    expected,
                    got,
                    span.map_or(String::new(), |s| s.display())
                )
            }
            TensorError::UnexpectedEndOfInput => write!(f, "Unexpected end of input"),
            TensorError::UnresolvedExtent { index } => {
                write!(
                    f,
                    "Cannot determine the extent of index '{}' from any access",
                    index
                )
            }
            TensorError::ExtentMismatch {
                index,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Index '{}' has conflicting extents: {} vs. {}",
                    index, expected, got
                )
            }
            TensorError::ShapeMismatch { msg } => write!(f, "Shape mismatch: {}", msg),
            TensorError::UnsupportedNode { pass, node } => {
                write!(f, "{}: unexpected visit of {}", pass, node)
            }
            TensorError::UnsupportedInGradient { node } => {
                write!(f, "Cannot differentiate through {}", node)
            }
            TensorError::MalformedSubstitution { msg } => {
                write!(f, "Malformed substitution: {}", msg)
            }
            TensorError::IndeterminateRange { index } => {
                write!(
                    f,
                    "Reduction index '{}' has no bounded range after inference",
                    index
                )
            }
            TensorError::DivisionByZero { node } => {
                write!(f, "Floor division by zero in {}", node)
            }
            TensorError::RepeatedAxis { name } => {
                write!(f, "Forward axis '{}' appears more than once", name)
            }
        }
    }
}

impl std::error::Error for TensorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_display() {
        assert_eq!(Span::at(3).display(), " at position 4");
        assert_eq!(Span::new(2, 5).display(), " at positions 3-5");
        assert_eq!(Span::default().display(), "");
    }

    #[test]
    fn span_swaps_reversed_bounds() {
        let s = Span::new(7, 2);
        assert_eq!(s.start(), 2);
        assert_eq!(s.end(), 7);
    }

    #[test]
    fn error_messages() {
        let e = TensorError::unexpected("]", ";");
        assert_eq!(e.to_string(), "Expected ']', but got ';'");
        let e = TensorError::IndeterminateRange {
            index: "r0".to_string(),
        };
        assert!(e.to_string().contains("r0"));
    }
}
