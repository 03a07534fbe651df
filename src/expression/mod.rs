//! Stream expression DSL
//!
//! A small, safe expression language evaluated over a parsed-stream
//! collection. Three call sites consume it: group admission conditions,
//! the dynamic-fetch exit condition (both boolean), and stream filter
//! selectors (which yield the matching subset).
//!
//! The grammar is parsed once into an AST (`parser`), evaluated
//! table-driven (`evaluator`) against the canonical field registry
//! (`fields`). Parse failures carry byte positions; evaluation failures
//! carry the offending sub-expression and observed value kind.

pub mod evaluator;
pub mod fields;
pub mod parser;

pub use evaluator::Value;
pub use parser::{CompareOp, Expr};

use crate::errors::{ExpressionError, ExpressionResult};
use crate::models::ParsedStream;

/// A parsed expression, preserving the original text for diagnostics
#[derive(Debug, Clone)]
pub struct StreamExpression {
    original: String,
    ast: Expr,
}

impl StreamExpression {
    /// Parse an expression; fails with a positioned error on bad syntax
    pub fn parse(text: &str) -> ExpressionResult<Self> {
        let ast = parser::parse(text)?;
        Ok(Self {
            original: text.to_string(),
            ast,
        })
    }

    pub fn original_text(&self) -> &str {
        &self.original
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Evaluate against a candidate collection
    pub fn evaluate(&self, streams: &[ParsedStream]) -> ExpressionResult<Value> {
        evaluator::evaluate(&self.ast, streams)
    }

    /// Evaluate where a boolean is required (group / dynamic-fetch
    /// conditions). A numeric result is accepted as its truthiness would
    /// be ambiguous, so it is rejected as the wrong kind.
    pub fn evaluate_boolean(&self, streams: &[ParsedStream]) -> ExpressionResult<bool> {
        match self.evaluate(streams)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::WrongKind {
                expected: "boolean",
                found: other.kind(),
            }),
        }
    }

    /// Evaluate as a selector: the matching subset, input order preserved
    pub fn evaluate_selector<'a>(
        &self,
        streams: &'a [ParsedStream],
    ) -> ExpressionResult<Vec<&'a ParsedStream>> {
        match self.evaluate(streams)? {
            Value::Streams(indices) => Ok(indices.iter().map(|&i| &streams[i]).collect()),
            other => Err(ExpressionError::WrongKind {
                expected: "streams",
                found: other.kind(),
            }),
        }
    }

    /// The matching indices of a selector evaluation
    pub fn selector_indices(&self, streams: &[ParsedStream]) -> ExpressionResult<Vec<usize>> {
        match self.evaluate(streams)? {
            Value::Streams(indices) => Ok(indices),
            other => Err(ExpressionError::WrongKind {
                expected: "streams",
                found: other.kind(),
            }),
        }
    }
}

/// Validate a condition expression: must parse, and a dry run on an empty
/// collection must produce a boolean.
pub fn validate_boolean(text: &str) -> ExpressionResult<StreamExpression> {
    let expr = StreamExpression::parse(text)?;
    expr.evaluate_boolean(&[])?;
    Ok(expr)
}

/// Validate a filter selector: must parse and reference per-stream fields
/// so evaluation yields a stream list.
pub fn validate_selector(text: &str) -> ExpressionResult<StreamExpression> {
    let expr = StreamExpression::parse(text)?;
    match expr.evaluate(&[])? {
        Value::Streams(_) => Ok(expr),
        other => Err(ExpressionError::WrongKind {
            expected: "streams",
            found: other.kind(),
        }),
    }
}
