//! Table-driven evaluation of stream expressions over a candidate collection.
//!
//! Two evaluation modes exist and are chosen from the AST shape:
//! an expression whose top level references per-stream fields runs once per
//! candidate and yields the matching subset (`Value::Streams`); an
//! aggregate-only expression (only `streams` plus `count`/`any`/`all`/
//! `empty` calls) evaluates once and yields a scalar.

use regex::Regex;

use crate::errors::{ExpressionError, ExpressionResult};
use crate::expression::fields;
use crate::expression::parser::{CompareOp, Expr, Literal};
use crate::models::ParsedStream;

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<String>),
    /// Indices into the candidate collection, input order preserved
    Streams(Vec<usize>),
    Null,
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Streams(_) => "streams",
            Value::Null => "null",
        }
    }

    /// Truthiness used for boolean composition
    fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Streams(indices) => !indices.is_empty(),
            Value::Null => false,
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Str(s) => Value::Str(s.clone()),
        Literal::Num(n) => Value::Num(*n),
        Literal::Bool(b) => Value::Bool(*b),
    }
}

fn eval_error(expr: &Expr, detail: impl Into<String>) -> ExpressionError {
    ExpressionError::Eval {
        fragment: expr.fragment(),
        detail: detail.into(),
    }
}

/// Does this expression reference per-stream attributes at its own level
/// (outside of aggregate-call arguments)?
pub fn references_stream_fields(expr: &Expr) -> bool {
    match expr {
        Expr::Field(name) => name != fields::STREAMS_VAR,
        Expr::Literal(_) | Expr::List(_) => false,
        Expr::Not(inner) => references_stream_fields(inner),
        Expr::And(l, r) | Expr::Or(l, r) => {
            references_stream_fields(l) || references_stream_fields(r)
        }
        Expr::Compare { lhs, rhs, .. } => {
            references_stream_fields(lhs) || references_stream_fields(rhs)
        }
        Expr::InList { lhs, .. } => references_stream_fields(lhs),
        // Aggregate calls bind fields to their own per-stream scope
        Expr::Call { .. } => false,
    }
}

struct EvalContext<'a> {
    streams: &'a [ParsedStream],
    /// Index of the stream currently bound for per-stream field resolution
    current: Option<usize>,
}

/// Evaluate a parsed expression against a candidate stream collection.
pub fn evaluate(expr: &Expr, streams: &[ParsedStream]) -> ExpressionResult<Value> {
    if references_stream_fields(expr) {
        let mut matched = Vec::new();
        for index in 0..streams.len() {
            let ctx = EvalContext {
                streams,
                current: Some(index),
            };
            if eval_scalar(expr, &ctx)?.truthy() {
                matched.push(index);
            }
        }
        return Ok(Value::Streams(matched));
    }

    let ctx = EvalContext {
        streams,
        current: None,
    };
    eval_scalar(expr, &ctx)
}

fn eval_scalar(expr: &Expr, ctx: &EvalContext<'_>) -> ExpressionResult<Value> {
    match expr {
        Expr::Literal(literal) => Ok(literal_value(literal)),
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|l| match l {
                    Literal::Str(s) => s.clone(),
                    Literal::Num(n) => n.to_string(),
                    Literal::Bool(b) => b.to_string(),
                })
                .collect(),
        )),
        Expr::Field(name) => resolve_field(expr, name, ctx),
        Expr::Not(inner) => Ok(Value::Bool(!eval_scalar(inner, ctx)?.truthy())),
        Expr::And(lhs, rhs) => {
            if !eval_scalar(lhs, ctx)?.truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_scalar(rhs, ctx)?.truthy()))
        }
        Expr::Or(lhs, rhs) => {
            if eval_scalar(lhs, ctx)?.truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_scalar(rhs, ctx)?.truthy()))
        }
        Expr::Compare { lhs, op, rhs } => {
            let left = eval_scalar(lhs, ctx)?;
            let right = eval_scalar(rhs, ctx)?;
            compare(expr, &left, *op, &right)
        }
        Expr::InList { lhs, list } => {
            let left = eval_scalar(lhs, ctx)?;
            let found = list.iter().any(|item| {
                matches!(
                    compare_eq(&left, &literal_value(item)),
                    Some(true)
                )
            });
            Ok(Value::Bool(found))
        }
        Expr::Call { name, args } => eval_call(expr, name, args, ctx),
    }
}

fn resolve_field(expr: &Expr, name: &str, ctx: &EvalContext<'_>) -> ExpressionResult<Value> {
    if name == fields::STREAMS_VAR {
        return Ok(Value::Streams((0..ctx.streams.len()).collect()));
    }
    let Some(index) = ctx.current else {
        return Err(eval_error(
            expr,
            format!("field '{name}' referenced outside a per-stream context"),
        ));
    };
    let stream = &ctx.streams[index];
    fields::lookup(stream, name).ok_or_else(|| {
        ExpressionError::UnknownField {
            field: name.to_string(),
            suggestion: fields::suggest(name),
        }
    })
}

fn eval_call(
    expr: &Expr,
    name: &str,
    args: &[Expr],
    ctx: &EvalContext<'_>,
) -> ExpressionResult<Value> {
    let lowered = name.to_ascii_lowercase();
    if args.len() != 1 {
        return Err(eval_error(
            expr,
            format!("{lowered}() takes exactly one argument"),
        ));
    }
    let arg = &args[0];

    // Aggregates resolve their argument per stream when it uses fields,
    // otherwise expect the `streams` collection itself.
    let matching: Vec<usize> = if references_stream_fields(arg) {
        let mut matched = Vec::new();
        for index in 0..ctx.streams.len() {
            let inner = EvalContext {
                streams: ctx.streams,
                current: Some(index),
            };
            if eval_scalar(arg, &inner)?.truthy() {
                matched.push(index);
            }
        }
        matched
    } else {
        match eval_scalar(arg, ctx)? {
            Value::Streams(indices) => indices,
            other => {
                return Err(eval_error(
                    expr,
                    format!(
                        "{lowered}() expects streams or a stream predicate, got {}",
                        other.kind()
                    ),
                ));
            }
        }
    };

    match lowered.as_str() {
        "count" => Ok(Value::Num(matching.len() as f64)),
        "empty" => Ok(Value::Bool(matching.is_empty())),
        "any" => Ok(Value::Bool(!matching.is_empty())),
        "all" => Ok(Value::Bool(matching.len() == ctx.streams.len())),
        other => Err(eval_error(expr, format!("unknown function '{other}'"))),
    }
}

/// Equality across value kinds; `None` when the kinds are incomparable.
/// A list on either side tests membership; strings compare case-insensitively.
fn compare_eq(left: &Value, right: &Value) -> Option<bool> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Some(false),
        (Value::Str(a), Value::Str(b)) => Some(a.eq_ignore_ascii_case(b)),
        (Value::Num(a), Value::Num(b)) => Some(a == b),
        (Value::Bool(a), Value::Bool(b)) => Some(a == b),
        (Value::List(items), Value::Str(s)) | (Value::Str(s), Value::List(items)) => {
            Some(items.iter().any(|i| i.eq_ignore_ascii_case(s)))
        }
        (Value::Num(a), Value::Str(b)) | (Value::Str(b), Value::Num(a)) => {
            b.parse::<f64>().ok().map(|parsed| parsed == *a)
        }
        _ => None,
    }
}

fn compare(expr: &Expr, left: &Value, op: CompareOp, right: &Value) -> ExpressionResult<Value> {
    let result = match op {
        CompareOp::Eq => compare_eq(left, right)
            .ok_or_else(|| incomparable(expr, left, right))?,
        CompareOp::Ne => !compare_eq(left, right)
            .ok_or_else(|| incomparable(expr, left, right))?,
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let (a, b) = match (numeric(left), numeric(right)) {
                (Some(a), Some(b)) => (a, b),
                // Missing numeric attributes never satisfy a range test
                _ if matches!(left, Value::Null) || matches!(right, Value::Null) => {
                    return Ok(Value::Bool(false));
                }
                _ => return Err(incomparable(expr, left, right)),
            };
            match op {
                CompareOp::Lt => a < b,
                CompareOp::Le => a <= b,
                CompareOp::Gt => a > b,
                CompareOp::Ge => a >= b,
                _ => unreachable!(),
            }
        }
        CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith => {
            let Some(needle) = string_of(right) else {
                return Err(incomparable(expr, left, right));
            };
            let needle = needle.to_ascii_lowercase();
            match left {
                Value::Str(s) => {
                    let haystack = s.to_ascii_lowercase();
                    match op {
                        CompareOp::Contains => haystack.contains(&needle),
                        CompareOp::StartsWith => haystack.starts_with(&needle),
                        CompareOp::EndsWith => haystack.ends_with(&needle),
                        _ => unreachable!(),
                    }
                }
                Value::List(items) => items.iter().any(|i| {
                    let haystack = i.to_ascii_lowercase();
                    match op {
                        CompareOp::Contains => haystack.contains(&needle),
                        CompareOp::StartsWith => haystack.starts_with(&needle),
                        CompareOp::EndsWith => haystack.ends_with(&needle),
                        _ => unreachable!(),
                    }
                }),
                Value::Null => false,
                _ => return Err(incomparable(expr, left, right)),
            }
        }
        CompareOp::Matches => {
            let Some(pattern) = string_of(right) else {
                return Err(incomparable(expr, left, right));
            };
            let regex = Regex::new(pattern)
                .map_err(|e| eval_error(expr, format!("invalid regex: {e}")))?;
            match left {
                Value::Str(s) => regex.is_match(s),
                Value::List(items) => items.iter().any(|i| regex.is_match(i)),
                Value::Null => false,
                _ => return Err(incomparable(expr, left, right)),
            }
        }
    };

    Ok(Value::Bool(result))
}

fn incomparable(expr: &Expr, left: &Value, right: &Value) -> ExpressionError {
    eval_error(
        expr,
        format!("cannot compare {} with {}", left.kind(), right.kind()),
    )
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Num(n) => Some(*n),
        Value::Str(s) => s.parse().ok(),
        _ => None,
    }
}

fn string_of(value: &Value) -> Option<&str> {
    match value {
        Value::Str(s) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parser::parse;
    use crate::models::{ServiceAttribution, ServiceId, StreamType, TorrentInfo};

    fn stream(id: &str, stream_type: StreamType, size: u64) -> ParsedStream {
        ParsedStream {
            id: id.to_string(),
            r#type: Some(stream_type),
            size: Some(size),
            url: Some("https://example.com/a".into()),
            ..Default::default()
        }
    }

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn selector_filters_and_preserves_order() {
        let streams = vec![
            stream("a", StreamType::Debrid, 4 * GIB),
            stream("b", StreamType::P2p, 2 * GIB),
            stream("c", StreamType::Debrid, 12 * GIB),
            stream("d", StreamType::Debrid, 7 * GIB),
        ];
        let expr = parse("type = \"debrid\" and size < 8gb").unwrap();
        let result = evaluate(&expr, &streams).unwrap();
        assert_eq!(result, Value::Streams(vec![0, 3]));
    }

    #[test]
    fn aggregates_yield_scalars() {
        let streams = vec![stream("a", StreamType::Http, GIB)];
        let expr = parse("count(streams) = 0").unwrap();
        assert_eq!(evaluate(&expr, &streams).unwrap(), Value::Bool(false));
        assert_eq!(evaluate(&expr, &[]).unwrap(), Value::Bool(true));

        let expr = parse("any(cached)").unwrap();
        assert_eq!(evaluate(&expr, &streams).unwrap(), Value::Bool(false));
    }

    #[test]
    fn service_and_cached_fields_resolve() {
        let mut cached = stream("a", StreamType::Debrid, GIB);
        cached.service = Some(ServiceAttribution {
            id: ServiceId::RealDebrid,
            cached: true,
        });
        let uncached = stream("b", StreamType::Debrid, GIB);

        let streams = vec![cached, uncached];
        let expr = parse("cached and service = \"realdebrid\"").unwrap();
        assert_eq!(evaluate(&expr, &streams).unwrap(), Value::Streams(vec![0]));
    }

    #[test]
    fn list_fields_match_by_membership() {
        let mut s = stream("a", StreamType::P2p, GIB);
        s.torrent = Some(TorrentInfo {
            info_hash: "h".into(),
            seeders: Some(42),
            ..Default::default()
        });
        s.parsed_file.languages = vec!["en".into(), "fr".into()];

        let streams = vec![s];
        let expr = parse("language = \"EN\" and seeders >= 20").unwrap();
        assert_eq!(evaluate(&expr, &streams).unwrap(), Value::Streams(vec![0]));
    }

    #[test]
    fn missing_numeric_fields_fail_range_tests() {
        let mut s = stream("a", StreamType::Http, GIB);
        s.size = None;
        let streams = vec![s];
        let expr = parse("size < 8gb").unwrap();
        assert_eq!(evaluate(&expr, &streams).unwrap(), Value::Streams(vec![]));
    }

    #[test]
    fn unknown_fields_error_with_suggestion() {
        let streams = vec![stream("a", StreamType::Http, GIB)];
        let expr = parse("resolutoin = \"1080p\"").unwrap();
        match evaluate(&expr, &streams).unwrap_err() {
            ExpressionError::UnknownField { field, suggestion } => {
                assert_eq!(field, "resolutoin");
                assert_eq!(suggestion.as_deref(), Some("resolution"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
