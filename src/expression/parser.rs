// Tokenizer and recursive-descent parser for the stream expression DSL.
// Supports expressions like:
//   type = "debrid" and size < 8gb
//   resolution in ["2160p", "1080p"] or seeders >= 20
//   count(streams) = 0
//   any(cached and service = "realdebrid")

use crate::errors::{ExpressionError, ExpressionResult};

/// Comparison operators the DSL understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "contains",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Matches => "matches",
        }
    }
}

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Reference to a stream attribute, or the bound `streams` variable
    Field(String),
    List(Vec<Literal>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        lhs: Box<Expr>,
        op: CompareOp,
        rhs: Box<Expr>,
    },
    InList {
        lhs: Box<Expr>,
        list: Vec<Literal>,
    },
    /// Aggregate or helper call: count(..), any(..), all(..), empty(..)
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    /// Render an approximate source fragment for error reporting
    pub fn fragment(&self) -> String {
        match self {
            Expr::Literal(Literal::Str(s)) => format!("\"{s}\""),
            Expr::Literal(Literal::Num(n)) => format!("{n}"),
            Expr::Literal(Literal::Bool(b)) => format!("{b}"),
            Expr::Field(name) => name.clone(),
            Expr::List(items) => format!("[..{} items..]", items.len()),
            Expr::Not(inner) => format!("not {}", inner.fragment()),
            Expr::And(l, r) => format!("{} and {}", l.fragment(), r.fragment()),
            Expr::Or(l, r) => format!("{} or {}", l.fragment(), r.fragment()),
            Expr::Compare { lhs, op, rhs } => {
                format!("{} {} {}", lhs.fragment(), op.symbol(), rhs.fragment())
            }
            Expr::InList { lhs, .. } => format!("{} in [..]", lhs.fragment()),
            Expr::Call { name, .. } => format!("{name}(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Op(CompareOp),
    And,
    Or,
    Not,
    In,
    True,
    False,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    position: usize,
}

fn parse_error(position: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Parse {
        position,
        message: message.into(),
    }
}

/// Size-suffix multipliers accepted directly after a number literal
fn unit_multiplier(unit: &str) -> Option<f64> {
    match unit {
        "b" => Some(1.0),
        "kb" | "kib" => Some(1024.0),
        "mb" | "mib" => Some(1024.0 * 1024.0),
        "gb" | "gib" => Some(1024.0 * 1024.0 * 1024.0),
        "tb" | "tib" => Some(1024.0_f64.powi(4)),
        _ => None,
    }
}

fn tokenize(input: &str) -> ExpressionResult<Vec<Spanned>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos] as char;

        if ch.is_whitespace() {
            pos += 1;
            continue;
        }

        match ch {
            '(' => {
                tokens.push(Spanned { token: Token::LParen, position: pos });
                pos += 1;
            }
            ')' => {
                tokens.push(Spanned { token: Token::RParen, position: pos });
                pos += 1;
            }
            '[' => {
                tokens.push(Spanned { token: Token::LBracket, position: pos });
                pos += 1;
            }
            ']' => {
                tokens.push(Spanned { token: Token::RBracket, position: pos });
                pos += 1;
            }
            ',' => {
                tokens.push(Spanned { token: Token::Comma, position: pos });
                pos += 1;
            }
            '"' | '\'' => {
                let quote = ch;
                let start = pos;
                let rest = &input[pos + 1..];
                match rest.find(quote) {
                    Some(end) => {
                        tokens.push(Spanned {
                            token: Token::Str(rest[..end].to_string()),
                            position: start,
                        });
                        pos += end + 2;
                    }
                    None => {
                        return Err(parse_error(start, format!("unclosed {quote} quote")));
                    }
                }
            }
            '=' => {
                let start = pos;
                pos += 1;
                if pos < bytes.len() && bytes[pos] == b'=' {
                    pos += 1;
                }
                tokens.push(Spanned { token: Token::Op(CompareOp::Eq), position: start });
            }
            '!' => {
                let start = pos;
                if pos + 1 < bytes.len() && bytes[pos + 1] == b'=' {
                    tokens.push(Spanned { token: Token::Op(CompareOp::Ne), position: start });
                    pos += 2;
                } else {
                    return Err(parse_error(start, "expected '!=' "));
                }
            }
            '<' => {
                let start = pos;
                pos += 1;
                let op = if pos < bytes.len() && bytes[pos] == b'=' {
                    pos += 1;
                    CompareOp::Le
                } else {
                    CompareOp::Lt
                };
                tokens.push(Spanned { token: Token::Op(op), position: start });
            }
            '>' => {
                let start = pos;
                pos += 1;
                let op = if pos < bytes.len() && bytes[pos] == b'=' {
                    pos += 1;
                    CompareOp::Ge
                } else {
                    CompareOp::Gt
                };
                tokens.push(Spanned { token: Token::Op(op), position: start });
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                while pos < bytes.len()
                    && ((bytes[pos] as char).is_ascii_digit() || bytes[pos] == b'.')
                {
                    pos += 1;
                }
                let number: f64 = input[start..pos]
                    .parse()
                    .map_err(|_| parse_error(start, format!("invalid number '{}'", &input[start..pos])))?;

                // Optional size suffix fused to the number: 8gb, 120mb
                let unit_start = pos;
                while pos < bytes.len() && (bytes[pos] as char).is_ascii_alphabetic() {
                    pos += 1;
                }
                let value = if unit_start == pos {
                    number
                } else {
                    let unit = input[unit_start..pos].to_ascii_lowercase();
                    match unit_multiplier(&unit) {
                        Some(mult) => number * mult,
                        None => {
                            return Err(parse_error(
                                unit_start,
                                format!("unknown size unit '{unit}'"),
                            ));
                        }
                    }
                };
                tokens.push(Spanned { token: Token::Num(value), position: start });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = pos;
                while pos < bytes.len() {
                    let c = bytes[pos] as char;
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                        pos += 1;
                    } else {
                        break;
                    }
                }
                let word = &input[start..pos];
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" => Token::True,
                    "false" => Token::False,
                    "contains" => Token::Op(CompareOp::Contains),
                    "startswith" => Token::Op(CompareOp::StartsWith),
                    "endswith" => Token::Op(CompareOp::EndsWith),
                    "matches" => Token::Op(CompareOp::Matches),
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push(Spanned { token, position: start });
            }
            other => {
                return Err(parse_error(pos, format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    input_len: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.position)
            .unwrap_or(self.input_len)
    }

    fn advance(&mut self) -> Option<&Spanned> {
        let spanned = self.tokens.get(self.pos);
        if spanned.is_some() {
            self.pos += 1;
        }
        spanned
    }

    fn expect(&mut self, expected: Token, what: &str) -> ExpressionResult<()> {
        let position = self.position();
        match self.advance() {
            Some(s) if s.token == expected => Ok(()),
            _ => Err(parse_error(position, format!("expected {what}"))),
        }
    }

    fn parse_or(&mut self) -> ExpressionResult<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ExpressionResult<Expr> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> ExpressionResult<Expr> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ExpressionResult<Expr> {
        let lhs = self.parse_primary()?;

        match self.peek() {
            Some(Token::Op(op)) => {
                let op = *op;
                self.advance();
                let rhs = self.parse_primary()?;
                Ok(Expr::Compare {
                    lhs: Box::new(lhs),
                    op,
                    rhs: Box::new(rhs),
                })
            }
            Some(Token::In) => {
                self.advance();
                let position = self.position();
                let list = match self.parse_primary()? {
                    Expr::List(items) => items,
                    _ => return Err(parse_error(position, "expected a list after 'in'")),
                };
                Ok(Expr::InList {
                    lhs: Box::new(lhs),
                    list,
                })
            }
            _ => Ok(lhs),
        }
    }

    fn parse_primary(&mut self) -> ExpressionResult<Expr> {
        let position = self.position();
        let Some(spanned) = self.advance() else {
            return Err(parse_error(position, "unexpected end of expression"));
        };

        match spanned.token.clone() {
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                loop {
                    match self.peek() {
                        Some(Token::RBracket) => {
                            self.advance();
                            break;
                        }
                        Some(_) => {
                            let item_pos = self.position();
                            let item = match self.advance().map(|s| s.token.clone()) {
                                Some(Token::Str(s)) => Literal::Str(s),
                                Some(Token::Num(n)) => Literal::Num(n),
                                Some(Token::True) => Literal::Bool(true),
                                Some(Token::False) => Literal::Bool(false),
                                _ => {
                                    return Err(parse_error(
                                        item_pos,
                                        "lists may only contain literals",
                                    ));
                                }
                            };
                            items.push(item);
                            if matches!(self.peek(), Some(Token::Comma)) {
                                self.advance();
                            }
                        }
                        None => return Err(parse_error(self.position(), "unclosed list")),
                    }
                }
                Ok(Expr::List(items))
            }
            Token::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            Token::Num(n) => Ok(Expr::Literal(Literal::Num(n))),
            Token::True => Ok(Expr::Literal(Literal::Bool(true))),
            Token::False => Ok(Expr::Literal(Literal::Bool(false))),
            Token::Ident(name) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let mut args = Vec::new();
                    loop {
                        match self.peek() {
                            Some(Token::RParen) => {
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                args.push(self.parse_or()?);
                                if matches!(self.peek(), Some(Token::Comma)) {
                                    self.advance();
                                }
                            }
                            None => {
                                return Err(parse_error(
                                    self.position(),
                                    format!("unclosed call to '{name}'"),
                                ));
                            }
                        }
                    }
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Field(name))
                }
            }
            _ => Err(parse_error(position, "expected a value, field or '('")),
        }
    }
}

/// Parse an expression string into an AST.
///
/// Every failure carries the byte position that broke the parse.
pub fn parse(input: &str) -> ExpressionResult<Expr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(parse_error(0, "empty expression"));
    }
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        input_len: input.len(),
    };
    let expr = parser.parse_or()?;
    if parser.pos < tokens.len() {
        return Err(parse_error(
            parser.position(),
            "unexpected trailing tokens after expression",
        ));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_boolean_composition() {
        let expr = parse("type = \"debrid\" and size < 8gb").unwrap();
        match expr {
            Expr::And(lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Compare { op: CompareOp::Eq, .. }));
                match *rhs {
                    Expr::Compare { op, rhs, .. } => {
                        assert_eq!(op, CompareOp::Lt);
                        assert_eq!(
                            *rhs,
                            Expr::Literal(Literal::Num(8.0 * 1024.0 * 1024.0 * 1024.0))
                        );
                    }
                    other => panic!("unexpected rhs: {other:?}"),
                }
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn parses_in_lists_and_calls() {
        let expr = parse("resolution in [\"2160p\", \"1080p\"] or count(streams) = 0").unwrap();
        assert!(matches!(expr, Expr::Or(..)));
    }

    #[test]
    fn reports_positions_on_errors() {
        let err = parse("size < ").unwrap_err();
        match err {
            crate::errors::ExpressionError::Parse { position, .. } => assert_eq!(position, 7),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = parse("name = \"unterminated").unwrap_err();
        match err {
            crate::errors::ExpressionError::Parse { position, .. } => assert_eq!(position, 7),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_trailing_tokens() {
        assert!(parse("cached cached").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn operators_have_symmetric_symbols() {
        assert_eq!(CompareOp::Ge.symbol(), ">=");
        assert_eq!(CompareOp::Matches.symbol(), "matches");
    }
}
