//! Target functions for symbolic regression.
//!
//! Test cases are produced by evaluating a [`TargetFunction`] at random variable bindings.
//! [`TargetExpression`] implements it for arithmetic expressions written as text, such as
//! `x*2+3*2`:
//!
//! ```text
//! expr    ::= term (('+' | '-') term)*
//! term    ::= unary (('*' | '/') unary)*
//! unary   ::= '-' unary | primary
//! primary ::= number | identifier | '(' expr ')'
//! ```

use std::{collections::HashMap, fmt, str::FromStr};

use darwin_genome::{Node, Operand};

/// A function the regression evaluators try to reproduce.
pub trait TargetFunction: Send + Sync {
    /// Evaluates the function. Returns `None` where it is undefined.
    fn evaluate(&self, bindings: &HashMap<String, f64>) -> Option<f64>;
}

/// Errors produced while parsing a target expression.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum ExpressionError {
    #[display("unexpected end of expression")]
    UnexpectedEnd,
    #[display("unexpected `{found}` at offset {offset}")]
    Unexpected { found: char, offset: usize },
    #[display("invalid number `{text}` at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
}

/// A parsed arithmetic expression.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetExpression {
    source: String,
    root: Node,
}

impl TargetExpression {
    #[must_use]
    pub fn root(&self) -> &Node {
        &self.root
    }
}

impl FromStr for TargetExpression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser {
            chars: s.char_indices().collect(),
            pos: 0,
        };
        let root = parser.expr()?;
        parser.skip_whitespace();
        if let Some(&(offset, found)) = parser.chars.get(parser.pos) {
            return Err(ExpressionError::Unexpected { found, offset });
        }
        Ok(Self {
            source: s.to_owned(),
            root,
        })
    }
}

impl fmt::Display for TargetExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TargetFunction for TargetExpression {
    fn evaluate(&self, bindings: &HashMap<String, f64>) -> Option<f64> {
        let eval = self.root.evaluate(&|name| bindings.get(name).copied());
        (!eval.faulted).then_some(eval.value)
    }
}

struct Parser {
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Parser {
    fn skip_whitespace(&mut self) {
        while self.chars.get(self.pos).is_some_and(|(_, c)| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn expr(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Node::branch(operand(op), lhs, rhs);
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.unary()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Node::branch(operand(op), lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if self.peek() == Some('-') {
            self.pos += 1;
            let operand = self.unary()?;
            return Ok(Node::branch(Operand::Subtract, Node::constant(0.0), operand));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        let Some(c) = self.peek() else {
            return Err(ExpressionError::UnexpectedEnd);
        };
        let offset = self.chars[self.pos].0;
        if c == '(' {
            self.pos += 1;
            let inner = self.expr()?;
            return match self.peek() {
                Some(')') => {
                    self.pos += 1;
                    Ok(inner)
                }
                Some(found) => Err(ExpressionError::Unexpected {
                    found,
                    offset: self.chars[self.pos].0,
                }),
                None => Err(ExpressionError::UnexpectedEnd),
            };
        }
        if c.is_ascii_digit() || c == '.' {
            let text = self.take_while(|c| c.is_ascii_digit() || c == '.');
            return text
                .parse::<f64>()
                .map(Node::constant)
                .map_err(|_| ExpressionError::InvalidNumber { text, offset });
        }
        if c.is_alphabetic() || c == '_' {
            let name = self.take_while(|c| c.is_alphanumeric() || c == '_');
            return Ok(Node::variable(&name));
        }
        Err(ExpressionError::Unexpected { found: c, offset })
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(&(_, c)) = self.chars.get(self.pos) {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }
}

fn operand(c: char) -> Operand {
    match c {
        '+' => Operand::Add,
        '-' => Operand::Subtract,
        '*' => Operand::Multiply,
        _ => Operand::Divide,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str, x: f64) -> Option<f64> {
        let target: TargetExpression = expr.parse().unwrap();
        target.evaluate(&HashMap::from([("x".to_owned(), x)]))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("x*2+3*2", 1.5), Some(9.0));
        assert_eq!(eval("2 + 3 * 4", 0.0), Some(14.0));
        assert_eq!(eval("(2 + 3) * 4", 0.0), Some(20.0));
        assert_eq!(eval("10 - 4 - 3", 0.0), Some(3.0));
        assert_eq!(eval("-x * 2", 3.0), Some(-6.0));
    }

    #[test]
    fn test_undefined_points() {
        assert_eq!(eval("1 / x", 0.0), None);
        assert_eq!(eval("1 / x", 4.0), Some(0.25));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "x +".parse::<TargetExpression>(),
            Err(ExpressionError::UnexpectedEnd)
        );
        assert_eq!(
            "x $ 2".parse::<TargetExpression>(),
            Err(ExpressionError::Unexpected {
                found: '$',
                offset: 2
            })
        );
        assert!(matches!(
            "1..2".parse::<TargetExpression>(),
            Err(ExpressionError::InvalidNumber { .. })
        ));
        assert!("(x + 1".parse::<TargetExpression>().is_err());
    }

    #[test]
    fn test_display_keeps_source() {
        let target: TargetExpression = "x*2+3*2".parse().unwrap();
        assert_eq!(target.to_string(), "x*2+3*2");
        assert_eq!(target.root().to_string(), "((x * 2) + (3 * 2))");
    }
}
