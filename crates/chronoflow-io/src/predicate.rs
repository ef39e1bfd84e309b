//! Storage predicate tree.
//!
//! Filters pushed into a read are expressed as this tree so storage can
//! evaluate them without the expression compiler.

use std::cmp::Ordering;

use chronoflow_core::expression::{is_value_reference, BinaryOp, Expression, LogicalOp};
use chronoflow_core::{Tags, Value, VALUE_COL};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    StartsWith,
    Regex,
    NotRegex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Logical {
        op: LogicalOperator,
        left: Box<Node>,
        right: Box<Node>,
    },
    Comparison {
        op: Comparison,
        left: Box<Node>,
        right: Box<Node>,
    },
    TagRef(String),
    FieldRef(String),
    Literal(Literal),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub root: Node,
}

impl Predicate {
    /// Converts a filter expression. Expressions storage cannot evaluate
    /// (arithmetic, time/duration literals, member paths) are `Unsupported`.
    pub fn from_expression(e: &Expression) -> Result<Predicate> {
        Ok(Predicate { root: to_node(e)? })
    }

    /// Logical AND of both trees.
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate {
            root: Node::Logical {
                op: LogicalOperator::And,
                left: Box::new(self.root),
                right: Box::new(other.root),
            },
        }
    }

    /// Compile regex literals once for repeated evaluation.
    pub fn matcher(&self) -> Result<Matcher> {
        Ok(Matcher {
            root: compile(&self.root)?,
        })
    }
}

fn to_node(e: &Expression) -> Result<Node> {
    match e {
        Expression::Logical { op, left, right } => Ok(Node::Logical {
            op: match op {
                LogicalOp::And => LogicalOperator::And,
                LogicalOp::Or => LogicalOperator::Or,
            },
            left: Box::new(to_node(left)?),
            right: Box::new(to_node(right)?),
        }),
        Expression::Binary { op, left, right } => {
            let op = comparison(*op)?;
            Ok(Node::Comparison {
                op,
                left: Box::new(to_node(left)?),
                right: Box::new(to_node(right)?),
            })
        }
        Expression::Reference { path } => match path.as_slice() {
            [name] if is_value_reference(name) => Ok(Node::FieldRef(VALUE_COL.to_string())),
            [name] => Ok(Node::TagRef(name.clone())),
            _ => Err(StorageError::Unsupported(format!(
                "reference {} in storage predicate",
                path.join(".")
            ))),
        },
        Expression::String { value } => Ok(Node::Literal(Literal::String(value.clone()))),
        Expression::Int { value } => Ok(Node::Literal(Literal::Int(*value))),
        Expression::UInt { value } => Ok(Node::Literal(Literal::UInt(*value))),
        Expression::Float { value } => Ok(Node::Literal(Literal::Float(*value))),
        Expression::Bool { value } => Ok(Node::Literal(Literal::Bool(*value))),
        Expression::Regex { value } => Ok(Node::Literal(Literal::Regex(value.clone()))),
        Expression::Duration { .. } => Err(StorageError::Unsupported(
            "duration literals not supported in storage predicates".into(),
        )),
        Expression::Time { .. } => Err(StorageError::Unsupported(
            "time literals not supported in storage predicates".into(),
        )),
        other => Err(StorageError::Unsupported(format!(
            "expression {other} in storage predicate"
        ))),
    }
}

fn comparison(op: BinaryOp) -> Result<Comparison> {
    Ok(match op {
        BinaryOp::Eq => Comparison::Equal,
        BinaryOp::Neq => Comparison::NotEqual,
        BinaryOp::Lt => Comparison::Less,
        BinaryOp::Lte => Comparison::LessEqual,
        BinaryOp::Gt => Comparison::Greater,
        BinaryOp::Gte => Comparison::GreaterEqual,
        BinaryOp::StartsWith => Comparison::StartsWith,
        BinaryOp::RegexMatch => Comparison::Regex,
        BinaryOp::RegexNotMatch => Comparison::NotRegex,
        other => {
            return Err(StorageError::Unsupported(format!(
                "operator {} in storage predicate",
                other.token()
            )))
        }
    })
}

enum Compiled {
    Logical(LogicalOperator, Box<Compiled>, Box<Compiled>),
    Comparison(Comparison, Box<Compiled>, Box<Compiled>),
    Tag(String),
    Field,
    Literal(Value),
    Regex(Regex),
}

fn compile(n: &Node) -> Result<Compiled> {
    Ok(match n {
        Node::Logical { op, left, right } => {
            Compiled::Logical(*op, Box::new(compile(left)?), Box::new(compile(right)?))
        }
        Node::Comparison { op, left, right } => {
            Compiled::Comparison(*op, Box::new(compile(left)?), Box::new(compile(right)?))
        }
        Node::TagRef(t) => Compiled::Tag(t.clone()),
        Node::FieldRef(_) => Compiled::Field,
        Node::Literal(Literal::Regex(r)) => Compiled::Regex(
            Regex::new(r).map_err(|e| StorageError::InvalidRequest(format!("regex {r:?}: {e}")))?,
        ),
        Node::Literal(l) => Compiled::Literal(match l {
            Literal::String(s) => Value::String(s.clone()),
            Literal::Int(v) => Value::Int(*v),
            Literal::UInt(v) => Value::UInt(*v),
            Literal::Float(v) => Value::Float(*v),
            Literal::Bool(v) => Value::Bool(*v),
            Literal::Regex(_) => Value::Bool(false),
        }),
    })
}

/// A predicate with its regexes compiled.
pub struct Matcher {
    root: Compiled,
}

enum Operand<'a> {
    Value(Value),
    Str(&'a str),
    Regex(&'a Regex),
    Missing,
}

impl Matcher {
    /// Evaluates against a series' tags and, when known, one point's value.
    /// A field comparison without a value is treated as satisfied so that
    /// series-level checks only reject on tags.
    pub fn matches(&self, tags: &Tags, value: Option<&Value>) -> bool {
        eval(&self.root, tags, value)
    }
}

fn eval(n: &Compiled, tags: &Tags, value: Option<&Value>) -> bool {
    match n {
        Compiled::Logical(LogicalOperator::And, l, r) => eval(l, tags, value) && eval(r, tags, value),
        Compiled::Logical(LogicalOperator::Or, l, r) => eval(l, tags, value) || eval(r, tags, value),
        Compiled::Comparison(op, l, r) => {
            let (l, r) = (operand(l, tags, value), operand(r, tags, value));
            if matches!(l, Operand::Missing) || matches!(r, Operand::Missing) {
                return value.is_none();
            }
            compare(*op, &l, &r)
        }
        Compiled::Literal(Value::Bool(b)) => *b,
        _ => false,
    }
}

fn operand<'a>(n: &'a Compiled, tags: &'a Tags, value: Option<&Value>) -> Operand<'a> {
    match n {
        Compiled::Tag(t) => Operand::Str(tags.get(t).unwrap_or("")),
        Compiled::Field => value.map_or(Operand::Missing, |v| Operand::Value(v.clone())),
        Compiled::Literal(v) => Operand::Value(v.clone()),
        Compiled::Regex(r) => Operand::Regex(r),
        Compiled::Logical(..) | Compiled::Comparison(..) => {
            Operand::Value(Value::Bool(eval(n, tags, value)))
        }
    }
}

fn as_str<'a>(o: &'a Operand<'_>) -> Option<&'a str> {
    match o {
        Operand::Str(s) => Some(*s),
        Operand::Value(Value::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn compare(op: Comparison, l: &Operand<'_>, r: &Operand<'_>) -> bool {
    match op {
        Comparison::Regex | Comparison::NotRegex => {
            let hit = match (as_str(l), r) {
                (Some(s), Operand::Regex(re)) => re.is_match(s),
                _ => return false,
            };
            (op == Comparison::Regex) == hit
        }
        Comparison::StartsWith => match (as_str(l), as_str(r)) {
            (Some(a), Some(b)) => a.starts_with(b),
            _ => false,
        },
        _ => {
            let ord = match (l, r) {
                _ if as_str(l).is_some() && as_str(r).is_some() => as_str(l).cmp(&as_str(r)),
                (Operand::Value(a), Operand::Value(b)) => match a.compare(b) {
                    Some(o) => o,
                    None => match (a.as_float(), b.as_float()) {
                        (Some(x), Some(y)) => x.total_cmp(&y),
                        _ => return false,
                    },
                },
                _ => return false,
            };
            match op {
                Comparison::Equal => ord == Ordering::Equal,
                Comparison::NotEqual => ord != Ordering::Equal,
                Comparison::Less => ord == Ordering::Less,
                Comparison::LessEqual => ord != Ordering::Greater,
                Comparison::Greater => ord == Ordering::Greater,
                Comparison::GreaterEqual => ord != Ordering::Less,
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronoflow_core::expression::Expression as E;

    fn tags() -> Tags {
        [("host", "server01"), ("region", "west")].into_iter().collect()
    }

    #[test]
    fn converts_and_evaluates() {
        let e = E::logical(
            LogicalOp::And,
            E::binary(BinaryOp::Eq, E::reference("region"), E::string("west")),
            E::binary(BinaryOp::Gt, E::reference("$"), E::float(5.0)),
        );
        let p = Predicate::from_expression(&e).expect("convertible");
        let m = p.matcher().expect("compiles");
        assert!(m.matches(&tags(), Some(&Value::Float(6.0))));
        assert!(!m.matches(&tags(), Some(&Value::Float(4.0))));
        assert!(m.matches(&tags(), Some(&Value::Int(6))));
        assert!(m.matches(&tags(), None), "series-level check ignores field refs");
    }

    #[test]
    fn regex_literals() {
        let e = E::binary(
            BinaryOp::RegexMatch,
            E::reference("host"),
            E::Regex {
                value: "^server0[0-9]$".into(),
            },
        );
        let p = Predicate::from_expression(&e).expect("convertible");
        assert!(matches!(
            &p.root,
            Node::Comparison {
                op: Comparison::Regex,
                ..
            }
        ));
        assert!(p.matcher().expect("compiles").matches(&tags(), None));
    }

    #[test]
    fn arithmetic_is_unsupported() {
        let e = E::binary(
            BinaryOp::Gt,
            E::binary(BinaryOp::Add, E::reference("$"), E::float(1.0)),
            E::float(2.0),
        );
        assert!(matches!(
            Predicate::from_expression(&e),
            Err(StorageError::Unsupported(_))
        ));
    }
}
