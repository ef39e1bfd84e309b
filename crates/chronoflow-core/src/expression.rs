//! Row expression AST shared by `filter`, `map` and `join`.
//!
//! Expressions arrive from the parser already resolved to this tree. A
//! reference path is either a single name (`$`, `_value`, a tag) or a
//! `[table, column]` pair inside a join.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::{Duration, Time};
use crate::types::VALUE_COL;

/// Name that stands for the current row's value.
pub const CURRENT_VALUE: &str = "$";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    Reference {
        path: Vec<String>,
    },
    Bool {
        value: bool,
    },
    Int {
        value: i64,
    },
    #[serde(rename = "uint")]
    UInt {
        value: u64,
    },
    Float {
        value: f64,
    },
    String {
        value: String,
    },
    Time {
        value: Time,
    },
    Duration {
        value: Duration,
    },
    Regex {
        value: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Object {
        properties: Vec<Property>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "not")]
    Not,
    #[serde(rename = "-")]
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "startswith")]
    StartsWith,
    #[serde(rename = "=~")]
    RegexMatch,
    #[serde(rename = "!~")]
    RegexNotMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
}

impl BinaryOp {
    pub fn token(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::StartsWith => "startswith",
            BinaryOp::RegexMatch => "=~",
            BinaryOp::RegexNotMatch => "!~",
        }
    }

    pub fn is_comparison(self) -> bool {
        !matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    }
}

impl Expression {
    pub fn reference(name: &str) -> Self {
        Expression::Reference {
            path: vec![name.to_string()],
        }
    }

    pub fn member(table: &str, column: &str) -> Self {
        Expression::Reference {
            path: vec![table.to_string(), column.to_string()],
        }
    }

    pub fn float(value: f64) -> Self {
        Expression::Float { value }
    }

    pub fn int(value: i64) -> Self {
        Expression::Int { value }
    }

    pub fn string(value: &str) -> Self {
        Expression::String {
            value: value.to_string(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn logical(op: LogicalOp, left: Expression, right: Expression) -> Self {
        Expression::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Distinct reference paths in first-seen order.
    pub fn references(&self) -> Vec<Vec<String>> {
        let mut out: Vec<Vec<String>> = Vec::new();
        self.walk(&mut |e| {
            if let Expression::Reference { path } = e {
                if !out.contains(path) {
                    out.push(path.clone());
                }
            }
        });
        out
    }

    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expression)) {
        f(self);
        match self {
            Expression::Unary { operand, .. } => operand.walk(f),
            Expression::Binary { left, right, .. } | Expression::Logical { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expression::Object { properties } => {
                for p in properties {
                    p.value.walk(f);
                }
            }
            _ => {}
        }
    }
}

/// True for the names that address the value column of a single-input row.
pub fn is_value_reference(name: &str) -> bool {
    name == CURRENT_VALUE || name == VALUE_COL
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Reference { path } => f.write_str(&path.join(".")),
            Expression::Bool { value } => write!(f, "{value}"),
            Expression::Int { value } => write!(f, "{value}"),
            Expression::UInt { value } => write!(f, "{value}u"),
            Expression::Float { value } => write!(f, "{value:?}"),
            Expression::String { value } => write!(f, "{value:?}"),
            Expression::Time { value } => write!(f, "{value}"),
            Expression::Duration { value } => write!(f, "{value}"),
            Expression::Regex { value } => write!(f, "/{value}/"),
            Expression::Unary { op: UnaryOp::Not, operand } => write!(f, "not {operand}"),
            Expression::Unary { op: UnaryOp::Neg, operand } => write!(f, "-{operand}"),
            Expression::Binary { op, left, right } => write!(f, "({left} {} {right})", op.token()),
            Expression::Logical { op, left, right } => {
                let op = match op {
                    LogicalOp::And => "and",
                    LogicalOp::Or => "or",
                };
                write!(f, "({left} {op} {right})")
            }
            Expression::Object { properties } => {
                f.write_str("{")?;
                for (i, p) in properties.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", p.key, p.value)?;
                }
                f.write_str("}")
            }
        }
    }
}
