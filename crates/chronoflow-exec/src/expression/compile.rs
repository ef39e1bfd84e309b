//! Type checking and lowering of an [`Expression`] into an evaluable tree.

use std::cmp::Ordering;

use chronoflow_core::expression::{BinaryOp, Expression, LogicalOp, UnaryOp};
use chronoflow_core::{DataType, Error, Result, Time, Value};
use regex::Regex;

use super::Scope;

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Slot(usize),
    Const(Value),
    ToFloat(Box<Node>),
    Not(Box<Node>),
    Neg(Box<Node>),
    Arith {
        op: BinaryOp,
        ty: DataType,
        left: Box<Node>,
        right: Box<Node>,
    },
    Compare {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    StartsWith(Box<Node>, Box<Node>),
    Match {
        subject: Box<Node>,
        re: Regex,
        negate: bool,
    },
    Logical {
        op: LogicalOp,
        left: Box<Node>,
        right: Box<Node>,
    },
}

pub(crate) struct Typer<'a> {
    pub(crate) types: &'a [(String, DataType)],
}

fn incompatible(msg: String) -> Error {
    Error::IncompatibleTypes(msg)
}

impl Typer<'_> {
    fn slot(&self, name: &str) -> Result<(usize, DataType)> {
        self.types
            .iter()
            .position(|(n, _)| n == name)
            .map(|i| (i, self.types[i].1))
            .ok_or_else(|| incompatible(format!("unknown reference {name:?}")))
    }

    pub(crate) fn lower(&self, e: &Expression) -> Result<(Node, DataType)> {
        Ok(match e {
            Expression::Reference { path } => {
                let (i, ty) = self.slot(&path.join("."))?;
                (Node::Slot(i), ty)
            }
            Expression::Bool { value } => (Node::Const(Value::Bool(*value)), DataType::Bool),
            Expression::Int { value } => (Node::Const(Value::Int(*value)), DataType::Int),
            Expression::UInt { value } => (Node::Const(Value::UInt(*value)), DataType::UInt),
            Expression::Float { value } => (Node::Const(Value::Float(*value)), DataType::Float),
            Expression::String { value } => {
                (Node::Const(Value::String(value.clone())), DataType::String)
            }
            Expression::Time { value } => (Node::Const(Value::Time(*value)), DataType::Time),
            Expression::Duration { value } => (Node::Const(Value::Int(value.0)), DataType::Int),
            Expression::Regex { value } => {
                return Err(incompatible(format!(
                    "regex /{value}/ is only valid on the right of =~ or !~"
                )))
            }
            Expression::Unary { op, operand } => {
                let (n, ty) = self.lower(operand)?;
                match (op, ty) {
                    (UnaryOp::Not, DataType::Bool) => (Node::Not(Box::new(n)), ty),
                    (UnaryOp::Neg, DataType::Int | DataType::Float) => (Node::Neg(Box::new(n)), ty),
                    _ => return Err(incompatible(format!("cannot apply {op:?} to {ty}"))),
                }
            }
            Expression::Logical { op, left, right } => {
                let (l, lt) = self.lower(left)?;
                let (r, rt) = self.lower(right)?;
                if lt != DataType::Bool || rt != DataType::Bool {
                    return Err(incompatible(format!(
                        "logical operands must be bool, got {lt} and {rt}"
                    )));
                }
                (
                    Node::Logical {
                        op: *op,
                        left: Box::new(l),
                        right: Box::new(r),
                    },
                    DataType::Bool,
                )
            }
            Expression::Binary { op, left, right } => self.binary(*op, left, right)?,
            Expression::Object { .. } => {
                return Err(incompatible("objects may only appear at the top level".into()))
            }
        })
    }

    fn binary(&self, op: BinaryOp, left: &Expression, right: &Expression) -> Result<(Node, DataType)> {
        if matches!(op, BinaryOp::RegexMatch | BinaryOp::RegexNotMatch) {
            let Expression::Regex { value } = right else {
                return Err(incompatible(format!("right side of {} must be a regex", op.token())));
            };
            let (subject, ty) = self.lower(left)?;
            if ty != DataType::String {
                return Err(incompatible(format!("cannot match a regex against {ty}")));
            }
            let re = Regex::new(value).map_err(|e| incompatible(format!("bad regex: {e}")))?;
            return Ok((
                Node::Match {
                    subject: Box::new(subject),
                    re,
                    negate: op == BinaryOp::RegexNotMatch,
                },
                DataType::Bool,
            ));
        }

        let (l, lt) = self.lower(left)?;
        let (r, rt) = self.lower(right)?;
        let mismatch = || incompatible(format!("{lt} {} {rt}", op.token()));

        if op == BinaryOp::StartsWith {
            if lt != DataType::String || rt != DataType::String {
                return Err(mismatch());
            }
            return Ok((Node::StartsWith(Box::new(l), Box::new(r)), DataType::Bool));
        }

        if op.is_comparison() {
            let (l, r) = match (lt, rt) {
                (a, b) if a == b => (l, r),
                (DataType::Int | DataType::UInt, DataType::Int | DataType::UInt) => (l, r),
                (DataType::Float, DataType::Int | DataType::UInt) => (l, Node::ToFloat(Box::new(r))),
                (DataType::Int | DataType::UInt, DataType::Float) => (Node::ToFloat(Box::new(l)), r),
                _ => return Err(mismatch()),
            };
            return Ok((
                Node::Compare {
                    op,
                    left: Box::new(l),
                    right: Box::new(r),
                },
                DataType::Bool,
            ));
        }

        let (l, r, ty) = match (lt, rt) {
            (DataType::String, DataType::String) if op == BinaryOp::Add => (l, r, DataType::String),
            (DataType::Time, DataType::Int) if matches!(op, BinaryOp::Add | BinaryOp::Sub) => {
                (l, r, DataType::Time)
            }
            (a, b) if a == b && a.is_numeric() => (l, r, a),
            (DataType::Float, DataType::Int | DataType::UInt) => {
                (l, Node::ToFloat(Box::new(r)), DataType::Float)
            }
            (DataType::Int | DataType::UInt, DataType::Float) => {
                (Node::ToFloat(Box::new(l)), r, DataType::Float)
            }
            _ => return Err(mismatch()),
        };
        Ok((
            Node::Arith {
                op,
                ty,
                left: Box::new(l),
                right: Box::new(r),
            },
            ty,
        ))
    }
}

fn eval_err(msg: impl Into<String>) -> Error {
    Error::ExpressionEvaluation(msg.into())
}

impl Node {
    pub(crate) fn eval(&self, scope: &Scope) -> Result<Value> {
        match self {
            Node::Slot(i) => scope
                .get(*i)
                .cloned()
                .ok_or_else(|| eval_err(format!("scope has no slot {i}"))),
            Node::Const(v) => Ok(v.clone()),
            Node::ToFloat(n) => {
                let v = n.eval(scope)?;
                v.as_float()
                    .map(Value::Float)
                    .ok_or_else(|| eval_err(format!("cannot convert {v} to float")))
            }
            Node::Not(n) => match n.eval(scope)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                v => Err(eval_err(format!("not {v}"))),
            },
            Node::Neg(n) => match n.eval(scope)? {
                Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
                Value::Float(f) => Ok(Value::Float(-f)),
                v => Err(eval_err(format!("-{v}"))),
            },
            Node::Logical { op, left, right } => {
                let l = as_bool(left.eval(scope)?)?;
                match (op, l) {
                    (LogicalOp::And, false) => Ok(Value::Bool(false)),
                    (LogicalOp::Or, true) => Ok(Value::Bool(true)),
                    _ => Ok(Value::Bool(as_bool(right.eval(scope)?)?)),
                }
            }
            Node::StartsWith(l, r) => match (l.eval(scope)?, r.eval(scope)?) {
                (Value::String(a), Value::String(b)) => Ok(Value::Bool(a.starts_with(&b))),
                (a, b) => Err(eval_err(format!("{a} startswith {b}"))),
            },
            Node::Match { subject, re, negate } => match subject.eval(scope)? {
                Value::String(s) => Ok(Value::Bool(re.is_match(&s) != *negate)),
                v => Err(eval_err(format!("cannot match {v}"))),
            },
            Node::Compare { op, left, right } => {
                let (l, r) = (left.eval(scope)?, right.eval(scope)?);
                let ord = compare(&l, &r).ok_or_else(|| eval_err(format!("cannot compare {l} and {r}")))?;
                Ok(Value::Bool(match op {
                    BinaryOp::Eq => ord == Ordering::Equal,
                    BinaryOp::Neq => ord != Ordering::Equal,
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Lte => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    BinaryOp::Gte => ord != Ordering::Less,
                    other => return Err(eval_err(format!("{} is not a comparison", other.token()))),
                }))
            }
            Node::Arith { op, ty, left, right } => arith(*op, *ty, left.eval(scope)?, right.eval(scope)?),
        }
    }
}

fn as_bool(v: Value) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(b),
        v => Err(eval_err(format!("{v} is not a bool"))),
    }
}

/// Like [`Value::compare`], plus int against uint.
fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::UInt(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
        (Value::UInt(a), Value::Int(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        _ => l.compare(r),
    }
}

fn arith(op: BinaryOp, ty: DataType, l: Value, r: Value) -> Result<Value> {
    let div_zero = || eval_err("integer division by zero");
    Ok(match (l, r) {
        (Value::Float(a), Value::Float(b)) => Value::Float(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            _ => return Err(eval_err(format!("float {}", op.token()))),
        }),
        (Value::Int(a), Value::Int(b)) => Value::Int(match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => a.checked_div(b).ok_or_else(div_zero)?,
            _ => return Err(eval_err(format!("int {}", op.token()))),
        }),
        (Value::UInt(a), Value::UInt(b)) => Value::UInt(match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => a.checked_div(b).ok_or_else(div_zero)?,
            _ => return Err(eval_err(format!("uint {}", op.token()))),
        }),
        (Value::String(a), Value::String(b)) if op == BinaryOp::Add => Value::String(a + &b),
        (Value::Time(t), Value::Int(d)) => match op {
            BinaryOp::Add => Value::Time(Time(t.0.saturating_add(d))),
            BinaryOp::Sub => Value::Time(Time(t.0.saturating_sub(d))),
            _ => return Err(eval_err(format!("time {}", op.token()))),
        },
        (l, r) => return Err(eval_err(format!("{l} {} {r} as {ty}", op.token()))),
    })
}
