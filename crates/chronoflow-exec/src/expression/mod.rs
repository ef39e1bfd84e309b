//! Row expressions compiled against concrete column types.
//!
//! References resolve to scope slots at compile time, so evaluating a row
//! is a tree walk over a `Vec<Value>` filled by the caller. A compiled
//! expression is only valid for the type tuple it was compiled under;
//! [`CompileCache`] keeps one specialization per tuple.

mod compile;

use std::collections::HashMap;
use std::sync::Arc;

use chronoflow_core::expression::Expression;
use chronoflow_core::{DataType, Error, Result, Value, VALUE_COL};

use compile::{Node, Typer};

/// Reference values of one row, in the order of the compile-time types.
pub type Scope = Vec<Value>;

#[derive(Debug, Clone)]
pub struct Compiled {
    outputs: Vec<(String, Node, DataType)>,
    object: bool,
}

/// Compile `expr` with `types` giving each reference name (path joined by
/// `.`) its type. An object expression yields one output per property;
/// anything else yields a single `_value` output.
pub fn compile(expr: &Expression, types: &[(String, DataType)]) -> Result<Compiled> {
    let typer = Typer { types };
    match expr {
        Expression::Object { properties } => {
            let mut outputs = Vec::with_capacity(properties.len());
            for p in properties {
                let (n, ty) = typer.lower(&p.value)?;
                outputs.push((p.key.clone(), n, ty));
            }
            Ok(Compiled {
                outputs,
                object: true,
            })
        }
        e => {
            let (n, ty) = typer.lower(e)?;
            Ok(Compiled {
                outputs: vec![(VALUE_COL.to_string(), n, ty)],
                object: false,
            })
        }
    }
}

impl Compiled {
    pub fn is_object(&self) -> bool {
        self.object
    }

    /// Label and type of each output, in order.
    pub fn output_types(&self) -> Vec<(String, DataType)> {
        self.outputs.iter().map(|(l, _, t)| (l.clone(), *t)).collect()
    }

    /// Type of a scalar expression (the first output of an object).
    pub fn data_type(&self) -> DataType {
        self.outputs.first().map_or(DataType::Bool, |o| o.2)
    }

    pub fn eval(&self, scope: &Scope) -> Result<Value> {
        match self.outputs.first() {
            Some((_, n, _)) => n.eval(scope),
            None => Err(Error::ExpressionEvaluation("empty object".into())),
        }
    }

    pub fn eval_all(&self, scope: &Scope) -> Result<Vec<Value>> {
        self.outputs.iter().map(|(_, n, _)| n.eval(scope)).collect()
    }

    pub fn eval_bool(&self, scope: &Scope) -> Result<bool> {
        match self.eval(scope)? {
            Value::Bool(b) => Ok(b),
            v => Err(Error::ExpressionEvaluation(format!("{v} is not a bool"))),
        }
    }
}

/// Compiled specializations of one expression, keyed by reference types.
#[derive(Debug)]
pub struct CompileCache {
    expr: Expression,
    names: Vec<String>,
    compiled: HashMap<Vec<DataType>, Arc<Compiled>>,
}

impl CompileCache {
    pub fn new(expr: Expression) -> Self {
        let names = expr.references().into_iter().map(|p| p.join(".")).collect();
        Self {
            expr,
            names,
            compiled: HashMap::new(),
        }
    }

    pub fn expression(&self) -> &Expression {
        &self.expr
    }

    /// Reference names in first-seen order; scopes are filled in this order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// `types[i]` is the type of `names()[i]`.
    pub fn get(&mut self, types: &[DataType]) -> Result<Arc<Compiled>> {
        if let Some(c) = self.compiled.get(types) {
            return Ok(c.clone());
        }
        let typed: Vec<(String, DataType)> = self
            .names
            .iter()
            .cloned()
            .zip(types.iter().copied())
            .collect();
        let c = Arc::new(compile(&self.expr, &typed)?);
        self.compiled.insert(types.to_vec(), c.clone());
        Ok(c)
    }
}
