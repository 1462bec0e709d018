//! Tree-walking evaluator.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;

use super::functions::{apply_filter, apply_test, call_method};
use super::parser::{Arg, BinOp, Node};
use crate::error::ExpressionError;

/// Result of evaluating a sub-expression. Undefined values may only be
/// consumed by `default`, `is defined` and `is undefined`.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Defined(Value),
    Undefined(String),
}

impl Operand {
    /// Unwrap a defined value or fail with the name that was undefined.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Undefined`] for undefined operands.
    pub fn into_value(self) -> Result<Value, ExpressionError> {
        match self {
            Self::Defined(v) => Ok(v),
            Self::Undefined(name) => Err(ExpressionError::Undefined(name)),
        }
    }
}

/// Evaluated call arguments.
#[derive(Debug, Default)]
pub struct Args {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Args {
    /// Argument at `index`, or passed as `name=`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| {
            self.named
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v)
        })
    }

    /// Required string argument.
    pub fn string(&self, index: usize, name: &str, func: &str) -> Result<String, ExpressionError> {
        match self.get(index, name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(to_text(other)),
            None => Err(ExpressionError::Type(format!(
                "{func}() missing argument '{name}'"
            ))),
        }
    }

    /// Optional boolean flag, false when absent.
    pub fn flag(&self, index: usize, name: &str) -> bool {
        self.get(index, name).is_some_and(truthy)
    }
}

/// Evaluate `node` against `vars`.
pub fn eval(node: &Node, vars: &BTreeMap<String, Value>) -> Result<Operand, ExpressionError> {
    match node {
        Node::Literal(v) => Ok(Operand::Defined(v.clone())),
        Node::List(items) => {
            let values = items
                .iter()
                .map(|item| eval(item, vars)?.into_value())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Operand::Defined(Value::Array(values)))
        }
        Node::Var(name) => Ok(vars
            .get(name)
            .cloned()
            .map_or_else(|| Operand::Undefined(name.clone()), Operand::Defined)),
        Node::Attr(target, attr) => {
            let base = eval(target, vars)?.into_value()?;
            Ok(lookup(&base, &Value::String(attr.clone()), || {
                format!("{}.{attr}", describe(target))
            }))
        }
        Node::Index(target, index) => {
            let base = eval(target, vars)?.into_value()?;
            let key = eval(index, vars)?.into_value()?;
            Ok(lookup(&base, &key, || format!("{}[{key}]", describe(target))))
        }
        Node::Method { target, name, args } => {
            let base = eval(target, vars)?.into_value()?;
            let args = eval_args(args, vars)?;
            call_method(&base, name, &args).map(Operand::Defined)
        }
        Node::Filter { input, name, args } => {
            let input = eval(input, vars)?;
            let args = eval_args(args, vars)?;
            apply_filter(input, name, &args)
        }
        Node::Test {
            input,
            name,
            args,
            negated,
        } => {
            let input = eval(input, vars)?;
            let args = eval_args(args, vars)?;
            let result = apply_test(&input, name, &args)?;
            Ok(Operand::Defined(Value::Bool(result != *negated)))
        }
        Node::Not(inner) => {
            let v = eval(inner, vars)?.into_value()?;
            Ok(Operand::Defined(Value::Bool(!truthy(&v))))
        }
        Node::Neg(inner) => {
            let v = eval(inner, vars)?.into_value()?;
            negate(&v).map(Operand::Defined)
        }
        Node::And(lhs, rhs) => {
            let l = eval(lhs, vars)?.into_value()?;
            if truthy(&l) {
                eval(rhs, vars)
            } else {
                Ok(Operand::Defined(l))
            }
        }
        Node::Or(lhs, rhs) => {
            let l = eval(lhs, vars)?.into_value()?;
            if truthy(&l) {
                Ok(Operand::Defined(l))
            } else {
                eval(rhs, vars)
            }
        }
        Node::Binary(op, lhs, rhs) => {
            let l = eval(lhs, vars)?.into_value()?;
            let r = eval(rhs, vars)?.into_value()?;
            binary(*op, &l, &r).map(Operand::Defined)
        }
        Node::Conditional {
            then,
            cond,
            otherwise,
        } => {
            let c = eval(cond, vars)?.into_value()?;
            if truthy(&c) {
                eval(then, vars)
            } else if let Some(otherwise) = otherwise {
                eval(otherwise, vars)
            } else {
                Ok(Operand::Defined(Value::String(String::new())))
            }
        }
    }
}

fn eval_args(args: &[Arg], vars: &BTreeMap<String, Value>) -> Result<Args, ExpressionError> {
    let mut out = Args::default();
    for arg in args {
        let value = eval(&arg.value, vars)?.into_value()?;
        match &arg.name {
            Some(name) => out.named.push((name.clone(), value)),
            None => out.positional.push(value),
        }
    }
    Ok(out)
}

/// Attribute or subscript lookup; missing keys are undefined, not errors.
fn lookup(base: &Value, key: &Value, describe: impl FnOnce() -> String) -> Operand {
    let found = match (base, key) {
        (Value::Object(map), Value::String(k)) => map.get(k),
        (Value::Array(items), Value::Number(n)) => n
            .as_i64()
            .and_then(|i| {
                let len = i64::try_from(items.len()).ok()?;
                let idx = if i < 0 { len + i } else { i };
                usize::try_from(idx).ok()
            })
            .and_then(|i| items.get(i)),
        (Value::Array(items), Value::String(k)) => k.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    };
    found.cloned().map_or_else(|| Operand::Undefined(describe()), Operand::Defined)
}

fn describe(node: &Node) -> String {
    match node {
        Node::Var(name) => name.clone(),
        Node::Attr(target, attr) => format!("{}.{attr}", describe(target)),
        _ => "value".to_string(),
    }
}

/// Jinja truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render a value as text the way templates print it.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}

/// Equality that treats `1` and `1.0` as equal.
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Result<Ordering, ExpressionError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Ok(x.cmp(&y));
            }
            x.as_f64()
                .zip(y.as_f64())
                .and_then(|(x, y)| x.partial_cmp(&y))
                .ok_or_else(|| ExpressionError::Type("cannot order NaN".to_string()))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ExpressionError::Type(format!(
            "cannot compare {} with {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, ExpressionError> {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            other => Err(ExpressionError::Type(format!(
                "'in <string>' requires string as left operand, not {}",
                type_name(other)
            ))),
        },
        Value::Array(items) => Ok(items.iter().any(|item| loosely_equal(item, needle))),
        Value::Object(map) => Ok(match needle {
            Value::String(k) => map.contains_key(k),
            _ => false,
        }),
        other => Err(ExpressionError::Type(format!(
            "argument of type {} is not iterable",
            type_name(other)
        ))),
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, ExpressionError> {
    let result = match op {
        BinOp::Eq => Value::Bool(loosely_equal(l, r)),
        BinOp::Ne => Value::Bool(!loosely_equal(l, r)),
        BinOp::Lt => Value::Bool(order(l, r)? == Ordering::Less),
        BinOp::Le => Value::Bool(order(l, r)? != Ordering::Greater),
        BinOp::Gt => Value::Bool(order(l, r)? == Ordering::Greater),
        BinOp::Ge => Value::Bool(order(l, r)? != Ordering::Less),
        BinOp::In => Value::Bool(contains(r, l)?),
        BinOp::NotIn => Value::Bool(!contains(r, l)?),
        BinOp::Concat => Value::String(to_text(l) + &to_text(r)),
        BinOp::Add => add(l, r)?,
        BinOp::Sub => arithmetic(l, r, "-", i64::checked_sub, |x, y| x - y)?,
    };
    Ok(result)
}

fn add(l: &Value, r: &Value) -> Result<Value, ExpressionError> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => arithmetic(l, r, "+", i64::checked_add, |x, y| x + y),
    }
}

fn arithmetic(
    l: &Value,
    r: &Value,
    symbol: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, ExpressionError> {
    let (Value::Number(a), Value::Number(b)) = (l, r) else {
        return Err(ExpressionError::Type(format!(
            "unsupported operand types for {symbol}: {} and {}",
            type_name(l),
            type_name(r)
        )));
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return int_op(x, y)
            .map(Value::from)
            .ok_or_else(|| ExpressionError::Type("integer overflow".to_string()));
    }
    let (x, y) = a
        .as_f64()
        .zip(b.as_f64())
        .ok_or_else(|| ExpressionError::Type("number out of range".to_string()))?;
    Ok(Value::from(float_op(x, y)))
}

fn negate(value: &Value) -> Result<Value, ExpressionError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.checked_neg()
                    .map(Value::from)
                    .ok_or_else(|| ExpressionError::Type("integer overflow".to_string()))
            } else {
                Ok(Value::from(-n.as_f64().unwrap_or_default()))
            }
        }
        other => Err(ExpressionError::Type(format!(
            "bad operand type for unary -: {}",
            type_name(other)
        ))),
    }
}

/// Short type name used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "none",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!(0.5)));
        assert!(truthy(&json!({"a": 1})));
    }

    #[test]
    fn test_to_text() {
        assert_eq!(to_text(&json!("EX41")), "EX41");
        assert_eq!(to_text(&json!(42)), "42");
        assert_eq!(to_text(&json!(true)), "True");
        assert_eq!(to_text(&json!(null)), "None");
    }

    #[test]
    fn test_loose_number_equality() {
        assert!(loosely_equal(&json!(1), &json!(1.0)));
        assert!(!loosely_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn test_ordering_requires_matching_types() {
        assert_eq!(order(&json!(2), &json!(10)).unwrap(), Ordering::Less);
        assert_eq!(order(&json!("b"), &json!("a")).unwrap(), Ordering::Greater);
        assert!(matches!(
            order(&json!("a"), &json!(1)),
            Err(ExpressionError::Type(_))
        ));
    }
}
