//! Built-in filters, tests and string methods.
//!
//! The set is closed: anything not listed here is rejected at evaluation
//! time with an `Unknown*` error.

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use super::eval::{to_text, truthy, type_name, Args, Operand};
use crate::error::ExpressionError;

/// Apply the filter `name` to `input`.
///
/// # Errors
///
/// Returns an error for unknown filters, undefined input (except for
/// `default`) or arguments of the wrong type.
pub fn apply_filter(input: Operand, name: &str, args: &Args) -> Result<Operand, ExpressionError> {
    if matches!(name, "default" | "d") {
        let fallback = args
            .get(0, "default_value")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()));
        return Ok(match input {
            Operand::Undefined(_) => Operand::Defined(fallback),
            Operand::Defined(v) if args.flag(1, "boolean") && !truthy(&v) => {
                Operand::Defined(fallback)
            }
            defined @ Operand::Defined(_) => defined,
        });
    }

    let value = input.into_value()?;
    let out = match name {
        "lower" => Value::String(to_text(&value).to_lowercase()),
        "upper" => Value::String(to_text(&value).to_uppercase()),
        "capitalize" => Value::String(capitalize(&to_text(&value))),
        "trim" => Value::String(to_text(&value).trim().to_string()),
        "string" => Value::String(to_text(&value)),
        "replace" => {
            let old = args.string(0, "old", name)?;
            let new = args.string(1, "new", name)?;
            Value::String(to_text(&value).replace(&old, &new))
        }
        "regex_replace" => {
            let pattern = args.string(0, "pattern", name)?;
            let replacement = args.string(1, "replacement", name)?;
            let re = compile(&pattern, args.flag(2, "ignorecase"), args.flag(3, "multiline"))?;
            let replacement = python_backrefs(&replacement);
            Value::String(re.replace_all(&to_text(&value), replacement.as_str()).into_owned())
        }
        "regex_search" => {
            let pattern = args.string(0, "pattern", name)?;
            let re = compile(&pattern, args.flag(1, "ignorecase"), args.flag(2, "multiline"))?;
            re.find(&to_text(&value))
                .map_or(Value::Null, |m| Value::String(m.as_str().to_string()))
        }
        "int" => Value::from(to_int(&value, args)),
        "bool" => Value::Bool(to_bool(&value)),
        "length" | "count" => Value::from(length(&value)?),
        "first" => first_or_last(&value, true)?,
        "last" => first_or_last(&value, false)?,
        "join" => {
            let sep = match args.get(0, "d") {
                Some(v) => to_text(v),
                None => String::new(),
            };
            let Value::Array(items) = &value else {
                return Err(ExpressionError::Type(format!(
                    "join expects a list, got {}",
                    type_name(&value)
                )));
            };
            Value::String(items.iter().map(to_text).collect::<Vec<_>>().join(&sep))
        }
        other => return Err(ExpressionError::UnknownFilter(other.to_string())),
    };
    Ok(Operand::Defined(out))
}

/// Evaluate the test `name` against `input`.
///
/// # Errors
///
/// Returns an error for unknown tests, undefined input (except for
/// `defined`/`undefined`) or invalid regex patterns.
pub fn apply_test(input: &Operand, name: &str, args: &Args) -> Result<bool, ExpressionError> {
    match name {
        "defined" => return Ok(matches!(input, Operand::Defined(_))),
        "undefined" => return Ok(matches!(input, Operand::Undefined(_))),
        _ => {}
    }

    let value = input.clone().into_value()?;
    match name {
        "none" => Ok(value.is_null()),
        "string" => Ok(value.is_string()),
        "number" => Ok(value.is_number()),
        "boolean" => Ok(value.is_boolean()),
        "match" | "search" | "regex" => {
            let pattern = args.string(0, "pattern", name)?;
            let ignorecase = args.flag(1, "ignorecase");
            let multiline = args.flag(2, "multiline");
            let anchored = match name {
                "match" => true,
                "search" => false,
                _ => args
                    .get(3, "match_type")
                    .is_some_and(|m| m.as_str() == Some("match")),
            };
            let pattern = if anchored {
                format!(r"\A(?:{pattern})")
            } else {
                pattern
            };
            let re = compile(&pattern, ignorecase, multiline)?;
            Ok(re.is_match(&to_text(&value)))
        }
        other => Err(ExpressionError::UnknownTest(other.to_string())),
    }
}

/// Call a string method on `target`.
///
/// # Errors
///
/// Returns an error when `target` is not a string, the method is unknown,
/// or arguments are missing.
pub fn call_method(target: &Value, name: &str, args: &Args) -> Result<Value, ExpressionError> {
    let Value::String(s) = target else {
        return Err(ExpressionError::Type(format!(
            "'{}' object has no attribute '{name}'",
            type_name(target)
        )));
    };

    let out = match name {
        "startswith" | "endswith" => {
            let candidates: Vec<String> = match args.get(0, "prefix") {
                Some(Value::Array(items)) => items.iter().map(to_text).collect(),
                Some(v) => vec![to_text(v)],
                None => {
                    return Err(ExpressionError::Type(format!(
                        "{name}() takes at least 1 argument"
                    )))
                }
            };
            let hit = candidates.iter().any(|c| {
                if name == "startswith" {
                    s.starts_with(c.as_str())
                } else {
                    s.ends_with(c.as_str())
                }
            });
            Value::Bool(hit)
        }
        "lower" => Value::String(s.to_lowercase()),
        "upper" => Value::String(s.to_uppercase()),
        "strip" => match args.get(0, "chars") {
            Some(chars) => {
                let chars: Vec<char> = to_text(chars).chars().collect();
                Value::String(s.trim_matches(chars.as_slice()).to_string())
            }
            None => Value::String(s.trim().to_string()),
        },
        "split" => {
            let parts: Vec<Value> = match args.get(0, "sep") {
                Some(sep) if !sep.is_null() => s
                    .split(to_text(sep).as_str())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
                _ => s
                    .split_whitespace()
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            };
            Value::Array(parts)
        }
        "replace" => {
            let old = args.string(0, "old", name)?;
            let new = args.string(1, "new", name)?;
            Value::String(s.replace(&old, &new))
        }
        other => return Err(ExpressionError::UnknownMethod(other.to_string())),
    };
    Ok(out)
}

fn compile(pattern: &str, ignorecase: bool, multiline: bool) -> Result<Regex, ExpressionError> {
    RegexBuilder::new(pattern)
        .case_insensitive(ignorecase)
        .multi_line(multiline)
        .build()
        .map_err(|e| ExpressionError::Regex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

/// Rewrite `\1`-style backreferences into the `${1}` form.
fn python_backrefs(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek().is_some_and(char::is_ascii_digit) => {
                out.push_str("${");
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    out.push(d);
                }
                out.push('}');
            }
            '$' => out.push_str("$$"),
            other => out.push(other),
        }
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_int(value: &Value, args: &Args) -> i64 {
    let fallback = args.get(0, "default").and_then(Value::as_i64).unwrap_or(0);
    match value {
        Value::Bool(b) => i64::from(*b),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(fallback),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(fallback)
        }
        _ => fallback,
    }
}

fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "yes" | "on" | "1" | "true" | "y" | "t"
        ),
        _ => false,
    }
}

fn length(value: &Value) -> Result<usize, ExpressionError> {
    match value {
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(items) => Ok(items.len()),
        Value::Object(map) => Ok(map.len()),
        other => Err(ExpressionError::Type(format!(
            "object of type {} has no length",
            type_name(other)
        ))),
    }
}

fn first_or_last(value: &Value, first: bool) -> Result<Value, ExpressionError> {
    match value {
        Value::Array(items) => {
            let item = if first { items.first() } else { items.last() };
            Ok(item.cloned().unwrap_or(Value::Null))
        }
        Value::String(s) => {
            let c = if first { s.chars().next() } else { s.chars().last() };
            Ok(c.map_or(Value::Null, |c| Value::String(c.to_string())))
        }
        other => Err(ExpressionError::Type(format!(
            "{} is not a sequence",
            type_name(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_backrefs() {
        assert_eq!(python_backrefs(r"\1-\2"), "${1}-${2}");
        assert_eq!(python_backrefs("cost $5"), "cost $$5");
        assert_eq!(python_backrefs("plain"), "plain");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("fSN1"), "Fsn1");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_bool_coercion() {
        assert!(to_bool(&Value::String("Yes".into())));
        assert!(!to_bool(&Value::String("off".into())));
        assert!(to_bool(&Value::from(1)));
    }
}
