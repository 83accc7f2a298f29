// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `{{placeholder}}` / `{{#helper arg...}}` mini-syntax renderer (§4.5).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::TemplateError;

/// Render `template` against `context`, resolving every `{{...}}` span.
pub fn render(template: &str, context: &BTreeMap<String, Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(TemplateError::Parse(format!(
                "unterminated placeholder near {:?}",
                &after[..after.len().min(32)]
            )));
        };
        let expr = after[..end].trim();
        out.push_str(&resolve(expr, context)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve(expr: &str, context: &BTreeMap<String, Value>) -> Result<String, TemplateError> {
    if let Some(helper_expr) = expr.strip_prefix('#') {
        let mut parts = helper_expr.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| TemplateError::Parse("helper expression missing name".to_string()))?;
        let args: Vec<&str> = parts.collect();
        call_helper(name, &args, context)
    } else {
        Ok(lookup(expr, context).map(display_value).unwrap_or_default())
    }
}

fn lookup<'a>(path: &str, context: &'a BTreeMap<String, Value>) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let root = segments.next()?;
    let mut current = context.get(root)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn arg_value<'a>(arg: &'a str, context: &'a BTreeMap<String, Value>) -> Value {
    if let Some(stripped) = arg.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Value::String(stripped.to_string());
    }
    if let Ok(n) = arg.parse::<f64>() {
        return serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null);
    }
    lookup(arg, context).cloned().unwrap_or(Value::Null)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn call_helper(
    name: &str,
    args: &[&str],
    context: &BTreeMap<String, Value>,
) -> Result<String, TemplateError> {
    match name {
        "upper" => Ok(display_value(&arg_value(require(args, 0)?, context)).to_uppercase()),
        "lower" => Ok(display_value(&arg_value(require(args, 0)?, context)).to_lowercase()),
        "trim" => Ok(display_value(&arg_value(require(args, 0)?, context)).trim().to_string()),
        "add" => {
            let a = as_f64(&arg_value(require(args, 0)?, context));
            let b = as_f64(&arg_value(require(args, 1)?, context));
            Ok(format_number(a + b))
        }
        "sub" => {
            let a = as_f64(&arg_value(require(args, 0)?, context));
            let b = as_f64(&arg_value(require(args, 1)?, context));
            Ok(format_number(a - b))
        }
        "default" => {
            let value = arg_value(require(args, 0)?, context);
            if matches!(value, Value::Null) {
                Ok(display_value(&arg_value(require(args, 1)?, context)))
            } else {
                Ok(display_value(&value))
            }
        }
        "at" => {
            let array = arg_value(require(args, 0)?, context);
            let index = as_f64(&arg_value(require(args, 1)?, context)) as usize;
            Ok(array
                .as_array()
                .and_then(|a| a.get(index))
                .map(display_value)
                .unwrap_or_default())
        }
        "formatArray" => {
            let array = arg_value(require(args, 0)?, context);
            let sep = args
                .get(1)
                .map(|a| display_value(&arg_value(a, context)))
                .unwrap_or_else(|| ", ".to_string());
            Ok(array
                .as_array()
                .map(|items| items.iter().map(display_value).collect::<Vec<_>>().join(&sep))
                .unwrap_or_default())
        }
        "ordinal" => {
            let n = as_f64(&arg_value(require(args, 0)?, context)) as i64;
            Ok(ordinal(n))
        }
        other => Err(TemplateError::Execution(format!("unknown helper {other}"))),
    }
}

fn require<'a>(args: &[&'a str], index: usize) -> Result<&'a str, TemplateError> {
    args.get(index)
        .copied()
        .ok_or_else(|| TemplateError::Execution(format!("helper missing argument {index}")))
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

fn ordinal(n: i64) -> String {
    let suffix = match (n % 100, n % 10) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> BTreeMap<String, Value> {
        let mut ctx = BTreeMap::new();
        ctx.insert("name".to_string(), json!("VM-1"));
        ctx.insert("count".to_string(), json!(3));
        ctx.insert("items".to_string(), json!(["a", "b", "c"]));
        ctx
    }

    #[test]
    fn renders_plain_placeholder() {
        assert_eq!(render("hello {{name}}", &ctx()).unwrap(), "hello VM-1");
    }

    #[test]
    fn missing_placeholder_renders_empty() {
        assert_eq!(render("x{{missing}}y", &ctx()).unwrap(), "xy");
    }

    #[test]
    fn unterminated_placeholder_is_parse_error() {
        assert!(render("hello {{name", &ctx()).is_err());
    }

    #[test]
    fn upper_and_lower_helpers() {
        assert_eq!(render("{{#upper name}}", &ctx()).unwrap(), "VM-1");
        assert_eq!(render("{{#lower name}}", &ctx()).unwrap(), "vm-1");
    }

    #[test]
    fn arithmetic_helpers() {
        assert_eq!(render("{{#add count 2}}", &ctx()).unwrap(), "5");
        assert_eq!(render("{{#sub count 1}}", &ctx()).unwrap(), "2");
    }

    #[test]
    fn array_access_and_format() {
        assert_eq!(render("{{#at items 1}}", &ctx()).unwrap(), "b");
        assert_eq!(render("{{#formatArray items}}", &ctx()).unwrap(), "a, b, c");
    }

    #[test]
    fn default_falls_back_on_missing() {
        assert_eq!(render("{{#default missing \"n/a\"}}", &ctx()).unwrap(), "n/a");
        assert_eq!(render("{{#default name \"n/a\"}}", &ctx()).unwrap(), "VM-1");
    }

    #[test]
    fn ordinal_helper() {
        assert_eq!(render("{{#ordinal count}}", &ctx()).unwrap(), "3rd");
        assert_eq!(ordinal(11), "11th");
        assert_eq!(ordinal(1), "1st");
    }
}
