//! `{{path}}` template resolution over JSON values.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder regex"))
}

/// Navigate a dot path through objects and arrays.
///
/// Integer components index into arrays (`items.1.name`); anything that does
/// not resolve yields `Null`.
pub fn get_nested_value(data: &Value, path: &str) -> Value {
    if path.is_empty() {
        return data.clone();
    }
    let mut current = data;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => match map.get(part) {
                Some(v) => v,
                None => return Value::Null,
            },
            Value::Array(items) => match part.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}

/// Render a value the way it reads inside a substituted string: strings
/// unquoted, null empty, everything else as JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve one template string.
///
/// When the trimmed input is exactly one `{{path}}`, the raw context value
/// comes back with its type preserved.  Otherwise every placeholder is
/// substituted as a string (null renders empty) and a string is returned.
pub fn resolve_template(template: &str, ctx: &Value) -> Value {
    static FULL_RE: OnceLock<Regex> = OnceLock::new();
    let full = FULL_RE.get_or_init(|| Regex::new(r"^\{\{([^}]+)\}\}$").expect("full-match regex"));

    if let Some(caps) = full.captures(template.trim()) {
        return get_nested_value(ctx, caps[1].trim());
    }

    let substituted = placeholder_re().replace_all(template, |caps: &regex::Captures<'_>| {
        value_to_string(&get_nested_value(ctx, caps[1].trim()))
    });
    Value::String(substituted.into_owned())
}

/// Recursively resolve templates in a JSON structure: strings are resolved,
/// objects and arrays recursed into, other scalars pass through untouched.
pub fn resolve_all(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::String(s) => resolve_template(s, ctx),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_all(v, ctx)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_all(v, ctx)).collect()),
        other => other.clone(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "step_0": { "result": { "temp": 30, "ok": true } },
            "items": [ { "name": "foo" }, { "name": "bar" } ],
            "user": { "name": "ada" },
        })
    }

    // ── get_nested_value ──────────────────────────────────────────────────────

    #[test]
    fn nested_object_navigation() {
        assert_eq!(get_nested_value(&ctx(), "step_0.result.temp"), json!(30));
    }

    #[test]
    fn array_index_navigation() {
        assert_eq!(get_nested_value(&ctx(), "items.1.name"), json!("bar"));
    }

    #[test]
    fn missing_path_is_null() {
        assert_eq!(get_nested_value(&ctx(), "nonexistent.path"), Value::Null);
        assert_eq!(get_nested_value(&ctx(), "items.9.name"), Value::Null);
        assert_eq!(get_nested_value(&ctx(), "items.x"), Value::Null);
    }

    #[test]
    fn empty_path_returns_whole_context() {
        assert_eq!(get_nested_value(&json!({"a": 1}), ""), json!({"a": 1}));
    }

    // ── resolve_template ──────────────────────────────────────────────────────

    #[test]
    fn exact_placeholder_preserves_type() {
        assert_eq!(resolve_template("{{step_0.result.temp}}", &ctx()), json!(30));
        assert_eq!(resolve_template("{{step_0.result.ok}}", &ctx()), json!(true));
        assert_eq!(
            resolve_template("{{step_0.result}}", &ctx()),
            json!({ "temp": 30, "ok": true })
        );
        // Surrounding whitespace still counts as exact.
        assert_eq!(resolve_template("  {{user.name}} ", &ctx()), json!("ada"));
    }

    #[test]
    fn every_json_type_round_trips_through_exact_placeholder() {
        for v in [
            json!(null),
            json!(true),
            json!(42),
            json!(4.5),
            json!("text"),
            json!([1, "two", null]),
            json!({ "k": [1, 2] }),
        ] {
            let c = json!({ "x": v });
            assert_eq!(resolve_template("{{x}}", &c), v.clone(), "value {v}");
        }
    }

    #[test]
    fn mixed_template_substitutes_as_string() {
        assert_eq!(
            resolve_template("Temp is {{step_0.result.temp}}°C", &ctx()),
            json!("Temp is 30°C")
        );
    }

    #[test]
    fn missing_value_substitutes_empty() {
        assert_eq!(resolve_template("x={{nope}}!", &ctx()), json!("x=!"));
    }

    #[test]
    fn template_free_string_passes_through() {
        assert_eq!(resolve_template("no template", &ctx()), json!("no template"));
    }

    #[test]
    fn multiple_placeholders_in_one_string() {
        assert_eq!(
            resolve_template("{{user.name}} saw {{items.0.name}}", &ctx()),
            json!("ada saw foo")
        );
    }

    // ── resolve_all ───────────────────────────────────────────────────────────

    #[test]
    fn recursion_covers_objects_arrays_and_strings() {
        let input = json!({
            "message": "Temp is {{step_0.result.temp}}°C",
            "value": "{{step_0.result.temp}}",
            "nested": { "data": "{{step_0.result}}" },
            "list": [ "{{user.name}}", 7 ],
            "untouched": 3.5,
        });
        let out = resolve_all(&input, &ctx());
        assert_eq!(out["message"], json!("Temp is 30°C"));
        assert_eq!(out["value"], json!(30));
        assert_eq!(out["nested"]["data"], json!({ "temp": 30, "ok": true }));
        assert_eq!(out["list"], json!(["ada", 7]));
        assert_eq!(out["untouched"], json!(3.5));
    }
}
