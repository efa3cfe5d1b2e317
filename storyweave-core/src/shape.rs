//! Shape descriptors for structured model output.
//!
//! A [`Shape`] says what a reply must look like: required fields,
//! cardinalities and value ranges. It renders to a JSON Schema for backends
//! that accept one, and [`Shape::conform`] checks and normalizes a reply:
//!
//! - numbers are clamped to their bounds and coerced to the declared type,
//!   and anything non-numeric becomes the shape's neutral value;
//! - lists longer than `max` are truncated, lists shorter than `min` fail;
//! - unknown record keys are dropped.

use crate::error::ValidationError;
use serde_json::{json, Map as JsonMap, Value};

/// Formal descriptor of an expected value.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Text { min_len: usize },
    Integer { min: i64, max: i64, neutral: i64 },
    Number { min: f64, max: f64, neutral: f64 },
    Bool,
    List { item: Box<Shape>, min: usize, max: usize },
    Record { fields: Vec<Field> },
    Map { value: Box<Shape> },
    OneOf(Vec<String>),
}

/// A named field of a [`Shape::Record`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub shape: Shape,
    pub required: bool,
}

impl Field {
    pub fn required(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            shape,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            shape,
            required: false,
        }
    }
}

impl Shape {
    /// Non-empty text.
    pub fn text() -> Self {
        Shape::Text { min_len: 1 }
    }

    pub fn integer(min: i64, max: i64, neutral: i64) -> Self {
        Shape::Integer { min, max, neutral }
    }

    pub fn number(min: f64, max: f64, neutral: f64) -> Self {
        Shape::Number { min, max, neutral }
    }

    pub fn list(item: Shape, min: usize, max: usize) -> Self {
        Shape::List {
            item: Box::new(item),
            min,
            max,
        }
    }

    /// A list of exactly `n` items.
    pub fn exactly(item: Shape, n: usize) -> Self {
        Self::list(item, n, n)
    }

    pub fn record(fields: Vec<Field>) -> Self {
        Shape::Record { fields }
    }

    pub fn map(value: Shape) -> Self {
        Shape::Map {
            value: Box::new(value),
        }
    }

    pub fn one_of<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Shape::OneOf(options.into_iter().map(Into::into).collect())
    }

    /// Render as a JSON Schema document.
    pub fn to_json_schema(&self) -> Value {
        match self {
            Shape::Text { min_len } => json!({ "type": "string", "minLength": min_len }),
            Shape::Integer { min, max, .. } => {
                json!({ "type": "integer", "minimum": min, "maximum": max })
            }
            Shape::Number { min, max, .. } => {
                json!({ "type": "number", "minimum": min, "maximum": max })
            }
            Shape::Bool => json!({ "type": "boolean" }),
            Shape::List { item, min, max } => json!({
                "type": "array",
                "items": item.to_json_schema(),
                "minItems": min,
                "maxItems": max,
            }),
            Shape::Record { fields } => {
                let properties: JsonMap<String, Value> = fields
                    .iter()
                    .map(|f| (f.name.clone(), f.shape.to_json_schema()))
                    .collect();
                let required: Vec<&str> = fields
                    .iter()
                    .filter(|f| f.required)
                    .map(|f| f.name.as_str())
                    .collect();
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                })
            }
            Shape::Map { value } => json!({
                "type": "object",
                "additionalProperties": value.to_json_schema(),
            }),
            Shape::OneOf(options) => json!({ "type": "string", "enum": options }),
        }
    }

    /// Check `value` against this shape and return its normalized form.
    pub fn conform(&self, value: Value) -> Result<Value, ValidationError> {
        self.conform_at("$", value)
    }

    fn conform_at(&self, path: &str, value: Value) -> Result<Value, ValidationError> {
        match self {
            Shape::Text { min_len } => {
                let text = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(ValidationError::new(
                            path,
                            format!("expected text, found {}", type_name(&other)),
                        ))
                    }
                };
                let text = text.trim().to_string();
                if text.chars().count() < *min_len {
                    return Err(ValidationError::new(
                        path,
                        format!("text shorter than {min_len} characters"),
                    ));
                }
                Ok(Value::String(text))
            }

            Shape::Integer { min, max, neutral } => {
                let n = numeric(&value)
                    .map(|f| (f.round() as i64).clamp(*min, *max))
                    .unwrap_or(*neutral);
                Ok(Value::from(n))
            }

            Shape::Number { min, max, neutral } => {
                let n = numeric(&value)
                    .filter(|f| f.is_finite())
                    .map(|f| f.clamp(*min, *max))
                    .unwrap_or(*neutral);
                Ok(json!(n))
            }

            Shape::Bool => match value {
                Value::Bool(b) => Ok(Value::Bool(b)),
                Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
                Value::String(s) if s.trim().eq_ignore_ascii_case("false") => {
                    Ok(Value::Bool(false))
                }
                other => Err(ValidationError::new(
                    path,
                    format!("expected boolean, found {}", type_name(&other)),
                )),
            },

            Shape::List { item, min, max } => {
                let Value::Array(items) = value else {
                    return Err(ValidationError::new(
                        path,
                        format!("expected list, found {}", type_name(&value)),
                    ));
                };
                if items.len() < *min {
                    return Err(ValidationError::new(
                        path,
                        format!("expected at least {min} items, found {}", items.len()),
                    ));
                }
                items
                    .into_iter()
                    .take(*max)
                    .enumerate()
                    .map(|(i, v)| item.conform_at(&format!("{path}[{i}]"), v))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }

            Shape::Record { fields } => {
                let Value::Object(mut object) = value else {
                    return Err(ValidationError::new(
                        path,
                        format!("expected object, found {}", type_name(&value)),
                    ));
                };
                let mut out = JsonMap::new();
                for field in fields {
                    let field_path = format!("{path}.{}", field.name);
                    match object.remove(&field.name).filter(|v| !v.is_null()) {
                        Some(v) => {
                            out.insert(field.name.clone(), field.shape.conform_at(&field_path, v)?);
                        }
                        None if field.required => match field.shape.neutral() {
                            Some(neutral) => {
                                out.insert(field.name.clone(), neutral);
                            }
                            None => {
                                return Err(ValidationError::new(field_path, "missing required field"))
                            }
                        },
                        None => {}
                    }
                }
                Ok(Value::Object(out))
            }

            Shape::Map { value: value_shape } => {
                let Value::Object(object) = value else {
                    return Err(ValidationError::new(
                        path,
                        format!("expected object, found {}", type_name(&value)),
                    ));
                };
                object
                    .into_iter()
                    .map(|(k, v)| {
                        let conformed = value_shape.conform_at(&format!("{path}.{k}"), v)?;
                        Ok((k, conformed))
                    })
                    .collect::<Result<JsonMap<_, _>, _>>()
                    .map(Value::Object)
            }

            Shape::OneOf(options) => {
                let found = value.as_str().map(str::trim).unwrap_or_default();
                options
                    .iter()
                    .find(|o| o.eq_ignore_ascii_case(found))
                    .map(|o| Value::String(o.clone()))
                    .ok_or_else(|| {
                        ValidationError::new(path, format!("'{found}' is not one of {options:?}"))
                    })
            }
        }
    }

    /// Value substituted for a missing numeric field.
    fn neutral(&self) -> Option<Value> {
        match self {
            Shape::Integer { neutral, .. } => Some(Value::from(*neutral)),
            Shape::Number { neutral, .. } => Some(json!(neutral)),
            _ => None,
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Recover the first well-formed JSON object or array embedded in `text`.
///
/// Handles replies wrapped in prose or code fences. Brackets inside string
/// literals are ignored when looking for the end of a candidate.
pub fn extract_json(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find(['{', '[']) {
        let open = start + offset;
        if let Some(close) = matching_close(bytes, open) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[open..=close]) {
                return Some(value);
            }
        }
        start = open + 1;
    }
    None
}

fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traits_shape() -> Shape {
        Shape::record(vec![
            Field::required("bravery", Shape::integer(1, 10, 5)),
            Field::required("curiosity", Shape::integer(1, 10, 5)),
        ])
    }

    #[test]
    fn test_numbers_clamped_and_coerced() {
        let out = traits_shape()
            .conform(json!({ "bravery": 14.6, "curiosity": "3" }))
            .unwrap();
        assert_eq!(out, json!({ "bravery": 10, "curiosity": 3 }));
    }

    #[test]
    fn test_non_numeric_becomes_neutral() {
        let out = traits_shape()
            .conform(json!({ "bravery": "very", "curiosity": null }))
            .unwrap();
        assert_eq!(out, json!({ "bravery": 5, "curiosity": 5 }));
    }

    #[test]
    fn test_unknown_keys_dropped() {
        let shape = Shape::record(vec![Field::required("name", Shape::text())]);
        let out = shape
            .conform(json!({ "name": " Ada ", "favorite_color": "blue" }))
            .unwrap();
        assert_eq!(out, json!({ "name": "Ada" }));
    }

    #[test]
    fn test_missing_required_text_fails() {
        let shape = Shape::record(vec![
            Field::required("name", Shape::text()),
            Field::optional("nickname", Shape::text()),
        ]);
        let err = shape.conform(json!({ "nickname": "Al" })).unwrap_err();
        assert_eq!(err.path, "$.name");

        let out = shape.conform(json!({ "name": "Alan" })).unwrap();
        assert_eq!(out, json!({ "name": "Alan" }));
    }

    #[test]
    fn test_list_cardinality() {
        let shape = Shape::list(Shape::text(), 2, 3);
        assert!(shape.conform(json!(["a"])).is_err());
        assert_eq!(
            shape.conform(json!(["a", "b", "c", "d"])).unwrap(),
            json!(["a", "b", "c"])
        );
    }

    #[test]
    fn test_nested_error_path() {
        let shape = Shape::record(vec![Field::required(
            "npcs",
            Shape::list(
                Shape::record(vec![Field::required("name", Shape::text())]),
                1,
                6,
            ),
        )]);
        let err = shape
            .conform(json!({ "npcs": [{ "name": "A" }, { "name": "" }] }))
            .unwrap_err();
        assert_eq!(err.path, "$.npcs[1].name");
    }

    #[test]
    fn test_map_and_one_of() {
        let deltas = Shape::map(Shape::number(-0.5, 0.5, 0.0));
        let out = deltas.conform(json!({ "bravery": 2.0, "trust": "x" })).unwrap();
        assert_eq!(out, json!({ "bravery": 0.5, "trust": 0.0 }));

        let kind = Shape::one_of(["region", "subarea"]);
        assert_eq!(kind.conform(json!("Subarea")).unwrap(), json!("subarea"));
        assert!(kind.conform(json!("city")).is_err());
    }

    #[test]
    fn test_json_schema() {
        let schema = Shape::record(vec![
            Field::required("moved", Shape::Bool),
            Field::optional("new_location", Shape::text()),
        ])
        .to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["moved"]));
        assert_eq!(schema["properties"]["moved"]["type"], "boolean");
    }

    #[test]
    fn test_extract_json_from_prose() {
        let text = "Sure! Here you go:\n```json\n{\"a\": [1, 2], \"b\": \"}\"}\n```\nEnjoy.";
        assert_eq!(extract_json(text), Some(json!({ "a": [1, 2], "b": "}" })));
    }

    #[test]
    fn test_extract_json_skips_broken_candidates() {
        let text = "{not json} then [\"Old Mill\", \"Harbor\"]";
        assert_eq!(extract_json(text), Some(json!(["Old Mill", "Harbor"])));
        assert_eq!(extract_json("no structure here"), None);
    }
}
