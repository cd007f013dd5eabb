//! Declarative schema for validating model replies before they are deserialized.
//!
//! Objects are always loose: unknown keys are accepted and kept, so the
//! normalizer can still look at alternate spellings. Validation collects every
//! violation with its field path instead of stopping at the first one.

use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Integer value of `v`; floats with no fractional part (`1.0`) count too.
pub fn as_integer(v: &Value) -> Option<i64> {
  v.as_i64().or_else(|| {
    v.as_f64()
      .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
      .map(|f| f as i64)
  })
}

/// `deserialize_with` adapter matching the `Schema::Int` check.
pub fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
  let v = Value::deserialize(d)?;
  as_integer(&v).ok_or_else(|| serde::de::Error::custom(format!("expected integer, received {v}")))
}

#[derive(Clone, Debug)]
pub enum Schema {
  Any,
  Str { trim: bool, min: usize, max: Option<usize> },
  Int { min: Option<i64>, max: Option<i64> },
  /// A string or a number; models sometimes echo numeric ids.
  StrOrNum,
  Array { items: Box<Schema>, min: usize, max: Option<usize> },
  Object(Vec<Field>),
}

#[derive(Clone, Debug)]
pub struct Field {
  pub name: &'static str,
  pub schema: Schema,
  pub required: bool,
}

impl Field {
  pub fn required(name: &'static str, schema: Schema) -> Self {
    Self { name, schema, required: true }
  }

  pub fn optional(name: &'static str, schema: Schema) -> Self {
    Self { name, schema, required: false }
  }
}

/// One violation found during validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issue {
  pub path: Vec<String>,
  pub message: String,
}

impl Issue {
  pub fn path_str(&self) -> String {
    if self.path.is_empty() { "<root>".into() } else { self.path.join(".") }
  }
}

impl fmt::Display for Issue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.path_str(), self.message)
  }
}

impl Schema {
  pub fn string() -> Self {
    Schema::Str { trim: false, min: 0, max: None }
  }

  /// String whose length bounds apply after trimming.
  pub fn trimmed() -> Self {
    Schema::Str { trim: true, min: 0, max: None }
  }

  pub fn int(min: Option<i64>, max: Option<i64>) -> Self {
    Schema::Int { min, max }
  }

  pub fn array(items: Schema) -> Self {
    Schema::Array { items: Box::new(items), min: 0, max: None }
  }

  pub fn object(fields: Vec<Field>) -> Self {
    Schema::Object(fields)
  }

  /// Minimum length (strings, in chars) or minimum element count (arrays).
  pub fn min(mut self, n: usize) -> Self {
    match &mut self {
      Schema::Str { min, .. } | Schema::Array { min, .. } => *min = n,
      _ => {}
    }
    self
  }

  /// Maximum length (strings, in chars) or maximum element count (arrays).
  pub fn max(mut self, n: usize) -> Self {
    match &mut self {
      Schema::Str { max, .. } | Schema::Array { max, .. } => *max = Some(n),
      _ => {}
    }
    self
  }

  pub fn validate(&self, value: &Value) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut path = Vec::new();
    self.check(value, &mut path, &mut issues);
    issues
  }

  fn check(&self, value: &Value, path: &mut Vec<String>, issues: &mut Vec<Issue>) {
    let mut push = |path: &Vec<String>, message: String| {
      issues.push(Issue { path: path.clone(), message });
    };

    match self {
      Schema::Any => {}
      Schema::Str { trim, min, max } => {
        let Some(s) = value.as_str() else {
          push(path, format!("expected string, received {}", type_name(value)));
          return;
        };
        let len = if *trim { s.trim().chars().count() } else { s.chars().count() };
        if len < *min {
          push(path, format!("too short: expected at least {} character(s)", min));
        }
        if let Some(max) = max {
          if len > *max {
            push(path, format!("too long: expected at most {} character(s)", max));
          }
        }
      }
      Schema::Int { min, max } => {
        let Some(n) = as_integer(value) else {
          push(path, format!("expected integer, received {}", type_name(value)));
          return;
        };
        if let Some(min) = min {
          if n < *min {
            push(path, format!("too small: expected >= {}", min));
          }
        }
        if let Some(max) = max {
          if n > *max {
            push(path, format!("too big: expected <= {}", max));
          }
        }
      }
      Schema::StrOrNum => {
        if !(value.is_string() || value.is_number()) {
          push(path, format!("expected string or number, received {}", type_name(value)));
        }
      }
      Schema::Array { items, min, max } => {
        let Some(arr) = value.as_array() else {
          push(path, format!("expected array, received {}", type_name(value)));
          return;
        };
        if arr.len() < *min {
          push(path, format!("array must contain at least {} element(s)", min));
        }
        if let Some(max) = max {
          if arr.len() > *max {
            push(path, format!("array must contain at most {} element(s)", max));
          }
        }
        for (i, el) in arr.iter().enumerate() {
          path.push(i.to_string());
          items.check(el, path, issues);
          path.pop();
        }
      }
      Schema::Object(fields) => {
        let Some(obj) = value.as_object() else {
          push(path, format!("expected object, received {}", type_name(value)));
          return;
        };
        for field in fields {
          path.push(field.name.to_string());
          match obj.get(field.name) {
            None | Some(Value::Null) if field.required => {
              issues.push(Issue { path: path.clone(), message: "required".into() });
            }
            None | Some(Value::Null) => {}
            Some(v) => field.schema.check(v, path, issues),
          }
          path.pop();
        }
      }
    }
  }
}

fn type_name(v: &Value) -> &'static str {
  match v {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
