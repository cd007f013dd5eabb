//! Reconciles loosely-shaped model output into canonical records.
//!
//! Each logical field has an ordered list of accepted spellings: camelCase
//! first, then snake_case, then shortened aliases. Nothing here fails; empty
//! results are returned and the orchestrators decide what is fatal.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::domain::MAX_TARGETS_PER_PROBLEM;

pub type RawObject = Map<String, Value>;

pub const PROMPT_KO: &[&str] = &["promptKo", "prompt_ko", "prompt"];
pub const MODEL_ANSWER_JA: &[&str] = &["modelAnswerJa", "model_answer_ja", "modelAnswer", "model_answer"];
pub const ALT_ANSWER_JA: &[&str] = &["altAnswerJa", "alt_answer_ja", "altAnswer", "alt_answer"];
pub const TARGET_ITEM_IDS: &[&str] = &["targetItemIds", "target_item_ids", "targetIds", "target_ids"];

/// First non-empty string under any of `keys` (in order), trimmed; "" if none.
pub fn pick_field(obj: &RawObject, keys: &[&str]) -> String {
  keys
    .iter()
    .filter_map(|k| obj.get(*k).and_then(Value::as_str))
    .map(str::trim)
    .find(|s| !s.is_empty())
    .map(String::from)
    .unwrap_or_default()
}

/// First present, non-null value under any of `keys`.
pub fn pick_value<'a>(obj: &'a RawObject, keys: &[&str]) -> Option<&'a Value> {
  keys.iter().filter_map(|k| obj.get(*k)).find(|v| !v.is_null())
}

/// Valid target ids in a stable order (the order decides the fallback id).
#[derive(Clone, Debug, Default)]
pub struct ValidIds {
  order: Vec<String>,
  set: HashSet<String>,
}

impl ValidIds {
  pub fn contains(&self, id: &str) -> bool {
    self.set.contains(id)
  }

  pub fn first(&self) -> Option<&str> {
    self.order.first().map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }
}

impl FromIterator<String> for ValidIds {
  fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
    let mut ids = ValidIds::default();
    for id in iter {
      if ids.set.insert(id.clone()) {
        ids.order.push(id);
      }
    }
    ids
  }
}

/// Keep first occurrences only, stop at `cap` entries.
pub fn dedupe_capped<I: IntoIterator<Item = String>>(iter: I, cap: usize) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for v in iter {
    if out.len() >= cap {
      break;
    }
    if !out.contains(&v) {
      out.push(v);
    }
  }
  out
}

/// Normalize a raw target list: stringify + trim each entry, resolve surface
/// aliases to ids, keep only valid ids, dedupe, cap at 3.
pub fn normalize_target_ids(
  raw: Option<&Value>,
  valid: &ValidIds,
  aliases: Option<&HashMap<String, String>>,
) -> Vec<String> {
  let Some(arr) = raw.and_then(Value::as_array) else {
    return Vec::new();
  };

  let resolved = arr
    .iter()
    .filter_map(|v| match v {
      Value::String(s) => Some(s.trim().to_string()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    })
    .map(|v| {
      if valid.contains(&v) {
        v
      } else {
        aliases.and_then(|m| m.get(&v)).cloned().unwrap_or(v)
      }
    })
    .filter(|v| valid.contains(v));

  dedupe_capped(resolved, MAX_TARGETS_PER_PROBLEM)
}

/// Single-element fallback (the first valid id) for problems with no usable targets.
pub fn pick_fallback_target_ids(valid: &ValidIds) -> Vec<String> {
  valid.first().map(|id| vec![id.to_string()]).unwrap_or_default()
}

/// Canonical shape of one generated problem before persistence.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct NormalizedProblem {
  pub prompt_ko: String,
  pub model_answer_ja: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub alt_answer_ja: Option<String>,
}

impl NormalizedProblem {
  pub fn from_raw(obj: &RawObject, with_alt: bool) -> Self {
    let alt = if with_alt { pick_field(obj, ALT_ANSWER_JA) } else { String::new() };
    Self {
      prompt_ko: pick_field(obj, PROMPT_KO),
      model_answer_ja: pick_field(obj, MODEL_ANSWER_JA),
      alt_answer_ja: if alt.is_empty() { None } else { Some(alt) },
    }
  }

  pub fn is_complete(&self) -> bool {
    !self.prompt_ko.is_empty() && !self.model_answer_ja.is_empty()
  }
}
