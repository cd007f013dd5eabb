//! Domain models: vocabulary lists/items, practice sessions/problems/attempts.
//!
//! Field names follow the relational store (snake_case); the HTTP layer
//! converts to camelCase in `protocol`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap of items per list, enforced by the application before insert.
pub const MAX_ITEMS_PER_LIST: usize = 100;
/// A problem exercises at most this many vocabulary items.
pub const MAX_TARGETS_PER_PROBLEM: usize = 3;
pub const MIN_PROBLEM_COUNT: u32 = 1;
pub const MAX_PROBLEM_COUNT: u32 = 50;
pub const DEFAULT_PROBLEM_COUNT: u32 = 10;

/// JLPT difficulty tier (n1 hardest .. n5 easiest).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JlptLevel {
  N1,
  N2,
  #[default]
  N3,
  N4,
  N5,
}

impl JlptLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      JlptLevel::N1 => "n1",
      JlptLevel::N2 => "n2",
      JlptLevel::N3 => "n3",
      JlptLevel::N4 => "n4",
      JlptLevel::N5 => "n5",
    }
  }

  /// Human label used inside prompts, e.g. "JLPT N3".
  pub fn label(&self) -> String {
    format!("JLPT {}", self.as_str().to_uppercase())
  }

  /// Lenient parse for values read back from the store; unknown values yield None.
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_lowercase().as_str() {
      "n1" => Some(JlptLevel::N1),
      "n2" => Some(JlptLevel::N2),
      "n3" => Some(JlptLevel::N3),
      "n4" => Some(JlptLevel::N4),
      "n5" => Some(JlptLevel::N5),
      _ => None,
    }
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
  #[default]
  Manual,
  Scenario,
}

/// Self-reported grading outcome of one attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
  Perfect,
  Acceptable,
  NeedsFix,
}

impl Verdict {
  pub fn as_str(&self) -> &'static str {
    match self {
      Verdict::Perfect => "perfect",
      Verdict::Acceptable => "acceptable",
      Verdict::NeedsFix => "needs_fix",
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VocabList {
  pub id: String,
  pub user_id: String,
  pub name: String,
  #[serde(default)]
  pub kind: ListKind,
  #[serde(default)]
  pub scenario_prompt: Option<String>,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VocabItem {
  pub id: String,
  pub user_id: String,
  pub list_id: String,
  pub ja_surface: String,
  #[serde(default)]
  pub ja_reading_hira: Option<String>,
  pub ko_meaning: String,
  #[serde(default)]
  pub memo: Option<String>,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PracticeSession {
  pub id: String,
  pub user_id: String,
  pub list_id: String,
  #[serde(default)]
  pub problem_count: Option<i64>,
  #[serde(default)]
  pub jlpt_level: Option<String>,
  #[serde(default)]
  pub scenario_prompt: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl PracticeSession {
  /// Requested problem count clamped to [1, 50]; missing means 10.
  pub fn effective_problem_count(&self) -> u32 {
    let raw = self.problem_count.unwrap_or(DEFAULT_PROBLEM_COUNT as i64);
    raw.clamp(MIN_PROBLEM_COUNT as i64, MAX_PROBLEM_COUNT as i64) as u32
  }

  pub fn effective_jlpt_level(&self) -> JlptLevel {
    self.jlpt_level.as_deref().and_then(JlptLevel::parse).unwrap_or_default()
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PracticeProblem {
  pub id: String,
  pub user_id: String,
  pub session_id: String,
  pub prompt_ko: String,
  pub target_item_ids: Vec<String>,
  pub model_answer_ja: String,
  #[serde(default)]
  pub alt_answer_ja: Option<String>,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PracticeAttempt {
  pub id: String,
  pub user_id: String,
  pub problem_id: String,
  pub user_answer_ja: String,
  pub verdict: Verdict,
  #[serde(default)]
  pub feedback: Option<String>,
  pub created_at: DateTime<Utc>,
}

// --- Insert payloads (ids and timestamps are assigned by the store) ---

#[derive(Clone, Debug, Serialize)]
pub struct NewVocabList {
  pub user_id: String,
  pub name: String,
  pub kind: ListKind,
  pub scenario_prompt: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct NewVocabItem {
  pub user_id: String,
  pub list_id: String,
  pub ja_surface: String,
  pub ja_reading_hira: Option<String>,
  pub ko_meaning: String,
  pub memo: Option<String>,
  pub is_active: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct NewPracticeSession {
  pub user_id: String,
  pub list_id: String,
  pub problem_count: i64,
  pub jlpt_level: JlptLevel,
  pub scenario_prompt: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewPracticeProblem {
  pub user_id: String,
  pub session_id: String,
  pub prompt_ko: String,
  pub target_item_ids: Vec<String>,
  pub model_answer_ja: String,
  pub alt_answer_ja: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct NewPracticeAttempt {
  pub user_id: String,
  pub problem_id: String,
  pub user_answer_ja: String,
  pub verdict: Verdict,
  pub feedback: Option<String>,
}
