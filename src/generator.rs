//! Problem generation for an existing session.
//!
//! One model call produces `problem_count` problems that target the list's
//! active items. Models sometimes echo a Japanese surface instead of an id, so
//! surfaces are accepted as aliases. A problem left without usable targets gets
//! the first valid item id. Any problem missing its prompt or answer rejects
//! the whole batch before anything is inserted.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::domain::{NewPracticeProblem, MAX_ITEMS_PER_LIST};
use crate::error::AppError;
use crate::normalize::{
  normalize_target_ids, pick_fallback_target_ids, pick_value, NormalizedProblem, RawObject, ValidIds,
  ALT_ANSWER_JA, MODEL_ANSWER_JA, PROMPT_KO, TARGET_ITEM_IDS,
};
use crate::openai::ChatMessage;
use crate::scenario::DETAILS_CLIP;
use crate::schema::{Field, Schema};
use crate::state::AppState;
use crate::util::{clip, fill_template};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationMode {
  /// Plain vocabulary list; problems may carry an alternate answer.
  Standard,
  /// Session created from a scenario: its prompt is added as system context
  /// and no alternate answer is requested.
  Scenario,
}

impl GenerationMode {
  fn with_alt(self) -> bool {
    matches!(self, GenerationMode::Standard)
  }
}

#[derive(Deserialize)]
struct GeneratedProblems {
  problems: Vec<RawObject>,
}

fn generated_schema(count: usize, mode: GenerationMode) -> Schema {
  let mut fields: Vec<Field> = Vec::new();
  let mut text_fields = PROMPT_KO.iter().chain(MODEL_ANSWER_JA).collect::<Vec<_>>();
  if mode.with_alt() {
    text_fields.extend(ALT_ANSWER_JA);
  }
  for k in text_fields {
    fields.push(Field::optional(*k, Schema::string().min(1)));
  }
  for k in TARGET_ITEM_IDS {
    fields.push(Field::optional(*k, Schema::array(Schema::StrOrNum)));
  }
  Schema::object(vec![Field::required("problems", Schema::array(Schema::object(fields)).min(count))])
}

/// Generate and insert problems for `session_id`. Returns how many were inserted.
#[instrument(level = "info", skip_all, fields(%owner, %session_id, ?mode))]
pub async fn generate_problems_for_session(
  state: &AppState,
  owner: &str,
  session_id: &str,
  mode: GenerationMode,
) -> Result<usize, AppError> {
  let store = &state.store;
  let session = store
    .get_session(owner, session_id)
    .await?
    .ok_or_else(|| AppError::NotFound("Session not found".into()))?;

  let scenario_prompt = match mode {
    GenerationMode::Standard => None,
    GenerationMode::Scenario => Some(
      session
        .scenario_prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("이 세션은 상황별 단어장 세션이 아닙니다.".into()))?,
    ),
  };

  let items = store.active_items(owner, &session.list_id, MAX_ITEMS_PER_LIST).await?;
  if items.is_empty() {
    return Err(AppError::BadRequest("단어장에 활성 표현이 없습니다.".into()));
  }

  let count = session.effective_problem_count() as usize;
  let count_s = count.to_string();
  let jlpt_label = session.effective_jlpt_level().label();
  let system = match scenario_prompt {
    Some(sp) => fill_template(
      &state.prompts.scenario_session_system,
      &[("problem_count", &count_s), ("jlpt_label", &jlpt_label), ("scenario_prompt", sp)],
    ),
    None => fill_template(&state.prompts.problems_system, &[("problem_count", &count_s), ("jlpt_label", &jlpt_label)]),
  };

  let vocab: Vec<serde_json::Value> = items
    .iter()
    .map(|it| match mode {
      GenerationMode::Standard => json!({
        "id": it.id,
        "jaSurface": it.ja_surface,
        "jaReadingHira": it.ja_reading_hira,
        "koMeaning": it.ko_meaning,
        "memo": it.memo,
      }),
      GenerationMode::Scenario => json!({
        "id": it.id,
        "jaSurface": it.ja_surface,
        "koMeaning": it.ko_meaning,
        "memo": it.memo,
      }),
    })
    .collect();
  let user = json!({ "vocabItems": vocab });
  let messages = [ChatMessage::system(system), ChatMessage::user(format!("{:#}", user))];
  let schema = generated_schema(count, mode);

  let llm = &state.llm;
  let (messages, schema) = (&messages, &schema);
  let reply = state
    .models
    .generate
    .run("session_problems", move |model| async move {
      llm.chat_json::<GeneratedProblems>(&model, messages, schema).await
    })
    .await?;

  let mut raw = reply.problems;
  raw.truncate(count);

  let valid: ValidIds = items.iter().map(|it| it.id.clone()).collect();
  let by_surface: HashMap<String, String> =
    items.iter().map(|it| (it.ja_surface.clone(), it.id.clone())).collect();

  let mut payload: Vec<NewPracticeProblem> = Vec::with_capacity(raw.len());
  let mut normalized: Vec<NormalizedProblem> = Vec::with_capacity(raw.len());
  for (i, p) in raw.iter().enumerate() {
    let problem = NormalizedProblem::from_raw(p, mode.with_alt());
    let mut targets = normalize_target_ids(pick_value(p, TARGET_ITEM_IDS), &valid, Some(&by_surface));
    if targets.is_empty() {
      targets = pick_fallback_target_ids(&valid);
      debug!(target: "pipeline", index = i + 1, "No usable target ids; using fallback item");
    }
    payload.push(NewPracticeProblem {
      user_id: owner.to_string(),
      session_id: session.id.clone(),
      prompt_ko: problem.prompt_ko.clone(),
      target_item_ids: targets,
      model_answer_ja: problem.model_answer_ja.clone(),
      alt_answer_ja: problem.alt_answer_ja.clone(),
    });
    normalized.push(problem);
  }

  let incomplete = normalized.iter().any(|p| !p.is_complete());
  let untargeted = payload.iter().any(|p| p.target_item_ids.is_empty());
  if incomplete || untargeted {
    let reason = if incomplete {
      "missing promptKo/modelAnswerJa after normalization"
    } else {
      "missing targetItemIds after normalization"
    };
    warn!(target: "pipeline", reason, "Generated batch rejected");
    let details = if llm.debug_raw() {
      let blob = json!({
        "reason": reason,
        "normalizedPreview": &payload[..payload.len().min(3)],
        "rawPreview": &raw[..raw.len().min(3)],
      });
      format!(" details={}", clip(&blob.to_string(), DETAILS_CLIP))
    } else {
      String::new()
    };
    return Err(AppError::SchemaMismatch(format!("OpenAI response schema mismatch.{details}")));
  }

  let inserted = payload.len();
  store.insert_problems(payload).await?;
  info!(target: "pipeline", inserted, "Problems inserted");
  Ok(inserted)
}
