//! Scenario vocabulary pipeline.
//!
//! A free-text scenario becomes a persisted `scenario` list in two sequential
//! model calls:
//!   1. problems (Korean prompt + Japanese model answer) on the generate model,
//!   2. vocabulary extraction on the autofill model, where every item carries a
//!      synthetic key ("w1", "w2", ...) and every problem index names the keys
//!      its answer uses.
//!
//! Keys are resolved to real item ids only after the items are inserted.
//! Once the list row exists, any later failure deletes it again; the store
//! cascades to whatever was inserted beneath it. A crash between steps can
//! still leave an orphaned list.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
  JlptLevel, ListKind, NewPracticeProblem, NewPracticeSession, NewVocabItem, NewVocabList, MAX_ITEMS_PER_LIST,
  MAX_TARGETS_PER_PROBLEM,
};
use crate::error::AppError;
use crate::normalize::{dedupe_capped, NormalizedProblem, RawObject, MODEL_ANSWER_JA, PROMPT_KO};
use crate::openai::ChatMessage;
use crate::schema::{Field, Schema};
use crate::state::AppState;
use crate::util::{clip, collapse_whitespace, fill_template, take_chars};

/// Max chars of the diagnostic blob appended to gate failures in debug mode.
pub(crate) const DETAILS_CLIP: usize = 1800;
const LIST_NAME_MAX: usize = 50;
const FALLBACK_NAME_PROMPT_CHARS: usize = 30;
const FALLBACK_NAME_LABEL: &str = "상황: ";

#[derive(Clone, Copy, Debug)]
pub struct ScenarioRequest<'a> {
  pub owner: &'a str,
  pub scenario_prompt: &'a str,
  pub problem_count: u32,
  pub jlpt: JlptLevel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioCreated {
  pub list_id: String,
  pub session_id: String,
}

#[derive(Deserialize)]
struct ScenarioProblems {
  problems: Vec<RawObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Extraction {
  list_name: String,
  items: Vec<ExtractedItem>,
  problem_targets: Vec<ProblemTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractedItem {
  key: String,
  ja_surface: String,
  ko_meaning: String,
  #[serde(default)]
  memo: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProblemTarget {
  #[serde(deserialize_with = "crate::schema::integer")]
  index: i64,
  target_item_keys: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct PlannedItem {
  key: String,
  ja_surface: String,
  ko_meaning: String,
  memo: Option<String>,
}

/// Everything stage 2 decided, before anything is persisted.
#[derive(Debug)]
struct VocabPlan {
  list_name: String,
  /// Deduplicated by surface, first occurrence wins.
  items: Vec<PlannedItem>,
  /// Every key seen, including keys whose item was dropped as a duplicate.
  key_to_surface: BTreeMap<String, String>,
  /// Resolved keys per problem, in problem order. Never empty.
  targets: Vec<Vec<String>>,
}

fn problems_schema(count: usize) -> Schema {
  let text = || Schema::string().min(1);
  Schema::object(vec![Field::required(
    "problems",
    Schema::array(Schema::object(
      PROMPT_KO
        .iter()
        .chain(MODEL_ANSWER_JA)
        .map(|k| Field::optional(*k, text()))
        .collect(),
    ))
    .min(count),
  )])
}

fn extraction_schema(count: usize) -> Schema {
  Schema::object(vec![
    Field::required("listName", Schema::trimmed().min(1).max(80)),
    Field::required(
      "items",
      Schema::array(Schema::object(vec![
        Field::required("key", Schema::trimmed().min(1)),
        Field::required("jaSurface", Schema::trimmed().min(1).max(200)),
        Field::required("koMeaning", Schema::trimmed().min(1).max(400)),
        Field::optional("memo", Schema::trimmed().max(800)),
      ]))
      .min(1),
    ),
    Field::required(
      "problemTargets",
      Schema::array(Schema::object(vec![
        Field::required("index", Schema::int(Some(1), Some(count as i64))),
        Field::required("targetItemKeys", Schema::array(Schema::trimmed().min(1)).min(1).max(3)),
      ]))
      .min(count),
    ),
  ])
}

/// "상황: " + the prompt (whitespace collapsed, 30 chars + "…" when longer), capped at 50.
pub fn fallback_list_name(scenario_prompt: &str) -> String {
  let collapsed = collapse_whitespace(scenario_prompt);
  let base = if collapsed.chars().count() <= FALLBACK_NAME_PROMPT_CHARS {
    collapsed
  } else {
    format!("{}…", take_chars(&collapsed, FALLBACK_NAME_PROMPT_CHARS))
  };
  take_chars(&format!("{FALLBACK_NAME_LABEL}{base}"), LIST_NAME_MAX)
}

fn preview<T>(v: &[T]) -> &[T] {
  &v[..v.len().min(3)]
}

/// Debug-only suffix for gate failures; empty unless raw diagnostics are on.
fn details(state: &AppState, value: serde_json::Value) -> String {
  if state.llm.debug_raw() {
    format!(" details={}", clip(&value.to_string(), DETAILS_CLIP))
  } else {
    String::new()
  }
}

/// Run the whole pipeline and return the created list and session ids.
#[instrument(level = "info", skip(state, req), fields(owner = %req.owner, problem_count = req.problem_count, jlpt = %req.jlpt.as_str()))]
pub async fn create_scenario_vocab_list(state: &AppState, req: ScenarioRequest<'_>) -> Result<ScenarioCreated, AppError> {
  let problems = generate_problems(state, &req).await?;
  let extraction = extract_vocabulary(state, &req, &problems).await?;
  let plan = plan_vocabulary(extraction, req.scenario_prompt, problems.len())?;
  info!(
    target: "pipeline",
    problems = problems.len(),
    items = plan.items.len(),
    list_name = %plan.list_name,
    "Scenario plan ready"
  );
  persist(state, &req, &problems, &plan).await
}

async fn generate_problems(state: &AppState, req: &ScenarioRequest<'_>) -> Result<Vec<NormalizedProblem>, AppError> {
  let count = req.problem_count as usize;
  let system = fill_template(
    &state.prompts.scenario_problems_system,
    &[("problem_count", &count.to_string()), ("jlpt_label", &req.jlpt.label())],
  );
  let user = json!({
    "scenarioPrompt": req.scenario_prompt,
    "notes": [
      "문장 길이는 너무 길지 않게(대체로 1문장, 길어도 2문장).",
      "실제 회화에서 자주 나오는 상황/말투를 우선."
    ],
  });
  let messages = [ChatMessage::system(system), ChatMessage::user(format!("{:#}", user))];
  let schema = problems_schema(count);

  let llm = &state.llm;
  let (messages, schema) = (&messages, &schema);
  let reply = state
    .models
    .generate
    .run("scenario_problems", move |model| async move {
      llm.chat_json::<ScenarioProblems>(&model, messages, schema).await
    })
    .await?;

  let mut raw = reply.problems;
  if raw.len() > count {
    debug!(target: "pipeline", returned = raw.len(), count, "Dropping surplus problems");
    raw.truncate(count);
  }
  let problems: Vec<NormalizedProblem> = raw.iter().map(|p| NormalizedProblem::from_raw(p, false)).collect();

  if problems.iter().any(|p| !p.is_complete()) {
    let details = details(
      state,
      json!({
        "reason": "missing promptKo/modelAnswerJa after normalization",
        "normalizedPreview": preview(&problems),
        "rawPreview": preview(&raw),
      }),
    );
    return Err(AppError::SchemaMismatch(format!("OpenAI response schema mismatch.{details}")));
  }
  Ok(problems)
}

async fn extract_vocabulary(
  state: &AppState,
  req: &ScenarioRequest<'_>,
  problems: &[NormalizedProblem],
) -> Result<Extraction, AppError> {
  let count = problems.len();
  let system = fill_template(&state.prompts.scenario_extract_system, &[("problem_count", &count.to_string())]);
  let indexed: Vec<serde_json::Value> = problems
    .iter()
    .enumerate()
    .map(|(i, p)| json!({ "index": i + 1, "promptKo": p.prompt_ko, "modelAnswerJa": p.model_answer_ja }))
    .collect();
  let user = json!({
    "scenarioPrompt": req.scenario_prompt,
    "jlptLevel": req.jlpt.as_str(),
    "problems": indexed,
  });
  let messages = [ChatMessage::system(system), ChatMessage::user(format!("{:#}", user))];
  let schema = extraction_schema(count);

  let llm = &state.llm;
  let (messages, schema) = (&messages, &schema);
  let extraction = state
    .models
    .autofill
    .run("scenario_extract", move |model| async move {
      llm.chat_json::<Extraction>(&model, messages, schema).await
    })
    .await?;
  Ok(extraction)
}

/// Normalize stage 2 output: dedupe items, pick the list name, resolve targets per problem.
fn plan_vocabulary(extraction: Extraction, scenario_prompt: &str, problem_count: usize) -> Result<VocabPlan, AppError> {
  let mut key_to_surface: BTreeMap<String, String> = BTreeMap::new();
  let mut items: Vec<PlannedItem> = Vec::new();

  for it in extraction.items {
    let key = it.key.trim();
    let surface = it.ja_surface.trim();
    let meaning = it.ko_meaning.trim();
    if key.is_empty() || surface.is_empty() || meaning.is_empty() {
      continue;
    }
    key_to_surface.entry(key.to_string()).or_insert_with(|| surface.to_string());
    if items.iter().any(|x| x.ja_surface == surface) {
      continue;
    }
    let memo = it.memo.as_deref().map(str::trim).filter(|m| !m.is_empty()).map(String::from);
    items.push(PlannedItem {
      key: key.to_string(),
      ja_surface: surface.to_string(),
      ko_meaning: meaning.to_string(),
      memo,
    });
  }

  let Some(fallback_key) = items.first().map(|i| i.key.clone()) else {
    return Err(AppError::NoVocabulary);
  };

  let proposed = extraction.list_name.trim();
  let list_name = if proposed.is_empty() { fallback_list_name(scenario_prompt) } else { proposed.to_string() };
  let list_name = take_chars(&collapse_whitespace(&list_name), LIST_NAME_MAX);

  let mut by_index: HashMap<usize, Vec<String>> = HashMap::new();
  for t in extraction.problem_targets {
    let Ok(idx) = usize::try_from(t.index) else { continue };
    if idx < 1 || idx > problem_count {
      continue;
    }
    let keys = dedupe_capped(
      t.target_item_keys
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| key_to_surface.contains_key(k)),
      MAX_TARGETS_PER_PROBLEM,
    );
    if !keys.is_empty() {
      by_index.entry(idx).or_insert(keys);
    }
  }

  let targets = (1..=problem_count)
    .map(|idx| {
      by_index.remove(&idx).unwrap_or_else(|| {
        debug!(target: "pipeline", index = idx, key = %fallback_key, "No usable targets; using fallback key");
        vec![fallback_key.clone()]
      })
    })
    .collect();

  Ok(VocabPlan { list_name, items, key_to_surface, targets })
}

async fn persist(
  state: &AppState,
  req: &ScenarioRequest<'_>,
  problems: &[NormalizedProblem],
  plan: &VocabPlan,
) -> Result<ScenarioCreated, AppError> {
  let list_id = state
    .store
    .insert_list(NewVocabList {
      user_id: req.owner.to_string(),
      name: plan.list_name.clone(),
      kind: ListKind::Scenario,
      scenario_prompt: Some(req.scenario_prompt.to_string()),
    })
    .await?;

  match persist_under_list(state, req, &list_id, problems, plan).await {
    Ok(session_id) => {
      info!(target: "pipeline", %list_id, %session_id, "Scenario list created");
      Ok(ScenarioCreated { list_id, session_id })
    }
    Err(e) => {
      warn!(target: "pipeline", %list_id, error = %e, "Scenario persistence failed; deleting list");
      if let Err(cleanup) = state.store.delete_lists(req.owner, &[list_id.clone()]).await {
        error!(target: "pipeline", %list_id, error = %cleanup, "Rollback failed; list may be orphaned");
      }
      Err(e)
    }
  }
}

/// Steps after the list exists. Returns the session id.
async fn persist_under_list(
  state: &AppState,
  req: &ScenarioRequest<'_>,
  list_id: &str,
  problems: &[NormalizedProblem],
  plan: &VocabPlan,
) -> Result<String, AppError> {
  let store = &state.store;

  let rows: Vec<NewVocabItem> = plan
    .items
    .iter()
    .take(MAX_ITEMS_PER_LIST)
    .map(|it| NewVocabItem {
      user_id: req.owner.to_string(),
      list_id: list_id.to_string(),
      ja_surface: it.ja_surface.clone(),
      ja_reading_hira: None,
      ko_meaning: it.ko_meaning.clone(),
      memo: it.memo.clone(),
      is_active: true,
    })
    .collect();
  let surfaces: Vec<String> = rows.iter().map(|r| r.ja_surface.clone()).collect();
  store.insert_items(rows).await?;

  let inserted = store.items_by_surface(req.owner, list_id, &surfaces).await?;
  let id_by_surface: HashMap<&str, &str> =
    inserted.iter().map(|r| (r.ja_surface.as_str(), r.id.as_str())).collect();

  let session_id = store
    .insert_session(NewPracticeSession {
      user_id: req.owner.to_string(),
      list_id: list_id.to_string(),
      problem_count: problems.len() as i64,
      jlpt_level: req.jlpt,
      scenario_prompt: Some(req.scenario_prompt.to_string()),
    })
    .await?;

  let payload: Vec<NewPracticeProblem> = problems
    .iter()
    .zip(&plan.targets)
    .map(|(p, keys)| {
      let ids = keys
        .iter()
        .filter_map(|k| plan.key_to_surface.get(k))
        .filter_map(|s| id_by_surface.get(s.as_str()))
        .map(|id| id.to_string());
      NewPracticeProblem {
        user_id: req.owner.to_string(),
        session_id: session_id.clone(),
        prompt_ko: p.prompt_ko.clone(),
        target_item_ids: dedupe_capped(ids, MAX_TARGETS_PER_PROBLEM),
        model_answer_ja: p.model_answer_ja.clone(),
        alt_answer_ja: None,
      }
    })
    .collect();

  if payload.iter().any(|p| p.target_item_ids.is_empty()) {
    let details = details(
      state,
      json!({
        "reason": "empty target_item_ids after mapping",
        "keyToSurfacePreview": plan.key_to_surface.iter().take(5).collect::<Vec<_>>(),
        "insertedItemsPreview": inserted.iter().take(5).map(|r| json!({"id": r.id, "ja_surface": r.ja_surface})).collect::<Vec<_>>(),
        "problemsPreview": &payload[..payload.len().min(2)],
      }),
    );
    return Err(AppError::Mapping(format!("단어 매핑 실패: 문제가 참조할 단어를 찾지 못했어요.{details}")));
  }

  store.insert_problems(payload).await?;
  Ok(session_id)
}
