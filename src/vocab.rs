//! Vocabulary list and item operations, plus the form autofill model call.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::domain::{ListKind, NewVocabItem, NewVocabList, VocabItem, VocabList, MAX_ITEMS_PER_LIST};
use crate::error::AppError;
use crate::openai::ChatMessage;
use crate::protocol::{AutofillOut, CreateItemIn};
use crate::schema::{Field, Schema};
use crate::state::AppState;
use crate::util::{fill_template, has_kanji};

const READING_REQUIRED: &str = "- jaReadingHira: full reading in hiragana for the entire jaSurface.";
const READING_OMITTED: &str = "- Do NOT include jaReadingHira.";

#[instrument(level = "info", skip(state, name), fields(%owner))]
pub async fn create_list(state: &AppState, owner: &str, name: &str) -> Result<String, AppError> {
  let list_id = state
    .store
    .insert_list(NewVocabList {
      user_id: owner.to_string(),
      name: name.to_string(),
      kind: ListKind::Manual,
      scenario_prompt: None,
    })
    .await?;
  info!(target: "kotoba_backend", %list_id, "List created");
  Ok(list_id)
}

#[instrument(level = "info", skip(state, list_ids), fields(%owner, count = list_ids.len()))]
pub async fn delete_lists(state: &AppState, owner: &str, list_ids: &[String]) -> Result<(), AppError> {
  if list_ids.is_empty() {
    return Ok(());
  }
  state.store.delete_lists(owner, list_ids).await?;
  Ok(())
}

#[instrument(level = "info", skip(state), fields(%owner))]
pub async fn list_lists(state: &AppState, owner: &str) -> Result<Vec<VocabList>, AppError> {
  Ok(state.store.lists(owner).await?)
}

/// An owned list with all of its items, inactive ones included.
#[instrument(level = "info", skip(state), fields(%owner, %list_id))]
pub async fn list_items(state: &AppState, owner: &str, list_id: &str) -> Result<(VocabList, Vec<VocabItem>), AppError> {
  let list = state
    .store
    .get_list(owner, list_id)
    .await?
    .ok_or_else(|| AppError::NotFound("List not found".into()))?;
  let items = state.store.items(owner, list_id).await?;
  Ok((list, items))
}

/// Includes or excludes an item from practice without deleting it.
#[instrument(level = "info", skip(state), fields(%owner, %list_id, %item_id, active))]
pub async fn set_item_active(
  state: &AppState,
  owner: &str,
  list_id: &str,
  item_id: &str,
  active: bool,
) -> Result<(), AppError> {
  if !state.store.set_item_active(owner, list_id, item_id, active).await? {
    return Err(AppError::NotFound("Item not found".into()));
  }
  info!(target: "kotoba_backend", "Item activity changed");
  Ok(())
}

/// Adds one item to an owned list. The per-list cap is checked before insert.
#[instrument(level = "info", skip(state, item), fields(%owner, %list_id))]
pub async fn add_item(state: &AppState, owner: &str, list_id: &str, item: CreateItemIn) -> Result<String, AppError> {
  if state.store.get_list(owner, list_id).await?.is_none() {
    return Err(AppError::NotFound("List not found".into()));
  }
  let count = state.store.count_items(owner, list_id, false).await?;
  if count >= MAX_ITEMS_PER_LIST {
    warn!(target: "kotoba_backend", count, "List is full");
    return Err(AppError::BadRequest(format!(
      "단어/표현은 단어장당 최대 {MAX_ITEMS_PER_LIST}개까지 저장할 수 있어요."
    )));
  }
  let item_id = state
    .store
    .insert_item(NewVocabItem {
      user_id: owner.to_string(),
      list_id: list_id.to_string(),
      ja_surface: item.ja_surface,
      ja_reading_hira: item.ja_reading_hira,
      ko_meaning: item.ko_meaning,
      memo: item.memo,
      is_active: true,
    })
    .await?;
  Ok(item_id)
}

#[instrument(level = "info", skip(state, item_ids), fields(%owner, %list_id, count = item_ids.len()))]
pub async fn delete_items(state: &AppState, owner: &str, list_id: &str, item_ids: &[String]) -> Result<(), AppError> {
  if item_ids.is_empty() {
    return Ok(());
  }
  state.store.delete_items(owner, list_id, item_ids).await?;
  Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutofillReply {
  ko_meaning: String,
  #[serde(default)]
  ja_reading_hira: Option<String>,
}

fn autofill_schema() -> Schema {
  Schema::object(vec![
    Field::required("koMeaning", Schema::trimmed().min(1).max(400)),
    Field::optional("jaReadingHira", Schema::trimmed().min(1).max(200)),
  ])
}

/// Suggests a Korean meaning, and a hiragana reading when the surface has kanji.
#[instrument(level = "info", skip_all, fields(surface_len = ja_surface.chars().count()))]
pub async fn autofill(state: &AppState, ja_surface: &str) -> Result<AutofillOut, AppError> {
  let need_reading = has_kanji(ja_surface);
  let rule = if need_reading { READING_REQUIRED } else { READING_OMITTED };
  let system = fill_template(&state.prompts.autofill_system, &[("reading_rule", rule)]);
  let user = json!({ "jaSurface": ja_surface, "needReading": need_reading });
  let messages = [ChatMessage::system(system), ChatMessage::user(user.to_string())];
  let schema = autofill_schema();

  let llm = &state.llm;
  let (messages, schema) = (&messages, &schema);
  let reply = state
    .models
    .autofill
    .run("autofill", move |model| async move {
      llm.chat_json::<AutofillReply>(&model, messages, schema).await
    })
    .await?;

  Ok(AutofillOut {
    ko_meaning: reply.ko_meaning.trim().to_string(),
    ja_reading_hira: reply
      .ja_reading_hira
      .map(|r| r.trim().to_string())
      .filter(|r| need_reading && !r.is_empty()),
  })
}
