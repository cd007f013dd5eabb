//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Every handler except health authenticates through `Owner` first, then reads
//! its body through `ApiJson`.

use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  Json,
};
use tracing::{info, instrument};

use crate::auth::Owner;
use crate::error::AppError;
use crate::generator::{generate_problems_for_session, GenerationMode};
use crate::practice;
use crate::protocol::*;
use crate::scenario::{create_scenario_vocab_list, ScenarioRequest};
use crate::state::AppState;
use crate::vocab;

type ApiResult<T> = Result<Json<T>, AppError>;

fn path_id(id: &str) -> Result<(), AppError> {
  require_uuid(id).map_err(|_| AppError::BadRequest("Invalid listId".into()))
}

#[instrument(level = "info")]
pub async fn http_health() -> Json<OkOut> {
  Json(OkOut { ok: true })
}

//
// Practice generation
//

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0, session_id = %body.session_id))]
pub async fn http_post_generate(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  ApiJson(body): ApiJson<GenerateIn>,
) -> ApiResult<OkOut> {
  let inserted = generate_problems_for_session(&state, &owner.0, &body.session_id, GenerationMode::Standard).await?;
  info!(target: "pipeline", inserted, "HTTP generate done");
  Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0, session_id = %body.session_id))]
pub async fn http_post_generate_scenario(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  ApiJson(body): ApiJson<GenerateIn>,
) -> ApiResult<OkOut> {
  let inserted = generate_problems_for_session(&state, &owner.0, &body.session_id, GenerationMode::Scenario).await?;
  info!(target: "pipeline", inserted, "HTTP generate-scenario done");
  Ok(Json(OkOut { ok: true }))
}

/// Every failure past validation is reported as a 500 with the pipeline's message.
#[instrument(level = "info", skip(state, body), fields(owner = %owner.0, problem_count = body.problem_count))]
pub async fn http_post_scenario_create(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  ApiJson(body): ApiJson<ScenarioCreateIn>,
) -> ApiResult<ScenarioCreateOut> {
  let created = async {
    let jlpt = practice::jlpt_level(&state, &owner.0).await?;
    let req = ScenarioRequest {
      owner: &owner.0,
      scenario_prompt: &body.scenario_prompt,
      problem_count: body.problem_count as u32,
      jlpt,
    };
    create_scenario_vocab_list(&state, req).await
  }
  .await
  .map_err(AppError::into_internal)?;

  info!(target: "pipeline", list_id = %created.list_id, session_id = %created.session_id, "HTTP scenario-create done");
  Ok(Json(ScenarioCreateOut { ok: true, list_id: created.list_id, session_id: created.session_id }))
}

//
// Vocabulary
//

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0))]
pub async fn http_post_create_list(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  ApiJson(body): ApiJson<CreateListIn>,
) -> ApiResult<CreateListOut> {
  let list_id = vocab::create_list(&state, &owner.0, &body.name).await?;
  Ok(Json(CreateListOut { ok: true, list_id }))
}

#[instrument(level = "info", skip(state), fields(owner = %owner.0))]
pub async fn http_get_lists(State(state): State<Arc<AppState>>, owner: Owner) -> ApiResult<ListsOut> {
  let lists = vocab::list_lists(&state, &owner.0).await?;
  Ok(Json(ListsOut { lists: lists.into_iter().map(ListSummary::from).collect() }))
}

#[instrument(level = "info", skip(state), fields(owner = %owner.0, %list_id))]
pub async fn http_get_list_items(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  Path(list_id): Path<String>,
) -> ApiResult<ListItemsOut> {
  path_id(&list_id)?;
  let (list, items) = vocab::list_items(&state, &owner.0, &list_id).await?;
  let active_count = items.iter().filter(|i| i.is_active).count();
  Ok(Json(ListItemsOut {
    list: list.into(),
    active_count,
    items: items.into_iter().map(ItemOut::from).collect(),
  }))
}

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0, count = body.list_ids.len()))]
pub async fn http_post_delete_lists(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  ApiJson(body): ApiJson<DeleteListsIn>,
) -> ApiResult<OkOut> {
  vocab::delete_lists(&state, &owner.0, &body.list_ids).await?;
  Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0, %list_id))]
pub async fn http_post_create_item(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  Path(list_id): Path<String>,
  ApiJson(body): ApiJson<CreateItemIn>,
) -> ApiResult<CreateItemOut> {
  path_id(&list_id)?;
  let item_id = vocab::add_item(&state, &owner.0, &list_id, body).await?;
  Ok(Json(CreateItemOut { ok: true, item_id }))
}

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0, %list_id, count = body.item_ids.len()))]
pub async fn http_post_delete_items(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  Path(list_id): Path<String>,
  ApiJson(body): ApiJson<DeleteItemsIn>,
) -> ApiResult<OkOut> {
  path_id(&list_id)?;
  vocab::delete_items(&state, &owner.0, &list_id, &body.item_ids).await?;
  Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0, %list_id, %item_id, active = body.is_active))]
pub async fn http_post_item_active(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  Path((list_id, item_id)): Path<(String, String)>,
  ApiJson(body): ApiJson<SetActiveIn>,
) -> ApiResult<OkOut> {
  path_id(&list_id)?;
  require_uuid(&item_id).map_err(|_| AppError::BadRequest("Invalid itemId".into()))?;
  vocab::set_item_active(&state, &owner.0, &list_id, &item_id, body.is_active).await?;
  Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0, surface_len = body.ja_surface.chars().count()))]
pub async fn http_post_autofill(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  ApiJson(body): ApiJson<AutofillIn>,
) -> ApiResult<AutofillOut> {
  Ok(Json(vocab::autofill(&state, &body.ja_surface).await?))
}

//
// Practice sessions
//

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0, list_id = %body.list_id))]
pub async fn http_post_start_practice(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  ApiJson(body): ApiJson<StartPracticeIn>,
) -> ApiResult<StartPracticeOut> {
  let session_id = practice::start_practice(&state, &owner.0, &body.list_id).await?;
  Ok(Json(StartPracticeOut { ok: true, session_id }))
}

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0, problem_id = %body.problem_id))]
pub async fn http_post_grade(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  ApiJson(body): ApiJson<GradeIn>,
) -> ApiResult<GradeOut> {
  let verdict = practice::grade(&state, &owner.0, &body.problem_id, &body.user_answer_ja, body.verdict).await?;
  Ok(Json(GradeOut { ok: true, verdict }))
}

fn session_path_id(id: &str) -> Result<(), AppError> {
  require_uuid(id).map_err(|_| AppError::BadRequest("Invalid sessionId".into()))
}

#[instrument(level = "info", skip(state), fields(owner = %owner.0, %session_id, mode = ?query.mode))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  Path(session_id): Path<String>,
  Query(query): Query<SessionQuery>,
) -> ApiResult<SessionOut> {
  session_path_id(&session_id)?;
  let review = practice::session_view(&state, &owner.0, &session_id, query.filter()).await?;
  Ok(Json(review.into()))
}

#[instrument(level = "info", skip(state), fields(owner = %owner.0, %session_id))]
pub async fn http_post_reset_session(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  Path(session_id): Path<String>,
) -> ApiResult<OkOut> {
  session_path_id(&session_id)?;
  practice::reset_session(&state, &owner.0, &session_id).await?;
  Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "info", skip(state), fields(owner = %owner.0))]
pub async fn http_get_settings(State(state): State<Arc<AppState>>, owner: Owner) -> ApiResult<SettingsBody> {
  let jlpt_level = practice::jlpt_level(&state, &owner.0).await?;
  Ok(Json(SettingsBody { jlpt_level }))
}

#[instrument(level = "info", skip(state, body), fields(owner = %owner.0))]
pub async fn http_put_settings(
  State(state): State<Arc<AppState>>,
  owner: Owner,
  ApiJson(body): ApiJson<SettingsBody>,
) -> ApiResult<SettingsBody> {
  practice::set_jlpt_level(&state, &owner.0, body.jlpt_level).await?;
  Ok(Json(body))
}
