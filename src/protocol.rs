//! Public HTTP request/response structs (serde ready, camelCase on the wire).
//!
//! Request bodies go through `ApiJson`, which deserializes and then runs
//! `Validate`, so handlers only ever see trimmed, in-range input. Any body
//! problem is a 400 before a model or the store is touched.

use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Request},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    JlptLevel, ListKind, PracticeAttempt, Verdict, VocabItem, VocabList, MAX_PROBLEM_COUNT, MIN_PROBLEM_COUNT,
};
use crate::error::AppError;
use crate::practice::{ProblemReview, ReviewFilter, SessionReview};

/// Post-deserialization checks; may normalize (trim) the value.
pub trait Validate: Sized {
    fn validate(self) -> Result<Self, AppError>;
}

/// `Json<T>` whose rejections and validation failures become `AppError::BadRequest`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state).await.map_err(|rejection| {
            debug!(target: "kotoba_backend", error = %rejection.body_text(), "Rejected request body");
            invalid_body()
        })?;
        Ok(ApiJson(body.validate()?))
    }
}

pub fn invalid_body() -> AppError {
    AppError::BadRequest("Invalid body".into())
}

pub fn require_uuid(id: &str) -> Result<(), AppError> {
    Uuid::parse_str(id).map(|_| ()).map_err(|_| invalid_body())
}

/// Trimmed `s`, rejected with `message` unless its char length is within bounds.
fn trimmed_within(s: String, min: usize, max: usize, message: &str) -> Result<String, AppError> {
    let t = s.trim();
    let len = t.chars().count();
    if len < min || len > max {
        return Err(AppError::BadRequest(message.to_string()));
    }
    Ok(t.to_string())
}

/// Trimmed optional text; blank becomes None.
fn optional_trimmed(s: Option<String>, max: usize, message: &str) -> Result<Option<String>, AppError> {
    match s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) if v.chars().count() > max => Err(AppError::BadRequest(message.to_string())),
        other => Ok(other),
    }
}

//
// Practice generation
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateIn {
    pub session_id: String,
}

impl Validate for GenerateIn {
    fn validate(self) -> Result<Self, AppError> {
        require_uuid(&self.session_id)?;
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioCreateIn {
    pub scenario_prompt: String,
    pub problem_count: i64,
}

impl Validate for ScenarioCreateIn {
    fn validate(self) -> Result<Self, AppError> {
        let scenario_prompt = trimmed_within(
            self.scenario_prompt,
            3,
            800,
            "상황 설명은 3자 이상 800자 이하로 입력해주세요.",
        )?;
        if !(MIN_PROBLEM_COUNT as i64..=MAX_PROBLEM_COUNT as i64).contains(&self.problem_count) {
            return Err(AppError::BadRequest("문제 수는 1개 이상 50개 이하로 선택해주세요.".into()));
        }
        Ok(Self { scenario_prompt, problem_count: self.problem_count })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioCreateOut {
    pub ok: bool,
    pub list_id: String,
    pub session_id: String,
}

//
// Vocabulary lists and items
//

#[derive(Debug, Deserialize)]
pub struct CreateListIn {
    pub name: String,
}

impl Validate for CreateListIn {
    fn validate(self) -> Result<Self, AppError> {
        let name = trimmed_within(self.name, 1, 50, "단어장 이름은 1자 이상 50자 이하로 입력해주세요.")?;
        Ok(Self { name })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListOut {
    pub ok: bool,
    pub list_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteListsIn {
    pub list_ids: Vec<String>,
}

impl Validate for DeleteListsIn {
    fn validate(self) -> Result<Self, AppError> {
        self.list_ids.iter().try_for_each(|id| require_uuid(id))?;
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemIn {
    pub ja_surface: String,
    #[serde(default)]
    pub ja_reading_hira: Option<String>,
    pub ko_meaning: String,
    #[serde(default)]
    pub memo: Option<String>,
}

impl Validate for CreateItemIn {
    fn validate(self) -> Result<Self, AppError> {
        Ok(Self {
            ja_surface: trimmed_within(self.ja_surface, 1, 200, "일본어 원문(표기)은 1자 이상 200자 이하로 입력해주세요.")?,
            ja_reading_hira: optional_trimmed(self.ja_reading_hira, 200, "읽기는 최대 200자까지 입력할 수 있어요.")?,
            ko_meaning: trimmed_within(self.ko_meaning, 1, 400, "뜻(한국어)은 1자 이상 400자 이하로 입력해주세요.")?,
            memo: optional_trimmed(self.memo, 800, "메모는 최대 800자까지 입력할 수 있어요.")?,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemOut {
    pub ok: bool,
    pub item_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteItemsIn {
    pub item_ids: Vec<String>,
}

impl Validate for DeleteItemsIn {
    fn validate(self) -> Result<Self, AppError> {
        self.item_ids.iter().try_for_each(|id| require_uuid(id))?;
        Ok(self)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSummary {
    pub id: String,
    pub name: String,
    pub kind: ListKind,
    pub scenario_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<VocabList> for ListSummary {
    fn from(l: VocabList) -> Self {
        Self { id: l.id, name: l.name, kind: l.kind, scenario_prompt: l.scenario_prompt, created_at: l.created_at }
    }
}

#[derive(Debug, Serialize)]
pub struct ListsOut {
    pub lists: Vec<ListSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOut {
    pub id: String,
    pub ja_surface: String,
    pub ja_reading_hira: Option<String>,
    pub ko_meaning: String,
    pub memo: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<VocabItem> for ItemOut {
    fn from(i: VocabItem) -> Self {
        Self {
            id: i.id,
            ja_surface: i.ja_surface,
            ja_reading_hira: i.ja_reading_hira,
            ko_meaning: i.ko_meaning,
            memo: i.memo,
            is_active: i.is_active,
            created_at: i.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemsOut {
    pub list: ListSummary,
    pub active_count: usize,
    pub items: Vec<ItemOut>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveIn {
    pub is_active: bool,
}

impl Validate for SetActiveIn {
    fn validate(self) -> Result<Self, AppError> {
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutofillIn {
    pub ja_surface: String,
}

impl Validate for AutofillIn {
    fn validate(self) -> Result<Self, AppError> {
        let ja_surface = trimmed_within(self.ja_surface, 1, 200, "Invalid body")?;
        Ok(Self { ja_surface })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutofillOut {
    pub ko_meaning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ja_reading_hira: Option<String>,
}

//
// Practice sessions and attempts
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPracticeIn {
    pub list_id: String,
}

impl Validate for StartPracticeIn {
    fn validate(self) -> Result<Self, AppError> {
        require_uuid(&self.list_id)?;
        Ok(self)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPracticeOut {
    pub ok: bool,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeIn {
    pub problem_id: String,
    pub user_answer_ja: String,
    pub verdict: Verdict,
}

impl Validate for GradeIn {
    fn validate(self) -> Result<Self, AppError> {
        require_uuid(&self.problem_id)?;
        let len = self.user_answer_ja.chars().count();
        if !(1..=2000).contains(&len) {
            return Err(invalid_body());
        }
        Ok(self)
    }
}

#[derive(Debug, Serialize)]
pub struct GradeOut {
    pub ok: bool,
    pub verdict: Verdict,
}

/// `?mode=wrong` narrows a session view to problems last graded `needs_fix`.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub mode: Option<String>,
}

impl SessionQuery {
    pub fn filter(&self) -> ReviewFilter {
        match self.mode.as_deref() {
            Some("wrong") => ReviewFilter::Wrong,
            _ => ReviewFilter::All,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOut {
    pub user_answer_ja: String,
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
}

impl From<PracticeAttempt> for AttemptOut {
    fn from(a: PracticeAttempt) -> Self {
        Self { user_answer_ja: a.user_answer_ja, verdict: a.verdict, created_at: a.created_at }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemOut {
    pub index: usize,
    pub id: String,
    pub prompt_ko: String,
    pub target_item_ids: Vec<String>,
    pub model_answer_ja: String,
    pub alt_answer_ja: Option<String>,
    pub latest_attempt: Option<AttemptOut>,
}

impl From<ProblemReview> for ProblemOut {
    fn from(r: ProblemReview) -> Self {
        Self {
            index: r.index,
            id: r.problem.id,
            prompt_ko: r.problem.prompt_ko,
            target_item_ids: r.problem.target_item_ids,
            model_answer_ja: r.problem.model_answer_ja,
            alt_answer_ja: r.problem.alt_answer_ja,
            latest_attempt: r.latest.map(AttemptOut::from),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
    pub session_id: String,
    pub list_id: String,
    pub scenario_prompt: Option<String>,
    pub total: usize,
    pub answered: usize,
    pub wrong_count: usize,
    pub problems: Vec<ProblemOut>,
}

impl From<SessionReview> for SessionOut {
    fn from(r: SessionReview) -> Self {
        Self {
            session_id: r.session.id,
            list_id: r.session.list_id,
            scenario_prompt: r.session.scenario_prompt,
            total: r.total,
            answered: r.answered,
            wrong_count: r.wrong,
            problems: r.problems.into_iter().map(ProblemOut::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsBody {
    pub jlpt_level: JlptLevel,
}

impl Validate for SettingsBody {
    fn validate(self) -> Result<Self, AppError> {
        Ok(self)
    }
}

#[derive(Serialize)]
pub struct OkOut {
    pub ok: bool,
}
