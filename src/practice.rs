//! Practice sessions: start from a list, self-grade attempts, per-user JLPT level.

use std::collections::HashMap;

use tracing::{info, instrument, warn};

use crate::domain::{
  JlptLevel, NewPracticeAttempt, NewPracticeSession, PracticeAttempt, PracticeProblem, PracticeSession, Verdict,
  DEFAULT_PROBLEM_COUNT,
};
use crate::error::AppError;
use crate::generator::{generate_problems_for_session, GenerationMode};
use crate::state::AppState;

/// Active items a list needs before a practice session can start.
pub const MIN_ACTIVE_ITEMS: usize = 10;

/// The owner's JLPT level, `n3` when never set.
pub async fn jlpt_level(state: &AppState, owner: &str) -> Result<JlptLevel, AppError> {
  Ok(state.store.jlpt_level(owner).await?.unwrap_or_default())
}

#[instrument(level = "info", skip(state), fields(%owner, level = %level.as_str()))]
pub async fn set_jlpt_level(state: &AppState, owner: &str, level: JlptLevel) -> Result<(), AppError> {
  state.store.set_jlpt_level(owner, level).await?;
  Ok(())
}

/// Creates a session over `list_id` and fills it with generated problems.
///
/// The session row stays behind when generation fails; the caller can retry
/// generation for it.
#[instrument(level = "info", skip(state), fields(%owner, %list_id))]
pub async fn start_practice(state: &AppState, owner: &str, list_id: &str) -> Result<String, AppError> {
  if state.store.get_list(owner, list_id).await?.is_none() {
    return Err(AppError::NotFound("List not found".into()));
  }
  let active = state.store.count_items(owner, list_id, true).await?;
  if active < MIN_ACTIVE_ITEMS {
    return Err(AppError::BadRequest(format!("연습은 표현 {MIN_ACTIVE_ITEMS}개 이상부터 가능해요.")));
  }
  let jlpt = jlpt_level(state, owner).await?;

  let session_id = state
    .store
    .insert_session(NewPracticeSession {
      user_id: owner.to_string(),
      list_id: list_id.to_string(),
      problem_count: DEFAULT_PROBLEM_COUNT as i64,
      jlpt_level: jlpt,
      scenario_prompt: None,
    })
    .await?;

  let inserted = generate_problems_for_session(state, owner, &session_id, GenerationMode::Standard)
    .await
    .map_err(|e| {
      warn!(target: "pipeline", %session_id, error = %e, "Generation for new session failed");
      e.context("문제 생성 실패: ")
    })?;
  info!(target: "pipeline", %session_id, inserted, "Practice session ready");
  Ok(session_id)
}

/// Records a self-graded attempt. No feedback is generated.
#[instrument(level = "info", skip(state, user_answer_ja), fields(%owner, %problem_id, verdict = %verdict.as_str()))]
pub async fn grade(
  state: &AppState,
  owner: &str,
  problem_id: &str,
  user_answer_ja: &str,
  verdict: Verdict,
) -> Result<Verdict, AppError> {
  if state.store.get_problem(owner, problem_id).await?.is_none() {
    return Err(AppError::NotFound("Problem not found".into()));
  }
  state
    .store
    .insert_attempt(NewPracticeAttempt {
      user_id: owner.to_string(),
      problem_id: problem_id.to_string(),
      user_answer_ja: user_answer_ja.to_string(),
      verdict,
      feedback: None,
    })
    .await?;
  Ok(verdict)
}

/// Which problems a session review returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReviewFilter {
  #[default]
  All,
  /// Problems whose latest attempt was graded `needs_fix`.
  Wrong,
}

#[derive(Clone, Debug)]
pub struct ProblemReview {
  /// 1-based position in creation order, stable under filtering.
  pub index: usize,
  pub problem: PracticeProblem,
  pub latest: Option<PracticeAttempt>,
}

#[derive(Clone, Debug)]
pub struct SessionReview {
  pub session: PracticeSession,
  pub total: usize,
  pub answered: usize,
  pub wrong: usize,
  pub problems: Vec<ProblemReview>,
}

async fn owned_session(state: &AppState, owner: &str, session_id: &str) -> Result<PracticeSession, AppError> {
  state
    .store
    .get_session(owner, session_id)
    .await?
    .ok_or_else(|| AppError::NotFound("Session not found".into()))
}

/// Problems of a session in creation order, each with its latest attempt.
#[instrument(level = "info", skip(state), fields(%owner, %session_id, ?filter))]
pub async fn session_view(
  state: &AppState,
  owner: &str,
  session_id: &str,
  filter: ReviewFilter,
) -> Result<SessionReview, AppError> {
  let session = owned_session(state, owner, session_id).await?;
  let problems = state.store.session_problems(owner, session_id).await?;
  let ids: Vec<String> = problems.iter().map(|p| p.id.clone()).collect();

  // Attempts arrive newest first, so the first one seen per problem wins.
  let mut latest: HashMap<String, PracticeAttempt> = HashMap::new();
  for attempt in state.store.attempts_for(owner, &ids).await? {
    latest.entry(attempt.problem_id.clone()).or_insert(attempt);
  }

  let all: Vec<ProblemReview> = problems
    .into_iter()
    .enumerate()
    .map(|(i, problem)| ProblemReview { index: i + 1, latest: latest.remove(&problem.id), problem })
    .collect();
  let is_wrong = |p: &ProblemReview| p.latest.as_ref().is_some_and(|a| a.verdict == Verdict::NeedsFix);
  let total = all.len();
  let answered = all.iter().filter(|p| p.latest.is_some()).count();
  let wrong = all.iter().filter(|p| is_wrong(*p)).count();
  let problems = match filter {
    ReviewFilter::All => all,
    ReviewFilter::Wrong => all.into_iter().filter(|p| is_wrong(p)).collect(),
  };
  Ok(SessionReview { session, total, answered, wrong, problems })
}

/// Deletes every attempt in the session; problems stay.
#[instrument(level = "info", skip(state), fields(%owner, %session_id))]
pub async fn reset_session(state: &AppState, owner: &str, session_id: &str) -> Result<(), AppError> {
  owned_session(state, owner, session_id).await?;
  let ids: Vec<String> = state
    .store
    .session_problems(owner, session_id)
    .await?
    .into_iter()
    .map(|p| p.id)
    .collect();
  state.store.delete_attempts(owner, &ids).await?;
  info!(target: "kotoba_backend", problems = ids.len(), "Session attempts cleared");
  Ok(())
}
