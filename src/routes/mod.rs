//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - JSON API under `/api/...` (bearer auth on everything but health)
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(http::http_health))
        // Problem generation
        .route("/api/practice/generate", post(http::http_post_generate))
        .route("/api/practice/generate-scenario", post(http::http_post_generate_scenario))
        .route("/api/vocab/scenario-create", post(http::http_post_scenario_create))
        // Vocabulary lists and items
        .route("/api/vocab/lists", get(http::http_get_lists).post(http::http_post_create_list))
        .route("/api/vocab/lists/delete", post(http::http_post_delete_lists))
        .route(
            "/api/vocab/lists/:list_id/items",
            get(http::http_get_list_items).post(http::http_post_create_item),
        )
        .route("/api/vocab/lists/:list_id/items/delete", post(http::http_post_delete_items))
        .route("/api/vocab/lists/:list_id/items/:item_id/active", post(http::http_post_item_active))
        .route("/api/vocab/autofill", post(http::http_post_autofill))
        // Practice
        .route("/api/practice/start", post(http::http_post_start_practice))
        .route("/api/practice/grade", post(http::http_post_grade))
        .route("/api/practice/sessions/:session_id", get(http::http_get_session))
        .route("/api/practice/sessions/:session_id/reset", post(http::http_post_reset_session))
        .route("/api/settings", get(http::http_get_settings).put(http::http_put_settings))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use tower::ServiceExt;

    use serde_json::Value;

    use crate::domain::{JlptLevel, NewPracticeProblem, NewPracticeSession};
    use crate::store::{MemoryStore, Store};
    use crate::testing::{seed_list, test_policy, test_state, StubBackend, FlakyStore, OWNER, TOKEN};

    fn post(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
        let mut req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn authed_get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap()
    }

    /// A session over a fresh list of `surfaces`, holding `prompts` as problems.
    async fn seeded_session(store: &MemoryStore, surfaces: &[&str], scenario: Option<&str>, prompts: &[&str]) -> String {
        let list_id = seed_list(store, OWNER, surfaces).await;
        let session_id = store
            .insert_session(NewPracticeSession {
                user_id: OWNER.into(),
                list_id,
                problem_count: prompts.len().max(1) as i64,
                jlpt_level: JlptLevel::N3,
                scenario_prompt: scenario.map(String::from),
            })
            .await
            .unwrap();
        let problems = prompts
            .iter()
            .map(|p| NewPracticeProblem {
                user_id: OWNER.into(),
                session_id: session_id.clone(),
                prompt_ko: p.to_string(),
                target_item_ids: vec![],
                model_answer_ja: "答え".into(),
                alt_answer_ja: None,
            })
            .collect();
        store.insert_problems(problems).await.unwrap();
        session_id
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, String) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let app = build_router(test_state(Arc::new(MemoryStore::new()), Arc::new(StubBackend::new()), test_policy()));
        let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn missing_token_is_rejected_before_body_validation() {
        let backend = Arc::new(StubBackend::new());
        let app = build_router(test_state(Arc::new(MemoryStore::new()), backend.clone(), test_policy()));

        let (status, _) = send(app.clone(), post("/api/practice/generate", None, "not json")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(app, post("/api/vocab/scenario-create", Some("wrong"), "{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests_without_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(StubBackend::new());
        let app = build_router(test_state(store.clone(), backend.clone(), test_policy()));

        for (uri, body) in [
            ("/api/practice/generate", r#"{"sessionId":"not-a-uuid"}"#),
            ("/api/practice/generate-scenario", r#"{}"#),
            ("/api/vocab/scenario-create", r#"{"scenarioPrompt":"카페","problemCount":0}"#),
            ("/api/vocab/scenario-create", r#"{"scenarioPrompt":"ab","problemCount":3}"#),
            ("/api/vocab/scenario-create", r#"{"scenarioPrompt":"카페 주문","problemCount":"3"}"#),
        ] {
            let (status, _) = send(app.clone(), post(uri, Some(TOKEN), body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} {body}");
        }
        assert!(backend.calls().is_empty());
        assert!(store.snapshot().await.lists.is_empty());
    }

    #[tokio::test]
    async fn generate_for_unknown_session_is_not_found() {
        let app = build_router(test_state(Arc::new(MemoryStore::new()), Arc::new(StubBackend::new()), test_policy()));
        let body = format!(r#"{{"sessionId":"{}"}}"#, uuid::Uuid::new_v4());
        let (status, text) = send(app, post("/api/practice/generate", Some(TOKEN), &body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(text, "Session not found");
    }

    #[tokio::test]
    async fn scenario_create_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(
            StubBackend::new()
                .reply(
                    "gen-primary",
                    r#"{"problems":[{"promptKo":"아이스 라떼 하나 주세요","modelAnswerJa":"アイスラテを一つください"}]}"#,
                )
                .reply(
                    "fill-primary",
                    r#"{"listName":"카페","items":[{"key":"w1","jaSurface":"アイスラテ","koMeaning":"아이스 라떼"}],"problemTargets":[{"index":1,"targetItemKeys":["w1"]}]}"#,
                ),
        );
        let app = build_router(test_state(store.clone(), backend, test_policy()));

        let (status, text) = send(
            app,
            post("/api/vocab/scenario-create", Some(TOKEN), r#"{"scenarioPrompt":" 카페에서 주문 ","problemCount":1}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{text}");

        let out: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(out["ok"], true);
        let tables = store.snapshot().await;
        assert_eq!(out["listId"], tables.lists[0].id.as_str());
        assert_eq!(out["sessionId"], tables.sessions[0].id.as_str());
        assert_eq!(tables.lists[0].scenario_prompt.as_deref(), Some("카페에서 주문"));
    }

    #[tokio::test]
    async fn scenario_create_reports_pipeline_failures_as_500() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(StubBackend::new().fail("gen-primary", "primary down").fail("gen-fallback", "fallback down"));
        let app = build_router(test_state(store.clone(), backend, test_policy()));

        let (status, text) = send(
            app,
            post("/api/vocab/scenario-create", Some(TOKEN), r#"{"scenarioPrompt":"카페에서 주문","problemCount":2}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(text.contains("primary down"), "{text}");
        assert!(!text.contains("fallback down"));
        assert!(store.snapshot().await.lists.is_empty());
    }

    #[tokio::test]
    async fn scenario_create_rolls_back_on_late_store_failure() {
        let store = Arc::new(FlakyStore::failing("insert_problems"));
        let backend = Arc::new(
            StubBackend::new()
                .reply("gen-primary", r#"{"problems":[{"promptKo":"안녕","modelAnswerJa":"こんにちは"}]}"#)
                .reply(
                    "fill-primary",
                    r#"{"listName":"인사","items":[{"key":"w1","jaSurface":"こんにちは","koMeaning":"안녕하세요"}],"problemTargets":[{"index":1,"targetItemKeys":["w1"]}]}"#,
                ),
        );
        let app = build_router(test_state(store.clone(), backend, test_policy()));

        let (status, text) = send(
            app,
            post("/api/vocab/scenario-create", Some(TOKEN), r#"{"scenarioPrompt":"인사하기","problemCount":1}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(text, "injected failure in insert_problems");
        let tables = store.inner.snapshot().await;
        assert!(tables.lists.is_empty());
        assert!(tables.items.is_empty());
        assert!(tables.sessions.is_empty());
    }

    #[tokio::test]
    async fn vocab_and_practice_flow_over_http() {
        let store = Arc::new(MemoryStore::new());
        let app = build_router(test_state(store.clone(), Arc::new(StubBackend::new()), test_policy()));

        let (status, text) = send(app.clone(), post("/api/vocab/lists", Some(TOKEN), r#"{"name":"  동사  "}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let list_id = serde_json::from_str::<serde_json::Value>(&text).unwrap()["listId"].as_str().unwrap().to_string();
        assert_eq!(store.snapshot().await.lists[0].name, "동사");

        let uri = format!("/api/vocab/lists/{list_id}/items");
        let (status, _) = send(app.clone(), post(&uri, Some(TOKEN), r#"{"jaSurface":"食べる","koMeaning":"먹다"}"#)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, text) = send(app.clone(), post("/api/practice/start", Some(TOKEN), &format!(r#"{{"listId":"{list_id}"}}"#))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "연습은 표현 10개 이상부터 가능해요.");

        let (status, _) = send(app.clone(), post("/api/vocab/lists/nope/items", Some(TOKEN), r#"{"jaSurface":"a","koMeaning":"b"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app, post("/api/vocab/lists/delete", Some(TOKEN), &format!(r#"{{"listIds":["{list_id}"]}}"#))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(store.get_list(OWNER, &list_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let app = build_router(test_state(store.clone(), Arc::new(StubBackend::new()), test_policy()));

        let get = || {
            Request::builder()
                .uri("/api/settings")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap()
        };
        let (_, text) = send(app.clone(), get()).await;
        assert_eq!(text, r#"{"jlptLevel":"n3"}"#);

        let mut put = post("/api/settings", Some(TOKEN), r#"{"jlptLevel":"n1"}"#);
        *put.method_mut() = Method::PUT;
        let (status, _) = send(app.clone(), put).await;
        assert_eq!(status, StatusCode::OK);

        let (_, text) = send(app, get()).await;
        assert_eq!(text, r#"{"jlptLevel":"n1"}"#);
    }

    #[tokio::test]
    async fn grade_unknown_problem_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        seed_list(store.as_ref(), OWNER, &["駅"]).await;
        let app = build_router(test_state(store, Arc::new(StubBackend::new()), test_policy()));
        let body = format!(r#"{{"problemId":"{}","userAnswerJa":"駅","verdict":"perfect"}}"#, uuid::Uuid::new_v4());
        let (status, text) = send(app, post("/api/practice/grade", Some(TOKEN), &body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(text, "Problem not found");
    }

    #[tokio::test]
    async fn generate_scenario_on_plain_session_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let session_id = seeded_session(&store, &["駅"], None, &[]).await;
        let backend = Arc::new(StubBackend::new());
        let app = build_router(test_state(store, backend.clone(), test_policy()));

        let body = format!(r#"{{"sessionId":"{session_id}"}}"#);
        let (status, text) = send(app, post("/api/practice/generate-scenario", Some(TOKEN), &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "이 세션은 상황별 단어장 세션이 아닙니다.");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn generate_on_list_without_active_items_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let session_id = seeded_session(&store, &[], None, &[]).await;
        let backend = Arc::new(StubBackend::new());
        let app = build_router(test_state(store.clone(), backend.clone(), test_policy()));

        let body = format!(r#"{{"sessionId":"{session_id}"}}"#);
        let (status, text) = send(app, post("/api/practice/generate", Some(TOKEN), &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "단어장에 활성 표현이 없습니다.");
        assert!(backend.calls().is_empty());
        assert!(store.snapshot().await.problems.is_empty());
    }

    #[tokio::test]
    async fn lists_items_and_activity_toggle_over_http() {
        let store = Arc::new(MemoryStore::new());
        let list_id = seed_list(store.as_ref(), OWNER, &["朝", "昼", "夜"]).await;
        seed_list(store.as_ref(), "someone-else", &["猫"]).await;
        let hiru = store.snapshot().await.items[1].id.clone();
        let app = build_router(test_state(store.clone(), Arc::new(StubBackend::new()), test_policy()));

        let (status, text) = send(app.clone(), authed_get("/api/vocab/lists")).await;
        assert_eq!(status, StatusCode::OK);
        let lists: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(lists["lists"].as_array().unwrap().len(), 1);
        assert_eq!(lists["lists"][0]["id"], list_id.as_str());
        assert_eq!(lists["lists"][0]["kind"], "manual");

        let toggle = format!("/api/vocab/lists/{list_id}/items/{hiru}/active");
        let (status, _) = send(app.clone(), post(&toggle, Some(TOKEN), r#"{"isActive":false}"#)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, text) = send(app.clone(), authed_get(&format!("/api/vocab/lists/{list_id}/items"))).await;
        assert_eq!(status, StatusCode::OK);
        let detail: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(detail["list"]["name"], "테스트");
        assert_eq!(detail["activeCount"], 2);
        let items = detail["items"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        let hiru_row = items.iter().find(|i| i["id"] == hiru.as_str()).unwrap();
        assert_eq!(hiru_row["isActive"], false);
        assert_eq!(hiru_row["jaSurface"], "昼");

        let missing = format!("/api/vocab/lists/{list_id}/items/{}/active", uuid::Uuid::new_v4());
        let (status, text) = send(app.clone(), post(&missing, Some(TOKEN), r#"{"isActive":true}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(text, "Item not found");

        let foreign = format!("/api/vocab/lists/{}/items", uuid::Uuid::new_v4());
        let (status, _) = send(app.clone(), authed_get(&foreign)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app, Request::builder().uri("/api/vocab/lists").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn review_filter_follows_the_latest_attempt() {
        let store = Arc::new(MemoryStore::new());
        let session_id = seeded_session(&store, &["駅"], None, &["역", "표"]).await;
        let problems: Vec<String> = store.snapshot().await.problems.iter().map(|p| p.id.clone()).collect();
        let app = build_router(test_state(store.clone(), Arc::new(StubBackend::new()), test_policy()));

        let grade = |problem_id: &str, verdict: &str| {
            post(
                "/api/practice/grade",
                Some(TOKEN),
                &format!(r#"{{"problemId":"{problem_id}","userAnswerJa":"駅です","verdict":"{verdict}"}}"#),
            )
        };
        let wrong_uri = format!("/api/practice/sessions/{session_id}?mode=wrong");

        send(app.clone(), grade(&problems[0], "needs_fix")).await;
        send(app.clone(), grade(&problems[1], "needs_fix")).await;
        let (status, text) = send(app.clone(), authed_get(&wrong_uri)).await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(view["wrongCount"], 2);
        assert_eq!(view["problems"].as_array().unwrap().len(), 2);

        let (status, _) = send(app.clone(), grade(&problems[0], "perfect")).await;
        assert_eq!(status, StatusCode::OK);
        let (_, text) = send(app.clone(), authed_get(&wrong_uri)).await;
        let view: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(view["wrongCount"], 1);
        let shown = view["problems"].as_array().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0]["id"], problems[1].as_str());
        assert_eq!(shown[0]["index"], 2);

        let (_, text) = send(app.clone(), authed_get(&format!("/api/practice/sessions/{session_id}"))).await;
        let view: Value = serde_json::from_str(&text).unwrap();
        assert_eq!((view["total"].as_u64(), view["answered"].as_u64()), (Some(2), Some(2)));
        assert_eq!(view["problems"][0]["latestAttempt"]["verdict"], "perfect");

        let reset = format!("/api/practice/sessions/{session_id}/reset");
        let (status, _) = send(app.clone(), post(&reset, Some(TOKEN), "")).await;
        assert_eq!(status, StatusCode::OK);
        let (_, text) = send(app.clone(), authed_get(&format!("/api/practice/sessions/{session_id}"))).await;
        let view: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(view["answered"], 0);
        assert_eq!(view["problems"][0]["latestAttempt"], Value::Null);
        assert!(store.snapshot().await.attempts.is_empty());

        let (status, text) = send(app, authed_get(&format!("/api/practice/sessions/{}", uuid::Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(text, "Session not found");
    }
}
