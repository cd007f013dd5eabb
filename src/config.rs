//! Configuration: environment settings plus an optional TOML file
//! (model policy overrides, prompt templates, static dev tokens).
//!
//! See `AppConfig` and `Prompts` for the TOML schema.

use serde::Deserialize;
use tracing::{error, info};

use crate::models::ModelPolicy;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub models: ModelPolicy,
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub dev_tokens: Vec<DevToken>,
}

/// Static bearer token accepted when no identity provider is configured.
#[derive(Clone, Debug, Deserialize)]
pub struct DevToken {
  pub token: String,
  pub user_id: String,
}

/// Prompt templates. Placeholders: `{problem_count}`, `{jlpt_label}`,
/// `{scenario_prompt}`, `{reading_rule}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  // Direct generation from an existing list
  pub problems_system: String,
  // Generation for a session that carries a scenario prompt
  pub scenario_session_system: String,
  // Scenario pipeline, stage 1 (problems) and stage 2 (vocabulary extraction)
  pub scenario_problems_system: String,
  pub scenario_extract_system: String,
  // Vocabulary form autofill
  pub autofill_system: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      problems_system: [
        "You generate Korean prompts for Japanese writing practice.",
        "Rules:",
        "- Output MUST be valid JSON matching the provided schema.",
        "- Create exactly {problem_count} problems.",
        "- Each problem must select 1-3 target item IDs from the provided list.",
        "- Do NOT force unrelated items into the same sentence; keep it natural and realistic.",
        "- Prompts should be natural Korean sentences one might actually say.",
        "- Model answers should be natural Japanese that includes the chosen target expressions.",
        "- Target difficulty: {jlpt_label}. Keep grammar/vocabulary/naturalness appropriate for that level.",
        "- IMPORTANT: For target ids, use the provided 'id' strings exactly (UUIDs). Do not invent new ids.",
        "- Use these exact JSON keys per problem: promptKo, targetItemIds, modelAnswerJa, altAnswerJa(optional).",
        r#"Example JSON: {"problems":[{"promptKo":"...","targetItemIds":["<uuid>"],"modelAnswerJa":"...","altAnswerJa":"..."}]}"#,
      ]
      .join("\n"),
      scenario_session_system: [
        "당신은 '상황별 단어장' 전용 일본어 작문 연습문제를 생성합니다.",
        "규칙:",
        "- 출력은 반드시 제공된 스키마를 만족하는 '유효한 JSON'이어야 합니다.",
        "- 문제는 정확히 {problem_count}개 생성하세요.",
        "- 각 문제는 제공된 단어(id) 중 1~3개를 선택해 자연스럽게 사용해야 합니다.",
        "- 서로 무관한 단어를 억지로 한 문장에 넣지 마세요.",
        "- 프롬프트(promptKo)는 실제로 말할 법한 한국어 문장이어야 합니다.",
        "- 모범답안(modelAnswerJa)은 자연스러운 일본어여야 하고, 선택한 표현을 반드시 포함해야 합니다.",
        "- 난이도는 {jlpt_label} 수준을 목표로 합니다.",
        "- IMPORTANT: target ids는 제공된 uuid를 그대로 사용해야 합니다(새로 만들면 안 됨).",
        "- 마크다운/설명/코멘트는 절대 포함하지 말고, JSON만 출력하세요.",
        "- 각 문제는 반드시 다음 키를 사용하세요: promptKo, targetItemIds, modelAnswerJa.",
        r#"예시 JSON: {"problems":[{"promptKo":"...","targetItemIds":["<uuid>"],"modelAnswerJa":"..."}]}"#,
        "",
        "상황(반드시 반영):",
        "{scenario_prompt}",
      ]
      .join("\n"),
      scenario_problems_system: [
        "당신은 일본어 작문 연습용 문제를 생성합니다.",
        "규칙:",
        "- 출력은 반드시 제공된 스키마를 만족하는 '유효한 JSON'이어야 합니다.",
        "- 문제는 정확히 {problem_count}개 생성하세요.",
        "- 프롬프트(promptKo)는 주어진 상황에서 실제로 말할 법한 자연스러운 한국어 문장이어야 합니다.",
        "- 모범답안(modelAnswerJa)은 프롬프트에 대응하는 자연스러운 일본어(대체로 1문장, 길어도 2문장)여야 합니다.",
        "- 난이도는 {jlpt_label} 수준을 목표로 합니다.",
        "- 마크다운/설명/코멘트는 절대 포함하지 말고, JSON만 출력하세요.",
        "- 각 문제는 반드시 다음 키를 사용하세요: promptKo, modelAnswerJa.",
        r#"예시 JSON: {"problems":[{"promptKo":"...","modelAnswerJa":"..."}]}"#,
      ]
      .join("\n"),
      scenario_extract_system: [
        "당신은 주어진 연습문제(모범답안 포함)로부터 단어/표현을 추출합니다.",
        "규칙:",
        "- 출력은 반드시 제공된 스키마를 만족하는 '유효한 JSON'이어야 합니다.",
        "- listName은 가능하면 짧게(가급적 20자 이내) 작성하세요.",
        "- 단어장에 저장할 가치가 있는 단어/표현만 추출하세요(불필요한 조사/기호/중복 제외).",
        "- 각 항목은 jaSurface + koMeaning이 필수입니다.",
        "- IMPORTANT: 각 항목에 안정적인 key를 부여하세요(예: w1, w2, ...).",
        "- 각 문제(index 1..{problem_count})마다 modelAnswerJa에 실제로 등장하는 key를 1-3개 선택하세요.",
        "- 마크다운/설명/코멘트는 절대 포함하지 말고, JSON만 출력하세요.",
        r#"예시: {"listName":"...","items":[{"key":"w1","jaSurface":"壁にかかった","koMeaning":"벽에 걸린"},{"key":"w2","jaSurface":"カフェ","koMeaning":"카페"}],"problemTargets":[{"index":1,"targetItemKeys":["w1"]}]}"#,
      ]
      .join("\n"),
      autofill_system: [
        "You help fill a Japanese vocabulary form for a Korean learner.",
        "Return JSON only.",
        "Rules:",
        "- koMeaning: concise Korean meaning (not a full sentence).",
        "{reading_rule}",
        "- Keep it short and practical.",
        "- If the input is a phrase with symbols like 〜, keep them; reading should correspond naturally.",
      ]
      .join("\n"),
    }
  }
}

/// Process-level settings read from the environment once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
  pub port: u16,
  pub openai_api_key: Option<String>,
  pub openai_base_url: String,
  pub openai_timeout_secs: u64,
  /// Embed truncated raw payloads in error messages.
  pub debug_raw: bool,
  pub store_backend: StoreBackend,
  pub supabase: Option<SupabaseSettings>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
  Memory,
  Supabase,
}

#[derive(Clone, Debug)]
pub struct SupabaseSettings {
  pub url: String,
  pub anon_key: String,
  pub service_role_key: String,
}

impl Settings {
  pub fn from_env() -> Self {
    let env = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());

    let port = env("PORT").and_then(|p| p.parse::<u16>().ok()).unwrap_or(3000);
    let openai_timeout_secs = env("OPENAI_TIMEOUT_SECS")
      .and_then(|s| s.parse::<u64>().ok())
      .unwrap_or(90);
    let debug_raw = env("OPENAI_DEBUG_RAW_RESPONSE")
      .map(|v| v.eq_ignore_ascii_case("true"))
      .unwrap_or(false);

    let supabase = match (env("SUPABASE_URL"), env("SUPABASE_ANON_KEY"), env("SUPABASE_SERVICE_ROLE_KEY")) {
      (Some(url), Some(anon_key), Some(service_role_key)) => Some(SupabaseSettings {
        url: url.trim_end_matches('/').to_string(),
        anon_key,
        service_role_key,
      }),
      _ => None,
    };

    let store_backend = match env("STORE_BACKEND").as_deref() {
      Some("supabase") if supabase.is_some() => StoreBackend::Supabase,
      Some("supabase") => {
        error!(target: "kotoba_backend", "STORE_BACKEND=supabase but SUPABASE_* variables are incomplete; using memory store");
        StoreBackend::Memory
      }
      _ => StoreBackend::Memory,
    };

    Self {
      port,
      openai_api_key: env("OPENAI_API_KEY"),
      openai_base_url: env("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".into()),
      openai_timeout_secs,
      debug_raw,
      store_backend,
      supabase,
    }
  }
}

/// Attempt to load `AppConfig` from APP_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_app_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("APP_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "kotoba_backend", %path, "Loaded app config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "kotoba_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "kotoba_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
