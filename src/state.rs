//! Application state: persistence gateway, structured completion client,
//! model policy, prompt templates and the bearer-token resolver.
//!
//! Built once at startup from `Settings` plus the optional TOML `AppConfig`,
//! then shared as `Arc<AppState>` by every handler.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::auth::{AuthProvider, StaticTokenAuth, SupabaseAuth};
use crate::config::{AppConfig, Prompts, Settings, StoreBackend};
use crate::models::ModelPolicy;
use crate::openai::{OpenAI, StructuredClient};
use crate::store::{MemoryStore, Store, SupabaseStore};

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub llm: StructuredClient,
    pub models: ModelPolicy,
    pub prompts: Prompts,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    /// Pick store and auth backends from `settings`; models, prompts and dev tokens come from `config`.
    #[instrument(level = "info", skip_all)]
    pub fn build(settings: &Settings, config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let AppConfig { models, prompts, dev_tokens } = config;

        let store: Arc<dyn Store> = match (settings.store_backend, &settings.supabase) {
            (StoreBackend::Supabase, Some(sb)) => {
                info!(target: "kotoba_backend", url = %sb.url, "Using Supabase store");
                Arc::new(SupabaseStore::new(sb)?)
            }
            _ => {
                warn!(target: "kotoba_backend", "Using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let auth: Arc<dyn AuthProvider> = match &settings.supabase {
            Some(sb) => Arc::new(SupabaseAuth::new(sb)?),
            None => {
                let tokens = StaticTokenAuth::new(&dev_tokens);
                if tokens.is_empty() {
                    warn!(target: "kotoba_backend", "No identity provider and no dev tokens configured; every request will be rejected");
                } else {
                    info!(target: "kotoba_backend", tokens = tokens.len(), "Using static dev tokens");
                }
                Arc::new(tokens)
            }
        };

        let openai = OpenAI::from_settings(settings)?;
        if openai.is_configured() {
            info!(target: "kotoba_backend", base_url = %openai.base_url, timeout_secs = settings.openai_timeout_secs, "OpenAI enabled");
        } else {
            warn!(target: "kotoba_backend", "OPENAI_API_KEY not set; generation endpoints will fail");
        }
        if settings.debug_raw {
            warn!(target: "kotoba_backend", "Raw model payloads will be embedded in error messages");
        }

        info!(
            target: "kotoba_backend",
            generate = %models.generate.model,
            autofill = %models.autofill.model,
            grade = %models.grade.choice.model,
            grade_fallback_on_needs_fix = models.grade.fallback_on_needs_fix,
            tts = %models.tts.model,
            "Model policy loaded"
        );

        Ok(Self {
            store,
            llm: StructuredClient::new(Arc::new(openai), settings.debug_raw),
            models,
            prompts,
            auth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DevToken;

    fn settings() -> Settings {
        Settings {
            port: 0,
            openai_api_key: None,
            openai_base_url: "http://localhost:1".into(),
            openai_timeout_secs: 5,
            debug_raw: false,
            store_backend: StoreBackend::Memory,
            supabase: None,
        }
    }

    #[tokio::test]
    async fn memory_state_resolves_dev_tokens() {
        let config = AppConfig {
            dev_tokens: vec![DevToken { token: "t".into(), user_id: "u".into() }],
            ..AppConfig::default()
        };
        let state = AppState::build(&settings(), config).unwrap();
        assert_eq!(state.auth.resolve("t").await.unwrap().as_deref(), Some("u"));
        assert_eq!(state.models, ModelPolicy::default());
        assert!(!state.llm.debug_raw());
    }
}
