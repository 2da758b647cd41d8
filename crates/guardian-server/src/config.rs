use std::path::PathBuf;

use anyhow::{Context, Result};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub max_dependents: u32,
    pub require_entitlement: bool,
    pub max_steps: u32,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub chat_model: String,
    pub reasoning_model: String,
    pub topic_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Every key is read with the `GUARDIAN_` prefix.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| {
            lookup(&format!("GUARDIAN_{}", name)).unwrap_or_else(|| default.to_string())
        };

        let chat_model = var("CHAT_MODEL", "gpt-4o-mini");
        Ok(Config {
            host: var("HOST", "0.0.0.0"),
            port: var("PORT", "3000").parse().context("invalid GUARDIAN_PORT")?,
            db_path: var("DB_PATH", "guardian.db").into(),
            jwt_secret: var("JWT_SECRET", ""),
            token_ttl_days: var("TOKEN_TTL_DAYS", "30")
                .parse()
                .context("invalid GUARDIAN_TOKEN_TTL_DAYS")?,
            max_dependents: var("MAX_DEPENDENTS", "4")
                .parse()
                .context("invalid GUARDIAN_MAX_DEPENDENTS")?,
            require_entitlement: parse_bool(&var("REQUIRE_ENTITLEMENT", "true"))
                .context("invalid GUARDIAN_REQUIRE_ENTITLEMENT")?,
            max_steps: var("MAX_STEPS", "5").parse().context("invalid GUARDIAN_MAX_STEPS")?,
            llm_base_url: var("LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_api_key: var("LLM_API_KEY", ""),
            reasoning_model: var("REASONING_MODEL", "o3-mini"),
            topic_model: var("TOPIC_MODEL", &chat_model),
            chat_model,
        })
    }

    pub fn jwt_secret_is_placeholder(&self) -> bool {
        self.jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{}'", other),
    }
}
