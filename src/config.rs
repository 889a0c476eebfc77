use tracing::{info, warn};

use crate::judge::JudgeConfig;

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATABASE_URL: &str = "sqlite://debate.db";
const DEFAULT_FRONTEND_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_JUDGE_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_JUDGE_MODEL_ID: &str = "gpt-4o-mini";

/// Environment-driven configuration. The core needs nothing else from the
/// environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// CORS allow-list for the frontend.
    pub frontend_origins: Vec<String>,
    pub judge: JudgeConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let frontend_origins: Vec<String> = std::env::var("FRONTEND_ORIGINS")
            .unwrap_or_else(|_| DEFAULT_FRONTEND_ORIGIN.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let api_key = std::env::var("JUDGE_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            warn!("JUDGE_API_KEY is not set; evaluations will fail");
        } else {
            info!("judge credentials loaded");
        }

        let judge = JudgeConfig {
            base_url: std::env::var("JUDGE_API_URL")
                .unwrap_or_else(|_| DEFAULT_JUDGE_API_URL.to_string()),
            api_key,
            model: std::env::var("JUDGE_MODEL_ID")
                .unwrap_or_else(|_| DEFAULT_JUDGE_MODEL_ID.to_string()),
        };

        Self {
            port,
            database_url,
            frontend_origins,
            judge,
        }
    }
}
