// Business constants and runtime settings.
//
// The constants are fixed by the dashboard contract; the settings only
// concern the advisor and are read from the environment (a `.env` file is
// honoured when present).
use std::env;

pub const VAT_RATE: f64 = 0.15;
/// Share of revenue assumed as profit when neither profit nor cost is known.
pub const PROFIT_ESTIMATE_RATE: f64 = 0.20;
pub const TOP_CITIES: usize = 5;
pub const TOP_REVENUE_ITEMS: usize = 5;
pub const TOP_MARGIN_ITEMS: usize = 3;

pub const CURRENCY_SUFFIX: &str = " SAR";

/// Longest context block handed to the advisor, in characters.
pub const MAX_CONTEXT_CHARS: usize = 2000;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Load `.env` (if any) and read settings from the process environment.
    pub fn from_env() -> Self {
        if let Err(e) = dotenv::dotenv() {
            tracing::debug!("no .env loaded: {}", e);
        }
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Build settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        Self {
            api_key: get("SALES_INSIGHT_API_KEY").or_else(|| get("OPENAI_API_KEY")),
            model: get("SALES_INSIGHT_MODEL").unwrap_or(defaults.model),
            base_url: get("SALES_INSIGHT_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            timeout_secs: get("SALES_INSIGHT_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}
