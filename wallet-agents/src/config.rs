use std::env;
use std::str::FromStr;
use std::time::Duration;

use common::ModelProvider;

use crate::api::social_media::SocialFallback;
use crate::error::ConfigError;

pub const DEFAULT_FARCASTER_ENDPOINT: &str = "https://client.warpcast.com/v2/search-casts";
pub const DEFAULT_DEXS_ENDPOINT: &str = "https://api.dexscreener.com/latest/dex";
pub const DEFAULT_HELIUS_ENDPOINT: &str = "https://api.helius.xyz/v0";
pub const DEFAULT_COINGECKO_ENDPOINT: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Clone, PartialEq)]
pub struct AgentModelConfig {
    pub provider: ModelProvider,
    pub model: String,
}

impl AgentModelConfig {
    fn default_for(provider: ModelProvider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
        }
    }
}

/// Per-call deadlines. Analyzer timeouts are absorbed as failed findings;
/// the insights timeout is fatal for the request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutConfig {
    pub sentiment: Duration,
    pub technical: Duration,
    pub wallet: Duration,
    pub insights: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            sentiment: Duration::from_secs(30),
            technical: Duration::from_secs(30),
            wallet: Duration::from_secs(30),
            insights: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub sentiment_model: AgentModelConfig,
    pub technical_model: AgentModelConfig,
    pub wallet_model: AgentModelConfig,
    pub insights_model: AgentModelConfig,

    pub farcaster_endpoint: String,
    pub dexscreener_endpoint: String,
    pub helius_endpoint: String,
    pub helius_api_key: Option<String>,
    pub coingecko_endpoint: String,

    pub timeouts: TimeoutConfig,
    pub max_posts: usize,
    /// Peer tokens added to the technical signal; zero disables the lookup.
    pub max_peers: usize,
    pub max_transactions: usize,
    pub default_token: String,
    pub social_fallback: SocialFallback,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sentiment_model: AgentModelConfig::default_for(ModelProvider::OpenAI),
            technical_model: AgentModelConfig::default_for(ModelProvider::OpenAI),
            wallet_model: AgentModelConfig::default_for(ModelProvider::OpenAI),
            insights_model: AgentModelConfig::default_for(ModelProvider::OpenAI),

            farcaster_endpoint: DEFAULT_FARCASTER_ENDPOINT.to_string(),
            dexscreener_endpoint: DEFAULT_DEXS_ENDPOINT.to_string(),
            helius_endpoint: DEFAULT_HELIUS_ENDPOINT.to_string(),
            helius_api_key: None,
            coingecko_endpoint: DEFAULT_COINGECKO_ENDPOINT.to_string(),

            timeouts: TimeoutConfig::default(),
            max_posts: 20,
            max_peers: 5,
            max_transactions: 50,
            default_token: "SOL".to_string(),
            social_fallback: SocialFallback::Fail,
        }
    }
}

impl AppConfig {
    /// Loads `.env` (if present) and then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let timeouts = TimeoutConfig {
            sentiment: secs(&lookup, "SENTIMENT_TIMEOUT_SECS", defaults.timeouts.sentiment)?,
            technical: secs(&lookup, "TECHNICAL_TIMEOUT_SECS", defaults.timeouts.technical)?,
            wallet: secs(&lookup, "WALLET_TIMEOUT_SECS", defaults.timeouts.wallet)?,
            insights: secs(&lookup, "INSIGHTS_TIMEOUT_SECS", defaults.timeouts.insights)?,
        };

        Ok(Self {
            sentiment_model: agent_model(&lookup, "SENTIMENT")?,
            technical_model: agent_model(&lookup, "TECHNICAL")?,
            wallet_model: agent_model(&lookup, "WALLET")?,
            insights_model: agent_model(&lookup, "INSIGHTS")?,

            farcaster_endpoint: lookup("FARCASTER_ENDPOINT").unwrap_or(defaults.farcaster_endpoint),
            dexscreener_endpoint: lookup("DEXS_ENDPOINT").unwrap_or(defaults.dexscreener_endpoint),
            helius_endpoint: lookup("HELIUS_ENDPOINT").unwrap_or(defaults.helius_endpoint),
            helius_api_key: lookup("HELIUS_API_KEY").filter(|key| !key.trim().is_empty()),
            coingecko_endpoint: lookup("COINGECKO_ENDPOINT").unwrap_or(defaults.coingecko_endpoint),

            timeouts,
            max_posts: parsed(&lookup, "SENTIMENT_MAX_POSTS", defaults.max_posts)?,
            max_peers: parsed(&lookup, "TECHNICAL_MAX_PEERS", defaults.max_peers)?,
            max_transactions: parsed(&lookup, "WALLET_MAX_TRANSACTIONS", defaults.max_transactions)?,
            default_token: lookup("DEFAULT_TOKEN").unwrap_or(defaults.default_token),
            social_fallback: parsed(&lookup, "SOCIAL_FALLBACK", defaults.social_fallback)?,
        })
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: u64 = parsed(lookup, key, default.as_secs())?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "timeout must be at least one second".to_string(),
        });
    }
    Ok(Duration::from_secs(value))
}

/// Reads `<PREFIX>_PROVIDER` and `<PREFIX>_MODEL`, falling back to the
/// provider's default model.
fn agent_model<F>(lookup: &F, prefix: &str) -> Result<AgentModelConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let provider: ModelProvider =
        parsed(lookup, &format!("{}_PROVIDER", prefix), ModelProvider::OpenAI)?;
    let model = lookup(&format!("{}_MODEL", prefix))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| provider.default_model().to_string());

    Ok(AgentModelConfig { provider, model })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.social_fallback, SocialFallback::Fail);
        assert_eq!(config.default_token, "SOL");
    }

    #[test]
    fn per_agent_provider_and_timeouts_are_independent() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("SENTIMENT_PROVIDER", "deepseek"),
            ("INSIGHTS_PROVIDER", "gemini"),
            ("INSIGHTS_MODEL", "gemini-1.5-pro"),
            ("TECHNICAL_TIMEOUT_SECS", "5"),
            ("INSIGHTS_TIMEOUT_SECS", "90"),
            ("SOCIAL_FALLBACK", "canned"),
            ("HELIUS_API_KEY", "  "),
            ("TECHNICAL_MAX_PEERS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.sentiment_model.provider, ModelProvider::DeepSeek);
        assert_eq!(config.sentiment_model.model, "deepseek-chat");
        assert_eq!(config.insights_model.model, "gemini-1.5-pro");
        assert_eq!(config.technical_model.provider, ModelProvider::OpenAI);
        assert_eq!(config.timeouts.technical, Duration::from_secs(5));
        assert_eq!(config.timeouts.wallet, Duration::from_secs(30));
        assert_eq!(config.timeouts.insights, Duration::from_secs(90));
        assert_eq!(config.social_fallback, SocialFallback::Canned);
        assert_eq!(config.helius_api_key, None);
        assert_eq!(config.max_peers, 0);
        assert_eq!(config.coingecko_endpoint, DEFAULT_COINGECKO_ENDPOINT);
    }

    #[test]
    fn rejects_unparseable_values() {
        let err = AppConfig::from_lookup(lookup_from(&[("SENTIMENT_MAX_POSTS", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SENTIMENT_MAX_POSTS"));

        let err = AppConfig::from_lookup(lookup_from(&[("WALLET_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = AppConfig::from_lookup(lookup_from(&[("TECHNICAL_PROVIDER", "cohere")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
