use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::RawSignal;

pub mod coingecko;
pub mod dexscreener;
pub mod helius;
pub mod social_media;

pub use coingecko::CoinGeckoClient;
pub use dexscreener::DexscreenerClient;
pub use helius::HeliusClient;
pub use social_media::{SocialFallback, SocialMediaClient};

/// Source-specific parameters for one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    pub wallet_address: String,
    pub token: String,
    pub deadline: Duration,
}

/// Pulls raw data for one signal type.
///
/// Implementations hold no per-request state; the same instance serves many
/// concurrent requests.
#[async_trait]
pub trait SignalFetcher: Send + Sync {
    fn source(&self) -> &str;

    async fn fetch(&self, query: &FetchQuery) -> Result<RawSignal, FetchError>;
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("wallet-agents/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
