use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::http_client;
use crate::error::FetchError;
use crate::models::{PeerComparison, PeerToken};

const SOURCE: &str = "coingecko";
const MARKETS_PAGE_SIZE: &str = "250";
/// Peers must sit within this fraction of the anchor's volume / market cap ratio.
pub const SIMILAR_RATIO_TOLERANCE: f64 = 0.2;

#[derive(Debug, Clone, Deserialize)]
pub struct CoinMarket {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
}

impl CoinMarket {
    /// 24h volume over market cap, `None` without a positive market cap.
    pub fn volume_mcap_ratio(&self) -> Option<f64> {
        let market_cap = self.market_cap.filter(|m| *m > 0.0)?;
        let ratio = self.total_volume.unwrap_or(0.0) / market_cap;
        ratio.is_finite().then_some(ratio)
    }

    fn is_stablecoin(&self) -> bool {
        let symbol = self.symbol.to_lowercase();
        ["usd", "dai"].iter().any(|s| symbol.contains(s))
    }
}

/// Finds up to `limit` coins whose volume / market cap ratio is within
/// `tolerance` of `token`'s, closest first. `None` when the token is not
/// listed or has no usable ratio.
pub fn similar_ratio_peers(
    coins: &[CoinMarket],
    token: &str,
    tolerance: f64,
    limit: usize,
) -> Option<PeerComparison> {
    let wanted = token.trim_start_matches('$');
    let anchor = coins
        .iter()
        .find(|c| c.symbol.eq_ignore_ascii_case(wanted))?
        .volume_mcap_ratio()
        .filter(|r| *r > 0.0)?;

    let (lower, upper) = (anchor * (1.0 - tolerance), anchor * (1.0 + tolerance));
    let mut peers: Vec<PeerToken> = Vec::new();
    for coin in coins {
        if coin.symbol.eq_ignore_ascii_case(wanted) || coin.is_stablecoin() {
            continue;
        }
        let Some(ratio) = coin.volume_mcap_ratio() else {
            continue;
        };
        if ratio < lower || ratio > upper {
            continue;
        }
        let symbol = coin.symbol.to_uppercase();
        if peers.iter().any(|p| p.symbol == symbol) {
            continue;
        }
        peers.push(PeerToken {
            symbol,
            name: coin.name.clone(),
            volume_mcap_ratio: ratio,
            market_cap: coin.market_cap.unwrap_or(0.0),
            price_change_24h: coin.price_change_percentage_24h,
        });
    }

    peers.sort_by(|a, b| {
        let da = (a.volume_mcap_ratio - anchor).abs();
        let db = (b.volume_mcap_ratio - anchor).abs();
        da.total_cmp(&db).then_with(|| a.symbol.cmp(&b.symbol))
    });
    peers.truncate(limit);

    Some(PeerComparison {
        anchor_ratio: anchor,
        tolerance,
        peers,
    })
}

/// Market listing used to find tokens that trade like the queried one.
#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    endpoint: String,
}

impl CoinGeckoClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            endpoint: endpoint.into(),
        }
    }

    /// Top coins by market cap.
    pub async fn markets(&self, deadline: Duration) -> Result<Vec<CoinMarket>, FetchError> {
        let url = format!("{}/coins/markets", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[
                ("vs_currency", "usd"),
                ("order", "market_cap_desc"),
                ("per_page", MARKETS_PAGE_SIZE),
                ("page", "1"),
                ("sparkline", "false"),
            ])
            .header("Accept", "application/json")
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(SOURCE, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(SOURCE, status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::from_reqwest(SOURCE, e))
    }

    pub async fn peer_comparison(
        &self,
        token: &str,
        limit: usize,
        deadline: Duration,
    ) -> Result<Option<PeerComparison>, FetchError> {
        let coins = self.markets(deadline).await?;
        let comparison = similar_ratio_peers(&coins, token, SIMILAR_RATIO_TOLERANCE, limit);
        tracing::debug!(
            token = %token,
            listed = coins.len(),
            peers = comparison.as_ref().map(|c| c.peers.len()).unwrap_or(0),
            "Computed peer comparison"
        );
        Ok(comparison)
    }
}
