use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::coingecko::CoinGeckoClient;
use super::{http_client, FetchQuery, SignalFetcher};
use crate::error::{FetchError, FetchErrorKind};
use crate::models::{
    PairSnapshot, PeerComparison, PriceChange, RawSignal, TechnicalRaw, TxnCounts, VolumeWindow,
};

const SOURCE: &str = "dexscreener";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    pairs: Option<Vec<DexPair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DexPair {
    #[serde(default)]
    chain_id: String,
    #[serde(default)]
    dex_id: String,
    #[serde(default)]
    pair_address: String,
    #[serde(default)]
    base_token: Option<DexToken>,
    #[serde(default)]
    quote_token: Option<DexToken>,
    /// Dexscreener serializes prices as strings.
    #[serde(default)]
    price_usd: Option<String>,
    #[serde(default)]
    price_change: Option<PriceChange>,
    #[serde(default)]
    volume: Option<VolumeWindow>,
    #[serde(default)]
    txns: Option<DexTxns>,
    #[serde(default)]
    liquidity: Option<DexLiquidity>,
    #[serde(default)]
    fdv: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    pair_created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DexToken {
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct DexTxns {
    #[serde(default)]
    h24: Option<TxnCounts>,
}

#[derive(Debug, Deserialize)]
struct DexLiquidity {
    #[serde(default)]
    usd: Option<f64>,
}

impl DexPair {
    fn base_symbol(&self) -> &str {
        self.base_token.as_ref().map(|t| t.symbol.as_str()).unwrap_or("")
    }

    fn into_snapshot(self) -> PairSnapshot {
        PairSnapshot {
            base_symbol: self.base_symbol().to_string(),
            quote_symbol: self.quote_token.map(|t| t.symbol).unwrap_or_default(),
            chain_id: self.chain_id,
            dex_id: self.dex_id,
            pair_address: self.pair_address,
            price_usd: self.price_usd.and_then(|p| p.parse().ok()),
            price_change: self.price_change.unwrap_or_default(),
            volume: self.volume.unwrap_or_default(),
            txns_24h: self.txns.and_then(|t| t.h24).unwrap_or_default(),
            liquidity_usd: self.liquidity.and_then(|l| l.usd),
            fdv: self.fdv,
            market_cap: self.market_cap,
            pair_created_at: self.pair_created_at.and_then(DateTime::from_timestamp_millis),
        }
    }
}

/// Picks the first pair whose base symbol matches the token, else the first
/// pair returned.
fn select_pair(pairs: Vec<DexPair>, token: &str) -> Option<DexPair> {
    let wanted = token.trim_start_matches('$');
    let index = pairs
        .iter()
        .position(|p| p.base_symbol().eq_ignore_ascii_case(wanted))
        .unwrap_or(0);
    pairs.into_iter().nth(index)
}

/// DEX pair search used as the technical signal source, optionally joined
/// with a CoinGecko peer comparison.
pub struct DexscreenerClient {
    client: Client,
    endpoint: String,
    peer_source: Option<CoinGeckoClient>,
    max_peers: usize,
}

impl DexscreenerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            endpoint: endpoint.into(),
            peer_source: None,
            max_peers: 0,
        }
    }

    /// Adds up to `max_peers` tokens with a similar volume / market cap
    /// ratio to every snapshot. Zero disables the lookup.
    pub fn with_peers(mut self, peer_source: CoinGeckoClient, max_peers: usize) -> Self {
        self.peer_source = (max_peers > 0).then_some(peer_source);
        self.max_peers = max_peers;
        self
    }

    async fn search_pair(&self, symbol: &str, deadline: Duration) -> Result<PairSnapshot, FetchError> {
        let url = format!("{}/search", self.endpoint.trim_end_matches('/'));
        tracing::debug!(token = %symbol, url = %url, "Searching DEX pairs");

        let response = self
            .client
            .get(&url)
            .query(&[("q", symbol)])
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(SOURCE, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(SOURCE, status, &body));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| FetchError::from_reqwest(SOURCE, e))?;

        let pair = select_pair(parsed.pairs.unwrap_or_default(), symbol).ok_or_else(|| {
            FetchError::new(
                FetchErrorKind::NotFound,
                SOURCE,
                format!("no trading pairs for {}", symbol),
            )
        })?;
        Ok(pair.into_snapshot())
    }

    /// Peer data is supplementary: a failed lookup leaves it out.
    async fn peers(&self, symbol: &str, deadline: Duration) -> Option<PeerComparison> {
        let source = self.peer_source.as_ref()?;
        match source.peer_comparison(symbol, self.max_peers, deadline).await {
            Ok(comparison) => comparison,
            Err(err) => {
                tracing::warn!(token = %symbol, error = %err, "Peer comparison unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl SignalFetcher for DexscreenerClient {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<RawSignal, FetchError> {
        let symbol = query.token.trim_start_matches('$');
        let (snapshot, peer_comparison) = tokio::join!(
            self.search_pair(symbol, query.deadline),
            self.peers(symbol, query.deadline)
        );
        let snapshot = snapshot?;

        tracing::info!(
            token = %symbol,
            pair = %snapshot.pair_address,
            dex = %snapshot.dex_id,
            peers = peer_comparison.as_ref().map(|c| c.peers.len()).unwrap_or(0),
            "Fetched pair snapshot"
        );

        Ok(RawSignal::Technical(TechnicalRaw {
            pair_data: snapshot,
            peer_comparison,
            fetched_at: Utc::now(),
            source_error: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_BODY: &str = r#"{"schemaVersion":"1.0.0","pairs":[
        {"chainId":"solana","dexId":"orca","pairAddress":"P1",
         "baseToken":{"symbol":"WSOL"},"quoteToken":{"symbol":"USDC"},"priceUsd":"10.0"},
        {"chainId":"solana","dexId":"raydium","pairAddress":"P2",
         "baseToken":{"symbol":"SOL"},"quoteToken":{"symbol":"USDC"},"priceUsd":"142.37",
         "priceChange":{"m5":0.1,"h1":-0.4,"h6":1.2,"h24":3.5},
         "volume":{"h24":1250000.5},"txns":{"h24":{"buys":900,"sells":700}},
         "liquidity":{"usd":5400000.0},"fdv":70000000000,"pairCreatedAt":1700000000000}
    ]}"#;

    #[test]
    fn prefers_pair_with_matching_base_symbol() {
        let parsed: SearchResponse = serde_json::from_str(SEARCH_BODY).unwrap();
        let pair = select_pair(parsed.pairs.unwrap(), "$sol").unwrap();
        let snapshot = pair.into_snapshot();

        assert_eq!(snapshot.pair_address, "P2");
        assert_eq!(snapshot.price_usd, Some(142.37));
        assert_eq!(snapshot.price_change.h24, Some(3.5));
        assert_eq!(snapshot.volume.h6, None);
        assert_eq!(snapshot.txns_24h, TxnCounts { buys: 900, sells: 700 });
        assert_eq!(snapshot.liquidity_usd, Some(5_400_000.0));
        assert!(snapshot.pair_created_at.is_some());
    }

    #[test]
    fn falls_back_to_first_pair() {
        let parsed: SearchResponse = serde_json::from_str(SEARCH_BODY).unwrap();
        let pair = select_pair(parsed.pairs.unwrap(), "BONK").unwrap();
        assert_eq!(pair.pair_address, "P1");
    }

    #[tokio::test]
    async fn peer_lookup_is_optional() {
        let disabled = DexscreenerClient::new("http://127.0.0.1:1")
            .with_peers(CoinGeckoClient::new("http://127.0.0.1:1"), 0);
        assert!(disabled.peer_source.is_none());
        assert!(disabled.peers("SOL", Duration::from_secs(1)).await.is_none());

        let unreachable = DexscreenerClient::new("http://127.0.0.1:1")
            .with_peers(CoinGeckoClient::new("http://127.0.0.1:1"), 3);
        assert!(unreachable.peers("SOL", Duration::from_secs(5)).await.is_none());
    }

    #[test]
    fn null_pairs_select_nothing() {
        let parsed: SearchResponse = serde_json::from_str(r#"{"pairs":null}"#).unwrap();
        assert!(select_pair(parsed.pairs.unwrap_or_default(), "SOL").is_none());
    }
}
