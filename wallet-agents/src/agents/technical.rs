use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::LanguageModel;

use super::{AnalyzerAgent, BaseAnalyzer};
use crate::api::SignalFetcher;
use crate::models::{AgentFinding, AgentKind, PairSnapshot, PeerComparison, RawSignal, WalletRequest};

const TECHNICAL_SYSTEM_PROMPT: &str = r#"
You are the Technical Analysis Expert.
Your role is to judge the market structure of a token from its DEX trading data.

Focus on:
- Price action across the 5m, 1h, 6h and 24h windows
- Volume relative to liquidity
- Buy versus sell pressure
- Liquidity depth and valuation (FDV, market cap)
- Pair age and how established the market is
- How the token compares with peers that trade at a similar volume / market cap ratio

Score the technical strength from -1 (strongly bearish or illiquid) to 1 (strongly bullish and healthy).
Confidence is 0 to 1 and should drop when fields are missing or liquidity is thin.

Reply with one JSON object only:
{"score": <-1..1>, "confidence": <0..1>, "summary": "<one or two sentences>"}
"#;

const MAX_PROMPT_PEERS: usize = 10;

pub struct TechnicalAgent {
    base: BaseAnalyzer,
}

fn opt_usd(value: Option<f64>) -> String {
    match value {
        Some(v) if v >= 1_000_000_000.0 => format!("${:.2}B", v / 1_000_000_000.0),
        Some(v) if v >= 1_000_000.0 => format!("${:.2}M", v / 1_000_000.0),
        Some(v) if v >= 1.0 => format!("${:.2}", v),
        Some(v) => format!("${:.8}", v),
        None => "n/a".to_string(),
    }
}

fn opt_pct(value: Option<f64>) -> String {
    value.map(|v| format!("{:+.2}%", v)).unwrap_or_else(|| "n/a".to_string())
}

impl TechnicalAgent {
    pub fn new(fetcher: Arc<dyn SignalFetcher>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            base: BaseAnalyzer::new(AgentKind::Technical, TECHNICAL_SYSTEM_PROMPT, fetcher, model),
        }
    }

    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.base = self.base.with_fetch_deadline(deadline);
        self
    }

    pub fn with_default_token(mut self, token: impl Into<String>) -> Self {
        self.base = self.base.with_default_token(token);
        self
    }

    /// Renders only the known pair fields plus two derived ratios.
    fn render_pair(prompt: &mut String, pair: &PairSnapshot) {
        prompt.push_str(&format!(
            "Pair: {}/{} on {} ({})\n",
            pair.base_symbol, pair.quote_symbol, pair.dex_id, pair.chain_id
        ));
        prompt.push_str(&format!("Price: {}\n", opt_usd(pair.price_usd)));
        prompt.push_str(&format!(
            "Price change: 5m {} | 1h {} | 6h {} | 24h {}\n",
            opt_pct(pair.price_change.m5),
            opt_pct(pair.price_change.h1),
            opt_pct(pair.price_change.h6),
            opt_pct(pair.price_change.h24)
        ));
        prompt.push_str(&format!(
            "Volume: 1h {} | 6h {} | 24h {}\n",
            opt_usd(pair.volume.h1),
            opt_usd(pair.volume.h6),
            opt_usd(pair.volume.h24)
        ));
        prompt.push_str(&format!(
            "24h transactions: {} buys / {} sells\n",
            pair.txns_24h.buys, pair.txns_24h.sells
        ));
        prompt.push_str(&format!("Liquidity: {}\n", opt_usd(pair.liquidity_usd)));
        prompt.push_str(&format!("FDV: {}\n", opt_usd(pair.fdv)));
        prompt.push_str(&format!("Market cap: {}\n", opt_usd(pair.market_cap)));
        if let Some(created) = pair.pair_created_at {
            prompt.push_str(&format!("Pair created: {}\n", created.format("%Y-%m-%d")));
        }

        prompt.push_str("\nDerived:\n");
        let total_txns = pair.txns_24h.buys + pair.txns_24h.sells;
        if total_txns > 0 {
            prompt.push_str(&format!(
                "Buy share of 24h transactions: {:.1}%\n",
                pair.txns_24h.buys as f64 / total_txns as f64 * 100.0
            ));
        }
        if let (Some(volume), Some(liquidity)) = (pair.volume.h24, pair.liquidity_usd) {
            if liquidity > 0.0 {
                prompt.push_str(&format!("24h volume / liquidity: {:.2}x\n", volume / liquidity));
            }
        }
    }

    fn render_peers(prompt: &mut String, comparison: &PeerComparison) {
        if comparison.peers.is_empty() {
            prompt.push_str(&format!(
                "\nNo peers trade within {:.0}% of this token's 24h volume / market cap ratio ({:.3}).\n",
                comparison.tolerance * 100.0,
                comparison.anchor_ratio
            ));
            return;
        }

        prompt.push_str(&format!(
            "\nPeers within {:.0}% of this token's 24h volume / market cap ratio ({:.3}):\n",
            comparison.tolerance * 100.0,
            comparison.anchor_ratio
        ));
        for peer in comparison.peers.iter().take(MAX_PROMPT_PEERS) {
            prompt.push_str(&format!(
                "- {} ({}): ratio {:.3} | market cap {} | 24h {}\n",
                peer.symbol,
                peer.name,
                peer.volume_mcap_ratio,
                opt_usd(Some(peer.market_cap)),
                opt_pct(peer.price_change_24h)
            ));
        }
    }

    pub fn render_prompt(&self, request: &WalletRequest, raw: &RawSignal, token: &str) -> String {
        let mut prompt = format!(
            "Token: {}\nInvestor preferences: {}\n",
            token, request.preferences
        );
        if let Some(err) = raw.source_error() {
            prompt.push_str(&format!("Note: market data is degraded ({}).\n", err.kind));
        }

        prompt.push_str("\nMarket data:\n");
        match raw {
            RawSignal::Technical(technical) => {
                Self::render_pair(&mut prompt, &technical.pair_data);
                if let Some(comparison) = &technical.peer_comparison {
                    Self::render_peers(&mut prompt, comparison);
                }
            }
            _ => prompt.push_str("No pair data.\n"),
        }

        prompt.push_str("\nAssess the technical strength of this market and reply with the JSON object.");
        prompt
    }
}

#[async_trait]
impl AnalyzerAgent for TechnicalAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Technical
    }

    async fn analyze(&self, request: &WalletRequest) -> AgentFinding {
        let raw = match self.base.fetch(request).await {
            Ok(raw) => raw,
            Err(err) => return self.base.fetch_failed(err),
        };
        let prompt = self.render_prompt(request, &raw, self.base.token_for(request));
        self.base.interpret(raw, &prompt).await
    }
}
