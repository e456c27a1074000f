use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use common::LanguageModel;

use super::{truncate_chars, AnalyzerAgent, BaseAnalyzer};
use crate::api::SignalFetcher;
use crate::models::{AgentFinding, AgentKind, RawSignal, Transaction, TransferDirection, WalletRequest};

const WALLET_SYSTEM_PROMPT: &str = r#"
You are the Wallet Risk Analyst.
Your role is to read a Solana wallet's recent on-chain history and judge its trading posture.

Focus on:
- Activity level and what kinds of transactions dominate (swaps, transfers, mints)
- Net SOL flow and fees paid
- Concentration in a few tokens and churn between them
- Signs of over-trading, panic selling or disciplined accumulation

Score the wallet posture from -1 (over-exposed, risky activity that argues for de-risking)
to 1 (healthy, disciplined activity with room to add exposure).
Confidence is 0 to 1 and should drop when the history is short.

Reply with one JSON object only:
{"score": <-1..1>, "confidence": <0..1>, "summary": "<one or two sentences>"}
"#;

pub const MAX_DESCRIPTION_CHARS: usize = 160;
pub const MAX_TRANSFERS_PER_TX: usize = 5;
const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

pub struct WalletAgent {
    base: BaseAnalyzer,
    max_transactions: usize,
}

impl WalletAgent {
    pub fn new(fetcher: Arc<dyn SignalFetcher>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            base: BaseAnalyzer::new(AgentKind::Wallet, WALLET_SYSTEM_PROMPT, fetcher, model),
            max_transactions: 50,
        }
    }

    pub fn with_max_transactions(mut self, max_transactions: usize) -> Self {
        self.max_transactions = max_transactions.max(1);
        self
    }

    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.base = self.base.with_fetch_deadline(deadline);
        self
    }

    /// Newest first, ties broken by signature, capped at `max_transactions`.
    fn select_transactions<'a>(&self, transactions: &'a [Transaction]) -> Vec<&'a Transaction> {
        let mut selected: Vec<&Transaction> = transactions.iter().collect();
        selected.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        selected.truncate(self.max_transactions);
        selected
    }

    fn render_transaction(prompt: &mut String, tx: &Transaction) {
        let when = DateTime::from_timestamp(tx.timestamp, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| tx.timestamp.to_string());
        prompt.push_str(&format!(
            "- {} {} via {} | SOL {:+.4}",
            when,
            tx.kind,
            tx.source.as_deref().unwrap_or("unknown"),
            tx.native_change_lamports as f64 / LAMPORTS_PER_SOL
        ));
        if let Some(description) = &tx.description {
            prompt.push_str(" | ");
            prompt.push_str(&truncate_chars(description, MAX_DESCRIPTION_CHARS));
        }
        prompt.push('\n');

        for transfer in tx.token_transfers.iter().take(MAX_TRANSFERS_PER_TX) {
            let arrow = match transfer.direction {
                TransferDirection::In => "in",
                TransferDirection::Out => "out",
            };
            prompt.push_str(&format!("    {} {} {}\n", arrow, transfer.amount, transfer.mint));
        }
        let hidden = tx.token_transfers.len().saturating_sub(MAX_TRANSFERS_PER_TX);
        if hidden > 0 {
            prompt.push_str(&format!("    ... {} more transfers\n", hidden));
        }
    }

    pub fn render_prompt(&self, request: &WalletRequest, raw: &RawSignal) -> String {
        let transactions = match raw {
            RawSignal::Wallet(wallet) => self.select_transactions(&wallet.transactions),
            _ => Vec::new(),
        };

        let mut kinds: BTreeMap<&str, usize> = BTreeMap::new();
        let mut fees: u64 = 0;
        let mut net_lamports: i64 = 0;
        let (mut inflows, mut outflows) = (0usize, 0usize);
        for tx in &transactions {
            *kinds.entry(tx.kind.as_str()).or_default() += 1;
            fees += tx.fee;
            net_lamports += tx.native_change_lamports;
            for transfer in &tx.token_transfers {
                match transfer.direction {
                    TransferDirection::In => inflows += 1,
                    TransferDirection::Out => outflows += 1,
                }
            }
        }

        let mut prompt = format!(
            "Wallet: {}\nInvestor preferences: {}\n",
            request.wallet_address, request.preferences
        );
        if let Some(err) = raw.source_error() {
            prompt.push_str(&format!("Note: history is degraded ({}).\n", err.kind));
        }

        let breakdown = kinds
            .iter()
            .map(|(kind, count)| format!("{} {}", kind, count))
            .collect::<Vec<_>>()
            .join(", ");
        prompt.push_str(&format!(
            "\nActivity summary:\n\
             Transactions analyzed: {}\n\
             By type: {}\n\
             Token transfers: {} in / {} out\n\
             Net SOL change: {:+.4}\n\
             Fees paid: {:.6} SOL\n",
            transactions.len(),
            breakdown,
            inflows,
            outflows,
            net_lamports as f64 / LAMPORTS_PER_SOL,
            fees as f64 / LAMPORTS_PER_SOL
        ));

        prompt.push_str("\nRecent transactions (newest first):\n");
        for tx in transactions {
            Self::render_transaction(&mut prompt, tx);
        }

        prompt.push_str("\nAssess this wallet's posture and reply with the JSON object.");
        prompt
    }
}

#[async_trait]
impl AnalyzerAgent for WalletAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Wallet
    }

    async fn analyze(&self, request: &WalletRequest) -> AgentFinding {
        let raw = match self.base.fetch(request).await {
            Ok(raw) => raw,
            Err(err) => return self.base.fetch_failed(err),
        };
        let prompt = self.render_prompt(request, &raw);
        self.base.interpret(raw, &prompt).await
    }
}
