use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use super::{http_client, FetchQuery, SignalFetcher};
use crate::error::{FetchError, FetchErrorKind};
use crate::models::{RawSignal, TokenTransfer, Transaction, TransferDirection, WalletRaw};

const SOURCE: &str = "helius";
/// Largest page the enhanced transactions endpoint serves.
const MAX_PAGE: usize = 100;

// ============================================================================
// Helius API Types - Enhanced Transaction Format
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnhancedTransaction {
    signature: String,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    fee: u64,
    #[serde(rename = "type", default)]
    tx_type: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    token_transfers: Vec<HeliusTokenTransfer>,
    #[serde(default)]
    account_data: Vec<AccountData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeliusTokenTransfer {
    #[serde(default)]
    from_user_account: Option<String>,
    #[serde(default)]
    to_user_account: Option<String>,
    #[serde(default)]
    token_amount: f64,
    #[serde(default)]
    mint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountData {
    account: String,
    #[serde(default)]
    native_balance_change: i64,
}

impl EnhancedTransaction {
    /// Projects the transaction onto what matters for `wallet`: transfers
    /// touching it and its own lamport delta.
    fn into_transaction(self, wallet: &str) -> Transaction {
        let token_transfers = self
            .token_transfers
            .into_iter()
            .filter_map(|t| {
                let direction = if t.to_user_account.as_deref() == Some(wallet) {
                    TransferDirection::In
                } else if t.from_user_account.as_deref() == Some(wallet) {
                    TransferDirection::Out
                } else {
                    return None;
                };
                Some(TokenTransfer {
                    mint: t.mint,
                    amount: t.token_amount,
                    direction,
                })
            })
            .collect();

        let native_change_lamports = self
            .account_data
            .iter()
            .find(|a| a.account == wallet)
            .map(|a| a.native_balance_change)
            .unwrap_or(0);

        Transaction {
            signature: self.signature,
            timestamp: self.timestamp,
            kind: if self.tx_type.is_empty() {
                "UNKNOWN".to_string()
            } else {
                self.tx_type
            },
            source: self.source,
            description: self.description.filter(|d| !d.is_empty()),
            fee: self.fee,
            token_transfers,
            native_change_lamports,
        }
    }
}

// ============================================================================
// Helius Client - Wallet Transaction History
// ============================================================================

#[derive(Clone)]
pub struct HeliusClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    limit: usize,
}

impl HeliusClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, limit: usize) -> Self {
        tracing::debug!(configured = api_key.is_some(), "Creating Helius client");
        Self {
            client: http_client(),
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            limit: limit.clamp(1, MAX_PAGE),
        }
    }
}

#[async_trait]
impl SignalFetcher for HeliusClient {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<RawSignal, FetchError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            FetchError::new(FetchErrorKind::AuthError, SOURCE, "HELIUS_API_KEY is not set")
        })?;

        let start = Instant::now();
        let wallet = query.wallet_address.as_str();
        let url = format!(
            "{}/addresses/{}/transactions",
            self.endpoint.trim_end_matches('/'),
            wallet
        );
        tracing::debug!(wallet = %wallet, limit = %self.limit, "Fetching wallet history from Helius");

        let limit = self.limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("api-key", api_key), ("limit", limit.as_str())])
            .timeout(query.deadline)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(SOURCE, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "Helius API error");
            return Err(FetchError::from_status(SOURCE, status, &body));
        }

        let enhanced: Vec<EnhancedTransaction> = response
            .json()
            .await
            .map_err(|e| FetchError::from_reqwest(SOURCE, e))?;

        if enhanced.is_empty() {
            return Err(FetchError::new(
                FetchErrorKind::NotFound,
                SOURCE,
                format!("no transactions for {}", wallet),
            ));
        }

        let transactions: Vec<Transaction> = enhanced
            .into_iter()
            .map(|tx| tx.into_transaction(wallet))
            .collect();

        tracing::info!(
            wallet = %wallet,
            count = %transactions.len(),
            duration_ms = %start.elapsed().as_millis(),
            "Fetched wallet transactions"
        );

        Ok(RawSignal::Wallet(WalletRaw {
            transactions,
            fetched_at: Utc::now(),
            source_error: None,
        }))
    }
}
