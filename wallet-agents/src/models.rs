use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{FetchError, ValidationError};

const DEFAULT_PREFERENCES: &str = "default";
const MAX_TOKEN_LEN: usize = 32;

/// Intake for one analysis run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRequest {
    pub wallet_address: String,
    #[serde(default = "default_preferences", deserialize_with = "preferences_or_default")]
    pub preferences: String,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_preferences() -> String {
    DEFAULT_PREFERENCES.to_string()
}

fn normalize_preferences(preferences: Option<&str>) -> String {
    preferences
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PREFERENCES)
        .to_string()
}

/// Missing, null and blank preferences all read as the default.
fn preferences_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_preferences(raw.as_deref()))
}

impl WalletRequest {
    pub fn new(wallet_address: impl Into<String>, preferences: Option<&str>) -> Self {
        Self {
            wallet_address: wallet_address.into().trim().to_string(),
            preferences: normalize_preferences(preferences),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into().trim().to_string());
        self
    }

    /// Builds a request from a free-form queue message: the first word that
    /// is a valid wallet address is the wallet, the rest is preferences.
    pub fn from_message(message: &str) -> Result<Self, ValidationError> {
        let address = message
            .split_whitespace()
            .find(|word| validate_solana_address(word))
            .ok_or(ValidationError::MissingAddress)?;

        let preferences = message
            .split_whitespace()
            .filter(|word| *word != address)
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Self::new(address, Some(&preferences)))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.wallet_address.is_empty() {
            return Err(ValidationError::EmptyAddress);
        }
        if !validate_solana_address(&self.wallet_address) {
            return Err(ValidationError::InvalidAddress(self.wallet_address.clone()));
        }
        if let Some(token) = &self.token {
            let well_formed = !token.is_empty()
                && token.len() <= MAX_TOKEN_LEN
                && token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '$' | '.' | '_' | '-'));
            if !well_formed {
                return Err(ValidationError::InvalidToken(token.clone()));
            }
        }
        Ok(())
    }

    pub fn token_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.token.as_deref().unwrap_or(default)
    }
}

/// Base58, 32-44 characters, decoding to a 32 byte public key.
pub fn validate_solana_address(address: &str) -> bool {
    if address.len() < 32 || address.len() > 44 {
        return false;
    }
    matches!(bs58::decode(address).into_vec(), Ok(bytes) if bytes.len() == 32)
}

// ---------------------------------------------------------------------------
// Raw signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author: Option<String>,
    pub content: String,
    pub engagement: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
    pub h6: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeWindow {
    pub h1: Option<f64>,
    pub h6: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxnCounts {
    pub buys: u64,
    pub sells: u64,
}

/// Market snapshot for one DEX pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSnapshot {
    pub chain_id: String,
    pub dex_id: String,
    pub pair_address: String,
    pub base_symbol: String,
    pub quote_symbol: String,
    pub price_usd: Option<f64>,
    pub price_change: PriceChange,
    pub volume: VolumeWindow,
    pub txns_24h: TxnCounts,
    pub liquidity_usd: Option<f64>,
    pub fdv: Option<f64>,
    pub market_cap: Option<f64>,
    pub pair_created_at: Option<DateTime<Utc>>,
}

/// A token that trades at a similar 24h volume / market cap ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerToken {
    pub symbol: String,
    pub name: String,
    pub volume_mcap_ratio: f64,
    pub market_cap: f64,
    pub price_change_24h: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerComparison {
    /// The queried token's own volume / market cap ratio.
    pub anchor_ratio: f64,
    pub tolerance: f64,
    pub peers: Vec<PeerToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub mint: String,
    pub amount: f64,
    pub direction: TransferDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub signature: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub kind: String,
    pub source: Option<String>,
    pub description: Option<String>,
    /// Lamports.
    pub fee: u64,
    pub token_transfers: Vec<TokenTransfer>,
    pub native_change_lamports: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialRaw {
    pub posts: Vec<Post>,
    pub fetched_at: DateTime<Utc>,
    pub source_error: Option<FetchError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalRaw {
    pub pair_data: PairSnapshot,
    #[serde(default)]
    pub peer_comparison: Option<PeerComparison>,
    pub fetched_at: DateTime<Utc>,
    pub source_error: Option<FetchError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRaw {
    pub transactions: Vec<Transaction>,
    pub fetched_at: DateTime<Utc>,
    pub source_error: Option<FetchError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum RawSignal {
    Social(SocialRaw),
    Technical(TechnicalRaw),
    Wallet(WalletRaw),
}

impl RawSignal {
    pub fn kind(&self) -> AgentKind {
        match self {
            RawSignal::Social(_) => AgentKind::Sentiment,
            RawSignal::Technical(_) => AgentKind::Technical,
            RawSignal::Wallet(_) => AgentKind::Wallet,
        }
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        match self {
            RawSignal::Social(raw) => raw.fetched_at,
            RawSignal::Technical(raw) => raw.fetched_at,
            RawSignal::Wallet(raw) => raw.fetched_at,
        }
    }

    /// Set when the payload is a degraded stand-in for live data.
    pub fn source_error(&self) -> Option<&FetchError> {
        match self {
            RawSignal::Social(raw) => raw.source_error.as_ref(),
            RawSignal::Technical(raw) => raw.source_error.as_ref(),
            RawSignal::Wallet(raw) => raw.source_error.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Findings and recommendation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentKind {
    Sentiment,
    Technical,
    Wallet,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::Sentiment, AgentKind::Technical, AgentKind::Wallet];
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentKind::Sentiment => "sentiment",
            AgentKind::Technical => "technical",
            AgentKind::Wallet => "wallet",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FindingStatus {
    Ok,
    PartialData,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentFinding {
    pub agent_kind: AgentKind,
    pub summary: String,
    /// -1..1, meaning depends on `agent_kind`.
    pub score: f64,
    /// 0..1
    pub confidence: f64,
    pub status: FindingStatus,
    pub raw_ref: Option<RawSignal>,
}

impl AgentFinding {
    pub fn failed(agent_kind: AgentKind, reason: impl Into<String>, raw_ref: Option<RawSignal>) -> Self {
        Self {
            agent_kind,
            summary: reason.into(),
            score: 0.0,
            confidence: 0.0,
            status: FindingStatus::Failed,
            raw_ref,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status != FindingStatus::Failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverallAction {
    Buy,
    Sell,
    Hold,
    Reduce,
    NoAction,
}

impl OverallAction {
    /// Actions the synthesis model may choose. `NoAction` is reserved for
    /// the no-signal path and never comes from the model.
    pub fn from_model_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "buy" => Some(OverallAction::Buy),
            "sell" => Some(OverallAction::Sell),
            "hold" => Some(OverallAction::Hold),
            "reduce" => Some(OverallAction::Reduce),
            _ => None,
        }
    }

    pub fn is_directional(&self) -> bool {
        matches!(self, OverallAction::Buy | OverallAction::Sell)
    }
}

impl fmt::Display for OverallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OverallAction::Buy => "BUY",
            OverallAction::Sell => "SELL",
            OverallAction::Hold => "HOLD",
            OverallAction::Reduce => "REDUCE",
            OverallAction::NoAction => "NO ACTION",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub wallet_address: String,
    pub overall_action: OverallAction,
    pub rationale: String,
    pub contributing_findings: Vec<AgentFinding>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

    #[test]
    fn accepts_base58_solana_address() {
        assert!(validate_solana_address(WALLET));
        assert!(WalletRequest::new(WALLET, None).validate().is_ok());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!validate_solana_address("abc!"));
        // right length but contains '0', which base58 excludes
        assert!(!validate_solana_address("0WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"));
        assert_eq!(
            WalletRequest::new("abc!", None).validate(),
            Err(ValidationError::InvalidAddress("abc!".into()))
        );
        assert_eq!(
            WalletRequest::new("   ", None).validate(),
            Err(ValidationError::EmptyAddress)
        );
    }

    #[test]
    fn preferences_default_when_blank() {
        assert_eq!(WalletRequest::new(WALLET, None).preferences, "default");
        assert_eq!(WalletRequest::new(WALLET, Some("  ")).preferences, "default");
        assert_eq!(WalletRequest::new(WALLET, Some(" low risk ")).preferences, "low risk");
    }

    #[test]
    fn transport_json_defaults_missing_or_blank_preferences() {
        let bare: WalletRequest =
            serde_json::from_str(&format!(r#"{{"walletAddress":"{}"}}"#, WALLET)).unwrap();
        assert_eq!(bare.preferences, "default");
        assert_eq!(bare.token, None);
        assert!(bare.validate().is_ok());

        let blank: WalletRequest = serde_json::from_str(&format!(
            r#"{{"walletAddress":"{}","preferences":"   "}}"#,
            WALLET
        ))
        .unwrap();
        assert_eq!(blank.preferences, "default");

        let null: WalletRequest = serde_json::from_str(&format!(
            r#"{{"walletAddress":"{}","preferences":null,"token":"BONK"}}"#,
            WALLET
        ))
        .unwrap();
        assert_eq!(null.preferences, "default");
        assert_eq!(null.token.as_deref(), Some("BONK"));

        let set: WalletRequest = serde_json::from_str(&format!(
            r#"{{"walletAddress":"{}","preferences":" long term "}}"#,
            WALLET
        ))
        .unwrap();
        assert_eq!(set.preferences, "long term");
    }

    #[test]
    fn token_symbols_are_validated() {
        let ok = WalletRequest::new(WALLET, None).with_token("$BONK");
        assert!(ok.validate().is_ok());

        let bad = WalletRequest::new(WALLET, None).with_token("BO NK");
        assert!(matches!(bad.validate(), Err(ValidationError::InvalidToken(_))));
    }

    #[test]
    fn message_intake_splits_wallet_and_preferences() {
        let message = format!("prefer low risk {} swing trades", WALLET);
        let request = WalletRequest::from_message(&message).unwrap();
        assert_eq!(request.wallet_address, WALLET);
        assert_eq!(request.preferences, "prefer low risk swing trades");

        let bare = WalletRequest::from_message(WALLET).unwrap();
        assert_eq!(bare.preferences, "default");

        assert_eq!(
            WalletRequest::from_message("please analyze my wallet"),
            Err(ValidationError::MissingAddress)
        );
    }

    #[test]
    fn model_labels_exclude_no_action() {
        assert_eq!(OverallAction::from_model_label(" Buy "), Some(OverallAction::Buy));
        assert_eq!(OverallAction::from_model_label("REDUCE"), Some(OverallAction::Reduce));
        assert_eq!(OverallAction::from_model_label("NoAction"), None);
        assert_eq!(OverallAction::from_model_label("buy or hold"), None);
    }

    #[test]
    fn agent_kinds_order_sentiment_technical_wallet() {
        let mut kinds = vec![AgentKind::Wallet, AgentKind::Sentiment, AgentKind::Technical];
        kinds.sort();
        assert_eq!(kinds, AgentKind::ALL.to_vec());
    }
}
