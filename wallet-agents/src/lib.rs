pub mod agents;
pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod system;

// Re-export main components
pub use agents::{AnalyzerAgent, InsightsAgent, SentimentAgent, TechnicalAgent, WalletAgent};
pub use api::{CoinGeckoClient, DexscreenerClient, FetchQuery, HeliusClient, SignalFetcher, SocialFallback, SocialMediaClient};
pub use config::{AgentModelConfig, AppConfig, TimeoutConfig};
pub use error::{ConfigError, FetchError, FetchErrorKind, OrchestrationError, PipelineError, ValidationError};
pub use models::{
    AgentFinding, AgentKind, FindingStatus, OverallAction, RawSignal, Recommendation, WalletRequest,
};
pub use system::{MultiAgentSystem, PipelineState};
