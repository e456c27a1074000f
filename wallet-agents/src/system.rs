use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::{LanguageModel, RigModel};
use serde::Serialize;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::agents::{AnalyzerAgent, InsightsAgent, SentimentAgent, TechnicalAgent, WalletAgent};
use crate::api::{CoinGeckoClient, DexscreenerClient, HeliusClient, SocialMediaClient};
use crate::config::{AgentModelConfig, AppConfig, TimeoutConfig};
use crate::error::{ConfigError, OrchestrationError, PipelineError};
use crate::models::{AgentFinding, Recommendation, WalletRequest};

const SYNTHESIS_TEMPERATURE: f64 = 0.3;

/// Lifecycle of one request.
///
/// Analyzers fetch and then analyze concurrently, so `Fetching` and
/// `Analyzing` are entered back to back when the fan-out starts; the run
/// leaves `Analyzing` only once every analyzer has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Pending,
    Fetching,
    Analyzing,
    Aggregating,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Pending, Failed)
                | (Fetching, Analyzing)
                | (Fetching, Failed)
                | (Analyzing, Aggregating)
                | (Analyzing, Failed)
                | (Aggregating, Completed)
                | (Aggregating, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct PipelineRun {
    state: PipelineState,
}

impl PipelineRun {
    fn new() -> Self {
        Self {
            state: PipelineState::Pending,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(from = %self.state, to = %next, "Illegal pipeline transition ignored");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
        if next.is_terminal() {
            tracing::debug!(state = %next, "Pipeline finished");
        }
    }
}

/// Fans a request out to the three analyzers and hands their findings to
/// the insights agent.
pub struct MultiAgentSystem {
    sentiment_agent: Box<dyn AnalyzerAgent>,
    technical_agent: Box<dyn AnalyzerAgent>,
    wallet_agent: Box<dyn AnalyzerAgent>,
    insights_agent: InsightsAgent,
    timeouts: TimeoutConfig,
}

impl MultiAgentSystem {
    pub fn new(
        sentiment_agent: Box<dyn AnalyzerAgent>,
        technical_agent: Box<dyn AnalyzerAgent>,
        wallet_agent: Box<dyn AnalyzerAgent>,
        insights_agent: InsightsAgent,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            sentiment_agent,
            technical_agent,
            wallet_agent,
            insights_agent,
            timeouts,
        }
    }

    /// Wires the live fetchers and provider-backed models described by
    /// `config`. Fails if a provider's API key is missing.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        fn model(agent: &AgentModelConfig) -> Result<RigModel, ConfigError> {
            let model = RigModel::from_env(agent.provider, agent.model.clone())?;
            tracing::info!(provider = %model.provider(), model = %model.name(), "Model configured");
            Ok(model)
        }

        // Leave part of each analyzer's budget for its model call.
        let fetch_deadline = |limit: Duration| limit.mul_f64(0.6);

        let sentiment = SentimentAgent::new(
            Arc::new(SocialMediaClient::new(
                config.farcaster_endpoint.clone(),
                config.social_fallback,
            )),
            Arc::new(model(&config.sentiment_model)?),
        )
        .with_max_posts(config.max_posts)
        .with_fetch_deadline(fetch_deadline(config.timeouts.sentiment))
        .with_default_token(config.default_token.clone());

        let technical = TechnicalAgent::new(
            Arc::new(
                DexscreenerClient::new(config.dexscreener_endpoint.clone()).with_peers(
                    CoinGeckoClient::new(config.coingecko_endpoint.clone()),
                    config.max_peers,
                ),
            ),
            Arc::new(model(&config.technical_model)?),
        )
        .with_fetch_deadline(fetch_deadline(config.timeouts.technical))
        .with_default_token(config.default_token.clone());

        let wallet = WalletAgent::new(
            Arc::new(HeliusClient::new(
                config.helius_endpoint.clone(),
                config.helius_api_key.clone(),
                config.max_transactions,
            )),
            Arc::new(model(&config.wallet_model)?),
        )
        .with_max_transactions(config.max_transactions)
        .with_fetch_deadline(fetch_deadline(config.timeouts.wallet));

        if config.helius_api_key.is_none() {
            tracing::warn!("HELIUS_API_KEY not set, wallet history will be reported missing");
        }

        Ok(Self::new(
            Box::new(sentiment),
            Box::new(technical),
            Box::new(wallet),
            InsightsAgent::new(Arc::new(
                model(&config.insights_model)?.with_temperature(SYNTHESIS_TEMPERATURE),
            )),
            config.timeouts,
        ))
    }

    pub async fn process_request(&self, request: WalletRequest) -> Result<Recommendation, PipelineError> {
        self.process_request_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`process_request`](Self::process_request), but stops as soon as
    /// `cancel` fires. In-flight fetches and model calls are dropped.
    pub async fn process_request_with_cancel(
        &self,
        request: WalletRequest,
        cancel: &CancellationToken,
    ) -> Result<Recommendation, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("request", id = %request_id, wallet = %request.wallet_address);
        self.run(request, cancel).instrument(span).await
    }

    async fn run(&self, request: WalletRequest, cancel: &CancellationToken) -> Result<Recommendation, PipelineError> {
        let mut pipeline = PipelineRun::new();

        if let Err(err) = request.validate() {
            tracing::warn!(error = %err, "Rejected request");
            pipeline.advance(PipelineState::Failed);
            return Err(err.into());
        }
        if cancel.is_cancelled() {
            pipeline.advance(PipelineState::Failed);
            return Err(OrchestrationError::Cancelled.into());
        }

        tracing::info!(preferences = %request.preferences, "Processing request");
        pipeline.advance(PipelineState::Fetching);

        let analyzers = async {
            tokio::join!(
                Self::run_analyzer(self.sentiment_agent.as_ref(), &request, self.timeouts.sentiment),
                Self::run_analyzer(self.technical_agent.as_ref(), &request, self.timeouts.technical),
                Self::run_analyzer(self.wallet_agent.as_ref(), &request, self.timeouts.wallet),
            )
        };
        pipeline.advance(PipelineState::Analyzing);

        let (sentiment, technical, wallet) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Cancelled while analyzing");
                pipeline.advance(PipelineState::Failed);
                return Err(OrchestrationError::Cancelled.into());
            }
            findings = analyzers => findings,
        };

        pipeline.advance(PipelineState::Aggregating);
        let limit = self.timeouts.insights;
        let synthesis = time::timeout(
            limit,
            self.insights_agent.synthesize(&request, vec![sentiment, technical, wallet]),
        );

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestrationError::Cancelled),
            result = synthesis => match result {
                Ok(Ok(recommendation)) => Ok(recommendation),
                Ok(Err(err)) => Err(OrchestrationError::Aggregation(err)),
                Err(_) => Err(OrchestrationError::AggregatorTimeout(limit)),
            },
        };

        match outcome {
            Ok(recommendation) => {
                pipeline.advance(PipelineState::Completed);
                tracing::info!(action = %recommendation.overall_action, "Request completed");
                Ok(recommendation)
            }
            Err(err) => {
                pipeline.advance(PipelineState::Failed);
                tracing::error!(error = %err, "Request failed");
                Err(err.into())
            }
        }
    }

    async fn run_analyzer(agent: &dyn AnalyzerAgent, request: &WalletRequest, limit: Duration) -> AgentFinding {
        let kind = agent.kind();
        match time::timeout(limit, agent.analyze(request)).await {
            Ok(finding) => finding,
            Err(_) => {
                tracing::warn!(agent = %kind, timeout_ms = limit.as_millis() as u64, "Analyzer timed out");
                AgentFinding::failed(kind, "timeout", None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn transitions_follow_the_pipeline() {
        assert!(Pending.can_transition_to(Fetching));
        assert!(Fetching.can_transition_to(Analyzing));
        assert!(Analyzing.can_transition_to(Aggregating));
        assert!(Aggregating.can_transition_to(Completed));
        assert!(Aggregating.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Failed));
    }

    #[test]
    fn rejects_skips_and_exits_from_terminal_states() {
        assert!(!Pending.can_transition_to(Aggregating));
        assert!(!Fetching.can_transition_to(Completed));
        assert!(!Analyzing.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn fan_out_enters_fetching_then_analyzing() {
        let mut run = PipelineRun::new();
        for next in [Fetching, Analyzing, Aggregating, Completed] {
            run.advance(next);
            assert_eq!(run.state, next);
        }
        assert!(run.state.is_terminal());
        run.advance(Failed);
        assert_eq!(run.state, Completed);
    }

    #[test]
    fn illegal_advance_keeps_state() {
        let mut run = PipelineRun::new();
        run.advance(Completed);
        assert_eq!(run.state, Pending);
        run.advance(Fetching);
        assert_eq!(run.state, Fetching);
    }
}
