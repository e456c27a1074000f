use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{parse_structured, LanguageModel, ModelError};
use serde::Deserialize;

use crate::api::{FetchQuery, SignalFetcher};
use crate::error::{FetchError, FetchErrorKind};
use crate::models::{AgentFinding, AgentKind, FindingStatus, RawSignal, WalletRequest};

pub mod insights;
pub mod sentiment;
pub mod technical;
pub mod wallet;

pub use insights::InsightsAgent;
pub use sentiment::SentimentAgent;
pub use technical::TechnicalAgent;
pub use wallet::WalletAgent;

const DEFAULT_FETCH_DEADLINE: Duration = Duration::from_secs(20);

/// Appended to the original prompt when the first reply could not be parsed.
const STRICT_REMINDER: &str = r#"
Your previous reply could not be parsed.
Reply with ONLY one JSON object and nothing else, exactly in this shape:
{"score": <number between -1 and 1>, "confidence": <number between 0 and 1>, "summary": "<one or two sentences>"}
"#;

/// One signal type turned into a finding.
///
/// `analyze` never fails: fetch and model problems come back as a `Failed`
/// or `PartialData` finding.
#[async_trait]
pub trait AnalyzerAgent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn analyze(&self, request: &WalletRequest) -> AgentFinding;
}

#[derive(Debug, Deserialize)]
struct FindingReply {
    score: f64,
    confidence: f64,
    summary: String,
}

/// Strict reading of an analyzer reply.
fn parse_finding(text: &str) -> Result<FindingReply, ModelError> {
    let reply: FindingReply = parse_structured(text)?;

    if !reply.score.is_finite() || !(-1.0..=1.0).contains(&reply.score) {
        return Err(ModelError::Unparseable(format!("score out of range: {}", reply.score)));
    }
    if !reply.confidence.is_finite() || !(0.0..=1.0).contains(&reply.confidence) {
        return Err(ModelError::Unparseable(format!(
            "confidence out of range: {}",
            reply.confidence
        )));
    }
    if reply.summary.trim().is_empty() {
        return Err(ModelError::Unparseable("empty summary".to_string()));
    }
    Ok(reply)
}

/// Shared plumbing for the analyzer agents: the fetcher, the model and the
/// parse-with-one-retry policy. Prompt templates and rendering stay with
/// each agent.
pub struct BaseAnalyzer {
    kind: AgentKind,
    preamble: &'static str,
    fetcher: Arc<dyn SignalFetcher>,
    model: Arc<dyn LanguageModel>,
    fetch_deadline: Duration,
    default_token: String,
}

impl BaseAnalyzer {
    pub fn new(
        kind: AgentKind,
        preamble: &'static str,
        fetcher: Arc<dyn SignalFetcher>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            kind,
            preamble,
            fetcher,
            model,
            fetch_deadline: DEFAULT_FETCH_DEADLINE,
            default_token: "SOL".to_string(),
        }
    }

    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.fetch_deadline = deadline;
        self
    }

    pub fn with_default_token(mut self, token: impl Into<String>) -> Self {
        self.default_token = token.into();
        self
    }

    pub fn token_for<'a>(&'a self, request: &'a WalletRequest) -> &'a str {
        request.token_or(&self.default_token)
    }

    pub async fn fetch(&self, request: &WalletRequest) -> Result<RawSignal, FetchError> {
        let query = FetchQuery {
            wallet_address: request.wallet_address.clone(),
            token: self.token_for(request).to_string(),
            deadline: self.fetch_deadline,
        };
        tracing::debug!(agent = %self.kind, source = %self.fetcher.source(), "Fetching signal");
        let raw = self.fetcher.fetch(&query).await?;
        if raw.kind() != self.kind {
            return Err(FetchError::new(
                FetchErrorKind::Unknown,
                self.fetcher.source(),
                format!("returned a {} signal to the {} analyzer", raw.kind(), self.kind),
            ));
        }
        tracing::debug!(agent = %self.kind, fetched_at = %raw.fetched_at(), "Signal fetched");
        Ok(raw)
    }

    pub fn fetch_failed(&self, err: FetchError) -> AgentFinding {
        tracing::warn!(agent = %self.kind, error = %err, "Fetch failed");
        AgentFinding::failed(
            self.kind,
            format!("{} fetch failed ({}): {}", err.source_name, err.kind, err.message),
            None,
        )
    }

    /// Runs the model over `prompt` and turns the reply into a finding.
    pub async fn interpret(&self, raw: RawSignal, prompt: &str) -> AgentFinding {
        let first = match self.model.complete(self.preamble, prompt).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(agent = %self.kind, model = %self.model.name(), error = %err, "Model call failed");
                return AgentFinding::failed(self.kind, format!("model call failed: {}", err), Some(raw));
            }
        };

        match parse_finding(&first) {
            Ok(reply) => return self.finding(reply, raw),
            Err(err) => {
                tracing::warn!(agent = %self.kind, error = %err, "Unparseable reply, retrying with stricter prompt");
            }
        }

        let strict_prompt = format!("{}\n{}", prompt, STRICT_REMINDER);
        let last = match self.model.complete(self.preamble, &strict_prompt).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(agent = %self.kind, error = %err, "Retry call failed");
                first
            }
        };

        match parse_finding(&last) {
            Ok(reply) => self.finding(reply, raw),
            Err(err) => {
                tracing::warn!(agent = %self.kind, error = %err, "Retry unparseable, keeping raw text");
                let summary = last.trim();
                AgentFinding {
                    agent_kind: self.kind,
                    summary: if summary.is_empty() {
                        "model returned no usable text".to_string()
                    } else {
                        summary.to_string()
                    },
                    score: 0.0,
                    confidence: 0.0,
                    status: FindingStatus::PartialData,
                    raw_ref: Some(raw),
                }
            }
        }
    }

    fn finding(&self, reply: FindingReply, raw: RawSignal) -> AgentFinding {
        let status = match raw.source_error() {
            Some(_) => FindingStatus::PartialData,
            None => FindingStatus::Ok,
        };
        tracing::info!(
            agent = %self.kind,
            score = reply.score,
            confidence = reply.confidence,
            status = ?status,
            "Finding produced"
        );
        AgentFinding {
            agent_kind: self.kind,
            summary: reply.summary.trim().to_string(),
            score: reply.score,
            confidence: reply.confidence,
            status,
            raw_ref: Some(raw),
        }
    }
}

/// Cuts `text` to at most `max` characters, marking the cut.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use common::{LanguageModel, ModelError};
    use parking_lot::Mutex;

    use crate::api::{FetchQuery, SignalFetcher};
    use crate::error::FetchError;
    use crate::models::RawSignal;

    /// Replays queued replies in order and records every prompt.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, ModelError>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new<I>(replies: I) -> Self
        where
            I: IntoIterator<Item = Result<String, ModelError>>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _preamble: &str, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().push(prompt.to_string());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(ModelError::Request("script exhausted".into())))
        }
    }

    pub struct StaticFetcher {
        pub result: Result<RawSignal, FetchError>,
        pub calls: AtomicUsize,
    }

    impl StaticFetcher {
        pub fn new(result: Result<RawSignal, FetchError>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SignalFetcher for StaticFetcher {
        fn source(&self) -> &str {
            "static"
        }

        async fn fetch(&self, _query: &FetchQuery) -> Result<RawSignal, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedModel, StaticFetcher};
    use super::*;
    use crate::models::{Post, SocialRaw};
    use chrono::Utc;

    fn social_raw(source_error: Option<FetchError>) -> RawSignal {
        RawSignal::Social(SocialRaw {
            posts: vec![Post {
                id: "1".into(),
                author: None,
                content: "gm".into(),
                engagement: 1,
                timestamp: None,
            }],
            fetched_at: Utc::now(),
            source_error,
        })
    }

    fn base(model: Arc<ScriptedModel>) -> BaseAnalyzer {
        let fetcher = Arc::new(StaticFetcher::new(Ok(social_raw(None))));
        BaseAnalyzer::new(AgentKind::Sentiment, "test", fetcher, model)
    }

    #[test]
    fn strict_parser_enforces_ranges() {
        assert!(parse_finding(r#"{"score":0.5,"confidence":0.9,"summary":"fine"}"#).is_ok());
        assert!(parse_finding(r#"{"score":1.5,"confidence":0.9,"summary":"x"}"#).is_err());
        assert!(parse_finding(r#"{"score":0.5,"confidence":-0.1,"summary":"x"}"#).is_err());
        assert!(parse_finding(r#"{"score":0.5,"confidence":0.5,"summary":"  "}"#).is_err());
        assert!(parse_finding(r#"{"score":0.5,"summary":"no confidence"}"#).is_err());
        assert!(parse_finding("bullish!").is_err());
    }

    #[tokio::test]
    async fn well_formed_reply_is_ok() {
        let model = Arc::new(ScriptedModel::new([Ok(
            "```json\n{\"score\":0.7,\"confidence\":0.8,\"summary\":\"upbeat\"}\n```".to_string(),
        )]));
        let finding = base(model.clone()).interpret(social_raw(None), "prompt").await;

        assert_eq!(finding.status, FindingStatus::Ok);
        assert_eq!(finding.score, 0.7);
        assert_eq!(finding.confidence, 0.8);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn retries_once_with_stricter_prompt() {
        let model = Arc::new(ScriptedModel::new([
            Ok("Looks bullish to me".to_string()),
            Ok(r#"{"score":0.4,"confidence":0.6,"summary":"mildly positive"}"#.to_string()),
        ]));
        let finding = base(model.clone()).interpret(social_raw(None), "prompt").await;

        assert_eq!(finding.status, FindingStatus::Ok);
        assert_eq!(finding.score, 0.4);
        let prompts = model.prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("prompt"));
        assert!(prompts[1].contains("ONLY one JSON object"));
    }

    #[tokio::test]
    async fn second_parse_failure_keeps_verbatim_text() {
        let model = Arc::new(ScriptedModel::new([
            Ok("bullish".to_string()),
            Ok("  still just prose  ".to_string()),
            Ok("never requested".to_string()),
        ]));
        let finding = base(model.clone()).interpret(social_raw(None), "prompt").await;

        assert_eq!(finding.status, FindingStatus::PartialData);
        assert_eq!(finding.confidence, 0.0);
        assert_eq!(finding.summary, "still just prose");
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn model_transport_error_fails_finding() {
        let model = Arc::new(ScriptedModel::new([Err(ModelError::Request("503".into()))]));
        let finding = base(model).interpret(social_raw(None), "prompt").await;

        assert_eq!(finding.status, FindingStatus::Failed);
        assert_eq!(finding.score, 0.0);
        assert!(finding.raw_ref.is_some());
    }

    #[tokio::test]
    async fn degraded_source_marks_partial_data() {
        let model = Arc::new(ScriptedModel::new([Ok(
            r#"{"score":0.1,"confidence":0.5,"summary":"mixed"}"#.to_string(),
        )]));
        let degraded = FetchError::new(FetchErrorKind::Unavailable, "farcaster", "canned");
        let finding = base(model).interpret(social_raw(Some(degraded)), "prompt").await;

        assert_eq!(finding.status, FindingStatus::PartialData);
        assert_eq!(finding.confidence, 0.5);
    }

    #[tokio::test]
    async fn mismatched_signal_fails_before_the_model() {
        let model = Arc::new(ScriptedModel::default());
        let fetcher = Arc::new(StaticFetcher::new(Ok(social_raw(None))));
        let base = BaseAnalyzer::new(AgentKind::Wallet, "test", fetcher, model.clone());
        let request = WalletRequest::new("9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM", None);

        let err = base.fetch(&request).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unknown);
        assert!(err.message.contains("sentiment signal"));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé…");
    }
}
