use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::LanguageModel;

use super::{truncate_chars, AnalyzerAgent, BaseAnalyzer};
use crate::api::SignalFetcher;
use crate::models::{AgentFinding, AgentKind, Post, RawSignal, WalletRequest};

const SENTIMENT_SYSTEM_PROMPT: &str = r#"
You are the Sentiment Analysis Expert.
Your role is to read social media discussion about a token and judge the mood of the crowd.

Focus on:
- Overall tone of the discussion (bullish, bearish, mixed)
- Whether highly engaged posts agree with the rest
- Hype, fear and manipulation patterns
- How much discussion there is to go on

Score the sentiment polarity from -1 (very bearish) to 1 (very bullish).
Confidence is 0 to 1 and should drop when there are few posts or they disagree.

Reply with one JSON object only:
{"score": <-1..1>, "confidence": <0..1>, "summary": "<one or two sentences>"}
"#;

pub const MAX_POST_CHARS: usize = 280;

const BULLISH_TERMS: &[&str] = &["bull", "moon", "pump", "buy", "breakout", "ath", "strong", "gain"];
const BEARISH_TERMS: &[&str] = &["bear", "dump", "sell", "rug", "crash", "scam", "weak", "concern"];

/// Keyword tally over the rendered posts, given to the model as a hint.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SentimentMetrics {
    pub positive_ratio: f64,
    pub negative_ratio: f64,
    pub neutral_ratio: f64,
    pub total_engagement: u64,
}

impl SentimentMetrics {
    pub fn from_posts(posts: &[&Post]) -> Self {
        let mut metrics = Self::default();
        if posts.is_empty() {
            return metrics;
        }

        let (mut positive, mut negative) = (0usize, 0usize);
        for post in posts {
            metrics.total_engagement += post.engagement;
            let text = post.content.to_lowercase();
            let bullish = BULLISH_TERMS.iter().filter(|t| text.contains(*t)).count();
            let bearish = BEARISH_TERMS.iter().filter(|t| text.contains(*t)).count();
            if bullish > bearish {
                positive += 1;
            } else if bearish > bullish {
                negative += 1;
            }
        }

        let total = posts.len() as f64;
        metrics.positive_ratio = positive as f64 / total;
        metrics.negative_ratio = negative as f64 / total;
        metrics.neutral_ratio = 1.0 - metrics.positive_ratio - metrics.negative_ratio;
        metrics
    }
}

pub struct SentimentAgent {
    base: BaseAnalyzer,
    max_posts: usize,
}

impl SentimentAgent {
    pub fn new(fetcher: Arc<dyn SignalFetcher>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            base: BaseAnalyzer::new(AgentKind::Sentiment, SENTIMENT_SYSTEM_PROMPT, fetcher, model),
            max_posts: 20,
        }
    }

    pub fn with_max_posts(mut self, max_posts: usize) -> Self {
        self.max_posts = max_posts.max(1);
        self
    }

    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.base = self.base.with_fetch_deadline(deadline);
        self
    }

    pub fn with_default_token(mut self, token: impl Into<String>) -> Self {
        self.base = self.base.with_default_token(token);
        self
    }

    /// Most engaged posts first, ties broken by id, capped at `max_posts`.
    fn select_posts<'a>(&self, posts: &'a [Post]) -> Vec<&'a Post> {
        let mut selected: Vec<&Post> = posts.iter().collect();
        selected.sort_by(|a, b| b.engagement.cmp(&a.engagement).then_with(|| a.id.cmp(&b.id)));
        selected.truncate(self.max_posts);
        selected
    }

    pub fn render_prompt(&self, request: &WalletRequest, raw: &RawSignal, token: &str) -> String {
        let posts = match raw {
            RawSignal::Social(social) => self.select_posts(&social.posts),
            _ => Vec::new(),
        };
        let metrics = SentimentMetrics::from_posts(&posts);

        let mut prompt = format!(
            "Token: {}\nInvestor preferences: {}\n",
            token, request.preferences
        );
        if let Some(err) = raw.source_error() {
            prompt.push_str(&format!(
                "Note: live data was unavailable ({}); posts below are a stand-in.\n",
                err.kind
            ));
        }

        prompt.push_str(&format!(
            "\nDiscussion metrics:\nPosts: {}\nTotal engagement: {}\nKeyword tone: {:.0}% positive, {:.0}% negative, {:.0}% neutral\n",
            posts.len(),
            metrics.total_engagement,
            metrics.positive_ratio * 100.0,
            metrics.negative_ratio * 100.0,
            metrics.neutral_ratio * 100.0
        ));

        prompt.push_str("\nPosts (most engaged first):\n");
        for post in posts {
            prompt.push_str(&format!(
                "- [{} engagement] {}\n",
                post.engagement,
                truncate_chars(&post.content, MAX_POST_CHARS)
            ));
        }

        prompt.push_str("\nAnalyze the sentiment toward this token and reply with the JSON object.");
        prompt
    }
}

#[async_trait]
impl AnalyzerAgent for SentimentAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Sentiment
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{ScriptedModel, StaticFetcher};
    use crate::error::{FetchError, FetchErrorKind};
    use crate::models::{FindingStatus, SocialRaw};
    use chrono::Utc;

    const WALLET: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

    fn post(id: &str, engagement: u64, content: &str) -> Post {
        Post {
            id: id.into(),
            author: None,
            content: content.into(),
            engagement,
            timestamp: None,
        }
    }

    fn social(posts: Vec<Post>) -> RawSignal {
        RawSignal::Social(SocialRaw {
            posts,
            fetched_at: Utc::now(),
            source_error: None,
        })
    }

    fn agent(raw: Result<RawSignal, FetchError>, model: Arc<ScriptedModel>) -> SentimentAgent {
        SentimentAgent::new(Arc::new(StaticFetcher::new(raw)), model)
    }

    #[test]
    fn prompt_keeps_most_engaged_posts_within_bound() {
        let posts: Vec<Post> = (0..30).map(|i| post(&format!("p{:02}", i), i, "SOL to the moon")).collect();
        let agent = agent(Ok(social(vec![])), Arc::new(ScriptedModel::default())).with_max_posts(3);
        let request = WalletRequest::new(WALLET, None);
        let prompt = agent.render_prompt(&request, &social(posts), "SOL");

        assert_eq!(prompt.matches("\n- [").count(), 3);
        assert!(prompt.contains("[29 engagement]"));
        assert!(!prompt.contains("[26 engagement]"));
        assert!(prompt.contains("100% positive"));
    }

    #[test]
    fn long_posts_are_cut_and_order_is_stable() {
        let long = "a".repeat(1_000);
        let raw = social(vec![post("b", 5, &long), post("a", 5, "short")]);
        let agent = agent(Ok(social(vec![])), Arc::new(ScriptedModel::default()));
        let request = WalletRequest::new(WALLET, None);
        let prompt = agent.render_prompt(&request, &raw, "SOL");

        assert!(!prompt.contains(&"a".repeat(MAX_POST_CHARS + 1)));
        let first = prompt.find("short").unwrap();
        let second = prompt.find(&"a".repeat(10)).unwrap();
        assert!(first < second, "ties break by id");
    }

    #[test]
    fn prompt_ignores_fetch_time() {
        let posts = vec![post("1", 3, "bullish breakout")];
        let early = social(posts.clone());
        let late = match social(posts) {
            RawSignal::Social(mut s) => {
                s.fetched_at = s.fetched_at + chrono::Duration::hours(6);
                RawSignal::Social(s)
            }
            other => other,
        };
        let agent = agent(Ok(social(vec![])), Arc::new(ScriptedModel::default()));
        let request = WalletRequest::new(WALLET, None);
        assert_eq!(
            agent.render_prompt(&request, &early, "SOL"),
            agent.render_prompt(&request, &late, "SOL")
        );
    }

    #[tokio::test]
    async fn fetch_error_becomes_failed_finding_without_model_call() {
        let model = Arc::new(ScriptedModel::default());
        let err = FetchError::new(FetchErrorKind::RateLimited, "farcaster", "slow down");
        let finding = agent(Err(err), model.clone())
            .analyze(&WalletRequest::new(WALLET, None))
            .await;

        assert_eq!(finding.status, FindingStatus::Failed);
        assert_eq!(finding.agent_kind, AgentKind::Sentiment);
        assert!(finding.summary.contains("rate limited"));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_findings() {
        let reply = r#"{"score":0.7,"confidence":0.8,"summary":"crowd is upbeat"}"#;
        let raw = social(vec![post("1", 10, "SOL looks strong")]);
        let request = WalletRequest::new(WALLET, None);

        let first_model = Arc::new(ScriptedModel::new([Ok(reply.to_string())]));
        let second_model = Arc::new(ScriptedModel::new([Ok(reply.to_string())]));
        let first = agent(Ok(raw.clone()), first_model.clone()).analyze(&request).await;
        let second = agent(Ok(raw), second_model.clone()).analyze(&request).await;

        assert_eq!(first.score.to_bits(), second.score.to_bits());
        assert_eq!(first.confidence.to_bits(), second.confidence.to_bits());
        assert_eq!(*first_model.prompts.lock(), *second_model.prompts.lock());
    }
}
