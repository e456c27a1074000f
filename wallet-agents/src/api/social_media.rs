use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{http_client, FetchQuery, SignalFetcher};
use crate::error::{FetchError, FetchErrorKind};
use crate::models::{Post, RawSignal, SocialRaw};

const SOURCE: &str = "farcaster";
const SEARCH_LIMIT: usize = 25;

/// What the social fetcher does when live data cannot be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialFallback {
    /// Report the failure; the sentiment finding becomes `Failed`.
    Fail,
    /// Serve a fixed pair of mixed-tone posts tagged with an `Unavailable`
    /// source error; the sentiment finding becomes `PartialData`.
    Canned,
}

impl fmt::Display for SocialFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocialFallback::Fail => f.write_str("fail"),
            SocialFallback::Canned => f.write_str("canned"),
        }
    }
}

impl FromStr for SocialFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(SocialFallback::Fail),
            "canned" => Ok(SocialFallback::Canned),
            other => Err(format!("expected 'fail' or 'canned', got '{}'", other)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: SearchResult,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    casts: Vec<Cast>,
}

#[derive(Debug, Deserialize)]
struct Cast {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    author: Option<CastAuthor>,
    /// Milliseconds since epoch.
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    reactions: Option<Counter>,
    #[serde(default)]
    recasts: Option<Counter>,
    #[serde(default)]
    replies: Option<Counter>,
}

#[derive(Debug, Deserialize)]
struct CastAuthor {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Counter {
    #[serde(default)]
    count: u64,
}

impl Cast {
    fn into_post(self) -> Post {
        let count = |c: &Option<Counter>| c.as_ref().map(|c| c.count).unwrap_or(0);
        Post {
            engagement: count(&self.reactions) + count(&self.recasts) + count(&self.replies),
            id: self.hash,
            author: self.author.and_then(|a| a.username),
            content: self.text,
            timestamp: self.timestamp.and_then(DateTime::from_timestamp_millis),
        }
    }
}

/// Farcaster cast search used as the social signal source.
pub struct SocialMediaClient {
    client: Client,
    endpoint: String,
    fallback: SocialFallback,
}

impl SocialMediaClient {
    pub fn new(endpoint: impl Into<String>, fallback: SocialFallback) -> Self {
        Self {
            client: http_client(),
            endpoint: endpoint.into(),
            fallback,
        }
    }

    async fn search_casts(&self, query: &FetchQuery) -> Result<Vec<Post>, FetchError> {
        tracing::debug!(token = %query.token, endpoint = %self.endpoint, "Searching casts");

        let limit = SEARCH_LIMIT.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query.token.as_str()), ("limit", limit.as_str())])
            .timeout(query.deadline)
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

        let mut posts: Vec<Post> = parsed.result.casts.into_iter().map(Cast::into_post).collect();
        posts.retain_mut(clean_and_validate_post);
        Ok(posts)
    }

    fn apply_fallback(&self, token: &str, err: FetchError) -> Result<RawSignal, FetchError> {
        let degradable = matches!(
            err.kind,
            FetchErrorKind::Unavailable
                | FetchErrorKind::Timeout
                | FetchErrorKind::RateLimited
                | FetchErrorKind::Unknown
        );

        if self.fallback != SocialFallback::Canned || !degradable {
            return Err(err);
        }

        tracing::warn!(token = %token, error = %err, "Live social data unavailable, serving canned posts");
        Ok(RawSignal::Social(SocialRaw {
            posts: canned_posts(token),
            fetched_at: Utc::now(),
            source_error: Some(FetchError::new(
                FetchErrorKind::Unavailable,
                SOURCE,
                format!("canned posts served: {}", err),
            )),
        }))
    }
}

#[async_trait]
impl SignalFetcher for SocialMediaClient {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<RawSignal, FetchError> {
        match self.search_casts(query).await {
            Ok(posts) if posts.is_empty() => Err(FetchError::new(
                FetchErrorKind::NotFound,
                SOURCE,
                format!("no casts mention {}", query.token),
            )),
            Ok(posts) => {
                tracing::info!(token = %query.token, posts = posts.len(), "Fetched social posts");
                Ok(RawSignal::Social(SocialRaw {
                    posts,
                    fetched_at: Utc::now(),
                    source_error: None,
                }))
            }
            Err(err) => self.apply_fallback(&query.token, err),
        }
    }
}

/// Fixed stand-in discussion: one bullish and one cautious post.
pub fn canned_posts(token: &str) -> Vec<Post> {
    vec![
        Post {
            id: "canned-1".to_string(),
            author: None,
            content: format!("{} is showing strong bullish signals today.", token),
            engagement: 0,
            timestamp: None,
        },
        Post {
            id: "canned-2".to_string(),
            author: None,
            content: format!("Concerns remain about {}'s volatility in the current market.", token),
            engagement: 0,
            timestamp: None,
        },
    ]
}

/// Drops bot/spam posts and flattens multi-line content.
fn clean_and_validate_post(post: &mut Post) -> bool {
    if post.content.contains('🤖') || post.content.matches("http").count() > 3 {
        return false;
    }

    post.content = post
        .content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    !post.content.is_empty()
}
