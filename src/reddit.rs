use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use tracing::{error, warn};

use crate::pipeline::{PostSource, SourceComment, SourcePost};
use crate::utils::log_underfilled_batch;

pub const API_BASE: &str = "https://www.reddit.com";

/// The listing is over-fetched so the recency filter still has enough
/// posts to fill the requested batch.
const OVERFETCH_FACTOR: usize = 3;
const LISTING_MAX: usize = 100;
const COMMENT_FETCH_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<Thing<T>>,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    kind: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: String,
    permalink: String,
    title: String,
    #[serde(default)]
    selftext: String,
    created_utc: f64,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    #[serde(default)]
    id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    score: i32,
    #[serde(default)]
    stickied: bool,
    author: Option<String>,
    distinguished: Option<String>,
}

pub struct RedditClient {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
    recency_hours: i64,
}

impl RedditClient {
    pub fn new(user_agent: &str, recency_hours: i64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: API_BASE.to_string(),
            user_agent: user_agent.to_string(),
            recency_hours,
        }
    }

    #[allow(dead_code)]
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    async fn fetch_recent_posts(&self, community: &str, limit: usize) -> Result<Vec<SourcePost>> {
        let fetch_limit = (limit * OVERFETCH_FACTOR).min(LISTING_MAX);
        let url = format!(
            "{}/r/{}/new.json?limit={}&raw_json=1",
            self.base_url,
            urlencoding::encode(community),
            fetch_limit
        );

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Reddit API error: {}", response.status()));
        }

        let listing: Listing<RawPost> = response.json().await?;
        let cutoff = Utc::now() - Duration::hours(self.recency_hours);

        Ok(filter_recent(listing.data.children, cutoff, limit))
    }

    async fn fetch_top_comments(
        &self,
        post: &SourcePost,
        limit: usize,
    ) -> Result<Vec<SourceComment>> {
        let url = format!(
            "{}/comments/{}.json?sort=top&depth=1&limit={}&raw_json=1",
            self.base_url, post.id, COMMENT_FETCH_LIMIT
        );

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Reddit API error: {}", response.status()));
        }

        // The comments endpoint returns a two-part array: the post listing
        // followed by the top-level comment listing.
        let parts: Vec<serde_json::Value> = response.json().await?;
        let comment_part = parts
            .into_iter()
            .nth(1)
            .ok_or_else(|| anyhow!("Missing comment listing in response"))?;
        let listing: Listing<RawComment> = serde_json::from_value(comment_part)?;

        Ok(rank_comments(listing.data.children, limit))
    }
}

fn filter_recent(
    children: Vec<Thing<RawPost>>,
    cutoff: DateTime<Utc>,
    limit: usize,
) -> Vec<SourcePost> {
    children
        .into_iter()
        .map(|thing| thing.data)
        .filter_map(|raw| {
            let created_at = Utc.timestamp_opt(raw.created_utc as i64, 0).single()?;
            Some(SourcePost {
                id: raw.id,
                url: format!("{API_BASE}{}", raw.permalink),
                title: raw.title,
                body: raw.selftext,
                created_at,
            })
        })
        .filter(|post| post.created_at >= cutoff)
        .take(limit)
        .collect()
}

/// Filters the fetched replies down to qualifying comments, sorts them by
/// score descending (ties keep fetch order) and keeps the first `limit`.
/// The returned position is the comment's 1-based rank.
fn rank_comments(children: Vec<Thing<RawComment>>, limit: usize) -> Vec<SourceComment> {
    let mut qualifying: Vec<RawComment> = children
        .into_iter()
        .filter(|thing| thing.kind == "t1")
        .map(|thing| thing.data)
        .filter(|comment| {
            !comment.stickied
                && comment.distinguished.is_none()
                && comment
                    .author
                    .as_deref()
                    .map(|author| author != "[deleted]")
                    .unwrap_or(false)
                && !comment.body.is_empty()
                && comment.body != "[deleted]"
                && comment.body != "[removed]"
        })
        .collect();

    qualifying.sort_by(|a, b| b.score.cmp(&a.score));

    qualifying
        .into_iter()
        .take(limit)
        .map(|comment| SourceComment {
            id: comment.id,
            body: comment.body,
            score: comment.score,
        })
        .collect()
}

#[async_trait]
impl PostSource for RedditClient {
    async fn recent_posts(&self, community: &str, limit: usize) -> Vec<SourcePost> {
        match self.fetch_recent_posts(community, limit).await {
            Ok(posts) => {
                if posts.len() < limit {
                    log_underfilled_batch(posts.len(), limit);
                }
                posts
            }
            Err(e) => {
                error!("Failed to fetch posts from r/{community}: {e}");
                Vec::new()
            }
        }
    }

    async fn top_comments(&self, post: &SourcePost, limit: usize) -> Vec<SourceComment> {
        match self.fetch_top_comments(post, limit).await {
            Ok(comments) => comments,
            Err(e) => {
                // A removed or otherwise inaccessible post yields no
                // comments, not a pipeline error.
                warn!("Failed to fetch comments for post {}: {e}", post.id);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: &str, body: &str, score: i32) -> Thing<RawComment> {
        Thing {
            kind: "t1".to_string(),
            data: RawComment {
                id: id.to_string(),
                body: body.to_string(),
                score,
                stickied: false,
                author: Some("someone".to_string()),
                distinguished: None,
            },
        }
    }

    fn post(id: &str, created_at: DateTime<Utc>) -> Thing<RawPost> {
        Thing {
            kind: "t3".to_string(),
            data: RawPost {
                id: id.to_string(),
                permalink: format!("/r/desabafos/comments/{id}/"),
                title: "título".to_string(),
                selftext: "corpo".to_string(),
                created_utc: created_at.timestamp() as f64,
            },
        }
    }

    #[test]
    fn comments_are_ranked_by_score() {
        let ranked = rank_comments(
            vec![comment("a", "low", 2), comment("b", "high", 30), comment("c", "mid", 7)],
            5,
        );

        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn ranking_truncates_to_limit() {
        let children = (0..10).map(|i| comment(&format!("c{i}"), "body", i)).collect();
        let ranked = rank_comments(children, 5);
        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].score, 9);
    }

    #[test]
    fn score_ties_keep_fetch_order() {
        let ranked = rank_comments(
            vec![comment("first", "a", 5), comment("second", "b", 5)],
            5,
        );
        assert_eq!(ranked[0].id, "first");
        assert_eq!(ranked[1].id, "second");
    }

    #[test]
    fn unsuitable_comments_are_excluded() {
        let mut stickied = comment("s", "stickied", 100);
        stickied.data.stickied = true;

        let mut removed = comment("r", "[removed]", 90);
        removed.data.body = "[removed]".to_string();

        let mut deleted_author = comment("d", "fine body", 80);
        deleted_author.data.author = Some("[deleted]".to_string());

        let mut no_author = comment("n", "fine body", 70);
        no_author.data.author = None;

        let mut moderator = comment("m", "mod note", 60);
        moderator.data.distinguished = Some("moderator".to_string());

        let more = Thing {
            kind: "more".to_string(),
            data: RawComment {
                id: String::new(),
                body: String::new(),
                score: 0,
                stickied: false,
                author: None,
                distinguished: None,
            },
        };

        let ranked = rank_comments(
            vec![stickied, removed, deleted_author, no_author, moderator, more, comment("ok", "real advice", 1)],
            5,
        );

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "ok");
    }

    #[test]
    fn recency_window_filters_and_truncates() {
        let now = Utc::now();
        let cutoff = now - Duration::hours(24);

        let children = vec![
            post("fresh1", now - Duration::hours(1)),
            post("stale", now - Duration::hours(48)),
            post("fresh2", now - Duration::hours(2)),
            post("fresh3", now - Duration::hours(3)),
        ];

        let recent = filter_recent(children, cutoff, 2);
        let ids: Vec<&str> = recent.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh1", "fresh2"]);
    }

    #[test]
    fn post_url_is_absolute() {
        let now = Utc::now();
        let recent = filter_recent(vec![post("abc", now)], now - Duration::hours(24), 5);
        assert_eq!(
            recent[0].url,
            "https://www.reddit.com/r/desabafos/comments/abc/"
        );
    }
}
