use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::error;

use crate::db::{self, CommentRecord, DbPool, NewAdvice, NewPost};
use crate::llm::{AdviceVerdict, GeneratedAdvice};
use crate::settings::Settings;
use crate::similarity::SimilarityOutcome;
use crate::utils::{
    log_interrupted, log_no_comments, log_no_posts, log_post_done, log_post_failed,
    log_post_header, log_post_skipped, log_run_start, log_run_summary,
};

#[derive(Debug, Clone)]
pub struct SourcePost {
    pub id: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SourceComment {
    pub id: String,
    pub body: String,
    pub score: i32,
}

#[async_trait]
pub trait PostSource {
    /// Recent posts from the community, newest first, already filtered to
    /// the recency window and truncated to `limit`. Adapter failures
    /// surface as an empty batch.
    async fn recent_posts(&self, community: &str, limit: usize) -> Vec<SourcePost>;

    /// Qualifying top-level comments for a post, score descending. The
    /// position in the returned list is the comment's 1-based rank.
    async fn top_comments(&self, post: &SourcePost, limit: usize) -> Vec<SourceComment>;
}

#[async_trait]
pub trait AdviceGenerator {
    /// Generates advice for a post. `None` means the post is un-advisable
    /// this run; nothing about it gets persisted.
    async fn generate_advice(&self, title: &str, body: &str) -> Option<GeneratedAdvice>;
}

#[async_trait]
pub trait CommentClassifier {
    async fn classify_advice(&self, title: &str, body: &str, comment_body: &str) -> AdviceVerdict;
}

#[async_trait]
pub trait SimilarityScorer {
    async fn score(&self, text_a: &str, text_b: &str) -> SimilarityOutcome;
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub community: String,
    pub post_limit: usize,
    pub comment_limit: usize,
    pub post_delay: Duration,
    pub llm_delay: Duration,
    pub fetch_delay: Duration,
}

impl From<&Settings> for PipelineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            community: settings.community.clone(),
            post_limit: settings.post_limit,
            comment_limit: settings.comment_limit,
            post_delay: settings.post_delay,
            llm_delay: settings.llm_delay,
            fetch_delay: settings.fetch_delay,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunCounters {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum PostOutcome {
    Processed,
    Skipped,
    Failed,
}

pub struct Pipeline<S, G, C, M> {
    pool: DbPool,
    source: S,
    generator: G,
    classifier: C,
    scorer: M,
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
}

impl<S, G, C, M> Pipeline<S, G, C, M>
where
    S: PostSource,
    G: AdviceGenerator,
    C: CommentClassifier,
    M: SimilarityScorer,
{
    pub fn new(
        pool: DbPool,
        source: S,
        generator: G,
        classifier: C,
        scorer: M,
        config: PipelineConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pool,
            source,
            generator,
            classifier,
            scorer,
            config,
            shutdown,
        }
    }

    pub async fn run(&self) -> Result<RunCounters> {
        log_run_start(&self.config.community, self.config.post_limit);

        let posts = self
            .source
            .recent_posts(&self.config.community, self.config.post_limit)
            .await;

        let mut counters = RunCounters::default();

        if posts.is_empty() {
            log_no_posts(&self.config.community);
            return Ok(counters);
        }

        for post in &posts {
            if self.shutdown.load(Ordering::Relaxed) {
                log_interrupted();
                break;
            }

            log_post_header(&post.id, &post.title);

            match self.process_post(post).await {
                Ok(PostOutcome::Skipped) => {
                    // Already committed by an earlier run. Nothing was
                    // fetched or generated, so no pacing is needed.
                    log_post_skipped(&post.id);
                    counters.skipped += 1;
                }
                Ok(PostOutcome::Processed) => {
                    counters.processed += 1;
                    sleep(self.config.post_delay).await;
                }
                Ok(PostOutcome::Failed) => {
                    log_post_failed(&post.id);
                    counters.failed += 1;
                    sleep(self.config.post_delay).await;
                }
                Err(e) => {
                    error!("Unexpected error processing post {}: {e}", post.id);
                    counters.failed += 1;
                    sleep(self.config.post_delay * 2).await;
                }
            }
        }

        log_run_summary(counters.processed, counters.skipped, counters.failed);
        Ok(counters)
    }

    async fn process_post(&self, post: &SourcePost) -> Result<PostOutcome> {
        let mut conn = self.pool.get()?;

        if db::is_processed(&mut conn, &post.id) {
            return Ok(PostOutcome::Skipped);
        }

        let advice = self
            .generator
            .generate_advice(&post.title, &post.body)
            .await;
        sleep(self.config.llm_delay).await;

        // Advice is all-or-nothing for the post: without it, no row of any
        // kind is written and the post stays eligible for a later run.
        let Some(advice) = advice else {
            return Ok(PostOutcome::Failed);
        };

        // The post row must exist before the advice row (foreign key). A
        // no-op insert means another run won the race; the advice upsert
        // still proceeds against the same post_id.
        let now = Utc::now();
        db::upsert_post(
            &mut conn,
            &NewPost {
                post_id: post.id.clone(),
                post_url: post.url.clone(),
                post_title: post.title.clone(),
                post_body: post.body.clone(),
                created_at: post.created_at,
                processed_at: now,
            },
        )?;
        db::upsert_advice(
            &mut conn,
            &NewAdvice {
                post_id: post.id.clone(),
                prompt: advice.prompt.clone(),
                response: advice.response.clone(),
                created_at: now,
            },
        )?;

        let comments = self
            .source
            .top_comments(post, self.config.comment_limit)
            .await;
        sleep(self.config.fetch_delay).await;

        if comments.is_empty() {
            // Post-level data and advice stand alone.
            log_no_comments(&post.id);
            return Ok(PostOutcome::Processed);
        }

        for (idx, comment) in comments.iter().enumerate() {
            let rank = (idx + 1) as i32;

            let verdict = self
                .classifier
                .classify_advice(&post.title, &post.body, &comment.body)
                .await;
            sleep(self.config.llm_delay).await;

            // Only the top-ranked comment is compared against the advice.
            let similarity = if rank == 1 {
                self.scorer.score(&comment.body, &advice.response).await
            } else {
                SimilarityOutcome::NoScore
            };

            let record = CommentRecord {
                comment_id: comment.id.clone(),
                post_id: post.id.clone(),
                comment_body: comment.body.clone(),
                comment_score: comment.score,
                comment_rank: rank,
                is_advice: verdict.as_db(),
                similarity_score: similarity.as_db(),
                fetched_at: Utc::now(),
            };

            // A failed write loses this comment only; the transactional
            // upsert leaves every other row intact.
            if let Err(e) = db::upsert_comment(&mut conn, &record) {
                error!("Failed to store comment {}: {e}", comment.id);
            }
        }

        log_post_done(&post.id, comments.len());
        Ok(PostOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::connection::SimpleConnection;
    use diesel::prelude::*;
    use diesel::r2d2::{ConnectionManager, Pool};
    use diesel::sqlite::SqliteConnection;
    use std::collections::HashMap;

    fn test_pool() -> DbPool {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .expect("in-memory pool");
        let mut conn = pool.get().unwrap();
        conn.batch_execute("PRAGMA foreign_keys = ON;").unwrap();
        db::run_migrations(&mut conn).unwrap();
        pool
    }

    fn zero_delay_config() -> PipelineConfig {
        PipelineConfig {
            community: "desabafos".to_string(),
            post_limit: 20,
            comment_limit: 5,
            post_delay: Duration::ZERO,
            llm_delay: Duration::ZERO,
            fetch_delay: Duration::ZERO,
        }
    }

    fn source_post(id: &str, title: &str) -> SourcePost {
        SourcePost {
            id: id.to_string(),
            url: format!("https://www.reddit.com/r/desabafos/comments/{id}/"),
            title: title.to_string(),
            body: "corpo do desabafo".to_string(),
            created_at: Utc::now(),
        }
    }

    struct StubSource {
        posts: Vec<SourcePost>,
        comments: HashMap<String, Vec<SourceComment>>,
    }

    #[async_trait]
    impl PostSource for StubSource {
        async fn recent_posts(&self, _community: &str, limit: usize) -> Vec<SourcePost> {
            self.posts.iter().take(limit).cloned().collect()
        }

        async fn top_comments(&self, post: &SourcePost, limit: usize) -> Vec<SourceComment> {
            self.comments
                .get(&post.id)
                .map(|list| list.iter().take(limit).cloned().collect())
                .unwrap_or_default()
        }
    }

    /// Fails for any post whose title contains "falha".
    struct StubGenerator;

    #[async_trait]
    impl AdviceGenerator for StubGenerator {
        async fn generate_advice(&self, title: &str, _body: &str) -> Option<GeneratedAdvice> {
            if title.contains("falha") {
                return None;
            }
            Some(GeneratedAdvice {
                prompt: format!("prompt for {title}"),
                response: "conselho gerado".to_string(),
            })
        }
    }

    struct StubClassifier {
        verdict: AdviceVerdict,
    }

    #[async_trait]
    impl CommentClassifier for StubClassifier {
        async fn classify_advice(&self, _t: &str, _b: &str, _c: &str) -> AdviceVerdict {
            self.verdict
        }
    }

    struct StubScorer {
        outcome: SimilarityOutcome,
    }

    #[async_trait]
    impl SimilarityScorer for StubScorer {
        async fn score(&self, _a: &str, _b: &str) -> SimilarityOutcome {
            self.outcome
        }
    }

    fn insert_committed_post(pool: &DbPool, id: &str) {
        let mut conn = pool.get().unwrap();
        db::upsert_post(
            &mut conn,
            &NewPost {
                post_id: id.to_string(),
                post_url: format!("https://www.reddit.com/r/desabafos/comments/{id}/"),
                post_title: "já processado".to_string(),
                post_body: "corpo".to_string(),
                created_at: Utc::now(),
                processed_at: Utc::now(),
            },
        )
        .unwrap();
        db::upsert_advice(
            &mut conn,
            &NewAdvice {
                post_id: id.to_string(),
                prompt: "prompt antigo".to_string(),
                response: "resposta antiga".to_string(),
                created_at: Utc::now(),
            },
        )
        .unwrap();
    }

    fn mixed_batch_pipeline(
        pool: DbPool,
    ) -> Pipeline<StubSource, StubGenerator, StubClassifier, StubScorer> {
        let mut comments = HashMap::new();
        comments.insert(
            "c_post".to_string(),
            vec![
                SourceComment {
                    id: "top".to_string(),
                    body: "melhor conselho".to_string(),
                    score: 40,
                },
                SourceComment {
                    id: "second".to_string(),
                    body: "outro comentário".to_string(),
                    score: 12,
                },
            ],
        );

        let source = StubSource {
            posts: vec![
                source_post("a_post", "já processado"),
                source_post("b_post", "post que falha"),
                source_post("c_post", "post completo"),
            ],
            comments,
        };

        Pipeline::new(
            pool,
            source,
            StubGenerator,
            StubClassifier {
                verdict: AdviceVerdict::Advice,
            },
            StubScorer {
                outcome: SimilarityOutcome::Score(0.8),
            },
            zero_delay_config(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn mixed_batch_counts_and_rows() {
        let pool = test_pool();
        insert_committed_post(&pool, "a_post");

        let pipeline = mixed_batch_pipeline(pool.clone());
        let counters = pipeline.run().await.unwrap();

        assert_eq!(
            counters,
            RunCounters {
                processed: 1,
                skipped: 1,
                failed: 1,
            }
        );

        let mut conn = pool.get().unwrap();

        use crate::schema::{advice, comments, posts};
        let post_ids: Vec<String> = posts::table
            .select(posts::post_id)
            .order(posts::post_id.asc())
            .load(&mut conn)
            .unwrap();
        assert_eq!(post_ids, vec!["a_post", "c_post"]);

        // The failed post left nothing behind.
        let advice_ids: Vec<String> = advice::table
            .select(advice::post_id)
            .order(advice::post_id.asc())
            .load(&mut conn)
            .unwrap();
        assert_eq!(advice_ids, vec!["a_post", "c_post"]);

        let rows: Vec<db::CommentRecord> = comments::table
            .select(db::CommentRecord::as_select())
            .order(comments::comment_rank.asc())
            .load(&mut conn)
            .unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].comment_id, "top");
        assert_eq!(rows[0].comment_rank, 1);
        assert_eq!(rows[0].is_advice, Some(true));
        assert_eq!(rows[0].similarity_score, Some(0.8));

        assert_eq!(rows[1].comment_id, "second");
        assert_eq!(rows[1].comment_rank, 2);
        assert_eq!(rows[1].similarity_score, None);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let pool = test_pool();
        insert_committed_post(&pool, "a_post");

        let first = mixed_batch_pipeline(pool.clone());
        first.run().await.unwrap();

        let second = mixed_batch_pipeline(pool.clone());
        let counters = second.run().await.unwrap();

        // The fully committed posts are skipped outright; the advice
        // failure is not memoized and fails again.
        assert_eq!(
            counters,
            RunCounters {
                processed: 0,
                skipped: 2,
                failed: 1,
            }
        );

        let mut conn = pool.get().unwrap();
        use crate::schema::{advice, comments, posts};
        let post_count: i64 = posts::table.count().get_result(&mut conn).unwrap();
        let advice_count: i64 = advice::table.count().get_result(&mut conn).unwrap();
        let comment_count: i64 = comments::table.count().get_result(&mut conn).unwrap();
        assert_eq!((post_count, advice_count, comment_count), (2, 2, 2));
    }

    #[tokio::test]
    async fn post_without_comments_is_still_processed() {
        let pool = test_pool();

        let source = StubSource {
            posts: vec![source_post("lonely", "sem comentários")],
            comments: HashMap::new(),
        };

        let pipeline = Pipeline::new(
            pool.clone(),
            source,
            StubGenerator,
            StubClassifier {
                verdict: AdviceVerdict::Unknown,
            },
            StubScorer {
                outcome: SimilarityOutcome::NoScore,
            },
            zero_delay_config(),
            Arc::new(AtomicBool::new(false)),
        );

        let counters = pipeline.run().await.unwrap();
        assert_eq!(counters.processed, 1);

        let mut conn = pool.get().unwrap();
        use crate::schema::{advice, comments, posts};
        let post_count: i64 = posts::table.count().get_result(&mut conn).unwrap();
        let advice_count: i64 = advice::table.count().get_result(&mut conn).unwrap();
        let comment_count: i64 = comments::table.count().get_result(&mut conn).unwrap();
        assert_eq!((post_count, advice_count, comment_count), (1, 1, 0));

        assert!(db::is_processed(&mut conn, "lonely"));
    }

    #[tokio::test]
    async fn degraded_fields_do_not_block_persistence() {
        let pool = test_pool();

        let mut comments = HashMap::new();
        comments.insert(
            "p1".to_string(),
            vec![SourceComment {
                id: "c1".to_string(),
                body: "comentário".to_string(),
                score: 3,
            }],
        );

        let source = StubSource {
            posts: vec![source_post("p1", "post")],
            comments,
        };

        // Classifier and scorer both fail; the comment row is written
        // anyway with NULL analysis fields.
        let pipeline = Pipeline::new(
            pool.clone(),
            source,
            StubGenerator,
            StubClassifier {
                verdict: AdviceVerdict::Unknown,
            },
            StubScorer {
                outcome: SimilarityOutcome::NoScore,
            },
            zero_delay_config(),
            Arc::new(AtomicBool::new(false)),
        );

        let counters = pipeline.run().await.unwrap();
        assert_eq!(counters.processed, 1);

        let mut conn = pool.get().unwrap();
        use crate::schema::comments as comments_table;
        let row: db::CommentRecord = comments_table::table
            .select(db::CommentRecord::as_select())
            .first(&mut conn)
            .unwrap();
        assert_eq!(row.is_advice, None);
        assert_eq!(row.similarity_score, None);
        assert_eq!(row.comment_rank, 1);
    }

    #[tokio::test]
    async fn shutdown_flag_stops_the_batch() {
        let pool = test_pool();

        let source = StubSource {
            posts: vec![source_post("p1", "post"), source_post("p2", "post")],
            comments: HashMap::new(),
        };

        let shutdown = Arc::new(AtomicBool::new(true));
        let pipeline = Pipeline::new(
            pool.clone(),
            source,
            StubGenerator,
            StubClassifier {
                verdict: AdviceVerdict::Advice,
            },
            StubScorer {
                outcome: SimilarityOutcome::NoScore,
            },
            zero_delay_config(),
            shutdown,
        );

        let counters = pipeline.run().await.unwrap();
        assert_eq!(counters, RunCounters::default());

        let mut conn = pool.get().unwrap();
        use crate::schema::posts;
        let post_count: i64 = posts::table.count().get_result(&mut conn).unwrap();
        assert_eq!(post_count, 0);
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let pool = test_pool();

        let source = StubSource {
            posts: Vec::new(),
            comments: HashMap::new(),
        };

        let pipeline = Pipeline::new(
            pool,
            source,
            StubGenerator,
            StubClassifier {
                verdict: AdviceVerdict::Advice,
            },
            StubScorer {
                outcome: SimilarityOutcome::NoScore,
            },
            zero_delay_config(),
            Arc::new(AtomicBool::new(false)),
        );

        let counters = pipeline.run().await.unwrap();
        assert_eq!(counters, RunCounters::default());
    }
}
