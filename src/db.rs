use crate::schema::{advice, comments, posts};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use diesel::upsert::excluded;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::warn;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn establish_pool(database_url: &str) -> DbPool {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Pool::builder()
        .max_size(5)
        .build(manager)
        .expect("Failed to create pool")
}

pub fn configure_connection(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.batch_execute("PRAGMA busy_timeout = 2000;")?;
    conn.batch_execute("PRAGMA journal_mode = WAL;")?;
    conn.batch_execute("PRAGMA synchronous = NORMAL;")?;
    conn.batch_execute("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

pub fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!("Failed to run migrations: {e}"))?;
    Ok(())
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = posts)]
#[allow(dead_code)]
pub struct Post {
    pub post_id: String,
    pub post_url: String,
    pub post_title: String,
    pub post_body: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = posts)]
pub struct NewPost {
    pub post_id: String,
    pub post_url: String,
    pub post_title: String,
    pub post_body: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = advice)]
pub struct NewAdvice {
    pub post_id: String,
    pub prompt: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = comments)]
pub struct CommentRecord {
    pub comment_id: String,
    pub post_id: String,
    pub comment_body: String,
    pub comment_score: i32,
    pub comment_rank: i32,
    pub is_advice: Option<bool>,
    pub similarity_score: Option<f32>,
    pub fetched_at: DateTime<Utc>,
}

/// Checks whether a post already has a row in `posts`. Storage errors are
/// treated as "not processed" so a flaky read re-processes a post instead
/// of dropping it for good.
pub fn is_processed(conn: &mut SqliteConnection, id: &str) -> bool {
    use crate::schema::posts::dsl::*;

    match posts
        .filter(post_id.eq(id))
        .select(post_id)
        .first::<String>(conn)
        .optional()
    {
        Ok(found) => found.is_some(),
        Err(e) => {
            warn!("Failed to check processed state for post {id}: {e}");
            false
        }
    }
}

/// Inserts a post row, first-write-wins. Returns whether an insert
/// actually happened (false when the post_id already existed).
pub fn upsert_post(conn: &mut SqliteConnection, new_post: &NewPost) -> QueryResult<bool> {
    use crate::schema::posts::dsl::*;

    let inserted = diesel::insert_or_ignore_into(posts)
        .values(new_post)
        .execute(conn)?;

    Ok(inserted > 0)
}

/// Inserts or replaces the advice for a post. On conflict the prompt,
/// response and timestamp are overwritten. Fails with a foreign-key error
/// when no parent post row exists.
pub fn upsert_advice(conn: &mut SqliteConnection, record: &NewAdvice) -> QueryResult<usize> {
    use crate::schema::advice::dsl::*;

    diesel::insert_into(advice)
        .values(record)
        .on_conflict(post_id)
        .do_update()
        .set((
            prompt.eq(excluded(prompt)),
            response.eq(excluded(response)),
            created_at.eq(excluded(created_at)),
        ))
        .execute(conn)
}

/// Inserts a comment row, or refreshes score/advice-flag/similarity and
/// the fetch timestamp on re-encounter. Rank and body are never updated.
/// Fails with a foreign-key error when no parent post row exists.
pub fn upsert_comment(conn: &mut SqliteConnection, record: &CommentRecord) -> QueryResult<usize> {
    use crate::schema::comments::dsl::*;

    diesel::insert_into(comments)
        .values(record)
        .on_conflict(comment_id)
        .do_update()
        .set((
            comment_score.eq(excluded(comment_score)),
            is_advice.eq(excluded(is_advice)),
            similarity_score.eq(excluded(similarity_score)),
            fetched_at.eq(excluded(fetched_at)),
        ))
        .execute(conn)
}

#[cfg(test)]
pub fn test_connection() -> SqliteConnection {
    let mut conn = SqliteConnection::establish(":memory:").expect("in-memory sqlite");
    conn.batch_execute("PRAGMA foreign_keys = ON;")
        .expect("enable foreign keys");
    run_migrations(&mut conn).expect("migrations");
    conn
}
