use anyhow::Result;
use desabafos_analyzer::db::{configure_connection, establish_pool, run_migrations};
use desabafos_analyzer::llm::OpenAiLlm;
use desabafos_analyzer::pipeline::{Pipeline, PipelineConfig};
use desabafos_analyzer::reddit::RedditClient;
use desabafos_analyzer::settings::Settings;
use desabafos_analyzer::similarity::SimilarityHandle;
use desabafos_analyzer::utils::{log_db_ready, log_db_status, log_startup_config};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::subscriber::set_global_default;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("desabafos_analyzer=info".parse()?))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        );
    set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let settings = Settings::from_env()?;

    if let Some(parent) = Path::new(&settings.database_url).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    log_startup_config(
        &settings.community,
        settings.post_limit,
        settings.comment_limit,
        &settings.database_url,
        &settings.llm_model,
    );

    log_db_status("Initializing SQLite connection pool...");
    let pool = establish_pool(&settings.database_url);

    {
        let mut conn = pool.get()?;
        configure_connection(&mut conn)?;
        run_migrations(&mut conn)?;
    }
    log_db_ready();

    let config = PipelineConfig::from(&settings);

    // Model load failure is fatal before any post is fetched.
    let scorer = SimilarityHandle::spawn(settings.embedding_model)?;

    let llm = OpenAiLlm::new(&settings.openai_api_key, &settings.llm_model)?;
    let reddit = RedditClient::new(&settings.user_agent, settings.recency_hours);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_flag.store(true, Ordering::Relaxed);
        }
    });

    let pipeline = Pipeline::new(
        pool,
        reddit,
        llm.clone(),
        llm,
        scorer,
        PipelineConfig::from(&settings),
        shutdown,
    );

    pipeline.run().await?;

    Ok(())
}
