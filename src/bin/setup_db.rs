use anyhow::Result;
use desabafos_analyzer::db::{configure_connection, run_migrations};
use desabafos_analyzer::utils::{log_db_ready, log_db_status};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::path::Path;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "data/desabafos.db".to_string());

    if let Some(parent) = Path::new(&database_url).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    log_db_status(&format!("Setting up database at {database_url}..."));

    let mut conn = SqliteConnection::establish(&database_url)?;
    configure_connection(&mut conn)?;
    run_migrations(&mut conn)?;

    log_db_ready();
    Ok(())
}
