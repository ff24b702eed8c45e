use console::Style;

fn dim() -> Style {
    Style::new().dim()
}

fn blue() -> Style {
    Style::new().blue()
}

fn magenta() -> Style {
    Style::new().magenta()
}

fn cyan() -> Style {
    Style::new().cyan()
}

fn green() -> Style {
    Style::new().green()
}

fn red() -> Style {
    Style::new().red()
}

fn yellow() -> Style {
    Style::new().yellow()
}

fn bold() -> Style {
    Style::new().bold()
}

fn init_prefix() -> String {
    blue().apply_to("[INIT]").to_string()
}

fn db_prefix() -> String {
    cyan().apply_to("[DB]").to_string()
}

fn ml_prefix() -> String {
    yellow().apply_to("[ML]").to_string()
}

fn run_prefix() -> String {
    magenta().apply_to("[RUN]").to_string()
}

fn short_title(title: &str) -> String {
    let truncated: String = title.chars().take(60).collect();
    if truncated.len() < title.len() {
        format!("{truncated}...")
    } else {
        truncated
    }
}

pub fn log_startup_config(
    community: &str,
    post_limit: usize,
    comment_limit: usize,
    database_url: &str,
    llm_model: &str,
) {
    println!(
        "{} community: {}",
        init_prefix(),
        cyan().apply_to(format!("r/{community}"))
    );
    println!(
        "{} post limit: {} {} comment limit: {}",
        init_prefix(),
        bold().apply_to(post_limit),
        dim().apply_to("|"),
        bold().apply_to(comment_limit)
    );
    println!("{} llm model: {}", init_prefix(), cyan().apply_to(llm_model));
    println!(
        "{} database: {}",
        init_prefix(),
        dim().apply_to(database_url)
    );
}

pub fn log_db_status(message: &str) {
    println!("{} {message}", db_prefix());
}

pub fn log_db_ready() {
    println!("{} database ready!", db_prefix());
}

pub fn log_ml_loading() {
    println!("{} loading sentence embeddings model...", ml_prefix());
}

pub fn log_ml_model_loaded(seconds: f32) {
    println!(
        "{} model loaded in {}",
        ml_prefix(),
        dim().apply_to(format!("{seconds:.1}s"))
    );
}

pub fn log_ml_ready() {
    println!("{} similarity scorer ready!", ml_prefix());
}

pub fn log_ml_error(message: &str) {
    println!("{} {}", ml_prefix(), red().apply_to(message));
}

pub fn log_run_start(community: &str, limit: usize) {
    println!(
        "{} fetching up to {} recent posts from {}...",
        run_prefix(),
        bold().apply_to(limit),
        cyan().apply_to(format!("r/{community}"))
    );
}

pub fn log_no_posts(community: &str) {
    println!(
        "{} {}",
        run_prefix(),
        yellow().apply_to(format!("no posts fetched from r/{community}, nothing to do"))
    );
}

pub fn log_underfilled_batch(got: usize, wanted: usize) {
    println!(
        "{} {}",
        run_prefix(),
        yellow().apply_to(format!(
            "only {got} of {wanted} requested posts fall within the recency window"
        ))
    );
}

pub fn log_post_header(id: &str, title: &str) {
    println!(
        "{} processing {} {}",
        run_prefix(),
        bold().apply_to(id),
        dim().apply_to(short_title(title))
    );
}

pub fn log_post_skipped(id: &str) {
    println!(
        "{} {} {}",
        run_prefix(),
        dim().apply_to(id),
        dim().apply_to("already processed, skipping")
    );
}

pub fn log_post_failed(id: &str) {
    println!(
        "{} {} {}",
        run_prefix(),
        id,
        red().apply_to("advice generation failed, nothing stored")
    );
}

pub fn log_no_comments(id: &str) {
    println!(
        "{} {} {}",
        run_prefix(),
        id,
        yellow().apply_to("no qualifying comments, stored post data only")
    );
}

pub fn log_post_done(id: &str, comment_count: usize) {
    println!(
        "{} {} {}",
        run_prefix(),
        id,
        green().apply_to(format!("done ({comment_count} comments)"))
    );
}

pub fn log_interrupted() {
    println!(
        "{} {}",
        run_prefix(),
        yellow().apply_to("interrupted, finishing run early")
    );
}

pub fn log_run_summary(processed: usize, skipped: usize, failed: usize) {
    println!(
        "{} run finished: {} processed {} {} skipped {} {} failed",
        run_prefix(),
        green().apply_to(processed),
        dim().apply_to("|"),
        yellow().apply_to(skipped),
        dim().apply_to("|"),
        red().apply_to(failed)
    );
}
