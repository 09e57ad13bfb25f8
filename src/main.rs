use clap::Parser;
use dotenv::dotenv;
use futures::future::join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use searchgoat::{is_fatal, Args, ResultTable, SearchRequest, SearchSession};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Initialize the tracing logger
    tracing_subscriber::fmt::init();

    dotenv().ok();

    let args = Args::parse();

    let session = match SearchSession::builder()
        .credential_args(args.credential_args())
        .build()
    {
        Ok(session) => Arc::new(session),
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    if args.test_connection {
        session.test_connection().await?;
        println!(
            "Connection OK (org '{}', workspace '{}')",
            session.org_id(),
            session.workspace()
        );
    }

    if args.list_datasets {
        for dataset in session.list_datasets().await? {
            println!("{}", dataset);
        }
    }

    if args.queries.is_empty() {
        return Ok(());
    }

    let timeout = args.query_timeout()?;

    run_queries(session, &args, timeout).await
}

/// Run all queries concurrently over one session, bounded by `--concurrency`
async fn run_queries(
    session: Arc<SearchSession>,
    args: &Args,
    timeout: Option<Duration>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let semaphore = Arc::new(Semaphore::new(args.concurrency.max(1)));
    let progress = MultiProgress::new();
    let spinner_style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {wide_msg}")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    let mut tasks = Vec::new();
    for query in &args.queries {
        let pb = progress.add(ProgressBar::new_spinner());
        pb.set_style(spinner_style.clone());
        pb.set_message(format!("Waiting to run '{}'", query));
        pb.enable_steady_tick(Duration::from_millis(80));

        let mut request = SearchRequest::new(query.clone())
            .earliest(args.earliest.clone())
            .latest(args.latest.clone());
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let session = session.clone();
        let semaphore = semaphore.clone();
        let query = query.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await?;
            pb.set_message(format!("Running '{}'", query));

            let result = session.query(request).await;
            match &result {
                Ok(table) => pb.finish_with_message(format!(
                    "✓ '{}': {} rows, {} columns",
                    query,
                    table.len(),
                    table.columns().len()
                )),
                Err(e) => pb.finish_with_message(format!("✗ '{}': {}", query, e)),
            }
            Ok::<_, Box<dyn Error + Send + Sync>>((query, result))
        }));
    }

    let mut failed = 0usize;
    for joined in join_all(tasks).await {
        let (query, result) = joined??;
        match result {
            Ok(table) => match &args.output {
                Some(path) => write_json_lines(path, &query, &table).await?,
                None => print_summary(&query, &table),
            },
            Err(e) => {
                failed += 1;
                error!("Query '{}' failed: {}", query, e);
                if is_fatal(&e) {
                    return Err(e.into());
                }
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} queries failed", failed, args.queries.len()).into());
    }
    info!("All queries completed successfully");
    Ok(())
}

fn print_summary(query: &str, table: &ResultTable) {
    println!("{}", query);
    println!("  columns: {}", table.columns().join(", "));
    println!("  rows:    {}", table.len());
    for record in table.records().iter().take(5) {
        println!("  {}", serde_json::Value::Object(record.clone()));
    }
}

/// Append one JSON object per row, tagged with the query that produced it
async fn write_json_lines(
    path: &str,
    query: &str,
    table: &ResultTable,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    for mut record in table.records() {
        record.insert("search_query".to_string(), query.into());
        let line = serde_json::to_string(&record)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
    }
    file.flush().await?;
    info!("Saved {} rows for '{}' to '{}'", table.len(), query, path);
    Ok(())
}
