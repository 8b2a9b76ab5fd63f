use clap::Parser;

use strava_dl::{Cli, Command, install_metrics_recorder, log_filter, run_download, write_metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configure logging from env var `STRAVA_DL_LOG_LEVEL` (or fallback to `RUST_LOG`, default `info`).
    let log_env = std::env::var("STRAVA_DL_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok();
    let combined_filter = log_filter(log_env);
    let env_filter = tracing_subscriber::EnvFilter::try_new(&combined_filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_filter(None)));
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
    tracing::debug!("strava-dl: log filter: {}", combined_filter);

    let metrics = install_metrics_recorder()?;

    let cli = Cli::parse();
    match cli.command {
        Command::Dl(args) => {
            let result = run_download(&args).await;
            // Counters are written for failed runs too.
            if let Some(path) = &args.metrics_file {
                write_metrics(&metrics, path).await?;
            }
            let summary = result?;
            println!(
                "\ndownloaded {} activities in {:.2?}",
                summary.activities, summary.elapsed
            );
            if !summary.skipped_pages.is_empty() {
                println!("skipped pages: {:?}", summary.skipped_pages);
            }
            println!("successfully written to file {:?}", summary.output);
        }
    }

    Ok(())
}
