//! Command-line front end: loads credentials, runs the download and writes the
//! sorted activities to a JSON file.

use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strava_client::aggregate::dedup_by_id;
use strava_client::config::{Config, required_keys};
use strava_client::http_client::ReqwestStravaClient;
use strava_client::pagination::{FailurePolicy, PaginationConfig};
use strava_client::retry::RetryPolicy;
use strava_client::utils::format_hms;
use strava_client::{Activity, StravaError, download_history};

pub mod error;

pub use error::{DlError, DlResult};

/// Directory under `$HOME` holding the credentials and the output.
pub const APP_DATA_DIR: &str = "strava-data";
pub const DOTENV_FILE: &str = ".env";
pub const JSON_FILE: &str = "current.json";

/// Filter used when neither `STRAVA_DL_LOG_LEVEL` nor `RUST_LOG` is set.
pub const DEFAULT_LOG_FILTER: &str = "info";
/// Keep HTTP internals quiet unless asked for explicitly.
pub const LOG_TARGET_OVERRIDES: &str = "reqwest=warn,hyper=warn,hyper_util=warn";

#[derive(Debug, Parser)]
#[command(
    name = "strava-dl",
    version,
    about = "Download every Strava activity of a user to a JSON file"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download and save all activities of a user
    Dl(DlArgs),
}

#[derive(Debug, Args, Clone)]
pub struct DlArgs {
    /// Data directory holding `.env` and the output file (default: ~/strava-data)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Output file; relative paths are resolved inside the data directory
    #[arg(long, short = 'o', default_value = JSON_FILE)]
    pub output: PathBuf,

    /// Concurrent page requests
    #[arg(long, default_value_t = 8)]
    pub workers: usize,

    /// Activities requested per page (the API caps this at 200)
    #[arg(long, default_value_t = strava_client::MAX_PER_PAGE)]
    pub per_page: u32,

    /// Retries per page for transient failures (timeouts, 429, 5xx)
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Record failed pages as gaps instead of aborting
    #[arg(long)]
    pub skip_failed_pages: bool,

    /// Never request pages above this index
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Pages past this index are requested with a pause in between
    #[arg(long, default_value_t = 10)]
    pub pacing_threshold: u32,

    /// Pause in milliseconds for paced pages, 0 disables pacing
    #[arg(long, default_value_t = 250)]
    pub pacing_ms: u64,

    /// With --skip-failed-pages, give up after this many failed pages in a row
    #[arg(long, default_value_t = 5)]
    pub max_consecutive_failures: u32,

    /// Keep repeated activity ids instead of dropping them
    #[arg(long)]
    pub keep_duplicates: bool,

    /// Write page counters in Prometheus text format to this file after the run
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

impl DlArgs {
    pub fn pagination_config(&self) -> PaginationConfig {
        let pacing_threshold = (self.pacing_ms > 0).then_some(self.pacing_threshold);
        PaginationConfig {
            per_page: self.per_page.clamp(1, strava_client::MAX_PER_PAGE),
            workers: self.workers.max(1),
            pacing_threshold,
            pacing_delay: Duration::from_millis(self.pacing_ms),
            failure_policy: if self.skip_failed_pages {
                FailurePolicy::SkipPage
            } else {
                FailurePolicy::Abort
            },
            retry: RetryPolicy {
                max_retries: self.retries,
                ..RetryPolicy::default()
            },
            max_pages: self.max_pages,
            max_consecutive_failures: self.max_consecutive_failures.max(1),
        }
    }

    pub fn data_dir(&self) -> DlResult<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn output_path(&self, data_dir: &Path) -> PathBuf {
        if self.output.is_absolute() {
            self.output.clone()
        } else {
            data_dir.join(&self.output)
        }
    }
}

/// Compose the tracing filter: the configured level plus target overrides.
pub fn log_filter(configured: Option<String>) -> String {
    let level = configured
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    format!("{level},{LOG_TARGET_OVERRIDES}")
}

/// `$HOME/strava-data`.
pub fn default_data_dir() -> DlResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(APP_DATA_DIR))
        .ok_or(DlError::NoHomeDir)
}

/// Read `CLIENT_ID`, `CLIENT_SECRET` and `REFRESH_TOKEN` from a dotenv file.
pub async fn load_credentials(path: &Path) -> DlResult<Config> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DlError::Io {
            action: "reading",
            path: path.to_path_buf(),
            source,
        })?;
    Config::from_dotenv_str(&contents).map_err(|e| match e {
        StravaError::Config(message) => DlError::Credentials {
            path: path.to_path_buf(),
            message: format!(
                "{message}; the file must define {} (e.g. CLIENT_ID = 123, \
                 CLIENT_SECRET = \"foo\")",
                required_keys().join(", ")
            ),
        },
        other => DlError::Strava(other),
    })
}

/// Pretty-print activities with a four space indent.
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> DlResult<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    out.push(b'\n');
    Ok(out)
}

/// Write the activities to `path`, creating parent directories as needed.
///
/// The file is written next to its final location and renamed into place, so an
/// existing output is never left half-written.
pub async fn write_activities(path: &Path, activities: &[Activity]) -> DlResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DlError::Io {
                action: "creating",
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let body = render_json(activities)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|source| DlError::Io {
            action: "writing",
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| DlError::Io {
            action: "renaming",
            path: path.to_path_buf(),
            source,
        })
}

/// Install the process-wide Prometheus recorder behind the `metrics` counters.
pub fn install_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Dump the current counters, textfile-collector style.
pub async fn write_metrics(handle: &PrometheusHandle, path: &Path) -> DlResult<()> {
    tokio::fs::write(path, handle.render())
        .await
        .map_err(|source| DlError::Io {
            action: "writing",
            path: path.to_path_buf(),
            source,
        })
}

/// What a finished `dl` run produced.
#[derive(Debug)]
pub struct DownloadSummary {
    pub activities: usize,
    pub duplicates_dropped: usize,
    pub skipped_pages: Vec<u32>,
    pub output: PathBuf,
    pub elapsed: Duration,
}

/// Run the `dl` command end to end.
pub async fn run_download(args: &DlArgs) -> DlResult<DownloadSummary> {
    let started = Instant::now();
    let data_dir = args.data_dir()?;
    let cfg = load_credentials(&data_dir.join(DOTENV_FILE)).await?;
    let client = Arc::new(ReqwestStravaClient::from_config(&cfg)?);

    let history = download_history(client, &cfg.credentials, args.pagination_config()).await?;
    tracing::info!(
        "the token expires in {} (will be automatically refreshed)",
        format_hms(history.token.expires_in)
    );
    if history.token.refresh_token.is_some() {
        tracing::debug!("provider returned a refresh token; the stored one stays in use");
    }

    let skipped_pages: Vec<u32> = history.gaps.iter().map(|g| g.page).collect();
    if !skipped_pages.is_empty() {
        tracing::warn!(pages = ?skipped_pages, "some pages were skipped, output is incomplete");
    }
    if history.terminal_page.is_none() {
        tracing::warn!("page cap reached before the end of the listing");
    }

    let (activities, duplicates_dropped) = if args.keep_duplicates {
        (history.activities, 0)
    } else {
        dedup_by_id(history.activities)
    };
    if duplicates_dropped > 0 {
        tracing::warn!(duplicates_dropped, "activities listed on more than one page");
    }

    let output = args.output_path(&data_dir);
    write_activities(&output, &activities).await?;

    Ok(DownloadSummary {
        activities: activities.len(),
        duplicates_dropped,
        skipped_pages,
        output,
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> DlArgs {
        let mut argv = vec!["strava-dl", "dl"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Dl(a) => a,
        }
    }

    #[test]
    fn defaults_match_provider_limits() {
        let a = args(&[]);
        let cfg = a.pagination_config();
        assert_eq!(cfg.per_page, 200);
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.pacing_threshold, Some(10));
        assert_eq!(cfg.pacing_delay, Duration::from_millis(250));
        assert_eq!(cfg.failure_policy, FailurePolicy::Abort);
        assert_eq!(cfg.retry.max_retries, 0);
        assert_eq!(cfg.max_consecutive_failures, 5);
        assert_eq!(a.output, PathBuf::from(JSON_FILE));
        assert!(a.metrics_file.is_none());
    }

    #[test]
    fn flags_map_onto_pagination_config() {
        let a = args(&[
            "--workers",
            "0",
            "--per-page",
            "500",
            "--retries",
            "3",
            "--skip-failed-pages",
            "--max-pages",
            "40",
            "--pacing-ms",
            "0",
            "--max-consecutive-failures",
            "0",
        ]);
        let cfg = a.pagination_config();
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.per_page, 200);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.failure_policy, FailurePolicy::SkipPage);
        assert_eq!(cfg.max_pages, Some(40));
        assert_eq!(cfg.pacing_threshold, None);
        assert_eq!(cfg.max_consecutive_failures, 1);
    }

    #[test]
    fn relative_output_lands_in_data_dir() {
        let a = args(&["--output", "all.json"]);
        assert_eq!(
            a.output_path(Path::new("/data")),
            PathBuf::from("/data/all.json")
        );
        let a = args(&["--output", "/tmp/x.json"]);
        assert_eq!(
            a.output_path(Path::new("/data")),
            PathBuf::from("/tmp/x.json")
        );
    }

    #[test]
    fn log_filter_appends_overrides() {
        assert_eq!(log_filter(Some("debug".into())), format!("debug,{LOG_TARGET_OVERRIDES}"));
        assert_eq!(log_filter(Some("  ".into())), format!("info,{LOG_TARGET_OVERRIDES}"));
        assert_eq!(log_filter(None), format!("info,{LOG_TARGET_OVERRIDES}"));
    }

    #[test]
    fn render_json_uses_four_space_indent() {
        let out = render_json(&serde_json::json!([{"id": 1}])).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\n    {\n        \"id\": 1\n    }"));
    }
}
