use std::sync::Arc;
use strava_client::pagination::PaginationConfig;
use strava_client::{config::Config, download_history, http_client::ReqwestStravaClient};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example: expects CLIENT_ID, CLIENT_SECRET and REFRESH_TOKEN in env
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(());
        }
    };

    let limit = std::env::var("STRAVA_LIMIT")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(5);

    let client = Arc::new(ReqwestStravaClient::from_config(&cfg)?);
    let history = download_history(client, &cfg.credentials, PaginationConfig::default())
        .await
        .map_err(|e| format!("failed to fetch activities: {}", e))?;

    if history.activities.is_empty() {
        println!("No activities returned (check the token scope, activity:read_all is required)");
        return Ok(());
    }

    println!(
        "{} activities, most recent {}:",
        history.activities.len(),
        limit
    );
    for a in history.activities.iter().take(limit) {
        println!("- {} {} {}", a.start_date_local.date_naive(), a.id, a.name().unwrap_or("-"));
    }

    Ok(())
}
