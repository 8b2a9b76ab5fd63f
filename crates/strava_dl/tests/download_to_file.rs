use clap::Parser;
use std::path::Path;
use strava_dl::{Cli, Command, DlArgs, DlError, JSON_FILE, run_download};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dl_args(data_dir: &Path, extra: &[&str]) -> DlArgs {
    let dir = data_dir.to_str().expect("utf-8 temp dir");
    let mut argv = vec!["strava-dl", "dl", "--data-dir", dir, "--pacing-ms", "0"];
    argv.extend_from_slice(extra);
    match Cli::parse_from(argv).command {
        Command::Dl(a) => a,
    }
}

fn write_env(data_dir: &Path, server: &MockServer) {
    let body = format!(
        "CLIENT_ID = 123\nCLIENT_SECRET = \"foo\"\nREFRESH_TOKEN = \"bar\"\n\
         STRAVA_API_BASE_URL = {uri}/api/v3\nSTRAVA_OAUTH_URL = {uri}/oauth/token\n",
        uri = server.uri()
    );
    std::fs::write(data_dir.join(".env"), body).expect("write .env");
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "Bearer",
            "access_token": "tok",
            "expires_at": 1_900_000_000,
            "expires_in": 21_600,
            "refresh_token": "bar"
        })))
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, page: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/v3/athlete/activities"))
        .and(query_param("page", page))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_end_of_listing(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v3/athlete/activities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .with_priority(10)
        .mount(server)
        .await;
}

#[tokio::test]
async fn writes_sorted_deduplicated_json() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_page(
        &server,
        "1",
        serde_json::json!([
            {
                "id": 1,
                "name": "Old",
                "type": "Run",
                "start_date_local": "2024-01-01T08:00:00Z",
                "kudos_count": 2,
                "distance": 5000,
                "average_heartrate": null
            },
            {"id": 2, "name": "New", "type": "Ride", "start_date_local": "2024-01-03T08:00:00Z"}
        ]),
    )
    .await;
    // The same activity shows up again on the next page.
    mount_page(
        &server,
        "2",
        serde_json::json!([
            {"id": 2, "name": "New", "type": "Ride", "start_date_local": "2024-01-03T08:00:00Z"},
            {"id": 3, "name": "Mid", "type": "Walk", "start_date_local": "2024-01-02T08:00:00Z"}
        ]),
    )
    .await;
    mount_end_of_listing(&server).await;

    let dir = tempfile::tempdir().expect("tempdir");
    write_env(dir.path(), &server);

    let summary = run_download(&dl_args(dir.path(), &["--workers", "3"]))
        .await
        .expect("download");
    assert_eq!(summary.activities, 3);
    assert_eq!(summary.duplicates_dropped, 1);
    assert_eq!(summary.output, dir.path().join(JSON_FILE));

    let written = std::fs::read_to_string(&summary.output).expect("read output");
    assert!(written.starts_with("[\n    {"));
    let parsed: Vec<serde_json::Value> = serde_json::from_str(&written).expect("json");
    let ids: Vec<i64> = parsed.iter().map(|a| a["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![2, 3, 1]);
    assert_eq!(parsed[2]["kudos_count"], 2);
    assert!(parsed[2]["distance"].is_u64());
    assert_eq!(parsed[2].get("average_heartrate"), Some(&serde_json::Value::Null));
    assert!(parsed[2].get("commute").is_none());
    assert!(!dir.path().join("current.json.tmp").exists());
}

#[tokio::test]
async fn failed_page_leaves_no_output() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_page(
        &server,
        "1",
        serde_json::json!([{"id": 1, "start_date_local": "2024-01-01T08:00:00Z"}]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/athlete/activities"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_end_of_listing(&server).await;

    let dir = tempfile::tempdir().expect("tempdir");
    write_env(dir.path(), &server);

    let err = run_download(&dl_args(dir.path(), &[])).await.unwrap_err();
    assert!(matches!(err, DlError::Strava(_)));
    assert!(!dir.path().join(JSON_FILE).exists());
}

#[tokio::test]
async fn missing_credentials_are_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join(".env"), "CLIENT_ID = 123\n").expect("write .env");

    let err = run_download(&dl_args(dir.path(), &[])).await.unwrap_err();
    match err {
        DlError::Credentials { message, .. } => {
            assert!(message.contains("CLIENT_ID, CLIENT_SECRET, REFRESH_TOKEN"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn absent_env_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = run_download(&dl_args(dir.path(), &[])).await.unwrap_err();
    assert!(matches!(err, DlError::Io { action: "reading", .. }));
}
