//! End-to-end sync against mock Apps Script and Graph endpoints.

use std::time::Duration;

use dronelog::record::Provider;
use dronelog::settings::AccessToken;
use dronelog::sync::{DeliveryPolicy, ProbeOutcome, TransportMode};
use dronelog::{Config, EventKind, Logbook, RecordForm, Settings, Storage, SyncOutcome};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GRAPH_ROWS_PATH: &str = "/v1.0/me/drive/items/01ITEM/workbook/tables('FlightLogTable')/rows/add";
const GRAPH_TABLE_PATH: &str = "/v1.0/me/drive/items/01ITEM/workbook/tables('FlightLogTable')";

struct Fixture {
    logbook: Logbook,
    _dir: TempDir,
}

fn fixture(server_uri: &str, settings: Settings) -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.database_path = Some(dir.path().join("logbook.db"));
    config.sync.graph_base_url = format!("{server_uri}/v1.0");
    config.sync.request_timeout_secs = 5;

    let storage = Storage::open(config.database_path()).unwrap().shared();
    let logbook = Logbook::with_storage(config, storage);
    logbook.settings().save(&settings).unwrap();
    Fixture { logbook, _dir: dir }
}

fn apps_script(server_uri: &str) -> Settings {
    Settings {
        provider: Some(Provider::Google),
        google_endpoint: format!("{server_uri}/exec"),
        user_email: "pilot@example.com".to_string(),
        ..Settings::default()
    }
}

fn graph() -> Settings {
    Settings {
        provider: Some(Provider::Microsoft),
        ms_drive_item_id: "01ITEM".to_string(),
        ms_access_token: AccessToken::new("tok"),
        ..Settings::default()
    }
}

fn queue(logbook: &Logbook, names: &[&str]) {
    for name in names {
        let form = RecordForm {
            flight_name: Some((*name).to_string()),
            lat: Some("49.28".to_string()),
            lon: Some("-123.12".to_string()),
            ..RecordForm::default()
        };
        logbook.queue_event(EventKind::Start, form).unwrap();
    }
}

fn pending_names(logbook: &Logbook) -> Vec<String> {
    logbook
        .queue()
        .read_all()
        .into_iter()
        .map(|r| r.flight_name)
        .collect()
}

async fn bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.body_json::<Value>().unwrap())
        .collect()
}

#[tokio::test]
async fn test_apps_script_single_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), apps_script(&server.uri()));
    queue(&f.logbook, &["Survey 1"]);

    let outcome = f.logbook.http_coordinator().unwrap().sync_all().await;
    assert_eq!(
        outcome,
        SyncOutcome::Ok {
            sent: 1,
            confirmed: true
        }
    );
    assert_eq!(f.logbook.queue().count(), 0);

    let body = &bodies(&server).await[0];
    assert_eq!(body["Flight Name"], "Survey 1");
    assert_eq!(body["kind"], "start");
    assert_eq!(body["User Email"], "pilot@example.com");
    assert_eq!(body["Takeoff Lat"], 49.28);
}

#[tokio::test]
async fn test_unreachable_destination_keeps_queue() {
    // Nothing listens on a port whose listener has been dropped.
    let uri = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };

    let f = fixture(&uri, apps_script(&uri));
    queue(&f.logbook, &["A", "B"]);

    let outcome = f.logbook.http_coordinator().unwrap().sync_all().await;
    assert!(matches!(outcome, SyncOutcome::NetworkError(_)), "{outcome:?}");
    assert_eq!(pending_names(&f.logbook), vec!["A", "B"]);
}

#[tokio::test]
async fn test_per_record_stops_at_first_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), apps_script(&server.uri()));
    queue(&f.logbook, &["A", "B", "C"]);

    let outcome = f.logbook.http_coordinator().unwrap().sync_all().await;
    match outcome {
        SyncOutcome::Partial {
            sent,
            failed_at,
            reason,
        } => {
            assert_eq!(sent, 1);
            assert_eq!(failed_at, 1);
            assert!(reason.contains("500"), "{reason}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(pending_names(&f.logbook), vec!["B", "C"]);
    assert_eq!(bodies(&server).await.len(), 2);
}

#[tokio::test]
async fn test_empty_queue_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), apps_script(&server.uri()));
    let outcome = f.logbook.http_coordinator().unwrap().sync_all().await;

    assert_eq!(outcome, SyncOutcome::Empty);
    assert_eq!(outcome.to_string(), "Nothing to sync");
}

#[tokio::test]
async fn test_whole_batch_rejection_leaves_queue_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), apps_script(&server.uri()));
    queue(&f.logbook, &["A", "B", "C"]);

    let outcome = f
        .logbook
        .http_coordinator()
        .unwrap()
        .with_policy(DeliveryPolicy::WholeBatch)
        .sync_all()
        .await;

    assert!(matches!(outcome, SyncOutcome::Rejected(_)), "{outcome:?}");
    assert_eq!(pending_names(&f.logbook), vec!["A", "B", "C"]);
    assert_eq!(bodies(&server).await[0].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_whole_batch_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), apps_script(&server.uri()));
    queue(&f.logbook, &["A", "B"]);

    let outcome = f
        .logbook
        .http_coordinator()
        .unwrap()
        .with_policy(DeliveryPolicy::WholeBatch)
        .sync_all()
        .await;

    assert_eq!(
        outcome,
        SyncOutcome::Ok {
            sent: 2,
            confirmed: true
        }
    );
    assert_eq!(f.logbook.queue().count(), 0);
}

#[tokio::test]
async fn test_script_reporting_failure_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "sheet not found"})),
        )
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), apps_script(&server.uri()));
    queue(&f.logbook, &["A"]);

    let outcome = f.logbook.http_coordinator().unwrap().sync_all().await;
    assert_eq!(outcome, SyncOutcome::Rejected("sheet not found".to_string()));
    assert_eq!(f.logbook.queue().count(), 1);
}

#[tokio::test]
async fn test_sign_in_page_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><title>Sign in - Google Accounts</title></html>",
            "text/html; charset=utf-8",
        ))
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), apps_script(&server.uri()));
    queue(&f.logbook, &["A"]);

    let outcome = f.logbook.http_coordinator().unwrap().sync_all().await;
    match outcome {
        SyncOutcome::Rejected(reason) => assert!(reason.contains("HTML page")),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(pending_names(&f.logbook), vec!["A"]);
}

#[tokio::test]
async fn test_plain_text_reply_is_unconfirmed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("done", "text/plain"))
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), apps_script(&server.uri()));
    queue(&f.logbook, &["A"]);

    let outcome = f.logbook.http_coordinator().unwrap().sync_all().await;
    assert_eq!(
        outcome,
        SyncOutcome::Ok {
            sent: 1,
            confirmed: false
        }
    );
    assert_eq!(f.logbook.queue().count(), 0);
}

#[tokio::test]
async fn test_concurrent_syncs_from_one_logbook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exec"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": true}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), apps_script(&server.uri()));
    queue(&f.logbook, &["A"]);

    let first = f.logbook.http_coordinator().unwrap();
    let second = f.logbook.http_coordinator().unwrap();
    let (a, b) = tokio::join!(first.sync_all(), second.sync_all());

    let mut outcomes = [a, b];
    outcomes.sort_by_key(|o| o == &SyncOutcome::Busy);
    assert_eq!(
        outcomes[0],
        SyncOutcome::Ok {
            sent: 1,
            confirmed: true
        }
    );
    assert_eq!(outcomes[1], SyncOutcome::Busy);
    assert_eq!(f.logbook.queue().count(), 0);
}

#[tokio::test]
async fn test_opaque_transport_assumes_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "text/plain;charset=utf-8"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), apps_script(&server.uri()));
    queue(&f.logbook, &["A", "B"]);

    let outcome = f
        .logbook
        .http_coordinator()
        .unwrap()
        .with_transport_mode(TransportMode::Opaque)
        .sync_all()
        .await;

    // The response is never read, so even a server error counts as delivered.
    assert_eq!(
        outcome,
        SyncOutcome::Ok {
            sent: 2,
            confirmed: false
        }
    );
    assert_eq!(f.logbook.queue().count(), 0);
}

#[tokio::test]
async fn test_graph_rows_add() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPH_ROWS_PATH))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"index": 0})))
        .expect(2)
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), graph());
    queue(&f.logbook, &["A", "B"]);

    let outcome = f.logbook.http_coordinator().unwrap().sync_all().await;
    assert_eq!(outcome.sent(), 2);

    let bodies = bodies(&server).await;
    let row = bodies[0]["values"][0].as_array().unwrap();
    assert_eq!(row.len(), 26);
    assert_eq!(row[3], "A");
    assert_eq!(row[7], 49.28);
    assert_eq!(bodies[1]["values"][0][3], "B");
}

#[tokio::test]
async fn test_graph_error_message_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPH_ROWS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": "InvalidAuthenticationToken", "message": "Access token has expired."}
        })))
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), graph());
    queue(&f.logbook, &["A"]);

    match f.logbook.http_coordinator().unwrap().sync_all().await {
        SyncOutcome::Rejected(reason) => {
            assert!(reason.contains("401"), "{reason}");
            assert!(reason.contains("Access token has expired."), "{reason}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(f.logbook.queue().count(), 1);
}

#[tokio::test]
async fn test_probe_apps_script() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = apps_script(&server.uri());
    settings.spreadsheet_id = "sheet-1".to_string();
    settings.sheet_name = "Flights".to_string();
    let f = fixture(&server.uri(), settings);

    assert_eq!(
        f.logbook.http_coordinator().unwrap().probe().await,
        ProbeOutcome::Reachable
    );

    let body = &bodies(&server).await[0];
    assert_eq!(body[0]["probe"], true);
    assert_eq!(body[0]["targetSpreadsheet"], "sheet-1");
    assert_eq!(body[0]["targetSheet"], "Flights");
}

#[tokio::test]
async fn test_probe_graph_table() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GRAPH_TABLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "FlightLogTable"})))
        .expect(1)
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), graph());
    assert_eq!(
        f.logbook.http_coordinator().unwrap().probe().await,
        ProbeOutcome::Reachable
    );
}

#[tokio::test]
async fn test_probe_missing_table() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let f = fixture(&server.uri(), graph());
    assert!(matches!(
        f.logbook.http_coordinator().unwrap().probe().await,
        ProbeOutcome::Rejected(_)
    ));
}
