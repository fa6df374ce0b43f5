use super::*;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use shared::protocol::commands::{CAPTURE_ORIENTATION, CHECK_CALIBRATION};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct ControlState {
    received: mpsc::UnboundedSender<(Option<String>, CommandRequest)>,
    reject: Arc<Mutex<Option<(StatusCode, String)>>>,
}

async fn handle_command(
    State(state): State<ControlState>,
    headers: HeaderMap,
    Json(request): Json<CommandRequest>,
) -> (StatusCode, String) {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let _ = state.received.send((auth, request));
    match state.reject.lock().await.clone() {
        Some(rejection) => rejection,
        None => (StatusCode::ACCEPTED, String::new()),
    }
}

async fn spawn_control_server(
    reject: Option<(StatusCode, String)>,
) -> (
    String,
    mpsc::UnboundedReceiver<(Option<String>, CommandRequest)>,
) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (received, rx) = mpsc::unbounded_channel();
    let state = ControlState {
        received,
        reject: Arc::new(Mutex::new(reject)),
    };
    let app = Router::new()
        .route(COMMANDS_PATH, post(handle_command))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), rx)
}

fn sender_for(base_url: &str) -> CommandSender {
    let mut config = CommandSenderConfig::new(base_url);
    config.auth_token = Some("secret".to_string());
    config.request_timeout = Duration::from_secs(2);
    CommandSender::new(&config)
}

#[test]
fn endpoint_joins_base_url_without_dropping_path_prefix() {
    let config = CommandSenderConfig::new("https://gait.example.com/backend/");
    assert_eq!(
        config.endpoint().expect("endpoint").as_str(),
        "https://gait.example.com/backend/api/commands"
    );
}

#[test]
fn send_without_runtime_is_dropped_quietly() {
    let sender = CommandSender::with_transport(Arc::new(MissingCommandTransport::new("offline")));
    sender.send(CHECK_CALIBRATION);
}

#[tokio::test]
async fn posts_command_with_timestamp_and_bearer_token() {
    let (base_url, mut received) = spawn_control_server(None).await;
    let sender = sender_for(&base_url);
    let mut reports = sender.subscribe_reports();

    sender.send(CAPTURE_ORIENTATION);

    let (auth, request) = tokio::time::timeout(WAIT, received.recv())
        .await
        .expect("request in time")
        .expect("request");
    assert_eq!(auth.as_deref(), Some("Bearer secret"));
    assert_eq!(request.command, CAPTURE_ORIENTATION);
    assert!(
        chrono::DateTime::parse_from_rfc3339(&request.timestamp).is_ok(),
        "timestamp must be ISO-8601: {}",
        request.timestamp
    );

    let report = tokio::time::timeout(WAIT, reports.recv())
        .await
        .expect("report in time")
        .expect("report");
    assert_eq!(
        report,
        CommandReport {
            command: CAPTURE_ORIENTATION.to_string(),
            outcome: CommandOutcome::Delivered,
        }
    );
}

#[tokio::test]
async fn server_rejection_is_reported_not_raised() {
    let body = serde_json::to_string(&ApiError::new("kit not assigned").with_reason(403, "Forbidden"))
        .expect("body");
    let (base_url, _received) =
        spawn_control_server(Some((StatusCode::FORBIDDEN, body))).await;
    let sender = sender_for(&base_url);
    let mut reports = sender.subscribe_reports();

    sender.dispatch(CAPTURE_ORIENTATION).await;

    let report = reports.recv().await.expect("report");
    match report.outcome {
        CommandOutcome::Failed(reason) => {
            assert!(reason.contains("403"), "unexpected reason: {reason}");
            assert!(reason.contains("kit not assigned"), "unexpected reason: {reason}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn server_error_without_api_body_keeps_raw_detail() {
    let (base_url, _received) = spawn_control_server(Some((
        StatusCode::INTERNAL_SERVER_ERROR,
        "broker down".to_string(),
    )))
    .await;
    let transport = HttpCommandTransport::new(&CommandSenderConfig::new(base_url.as_str()))
        .expect("transport");

    let err = transport
        .post_command(&CommandRequest::new(CHECK_CALIBRATION, Utc::now()))
        .await
        .expect_err("500 must be an error");
    match err {
        CommandDeliveryError::Rejected {
            status,
            detail,
            api_error,
        } => {
            assert_eq!(status, 500);
            assert_eq!(detail, "broker down");
            assert!(api_error.is_none());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_reported_not_raised() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let sender = sender_for(&format!("http://{addr}"));
    let mut reports = sender.subscribe_reports();
    sender.dispatch(CAPTURE_ORIENTATION).await;

    let report = reports.recv().await.expect("report");
    assert!(matches!(report.outcome, CommandOutcome::Failed(_)));
}

#[tokio::test]
async fn invalid_base_url_falls_back_to_missing_transport() {
    let sender = CommandSender::new(&CommandSenderConfig::new("not a url"));
    let mut reports = sender.subscribe_reports();
    sender.dispatch(CHECK_CALIBRATION).await;

    let report = reports.recv().await.expect("report");
    match report.outcome {
        CommandOutcome::Failed(reason) => {
            assert!(reason.contains("unavailable"), "unexpected reason: {reason}")
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
