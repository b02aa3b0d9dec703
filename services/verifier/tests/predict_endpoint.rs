use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::future::join_all;
use http_body_util::BodyExt;
use signature_verifier::config::{ApiConfig, ClassifierConfig};
use signature_verifier::{create_router, AppState, ArtifactStore, ProcessClassifier};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "predict-endpoint-boundary";

/// Echoes both uploaded files back as the prediction label
const ECHO_SCRIPT: &str =
    r#"printf '{"prediction":"%s|%s","confidence":50}\n' "$(cat "$1")" "$(cat "$2")""#;

fn shell_router(staging: &Path, script: &str, timeout: Duration) -> Router {
    let classifier = ProcessClassifier::new(&ClassifierConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "classifier".to_string()],
        timeout_secs: 1,
        working_dir: None,
    })
    .with_timeout(timeout);

    let state = AppState {
        store: Arc::new(ArtifactStore::new(staging)),
        classifier: Arc::new(classifier),
    };
    create_router(state, &ApiConfig::default())
}

fn predict_request(parts: &[(&str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, data) in parts {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn staged_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn genuine_result_is_returned_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    let router = shell_router(
        tmp.path(),
        r#"echo '{"prediction":"genuine","confidence":92.5}'"#,
        Duration::from_secs(10),
    );

    let (status, body) = send(
        router,
        predict_request(&[("reference", b"ref"), ("file", b"test")]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"prediction":"genuine","confidence":92.5}"#);
    assert_eq!(staged_count(tmp.path()), 0);
}

#[tokio::test]
async fn missing_parts_stage_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let router = shell_router(tmp.path(), ECHO_SCRIPT, Duration::from_secs(10));

    for parts in [
        &[("file", b"t".as_slice())][..],
        &[("reference", b"r".as_slice())][..],
        &[][..],
    ] {
        let (status, body) = send(router.clone(), predict_request(parts)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("error"));
    }
    assert_eq!(staged_count(tmp.path()), 0);
}

#[tokio::test]
async fn timeout_is_internal_error_with_cleanup() {
    let tmp = tempfile::tempdir().unwrap();
    let router = shell_router(tmp.path(), "sleep 30", Duration::from_millis(300));

    let (status, body) = send(
        router,
        predict_request(&[("reference", b"r"), ("file", b"t")]),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, r#"{"error":"Error processing signatures"}"#);
    assert_eq!(staged_count(tmp.path()), 0);
}

#[tokio::test]
async fn failing_or_silent_classifier_is_internal_error() {
    for script in ["echo 'boom' >&2; exit 1", "true"] {
        let tmp = tempfile::tempdir().unwrap();
        let router = shell_router(tmp.path(), script, Duration::from_secs(10));

        let (status, body) = send(
            router,
            predict_request(&[("reference", b"r"), ("file", b"t")]),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("boom"));
        assert_eq!(staged_count(tmp.path()), 0);
    }
}

#[tokio::test]
async fn malformed_output_never_reaches_the_caller() {
    for script in [
        "echo 'model says genuine'",
        r#"echo '{"confidence":10}'"#,
    ] {
        let tmp = tempfile::tempdir().unwrap();
        let router = shell_router(tmp.path(), script, Duration::from_secs(10));

        let (status, body) = send(
            router,
            predict_request(&[("reference", b"r"), ("file", b"t")]),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("model says genuine"));
        assert!(!body.contains("confidence"));
        assert_eq!(staged_count(tmp.path()), 0);
    }
}

#[tokio::test]
async fn diagnostics_after_the_first_line_are_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let router = shell_router(
        tmp.path(),
        r#"echo '{"prediction":"forged","confidence":71}'; echo 'loading weights...'"#,
        Duration::from_secs(10),
    );

    let (status, body) = send(
        router,
        predict_request(&[("reference", b"r"), ("file", b"t")]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"prediction":"forged","confidence":71}"#);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_do_not_mix() {
    let tmp = tempfile::tempdir().unwrap();
    let router = shell_router(tmp.path(), ECHO_SCRIPT, Duration::from_secs(30));

    let requests = (0..50).map(|i| {
        let router = router.clone();
        async move {
            let reference = format!("ref-{i}");
            let test = format!("test-{i}");
            let (status, body) = send(
                router,
                predict_request(&[
                    ("reference", reference.as_bytes()),
                    ("file", test.as_bytes()),
                ]),
            )
            .await;
            (i, status, body)
        }
    });

    for (i, status, body) in join_all(requests).await {
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["prediction"], format!("ref-{i}|test-{i}"));
    }
    assert_eq!(staged_count(tmp.path()), 0);
}

#[tokio::test]
async fn identical_resubmission_is_independent() {
    let tmp = tempfile::tempdir().unwrap();
    let router = shell_router(tmp.path(), ECHO_SCRIPT, Duration::from_secs(10));

    let first = send(
        router.clone(),
        predict_request(&[("reference", b"same-ref"), ("file", b"same-test")]),
    )
    .await;
    assert_eq!(staged_count(tmp.path()), 0);

    let second = send(
        router,
        predict_request(&[("reference", b"same-ref"), ("file", b"same-test")]),
    )
    .await;

    assert_eq!(first.0, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(staged_count(tmp.path()), 0);
}

#[tokio::test]
async fn disconnected_client_kills_classifier_and_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let staging = tmp.path().join("uploads");
    let marker = tmp.path().join("classifier-finished");
    let script = format!("sleep 2; touch '{}'", marker.display());
    let router = shell_router(&staging, &script, Duration::from_secs(30));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(500),
        router.oneshot(predict_request(&[("reference", b"r"), ("file", b"t")])),
    )
    .await;
    assert!(cancelled.is_err());
    assert_eq!(staged_count(&staging), 0);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!marker.exists());
    assert_eq!(staged_count(&staging), 0);
}
