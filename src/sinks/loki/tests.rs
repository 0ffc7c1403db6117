use std::{
    collections::BTreeSet,
    io::{Read, Write},
    net::TcpListener,
    sync::{LazyLock, mpsc},
    time::Duration,
};

use futures::future::join_all;
use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};
use proptest::prelude::*;
use regex::Regex;
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, Request, ResponseTemplate,
    matchers::{header, method, path},
};

use super::*;
use crate::{
    config::ProxyConfig,
    event::{EnhancedEvent, EnhancedObjectReference},
    sinks::Sink,
};

const PUSH_PATH: &str = "/loki/api/v1/push";

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+000000000$").unwrap());

fn event(kind: &str, name: &str, namespace: &str) -> EnhancedEvent {
    EnhancedEvent {
        reason: "Started".into(),
        message: format!("Started {name}"),
        event_type: "Normal".into(),
        involved_object: EnhancedObjectReference {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn config_for(url: String, yaml: &str) -> LokiConfig {
    let mut config: LokiConfig =
        serde_yaml::from_str(&format!("url: placeholder\n{yaml}")).unwrap();
    config.url = url;
    config
}

fn config(server: &MockServer, yaml: &str) -> LokiConfig {
    config_for(format!("{}{PUSH_PATH}", server.uri()), yaml)
}

/// An address nothing listens on.
fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}{PUSH_PATH}")
}

fn build(config: &LokiConfig) -> LokiSink {
    config.build_with_proxy(&ProxyConfig::default()).unwrap()
}

async fn accept_all(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(PUSH_PATH))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

/// The single stream and entry of a push request.
struct Pushed {
    labels: Value,
    timestamp: String,
    body: Value,
}

fn pushed(request: &Request) -> Pushed {
    let push: Value = serde_json::from_slice(&request.body).unwrap();
    let streams = push["streams"].as_array().unwrap();
    assert_eq!(streams.len(), 1);
    let values = streams[0]["values"].as_array().unwrap();
    assert_eq!(values.len(), 1);

    Pushed {
        labels: streams[0]["stream"].clone(),
        timestamp: values[0][0].as_str().unwrap().to_owned(),
        body: serde_json::from_str(values[0][1].as_str().unwrap()).unwrap(),
    }
}

async fn received(server: &MockServer) -> Vec<Pushed> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(pushed)
        .collect()
}

#[tokio::test]
async fn delivers_configured_stream_labels() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(PUSH_PATH))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sink = build(&config(
        &server,
        r#"
streamLabels:
  app: kube-events
  object_namespace: "{{ .InvolvedObject.Namespace }}"
"#,
    ));

    let delivery = sink.push(&event("Pod", "nginx-7c5b", "prod")).await.unwrap();
    assert_eq!(delivery, Delivery::Sent);

    let pushed = received(&server).await;
    similar_asserts::assert_eq!(
        pushed[0].labels,
        json!({
            "app": "kube-events",
            "object_namespace": "prod",
            "namespace": "prod",
            "index": "-prod",
        })
    );
    assert!(TIMESTAMP_RE.is_match(&pushed[0].timestamp));
}

#[tokio::test]
async fn body_follows_layout() {
    let server = MockServer::start().await;
    accept_all(&server).await;

    let sink = build(&config(
        &server,
        r#"
layout:
  msg: "{{ .Message }}"
  reason: "{{ .Reason }}"
  static: value
  object:
    kind: "{{ .InvolvedObject.Kind }}"
"#,
    ));

    sink.push(&event("Pod", "nginx-7c5b", "prod")).await.unwrap();

    let pushed = received(&server).await;
    similar_asserts::assert_eq!(
        pushed[0].body,
        json!({
            "msg": "Started nginx-7c5b",
            "reason": "Started",
            "static": "value",
            "object": {"kind": "Pod"},
            "name": "nginx-7c5b",
        })
    );
}

#[tokio::test]
async fn absent_object_labels_render_empty() {
    let server = MockServer::start().await;
    accept_all(&server).await;

    let sink = build(&config(
        &server,
        r#"
layout:
  app: "{{ .InvolvedObject.Labels.app }}"
"#,
    ));

    let mut labelled = event("Pod", "web-1", "prod");
    labelled
        .involved_object
        .labels
        .insert("app".into(), "web".into());
    sink.push(&labelled).await.unwrap();
    sink.push(&event("Pod", "bare-1", "prod")).await.unwrap();

    let pushed = received(&server).await;
    assert_eq!(pushed[0].body["app"], "web");
    assert_eq!(pushed[1].body["app"], "");
}

#[tokio::test]
async fn node_events_are_labelled_by_host() {
    let server = MockServer::start().await;
    accept_all(&server).await;

    let sink = build(&config(
        &server,
        r#"
streamLabels:
  app: kube-events
layout:
  name: "{{ .InvolvedObject.Name }}"
  reason: "{{ .Reason }}"
"#,
    ));

    sink.push(&event("Node", "worker-1", "")).await.unwrap();

    let pushed = received(&server).await;
    similar_asserts::assert_eq!(
        pushed[0].labels,
        json!({"app": "kube-events", "host": "worker-1"})
    );
    similar_asserts::assert_eq!(pushed[0].body, json!({"reason": "Started"}));
}

#[tokio::test]
async fn index_label_joins_cluster_and_namespace() {
    let server = MockServer::start().await;
    accept_all(&server).await;

    let sink = build(&config(&server, "streamLabels:\n  cluster: dev\n"));

    sink.push(&event("Pod", "p", "payments")).await.unwrap();

    let pushed = received(&server).await;
    assert_eq!(pushed[0].labels["namespace"], "payments");
    assert_eq!(pushed[0].labels["index"], "dev-payments");
}

#[tokio::test]
async fn ignored_namespaces_send_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sink = build(&config(
        &server,
        "ignore_namespaces: [kube-system]\nstreamLabels:\n  team: \"{{ .Missing }}\"\n",
    ));

    let delivery = sink.push(&event("Pod", "coredns", "kube-system")).await.unwrap();
    assert_eq!(delivery, Delivery::Filtered);
    sink.send(&event("Pod", "coredns", "kube-system")).await.unwrap();

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn configuration_does_not_leak_between_events() {
    let server = MockServer::start().await;
    accept_all(&server).await;

    let sink = build(&config(&server, "streamLabels:\n  app: kube-events\n"));

    sink.push(&event("Node", "worker-1", "")).await.unwrap();
    sink.push(&event("Pod", "p", "prod")).await.unwrap();
    sink.push(&event("Service", "s", "")).await.unwrap();

    let pushed = received(&server).await;
    similar_asserts::assert_eq!(
        pushed[0].labels,
        json!({"app": "kube-events", "host": "worker-1"})
    );
    similar_asserts::assert_eq!(
        pushed[1].labels,
        json!({"app": "kube-events", "namespace": "prod", "index": "-prod"})
    );
    similar_asserts::assert_eq!(pushed[2].labels, json!({"app": "kube-events"}));
    similar_asserts::assert_eq!(pushed[1].body, json!({"name": "p"}));
}

#[tokio::test]
async fn concurrent_pushes_keep_labels_with_their_event() {
    let server = MockServer::start().await;
    accept_all(&server).await;

    let sink = build(&config(
        &server,
        "streamLabels:\n  app: kube-events\nlayout:\n  ns: \"{{ .InvolvedObject.Namespace }}\"\n",
    ));

    let events = (0..16)
        .map(|i| event("Pod", &format!("pod-{i}"), &format!("ns-{i}")))
        .collect::<Vec<_>>();
    let results = join_all(events.iter().map(|event| sink.push(event))).await;
    assert!(results.iter().all(|result| result.is_ok()));

    let pushed = received(&server).await;
    assert_eq!(pushed.len(), 16);
    let mut namespaces = BTreeSet::new();
    for entry in &pushed {
        let namespace = entry.body["ns"].as_str().unwrap();
        assert_eq!(entry.labels["namespace"], namespace);
        assert_eq!(entry.labels["index"], format!("-{namespace}"));
        assert_eq!(entry.body["name"], namespace.replace("ns-", "pod-"));
        assert!(entry.labels.get("host").is_none());
        namespaces.insert(namespace.to_owned());
    }
    assert_eq!(namespaces.len(), 16);
}

#[tokio::test]
async fn server_error_carries_response_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let sink = build(&config(&server, ""));

    let error = sink.push(&event("Pod", "p", "prod")).await.unwrap_err();
    assert!(matches!(
        &error,
        LokiError::ServerError { status, body } if status.as_u16() == 500 && body == "boom"
    ));
    assert!(error.to_string().contains("boom"));

    let error = sink.send(&event("Pod", "p", "prod")).await.unwrap_err();
    assert!(error.to_string().contains("boom"));
}

#[tokio::test]
async fn non_2xx_success_range_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(302).set_body_string("moved"))
        .mount(&server)
        .await;

    let sink = build(&config(&server, ""));

    let error = sink.push(&event("Pod", "p", "prod")).await.unwrap_err();
    assert!(matches!(error, LokiError::ServerError { status, .. } if status.as_u16() == 302));
}

#[tokio::test]
async fn label_render_failure_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sink = build(&config(
        &server,
        "streamLabels:\n  team: \"{{ .InvolvedObject.Team }}\"\n",
    ));

    let error = sink.push(&event("Pod", "p", "prod")).await.unwrap_err();
    assert!(matches!(error, LokiError::RenderLabel { label, .. } if label == "team"));
}

#[tokio::test]
async fn body_render_failure_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sink = build(&config(&server, "layout:\n  team: \"{{ .Team }}\"\n"));

    let error = sink.push(&event("Pod", "p", "prod")).await.unwrap_err();
    assert!(matches!(error, LokiError::SerializeBody { .. }));
}

#[tokio::test]
async fn headers_are_rendered_or_sent_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("x-scope-orgid", "tenant-prod"))
        .and(header("x-team", "{{ .InvolvedObject.Team }}"))
        .and(header("authorization", "Bearer token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let sink = build(&config(
        &server,
        r#"
headers:
  X-Scope-OrgID: "tenant-{{ .InvolvedObject.Namespace }}"
  X-Team: "{{ .InvolvedObject.Team }}"
  Authorization: Bearer token
"#,
    ));

    assert_eq!(
        sink.push(&event("Pod", "p", "prod")).await.unwrap(),
        Delivery::Sent
    );
}

#[tokio::test]
async fn transport_errors_are_reported() {
    let sink = build(&config_for(closed_port_url(), ""));

    let error = sink.push(&event("Pod", "p", "prod")).await.unwrap_err();
    assert!(matches!(error, LokiError::Transport { .. }));
}

#[tokio::test]
async fn sends_after_close() {
    let server = MockServer::start().await;
    accept_all(&server).await;

    let sink = build(&config(&server, ""));

    sink.push(&event("Pod", "a", "prod")).await.unwrap();
    Sink::close(&sink);
    sink.push(&event("Pod", "b", "prod")).await.unwrap();

    assert_eq!(received(&server).await.len(), 2);
}

#[tokio::test]
async fn push_can_be_cancelled_by_a_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let sink = build(&config(&server, ""));

    let result = tokio::time::timeout(
        Duration::from_millis(100),
        sink.push(&event("Pod", "p", "prod")),
    )
    .await;
    assert!(result.is_err());
}

/// Accepts one HTTPS connection using the `localhost` test certificate,
/// answers `204` and hands the raw request back.
fn serve_tls_once() -> (u16, mpsc::Receiver<String>) {
    let mut acceptor = SslAcceptor::mozilla_intermediate(SslMethod::tls()).unwrap();
    acceptor
        .set_certificate_chain_file("tests/data/tls/localhost.crt")
        .unwrap();
    acceptor
        .set_private_key_file("tests/data/tls/localhost.key", SslFiletype::PEM)
        .unwrap();
    let acceptor = acceptor.build();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        // Fails when the client rejects the certificate.
        let Ok(mut stream) = acceptor.accept(stream) else {
            return;
        };

        let mut request = Vec::new();
        let mut buf = [0; 4096];
        let head_len = loop {
            if let Some(i) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        };
        let head = String::from_utf8_lossy(&request[..head_len]).into_owned();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while request.len() < head_len + content_length {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
        let _ = stream.write_all(
            b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        );
        let _ = stream.shutdown();
    });

    (port, rx)
}

#[tokio::test]
async fn delivers_over_tls_with_configured_ca() {
    let (port, requests) = serve_tls_once();
    let sink = build(&config_for(
        format!("https://127.0.0.1:{port}{PUSH_PATH}"),
        "tls:\n  caFile: tests/data/tls/ca.crt\n",
    ));

    let delivery = sink.push(&event("Pod", "nginx-7c5b", "prod")).await.unwrap();
    assert_eq!(delivery, Delivery::Sent);

    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(request.starts_with(&format!("POST {PUSH_PATH} HTTP/1.1")));
    let (_, body) = request.split_once("\r\n\r\n").unwrap();
    let push: Value = serde_json::from_str(body).unwrap();
    assert_eq!(push["streams"][0]["stream"]["namespace"], "prod");
}

#[tokio::test]
async fn tls_server_name_replaces_url_host_in_verification() {
    let (port, _requests) = serve_tls_once();
    // `127.0.0.1` is in the certificate, `loki.example.com` is not.
    let sink = build(&config_for(
        format!("https://127.0.0.1:{port}{PUSH_PATH}"),
        "tls:\n  caFile: tests/data/tls/ca.crt\n  serverName: loki.example.com\n",
    ));

    let error = sink.push(&event("Pod", "p", "prod")).await.unwrap_err();
    assert!(matches!(error, LokiError::Transport { .. }));
}

#[tokio::test]
async fn untrusted_tls_certificate_is_a_transport_error() {
    let (port, requests) = serve_tls_once();
    let sink = build(&config_for(
        format!("https://127.0.0.1:{port}{PUSH_PATH}"),
        "",
    ));

    let error = sink.push(&event("Pod", "p", "prod")).await.unwrap_err();
    assert!(matches!(error, LokiError::Transport { .. }));
    assert!(requests.recv_timeout(Duration::from_millis(500)).is_err());
}

proptest! {
    #[test]
    fn timestamps_are_whole_seconds_in_nanos(secs in 0i64..=253_402_300_799) {
        let now = chrono::DateTime::from_timestamp(secs, 0).unwrap();
        let timestamp = generate_timestamp(now);

        prop_assert!(TIMESTAMP_RE.is_match(&timestamp));
        prop_assert_eq!(timestamp.parse::<i128>().unwrap(), i128::from(secs) * 1_000_000_000);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn index_label_for_any_namespace(
        cluster in "[a-z][a-z0-9-]{0,12}",
        namespace in "[a-z][a-z0-9-]{0,20}",
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let server = MockServer::start().await;
            accept_all(&server).await;

            let yaml = format!("streamLabels:\n  cluster: \"{cluster}\"\n");
            let sink = build(&config(&server, &yaml));
            sink.push(&event("Pod", "p", &namespace)).await.unwrap();

            let pushed = received(&server).await;
            assert_eq!(pushed[0].labels["namespace"], namespace.as_str());
            assert_eq!(pushed[0].labels["index"], format!("{cluster}-{namespace}"));
        });
    }
}
