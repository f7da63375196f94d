//! End-to-end tunnel scenarios: a real QUIC hub on a loopback port, real
//! agents, a real inward HTTP server, and the public control plane in front.

use std::future::IntoFuture;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use url::Url;

use wormhole_agent::{ClientBuilder, Executor, Session as AgentSession};
use wormhole_hub::{bridge, Agent, Context, Middleware, ServerBuilder};
use wormhole_proto::{
    Command, FrameReader, FrameWriter, Message, PackageHeader, PackageType, RegisterCommand,
    Response, ResponseCode,
};

struct TestHub {
    ctx: Context,
    http: String,
    quic: Url,
}

async fn start_hub(command_timeout: Duration) -> TestHub {
    let ctx = Context::new(command_timeout);

    let server = ServerBuilder::new()
        .with_addr("127.0.0.1:0".parse().unwrap())
        .with_self_signed()
        .unwrap();
    let quic_addr = server.local_addr().unwrap();

    let quic_ctx = ctx.clone();
    tokio::spawn(async move { server.run(quic_ctx).await });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, bridge::router(ctx.clone())).into_future());

    TestHub {
        ctx,
        http: format!("http://{http_addr}"),
        quic: Url::parse(&format!("https://127.0.0.1:{}", quic_addr.port())).unwrap(),
    }
}

async fn start_inward(app: Router) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(axum::serve(listener, app).into_future());
    port
}

fn seed(ctx: &Context, identifier: &str, mware: &str, port: u16, path: &str) {
    ctx.store
        .update_agent(Agent {
            name: identifier.to_string(),
            identifier: identifier.to_string(),
            description: String::new(),
        })
        .unwrap();
    ctx.store
        .add_middleware(
            identifier,
            Middleware {
                name: mware.to_string(),
                path: path.to_string(),
                port,
            },
        )
        .unwrap();
}

async fn start_agent(hub: &TestHub, identifier: &str) {
    let client = unsafe { ClientBuilder::new().with_no_certificate_verification() }.unwrap();
    let executor = Executor::new(false).unwrap();

    let session = AgentSession::connect(&client, &hub.quic, identifier, executor)
        .await
        .unwrap();
    tokio::spawn(session.run());
}

#[tokio::test]
async fn test_happy_path() {
    let hub = start_hub(Duration::from_secs(10)).await;

    let inward = Router::new().route(
        "/api/health",
        get(|headers: axum::http::HeaderMap| async move {
            assert_eq!(headers.get("x-probe").unwrap(), "yes");
            ([("x-inward", "mserver")], "{\"ok\":true}")
        }),
    );
    let port = start_inward(inward).await;

    seed(&hub.ctx, "a1", "svc", port, "/api");
    start_agent(&hub, "a1").await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/wh/a1/svc/health", hub.http))
        .header("x-probe", "yes")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-inward"], "mserver");
    assert_eq!(response.text().await.unwrap(), "{\"ok\":true}");
}

#[tokio::test]
async fn test_unknown_agent() {
    let hub = start_hub(Duration::from_secs(10)).await;

    let response = reqwest::get(format!("{}/wh/ghost/x/y", hub.http))
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(
        response.text().await.unwrap(),
        "The connection to node ghost is not existed."
    );
}

#[tokio::test]
async fn test_registered_metadata_without_session() {
    let hub = start_hub(Duration::from_secs(10)).await;
    seed(&hub.ctx, "a1", "svc", 9081, "/api");

    let response = reqwest::get(format!("{}/wh/a1/svc/health", hub.http))
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(
        response.text().await.unwrap(),
        "The connection to node a1 is not established."
    );
}

#[tokio::test]
async fn test_inward_error_wrapped() {
    let hub = start_hub(Duration::from_secs(10)).await;

    // Point the middleware at a port with nothing behind it.
    seed(&hub.ctx, "a1", "svc", 1, "/api");
    start_agent(&hub, "a1").await;

    let response = reqwest::get(format!("{}/wh/a1/svc/health", hub.http))
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert!(!response.text().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_non_200_inward_status_is_forwarded() {
    let hub = start_hub(Duration::from_secs(10)).await;

    let inward = Router::new().route(
        "/api/missing",
        get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
    );
    let port = start_inward(inward).await;

    seed(&hub.ctx, "a1", "svc", port, "/api");
    start_agent(&hub, "a1").await;

    let response = reqwest::get(format!("{}/wh/a1/svc/missing", hub.http))
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "nope");
}

#[tokio::test]
async fn test_timeout_leaves_session_healthy() {
    let hub = start_hub(Duration::from_millis(500)).await;

    let inward = Router::new()
        .route(
            "/api/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        )
        .route("/api/fast", get(|| async { "fast" }));
    let port = start_inward(inward).await;

    seed(&hub.ctx, "a1", "svc", port, "/api");
    start_agent(&hub, "a1").await;

    let slow = reqwest::get(format!("{}/wh/a1/svc/slow", hub.http))
        .await
        .unwrap();
    assert_eq!(slow.status(), 400);
    assert!(slow.text().await.unwrap().contains("timed out"));

    // The deadline killed only that waiter.
    let fast = reqwest::get(format!("{}/wh/a1/svc/fast", hub.http))
        .await
        .unwrap();
    assert_eq!(fast.status(), 200);

    // Once the slow handler finally answers, the late response is dropped
    // silently and the session keeps serving.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let again = reqwest::get(format!("{}/wh/a1/svc/fast", hub.http))
        .await
        .unwrap();
    assert_eq!(again.status(), 200);
    assert_eq!(again.text().await.unwrap(), "fast");
}

#[tokio::test]
async fn test_concurrent_calls_stay_correlated() {
    let hub = start_hub(Duration::from_secs(10)).await;

    let inward = Router::new().route(
        "/api/echo/{n}",
        get(|axum::extract::Path(n): axum::extract::Path<String>| async move { n }),
    );
    let port = start_inward(inward).await;

    seed(&hub.ctx, "a1", "svc", port, "/api");
    start_agent(&hub, "a1").await;

    let mut calls = Vec::new();
    for n in 0..10 {
        let http = hub.http.clone();
        calls.push(tokio::spawn(async move {
            let response = reqwest::get(format!("{http}/wh/a1/svc/echo/{n}"))
                .await
                .unwrap();
            assert_eq!(response.status(), 200);
            assert_eq!(response.text().await.unwrap(), n.to_string());
        }));
    }
    for call in calls {
        call.await.unwrap();
    }
}

#[tokio::test]
async fn test_displacement() {
    let hub = start_hub(Duration::from_secs(10)).await;

    let inward = Router::new()
        .route(
            "/api/hang",
            get(|| async {
                std::future::pending::<()>().await;
                "never"
            }),
        )
        .route("/api/ping", get(|| async { "pong" }));
    let port = start_inward(inward).await;

    seed(&hub.ctx, "a1", "svc", port, "/api");
    start_agent(&hub, "a1").await;
    let first = hub.ctx.registry.get("a1").unwrap();

    // Park an in-flight call on the first session.
    let http = hub.http.clone();
    let parked =
        tokio::spawn(async move { reqwest::get(format!("{http}/wh/a1/svc/hang")).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(200)).await;

    // A second agent claims the same identifier.
    start_agent(&hub, "a1").await;
    let second = hub.ctx.registry.get("a1").unwrap();
    assert!(second != first);

    // The displaced session fails its waiters.
    let response = parked.await.unwrap();
    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("session was lost"));

    // New calls route through the new session.
    let ping = reqwest::get(format!("{}/wh/a1/svc/ping", hub.http))
        .await
        .unwrap();
    assert_eq!(ping.status(), 200);
    assert_eq!(ping.text().await.unwrap(), "pong");
}

#[tokio::test]
async fn test_empty_identifier_rejected() {
    let hub = start_hub(Duration::from_secs(10)).await;

    let client = unsafe { ClientBuilder::new().with_no_certificate_verification() }.unwrap();
    let conn = client.connect(&hub.quic).await.unwrap();
    let (send, recv) = conn.open_bi().await.unwrap();
    let mut writer = FrameWriter::new(send);
    let mut reader = FrameReader::new(recv);

    let register = Command::Register(RegisterCommand::new(""));
    writer.write(&register.encode().unwrap()).await.unwrap();

    let payload = reader.read().await.unwrap().unwrap();
    match Message::decode(&payload).unwrap() {
        Message::Response(Response::Basic(verdict)) => {
            assert_eq!(verdict.code, ResponseCode::BadRequest);
            assert_eq!(
                verdict.description,
                "Identifier is required for registration."
            );
        }
        other => panic!("expected a basic response, got {other:?}"),
    }

    assert!(hub.ctx.registry.get("").is_none());
}

#[tokio::test]
async fn test_malformed_frame_terminates_session() {
    let hub = start_hub(Duration::from_secs(10)).await;

    let client = unsafe { ClientBuilder::new().with_no_certificate_verification() }.unwrap();
    let conn = client.connect(&hub.quic).await.unwrap();
    let (send, recv) = conn.open_bi().await.unwrap();
    let mut writer = FrameWriter::new(send);
    let mut reader = FrameReader::new(recv);

    let register = Command::Register(RegisterCommand::new("m1"));
    writer.write(&register.encode().unwrap()).await.unwrap();

    let ack = reader.read().await.unwrap().unwrap();
    assert!(matches!(
        Message::decode(&ack).unwrap(),
        Message::Response(Response::Basic(_))
    ));
    assert!(hub.ctx.registry.get("m1").is_some());

    // A header declaring 100 payload bytes, followed by only 40 and EOF.
    let mut frame = Vec::new();
    PackageHeader::new(PackageType::MESSAGE, 100).encode(&mut frame);
    frame.extend_from_slice(&[0u8; 40]);

    let mut send = writer.into_inner();
    send.write_all(&frame).await.unwrap();
    send.finish().unwrap();

    // The hub tears the session down and cleans the registry.
    for _ in 0..40 {
        if hub.ctx.registry.get("m1").is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("the broken session was not removed from the registry");
}
