//! Relay session behavior against scripted upstreams.

use std::sync::Arc;
use std::time::Duration;

use mjpeg_relay::config::{RetryConfig, StreamConfig, TimeoutConfig, ViewerConfig};
use mjpeg_relay::relay::{ConnectorState, RelaySession, SessionHandle, SessionOptions, ViewerStream};
use mjpeg_relay::RelayError;

mod common;
use common::{wait_for_status, InstantTimer, ScriptedUpstream};

const CONTENT_TYPE: &str = "multipart/x-mixed-replace;boundary=frame";

fn spawn(upstream: &Arc<ScriptedUpstream>, timer: &Arc<InstantTimer>) -> SessionHandle {
    spawn_with(SessionOptions::new("cam"), upstream, timer)
}

fn spawn_with(
    options: SessionOptions,
    upstream: &Arc<ScriptedUpstream>,
    timer: &Arc<InstantTimer>,
) -> SessionHandle {
    RelaySession::spawn(options, upstream.clone(), timer.clone())
}

async fn next(viewer: &mut ViewerStream) -> Option<bytes::Bytes> {
    tokio::time::timeout(Duration::from_secs(5), viewer.recv())
        .await
        .expect("timed out waiting for viewer bytes")
}

#[tokio::test]
async fn test_viewers_share_one_upstream_connection() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let feed = upstream.live(CONTENT_TYPE);
    let session = spawn(&upstream, &timer);

    let (a, b, c) = tokio::join!(
        session.handle_viewer(),
        session.handle_viewer(),
        session.handle_viewer()
    );
    let mut viewers = vec![a.unwrap(), b.unwrap(), c.unwrap()];
    for viewer in &viewers {
        assert_eq!(viewer.boundary(), "frame");
    }

    feed.send(b"--frame\r\nContent-Type: image/jpeg\r\n\r\nAAAA");
    for viewer in &mut viewers {
        assert_eq!(
            next(viewer).await.unwrap(),
            &b"--frame\r\nContent-Type: image/jpeg\r\n\r\nAAAA"[..]
        );
    }
    assert_eq!(upstream.connects(), 1);
    assert_eq!(session.status().viewers, 3);

    drop(viewers);
    let status = wait_for_status(&session, |s| s.viewers == 0 && s.state == ConnectorState::Idle).await;
    assert_eq!(status.connects, 1);
    assert_eq!(upstream.teardowns(), 1);
}

#[tokio::test]
async fn test_late_joiner_starts_at_next_marker() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let feed = upstream.live(CONTENT_TYPE);
    let session = spawn(&upstream, &timer);

    let mut first = session.handle_viewer().await.unwrap();
    feed.send(b"--frame\r\nAAAA");
    assert_eq!(next(&mut first).await.unwrap(), &b"--frame\r\nAAAA"[..]);

    let mut late = session.handle_viewer().await.unwrap();
    feed.send(b"AAAA-more");
    feed.send(b"tail\r\n--frame\r\nBBBB");

    assert_eq!(next(&mut first).await.unwrap(), &b"AAAA-more"[..]);
    assert_eq!(next(&mut first).await.unwrap(), &b"tail\r\n--frame\r\nBBBB"[..]);
    assert_eq!(next(&mut late).await.unwrap(), &b"--frame\r\nBBBB"[..]);
    assert_eq!(upstream.connects(), 1);
}

#[tokio::test]
async fn test_missing_crlf_before_marker_is_repaired() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let feed = upstream.live(CONTENT_TYPE);
    let session = spawn(&upstream, &timer);

    let mut viewer = session.handle_viewer().await.unwrap();
    feed.send(b"--frame\r\nJPEG1");
    feed.send(b"JPEG1--frame\r\nJPEG2");

    assert_eq!(next(&mut viewer).await.unwrap(), &b"--frame\r\nJPEG1"[..]);
    assert_eq!(
        next(&mut viewer).await.unwrap(),
        &b"JPEG1\r\n--frame\r\nJPEG2"[..]
    );
}

#[tokio::test]
async fn test_retries_exhaust_after_ten_attempts() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let session = spawn(&upstream, &timer);

    let err = session.handle_viewer().await.unwrap_err();
    assert!(matches!(err, RelayError::Terminated));
    let status = wait_for_status(&session, |s| s.state == ConnectorState::Exhausted).await;

    assert_eq!(upstream.connects(), 10);
    assert_eq!(status.connects, 10);
    assert_eq!(status.viewers, 0);
    let delays = timer.delays();
    assert_eq!(delays.len(), 10);
    assert!(delays.iter().all(|d| *d == Duration::from_millis(500)));

    // A new viewer starts a fresh cycle.
    let feed = upstream.live(CONTENT_TYPE);
    let mut viewer = session.handle_viewer().await.unwrap();
    feed.send(b"--frame\r\nA");
    assert_eq!(next(&mut viewer).await.unwrap(), &b"--frame\r\nA"[..]);
    assert_eq!(upstream.connects(), 11);
    assert_eq!(session.status().state, ConnectorState::Streaming);
}

#[tokio::test]
async fn test_retry_ceiling_follows_stream_override() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let stream = StreamConfig {
        name: "cam".into(),
        path: "/cam".into(),
        url: Some("http://camera.local/video".into()),
        force_https: false,
        retries: Some(RetryConfig {
            max_attempts: 3,
            delay_ms: 50,
        }),
    };
    let options = SessionOptions::from_config(
        &stream,
        &RetryConfig::default(),
        &TimeoutConfig::default(),
        &ViewerConfig::default(),
    );
    let session = spawn_with(options, &upstream, &timer);

    assert!(session.handle_viewer().await.is_err());
    assert_eq!(upstream.connects(), 3);
    assert_eq!(timer.delays(), vec![Duration::from_millis(50); 3]);
}

#[tokio::test]
async fn test_missing_boundary_is_retried() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    upstream.serve("image/jpeg", vec![]);
    let feed = upstream.live(CONTENT_TYPE);
    let session = spawn(&upstream, &timer);

    let mut viewer = session.handle_viewer().await.unwrap();
    feed.send(b"--frame\r\nA");
    assert_eq!(next(&mut viewer).await.unwrap(), &b"--frame\r\nA"[..]);
    assert_eq!(upstream.connects(), 2);
    assert_eq!(timer.delays().len(), 1);
}

#[tokio::test]
async fn test_natural_end_terminates_viewers_without_retry() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let feed = upstream.live(CONTENT_TYPE);
    let session = spawn(&upstream, &timer);

    let mut viewer = session.handle_viewer().await.unwrap();
    feed.send(b"--frame\r\nLAST");
    drop(feed);

    assert_eq!(next(&mut viewer).await.unwrap(), &b"--frame\r\nLAST"[..]);
    assert!(next(&mut viewer).await.is_none());

    let status = wait_for_status(&session, |s| s.state == ConnectorState::Idle && s.viewers == 0).await;
    assert_eq!(status.connects, 1);
    assert!(timer.delays().is_empty());
}

#[tokio::test]
async fn test_viewers_rejoin_at_marker_after_reconnect() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let first = upstream.live(CONTENT_TYPE);
    let second = upstream.live(CONTENT_TYPE);
    let session = spawn(&upstream, &timer);

    let mut viewer = session.handle_viewer().await.unwrap();
    first.send(b"--frame\r\nA");
    assert_eq!(next(&mut viewer).await.unwrap(), &b"--frame\r\nA"[..]);

    first.fail();
    second.send(b"half-a-frame");
    second.send(b"x--frame\r\nB");

    // The partial frame is skipped; the viewer rejoins at the repaired marker
    // with its CRLF, closing the part that was cut short.
    assert_eq!(next(&mut viewer).await.unwrap(), &b"\r\n--frame\r\nB"[..]);
    assert_eq!(upstream.connects(), 2);
    assert_eq!(timer.delays().len(), 1);
}

#[tokio::test]
async fn test_reconnect_body_starting_at_marker_keeps_framing() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let first = upstream.live(CONTENT_TYPE);
    let second = upstream.live(CONTENT_TYPE);
    let session = spawn(&upstream, &timer);

    let mut viewer = session.handle_viewer().await.unwrap();
    first.send(b"--frame\r\nJPEG-PARTIAL");
    first.fail();
    second.send(b"--frame\r\nJPEG2");

    let mut received = next(&mut viewer).await.unwrap().to_vec();
    received.extend_from_slice(&next(&mut viewer).await.unwrap());
    assert_eq!(received, b"--frame\r\nJPEG-PARTIAL\r\n--frame\r\nJPEG2");
    assert_eq!(upstream.connects(), 2);
}

#[tokio::test]
async fn test_boundary_change_ends_existing_viewers() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let first = upstream.live(CONTENT_TYPE);
    let _second = upstream.live("multipart/x-mixed-replace;boundary=other");
    let third = upstream.live("multipart/x-mixed-replace;boundary=other");
    let session = spawn(&upstream, &timer);

    let mut viewer = session.handle_viewer().await.unwrap();
    first.send(b"--frame\r\nA");
    assert_eq!(next(&mut viewer).await.unwrap(), &b"--frame\r\nA"[..]);

    first.fail();
    assert!(next(&mut viewer).await.is_none());
    // Nobody is left watching, so the reconnected upstream is released.
    wait_for_status(&session, |s| s.state == ConnectorState::Idle && s.viewers == 0).await;
    assert_eq!(upstream.teardowns(), 2);

    let mut fresh = session.handle_viewer().await.unwrap();
    assert_eq!(fresh.boundary(), "other");
    third.send(b"--other\r\nB");
    assert_eq!(next(&mut fresh).await.unwrap(), &b"--other\r\nB"[..]);
    assert_eq!(upstream.connects(), 3);
}

#[tokio::test]
async fn test_slow_viewer_is_evicted() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let feed = upstream.live(CONTENT_TYPE);
    let mut options = SessionOptions::new("cam");
    options.buffer_chunks = 2;
    let session = spawn_with(options, &upstream, &timer);

    let mut slow = session.handle_viewer().await.unwrap();
    let mut fast = session.handle_viewer().await.unwrap();

    for chunk in [&b"--frame\r\n1"[..], &b"2"[..], &b"3"[..], &b"4"[..]] {
        feed.send(chunk);
        assert!(next(&mut fast).await.is_some());
    }
    wait_for_status(&session, |s| s.viewers == 1).await;

    assert_eq!(next(&mut slow).await.unwrap(), &b"--frame\r\n1"[..]);
    assert_eq!(next(&mut slow).await.unwrap(), &b"2"[..]);
    assert!(next(&mut slow).await.is_none());
    assert_eq!(upstream.connects(), 1);
}

#[tokio::test]
async fn test_abandoned_waiting_viewer_releases_upstream() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    upstream.hang();
    let session = spawn(&upstream, &timer);

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.handle_viewer().await.map(|_| ()) })
    };
    wait_for_status(&session, |s| s.state == ConnectorState::Connecting && s.viewers == 1).await;

    waiting.abort();
    let status = wait_for_status(&session, |s| s.state == ConnectorState::Idle).await;
    assert_eq!(status.viewers, 0);
    assert_eq!(upstream.connects(), 1);
}

#[tokio::test]
async fn test_shutdown_ends_viewers_and_closes_session() {
    let upstream = ScriptedUpstream::new();
    let timer = InstantTimer::new();
    let _feed = upstream.live(CONTENT_TYPE);
    let session = spawn(&upstream, &timer);

    let mut viewer = session.handle_viewer().await.unwrap();
    session.shutdown();

    assert!(next(&mut viewer).await.is_none());
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(matches!(
        session.handle_viewer().await,
        Err(RelayError::SessionClosed(_))
    ));
    assert_eq!(upstream.teardowns(), 1);
}

#[tokio::test]
async fn test_missing_url_is_configuration_error() {
    let stream = StreamConfig {
        name: "cam".into(),
        path: "/cam".into(),
        url: None,
        force_https: false,
        retries: None,
    };
    let err = RelaySession::from_config(
        &stream,
        &RetryConfig::default(),
        &TimeoutConfig::default(),
        &ViewerConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, RelayError::Configuration(_)));
}
