//! Shared utilities for relay integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use mjpeg_relay::relay::{SessionHandle, SessionStatus, UpstreamError, UpstreamResponse, UpstreamSource};
use mjpeg_relay::resilience::RetryTimer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const CAMERA_BOUNDARY: &str = "camframe";

enum Script {
    Refuse,
    Hang,
    Serve(String, Vec<Bytes>),
    Live(String, mpsc::UnboundedReceiver<Result<Bytes, UpstreamError>>),
}

/// Increments a counter when the upstream body is dropped.
struct TeardownProbe(Arc<AtomicUsize>);

impl Drop for TeardownProbe {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test-controlled body of a live upstream connection.
pub struct LiveFeed(mpsc::UnboundedSender<Result<Bytes, UpstreamError>>);

impl LiveFeed {
    pub fn send(&self, chunk: &'static [u8]) {
        let _ = self.0.send(Ok(Bytes::from_static(chunk)));
    }

    /// Break the connection mid-stream.
    pub fn fail(&self) {
        let _ = self
            .0
            .send(Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into()));
    }
}

/// Upstream that answers each connection attempt from a queue of scripts.
/// An empty queue refuses the connection.
#[derive(Default)]
pub struct ScriptedUpstream {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
    teardowns: Arc<AtomicUsize>,
}

impl ScriptedUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self) {
        self.push(Script::Refuse);
    }

    /// Accept but never send headers.
    pub fn hang(&self) {
        self.push(Script::Hang);
    }

    /// Send headers, the given chunks, then end the body.
    pub fn serve(&self, content_type: &str, chunks: Vec<&'static [u8]>) {
        let chunks = chunks.into_iter().map(Bytes::from_static).collect();
        self.push(Script::Serve(content_type.to_string(), chunks));
    }

    /// Send headers and keep the body open; the test feeds it.
    pub fn live(&self, content_type: &str) -> LiveFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Script::Live(content_type.to_string(), rx));
        LiveFeed(tx)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Bodies dropped so far.
    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }
}

#[async_trait]
impl UpstreamSource for ScriptedUpstream {
    async fn connect(&self) -> Result<UpstreamResponse, UpstreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Refuse);
        match script {
            Script::Refuse => {
                Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into())
            }
            Script::Hang => std::future::pending().await,
            Script::Serve(content_type, chunks) => {
                let probe = TeardownProbe(Arc::clone(&self.teardowns));
                let body = futures_util::stream::unfold(
                    (chunks.into_iter(), probe),
                    |(mut chunks, probe)| async move {
                        chunks.next().map(|chunk| (Ok(chunk), (chunks, probe)))
                    },
                )
                .boxed();
                Ok(UpstreamResponse {
                    content_type: Some(content_type),
                    body,
                })
            }
            Script::Live(content_type, rx) => {
                let probe = TeardownProbe(Arc::clone(&self.teardowns));
                let body = futures_util::stream::unfold((rx, probe), |(mut rx, probe)| async move {
                    rx.recv().await.map(|item| (item, (rx, probe)))
                })
                .boxed();
                Ok(UpstreamResponse {
                    content_type: Some(content_type),
                    body,
                })
            }
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Timer that fires immediately and remembers every requested delay.
#[derive(Default)]
pub struct InstantTimer {
    delays: Mutex<Vec<Duration>>,
}

impl InstantTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl RetryTimer for InstantTimer {
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        self.delays.lock().unwrap().push(delay);
        Box::pin(async {})
    }
}

/// Wait until the session publishes a status matching `predicate`.
pub async fn wait_for_status<F>(session: &SessionHandle, predicate: F) -> SessionStatus
where
    F: FnMut(&SessionStatus) -> bool,
{
    let mut status = session.subscribe();
    let matched = *tokio::time::timeout(Duration::from_secs(5), status.wait_for(predicate))
        .await
        .expect("timed out waiting for session status")
        .expect("session task stopped");
    matched
}

/// A mock MJPEG camera over plain TCP.
///
/// Frames deliberately omit the CRLF before each boundary marker.
pub struct MockCamera {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl MockCamera {
    pub fn url(&self) -> String {
        format!("http://{}/video", self.addr)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

pub async fn start_mock_camera() -> MockCamera {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let mut request = [0u8; 1024];
                        let _ = socket.read(&mut request).await;
                        let head = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace;boundary={}\r\nConnection: close\r\n\r\n",
                            CAMERA_BOUNDARY
                        );
                        if socket.write_all(head.as_bytes()).await.is_err() {
                            return;
                        }
                        for frame in 0u32.. {
                            let part = format!(
                                "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPG{}",
                                CAMERA_BOUNDARY,
                                frame % 10
                            );
                            if socket.write_all(part.as_bytes()).await.is_err() {
                                break;
                            }
                            tokio::time::sleep(Duration::from_millis(20)).await;
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockCamera { addr, connections }
}

/// An address with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
