//! Stream recorder: saves one relayed stream to a timestamped file.
//!
//! The recorder is a plain viewer. It issues a single GET and appends every
//! body chunk to the output file until the stream ends or it is told to stop.

use std::fmt::Display;
use std::future::Future;
use std::path::Path;

use chrono::{DateTime, TimeZone};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("relay answered with status {0}")]
    Status(u16),

    #[error("failed to write recording: {0}")]
    Io(#[from] std::io::Error),
}

/// `<prefix>-HH_MM_SS-DD-MM-YYYY.mjpeg` for the given instant.
pub fn recording_file_name<Tz>(prefix: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{}-{}.mjpeg", prefix, at.format("%H_%M_%S-%d-%m-%Y"))
}

/// Copy the body at `url` into `path` until it ends or `stop` resolves.
///
/// Returns the number of bytes written. The file is only created once the
/// relay has answered with a success status.
pub async fn record<F>(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    stop: F,
) -> Result<u64, RecordError>
where
    F: Future<Output = ()>,
{
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RecordError::Status(status.as_u16()));
    }

    let mut file = File::create(path).await?;
    let mut body = response.bytes_stream();
    let mut written = 0u64;
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => {
                tracing::info!(bytes = written, "Recording stopped");
                break;
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                Some(Err(e)) => {
                    // Keep what was already written.
                    tracing::warn!(error = %e, bytes = written, "Stream interrupted");
                    break;
                }
                None => {
                    tracing::info!(bytes = written, "Stream ended");
                    break;
                }
            }
        }
    }

    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn one_shot_server(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/cam", addr)
    }

    #[test]
    fn file_name_uses_one_based_month() {
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 7, 8, 9).unwrap();
        assert_eq!(
            recording_file_name("garage", &at),
            "garage-07_08_09-05-01-2024.mjpeg"
        );
    }

    #[tokio::test]
    async fn records_body_until_stream_ends() {
        let url = one_shot_server(
            b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace;boundary=b\r\nConnection: close\r\n\r\n--b\r\nframe\r\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mjpeg");

        let written = record(&reqwest::Client::new(), &url, &path, std::future::pending())
            .await
            .unwrap();

        assert_eq!(written, 12);
        assert_eq!(std::fs::read(&path).unwrap(), b"--b\r\nframe\r\n");
    }

    #[tokio::test]
    async fn error_status_creates_no_file() {
        let url = one_shot_server(
            b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mjpeg");

        let err = record(&reqwest::Client::new(), &url, &path, std::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, RecordError::Status(502)));
        assert!(!path.exists());
    }
}
