//! Client used from inside a profile container.

use std::path::{Path, PathBuf};
use std::time::Duration;

use qube_proto::{Decoder, IN_PROFILE_SOCKET, MSG_ERROR, MSG_OK, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{InceptionError, Result};

/// Per-call deadline, connect included.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(1);

const READ_BUF_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone)]
pub struct InceptionClient {
    path: PathBuf,
    timeout: Duration,
}

impl InceptionClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A client for the profile socket when running inside a profile
    /// container, `None` on the host.
    pub fn detect() -> Option<Self> {
        Self::detect_at(Path::new(IN_PROFILE_SOCKET))
    }

    pub fn detect_at(path: &Path) -> Option<Self> {
        path.exists().then(|| Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn xdg_open(&self, url: &str) -> Result<()> {
        self.call(Request::XdgOpen {
            url: url.to_string(),
        })
        .await
    }

    pub async fn run_workload(&self, workload: &str, args: &[String]) -> Result<()> {
        self.call(Request::RunWorkload {
            workload: workload.to_string(),
            args: args.join(" "),
        })
        .await
    }

    pub async fn flatpak_run(&self, app: &str, args: &[String]) -> Result<()> {
        self.call(Request::FlatpakRun {
            workload: app.to_string(),
            args: args.join(" "),
        })
        .await
    }

    /// One connection per call.
    async fn call(&self, request: Request) -> Result<()> {
        debug!(method = request.method(), socket = %self.path.display(), "inception call");
        tokio::time::timeout(self.timeout, self.exchange(&request))
            .await
            .map_err(|_| InceptionError::Timeout(self.timeout))?
    }

    async fn exchange(&self, request: &Request) -> Result<()> {
        const SEQ: u32 = 1;
        let mut stream = UnixStream::connect(&self.path).await?;
        stream.write_all(&request.encode(SEQ)?).await?;

        let mut decoder = Decoder::new();
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(InceptionError::Transport(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection closed",
                )));
            }
            for msg in decoder.decode(buf.get(..n).unwrap_or_default())? {
                if msg.seq != SEQ {
                    continue;
                }
                return match msg.msg_type {
                    MSG_OK => Ok(()),
                    MSG_ERROR => Err(InceptionError::Remote(
                        qube_proto::decode_error(&msg.payload)?.to_string(),
                    )),
                    other => Err(InceptionError::UnexpectedResponse(other)),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::UnixListener;

    use super::*;

    #[test]
    fn detects_socket_presence() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("qube.sock");
        assert!(InceptionClient::detect_at(&path).is_none());
        std::fs::write(&path, b"").unwrap();
        let client = InceptionClient::detect_at(&path).unwrap();
        assert_eq!(client.path(), path);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("qube.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = InceptionClient::new(&path).with_timeout(Duration::from_millis(100));
        let err = client.xdg_open("https://example.com").await.unwrap_err();
        assert!(matches!(err, InceptionError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_socket_is_transport_error() {
        let tmp = tempfile::tempdir().unwrap();
        let client = InceptionClient::new(tmp.path().join("absent.sock"));
        let err = client.run_workload("firefox", &[]).await.unwrap_err();
        assert!(matches!(err, InceptionError::Transport(_)));
    }

    #[tokio::test]
    async fn remote_error_is_surfaced() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("qube.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            let msgs = Decoder::new().decode(&buf[..n]).unwrap();
            assert_eq!(
                Request::decode(&msgs[0]).unwrap(),
                Request::FlatpakRun {
                    workload: "org.gimp.GIMP".into(),
                    args: "a b".into()
                }
            );
            let payload = qube_proto::encode_error("flatpak not allowed");
            let resp = qube_proto::encode(MSG_ERROR, msgs[0].seq, &payload).unwrap();
            stream.write_all(&resp).await.unwrap();
        });

        let client = InceptionClient::new(&path);
        let err = client
            .flatpak_run("org.gimp.GIMP", &["a".into(), "b".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, InceptionError::Remote(m) if m == "flatpak not allowed"));
    }
}
