//! Host-side listener on a profile's socket.
//!
//! Every accepted connection gets its own task. Requests on a connection are
//! answered in order with `ok` or `error` carrying the request's seq.

use std::fs;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use qube_proto::{Decoder, MSG_ERROR, MSG_OK, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{InceptionError, Result};

const READ_BUF_SIZE: usize = 8 * 1024;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What the server does with each request. `profile` is always the
/// server's own profile, never anything supplied by the caller.
#[async_trait]
pub trait InceptionHandler: Send + Sync + 'static {
    async fn xdg_open(&self, profile: &str, url: &str) -> std::result::Result<(), HandlerError>;

    async fn run_workload(
        &self,
        profile: &str,
        workload: &str,
        args: Vec<String>,
    ) -> std::result::Result<(), HandlerError>;

    async fn flatpak_run(
        &self,
        profile: &str,
        app: &str,
        args: Vec<String>,
    ) -> std::result::Result<(), HandlerError>;
}

/// Split an argument string on ASCII space, dropping empty pieces.
pub fn split_args(args: &str) -> Vec<String> {
    args.split(' ')
        .filter(|a| !a.is_empty())
        .map(String::from)
        .collect()
}

/// A bound profile socket.
pub struct InceptionServer {
    profile: Arc<str>,
    path: PathBuf,
    listener: UnixListener,
    handler: Arc<dyn InceptionHandler>,
}

impl InceptionServer {
    /// Bind `path` for `profile`.
    ///
    /// The parent directory is created with mode 0700, a stale socket is
    /// removed and the new one is restricted to 0600.
    pub fn bind(path: &Path, profile: &str, handler: Arc<dyn InceptionHandler>) -> Result<Self> {
        let socket_err = |source| InceptionError::Socket {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)
                .map_err(|source| InceptionError::Socket {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(socket_err(e)),
        }

        let listener = UnixListener::bind(path).map_err(socket_err)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(socket_err)?;
        info!(profile = %profile, path = %path.display(), "inception socket listening");

        Ok(Self {
            profile: Arc::from(profile),
            path: path.to_path_buf(),
            listener,
            handler,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` fires. Handler failures are
    /// reported to the caller and never stop the listener.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => {
                    debug!(profile = %self.profile, "inception server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _)) => {
                    let profile = Arc::clone(&self.profile);
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &profile, handler.as_ref()).await {
                            warn!(profile = %profile, error = %e, "inception connection failed");
                        }
                    });
                }
                Err(e) => {
                    error!(profile = %self.profile, error = %e, "accept failed");
                    return Err(InceptionError::Transport(e));
                }
            }
        }
    }
}

impl Drop for InceptionServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    profile: &str,
    handler: &dyn InceptionHandler,
) -> Result<()> {
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let messages = decoder.decode(buf.get(..n).unwrap_or_default())?;

        for msg in messages {
            let outcome = match Request::decode(&msg) {
                Ok(request) => dispatch(request, profile, handler).await,
                Err(e) => Err(e.to_string()),
            };
            let response = match outcome {
                Ok(()) => qube_proto::encode(MSG_OK, msg.seq, &[])?,
                Err(message) => {
                    qube_proto::encode(MSG_ERROR, msg.seq, &qube_proto::encode_error(&message))?
                }
            };
            stream.write_all(&response).await?;
        }
    }
}

async fn dispatch(
    request: Request,
    profile: &str,
    handler: &dyn InceptionHandler,
) -> std::result::Result<(), String> {
    let method = request.method();
    info!(profile = %profile, method, "inception request");
    let result = match request {
        Request::XdgOpen { url } => handler.xdg_open(profile, &url).await,
        Request::RunWorkload { workload, args } => {
            handler.run_workload(profile, &workload, split_args(&args)).await
        }
        Request::FlatpakRun { workload, args } => {
            handler.flatpak_run(profile, &workload, split_args(&args)).await
        }
    };
    result.map_err(|e| {
        warn!(profile = %profile, method, error = %e, "inception request failed");
        e.to_string()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use qube_proto::{MSG_RUN_WORKLOAD, RawMessage};

    use super::*;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InceptionHandler for Recording {
        async fn xdg_open(&self, profile: &str, url: &str) -> std::result::Result<(), HandlerError> {
            self.calls.lock().unwrap().push(format!("open {profile} {url}"));
            if url.starts_with("bad:") {
                return Err("no handler for scheme bad".into());
            }
            Ok(())
        }

        async fn run_workload(
            &self,
            profile: &str,
            workload: &str,
            args: Vec<String>,
        ) -> std::result::Result<(), HandlerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("run {profile} {workload} {args:?}"));
            Ok(())
        }

        async fn flatpak_run(
            &self,
            profile: &str,
            app: &str,
            args: Vec<String>,
        ) -> std::result::Result<(), HandlerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("flatpak {profile} {app} {args:?}"));
            Ok(())
        }
    }

    async fn roundtrip(stream: &mut UnixStream, data: &[u8]) -> Vec<RawMessage> {
        stream.write_all(data).await.unwrap();
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        Decoder::new().decode(&buf[..n]).unwrap()
    }

    #[test]
    fn split_args_drops_empty_pieces() {
        assert_eq!(split_args("a  b c "), vec!["a", "b", "c"]);
        assert!(split_args("").is_empty());
    }

    #[tokio::test]
    async fn dispatches_with_server_profile() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let handler = Arc::new(Recording::default());
        let h = Arc::clone(&handler);
        let task = tokio::spawn(async move { handle_connection(server, "personal", h.as_ref()).await });

        let req = Request::RunWorkload {
            workload: "firefox".into(),
            args: "--new-tab  https://x".into(),
        };
        let msgs = roundtrip(&mut client, &req.encode(3).unwrap()).await;
        assert_eq!(msgs[0].msg_type, MSG_OK);
        assert_eq!(msgs[0].seq, 3);

        drop(client);
        task.await.unwrap().unwrap();
        assert_eq!(
            handler.calls.lock().unwrap().as_slice(),
            ["run personal firefox [\"--new-tab\", \"https://x\"]"]
        );
    }

    #[tokio::test]
    async fn handler_error_is_returned_and_connection_survives() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let handler = Arc::new(Recording::default());
        let h = Arc::clone(&handler);
        tokio::spawn(async move { handle_connection(server, "work", h.as_ref()).await });

        let bad = Request::XdgOpen { url: "bad:x".into() };
        let msgs = roundtrip(&mut client, &bad.encode(1).unwrap()).await;
        assert_eq!(msgs[0].msg_type, MSG_ERROR);
        assert_eq!(
            qube_proto::decode_error(&msgs[0].payload).unwrap(),
            "no handler for scheme bad"
        );

        let good = Request::XdgOpen { url: "https://example.com".into() };
        let msgs = roundtrip(&mut client, &good.encode(2).unwrap()).await;
        assert_eq!(msgs[0].msg_type, MSG_OK);
        assert_eq!(msgs[0].seq, 2);
    }

    #[tokio::test]
    async fn malformed_payload_gets_error_response() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let handler = Arc::new(Recording::default());
        tokio::spawn(async move { handle_connection(server, "work", handler.as_ref()).await });

        let data = qube_proto::encode(MSG_RUN_WORKLOAD, 5, &[0, 0]).unwrap();
        let msgs = roundtrip(&mut client, &data).await;
        assert_eq!(msgs[0].msg_type, MSG_ERROR);
        assert_eq!(msgs[0].seq, 5);
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_with_private_one() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("qubesome").join("personal").join("qube.sock");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"stale").unwrap();

        let server = InceptionServer::bind(&path, "personal", Arc::new(Recording::default())).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(server);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn serve_stops_on_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("p").join("qube.sock");
        let server = InceptionServer::bind(&path, "p", Arc::new(Recording::default())).unwrap();
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);

        let token = CancellationToken::new();
        let task = tokio::spawn(server.serve(token.clone()));
        token.cancel();
        task.await.unwrap().unwrap();
        assert!(!path.exists());
    }
}
