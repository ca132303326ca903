use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::daemon::ControlRequest;
use crate::domain::mail::Destination;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Status,
    Select { account: String },
    GoTo { account: String, destination: Destination },
    Compose { account: String, to: Option<String> },
    Add { account: String, label: String, #[serde(default)] select: bool },
    Edit { account: String, label: String },
    Remove { account: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub message: Option<String>,
    /// Total unread across all accounts.
    #[serde(default)]
    pub unread: Option<u32>,
}

impl Response {
    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            unread: None,
        }
    }
}

pub fn socket_path() -> Result<PathBuf> {
    let base = crate::config::config_dir()?;
    std::fs::create_dir_all(&base)?;
    Ok(base.join("daemon.sock"))
}

#[cfg(unix)]
pub fn send(req: &Request) -> Result<Response> {
    send_to(&socket_path()?, req)
}

#[cfg(unix)]
pub fn send_to(path: &Path, req: &Request) -> Result<Response> {
    let mut s = UnixStream::connect(path)?;
    let data = serde_json::to_vec(req)?;
    // length-prefix
    s.write_all(&(data.len() as u32).to_be_bytes())?;
    s.write_all(&data)?;
    s.flush()?;

    let mut len_buf = [0u8; 4];
    s.read_exact(&mut len_buf)?;
    let n = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; n];
    s.read_exact(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(not(unix))]
pub fn send(_req: &Request) -> Result<Response> {
    Ok(Response::error("IPC not supported on this platform"))
}

/// Largest frame accepted from a client.
const MAX_FRAME: usize = 64 * 1024;

/// Accepts control connections until `cancel` fires. Every request is
/// forwarded to the coordinator and answered with its reply.
#[cfg(unix)]
pub async fn serve(
    path: PathBuf,
    control: mpsc::UnboundedSender<ControlRequest>,
    cancel: CancellationToken,
) -> Result<()> {
    use tokio::net::UnixListener;

    if path.exists() {
        // left over from a previous run
        std::fs::remove_file(&path)?;
    }
    let listener = UnixListener::bind(&path)?;
    log::info!("Control socket at {}", path.display());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        log::warn!("control socket accept failed: {e}");
                        continue;
                    }
                };
                let control = control.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, control).await {
                        log::debug!("control connection ended: {e}");
                    }
                });
            }
        }
    }

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[cfg(not(unix))]
pub async fn serve(
    _path: PathBuf,
    _control: mpsc::UnboundedSender<ControlRequest>,
    cancel: CancellationToken,
) -> Result<()> {
    log::warn!("control socket not supported on this platform");
    cancel.cancelled().await;
    Ok(())
}

#[cfg(unix)]
async fn handle_connection(
    mut stream: tokio::net::UnixStream,
    control: mpsc::UnboundedSender<ControlRequest>,
) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let n = stream.read_u32().await? as usize;
    let response = if n > MAX_FRAME {
        Response::error(format!("request too large ({n} bytes)"))
    } else {
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).await?;
        match serde_json::from_slice::<Request>(&buf) {
            Ok(request) => dispatch(request, &control).await,
            Err(e) => Response::error(format!("bad request: {e}")),
        }
    };

    let data = serde_json::to_vec(&response)?;
    stream.write_u32(data.len() as u32).await?;
    stream.write_all(&data).await?;
    stream.flush().await?;
    Ok(())
}

async fn dispatch(request: Request, control: &mpsc::UnboundedSender<ControlRequest>) -> Response {
    let (reply, rx) = oneshot::channel();
    if control.send(ControlRequest { request, reply }).is_err() {
        return Response::error("daemon is shutting down");
    }
    rx.await
        .unwrap_or_else(|_| Response::error("daemon dropped the request"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn requests_are_tagged() {
        let json = serde_json::to_string(&Request::GoTo {
            account: "work".into(),
            destination: Destination::Important,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"cmd":"go_to","account":"work","destination":"important"}"#
        );
        let back: Request = serde_json::from_str(r#"{"cmd":"ping"}"#).unwrap();
        assert_eq!(back, Request::Ping);
        let add: Request =
            serde_json::from_str(r#"{"cmd":"add","account":"work","label":"Work"}"#).unwrap();
        assert_eq!(
            add,
            Request::Add {
                account: "work".into(),
                label: "Work".into(),
                select: false,
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn socket_round_trip_reaches_coordinator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<ControlRequest>();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(path.clone(), control_tx, cancel.clone()));

        // answer like the coordinator would
        tokio::spawn(async move {
            while let Some(ControlRequest { request, reply }) = control_rx.recv().await {
                let _ = reply.send(Response {
                    ok: true,
                    message: Some(format!("{request:?}")),
                    unread: Some(8),
                });
            }
        });

        while !path.exists() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let client_path = path.clone();
        let response = tokio::task::spawn_blocking(move || {
            send_to(
                &client_path,
                &Request::Select {
                    account: "work".into(),
                },
            )
        })
        .await
        .unwrap()
        .unwrap();

        assert!(response.ok);
        assert_eq!(response.unread, Some(8));
        assert!(response.message.unwrap().contains("work"));

        cancel.cancel();
        server.await.unwrap().unwrap();
        assert!(!path.exists());
    }
}
