//! Control socket server
//!
//! Accepts Unix-socket connections from the CLI and translates protocol
//! requests into engine commands. One request per connection, newline
//! delimited JSON both ways; message types live in
//! [`padmap_config::protocol`]. The socket file is removed on drop.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use padmap_config::protocol::{self, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::engine::{DetectOutcome, EngineHandle};

pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind at the standard socket path ($XDG_RUNTIME_DIR/padmap.sock).
    pub fn new() -> Result<Self> {
        Self::bind(protocol::socket_path())
    }

    /// Bind at an explicit path, removing any stale socket file first.
    pub fn bind(socket_path: PathBuf) -> Result<Self> {
        if socket_path.exists() {
            tracing::debug!("removing stale socket file: {}", socket_path.display());
            std::fs::remove_file(&socket_path).with_context(|| {
                format!("removing stale socket file {}", socket_path.display())
            })?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("binding control socket at {}", socket_path.display()))?;

        tracing::info!("control socket listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("accepting control connection")?;
        Ok(stream)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("could not remove socket file on shutdown: {}", e);
            }
        }
    }
}

/// Serve one connection: read a request line, dispatch, write the response.
pub async fn handle_connection<F, Fut>(mut stream: UnixStream, handler: F) -> Result<()>
where
    F: FnOnce(Request) -> Fut,
    Fut: Future<Output = Response>,
{
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("reading control request")?;

    if bytes_read == 0 {
        tracing::debug!("control connection closed without data");
        return Ok(());
    }

    let line = line.trim();
    tracing::debug!("control request: {}", line);

    let response = match serde_json::from_str::<Request>(line) {
        Ok(request) => handler(request).await,
        Err(e) => {
            tracing::warn!("unparseable control request: {}", e);
            Response::Error {
                message: format!("invalid request: {}", e),
            }
        }
    };

    let response_json =
        serde_json::to_string(&response).context("serializing control response")?;

    writer
        .write_all(response_json.as_bytes())
        .await
        .context("writing control response")?;
    writer.write_all(b"\n").await.context("writing newline")?;
    writer.flush().await.context("flushing control response")?;

    Ok(())
}

/// Translate one protocol request into engine calls.
pub async fn dispatch(request: Request, engine: &EngineHandle) -> Response {
    let result = match request {
        Request::Status => return status(engine).await,
        Request::ListDevices => return list_devices(engine).await,
        Request::Detect => return detect(engine).await,
        Request::SetTarget { device } => engine.set_target(device).await,
        Request::AddMapping { source, target } => engine.add_mapping(source, target).await,
        Request::RemoveMapping { source } => engine.remove_mapping(source).await,
        Request::SetEnabled { enabled } => engine.set_enabled(enabled).await,
        Request::CancelDetect => engine.cancel_detect().await,
        Request::Start => engine.start().await,
        Request::Stop => engine.stop().await,
    };

    match result {
        Ok(()) => Response::Success { message: None },
        Err(e) => Response::Error {
            message: e.to_string(),
        },
    }
}

async fn status(engine: &EngineHandle) -> Response {
    match engine.status().await {
        Ok(status) => Response::Status { status },
        Err(e) => Response::Error {
            message: e.to_string(),
        },
    }
}

async fn list_devices(engine: &EngineHandle) -> Response {
    match engine.list_devices().await {
        Ok(devices) => Response::Devices {
            devices: devices.into_iter().map(Into::into).collect(),
        },
        Err(e) => Response::Error {
            message: e.to_string(),
        },
    }
}

async fn detect(engine: &EngineHandle) -> Response {
    match engine.detect().await {
        Ok(DetectOutcome::Detected(device)) => Response::Detected { device },
        Ok(DetectOutcome::Cancelled) => Response::Cancelled,
        Err(e) => Response::Error {
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use padmap_config::DeviceId;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn server_creates_and_cleans_up_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("padmap.sock");

        let server = IpcServer::bind(socket_path.clone()).unwrap();
        assert_eq!(server.socket_path(), socket_path);
        assert!(socket_path.exists());

        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn server_replaces_stale_socket_file() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("padmap.sock");

        std::fs::write(&socket_path, "stale").unwrap();

        let server = IpcServer::bind(socket_path.clone()).unwrap();
        assert!(socket_path.exists());
        drop(server);
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("padmap.sock");

        let server = IpcServer::bind(socket_path.clone()).unwrap();

        let handler_task = tokio::spawn(async move {
            let stream = server.accept().await.unwrap();
            handle_connection(stream, |request| async move {
                match request {
                    Request::Detect => Response::Detected {
                        device: DeviceId::new("1209:0001:pad"),
                    },
                    _ => Response::Error {
                        message: "unexpected request".to_string(),
                    },
                }
            })
            .await
            .unwrap();
        });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        let request_json = serde_json::to_string(&Request::Detect).unwrap();
        client.write_all(request_json.as_bytes()).await.unwrap();
        client.write_all(b"\n").await.unwrap();
        client.flush().await.unwrap();

        let (reader, _writer) = client.split();
        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).await.unwrap();

        let response: Response = serde_json::from_str(response_line.trim()).unwrap();
        assert_eq!(
            response,
            Response::Detected {
                device: DeviceId::new("1209:0001:pad"),
            }
        );

        handler_task.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_json_yields_error_response() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("padmap.sock");

        let server = IpcServer::bind(socket_path.clone()).unwrap();

        let handler_task = tokio::spawn(async move {
            let stream = server.accept().await.unwrap();
            handle_connection(stream, |_request| async move {
                Response::Success { message: None }
            })
            .await
            .unwrap();
        });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        client.write_all(b"{ not json }\n").await.unwrap();
        client.flush().await.unwrap();

        let (reader, _writer) = client.split();
        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).await.unwrap();

        let response: Response = serde_json::from_str(response_line.trim()).unwrap();
        assert!(matches!(response, Response::Error { .. }));

        handler_task.await.unwrap();
    }

    #[tokio::test]
    async fn empty_connection_is_tolerated() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("padmap.sock");

        let server = IpcServer::bind(socket_path.clone()).unwrap();

        let handler_task = tokio::spawn(async move {
            let stream = server.accept().await.unwrap();
            handle_connection(stream, |_request| async move {
                Response::Success { message: None }
            })
            .await
            .unwrap();
        });

        let client = UnixStream::connect(&socket_path).await.unwrap();
        drop(client);

        handler_task.await.unwrap();
    }
}
