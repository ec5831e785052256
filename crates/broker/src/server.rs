//! The control socket server.
//!
//! One accept loop; each connection gets its own task and processes its
//! requests strictly in arrival order. Framing is one JSON object per
//! line in each direction.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use wb_domain::{Error, Result};

use crate::dispatch::{handle_request, ConnCtx};
use crate::rpc::{RpcError, RpcRequest, RpcResponse, INVALID_REQUEST, PARSE_ERROR};
use crate::state::BrokerState;

/// Bind the control socket and serve until cancelled.
pub async fn run(state: Arc<BrokerState>, cancel: CancellationToken) -> Result<()> {
    let socket_path = state.config.server.socket_path.clone();
    let path = Path::new(&socket_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Io)?;
    }
    // A stale socket from an unclean shutdown blocks bind.
    let _ = std::fs::remove_file(path);

    let listener = UnixListener::bind(path).map_err(Error::Io)?;
    std::fs::set_permissions(
        path,
        std::fs::Permissions::from_mode(state.config.server.socket_mode),
    )
    .map_err(Error::Io)?;

    tracing::info!(socket = %socket_path, "control socket listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let state = state.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(state, stream, cancel).await {
                                tracing::debug!(error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
            _ = cancel.cancelled() => {
                break;
            }
        }
    }

    let _ = std::fs::remove_file(path);
    tracing::info!("control socket closed");
    Ok(())
}

/// Serve one connection: read a line, dispatch, write one response
/// line. Requests on the same connection never interleave.
async fn serve_connection(
    state: Arc<BrokerState>,
    stream: UnixStream,
    cancel: CancellationToken,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let ctx = ConnCtx::new();
    let max_bytes = state.config.server.max_request_bytes;

    loop {
        let mut line = String::new();
        let read = tokio::select! {
            read = reader.read_line(&mut line) => read.map_err(Error::Io)?,
            _ = cancel.cancelled() => return Ok(()),
        };
        if read == 0 {
            return Ok(()); // peer closed
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = if line.len() > max_bytes {
            RpcResponse::err(
                serde_json::Value::Null,
                RpcError::new(
                    INVALID_REQUEST,
                    format!("request exceeds {max_bytes} bytes"),
                ),
            )
        } else {
            match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) => handle_request(&state, &ctx, request).await,
                Err(e) => {
                    // Distinguish unparseable JSON from a well-formed
                    // object that is not a request.
                    let code = if serde_json::from_str::<serde_json::Value>(&line).is_ok() {
                        INVALID_REQUEST
                    } else {
                        PARSE_ERROR
                    };
                    RpcResponse::err(
                        serde_json::Value::Null,
                        RpcError::new(code, format!("malformed request: {e}")),
                    )
                }
            }
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        write_half.write_all(&out).await.map_err(Error::Io)?;
        write_half.flush().await.map_err(Error::Io)?;
    }
}
