//! Binary RPC front end.
//!
//! Clients send length-delimited `MsgPack` [`RpcRequest`] frames and receive
//! [`RpcResponse`] frames matched by `call_id`. Calls on one connection run
//! concurrently, bounded by `max_concurrent_calls`, and may be answered out
//! of order. Replies are funnelled through the connection's bounded channel
//! into a single writer task.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use eventmux_core::{RpcRequest, RpcResponse, RpcResult, StatusCode};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::{CodecError, RpcServerCodec};
use super::handlers::AppState;

/// Runs one call through the matching router.
pub async fn dispatch(state: &AppState, call: RpcRequest) -> RpcResponse {
    let call_id = call.call_id();
    let Some(_guard) = state.shutdown.try_in_flight_guard() else {
        return RpcResponse {
            call_id,
            result: RpcResult::Error {
                code: StatusCode::Unavailable,
                message: "gateway is not accepting requests".to_string(),
            },
        };
    };

    let ctx = state.call_context();
    let family = call.family();
    let routed = match call {
        RpcRequest::Event { request, .. } => state.gateway.events.route(&ctx, request).await,
        RpcRequest::Action { request, .. } => state.gateway.actions.route(&ctx, request).await,
    };

    let result = match routed {
        Ok(resp) => resp.into(),
        Err(err) => {
            debug!(call_id, %family, error = %err, "rpc call failed");
            RpcResult::Error {
                code: err.status_code(),
                message: err.to_string(),
            }
        }
    };
    RpcResponse { call_id, result }
}

/// Serves one RPC connection until the client disconnects, sends an
/// undecodable frame, or the gateway closes the connection.
pub async fn handle_connection<S>(io: S, peer: SocketAddr, state: AppState)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (handle, replies) = state.registry.register(peer, &state.config.connection);
    debug!(conn = handle.id.0, %peer, "rpc connection opened");

    let (sink, frames) = Framed::new(io, RpcServerCodec::new()).split::<RpcResponse>();
    let writer = tokio::spawn(write_replies(sink, replies, peer));
    let mut frames = pin!(frames);
    let limit = Arc::new(Semaphore::new(state.config.connection.max_concurrent_calls.max(1)));

    loop {
        let frame = tokio::select! {
            biased;
            () = handle.closed.cancelled() => break,
            frame = frames.next() => frame,
        };
        let call = match frame {
            Some(Ok(call)) => call,
            Some(Err(e)) => {
                warn!(conn = handle.id.0, %peer, error = %e, "undecodable rpc frame, closing connection");
                break;
            }
            None => break,
        };
        handle.record_call();

        // Waiting here stops reading until a running call finishes.
        let Ok(permit) = Arc::clone(&limit).acquire_owned().await else {
            break;
        };
        let state = state.clone();
        let handle = Arc::clone(&handle);
        tokio::spawn(async move {
            let reply = dispatch(&state, call).await;
            let call_id = reply.call_id;
            if let Err(e) = handle
                .send_timeout(reply, state.config.connection.send_timeout)
                .await
            {
                warn!(conn = handle.id.0, call_id, error = %e, "dropping rpc reply");
            }
            drop(permit);
        });
    }

    state.registry.remove(handle.id);
    let calls = handle.call_count();
    let open_for = handle.age();
    // Running calls hold their own handle; the writer stops after the last reply.
    drop(handle);
    let _ = writer.await;
    debug!(%peer, calls, ?open_for, "rpc connection closed");
}

async fn write_replies<W>(sink: W, mut replies: mpsc::Receiver<RpcResponse>, peer: SocketAddr)
where
    W: Sink<RpcResponse, Error = CodecError>,
{
    let mut sink = pin!(sink);
    while let Some(reply) = replies.recv().await {
        if let Err(e) = sink.send(reply).await {
            warn!(%peer, error = %e, "failed to write rpc reply");
            break;
        }
    }
    let _ = sink.close().await;
}

/// Accepts RPC connections until `shutdown` completes, then closes every
/// open connection.
///
/// # Errors
///
/// Currently infallible; accept errors are logged and retried.
pub async fn serve_rpc(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send,
) -> anyhow::Result<()> {
    let mut shutdown = pin!(shutdown);
    info!(addr = ?listener.local_addr().ok(), "serving rpc connections");

    loop {
        let accepted = tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                let _ = stream.set_nodelay(true);
                tokio::spawn(handle_connection(stream, peer, state.clone()));
            }
            Err(e) => {
                warn!(error = %e, "failed to accept rpc connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    let closed = state.registry.close_all();
    info!(closed, "rpc listener stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use eventmux_core::{ActionType, EventType, Request};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::network::codec::RpcClientCodec;
    use crate::network::echo::EchoMode;
    use crate::network::handlers::test_support::{echo_router, empty_gateway, state_for};
    use crate::service::Gateway;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn echo_state() -> AppState {
        let state = state_for(Gateway::new(
            echo_router(EventType::Hello, EchoMode::Content),
            echo_router(ActionType::Hello, EchoMode::Consume),
        ));
        state.shutdown.set_ready();
        state
    }

    fn connect(state: &AppState) -> (Framed<DuplexStream, RpcClientCodec>, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(handle_connection(server, peer(), state.clone()));
        (Framed::new(client, RpcClientCodec::new()), task)
    }

    #[tokio::test]
    async fn dispatch_maps_families_and_errors() {
        let state = echo_state();

        let reply = dispatch(
            &state,
            RpcRequest::Event {
                call_id: 1,
                request: Some(Request::new(EventType::Hello, b"hi".to_vec())),
            },
        )
        .await;
        assert_eq!(reply.result, RpcResult::Content(b"hi".to_vec()));

        let reply = dispatch(
            &state,
            RpcRequest::Action {
                call_id: 2,
                request: Some(Request::new(ActionType::Hello, b"x".to_vec())),
            },
        )
        .await;
        assert_eq!(reply.result, RpcResult::Consumed);

        let reply = dispatch(&state, RpcRequest::Event { call_id: 3, request: None }).await;
        assert!(matches!(
            reply.result,
            RpcResult::Error { code: StatusCode::InvalidArgument, .. }
        ));

        let reply = dispatch(
            &state,
            RpcRequest::Event {
                call_id: 4,
                request: Some(Request::new(EventType::Unknown, Vec::new())),
            },
        )
        .await;
        assert!(matches!(
            reply.result,
            RpcResult::Error { code: StatusCode::NotFound, .. }
        ));
    }

    #[tokio::test]
    async fn dispatch_rejects_when_draining() {
        let state = state_for(empty_gateway());
        state.shutdown.set_ready();
        state.shutdown.trigger_shutdown();

        let reply = dispatch(&state, RpcRequest::Event { call_id: 9, request: None }).await;
        assert_eq!(reply.call_id, 9);
        assert!(matches!(
            reply.result,
            RpcResult::Error { code: StatusCode::Unavailable, .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_calls_on_one_connection() {
        let state = echo_state();
        let (mut client, task) = connect(&state);

        for call_id in 0..20u64 {
            client
                .send(RpcRequest::Event {
                    call_id,
                    request: Some(Request::new(EventType::Hello, call_id.to_string().into_bytes())),
                })
                .await
                .unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let reply = client.next().await.unwrap().unwrap();
            assert_eq!(
                reply.result,
                RpcResult::Content(reply.call_id.to_string().into_bytes())
            );
            assert!(seen.insert(reply.call_id));
        }
        assert_eq!(state.registry.count(), 1);

        drop(client);
        task.await.unwrap();
        assert_eq!(state.registry.count(), 0);
    }

    #[tokio::test]
    async fn garbage_frame_closes_connection() {
        let state = echo_state();
        let (client, server) = tokio::io::duplex(1024);
        let task = tokio::spawn(handle_connection(server, peer(), state.clone()));

        let mut raw = client;
        raw.write_all(&[0, 0, 0, 2, 0xc1, 0xc1]).await.unwrap();
        task.await.unwrap();
        assert_eq!(state.registry.count(), 0);
    }

    #[tokio::test]
    async fn close_all_ends_connections() {
        let state = echo_state();
        let (_client, task) = connect(&state);
        while state.registry.count() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(state.registry.close_all(), 1);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection should close")
            .unwrap();
    }
}
