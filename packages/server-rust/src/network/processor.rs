//! Dialing backend processors.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use eventmux_core::{CorrelationEnvelope, RequestKind};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::info;

use super::codec::ProcessorCodec;
use crate::service::{FamilyConfig, Multiplexer, MultiplexerConfig, ProcessorId, RouteTable, Router};

/// Wraps an established byte stream to a processor in a multiplexer.
///
/// Must be called inside a tokio runtime.
pub fn attach_processor<K, S>(
    processor: ProcessorId,
    io: S,
    config: &MultiplexerConfig,
) -> Multiplexer<K>
where
    K: RequestKind,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (sink, stream) = Framed::new(io, ProcessorCodec::<K>::new()).split::<CorrelationEnvelope<K>>();
    Multiplexer::spawn(processor, sink, stream, config)
}

/// Dials `processor` over TCP and returns an open multiplexer for it.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect_processor<K: RequestKind>(
    processor: ProcessorId,
    config: &MultiplexerConfig,
) -> anyhow::Result<Multiplexer<K>> {
    let stream = TcpStream::connect(processor.as_str())
        .await
        .with_context(|| format!("failed to connect to {} processor {processor}", K::FAMILY))?;
    stream.set_nodelay(true)?;
    info!(family = %K::FAMILY, %processor, "connected to processor");
    Ok(attach_processor(processor, stream, config))
}

/// Dials every processor referenced by `config` and builds the family's router.
///
/// # Errors
///
/// Returns an error if any processor cannot be reached.
pub async fn build_router<K: RequestKind>(config: &FamilyConfig<K>) -> anyhow::Result<Router<K>> {
    let mut processors = HashMap::new();
    for id in config.processor_ids() {
        let mux = connect_processor::<K>(id.clone(), &config.multiplexer).await?;
        processors.insert(id, Arc::new(mux));
    }
    Ok(Router::new(RouteTable::new(config.routes.clone()), processors))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use eventmux_core::{ActionType, EventType, Request, Response};

    use super::*;
    use crate::network::echo::EchoProcessor;
    use crate::service::{CallContext, MuxError, Outcome};

    #[tokio::test]
    async fn connects_to_echo_processor() {
        let echo = EchoProcessor::bind("127.0.0.1:0").await.unwrap();
        let addr = echo.local_addr().unwrap();
        let server = tokio::spawn(echo.run());

        let mux = connect_processor::<ActionType>(
            ProcessorId::from(addr.to_string()),
            &MultiplexerConfig::for_kind::<ActionType>(),
        )
        .await
        .unwrap();

        let outcome = mux
            .submit(
                &CallContext::background(),
                Request::new(ActionType::Hello, b"ping".to_vec()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Content(b"ping".to_vec()));

        mux.close().await;
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_processor_is_an_error() {
        // Bind then drop to obtain a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect_processor::<ActionType>(
            ProcessorId::from(addr.to_string()),
            &MultiplexerConfig::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn build_router_routes_hello() {
        let echo = EchoProcessor::bind("127.0.0.1:0").await.unwrap();
        let addr = echo.local_addr().unwrap();
        let server = tokio::spawn(echo.run());

        let config = FamilyConfig::<ActionType>::default().route(ActionType::Hello, addr.to_string());
        let router = build_router(&config).await.unwrap();

        let resp = router
            .route(
                &CallContext::background(),
                Some(Request::new(ActionType::Hello, b"hi".to_vec())),
            )
            .await
            .unwrap();
        assert_eq!(resp, Response::Content(b"hi".to_vec()));

        router.shutdown().await;
        server.abort();
    }

    #[tokio::test]
    async fn close_releases_a_stalled_stream() {
        // The processor end is never read, so the 4 KiB frame stalls in the writer.
        let (gateway, _processor) = tokio::io::duplex(64);
        let mux = Arc::new(attach_processor::<EventType, _>(
            ProcessorId::from("stalled"),
            gateway,
            &MultiplexerConfig::for_kind::<EventType>(),
        ));

        let caller = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move {
                mux.submit(
                    &CallContext::background(),
                    Request::new(EventType::Hello, vec![0u8; 4096]),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(3), mux.close())
            .await
            .expect("close must not wait on a stalled write");
        assert_eq!(caller.await.unwrap(), Err(MuxError::Closed));
    }
}
