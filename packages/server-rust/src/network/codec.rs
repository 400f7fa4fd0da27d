//! Length-delimited `MsgPack` framing for processor streams and RPC connections.
//!
//! Each frame is a 4-byte big-endian length followed by a `MsgPack` map
//! (`rmp_serde::to_vec_named`). A frame that fails to decode surfaces as an
//! error from the stream, which the reading side treats as fatal.

use std::io;
use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use eventmux_core::{CorrelationEnvelope, ResponseEnvelope, RpcRequest, RpcResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Upper bound on a single frame. Larger frames are a decode error.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Errors raised while framing or (de)serializing a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes `E` frames and decodes `D` frames over a length-delimited byte stream.
#[derive(Debug)]
pub struct FrameCodec<E, D> {
    inner: LengthDelimitedCodec,
    _marker: PhantomData<fn(E) -> D>,
}

impl<E, D> FrameCodec<E, D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<E, D> Default for FrameCodec<E, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Serialize, D> Encoder<E> for FrameCodec<E, D> {
    type Error = CodecError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = rmp_serde::to_vec_named(&item)?;
        self.inner.encode(Bytes::from(bytes), dst)?;
        Ok(())
    }
}

impl<E, D: DeserializeOwned> Decoder for FrameCodec<E, D> {
    type Item = D;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D>, Self::Error> {
        match self.inner.decode(src)? {
            Some(frame) => Ok(Some(rmp_serde::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

/// Gateway side of a processor stream: writes requests, reads responses.
pub type ProcessorCodec<K> = FrameCodec<CorrelationEnvelope<K>, ResponseEnvelope>;

/// Processor side of a processor stream: reads requests, writes responses.
pub type BackendCodec<K> = FrameCodec<ResponseEnvelope, CorrelationEnvelope<K>>;

/// Server side of an RPC connection.
pub type RpcServerCodec = FrameCodec<RpcResponse, RpcRequest>;

/// Client side of an RPC connection.
pub type RpcClientCodec = FrameCodec<RpcRequest, RpcResponse>;
