//! Request dispatch queue.
//!
//! Any number of producers enqueue [`OutboundRequest`]s without blocking; a
//! single dispatcher task owns every write to the connection, so frames are
//! never interleaved and requests leave in submission order.
//!
//! Session replays after a reconnect travel on a separate priority channel
//! and are always written before ordinary requests that were queued while
//! the connection was down.

use crate::connection::ConnectionState;
use crate::error::ClientError;
use bytes::BytesMut;
use colink_protocol::{fragments, CommandTag, FrameCodec, PayloadType, ProtocolError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use zeroize::Zeroize;

/// A request waiting to be written.
#[derive(Debug)]
pub struct OutboundRequest {
    command_tag: u32,
    payload_type: PayloadType,
    fragment: bool,
    payload: Vec<u8>,
    sensitive: bool,
}

impl OutboundRequest {
    pub fn new(command_tag: u32, payload_type: PayloadType, payload: Vec<u8>) -> Self {
        Self {
            command_tag,
            payload_type,
            fragment: false,
            payload,
            sensitive: false,
        }
    }

    /// Builds a JSON request for a known command.
    pub fn json<T: Serialize>(tag: CommandTag, body: &T) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_vec(body)?;
        Ok(Self::new(tag.code(), PayloadType::Json, payload))
    }

    /// Sets the fragment flag on every frame written for this request.
    pub fn with_fragment(mut self, fragment: bool) -> Self {
        self.fragment = fragment;
        self
    }

    /// Marks the payload as secret; it is zeroized once written or dropped.
    pub(crate) fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn command_tag(&self) -> u32 {
        self.command_tag
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }
}

impl Drop for OutboundRequest {
    fn drop(&mut self) {
        if self.sensitive {
            self.payload.zeroize();
        }
    }
}

/// A session replay bound to the connection epoch it was created for.
#[derive(Debug)]
pub(crate) struct Replay {
    pub epoch: u64,
    pub request: OutboundRequest,
}

type Receivers = (
    mpsc::UnboundedReceiver<OutboundRequest>,
    mpsc::UnboundedReceiver<Replay>,
);

/// Producer side of the queue.
pub struct DispatchQueue {
    normal: mpsc::UnboundedSender<OutboundRequest>,
    priority: mpsc::UnboundedSender<Replay>,
    receivers: parking_lot::Mutex<Option<Receivers>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (normal, normal_rx) = mpsc::unbounded_channel();
        let (priority, priority_rx) = mpsc::unbounded_channel();
        Self {
            normal,
            priority,
            receivers: parking_lot::Mutex::new(Some((normal_rx, priority_rx))),
        }
    }

    /// Enqueues a request. Never blocks; fails only once the dispatcher is gone.
    pub fn submit(&self, request: OutboundRequest) -> Result<(), ClientError> {
        self.normal.send(request).map_err(|_| ClientError::Shutdown)
    }

    pub(crate) fn submit_replay(&self, epoch: u64, request: OutboundRequest) {
        if self.priority.send(Replay { epoch, request }).is_err() {
            tracing::debug!("dispatcher gone, dropping session replay");
        }
    }

    /// Spawns the dispatcher task. Only the first call spawns; later calls return `None`.
    pub(crate) fn start<W>(&self, link: Link<W>) -> Option<JoinHandle<()>>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (normal_rx, priority_rx) = self.receivers.lock().take()?;
        let dispatcher = Dispatcher {
            normal_rx,
            priority_rx,
            link,
        };
        Some(tokio::spawn(dispatcher.run()))
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// What the dispatcher needs from the connection.
pub(crate) struct Link<W> {
    pub writer: Arc<Mutex<Option<W>>>,
    pub state: watch::Receiver<ConnectionState>,
    pub epoch: Arc<AtomicU64>,
    pub codec: Arc<dyn FrameCodec>,
    pub max_frame_size: usize,
}

enum Outgoing {
    Request(OutboundRequest),
    Replay(Replay),
}

struct Dispatcher<W> {
    normal_rx: mpsc::UnboundedReceiver<OutboundRequest>,
    priority_rx: mpsc::UnboundedReceiver<Replay>,
    link: Link<W>,
}

impl<W: AsyncWrite + Unpin + Send> Dispatcher<W> {
    async fn run(mut self) {
        tracing::debug!("dispatcher started");

        loop {
            let next = tokio::select! {
                biased;
                Some(replay) = self.priority_rx.recv() => Outgoing::Replay(replay),
                Some(request) = self.normal_rx.recv() => Outgoing::Request(request),
                else => break,
            };

            // Writes stall while the connection is down.
            if !self.wait_connected().await {
                break;
            }

            match next {
                Outgoing::Replay(replay) => {
                    self.write_replay(replay).await;
                    self.drain_replays().await;
                }
                Outgoing::Request(request) => {
                    self.drain_replays().await;
                    self.write(&request).await;
                }
            }
        }

        tracing::debug!("dispatcher stopped");
    }

    /// Returns false once the connection state owner is gone.
    async fn wait_connected(&mut self) -> bool {
        self.link
            .state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .is_ok()
    }

    async fn drain_replays(&mut self) {
        while let Ok(replay) = self.priority_rx.try_recv() {
            self.write_replay(replay).await;
        }
    }

    async fn write_replay(&mut self, replay: Replay) {
        let current = self.link.epoch.load(Ordering::SeqCst);
        if replay.epoch != current {
            tracing::debug!(
                "dropping session replay for stale connection (epoch {} != {})",
                replay.epoch,
                current
            );
            return;
        }
        tracing::debug!("replaying session login");
        self.write(&replay.request).await;
    }

    async fn write(&mut self, request: &OutboundRequest) {
        let mut frames = match self.encode(request) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(
                    "dropping request tag={}: encode failed: {}",
                    request.command_tag,
                    e
                );
                return;
            }
        };

        // A peer that stops reading must not keep the writer locked once the
        // connection is being torn down.
        let result = tokio::select! {
            result = write_frames(&self.link.writer, &frames) => result,
            _ = self.link.state.wait_for(|s| *s != ConnectionState::Connected) => {
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "connection closed during write",
                ))
            }
        };

        if request.sensitive {
            frames[..].zeroize();
        }

        match result {
            Ok(()) => tracing::trace!(
                "wrote request tag={} ({} bytes)",
                request.command_tag,
                frames.len()
            ),
            Err(e) => tracing::warn!(
                "dropping request tag={}: write failed: {}",
                request.command_tag,
                e
            ),
        }
    }

    /// Encodes a request into one or more back-to-back frames.
    fn encode(&self, request: &OutboundRequest) -> Result<BytesMut, ProtocolError> {
        let max = self.link.max_frame_size;
        let mut out = BytesMut::with_capacity(request.payload.len() + 16);

        for (chunk, more) in fragments(&request.payload, max) {
            let mut frame = self.link.codec.encode(
                chunk,
                request.fragment || more,
                request.payload_type,
                request.command_tag,
                max,
            )?;
            out.extend_from_slice(&frame);
            if request.sensitive {
                frame[..].zeroize();
            }
        }

        Ok(out)
    }
}

async fn write_frames<W>(writer: &Mutex<Option<W>>, frames: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut guard = writer.lock().await;
    match guard.as_mut() {
        Some(writer) => {
            writer.write_all(frames).await?;
            writer.flush().await
        }
        None => Err(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "no active connection",
        )),
    }
}
