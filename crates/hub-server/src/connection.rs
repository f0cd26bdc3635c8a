//! Per-connection handler.
//!
//! Each accepted socket is owned by exactly one `ConnectionHandler` task. The
//! task is the only writer of the socket: other tasks reach it through a
//! cloneable `ConnectionHandle`, which queues outbound messages on the
//! handler's command channel and requests shutdown through a watch flag.
//!
//! ## Lifecycle
//!
//! `Created → Running → Stopping → Stopped`. Device close, transport errors and
//! `stop()` all leave the same select loop, so the socket is released exactly
//! once whichever happens first.

use crate::{HubResult, Router};
use hub_protocol::{encode, Channel, FrameDecoder, Message};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

const READ_BUF_SIZE: usize = 4096;

/// Outbound messages a connection may have waiting before sends are refused.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Unique id of an accepted connection.
pub type ConnectionId = Uuid;

/// Handler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Cloneable reference to a running connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    channel: Channel,
    peer: SocketAddr,
    outbound: mpsc::Sender<Message>,
    stop_tx: Arc<watch::Sender<bool>>,
    state_rx: watch::Receiver<HandlerState>,
    decode_failures: Arc<AtomicU64>,
}

/// Handler-side ends of the channels behind a `ConnectionHandle`.
#[derive(Debug)]
pub(crate) struct Endpoints {
    pub(crate) outbound_rx: mpsc::Receiver<Message>,
    pub(crate) stop_rx: watch::Receiver<bool>,
    pub(crate) state_tx: watch::Sender<HandlerState>,
}

impl ConnectionHandle {
    pub(crate) fn new(channel: Channel, peer: SocketAddr) -> (Self, Endpoints) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(HandlerState::Created);

        let handle = Self {
            id: Uuid::new_v4(),
            channel,
            peer,
            outbound,
            stop_tx: Arc::new(stop_tx),
            state_rx,
            decode_failures: Arc::new(AtomicU64::new(0)),
        };
        let endpoints = Endpoints {
            outbound_rx,
            stop_rx,
            state_tx,
        };
        (handle, endpoints)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> HandlerState {
        *self.state_rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == HandlerState::Running
    }

    /// Frames from this device that could not be decoded so far.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Queue a message for the handler task to write.
    ///
    /// Returns `false` (and drops the message) when the handler is not
    /// running, its outbound queue is full, or it has already gone away.
    pub fn send(&self, message: Message) -> bool {
        let state = self.state();
        if state != HandlerState::Running {
            warn!(
                channel = %self.channel,
                connection_id = %self.id,
                state = ?state,
                "Send on a connection that is not running, dropping message"
            );
            return false;
        }

        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    channel = %self.channel,
                    connection_id = %self.id,
                    capacity = OUTBOUND_QUEUE_CAPACITY,
                    "Device is not keeping up, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    channel = %self.channel,
                    connection_id = %self.id,
                    "Connection handler already gone, dropping message"
                );
                false
            }
        }
    }

    /// Request shutdown and wait until the handler reaches `Stopped`.
    ///
    /// Safe to call repeatedly and from any task.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        self.stopped().await;
    }

    /// Wait until the handler reaches `Stopped` without requesting it.
    pub async fn stopped(&self) {
        let mut state_rx = self.state_rx.clone();
        let _ = state_rx
            .wait_for(|state| *state == HandlerState::Stopped)
            .await;
    }
}

/// Owns one accepted device socket.
pub struct ConnectionHandler {
    handle: ConnectionHandle,
    stream: TcpStream,
    router: Arc<Router>,
    endpoints: Endpoints,
}

impl ConnectionHandler {
    /// Create a handler in the `Created` state together with its handle.
    pub fn new(
        channel: Channel,
        stream: TcpStream,
        peer: SocketAddr,
        router: Arc<Router>,
    ) -> (Self, ConnectionHandle) {
        let (handle, endpoints) = ConnectionHandle::new(channel, peer);
        let handler = Self {
            handle: handle.clone(),
            stream,
            router,
            endpoints,
        };
        (handler, handle)
    }

    /// Serve the connection until the device disconnects, a transport error
    /// occurs, or a stop is requested.
    pub async fn run(self) {
        let Self {
            handle,
            stream,
            router,
            endpoints,
        } = self;
        let Endpoints {
            outbound_rx,
            stop_rx,
            state_tx,
        } = endpoints;

        state_tx.send_replace(HandlerState::Running);
        info!(
            channel = %handle.channel,
            connection_id = %handle.id,
            peer = %handle.peer,
            "Connection handler running"
        );

        let (reader, writer) = stream.into_split();
        let mut session = Session {
            handle,
            router,
            decoder: FrameDecoder::new(),
            reader,
            writer,
            outbound_rx,
            stop_rx,
        };

        let result = session.serve().await;
        state_tx.send_replace(HandlerState::Stopping);

        match result {
            Ok(reason) => debug!(
                channel = %session.handle.channel,
                connection_id = %session.handle.id,
                reason,
                "Connection closing"
            ),
            Err(e) => warn!(
                channel = %session.handle.channel,
                connection_id = %session.handle.id,
                error = %e,
                "Connection closing after transport error"
            ),
        }

        let handle = session.close().await;
        state_tx.send_replace(HandlerState::Stopped);
        info!(
            channel = %handle.channel,
            connection_id = %handle.id,
            peer = %handle.peer,
            "Connection handler stopped"
        );
    }
}

/// Resolves once the watch flag is raised (or its sender is gone).
pub(crate) async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

async fn write_frame(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// The running half of a handler: socket, decoder and command channel.
struct Session {
    handle: ConnectionHandle,
    router: Arc<Router>,
    decoder: FrameDecoder,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    outbound_rx: mpsc::Receiver<Message>,
    stop_rx: watch::Receiver<bool>,
}

impl Session {
    async fn serve(&mut self) -> HubResult<&'static str> {
        let mut read_buf = [0u8; READ_BUF_SIZE];

        loop {
            tokio::select! {
                biased;

                _ = stop_requested(&mut self.stop_rx) => {
                    return Ok("stop requested");
                }

                Some(message) = self.outbound_rx.recv() => {
                    if !self.write_message(&message).await? {
                        return Ok("stop requested during write");
                    }
                }

                read = self.reader.read(&mut read_buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok("device closed connection");
                    }
                    if !self.on_data(&read_buf[..n]).await {
                        return Ok("stop requested during dispatch");
                    }
                }
            }
        }
    }

    /// Decode and dispatch one read. Returns `false` if a stop interrupted
    /// a processor.
    async fn on_data(&mut self, bytes: &[u8]) -> bool {
        for frame in self.decoder.feed(bytes) {
            match frame {
                Ok(message) => {
                    // Failures are logged by the router; the connection keeps serving.
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut self.stop_rx) => return false,
                        _ = self.router.dispatch(&self.handle.channel, message) => {}
                    }
                }
                Err(e) => {
                    self.handle.decode_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        channel = %self.handle.channel,
                        connection_id = %self.handle.id,
                        error = %e,
                        "Dropping undecodable frame"
                    );
                }
            }
        }
        true
    }

    /// Write one message. Returns `false` if a stop arrived before the
    /// device accepted all of it.
    async fn write_message(&mut self, message: &Message) -> HubResult<bool> {
        let bytes = encode(message);
        tokio::select! {
            biased;
            _ = stop_requested(&mut self.stop_rx) => return Ok(false),
            written = write_frame(&mut self.writer, &bytes) => written?,
        }
        debug!(
            channel = %self.handle.channel,
            connection_id = %self.handle.id,
            bytes = bytes.len(),
            "Wrote message to device"
        );
        Ok(true)
    }

    async fn close(mut self) -> ConnectionHandle {
        self.outbound_rx.close();
        if self.decoder.pending_len() > 0 {
            debug!(
                connection_id = %self.handle.id,
                pending = self.decoder.pending_len(),
                "Discarding incomplete frame on close"
            );
        }
        let _ = self.writer.shutdown().await;
        self.handle
    }
}
