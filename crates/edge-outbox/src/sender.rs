//! Resilient TCP sender for identity events.

use crate::{DeliveryQueue, Dequeued, OutboxError, OutboxResult};
use hub_protocol::{encode, FrameDecoder, Message};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const READ_BUF_SIZE: usize = 4096;

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Hub address, `host:port`.
    pub server_addr: String,
    /// Value written as `camera_id` on every event.
    pub camera_id: String,
    /// Bounded wait on an empty queue.
    pub poll_interval: Duration,
    /// Pause between send attempts for one identity.
    pub retry_delay: Duration,
    /// Send attempts per identity before the connection is declared broken.
    pub max_send_attempts: u32,
    pub connect_timeout: Duration,
    /// First reconnect delay; doubles per failed attempt.
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:5001".to_string(),
            camera_id: "Face".to_string(),
            poll_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
            max_send_attempts: 3,
            connect_timeout: Duration::from_secs(5),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: None,
        }
    }
}

impl SenderConfig {
    /// Backoff before reconnect attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }
}

/// Lifecycle events published by the sender.
#[derive(Debug, Clone, PartialEq)]
pub enum SenderEvent {
    Connected { addr: SocketAddr },
    Delivered { identity: String },
    DeliveryExhausted { identity: String, attempts: u32 },
    Disconnected { reason: String },
    /// A command pushed by the hub.
    Received(Message),
    GaveUp { attempts: u32 },
}

enum Delivery {
    Sent,
    Exhausted,
    Stopped,
}

/// Drains a `DeliveryQueue` into the hub.
///
/// Delivery is at-least-once and in queue order: an identity whose send
/// attempts are exhausted stays in hand and is sent first on the next
/// connection.
pub struct ResilientSender {
    config: SenderConfig,
    events: broadcast::Sender<SenderEvent>,
    stop_tx: watch::Sender<bool>,
}

impl ResilientSender {
    pub fn new(config: SenderConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            events,
            stop_tx,
        }
    }

    /// Subscribe to sender events.
    pub fn subscribe(&self) -> broadcast::Receiver<SenderEvent> {
        self.events.subscribe()
    }

    /// Ask `run` to return. Idempotent.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            info!("Sender stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Run until stopped, the queue closes and drains, or reconnection gives up.
    pub async fn run(&self, mut queue: DeliveryQueue) -> OutboxResult<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut session: Option<OutboundSession> = None;
        let mut in_hand: Option<String> = None;

        info!(
            server = %self.config.server_addr,
            camera_id = %self.config.camera_id,
            "Sender started"
        );

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let active = match session.as_mut() {
                Some(active) => active,
                None => match self.connect_with_backoff(&mut stop_rx).await? {
                    Some(connected) => session.insert(connected),
                    None => break,
                },
            };

            let identity = match in_hand.take() {
                Some(identity) => identity,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = stop_requested(&mut stop_rx) => break,
                        next = queue.dequeue(self.config.poll_interval) => next,
                    };
                    match next {
                        Dequeued::Item(identity) => identity,
                        Dequeued::Timeout => {
                            if let Err(e) = active.drain_inbound(&self.events) {
                                self.disconnect(&mut session, &e.to_string());
                            }
                            continue;
                        }
                        Dequeued::Closed => {
                            info!("Delivery queue closed and drained");
                            break;
                        }
                    }
                }
            };

            match self.deliver(active, &identity, &mut stop_rx).await {
                Delivery::Sent => {
                    self.publish(SenderEvent::Delivered { identity });
                }
                Delivery::Exhausted => {
                    let attempts = self.config.max_send_attempts.max(1);
                    let err = OutboxError::DeliveryExhausted {
                        identity: identity.clone(),
                        attempts,
                    };
                    error!(error = %err, "Connection considered broken");
                    self.publish(SenderEvent::DeliveryExhausted {
                        identity: identity.clone(),
                        attempts,
                    });
                    self.disconnect(&mut session, &err.to_string());
                    in_hand = Some(identity);
                }
                Delivery::Stopped => {
                    in_hand = Some(identity);
                    break;
                }
            }
        }

        if let Some(identity) = in_hand {
            warn!(identity = %identity, "Sender stopped with an undelivered identity");
        }
        if !queue.is_empty() {
            warn!(pending = queue.len(), "Sender stopped with identities still queued");
        }
        info!("Sender stopped");
        Ok(())
    }

    /// Send one identity, retrying on the same connection.
    async fn deliver(
        &self,
        session: &mut OutboundSession,
        identity: &str,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Delivery {
        let frame = encode(&Message::identity(self.config.camera_id.as_str(), identity));
        let max_attempts = self.config.max_send_attempts.max(1);

        for attempt in 1..=max_attempts {
            let sent = tokio::select! {
                biased;
                _ = stop_requested(stop_rx) => return Delivery::Stopped,
                sent = session.send(&frame, &self.events) => sent,
            };
            match sent {
                Ok(()) => {
                    info!(identity = %identity, attempt, "Identity delivered");
                    return Delivery::Sent;
                }
                Err(e) => {
                    warn!(
                        identity = %identity,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Send failed"
                    );
                    if attempt < max_attempts && pause(self.config.retry_delay, stop_rx).await {
                        return Delivery::Stopped;
                    }
                }
            }
        }
        Delivery::Exhausted
    }

    /// Connect, backing off exponentially between failures.
    ///
    /// `Ok(None)` means a stop arrived while waiting.
    async fn connect_with_backoff(
        &self,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> OutboxResult<Option<OutboundSession>> {
        let mut attempt: u32 = 0;

        loop {
            match OutboundSession::connect(&self.config.server_addr, self.config.connect_timeout).await {
                Ok(session) => {
                    info!(server = %session.peer, attempt = attempt + 1, "Connected to hub");
                    self.publish(SenderEvent::Connected { addr: session.peer });
                    return Ok(Some(session));
                }
                Err(e) => {
                    attempt += 1;
                    if let Some(max) = self.config.max_reconnect_attempts {
                        if attempt >= max {
                            error!(
                                server = %self.config.server_addr,
                                attempts = attempt,
                                error = %e,
                                "Giving up on hub connection"
                            );
                            self.publish(SenderEvent::GaveUp { attempts: attempt });
                            return Err(OutboxError::ReconnectExhausted { attempts: attempt });
                        }
                    }

                    let delay = self.config.reconnect_delay(attempt);
                    warn!(
                        server = %self.config.server_addr,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connect failed, retrying"
                    );
                    if pause(delay, stop_rx).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn disconnect(&self, session: &mut Option<OutboundSession>, reason: &str) {
        if let Some(dropped) = session.take() {
            warn!(server = %dropped.peer, reason, "Disconnected from hub");
            self.publish(SenderEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    fn publish(&self, event: SenderEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

/// Sleep for `delay`; returns `true` if a stop arrived first.
async fn pause(delay: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = stop_requested(stop_rx) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// One TCP connection to the hub.
struct OutboundSession {
    stream: TcpStream,
    peer: SocketAddr,
    decoder: FrameDecoder,
}

impl OutboundSession {
    async fn connect(addr: &str, connect_timeout: Duration) -> OutboxResult<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            decoder: FrameDecoder::new(),
        })
    }

    /// Read whatever the hub pushed without waiting. EOF is an error.
    fn drain_inbound(&mut self, events: &broadcast::Sender<SenderEvent>) -> OutboxResult<()> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "hub closed the connection",
                    )
                    .into())
                }
                Ok(n) => {
                    for frame in self.decoder.feed(&buf[..n]) {
                        match frame {
                            Ok(message) => {
                                debug!(message = %message, "Received command from hub");
                                let _ = events.send(SenderEvent::Received(message));
                            }
                            Err(e) => warn!(error = %e, "Dropping undecodable frame from hub"),
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn send(&mut self, frame: &[u8], events: &broadcast::Sender<SenderEvent>) -> OutboxResult<()> {
        self.drain_inbound(events)?;
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery_queue;

    fn fast_config(server_addr: String) -> SenderConfig {
        SenderConfig {
            server_addr,
            poll_interval: Duration::from_millis(20),
            retry_delay: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(500),
            reconnect_base_delay: Duration::from_millis(10),
            reconnect_max_delay: Duration::from_millis(40),
            ..SenderConfig::default()
        }
    }

    fn unused_addr() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[test]
    fn test_reconnect_delay_doubles_and_caps() {
        let config = SenderConfig {
            reconnect_base_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_millis(1000),
            ..SenderConfig::default()
        };
        assert_eq!(config.reconnect_delay(1), Duration::from_millis(100));
        assert_eq!(config.reconnect_delay(2), Duration::from_millis(200));
        assert_eq!(config.reconnect_delay(4), Duration::from_millis(800));
        assert_eq!(config.reconnect_delay(5), Duration::from_millis(1000));
        assert_eq!(config.reconnect_delay(100), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_gives_up_after_reconnect_budget() {
        let sender = ResilientSender::new(SenderConfig {
            max_reconnect_attempts: Some(3),
            ..fast_config(unused_addr())
        });
        let mut events = sender.subscribe();
        let (_producer, queue) = delivery_queue(None);

        let result = sender.run(queue).await;
        assert!(matches!(result, Err(OutboxError::ReconnectExhausted { attempts: 3 })));
        assert_eq!(events.recv().await.unwrap(), SenderEvent::GaveUp { attempts: 3 });
    }

    #[tokio::test]
    async fn test_stop_interrupts_reconnect_backoff() {
        let sender = std::sync::Arc::new(ResilientSender::new(SenderConfig {
            reconnect_base_delay: Duration::from_secs(30),
            reconnect_max_delay: Duration::from_secs(30),
            ..fast_config(unused_addr())
        }));
        let (_producer, queue) = delivery_queue(None);

        let runner = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.run(queue).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.stop();
        sender.stop();

        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("run should return after stop")
            .unwrap();
        assert!(result.is_ok());
        assert!(sender.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_interrupts_write_to_hub_that_stopped_reading() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let sender = std::sync::Arc::new(ResilientSender::new(fast_config(addr)));
        let mut events = sender.subscribe();
        let (producer, queue) = delivery_queue(None);
        for _ in 0..512 {
            producer.enqueue("x".repeat(64 * 1024)).unwrap();
        }

        let runner = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.run(queue).await })
        };
        // Accept and hold the socket without ever reading from it.
        let (_held, _) = listener.accept().await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), SenderEvent::Connected { .. }));
        tokio::time::sleep(Duration::from_millis(300)).await;

        sender.stop();
        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("run should return while a write is blocked")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stopped_before_run_returns_immediately() {
        let sender = ResilientSender::new(fast_config(unused_addr()));
        sender.stop();
        let (_producer, queue) = delivery_queue(None);
        assert!(sender.run(queue).await.is_ok());
    }
}
