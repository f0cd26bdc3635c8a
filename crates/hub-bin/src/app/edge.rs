//! Edge role: identity source → delivery queue → resilient sender.

use edge_outbox::{
    delivery_queue, run_producer, IdentitySource, ResilientSender, SenderConfig, SenderEvent,
};
use hub_config_and_utils::{Config, EdgeConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines, Stdin};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Run the edge pipeline until Ctrl-C, stdin ends, or the sender gives up.
pub async fn run_edge(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let sender = Arc::new(ResilientSender::new(sender_config(&config.edge)));
    let (producer, queue) = delivery_queue(config.edge.queue_capacity);

    let event_logger = tokio::spawn(log_events(sender.subscribe()));
    let producer_task = tokio::spawn(run_producer(LineIdentitySource::stdin(), producer));
    info!(
        server = %config.edge.server_addr,
        camera_id = %config.edge.camera_id,
        "Edge sender running, one identity per stdin line"
    );

    let run = sender.run(queue);
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            sender.stop();
            run.await
        }
    };

    producer_task.abort();
    event_logger.abort();
    result?;
    Ok(())
}

fn sender_config(edge: &EdgeConfig) -> SenderConfig {
    SenderConfig {
        server_addr: edge.server_addr.clone(),
        camera_id: edge.camera_id.clone(),
        poll_interval: Duration::from_millis(edge.poll_interval_ms),
        retry_delay: Duration::from_millis(edge.retry_delay_ms),
        max_send_attempts: edge.max_send_attempts,
        connect_timeout: Duration::from_millis(edge.connect_timeout_ms),
        reconnect_base_delay: Duration::from_millis(edge.reconnect_base_delay_ms),
        reconnect_max_delay: Duration::from_millis(edge.reconnect_max_delay_ms),
        max_reconnect_attempts: edge.max_reconnect_attempts,
    }
}

async fn log_events(mut events: broadcast::Receiver<SenderEvent>) {
    loop {
        match events.recv().await {
            Ok(SenderEvent::Received(message)) => info!(command = %message, "Command from hub"),
            Ok(SenderEvent::GaveUp { attempts }) => error!(attempts, "Sender gave up on the hub"),
            Ok(event) => debug!(event = ?event, "Sender event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Sender event log fell behind")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// One identity per line of an async reader.
pub struct LineIdentitySource<R> {
    lines: Lines<BufReader<R>>,
}

impl LineIdentitySource<Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin + Send> LineIdentitySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }
}

impl<R: AsyncRead + Unpin + Send> IdentitySource for LineIdentitySource<R> {
    async fn next_identity(&mut self) -> Option<String> {
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read identity line");
                None
            }
        }
    }
}
