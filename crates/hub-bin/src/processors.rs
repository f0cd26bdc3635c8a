//! Built-in channel processors.
//!
//! Push channels treat every frame as an identity event: the member is logged
//! and an `{"cmd":"ack","member_id":…}` command is broadcast back to the
//! channel's devices. Other channels only log what they receive.

use anyhow::Context;
use hub_config_and_utils::ChannelConfig;
use hub_protocol::{CAMERA_ID_FIELD, MEMBER_ID_FIELD};
use hub_server::{Channel, Message, Router};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Register the built-in processor for every configured channel.
pub async fn register_builtin(router: &Arc<Router>, channels: &[ChannelConfig]) {
    for config in channels {
        let channel = Channel::new(config.name.as_str());
        if config.push {
            let weak = Arc::downgrade(router);
            let target = channel.clone();
            router
                .register_processor(channel, move |message| {
                    let weak = weak.clone();
                    let target = target.clone();
                    async move { acknowledge(&weak, &target, message) }
                })
                .await;
        } else {
            let target = channel.clone();
            router
                .register_processor(channel, move |message| {
                    let target = target.clone();
                    async move { log_event(&target, &message) }
                })
                .await;
        }
    }
}

/// Acknowledgement command for a recognised member.
pub fn ack_message(member_id: &str) -> Message {
    Message::new()
        .with("cmd", "ack")
        .with(MEMBER_ID_FIELD, member_id)
}

fn acknowledge(router: &Weak<Router>, channel: &Channel, message: Message) -> anyhow::Result<()> {
    let member_id = message
        .member_id()
        .context("identity event without member_id")?;
    info!(
        channel = %channel,
        camera_id = ?message.camera_id(),
        member_id,
        "Member recognised"
    );

    let router = router.upgrade().context("router is shutting down")?;
    let delivered = router.broadcast(channel, &ack_message(member_id));
    debug!(channel = %channel, member_id, delivered, "Acknowledgement broadcast");
    Ok(())
}

fn log_event(channel: &Channel, message: &Message) -> anyhow::Result<()> {
    info!(
        channel = %channel,
        camera_id = ?message.get(CAMERA_ID_FIELD),
        member_id = ?message.member_id(),
        event = %message,
        "Device event"
    );
    Ok(())
}
