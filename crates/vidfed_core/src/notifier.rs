/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::store::{Comment, Privacy, Video};
use crate::ui_events::UiEvent;

/// Something that wants to hear about newly ingested objects.
///
/// Only called for rows the current delivery created.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_on_new_video_if_needed(&self, video: &Video) -> Result<()>;
    async fn notify_on_new_comment(&self, comment: &Comment) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub async fn notify_on_new_video_if_needed(&self, video: &Video) {
        for sink in &self.sinks {
            if let Err(e) = sink.notify_on_new_video_if_needed(video).await {
                warn!(video = %video.url, "video notification failed: {e:#}");
            }
        }
    }

    pub async fn notify_on_new_comment(&self, comment: &Comment) {
        for sink in &self.sinks {
            if let Err(e) = sink.notify_on_new_comment(comment).await {
                warn!(comment = %comment.url, "comment notification failed: {e:#}");
            }
        }
    }
}

/// Publishes UI events. Non-public videos stay quiet.
#[derive(Clone)]
pub struct UiEventSink {
    tx: broadcast::Sender<UiEvent>,
}

impl UiEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for UiEventSink {
    async fn notify_on_new_video_if_needed(&self, video: &Video) -> Result<()> {
        if video.privacy != Privacy::Public {
            return Ok(());
        }
        // No subscribers is fine.
        let _ = self.tx.send(UiEvent::video(video));
        Ok(())
    }

    async fn notify_on_new_comment(&self, comment: &Comment) -> Result<()> {
        let _ = self.tx.send(UiEvent::comment(comment));
        Ok(())
    }
}

pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify_on_new_video_if_needed(&self, video: &Video) -> Result<()> {
        info!(video = %video.url, owned = video.is_owned, "new video");
        Ok(())
    }

    async fn notify_on_new_comment(&self, comment: &Comment) -> Result<()> {
        info!(comment = %comment.url, video_id = comment.video_id, "new comment");
        Ok(())
    }
}
