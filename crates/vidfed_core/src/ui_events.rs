/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;

use crate::store::{Comment, Video};

/// Serialized as `{"kind": "new_video", ...}` for UI subscribers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiEvent {
    NewVideo {
        at_ms: u64,
        uuid: String,
        url: String,
        name: String,
        nsfw: bool,
    },
    NewComment {
        at_ms: u64,
        url: String,
        video_id: i64,
        in_reply_to_comment_id: Option<i64>,
    },
}

impl UiEvent {
    pub fn video(video: &Video) -> Self {
        UiEvent::NewVideo {
            at_ms: now_ms(),
            uuid: video.uuid.clone(),
            url: video.url.clone(),
            name: video.name.clone(),
            nsfw: video.nsfw,
        }
    }

    pub fn comment(comment: &Comment) -> Self {
        UiEvent::NewComment {
            at_ms: now_ms(),
            url: comment.url.clone(),
            video_id: comment.video_id,
            in_reply_to_comment_id: comment.in_reply_to_comment_id,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            UiEvent::NewVideo { url, .. } | UiEvent::NewComment { url, .. } => url,
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
