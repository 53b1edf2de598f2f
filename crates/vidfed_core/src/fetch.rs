/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::ACCEPT, Response, StatusCode};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::debug;
use vidfed_protocol::ActivityObject;

use crate::config::FetchConfig;
use crate::retry::sleep_with_jitter;

const AP_ACCEPT: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Dereferences remote object URLs while walking reply chains or video references.
///
/// `Ok(None)` means "not available"; callers treat it as an unknown object.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Option<ActivityObject>>;
}

pub struct NoFetch;

#[async_trait]
impl ObjectFetcher for NoFetch {
    async fn fetch(&self, _url: &str) -> Result<Option<ActivityObject>> {
        Ok(None)
    }
}

/// Objects known ahead of time, keyed by id. Handy for replays and tests.
#[derive(Clone, Default)]
pub struct StaticObjects {
    objects: Arc<RwLock<HashMap<String, ActivityObject>>>,
}

impl StaticObjects {
    pub async fn insert(&self, obj: ActivityObject) {
        if let Some(id) = obj.id().map(str::to_string) {
            self.objects.write().await.insert(id, obj);
        }
    }
}

#[async_trait]
impl ObjectFetcher for StaticObjects {
    async fn fetch(&self, url: &str) -> Result<Option<ActivityObject>> {
        Ok(self.objects.read().await.get(url).cloned())
    }
}

#[derive(Clone)]
pub struct HttpObjectFetcher {
    http: reqwest::Client,
    attempts: u32,
}

impl HttpObjectFetcher {
    pub fn new(cfg: &FetchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            attempts: cfg.attempts,
        })
    }

    /// GETs `url`, retrying throttling, server errors and transport failures.
    async fn get_with_retry(&self, url: &str) -> Result<Response> {
        let max_attempts = self.attempts.clamp(1, 5);
        let mut backoff = Duration::from_millis(200);
        let mut attempt = 1;
        loop {
            let sent = self.http.get(url).header(ACCEPT, AP_ACCEPT).send().await;
            let retryable = match &sent {
                Ok(resp) => should_retry_status(resp.status()),
                Err(_) => true,
            };
            if !retryable || attempt >= max_attempts {
                return sent.with_context(|| format!("fetch {url}"));
            }
            debug!(url, attempt, "remote fetch failed, retrying");
            sleep_with_jitter(backoff).await;
            backoff = backoff.saturating_mul(2).min(Duration::from_secs(5));
            attempt += 1;
        }
    }
}

#[async_trait]
impl ObjectFetcher for HttpObjectFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<ActivityObject>> {
        let resp = self.get_with_retry(url).await?;
        if !resp.status().is_success() {
            debug!(url, status = %resp.status(), "remote object not available");
            return Ok(None);
        }
        let bytes = resp.bytes().await?;
        match serde_json::from_slice::<ActivityObject>(&bytes) {
            Ok(obj) => Ok(Some(obj)),
            Err(e) => {
                debug!(url, "remote object unparsable: {e}");
                Ok(None)
            }
        }
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
