/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info};
use vidfed_protocol::Activity;

use crate::store::{Actor, FederationDb, Video};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Recipient {
    pub actor_url: String,
    pub inbox_url: String,
}

/// Signed network delivery lives behind this; the pipeline only picks recipients.
#[async_trait]
pub trait DeliveryLayer: Send + Sync {
    async fn forward(&self, activity: &Activity, recipients: &[Recipient]) -> Result<()>;
}

#[derive(Clone)]
pub struct Forwarder {
    db: FederationDb,
    delivery: Arc<dyn DeliveryLayer>,
}

impl Forwarder {
    pub fn new(db: FederationDb, delivery: Arc<dyn DeliveryLayer>) -> Self {
        Self { db, delivery }
    }

    /// Followers of the video's channel and account, minus the excluded actors.
    pub async fn recipients_for(
        &self,
        except_explicit: &[Actor],
        and_also_exclude: &Actor,
        video: &Video,
    ) -> Result<Vec<Recipient>> {
        let targets: Vec<i64> = [video.channel_actor_id, video.account_actor_id]
            .into_iter()
            .flatten()
            .collect();
        let followers = tokio::task::spawn_blocking({
            let db = self.db.clone();
            move || db.list_followers_of(&targets)
        })
        .await??;

        let excluded: Vec<&Actor> = except_explicit
            .iter()
            .chain(std::iter::once(and_also_exclude))
            .collect();
        Ok(exclude_recipients(followers, &excluded))
    }

    /// Re-broadcasts `activity` for a locally owned `video`. Returns who it went to.
    pub async fn forward_video_related(
        &self,
        activity: &Activity,
        except_explicit: &[Actor],
        and_also_exclude: &Actor,
        video: &Video,
    ) -> Result<Vec<Recipient>> {
        if !video.is_owned {
            return Ok(Vec::new());
        }
        let recipients = self
            .recipients_for(except_explicit, and_also_exclude, video)
            .await?;
        if recipients.is_empty() {
            debug!(activity = activity.display_id(), video = %video.url, "no followers to forward to");
            return Ok(recipients);
        }
        self.delivery.forward(activity, &recipients).await?;
        info!(
            activity = activity.display_id(),
            video = %video.url,
            recipients = recipients.len(),
            "forwarded activity to followers"
        );
        Ok(recipients)
    }
}

/// Drops excluded actors and anyone reached through an excluded actor's inbox,
/// so a sender never gets its own activity back via a shared inbox.
fn exclude_recipients(followers: Vec<Actor>, excluded: &[&Actor]) -> Vec<Recipient> {
    let urls: HashSet<&str> = excluded.iter().map(|a| a.url.as_str()).collect();
    let inboxes: HashSet<&str> = excluded
        .iter()
        .flat_map(|a| [a.inbox_url.as_str(), a.delivery_inbox()])
        .filter(|inbox| !inbox.is_empty())
        .collect();
    let mut seen = HashSet::new();
    followers
        .into_iter()
        .filter(|a| !urls.contains(a.url.as_str()))
        .filter(|a| !inboxes.contains(a.inbox_url.as_str()) && !inboxes.contains(a.delivery_inbox()))
        .filter(|a| seen.insert(a.url.clone()))
        .map(|a| Recipient {
            inbox_url: a.delivery_inbox().to_string(),
            actor_url: a.url,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ActorKind;

    fn actor(id: i64, url: &str) -> Actor {
        Actor {
            id,
            url: url.to_string(),
            kind: ActorKind::Person,
            inbox_url: format!("{url}/inbox"),
            shared_inbox_url: None,
            account_id: Some(id),
            is_local: false,
        }
    }

    #[test]
    fn sender_is_removed_even_when_listed_twice() {
        let a = actor(1, "https://a.example/accounts/a");
        let b = actor(2, "https://b.example/accounts/b");
        let c = actor(3, "https://c.example/accounts/c");
        let out = exclude_recipients(vec![a.clone(), b.clone(), c.clone(), b.clone()], &[&a, &a]);
        let urls: Vec<_> = out.iter().map(|r| r.actor_url.as_str()).collect();
        assert_eq!(urls, vec![b.url.as_str(), c.url.as_str()]);
    }

    #[test]
    fn shared_inbox_is_preferred() {
        let mut a = actor(1, "https://a.example/accounts/a");
        a.shared_inbox_url = Some("https://a.example/inbox".to_string());
        let out = exclude_recipients(vec![a], &[]);
        assert_eq!(out[0].inbox_url, "https://a.example/inbox");
    }

    #[test]
    fn follower_behind_the_senders_shared_inbox_is_skipped() {
        let mut alice = actor(1, "https://peer.example/accounts/alice");
        alice.shared_inbox_url = Some("https://peer.example/inbox".to_string());
        let mut bob = actor(2, "https://peer.example/accounts/bob");
        bob.shared_inbox_url = Some("https://peer.example/inbox".to_string());
        let carol = actor(3, "https://other.example/accounts/carol");

        let out = exclude_recipients(vec![bob, carol.clone()], &[&alice]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].actor_url, carol.url);
        assert!(out.iter().all(|r| r.inbox_url != "https://peer.example/inbox"));
    }

    #[test]
    fn follower_whose_personal_inbox_is_the_senders_is_skipped() {
        let alice = actor(1, "https://peer.example/accounts/alice");
        let mut alias = actor(2, "https://peer.example/@alice");
        alias.inbox_url = alice.inbox_url.clone();

        assert!(exclude_recipients(vec![alias], &[&alice]).is_empty());
    }
}
