/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Federation vocabulary for inbound `Create` activities.
//!
//! Only the four object kinds the ingestion pipeline understands get typed
//! representations. Everything else deserializes into
//! [`ActivityObject::Unknown`] with its raw JSON kept around for diagnostics.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub const AS_PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

pub fn is_public(audience: &[String]) -> bool {
    audience
        .iter()
        .any(|s| s == AS_PUBLIC || s == "as:Public" || s == "Public")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    Create,
}

/// An inbound activity.
///
/// Keeps the JSON document it was parsed from, so re-broadcasting it sends the
/// sender's bytes (`@context`, LD `signature`, unmodelled object fields) untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: Option<String>,
    pub ty: ActivityType,
    pub actor: String,
    pub object: ActivityObject,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    received: Value,
}

#[derive(Deserialize)]
struct ActivityFields {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    ty: ActivityType,
    actor: String,
    object: ActivityObject,
    #[serde(default, deserialize_with = "one_or_many")]
    to: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    cc: Vec<String>,
}

impl Activity {
    /// Activity id for logs; falls back to the object id when the sender omitted one.
    pub fn display_id(&self) -> &str {
        self.id
            .as_deref()
            .or_else(|| self.object.id())
            .unwrap_or("<anonymous>")
    }

    /// The document as received.
    pub fn received(&self) -> &Value {
        &self.received
    }
}

impl<'de> Deserialize<'de> for Activity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let received = Value::deserialize(deserializer)?;
        let fields: ActivityFields =
            serde_json::from_value(received.clone()).map_err(serde::de::Error::custom)?;
        Ok(Activity {
            id: fields.id,
            ty: fields.ty,
            actor: fields.actor,
            object: fields.object,
            to: fields.to,
            cc: fields.cc,
            received,
        })
    }
}

impl Serialize for Activity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.received.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityObject {
    Video(VideoObject),
    Note(CommentObject),
    CacheFile(CacheFileObject),
    Playlist(PlaylistObject),
    /// Vocabulary this node does not handle. `ty` is empty for bare links.
    Unknown { ty: String, raw: Value },
}

impl ActivityObject {
    pub fn type_name(&self) -> &str {
        match self {
            ActivityObject::Video(_) => "Video",
            ActivityObject::Note(_) => "Note",
            ActivityObject::CacheFile(_) => "CacheFile",
            ActivityObject::Playlist(_) => "Playlist",
            ActivityObject::Unknown { ty, .. } => ty,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ActivityObject::Video(v) => Some(&v.id),
            ActivityObject::Note(c) => Some(&c.id),
            ActivityObject::CacheFile(c) => Some(&c.id),
            ActivityObject::Playlist(p) => Some(&p.id),
            ActivityObject::Unknown { raw, .. } => match raw {
                Value::String(s) => Some(s),
                _ => raw.get("id").and_then(|v| v.as_str()),
            },
        }
    }
}

impl<'de> Deserialize<'de> for ActivityObject {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let ty = raw
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let parsed = match ty.as_str() {
            "Video" => serde_json::from_value(raw).map(ActivityObject::Video),
            "Note" => serde_json::from_value(raw).map(ActivityObject::Note),
            "CacheFile" => serde_json::from_value(raw).map(ActivityObject::CacheFile),
            "Playlist" => serde_json::from_value(raw).map(ActivityObject::Playlist),
            _ => return Ok(ActivityObject::Unknown { ty, raw }),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

impl Serialize for ActivityObject {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let body = match self {
            ActivityObject::Video(v) => serde_json::to_value(v),
            ActivityObject::Note(c) => serde_json::to_value(c),
            ActivityObject::CacheFile(c) => serde_json::to_value(c),
            ActivityObject::Playlist(p) => serde_json::to_value(p),
            ActivityObject::Unknown { raw, .. } => return raw.serialize(serializer),
        };
        let mut body = body.map_err(serde::ser::Error::custom)?;
        if let Value::Object(map) = &mut body {
            map.insert("type".to_string(), Value::String(self.type_name().to_string()));
        }
        body.serialize(serializer)
    }
}

/// Either a bare URL or an embedded object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Link(String),
    Embedded(Box<ActivityObject>),
}

impl ObjectRef {
    pub fn url(&self) -> Option<&str> {
        match self {
            ObjectRef::Link(url) => Some(url),
            ObjectRef::Embedded(obj) => obj.id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorLink {
    #[serde(rename = "type")]
    pub ty: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkObject {
    #[serde(rename = "type", default = "default_link_type")]
    pub ty: String,
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
}

impl LinkObject {
    pub fn is_video_file(&self) -> bool {
        self.media_type.starts_with("video/")
    }
}

fn default_link_type() -> String {
    "Link".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoObject {
    /// Canonical URL.
    pub id: String,
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(rename = "attributedTo", default)]
    pub attributed_to: Vec<ActorLink>,
    #[serde(default)]
    pub url: Vec<LinkObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub cc: Vec<String>,
}

impl VideoObject {
    pub fn channel(&self) -> Option<&ActorLink> {
        self.attributed_to.iter().find(|a| a.ty == "Group")
    }

    pub fn account(&self) -> Option<&ActorLink> {
        self.attributed_to.iter().find(|a| a.ty == "Person")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentObject {
    pub id: String,
    /// Parent comment or video URL.
    #[serde(rename = "inReplyTo")]
    pub in_reply_to: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "attributedTo", default, skip_serializing_if = "Option::is_none")]
    pub attributed_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub cc: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheFileObject {
    pub id: String,
    /// The cached video.
    pub object: ObjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub url: LinkObject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistObject {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "orderedItems", default)]
    pub ordered_items: Vec<PlaylistItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlaylistItem {
    Video(String),
    Element(PlaylistElement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistElement {
    pub url: String,
    #[serde(rename = "startTimestamp", default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<u32>,
    #[serde(rename = "stopTimestamp", default, skip_serializing_if = "Option::is_none")]
    pub stop_timestamp: Option<u32>,
}

impl PlaylistItem {
    pub fn video_url(&self) -> &str {
        match self {
            PlaylistItem::Video(url) => url,
            PlaylistItem::Element(e) => &e.url,
        }
    }

    pub fn timestamps(&self) -> (Option<u32>, Option<u32>) {
        match self {
            PlaylistItem::Video(_) => (None, None),
            PlaylistItem::Element(e) => (e.start_timestamp, e.stop_timestamp),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}
