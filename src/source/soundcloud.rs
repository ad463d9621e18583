//! SoundCloud api-v2 adapter.
//!
//! Collections paginate via the `next_href` field — an absolute URL the API
//! hands back, used verbatim as the cursor. Every request carries the
//! `client_id` query parameter; the authenticated stream endpoint
//! additionally needs the OAuth header.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::config::SoundcloudConfig;
use crate::error::SourceError;
use crate::model::{ArtistRef, ItemKind, Source, StreamKind, Track, TrackId};
use crate::source::{Page, SourceClient};

const API_BASE: &str = "https://api-v2.soundcloud.com";

pub struct SoundcloudClient {
    config: SoundcloudConfig,
    client: reqwest::Client,
}

impl SoundcloudClient {
    pub fn new(config: SoundcloudConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn head_url(source: &Source) -> String {
        match source {
            Source::Artist(id) => format!("{API_BASE}/users/{id}/tracks"),
            Source::Tag(name) => format!("{API_BASE}/recent-tracks/{name}"),
            Source::Stream(_) => format!("{API_BASE}/stream"),
        }
    }

    async fn get_json(&self, what: &str, url: &str) -> Result<serde_json::Value, SourceError> {
        let response = self
            .client
            .get(url)
            .query(&[("client_id", self.config.client_id.as_str())])
            .header(
                "Authorization",
                format!("OAuth {}", self.config.oauth_token.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| SourceError::Transient {
                source_name: what.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(what, status));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Fatal {
                source_name: what.to_string(),
                reason: format!("malformed response body: {e}"),
            })
    }
}

/// Rate limiting and server errors clear on their own; everything else in
/// the 4xx range means credentials or the request itself are wrong.
fn classify_status(what: &str, status: reqwest::StatusCode) -> SourceError {
    if status.as_u16() == 429 || status.is_server_error() {
        SourceError::Transient {
            source_name: what.to_string(),
            reason: format!("HTTP {status}"),
        }
    } else {
        SourceError::Fatal {
            source_name: what.to_string(),
            reason: format!("HTTP {status}"),
        }
    }
}

#[derive(Deserialize)]
struct RawCollection {
    #[serde(default)]
    collection: Vec<serde_json::Value>,
    #[serde(default)]
    next_href: Option<String>,
}

#[derive(Deserialize)]
struct RawUser {
    id: u64,
    username: String,
    permalink_url: String,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct RawTrack {
    id: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    permalink_url: String,
    #[serde(default)]
    artwork_url: Option<String>,
    created_at: DateTime<Utc>,
    user: RawUser,
}

impl From<RawUser> for ArtistRef {
    fn from(u: RawUser) -> Self {
        ArtistRef {
            id: u.id,
            username: u.username,
            permalink_url: u.permalink_url,
            avatar_url: u.avatar_url,
        }
    }
}

fn track_from_raw(raw: RawTrack, kind: ItemKind) -> Track {
    Track {
        id: TrackId(raw.id),
        kind,
        published_at: raw.created_at,
        title: raw.title,
        description: raw.description,
        permalink_url: raw.permalink_url,
        artwork_url: raw.artwork_url,
        artist: raw.user.into(),
    }
}

/// Decode one collection entry.
///
/// Artist and tag collections hold plain track objects. The stream wraps
/// each item in an envelope: `type` distinguishes uploads from reposts and
/// the content sits under a nested `track`/`playlist`/`album` key, with the
/// publish time and acting user on the envelope itself.
fn decode_item(source: &Source, value: serde_json::Value) -> Result<Track, SourceError> {
    let fatal = |reason: String| SourceError::Fatal {
        source_name: source.to_string(),
        reason,
    };

    if !matches!(source, Source::Stream(_)) {
        let raw: RawTrack =
            serde_json::from_value(value).map_err(|e| fatal(format!("bad track object: {e}")))?;
        return Ok(track_from_raw(raw, ItemKind::Upload));
    }

    let item_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    let kind = if item_type.contains("repost") {
        ItemKind::Repost
    } else {
        ItemKind::Upload
    };

    let envelope: serde_json::Map<String, serde_json::Value> = match value {
        serde_json::Value::Object(map) => map,
        _ => return Err(fatal("stream item is not an object".into())),
    };

    let created_at: DateTime<Utc> = envelope
        .get("created_at")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| fatal(format!("stream item missing created_at ({item_type})")))?;
    let actor: Option<RawUser> = envelope
        .get("user")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());

    let inner = ["track", "playlist", "album"]
        .iter()
        .find_map(|k| envelope.get(*k))
        .cloned()
        .ok_or_else(|| fatal(format!("unknown stream item type: {item_type}")))?;
    let raw: RawTrack =
        serde_json::from_value(inner).map_err(|e| fatal(format!("bad stream track: {e}")))?;

    let mut track = track_from_raw(raw, kind);
    // The envelope timestamp is when the item entered the stream — for a
    // repost that is the repost time, not the original upload time.
    track.published_at = created_at;
    if kind == ItemKind::Repost {
        let reposter = actor.map(|u| u.username).unwrap_or_else(|| "unknown".into());
        track.description = Some(format!("Reposted by {reposter}"));
    }
    Ok(track)
}

fn decode_page(source: &Source, body: serde_json::Value) -> Result<Page, SourceError> {
    let raw: RawCollection = serde_json::from_value(body).map_err(|e| SourceError::Fatal {
        source_name: source.to_string(),
        reason: format!("bad collection: {e}"),
    })?;

    let mut items = Vec::with_capacity(raw.collection.len());
    for value in raw.collection {
        items.push(decode_item(source, value)?);
    }
    Ok(Page {
        items,
        next_cursor: raw.next_href,
    })
}

#[async_trait]
impl SourceClient for SoundcloudClient {
    async fn fetch_page(
        &self,
        source: &Source,
        cursor: Option<&str>,
    ) -> Result<Page, SourceError> {
        let url = match cursor {
            Some(next) => next.to_string(),
            None => Self::head_url(source),
        };
        debug!(%source, %url, "Fetching page");
        let body = self.get_json(&source.to_string(), &url).await?;
        decode_page(source, body)
    }

    async fn resolve_artist(&self, permalink: &str) -> Result<ArtistRef, SourceError> {
        let url = format!("{API_BASE}/resolve");
        let profile = format!("https://soundcloud.com/{permalink}");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("url", profile.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Resolve {
                name: permalink.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SourceError::Resolve {
                name: permalink.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let user: RawUser = response.json().await.map_err(|e| SourceError::Resolve {
            name: permalink.to_string(),
            reason: format!("not a user profile: {e}"),
        })?;
        Ok(user.into())
    }
}
