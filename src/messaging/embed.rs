//! Rendering — turns a `Track` into the embed payload the platform accepts.

use serde::Serialize;

use crate::model::Track;

/// Discord embed field limits.
const MAX_EMBED_TITLE_LENGTH: usize = 256;
const MAX_EMBED_DESC_LENGTH: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedThumbnail {
    pub url: String,
}

/// A single rendered embed, shaped like the platform's wire format.
#[derive(Debug, Clone, Serialize)]
pub struct TrackEmbed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
    /// ISO 8601; rendered as the message timestamp.
    pub timestamp: String,
    pub author: EmbedAuthor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedThumbnail>,
}

impl TrackEmbed {
    /// Render a track. Truncation is enforced here, not by callers.
    pub fn render(track: &Track) -> Self {
        let thumbnail = track
            .artwork_url
            .clone()
            .or_else(|| track.artist.avatar_url.clone())
            .map(|url| EmbedThumbnail { url });

        Self {
            title: truncate_chars(&track.title, MAX_EMBED_TITLE_LENGTH),
            description: track
                .description
                .as_deref()
                .map(|d| truncate_chars(d, MAX_EMBED_DESC_LENGTH)),
            url: track.permalink_url.clone(),
            timestamp: track.published_at.to_rfc3339(),
            author: EmbedAuthor {
                name: track.artist.username.clone(),
                url: track.artist.permalink_url.clone(),
                icon_url: track.artist.avatar_url.clone(),
            },
            thumbnail,
        }
    }
}

/// Char-boundary-safe truncation.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
