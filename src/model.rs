//! Core domain types: channels, sources, tracks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform-assigned chat channel id. Opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// SoundCloud track id. Stable and globally unique within the track family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which slice of the authenticated user's activity stream a channel wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Uploads,
    Reposts,
    All,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Uploads => "uploads",
            StreamKind::Reposts => "reposts",
            StreamKind::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploads" => Some(StreamKind::Uploads),
            "reposts" => Some(StreamKind::Reposts),
            "all" => Some(StreamKind::All),
            _ => None,
        }
    }
}

/// A polled external collection. Identity is value-based: two sources with
/// the same tag or artist id are the same source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    /// An artist's uploads, by numeric user id.
    Artist(u64),
    /// Recent tracks for a hashtag.
    Tag(String),
    /// The authenticated user's activity stream, filtered by kind.
    Stream(StreamKind),
}

impl Source {
    /// Stable discriminant used in persisted rows and log fields.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Source::Artist(_) => "artist",
            Source::Tag(_) => "tag",
            Source::Stream(_) => "stream",
        }
    }

    /// Stable key within the discriminant, for the composite persistence key.
    pub fn key_string(&self) -> String {
        match self {
            Source::Artist(id) => id.to_string(),
            Source::Tag(name) => name.clone(),
            Source::Stream(kind) => kind.as_str().to_string(),
        }
    }

    /// Rebuild a source from its persisted `(kind, key)` pair.
    pub fn from_parts(kind: &str, key: &str) -> Option<Self> {
        match kind {
            "artist" => key.parse().ok().map(Source::Artist),
            "tag" => Some(Source::Tag(key.to_string())),
            "stream" => StreamKind::parse(key).map(Source::Stream),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_str(), self.key_string())
    }
}

/// Whether a stream item is the artist's own upload or a repost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Upload,
    Repost,
}

/// The artist block attached to every track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: u64,
    pub username: String,
    pub permalink_url: String,
    pub avatar_url: Option<String>,
}

/// One piece of content surfaced by a source. The payload fields are passed
/// through to the renderer untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub kind: ItemKind,
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub permalink_url: String,
    pub artwork_url: Option<String>,
    pub artist: ArtistRef,
}

impl Track {
    /// Stream filtering: does this item belong in the given stream slice?
    pub fn matches_stream(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Uploads => self.kind == ItemKind::Upload,
            StreamKind::Reposts => self.kind == ItemKind::Repost,
            StreamKind::All => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_roundtrips_through_parts() {
        let sources = [
            Source::Artist(42),
            Source::Tag("house".into()),
            Source::Stream(StreamKind::Reposts),
        ];
        for s in sources {
            let rebuilt = Source::from_parts(s.kind_str(), &s.key_string());
            assert_eq!(rebuilt, Some(s));
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert_eq!(Source::from_parts("playlist", "1"), None);
        assert_eq!(Source::from_parts("stream", "likes"), None);
    }

    #[test]
    fn stream_matching() {
        let track = Track {
            id: TrackId(1),
            kind: ItemKind::Repost,
            published_at: Utc::now(),
            title: "t".into(),
            description: None,
            permalink_url: String::new(),
            artwork_url: None,
            artist: ArtistRef {
                id: 1,
                username: "a".into(),
                permalink_url: String::new(),
                avatar_url: None,
            },
        };
        assert!(!track.matches_stream(StreamKind::Uploads));
        assert!(track.matches_stream(StreamKind::Reposts));
        assert!(track.matches_stream(StreamKind::All));
    }
}
