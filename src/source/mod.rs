//! Source client abstraction — paginated access to external collections.

pub mod soundcloud;

pub use soundcloud::SoundcloudClient;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::model::{ArtistRef, Source, Track};

/// One page of a source's collection, newest items first.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Track>,
    /// Opaque cursor for the next page; `None` when the collection ends.
    pub next_cursor: Option<String>,
}

/// Client for a polled content platform.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch one page of the source's collection. `cursor` of `None` starts
    /// at the collection's current head.
    async fn fetch_page(&self, source: &Source, cursor: Option<&str>)
    -> Result<Page, SourceError>;

    /// Resolve an artist permalink (e.g. `some-artist`) to its identity.
    async fn resolve_artist(&self, permalink: &str) -> Result<ArtistRef, SourceError>;
}
