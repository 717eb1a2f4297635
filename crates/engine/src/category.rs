//! Logical asset categories, one store and one cache each.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Images,
    Audio,
    Video,
    Gifs,
    Libraries,
    Request,
}

impl MediaCategory {
    pub const ALL: [MediaCategory; 6] = [
        MediaCategory::Images,
        MediaCategory::Audio,
        MediaCategory::Video,
        MediaCategory::Gifs,
        MediaCategory::Libraries,
        MediaCategory::Request,
    ];

    /// Name of the persistent store backing this category.
    pub fn store_name(self) -> &'static str {
        match self {
            MediaCategory::Images => "images",
            MediaCategory::Audio => "audio",
            MediaCategory::Video => "video",
            MediaCategory::Gifs => "gifs",
            MediaCategory::Libraries => "libraries",
            MediaCategory::Request => "request",
        }
    }

    /// Media players keep their files regardless of origin directives.
    pub fn force_cache_by_default(self) -> bool {
        matches!(self, MediaCategory::Audio | MediaCategory::Video)
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_name())
    }
}
