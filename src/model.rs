use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }

    /// Single-byte tag used in sled index keys.
    pub fn tag(self) -> u8 {
        match self {
            MediaKind::Movie => 0,
            MediaKind::Tv => 1,
        }
    }
}

impl FromStr for MediaKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "movie" => Ok(MediaKind::Movie),
            "tv" => Ok(MediaKind::Tv),
            _ => Err(()),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (external id, kind) pair that identifies a title in the catalog and
/// acts as the join key for reviews and watchlist entries.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub tmdb_id: u64,
    pub media_type: MediaKind,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub join_date: String,
}

/// Append-only review document. `author` is denormalized from the submitting
/// user at write time so listing reviews never joins against the user tree.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub user_id: u64,
    pub tmdb_id: u64,
    pub media_type: MediaKind,
    pub author: String,
    pub rating: u8,
    pub text: String,
    pub review_date: String,
    pub helpful_count: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistItem {
    pub tmdb_id: u64,
    pub media_type: MediaKind,
    pub title: String,
    pub poster_url: String,
    pub release_year: i32,
    pub added_date: String,
}

impl WatchlistItem {
    pub fn matches(&self, media: MediaRef) -> bool {
        self.tmdb_id == media.tmdb_id && self.media_type == media.media_type
    }
}

/// Validated watchlist mutation intent. Constructed at the API boundary from
/// the raw request body; storage only ever sees one of these.
#[derive(Debug, Clone)]
pub enum WatchlistMutation {
    Add(WatchlistItem),
    Remove(MediaRef),
}

impl WatchlistMutation {
    pub fn media(&self) -> MediaRef {
        match self {
            WatchlistMutation::Add(item) => MediaRef {
                tmdb_id: item.tmdb_id,
                media_type: item.media_type,
            },
            WatchlistMutation::Remove(media) => *media,
        }
    }
}
