use crate::error::ApiError;
use crate::model::{MediaKind, MediaRef};
use chrono::Utc;
use futures::try_join;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";

/// Genre lists change rarely upstream; a day of staleness is acceptable.
pub const GENRE_TTL_SECS: i64 = 60 * 60 * 24;

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Process-scoped cache for the per-kind genre id to name maps. Clock and
/// TTL are injected; `invalidate` drops every slot for a forced refetch.
pub struct GenreCache {
    ttl_secs: i64,
    clock: Clock,
    slots: RwLock<HashMap<MediaKind, GenreSlot>>,
}

struct GenreSlot {
    fetched_at: i64,
    genres: HashMap<u64, String>,
}

impl GenreCache {
    pub fn new(ttl_secs: i64) -> GenreCache {
        GenreCache::with_clock(ttl_secs, Box::new(|| Utc::now().timestamp()))
    }

    pub fn with_clock(ttl_secs: i64, clock: Clock) -> GenreCache {
        GenreCache {
            ttl_secs,
            clock,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, kind: MediaKind) -> Option<HashMap<u64, String>> {
        let slots = self.slots.read().unwrap();
        let slot = slots.get(&kind)?;
        if (self.clock)() - slot.fetched_at >= self.ttl_secs {
            return None;
        }
        Some(slot.genres.clone())
    }

    pub fn store(&self, kind: MediaKind, genres: HashMap<u64, String>) {
        self.slots.write().unwrap().insert(
            kind,
            GenreSlot {
                fetched_at: (self.clock)(),
                genres,
            },
        );
    }

    pub fn invalidate(&self) {
        self.slots.write().unwrap().clear();
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Genre {
    pub id: u64,
    pub name: String,
}

/// Denormalized record returned to clients for any catalog read.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MediaSummary {
    pub tmdb_id: u64,
    pub media_type: MediaKind,
    pub title: String,
    pub description: String,
    pub poster_url: String,
    pub release_year: i32,
    pub genres: Vec<String>,
}

#[derive(Deserialize)]
struct GenreListResponse {
    genres: Vec<Genre>,
}

#[derive(Deserialize)]
struct PageResponse {
    results: Vec<TmdbEntry>,
}

/// One record as the provider returns it. Movie and tv records use different
/// field names for the same things; the mapping smooths that over.
#[derive(Deserialize, Debug)]
struct TmdbEntry {
    id: u64,
    media_type: Option<String>,
    title: Option<String>,
    name: Option<String>,
    overview: Option<String>,
    poster_path: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    #[serde(default)]
    genre_ids: Vec<u64>,
    genres: Option<Vec<Genre>>,
}

impl TmdbEntry {
    fn kind(&self, hint: Option<MediaKind>) -> Option<MediaKind> {
        hint.or_else(|| self.media_type.as_deref()?.parse().ok())
    }

    fn into_summary(
        self,
        hint: Option<MediaKind>,
        genre_names: &HashMap<u64, String>,
    ) -> Option<MediaSummary> {
        let kind = self.kind(hint)?;
        let genres = match self.genres {
            Some(listed) => listed.into_iter().map(|g| g.name).collect(),
            None => self
                .genre_ids
                .iter()
                .filter_map(|id| genre_names.get(id).cloned())
                .collect(),
        };
        let date = self.release_date.or(self.first_air_date);
        let release_year = date
            .as_deref()
            .and_then(|d| d.get(0..4))
            .and_then(|y| y.parse().ok())
            .unwrap_or(0);
        Some(MediaSummary {
            tmdb_id: self.id,
            media_type: kind,
            title: self.title.or(self.name).unwrap_or_default(),
            description: self.overview.unwrap_or_default(),
            poster_url: self
                .poster_path
                .map(|p| format!("{}{}", POSTER_BASE_URL, p))
                .unwrap_or_default(),
            release_year,
            genres,
        })
    }
}

pub struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TmdbClient {
    pub fn new(api_key: String) -> TmdbClient {
        TmdbClient::with_base_url(TMDB_BASE_URL.to_owned(), api_key)
    }

    pub fn with_base_url(base_url: String, api_key: String) -> TmdbClient {
        TmdbClient {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, reqwest::Error> {
        let url = format!("{}{}", self.base_url, path);
        Ok(self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("language", "en-US")])
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn fetch_genres(&self, kind: MediaKind) -> Result<HashMap<u64, String>, reqwest::Error> {
        let resp: GenreListResponse = self
            .get_json(&format!("/genre/{}/list", kind), &[])
            .await?;
        Ok(resp.genres.into_iter().map(|g| (g.id, g.name)).collect())
    }

    async fn search_multi(&self, query: &str, page: u32) -> Result<Vec<TmdbEntry>, reqwest::Error> {
        let page = page.to_string();
        let resp: PageResponse = self
            .get_json("/search/multi", &[("query", query), ("page", &page)])
            .await?;
        Ok(resp.results)
    }

    async fn fetch_popular(
        &self,
        kind: MediaKind,
        page: u32,
    ) -> Result<Vec<TmdbEntry>, reqwest::Error> {
        let page = page.to_string();
        let resp: PageResponse = self
            .get_json(&format!("/{}/popular", kind), &[("page", &page)])
            .await?;
        Ok(resp.results)
    }

    async fn fetch_detail(&self, media: MediaRef) -> Result<Option<TmdbEntry>, reqwest::Error> {
        let url = format!("{}/{}/{}", self.base_url, media.media_type, media.tmdb_id);
        let resp = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("language", "en-US")])
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.json().await?))
    }
}

/// The Media Catalog Provider as seen by the rest of the service: a read-only
/// source of denormalized media records, with the genre cache folded in. It
/// never participates in authorization decisions.
pub struct Catalog {
    client: TmdbClient,
    genres: GenreCache,
}

impl Catalog {
    pub fn new(client: TmdbClient, genres: GenreCache) -> Catalog {
        Catalog { client, genres }
    }

    async fn genre_map(&self, kind: MediaKind) -> Result<HashMap<u64, String>, ApiError> {
        if let Some(cached) = self.genres.lookup(kind) {
            return Ok(cached);
        }
        let fetched = self.client.fetch_genres(kind).await?;
        self.genres.store(kind, fetched.clone());
        Ok(fetched)
    }

    /// Movie and tv lists are independent, so they are fetched concurrently
    /// and merged.
    async fn combined_genre_map(&self) -> Result<HashMap<u64, String>, ApiError> {
        let (mut movie, tv) = try_join!(
            self.genre_map(MediaKind::Movie),
            self.genre_map(MediaKind::Tv)
        )?;
        movie.extend(tv);
        Ok(movie)
    }

    pub async fn genre_list(&self, kind: MediaKind) -> Result<Vec<Genre>, ApiError> {
        let mut genres: Vec<Genre> = self
            .genre_map(kind)
            .await?
            .into_iter()
            .map(|(id, name)| Genre { id, name })
            .collect();
        genres.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(genres)
    }

    pub async fn search(&self, query: &str, page: u32) -> Result<Vec<MediaSummary>, ApiError> {
        let (genres, entries) = try_join!(
            self.combined_genre_map(),
            async { Ok(self.client.search_multi(query, page).await?) }
        )?;
        // Multi search also returns people; anything without a known media
        // kind is dropped.
        Ok(entries
            .into_iter()
            .filter_map(|entry| entry.into_summary(None, &genres))
            .collect())
    }

    pub async fn popular(&self, kind: MediaKind, page: u32) -> Result<Vec<MediaSummary>, ApiError> {
        let (genres, entries) = try_join!(self.genre_map(kind), async {
            Ok(self.client.fetch_popular(kind, page).await?)
        })?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| entry.into_summary(Some(kind), &genres))
            .collect())
    }

    pub async fn detail(&self, media: MediaRef) -> Result<Option<MediaSummary>, ApiError> {
        let entry = match self.client.fetch_detail(media).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        // Detail responses carry full genre objects, so the map is usually
        // unused here; it still covers records that only have ids.
        let genres = self.genre_map(media.media_type).await?;
        Ok(entry.into_summary(Some(media.media_type), &genres))
    }

    pub fn invalidate_genres(&self) {
        self.genres.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn genre_map() -> HashMap<u64, String> {
        vec![(28, "Action".to_owned()), (18, "Drama".to_owned())]
            .into_iter()
            .collect()
    }

    #[test]
    fn genre_cache_serves_within_ttl_and_expires_after() {
        let now = Arc::new(AtomicI64::new(0));
        let clock = now.clone();
        let cache = GenreCache::with_clock(100, Box::new(move || clock.load(Ordering::SeqCst)));
        assert!(cache.lookup(MediaKind::Movie).is_none());
        cache.store(MediaKind::Movie, genre_map());
        assert!(cache.lookup(MediaKind::Movie).is_some());
        assert!(cache.lookup(MediaKind::Tv).is_none());
        now.store(99, Ordering::SeqCst);
        assert!(cache.lookup(MediaKind::Movie).is_some());
        now.store(100, Ordering::SeqCst);
        assert!(cache.lookup(MediaKind::Movie).is_none());
    }

    #[test]
    fn genre_cache_invalidation_drops_all_kinds() {
        let cache = GenreCache::new(GENRE_TTL_SECS);
        cache.store(MediaKind::Movie, genre_map());
        cache.store(MediaKind::Tv, genre_map());
        cache.invalidate();
        assert!(cache.lookup(MediaKind::Movie).is_none());
        assert!(cache.lookup(MediaKind::Tv).is_none());
    }

    #[test]
    fn movie_entry_maps_to_summary() {
        let entry: TmdbEntry = serde_json::from_value(serde_json::json!({
            "id": 680,
            "title": "Pulp Fiction",
            "overview": "A burger-loving hit man.",
            "poster_path": "/pulp.jpg",
            "release_date": "1994-09-10",
            "genre_ids": [28, 18, 99]
        }))
        .unwrap();
        let summary = entry
            .into_summary(Some(MediaKind::Movie), &genre_map())
            .unwrap();
        assert_eq!(summary.tmdb_id, 680);
        assert_eq!(summary.title, "Pulp Fiction");
        assert_eq!(summary.release_year, 1994);
        assert_eq!(summary.poster_url, "https://image.tmdb.org/t/p/w500/pulp.jpg");
        // Unknown genre ids are dropped, known ones resolve to names.
        assert_eq!(summary.genres, vec!["Action", "Drama"]);
    }

    #[test]
    fn tv_entry_uses_name_and_first_air_date() {
        let entry: TmdbEntry = serde_json::from_value(serde_json::json!({
            "id": 1399,
            "media_type": "tv",
            "name": "Game of Thrones",
            "first_air_date": "2011-04-17",
            "genres": [{"id": 10765, "name": "Sci-Fi & Fantasy"}]
        }))
        .unwrap();
        let summary = entry.into_summary(None, &HashMap::new()).unwrap();
        assert_eq!(summary.media_type, MediaKind::Tv);
        assert_eq!(summary.title, "Game of Thrones");
        assert_eq!(summary.release_year, 2011);
        assert_eq!(summary.genres, vec!["Sci-Fi & Fantasy"]);
    }

    #[test]
    fn person_entry_is_dropped_from_search_results() {
        let entry: TmdbEntry = serde_json::from_value(serde_json::json!({
            "id": 500,
            "media_type": "person",
            "name": "Tom Cruise"
        }))
        .unwrap();
        assert!(entry.into_summary(None, &HashMap::new()).is_none());
    }
}
