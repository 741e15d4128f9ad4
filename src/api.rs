use crate::catalog::Catalog;
use crate::database::*;
use crate::error::ApiError;
use crate::model::*;
use crate::session::{self, SessionKey};
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

type Db = web::Data<sled::Db>;
type Key = web::Data<SessionKey>;
type Provider = web::Data<Catalog>;

/// Fixed-width RFC 3339 UTC, so stored dates sort lexicographically.
fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Resolves the caller's identity from the session cookie. Called before any
/// data access by every per-user operation; an absent or invalid session is
/// an authentication error, not a storage one.
fn authenticate(req: &HttpRequest, key: &SessionKey) -> Result<session::Identity, ApiError> {
    session::identity_from_request(req, key).ok_or_else(ApiError::unauthenticated)
}

fn parse_kind(raw: &str) -> Result<MediaKind, ApiError> {
    MediaKind::from_str(raw).map_err(|_| ApiError::validation("mediaType must be movie or tv"))
}

#[derive(Deserialize)]
struct SignupBody {
    username: String,
    email: String,
    password: String,
}

async fn signup(db: Db, body: web::Json<SignupBody>) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.username.trim().is_empty() || body.email.trim().is_empty() || body.password.is_empty()
    {
        return Err(ApiError::validation("missing required fields"));
    }
    let user = User {
        password_hash: bcrypt::hash(&body.password, bcrypt::DEFAULT_COST)?,
        username: body.username,
        email: body.email,
        join_date: Utc::now().format("%Y-%m-%d").to_string(),
    };
    match db.add_user(&user)? {
        Some(user_id) => Ok(HttpResponse::Created().json(serde_json::json!({ "userId": user_id }))),
        None => Err(ApiError::Conflict(
            "user with this email or username already exists".to_owned(),
        )),
    }
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionUser {
    user_id: u64,
    username: String,
}

async fn login(db: Db, key: Key, body: web::Json<LoginBody>) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.email.is_empty() || body.password.is_empty() {
        return Err(ApiError::validation("missing required fields"));
    }
    if let Some((user_id, user)) = db.get_user_by_email(&body.email)? {
        if bcrypt::verify(&body.password, &user.password_hash)? {
            let cookie = session::session_cookie(&key, user_id, &user.username);
            return Ok(HttpResponse::Ok().cookie(cookie).json(SessionUser {
                user_id,
                username: user.username,
            }));
        }
    }
    // Same message for unknown email and wrong password.
    Err(ApiError::Unauthorized("invalid email or password".to_owned()))
}

async fn logout() -> HttpResponse {
    HttpResponse::Ok()
        .cookie(session::expired_cookie())
        .json(serde_json::json!({ "message": "logged out" }))
}

#[derive(Deserialize)]
struct ReviewQuery {
    #[serde(rename = "tmdbId")]
    tmdb_id: u64,
    #[serde(rename = "mediaType")]
    media_type: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewResponse {
    id: u64,
    user_id: u64,
    author: String,
    date: String,
    rating: u8,
    text: String,
    helpful_count: u64,
    tmdb_id: u64,
    media_type: MediaKind,
}

impl ReviewResponse {
    fn new(id: u64, review: Review) -> ReviewResponse {
        ReviewResponse {
            id,
            user_id: review.user_id,
            author: review.author,
            date: review.review_date,
            rating: review.rating,
            text: review.text,
            helpful_count: review.helpful_count,
            tmdb_id: review.tmdb_id,
            media_type: review.media_type,
        }
    }
}

async fn list_reviews(db: Db, query: web::Query<ReviewQuery>) -> Result<HttpResponse, ApiError> {
    let media = MediaRef {
        tmdb_id: query.tmdb_id,
        media_type: parse_kind(&query.media_type)?,
    };
    let reviews: Vec<ReviewResponse> = db
        .reviews_for(media)?
        .into_iter()
        .map(|(id, review)| ReviewResponse::new(id, review))
        .collect();
    Ok(HttpResponse::Ok().json(reviews))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewBody {
    tmdb_id: u64,
    media_type: MediaKind,
    rating: i64,
    text: String,
}

async fn submit_review(
    req: HttpRequest,
    db: Db,
    key: Key,
    body: web::Json<ReviewBody>,
) -> Result<HttpResponse, ApiError> {
    let identity = authenticate(&req, &key)?;
    let body = body.into_inner();
    if body.rating < i64::from(RATING_MIN) || body.rating > i64::from(RATING_MAX) {
        return Err(ApiError::validation(
            "rating must be an integer between 1 and 5",
        ));
    }
    let text_len = body.text.chars().count();
    if text_len < REVIEW_TEXT_MIN || text_len > REVIEW_TEXT_MAX {
        return Err(ApiError::validation(
            "review text must be between 10 and 1000 characters",
        ));
    }
    let review = Review {
        user_id: identity.user_id,
        tmdb_id: body.tmdb_id,
        media_type: body.media_type,
        author: identity.username,
        rating: body.rating as u8,
        text: body.text,
        review_date: now_stamp(),
        helpful_count: 0,
    };
    let id = db.add_review(&review)?;
    Ok(HttpResponse::Created().json(ReviewResponse::new(id, review)))
}

async fn review_helpful(
    req: HttpRequest,
    db: Db,
    key: Key,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    authenticate(&req, &key)?;
    let id = path.into_inner();
    match db.mark_helpful(id)? {
        Some(review) => Ok(HttpResponse::Ok().json(ReviewResponse::new(id, review))),
        None => Err(ApiError::NotFound("no such review".to_owned())),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchlistBody {
    tmdb_id: u64,
    media_type: MediaKind,
    action: String,
    title: Option<String>,
    poster_url: Option<String>,
    release_year: Option<i32>,
}

/// Turns the raw body into a typed mutation intent before storage sees it.
fn parse_mutation(body: WatchlistBody) -> Result<WatchlistMutation, ApiError> {
    let media = MediaRef {
        tmdb_id: body.tmdb_id,
        media_type: body.media_type,
    };
    match body.action.as_str() {
        "add" => {
            let missing =
                || ApiError::validation("missing media info for adding to watchlist");
            Ok(WatchlistMutation::Add(WatchlistItem {
                tmdb_id: media.tmdb_id,
                media_type: media.media_type,
                title: body.title.filter(|t| !t.is_empty()).ok_or_else(missing)?,
                poster_url: body.poster_url.ok_or_else(missing)?,
                release_year: body.release_year.ok_or_else(missing)?,
                added_date: now_stamp(),
            }))
        }
        "remove" => Ok(WatchlistMutation::Remove(media)),
        _ => Err(ApiError::validation("invalid action")),
    }
}

async fn get_watchlist(req: HttpRequest, db: Db, key: Key) -> Result<HttpResponse, ApiError> {
    let identity = authenticate(&req, &key)?;
    Ok(HttpResponse::Ok().json(db.get_watchlist(identity.user_id)?))
}

async fn update_watchlist(
    req: HttpRequest,
    db: Db,
    key: Key,
    body: web::Json<WatchlistBody>,
) -> Result<HttpResponse, ApiError> {
    let identity = authenticate(&req, &key)?;
    let mutation = parse_mutation(body.into_inner())?;
    db.apply_mutation(identity.user_id, &mutation)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "watchlist updated" })))
}

#[derive(Deserialize)]
struct SearchQuery {
    query: String,
    page: Option<u32>,
}

async fn search_catalog(
    catalog: Provider,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    if query.query.trim().is_empty() {
        return Err(ApiError::validation("missing search query"));
    }
    let results = catalog.search(&query.query, query.page.unwrap_or(1)).await?;
    Ok(HttpResponse::Ok().json(results))
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
}

async fn popular_catalog(
    catalog: Provider,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let kind = parse_kind(&path)?;
    let results = catalog.popular(kind, query.page.unwrap_or(1)).await?;
    Ok(HttpResponse::Ok().json(results))
}

async fn catalog_genres(
    catalog: Provider,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let kind = parse_kind(&path)?;
    Ok(HttpResponse::Ok().json(catalog.genre_list(kind).await?))
}

async fn catalog_detail(
    catalog: Provider,
    path: web::Path<(String, u64)>,
) -> Result<HttpResponse, ApiError> {
    let media = MediaRef {
        media_type: parse_kind(&path.0)?,
        tmdb_id: path.1,
    };
    match catalog.detail(media).await? {
        Some(summary) => Ok(HttpResponse::Ok().json(summary)),
        None => Err(ApiError::NotFound("no such title".to_owned())),
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/auth/signup", web::post().to(signup))
        .route("/api/auth/login", web::post().to(login))
        .route("/api/auth/logout", web::post().to(logout))
        .route("/api/reviews", web::get().to(list_reviews))
        .route("/api/reviews", web::post().to(submit_review))
        .route("/api/reviews/{id}/helpful", web::post().to(review_helpful))
        .route("/api/watchlist", web::get().to(get_watchlist))
        .route("/api/watchlist", web::post().to(update_watchlist))
        .route("/api/catalog/search", web::get().to(search_catalog))
        // Registered before the detail route so "popular" and "genres" are
        // not swallowed by the {id} segment.
        .route("/api/catalog/{media_type}/popular", web::get().to(popular_catalog))
        .route("/api/catalog/{media_type}/genres", web::get().to(catalog_genres))
        .route("/api/catalog/{media_type}/{id}", web::get().to(catalog_detail));
}
