mod api;
mod catalog;
mod database;
mod error;
mod model;
mod session;

use actix_web::{middleware::Logger, web, App, HttpServer};
use catalog::{Catalog, GenreCache, TmdbClient, GENRE_TTL_SECS};
use log::warn;
use session::SessionKey;

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "reelist=debug,actix_web=info");
    }
    env_logger::init();

    // A missing signing secret is a misconfiguration; refusing to start is
    // the only sensible failure mode.
    let secret = std::env::var("SESSION_SECRET")
        .expect("SESSION_SECRET must be set to sign session tokens");
    let tmdb_api_key = std::env::var("TMDB_API_KEY").unwrap_or_else(|_| {
        warn!("TMDB_API_KEY is not set; catalog requests will fail");
        String::new()
    });
    let db_path = std::env::var("REELIST_DB").unwrap_or_else(|_| "reelist_db".to_owned());
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());

    let db = sled::open(&db_path).expect("failed to open database");
    let key = SessionKey::new(secret.into_bytes());
    // One catalog (and genre cache) for the whole process, shared across
    // workers.
    let catalog = web::Data::new(Catalog::new(
        TmdbClient::new(tmdb_api_key),
        GenreCache::new(GENRE_TTL_SECS),
    ));

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .data(db.clone())
            .data(key.clone())
            .app_data(catalog.clone())
            .configure(api::routes)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
