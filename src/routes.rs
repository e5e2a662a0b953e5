use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::Deserialize;

use crate::{
    AppState,
    error::AppResult,
    listing::MovieFilter,
    models::{Movie, MoviePatch, NewMovie, NewNews, NewsItem, NewsPatch, Tag, TagKind},
};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/admin/movies", get(list_movies).post(create_movie))
        .route("/admin/movies/{id}", get(get_movie).patch(update_movie).delete(delete_movie))
        .route("/admin/movies/{id}/{kind}/{tag_id}", put(attach_tag).delete(detach_tag))
        .route(
            "/admin/movies/{id}/poster",
            post(upload_poster).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/admin/tags/{kind}", get(list_tags).post(create_tag))
        .route("/admin/tags/{kind}/{id}", get(get_tag).patch(rename_tag).delete(delete_tag))
        .route("/admin/news", get(list_news).post(create_news))
        .route("/admin/news/{id}", get(get_news).patch(update_news).delete(delete_news))
        .route(
            "/admin/news/{id}/movies/{movie_id}",
            put(attach_news_movie).delete(detach_news_movie),
        )
        .with_state(state)
}

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct MovieListQuery {
    q: Option<String>,
    genre: Option<i32>,
    label: Option<i32>,
    attribute: Option<i32>,
    limit: Option<usize>,
}

pub async fn list_movies(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MovieListQuery>,
) -> AppResult<Json<Vec<Movie>>> {
    let filter = MovieFilter { name: q.q, genre: q.genre, label: q.label, attribute: q.attribute };
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    Ok(Json(state.catalog.list_movies(filter).take(limit).await?))
}

pub async fn create_movie(
    State(state): State<Arc<AppState>>,
    Json(fields): Json<NewMovie>,
) -> AppResult<(StatusCode, Json<Movie>)> {
    let movie = state.catalog.create_movie(fields).await?;
    Ok((StatusCode::CREATED, Json(movie)))
}

pub async fn get_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<Movie>> {
    Ok(Json(state.catalog.get_movie(id).await?))
}

pub async fn update_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(patch): Json<MoviePatch>,
) -> AppResult<Json<Movie>> {
    Ok(Json(state.catalog.update_movie(id, patch).await?))
}

pub async fn delete_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    state.catalog.delete_movie(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn attach_tag(
    State(state): State<Arc<AppState>>,
    Path((id, kind, tag_id)): Path<(i32, TagKind, i32)>,
) -> AppResult<StatusCode> {
    state.catalog.attach_tag(id, kind, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn detach_tag(
    State(state): State<Arc<AppState>>,
    Path((id, kind, tag_id)): Path<(i32, TagKind, i32)>,
) -> AppResult<StatusCode> {
    state.catalog.detach_tag(id, kind, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PosterQuery {
    filename: String,
}

pub async fn upload_poster(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Query(q): Query<PosterQuery>,
    body: Bytes,
) -> AppResult<Json<Movie>> {
    // Fail before touching the disk when the movie is unknown.
    state.catalog.get_movie(id).await?;
    Ok(Json(store_poster(&state, id, &q.filename, &body).await?))
}

/// Writes the file, then points the movie at it. The file is removed again
/// when the movie cannot be updated.
async fn store_poster(
    state: &AppState,
    id: i32,
    filename: &str,
    bytes: &[u8],
) -> AppResult<Movie> {
    let path = state.posters.save(filename, bytes).await?;
    match state.catalog.set_poster(id, Some(path.clone())).await {
        Ok(movie) => Ok(movie),
        Err(err) => {
            state.posters.remove(&path).await;
            Err(err.into())
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct TagInput {
    #[serde(default)]
    name: String,
}

pub async fn list_tags(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<TagKind>,
) -> AppResult<Json<Vec<Tag>>> {
    Ok(Json(state.catalog.list_tags(kind).await?))
}

pub async fn create_tag(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<TagKind>,
    Json(input): Json<TagInput>,
) -> AppResult<(StatusCode, Json<Tag>)> {
    let tag = state.catalog.create_tag(kind, &input.name).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

pub async fn get_tag(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(TagKind, i32)>,
) -> AppResult<Json<Tag>> {
    Ok(Json(state.catalog.get_tag(kind, id).await?))
}

pub async fn rename_tag(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(TagKind, i32)>,
    Json(input): Json<TagInput>,
) -> AppResult<Json<Tag>> {
    Ok(Json(state.catalog.rename_tag(kind, id, &input.name).await?))
}

pub async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(TagKind, i32)>,
) -> AppResult<StatusCode> {
    state.catalog.delete_tag(kind, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct NewsListQuery {
    #[serde(default)]
    include_hidden: bool,
}

pub async fn list_news(
    State(state): State<Arc<AppState>>,
    Query(q): Query<NewsListQuery>,
) -> AppResult<Json<Vec<NewsItem>>> {
    Ok(Json(state.catalog.list_news(q.include_hidden).await?))
}

pub async fn create_news(
    State(state): State<Arc<AppState>>,
    Json(fields): Json<NewNews>,
) -> AppResult<(StatusCode, Json<NewsItem>)> {
    let item = state.catalog.create_news(fields).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn get_news(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<NewsItem>> {
    Ok(Json(state.catalog.get_news(id).await?))
}

pub async fn update_news(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(patch): Json<NewsPatch>,
) -> AppResult<Json<NewsItem>> {
    Ok(Json(state.catalog.update_news(id, patch).await?))
}

pub async fn delete_news(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    state.catalog.delete_news(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn attach_news_movie(
    State(state): State<Arc<AppState>>,
    Path((id, movie_id)): Path<(i32, i32)>,
) -> AppResult<StatusCode> {
    state.catalog.attach_news_movie(id, movie_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn detach_news_movie(
    State(state): State<Arc<AppState>>,
    Path((id, movie_id)): Path<(i32, i32)>,
) -> AppResult<StatusCode> {
    state.catalog.detach_news_movie(id, movie_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
