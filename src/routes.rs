use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::article::{Article, ImageKind};
use crate::assets::AssetRegistry;
use crate::config::Labels;
use crate::fetcher::Fetcher;
use crate::state::NewsStore;

pub struct AppState {
    pub store: Arc<NewsStore>,
    pub fetcher: Arc<Fetcher>,
    pub assets: Arc<AssetRegistry>,
    pub labels: Labels,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/news/latest", get(latest_news))
        .route("/news/categories", get(categories))
        .route("/news/categories/:name", get(category_feed))
        .route("/news/categories/:name/select", post(select_category))
        .route("/news/articles/dismiss", post(dismiss_article))
        .route("/news/articles/:id/select", post(select_article))
        .route("/articles/:id/images/:kind", get(article_image))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .with_state(state)
}

/// Article plus the display fields the views need.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    #[serde(flatten)]
    pub article: Article,
    pub time_ago: String,
    pub byline: String,
    pub news_type: String,
}

impl ArticleView {
    pub fn new(article: &Article, labels: &Labels, now: DateTime<Utc>) -> Self {
        Self {
            time_ago: article.time_ago(now),
            byline: article.byline(),
            news_type: article.news_type(labels).to_string(),
            article: article.clone(),
        }
    }
}

fn views(articles: &[Article], labels: &Labels, now: DateTime<Utc>) -> Vec<ArticleView> {
    articles
        .iter()
        .map(|a| ArticleView::new(a, labels, now))
        .collect()
}

#[derive(Debug, Serialize)]
pub struct LatestResponse {
    pub header: ArticleView,
    /// `None` until the first aggregation has been published
    pub latest: Option<Vec<ArticleView>>,
    /// Categories left out of `latest` because their query failed
    pub failures: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CategoriesResponse {
    pub selected: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CategoryFeedResponse {
    pub category: String,
    pub articles: Option<Vec<ArticleView>>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResponse {
    pub selected_article: Option<ArticleView>,
    pub show_article_details: bool,
}

#[derive(Debug, Serialize)]
pub struct ImageStatus {
    pub id: String,
    pub kind: ImageKind,
    pub state: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RefreshStatus {
    pub refreshing: bool,
}

// Custom error type
pub enum AppError {
    NotFound(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound(what) => {
                (StatusCode::NOT_FOUND, format!("Not found: {}", what)).into_response()
            }
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error: {}", err),
            )
                .into_response(),
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError::Internal(err.into())
    }
}

fn require_category(state: &AppState, name: &str) -> Result<(), AppError> {
    if state.fetcher.is_category(name) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("category '{}'", name)))
    }
}

fn category_response(state: &AppState, name: &str) -> CategoryFeedResponse {
    let snapshot = state.store.snapshot();
    CategoryFeedResponse {
        category: name.to_string(),
        articles: snapshot
            .category_news
            .get(name)
            .map(|feed| views(feed, &state.labels, Utc::now())),
        error: snapshot.category_failures.get(name).cloned(),
    }
}

fn selection_response(state: &AppState) -> SelectionResponse {
    let snapshot = state.store.snapshot();
    SelectionResponse {
        selected_article: snapshot
            .selected_article
            .as_ref()
            .map(|a| ArticleView::new(a, &state.labels, Utc::now())),
        show_article_details: snapshot.show_article_details,
    }
}

// Route handlers
pub async fn latest_news(State(state): State<Arc<AppState>>) -> Json<LatestResponse> {
    let snapshot = state.store.snapshot();
    let now = Utc::now();
    let header = snapshot
        .header_article
        .unwrap_or_else(Article::placeholder);

    Json(LatestResponse {
        header: ArticleView::new(&header, &state.labels, now),
        latest: snapshot
            .latest_news
            .as_deref()
            .map(|latest| views(latest, &state.labels, now)),
        failures: snapshot.latest_failures,
    })
}

pub async fn categories(State(state): State<Arc<AppState>>) -> Json<CategoriesResponse> {
    Json(CategoriesResponse {
        selected: state.store.selected_category(),
        categories: state.fetcher.categories().to_vec(),
    })
}

pub async fn category_feed(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<CategoryFeedResponse>, AppError> {
    require_category(&state, &name)?;
    Ok(Json(category_response(&state, &name)))
}

pub async fn select_category(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<CategoryFeedResponse>, AppError> {
    require_category(&state, &name)?;
    state.fetcher.select_category(&name).await;
    Ok(Json(category_response(&state, &name)))
}

pub async fn select_article(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SelectionResponse>, AppError> {
    let article = state
        .store
        .find_article(&id)
        .ok_or_else(|| AppError::NotFound(format!("article '{}'", id)))?;
    state.store.select_article(article);
    Ok(Json(selection_response(&state)))
}

pub async fn dismiss_article(State(state): State<Arc<AppState>>) -> Json<SelectionResponse> {
    state.store.dismiss_article();
    Json(selection_response(&state))
}

/// Serves the image once it is in memory. Otherwise starts a load and
/// answers 202 with the current slot state so the client can poll.
pub async fn article_image(
    State(state): State<Arc<AppState>>,
    Path((id, kind)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let kind = ImageKind::parse(&kind)
        .ok_or_else(|| AppError::NotFound(format!("image kind '{}'", kind)))?;
    let entry = state
        .assets
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("article '{}'", id)))?;

    if let Some(image) = entry.image(kind) {
        return Ok((
            [(header::CONTENT_TYPE, image.content_type())],
            image.bytes().clone(),
        )
            .into_response());
    }

    let status = ImageStatus {
        id: id.clone(),
        kind,
        state: entry.state(kind).name(),
    };
    entry.spawn_load(kind);

    Ok((StatusCode::ACCEPTED, Json(status)).into_response())
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> Json<RefreshStatus> {
    // Spawn the refresh task
    let fetcher = state.fetcher.clone();
    tokio::spawn(async move {
        if let Err(e) = fetcher.refresh_all().await {
            error!("Manual refresh failed: {}", e);
        }
    });

    // Return refreshing state immediately
    Json(RefreshStatus { refreshing: true })
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> Json<RefreshStatus> {
    Json(RefreshStatus {
        refreshing: state.fetcher.is_refreshing().await,
    })
}

pub async fn health() -> impl IntoResponse {
    "OK"
}
