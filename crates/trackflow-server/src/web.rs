use crate::html;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use trackflow_core::dashboard::{Dashboard, Page, Selection};

/// Shared application state
pub type AppState = Arc<Dashboard>;

type Params = Query<Vec<(String, String)>>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/dashboard", get(dashboard_json))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build a selection from query-string pairs.
///
/// `decades` may repeat and each value may hold a comma-separated list. A
/// `decades` key with only empty values is an explicit empty selection.
pub fn selection_from_pairs(pairs: &[(String, String)]) -> Selection {
    let mut selection = Selection::default();
    for (key, value) in pairs {
        let value = value.trim();
        match key.as_str() {
            "decades" => {
                let decades = selection.decades.get_or_insert_with(Vec::new);
                for d in value.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                    if !decades.iter().any(|existing| existing == d) {
                        decades.push(d.to_string());
                    }
                }
            }
            "x" if !value.is_empty() => selection.x = Some(value.to_string()),
            "y" if !value.is_empty() => selection.y = Some(value.to_string()),
            "artist_decade" if !value.is_empty() => {
                selection.artist_decade = Some(value.to_string())
            }
            _ => {}
        }
    }
    selection
}

async fn index(State(dashboard): State<AppState>, Query(pairs): Params) -> Html<String> {
    let page = dashboard.render(&selection_from_pairs(&pairs)).await;
    Html(html::render_page(&page))
}

async fn dashboard_json(
    State(dashboard): State<AppState>,
    Query(pairs): Params,
) -> impl IntoResponse {
    let page = dashboard.render(&selection_from_pairs(&pairs)).await;
    let status = match page {
        Page::Dashboard(_) => StatusCode::OK,
        Page::Setup(_) | Page::Error { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(page))
}

async fn health_check(State(dashboard): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "cache": dashboard.cache_stats(),
        "cache_ttl_secs": dashboard.cache_ttl().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn comma_lists_and_repeated_keys_merge() {
        let sel = selection_from_pairs(&pairs(&[
            ("decades", "1990s,2000s"),
            ("decades", "2000s"),
            ("decades", "2010s"),
            ("x", "valence"),
        ]));
        assert_eq!(
            sel.decades,
            Some(vec!["1990s".to_string(), "2000s".to_string(), "2010s".to_string()])
        );
        assert_eq!(sel.x.as_deref(), Some("valence"));
        assert_eq!(sel.y, None);
    }

    #[test]
    fn absent_and_empty_decades_differ() {
        assert_eq!(selection_from_pairs(&[]).decades, None);
        assert_eq!(
            selection_from_pairs(&pairs(&[("decades", "")])).decades,
            Some(vec![])
        );
    }
}
