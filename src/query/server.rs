use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::stats::{SessionStats, StatsReport};
use crate::storage::SessionState;

#[derive(Deserialize)]
pub struct TagsParams {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct TagScore {
    pub tag: String,
    pub score: f64,
}

#[derive(Clone)]
struct AppState {
    session: Arc<SessionState>,
    stats: Arc<SessionStats>,
}

/// 只读状态接口
pub struct StatusServer {
    session: Arc<SessionState>,
    stats: Arc<SessionStats>,
}

impl StatusServer {
    pub fn new(session: Arc<SessionState>, stats: Arc<SessionStats>) -> Self {
        Self { session, stats }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/status", get(status_handler))
            .route("/tags", get(tags_handler))
            .with_state(AppState {
                session: self.session,
                stats: self.stats,
            })
    }

    pub async fn run(self, port: u16) -> anyhow::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
        tracing::info!("Status server listening on port {}", port);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn status_handler(State(app): State<AppState>) -> Json<StatsReport> {
    Json(StatsReport::collect(&app.stats, &app.session))
}

async fn tags_handler(
    Query(params): Query<TagsParams>,
    State(app): State<AppState>,
) -> Json<Vec<TagScore>> {
    let limit = params.limit.unwrap_or(50);
    let ranked = app.session.read(|s| s.tag_scores.ranked());
    Json(
        ranked
            .into_iter()
            .take(limit)
            .map(|(tag, score)| TagScore { tag, score })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStateStore, PersistedState};

    #[tokio::test]
    async fn serves_status_and_ranked_tags() {
        let mut state = PersistedState::default();
        state.tag_scores.adjust("sky", 2.0);
        state.tag_scores.adjust("sea", 5.0);
        state.width = 2;
        let session = Arc::new(SessionState::new(state, Arc::new(MemoryStateStore::default())));
        let stats = Arc::new(SessionStats::default());
        SessionStats::bump(&stats.presented);

        let app = StatusServer::new(session, stats).router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let status: serde_json::Value = client
            .get(format!("http://{}/status", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["discovery"]["presented"], 1);
        assert_eq!(status["state"]["width"], 2);

        let tags: serde_json::Value = client
            .get(format!("http://{}/tags?limit=1", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tags.as_array().unwrap().len(), 1);
        assert_eq!(tags[0]["tag"], "sea");
    }
}
