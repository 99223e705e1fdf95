use axum::{
    extract::DefaultBodyLimit,
    middleware::{self},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use rand::Rng;
use serde_json::json;
use tower::ServiceBuilder;

use crate::{
    config,
    ctx::with_ctx,
    db::DB,
    errors::{self, on_error},
    notes::NoteService,
    state::AppState,
    storage::Storage,
};

pub struct AppParams<R>
where
    R: FnOnce(AppState) -> Router,
{
    pub db: DB,
    pub storage: Storage,
    pub router: R,
}

pub async fn create<R>(AppParams { db, storage, router }: AppParams<R>) -> errors::Result<Router>
where
    R: FnOnce(AppState) -> Router,
{
    storage.ensure_roots().await?;

    let state = AppState {
        conn: db.clone(),
        notes: NoteService::new(db.clone(), storage),
    };

    let app = Router::new()
        .route("/__version__", get(version))
        .route("/__heartbeat__", get(heartbeat))
        .route("/__lbheartbeat__", get(lbheartbeat))
        .merge(router(state))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(db))
                .layer(middleware::from_fn(on_error))
                .layer(middleware::from_fn(with_ctx))
                .layer(DefaultBodyLimit::max(config().max_upload_bytes)),
        );

    Ok(app)
}

async fn version() -> impl IntoResponse {
    let config = &config();
    Json(json!({
        "source" : config.source,
        "version": config.version,
        "commit" : config.git_commit,
        "build"  : config.pipeline_id
    }))
}

async fn heartbeat() -> impl IntoResponse {
    let mut rng = rand::thread_rng();
    let random: u32 = rng.gen_range(0..=10000);

    Json(json!({
        "status" : "ok",
        "random": random,
    }))
}

async fn lbheartbeat() -> impl IntoResponse {
    ""
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use serde_json::Value;

    use crate::{db::init_test_db, Result};

    #[tokio::test]
    async fn health_endpoints_need_no_identity() -> Result<()> {
        let db = init_test_db().await?;
        let app = crate::tests::test_server(db, |_| Router::new()).await?;

        let response = app.server.get("/__heartbeat__").await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.json::<Value>()["status"], "ok");

        let response = app.server.get("/__version__").await;
        assert_eq!(response.status_code(), 200);
        assert!(response.json::<Value>()["version"].is_string());

        assert_eq!(app.server.get("/__lbheartbeat__").await.status_code(), 200);
        Ok(())
    }
}
