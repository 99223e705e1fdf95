use axum::{extract::State, middleware, routing::get, Json, Router};

use crate::{ctx::admin_only, db::DB, state::AppState, Result};

use super::{stats, UserStatsResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/admin/users", get(list_users))
        .route_layer(middleware::from_fn(admin_only))
        .with_state(state)
}

async fn list_users(State(db): State<DB>) -> Result<Json<UserStatsResponse>> {
    let results = stats(&db).await?;
    Ok(Json(UserStatsResponse { results }))
}
