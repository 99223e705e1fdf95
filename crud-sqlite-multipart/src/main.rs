mod config;

mod app;
mod ctx;
mod db;
mod errors;
mod extract;
mod notes;
mod shared;
mod state;
mod storage;
mod users;

use app::AppParams;
use axum::Router;
pub use config::config;
pub use db::{init_db, DB};
pub use errors::{Error, Result};
use storage::Storage;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> errors::Result<()> {
    let config = config();

    shared::tracing::setup_tracing(config.log_json);

    let conn = init_db().await?;
    let storage = Storage::new(config.images_dir.clone(), config.files_dir.clone());

    let app = app::create(AppParams {
        db: conn,
        storage,
        router: |state| {
            Router::new()
                .merge(notes::router(state.clone()))
                .merge(users::router(state))
        },
    })
    .await?;

    let app = shared::tracing::add_tracing_layer(app);

    let port = config.port;
    let listener = TcpListener::bind(format!("127.0.0.1:{port}"))
        .await
        .map_err(|e| Error::Unexpected(format!("failed to bind port {port}: {e}")))?;

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("listening on http://{addr}");
    }

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Unexpected(format!("server error: {e}")))?;

    Ok(())
}

#[cfg(test)]
pub mod tests {
    use axum::Router;
    use axum_test::TestServer;
    use tempfile::TempDir;

    use crate::{
        app::{create, AppParams},
        errors::Result,
        state::AppState,
        storage::Storage,
        DB,
    };

    pub struct TestApp {
        pub server: TestServer,
        pub storage: Storage,
        _dir: TempDir,
    }

    /// App with both storage roots in a fresh temporary directory.
    pub async fn test_server<R>(db: DB, router: R) -> Result<TestApp>
    where
        R: FnOnce(AppState) -> Router,
    {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("images"), dir.path().join("files"));

        let app = create(AppParams {
            db,
            storage: storage.clone(),
            router,
        })
        .await?;

        Ok(TestApp {
            server: TestServer::new(app).unwrap(),
            storage,
            _dir: dir,
        })
    }
}
