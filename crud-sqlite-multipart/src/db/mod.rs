mod migrations;

use rusqlite::functions::FunctionFlags;
use uuid::Uuid;

use crate::config::config;

pub use rusqlite;
pub use tokio_rusqlite;

use migrations::MIGRATIONS;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not_found")]
    NotFound(String),
    #[error(transparent)]
    TokioRusqlite(tokio_rusqlite::Error),
    #[error(transparent)]
    Rusqlite(rusqlite::Error),
    #[error(transparent)]
    Migration(#[from] rusqlite_migration::Error),
}

impl From<tokio_rusqlite::Error> for Error {
    fn from(error: tokio_rusqlite::Error) -> Self {
        match error {
            tokio_rusqlite::Error::Rusqlite(rusqlite::Error::QueryReturnedNoRows) => Self::NotFound("Not found".into()),
            tokio_rusqlite::Error::Other(err) if err.is::<rusqlite_migration::Error>() => match err.downcast() {
                Ok(err) => Self::Migration(*err),
                Err(err) => Self::TokioRusqlite(tokio_rusqlite::Error::Other(err)),
            },
            error => Self::TokioRusqlite(error),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Self::Rusqlite(error)
    }
}

pub type DB = tokio_rusqlite::Connection;

pub async fn init_db() -> Result<DB> {
    let conn = tokio_rusqlite::Connection::open(&config().database_url).await?;

    conn.call(|conn| {
        add_uuid_functions(conn)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        MIGRATIONS
            .to_latest(conn)
            .map_err(|e| tokio_rusqlite::Error::Other(e.into()))?;

        Ok(())
    })
    .await?;

    tracing::debug!(path = %config().database_url, "database ready");

    Ok(conn)
}

#[cfg(test)]
pub async fn init_test_db() -> Result<DB> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;

    conn.call(|conn| {
        add_uuid_functions(conn)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;

        MIGRATIONS
            .to_latest(conn)
            .map_err(|e| tokio_rusqlite::Error::Other(e.into()))?;

        Ok(())
    })
    .await?;

    Ok(conn)
}

fn add_uuid_functions(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function("uuid7_now", 0, FunctionFlags::SQLITE_UTF8, |_| Ok(Uuid::now_v7()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_valid() {
        assert!(MIGRATIONS.validate().is_ok());
    }

    #[tokio::test]
    async fn cascades_are_enabled() -> Result<()> {
        let db = init_test_db().await?;

        let foreign_keys = db
            .call(|conn| Ok(conn.query_row::<i64, _, _>("PRAGMA foreign_keys", [], |r| r.get(0))?))
            .await?;

        assert_eq!(foreign_keys, 1);
        Ok(())
    }

    #[tokio::test]
    async fn ids_default_to_uuid7() -> Result<()> {
        let db = init_test_db().await?;

        let id = db
            .call(|conn| {
                conn.execute("INSERT INTO tags (name) VALUES ('a')", [])?;
                Ok(conn.query_row::<Uuid, _, _>("SELECT id FROM tags WHERE name = 'a'", [], |r| r.get(0))?)
            })
            .await?;

        assert_eq!(id.get_version_num(), 7);
        Ok(())
    }
}
