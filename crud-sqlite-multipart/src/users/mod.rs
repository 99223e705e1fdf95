mod routes;

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    named_params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput},
    ToSql,
};
use serde::{Deserialize, Serialize};

use crate::{
    ctx::User,
    db::{self, DB},
    notes::repository,
};

pub use routes::router;

/// Identity string handed over by the authenticating proxy.
pub type UserId = String;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    #[default]
    Member,
    Guest,
}

impl Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_lowercase())
    }
}

impl FromStr for UserRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            "guest" => Ok(Self::Guest),
            other => Err(crate::Error::Validation(format!("Unknown role '{other}'"))),
        }
    }
}

impl FromSql for UserRole {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().and_then(|v| {
            serde_json::from_str::<UserRole>(&format!("\"{}\"", v)).map_err(|_| FromSqlError::InvalidType)
        })
    }
}

impl ToSql for UserRole {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserStats {
    pub id: UserId,
    pub email: Option<String>,
    pub role: UserRole,
    pub note_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserStatsResponse {
    pub results: Vec<UserStats>,
}

/// Records the caller in the users table, refreshing email and role when
/// they changed upstream.
pub async fn register(db: &DB, user: &User) -> db::Result<()> {
    let user = user.clone();
    db.call(move |conn| {
        conn.execute(
            r#"INSERT INTO users (id, email, role) VALUES (:id, :email, :role)
            ON CONFLICT(id) DO UPDATE SET
                email = coalesce(excluded.email, users.email),
                role = excluded.role,
                updated_at = CURRENT_TIMESTAMP
            WHERE users.role IS NOT excluded.role
                OR (excluded.email IS NOT NULL AND users.email IS NOT excluded.email)"#,
            named_params! {
                ":id": user.id,
                ":email": user.email,
                ":role": user.role,
            },
        )?;
        Ok(())
    })
    .await?;

    Ok(())
}

/// Every known user with the number of notes they own.
pub async fn stats(db: &DB) -> db::Result<Vec<UserStats>> {
    let stats = db
        .call(|conn| {
            let counts = repository::count_by_owner(conn)?;

            let stats = conn
                .prepare("SELECT id, email, role FROM users ORDER BY created_at, id")?
                .query_map([], |row| {
                    let id: UserId = row.get(0)?;
                    Ok(UserStats {
                        note_count: counts.get(&id).copied().unwrap_or_default(),
                        id,
                        email: row.get(1)?,
                        role: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(stats)
        })
        .await?;

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_test_db, Result};

    fn user(id: &str, email: Option<&str>, role: UserRole) -> User {
        User {
            id: id.into(),
            email: email.map(Into::into),
            role,
        }
    }

    #[test]
    fn parses_roles() {
        assert_eq!("admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert_eq!(" Guest ".parse::<UserRole>().unwrap(), UserRole::Guest);
        assert!("root".parse::<UserRole>().is_err());
        assert_eq!(UserRole::Member.to_string(), "member");
    }

    #[tokio::test]
    async fn register_is_an_upsert() -> Result<()> {
        let db = init_test_db().await?;

        register(&db, &user("user1", Some("a@mail.com"), UserRole::Member)).await?;
        register(&db, &user("user1", None, UserRole::Admin)).await?;

        let stats = stats(&db).await?;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].email.as_deref(), Some("a@mail.com"));
        assert_eq!(stats[0].role, UserRole::Admin);
        Ok(())
    }

    #[tokio::test]
    async fn stats_count_owned_notes() -> Result<()> {
        let db = init_test_db().await?;
        register(&db, &user("user1", Some("a@mail.com"), UserRole::Member)).await?;
        register(&db, &user("user2", Some("b@mail.com"), UserRole::Guest)).await?;

        db.call(|conn| {
            conn.execute_batch(
                r#"
                INSERT INTO notes (title, content, owner_id) VALUES ('first', '1', 'user1');
                INSERT INTO notes (title, content, owner_id) VALUES ('second', '2', 'user1');
                "#,
            )?;
            Ok(())
        })
        .await?;

        let stats = stats(&db).await?;
        let count = |id: &str| stats.iter().find(|s| s.id == id).map(|s| s.note_count);

        assert_eq!(count("user1"), Some(2));
        assert_eq!(count("user2"), Some(0));
        Ok(())
    }
}
