use indexmap::IndexSet;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::Tag;

/// Splits a comma-separated tag string into distinct, trimmed, non-empty
/// names. Matching is exact and case-sensitive; first occurrence wins.
pub fn parse_tag_names(tags: Option<&str>) -> Vec<String> {
    tags.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// Finds or creates a tag row for every name.
///
/// Relies on the unique index on `tags.name`, so calling this repeatedly with
/// overlapping names inside one transaction never produces duplicates.
pub fn resolve(conn: &Connection, names: &[String]) -> rusqlite::Result<Vec<Tag>> {
    let mut insert = conn.prepare_cached("INSERT INTO tags (id, name) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")?;
    let mut select = conn.prepare_cached("SELECT id, name FROM tags WHERE name = ?")?;

    let tags = names
        .iter()
        .map(|name| {
            let inserted = insert.execute(params![Uuid::now_v7(), name])?;
            if inserted > 0 {
                tracing::debug!(tag = %name, "tags: created");
            }
            select.query_row(params![name], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
        })
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(tags)
}

pub fn find_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<Tag>> {
    conn.query_row("SELECT id, name FROM tags WHERE name = ?", params![name], |row| {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_test_db, Result};

    #[test]
    fn parses_comma_separated_names() {
        assert_eq!(parse_tag_names(Some("a, b, a")), vec!["a", "b"]);
        assert_eq!(parse_tag_names(Some(" rust ,, web ,")), vec!["rust", "web"]);
        assert_eq!(parse_tag_names(Some("Rust,rust")), vec!["Rust", "rust"]);
        assert!(parse_tag_names(Some("")).is_empty());
        assert!(parse_tag_names(Some(" , ,")).is_empty());
        assert!(parse_tag_names(None).is_empty());
    }

    #[tokio::test]
    async fn resolve_creates_missing_tags() -> Result<()> {
        let db = init_test_db().await?;

        let tags = db
            .call(|conn| Ok(resolve(conn, &parse_tag_names(Some("tag1, tag2")))?))
            .await?;

        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "tag1");
        assert_eq!(tags[1].name, "tag2");
        Ok(())
    }

    #[tokio::test]
    async fn resolve_reuses_existing_tags() -> Result<()> {
        let db = init_test_db().await?;

        let (first, second, count) = db
            .call(|conn| {
                let tx = conn.transaction()?;
                let first = resolve(&tx, &parse_tag_names(Some("a, b")))?;
                let second = resolve(&tx, &parse_tag_names(Some("b, c, a")))?;
                tx.commit()?;

                let count = conn.query_row::<u32, _, _>("SELECT count(*) FROM tags", [], |r| r.get(0))?;
                Ok((first, second, count))
            })
            .await?;

        assert_eq!(count, 3);
        assert_eq!(first[0], second[2]);
        assert_eq!(first[1], second[0]);
        Ok(())
    }

    #[tokio::test]
    async fn find_by_name_is_exact() -> Result<()> {
        let db = init_test_db().await?;

        let (exact, other_case) = db
            .call(|conn| {
                resolve(conn, &["Rust".to_string()])?;
                Ok((find_by_name(conn, "Rust")?, find_by_name(conn, "rust")?))
            })
            .await?;

        assert!(exact.is_some());
        assert!(other_case.is_none());
        Ok(())
    }
}
