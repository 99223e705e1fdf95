//! Persistence of the note aggregate.
//!
//! Every read that takes an owner id filters on it in SQL, so a note owned by
//! somebody else looks exactly like a note that does not exist.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use uuid::Uuid;

use super::{Note, NoteFile, NoteImage, Tag};

impl<'a> TryFrom<&Row<'a>> for Note {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'a>) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            created_at: row.get(3)?,
            owner_id: row.get(4)?,
            images: Vec::new(),
            files: Vec::new(),
            tags: Vec::new(),
        })
    }
}

impl<'a> TryFrom<&Row<'a>> for NoteImage {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'a>) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: row.get(0)?,
            note_id: row.get(1)?,
            stored_name: row.get(2)?,
        })
    }
}

impl<'a> TryFrom<&Row<'a>> for NoteFile {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'a>) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: row.get(0)?,
            note_id: row.get(1)?,
            stored_name: row.get(2)?,
            original_name: row.get(3)?,
            content_type: row.get(4)?,
        })
    }
}

pub fn list_by_owner(conn: &Connection, owner_id: &str) -> rusqlite::Result<Vec<Note>> {
    let mut notes = conn
        .prepare(
            r#"SELECT id, title, content, created_at, owner_id FROM notes
            WHERE owner_id = ?
            ORDER BY created_at DESC, id DESC"#,
        )?
        .query_map(params![owner_id], |row| Note::try_from(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    load_children(conn, &mut notes, "n.owner_id = ?1", &[&owner_id])?;

    Ok(notes)
}

pub fn get_by_id_and_owner(conn: &Connection, id: Uuid, owner_id: &str) -> rusqlite::Result<Option<Note>> {
    let note = conn
        .query_row(
            "SELECT id, title, content, created_at, owner_id FROM notes WHERE id = ? AND owner_id = ?",
            params![id, owner_id],
            |row| Note::try_from(row),
        )
        .optional()?;

    let Some(note) = note else {
        return Ok(None);
    };

    let mut notes = [note];
    load_children(conn, &mut notes, "n.id = ?1 AND n.owner_id = ?2", &[&id, &owner_id])?;
    let [note] = notes;

    Ok(Some(note))
}

pub fn exists(conn: &Connection, id: Uuid, owner_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM notes WHERE id = ? AND owner_id = ?)",
        params![id, owner_id],
        |row| row.get(0),
    )
}

fn load_children(conn: &Connection, notes: &mut [Note], filter: &str, values: &[&dyn ToSql]) -> rusqlite::Result<()> {
    let positions = notes
        .iter()
        .enumerate()
        .map(|(i, note)| (note.id, i))
        .collect::<HashMap<_, _>>();

    let images = conn
        .prepare(&format!(
            r#"SELECT i.id, i.note_id, i.stored_name FROM note_images i
            JOIN notes n ON n.id = i.note_id
            WHERE {filter}
            ORDER BY i.id"#
        ))?
        .query_map(values, |row| NoteImage::try_from(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for image in images {
        if let Some(&i) = positions.get(&image.note_id) {
            notes[i].images.push(image);
        }
    }

    let files = conn
        .prepare(&format!(
            r#"SELECT f.id, f.note_id, f.stored_name, f.original_name, f.content_type FROM note_files f
            JOIN notes n ON n.id = f.note_id
            WHERE {filter}
            ORDER BY f.id"#
        ))?
        .query_map(values, |row| NoteFile::try_from(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for file in files {
        if let Some(&i) = positions.get(&file.note_id) {
            notes[i].files.push(file);
        }
    }

    let tags = conn
        .prepare(&format!(
            r#"SELECT nt.note_id, t.id, t.name FROM note_tags nt
            JOIN tags t ON t.id = nt.tag_id
            JOIN notes n ON n.id = nt.note_id
            WHERE {filter}
            ORDER BY t.name"#
        ))?
        .query_map(values, |row| {
            Ok((
                row.get::<_, Uuid>(0)?,
                Tag {
                    id: row.get(1)?,
                    name: row.get(2)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (note_id, tag) in tags {
        if let Some(&i) = positions.get(&note_id) {
            notes[i].tags.push(tag);
        }
    }

    Ok(())
}

/// Inserts or updates the note row and brings its child rows in line with
/// the aggregate: children missing from `note` are deleted, new ones are
/// inserted and tag links are replaced.
///
/// The owner column is written on insert only. Tag rows referenced by
/// `note.tags` must already exist, so callers resolve tags in the same
/// transaction first.
pub fn save(conn: &Connection, note: &Note) -> rusqlite::Result<()> {
    let written = conn.execute(
        r#"INSERT INTO notes (id, title, content, created_at, owner_id) VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(id) DO UPDATE SET title = excluded.title, content = excluded.content, created_at = excluded.created_at
        WHERE notes.owner_id = excluded.owner_id"#,
        params![note.id, note.title, note.content, note.created_at, note.owner_id],
    )?;

    if written == 0 {
        // the id exists under another owner
        return Err(rusqlite::Error::QueryReturnedNoRows);
    }

    let image_ids = note.images.iter().map(|i| i.id).collect::<HashSet<_>>();
    for stale in child_ids(conn, "SELECT id FROM note_images WHERE note_id = ?", note.id)? {
        if !image_ids.contains(&stale) {
            conn.execute("DELETE FROM note_images WHERE id = ?", params![stale])?;
        }
    }

    let mut insert_image = conn.prepare_cached(
        "INSERT INTO note_images (id, note_id, stored_name) VALUES (?, ?, ?) ON CONFLICT(id) DO NOTHING",
    )?;
    for image in &note.images {
        insert_image.execute(params![image.id, note.id, image.stored_name])?;
    }

    let file_ids = note.files.iter().map(|f| f.id).collect::<HashSet<_>>();
    for stale in child_ids(conn, "SELECT id FROM note_files WHERE note_id = ?", note.id)? {
        if !file_ids.contains(&stale) {
            conn.execute("DELETE FROM note_files WHERE id = ?", params![stale])?;
        }
    }

    let mut insert_file = conn.prepare_cached(
        r#"INSERT INTO note_files (id, note_id, stored_name, original_name, content_type) VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO NOTHING"#,
    )?;
    for file in &note.files {
        insert_file.execute(params![file.id, note.id, file.stored_name, file.original_name, file.content_type])?;
    }

    conn.execute("DELETE FROM note_tags WHERE note_id = ?", params![note.id])?;
    let mut link_tag =
        conn.prepare_cached("INSERT INTO note_tags (note_id, tag_id) VALUES (?, ?) ON CONFLICT DO NOTHING")?;
    for tag in &note.tags {
        link_tag.execute(params![note.id, tag.id])?;
    }

    Ok(())
}

fn child_ids(conn: &Connection, sql: &str, note_id: Uuid) -> rusqlite::Result<Vec<Uuid>> {
    let ids = conn
        .prepare(sql)?
        .query_map(params![note_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Deletes the note row. Image, file and tag link rows go with it through
/// `ON DELETE CASCADE`; files on disk are left to the caller.
pub fn remove(conn: &Connection, id: Uuid, owner_id: &str) -> rusqlite::Result<bool> {
    let deleted = conn.execute("DELETE FROM notes WHERE id = ? AND owner_id = ?", params![id, owner_id])?;
    Ok(deleted > 0)
}

pub fn get_image(conn: &Connection, note_id: Uuid, image_id: Uuid, owner_id: &str) -> rusqlite::Result<Option<NoteImage>> {
    conn.query_row(
        r#"SELECT i.id, i.note_id, i.stored_name FROM note_images i
        JOIN notes n ON n.id = i.note_id
        WHERE i.id = ? AND i.note_id = ? AND n.owner_id = ?"#,
        params![image_id, note_id, owner_id],
        |row| NoteImage::try_from(row),
    )
    .optional()
}

pub fn get_image_by_stored_name(conn: &Connection, stored_name: &str, owner_id: &str) -> rusqlite::Result<Option<NoteImage>> {
    conn.query_row(
        r#"SELECT i.id, i.note_id, i.stored_name FROM note_images i
        JOIN notes n ON n.id = i.note_id
        WHERE i.stored_name = ? AND n.owner_id = ?"#,
        params![stored_name, owner_id],
        |row| NoteImage::try_from(row),
    )
    .optional()
}

pub fn get_file(conn: &Connection, note_id: Uuid, file_id: Uuid, owner_id: &str) -> rusqlite::Result<Option<NoteFile>> {
    conn.query_row(
        r#"SELECT f.id, f.note_id, f.stored_name, f.original_name, f.content_type FROM note_files f
        JOIN notes n ON n.id = f.note_id
        WHERE f.id = ? AND f.note_id = ? AND n.owner_id = ?"#,
        params![file_id, note_id, owner_id],
        |row| NoteFile::try_from(row),
    )
    .optional()
}

pub fn get_file_by_stored_name(conn: &Connection, stored_name: &str, owner_id: &str) -> rusqlite::Result<Option<NoteFile>> {
    conn.query_row(
        r#"SELECT f.id, f.note_id, f.stored_name, f.original_name, f.content_type FROM note_files f
        JOIN notes n ON n.id = f.note_id
        WHERE f.stored_name = ? AND n.owner_id = ?"#,
        params![stored_name, owner_id],
        |row| NoteFile::try_from(row),
    )
    .optional()
}

pub fn remove_image(conn: &Connection, image_id: Uuid) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM note_images WHERE id = ?", params![image_id])? > 0)
}

pub fn remove_file(conn: &Connection, file_id: Uuid) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM note_files WHERE id = ?", params![file_id])? > 0)
}

pub fn count_by_owner(conn: &Connection) -> rusqlite::Result<HashMap<String, u32>> {
    let counts = conn
        .prepare("SELECT owner_id, count(*) FROM notes GROUP BY owner_id")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::{
        db::{init_test_db, Result, DB},
        notes::tags,
    };

    fn new_note(owner_id: &str, title: &str) -> Note {
        Note {
            id: Uuid::now_v7(),
            title: title.into(),
            content: format!("{title} content"),
            created_at: Utc::now(),
            owner_id: owner_id.into(),
            images: vec![],
            files: vec![],
            tags: vec![],
        }
    }

    fn with_children(mut note: Note) -> Note {
        note.images.push(NoteImage {
            id: Uuid::now_v7(),
            note_id: note.id,
            stored_name: format!("{}.png", Uuid::new_v4()),
        });
        note.files.push(NoteFile {
            id: Uuid::now_v7(),
            note_id: note.id,
            stored_name: format!("{}.pdf", Uuid::new_v4()),
            original_name: "report.pdf".into(),
            content_type: "application/pdf".into(),
        });
        note
    }

    async fn insert(db: &DB, note: Note, tag_names: &'static str) -> Result<Note> {
        let note = db
            .call(move |conn| {
                let mut note = note;
                let tx = conn.transaction()?;
                note.tags = tags::resolve(&tx, &tags::parse_tag_names(Some(tag_names)))?;
                save(&tx, &note)?;
                tx.commit()?;
                Ok(note)
            })
            .await?;
        Ok(note)
    }

    #[tokio::test]
    async fn save_and_get_round_trip() -> Result<()> {
        let db = init_test_db().await?;
        let note = insert(&db, with_children(new_note("user1", "first")), "a, b").await?;

        let id = note.id;
        let loaded = db
            .call(move |conn| Ok(get_by_id_and_owner(conn, id, "user1")?))
            .await?
            .unwrap();

        assert_eq!(loaded.title, "first");
        assert_eq!(loaded.images, note.images);
        assert_eq!(loaded.files, note.files);
        assert_eq!(loaded.tag_names(), vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn get_is_scoped_to_owner() -> Result<()> {
        let db = init_test_db().await?;
        let note = insert(&db, new_note("user1", "first"), "").await?;

        let id = note.id;
        let (own, foreign) = db
            .call(move |conn| Ok((get_by_id_and_owner(conn, id, "user1")?, get_by_id_and_owner(conn, id, "user2")?)))
            .await?;

        assert!(own.is_some());
        assert!(foreign.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_returns_only_owned_notes_newest_first() -> Result<()> {
        let db = init_test_db().await?;

        let mut older = new_note("user1", "older");
        older.created_at = Utc::now() - Duration::days(1);
        insert(&db, with_children(older), "x").await?;
        insert(&db, with_children(new_note("user1", "newer")), "y").await?;
        insert(&db, with_children(new_note("user2", "other")), "x").await?;

        let notes = db.call(|conn| Ok(list_by_owner(conn, "user1")?)).await?;

        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|n| n.owner_id == "user1"));
        assert_eq!(notes[0].title, "newer");
        assert_eq!(notes[1].title, "older");
        assert!(notes.iter().all(|n| n.images.len() == 1 && n.files.len() == 1 && n.tags.len() == 1));
        Ok(())
    }

    #[tokio::test]
    async fn save_syncs_children_and_keeps_owner() -> Result<()> {
        let db = init_test_db().await?;
        let mut note = insert(&db, with_children(new_note("user1", "first")), "a, b").await?;

        note.images.clear();
        note.title = "renamed".into();
        note.owner_id = "user1".into();
        let note = insert(&db, note, "b").await?;

        let id = note.id;
        let loaded = db
            .call(move |conn| Ok(get_by_id_and_owner(conn, id, "user1")?))
            .await?
            .unwrap();

        assert_eq!(loaded.title, "renamed");
        assert!(loaded.images.is_empty());
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.tag_names(), vec!["b"]);

        let tag_a = db.call(|conn| Ok(tags::find_by_name(conn, "a")?)).await?;
        assert!(tag_a.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn save_refuses_foreign_owner() -> Result<()> {
        let db = init_test_db().await?;
        let mut note = insert(&db, new_note("user1", "first"), "").await?;

        note.owner_id = "user2".into();
        note.title = "hijacked".into();
        let result = insert(&db, note.clone(), "").await;
        assert!(result.is_err());

        let id = note.id;
        let loaded = db
            .call(move |conn| Ok(get_by_id_and_owner(conn, id, "user1")?))
            .await?
            .unwrap();
        assert_eq!(loaded.title, "first");
        Ok(())
    }

    #[tokio::test]
    async fn remove_cascades_child_rows() -> Result<()> {
        let db = init_test_db().await?;
        let note = insert(&db, with_children(new_note("user1", "first")), "a").await?;

        let id = note.id;
        let (foreign, removed, images, files, links, tags) = db
            .call(move |conn| {
                let foreign = remove(conn, id, "user2")?;
                let removed = remove(conn, id, "user1")?;
                let count = |table: &str| {
                    conn.query_row::<u32, _, _>(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))
                };
                Ok((
                    foreign,
                    removed,
                    count("note_images")?,
                    count("note_files")?,
                    count("note_tags")?,
                    count("tags")?,
                ))
            })
            .await?;

        assert!(!foreign);
        assert!(removed);
        assert_eq!((images, files, links), (0, 0, 0));
        assert_eq!(tags, 1);
        Ok(())
    }

    #[tokio::test]
    async fn child_lookups_are_scoped_to_owner() -> Result<()> {
        let db = init_test_db().await?;
        let note = insert(&db, with_children(new_note("user1", "first")), "").await?;

        let image = note.images[0].clone();
        let file = note.files[0].clone();
        let note_id = note.id;

        let results = db
            .call(move |conn| {
                Ok((
                    get_image(conn, note_id, image.id, "user1")?.is_some(),
                    get_image(conn, note_id, image.id, "user2")?.is_some(),
                    get_image(conn, Uuid::now_v7(), image.id, "user1")?.is_some(),
                    get_file(conn, note_id, file.id, "user1")?.is_some(),
                    get_file(conn, note_id, file.id, "user2")?.is_some(),
                    get_file_by_stored_name(conn, &file.stored_name, "user1")?.is_some(),
                    get_file_by_stored_name(conn, &file.stored_name, "user2")?.is_some(),
                    get_image_by_stored_name(conn, &image.stored_name, "user2")?.is_some(),
                ))
            })
            .await?;

        assert_eq!(results, (true, false, false, true, false, true, false, false));
        Ok(())
    }

    #[tokio::test]
    async fn counts_notes_per_owner() -> Result<()> {
        let db = init_test_db().await?;
        insert(&db, new_note("user1", "a"), "").await?;
        insert(&db, new_note("user1", "b"), "").await?;
        insert(&db, new_note("user2", "c"), "").await?;

        let counts = db.call(|conn| Ok(count_by_owner(conn)?)).await?;

        assert_eq!(counts.get("user1"), Some(&2));
        assert_eq!(counts.get("user2"), Some(&1));
        assert_eq!(counts.get("user3"), None);
        Ok(())
    }
}
