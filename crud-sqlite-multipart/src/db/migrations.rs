use lazy_static::lazy_static;
use rusqlite_migration::{Migrations, M};

lazy_static! {
    pub static ref MIGRATIONS: Migrations<'static> = Migrations::new(vec![
        M::up(
            r#"
            CREATE TABLE users (
                id TEXT PRIMARY KEY NOT NULL,
                email TEXT,
                role TEXT NOT NULL DEFAULT 'member', -- admin | member | guest

                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME
            );
        "#
        ),
        M::up(
            r#"
            CREATE TABLE notes (
                id BLOB PRIMARY KEY CHECK(length(id) = 16) NOT NULL UNIQUE DEFAULT (uuid7_now()),

                title TEXT NOT NULL CHECK(length(title) BETWEEN 1 AND 100),
                content TEXT NOT NULL,
                owner_id TEXT NOT NULL,

                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX notes_owner_created_at ON notes (owner_id, created_at DESC);
        "#
        ),
        M::up(
            r#"
            CREATE TABLE note_images (
                id BLOB PRIMARY KEY CHECK(length(id) = 16) NOT NULL UNIQUE DEFAULT (uuid7_now()),
                note_id BLOB NOT NULL CHECK(length(note_id) = 16),
                stored_name TEXT NOT NULL UNIQUE,

                FOREIGN KEY (note_id) REFERENCES notes (id) ON DELETE CASCADE
            );

            CREATE INDEX note_images_note_id ON note_images (note_id);

            CREATE TABLE note_files (
                id BLOB PRIMARY KEY CHECK(length(id) = 16) NOT NULL UNIQUE DEFAULT (uuid7_now()),
                note_id BLOB NOT NULL CHECK(length(note_id) = 16),
                stored_name TEXT NOT NULL UNIQUE,
                original_name TEXT NOT NULL,
                content_type TEXT NOT NULL,

                FOREIGN KEY (note_id) REFERENCES notes (id) ON DELETE CASCADE
            );

            CREATE INDEX note_files_note_id ON note_files (note_id);
        "#
        ),
        M::up(
            r#"
            CREATE TABLE tags (
                id BLOB PRIMARY KEY CHECK(length(id) = 16) NOT NULL UNIQUE DEFAULT (uuid7_now()),
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE note_tags (
                note_id BLOB NOT NULL CHECK(length(note_id) = 16),
                tag_id BLOB NOT NULL CHECK(length(tag_id) = 16),

                PRIMARY KEY (note_id, tag_id),
                FOREIGN KEY (note_id) REFERENCES notes (id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags (id)
            );
        "#
        ),
    ]);
}
