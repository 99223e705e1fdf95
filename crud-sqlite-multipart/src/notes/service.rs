//! Note use cases: the note aggregate together with its files on disk.
//!
//! Database changes of one operation commit in a single transaction. Disk
//! writes happen before that commit and disk deletes after it, so a failure
//! on either side leaves at worst an orphan file, never a row pointing at a
//! missing file. Files written by a call that then fails are removed again on
//! a best-effort basis.
//!
//! A note that does not exist and a note owned by someone else are treated
//! the same way: reads return `None`, writes do nothing.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::DB,
    storage::{self, Storage, StorageRoot, Upload},
    Result,
};

use super::{repository, tags, CreateNote, Note, NoteFile, NoteImage, UpdateNote};

#[derive(Clone)]
pub struct NoteService {
    db: DB,
    storage: Storage,
}

impl NoteService {
    pub fn new(db: DB, storage: Storage) -> Self {
        Self { db, storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub async fn get_notes(&self, owner_id: &str) -> Result<Vec<Note>> {
        let owner_id = owner_id.to_owned();
        let notes = self
            .db
            .call(move |conn| Ok(repository::list_by_owner(conn, &owner_id)?))
            .await?;
        Ok(notes)
    }

    pub async fn get_note(&self, id: Uuid, owner_id: &str) -> Result<Option<Note>> {
        let owner_id = owner_id.to_owned();
        let note = self
            .db
            .call(move |conn| Ok(repository::get_by_id_and_owner(conn, id, &owner_id)?))
            .await?;
        Ok(note)
    }

    /// Creates a note with its uploads and tags. `created_at` is always the
    /// current time.
    pub async fn create_note(&self, create: CreateNote, owner_id: &str) -> Result<Note> {
        let CreateNote {
            draft,
            image_uploads,
            file_uploads,
            tags: tag_string,
        } = create;

        let mut note = Note {
            id: Uuid::now_v7(),
            title: draft.title,
            content: draft.content,
            created_at: Utc::now(),
            owner_id: owner_id.to_owned(),
            images: Vec::new(),
            files: Vec::new(),
            tags: Vec::new(),
        };

        let mut written = Vec::new();
        if let Err(error) = self
            .attach_uploads(&mut note, &image_uploads, &file_uploads, &mut written)
            .await
        {
            self.discard(&written).await;
            return Err(error);
        }

        let tag_names = tags::parse_tag_names(tag_string.as_deref());
        let saved = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                note.tags = tags::resolve(&tx, &tag_names)?;
                repository::save(&tx, &note)?;
                tx.commit()?;
                Ok(note)
            })
            .await;

        let mut note = match saved {
            Ok(note) => note,
            Err(error) => {
                self.discard(&written).await;
                return Err(error.into());
            }
        };
        note.tags.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::info!(
            note_id = %note.id,
            owner_id = %note.owner_id,
            images = note.images.len(),
            files = note.files.len(),
            tags = note.tags.len(),
            "notes: created"
        );

        Ok(note)
    }

    /// Applies an edit to an owned note. Does nothing when the note is absent.
    ///
    /// Listed children are detached before new uploads are attached, and the
    /// tag set is replaced as a whole. Disk files of detached children are
    /// deleted only once the new state is committed.
    pub async fn update_note(&self, id: Uuid, update: UpdateNote, owner_id: &str) -> Result<()> {
        let Some(note) = self.get_note(id, owner_id).await? else {
            tracing::debug!(note_id = %id, owner_id, "notes: update skipped, note not found");
            return Ok(());
        };

        self.apply_update(note, update).await
    }

    /// Applies an edit to a loaded note. The note may have been deleted since
    /// it was loaded; the save is then skipped and the new uploads discarded.
    async fn apply_update(&self, mut note: Note, update: UpdateNote) -> Result<()> {
        let UpdateNote {
            title,
            content,
            created_at,
            image_uploads,
            file_uploads,
            delete_image_ids,
            delete_file_ids,
            tags: tag_string,
        } = update;

        let id = note.id;
        let owner_id = note.owner_id.clone();

        note.title = title;
        note.content = content;
        if let Some(created_at) = created_at {
            note.created_at = created_at;
        }

        let removed_images = note.take_images(&delete_image_ids);
        let removed_files = note.take_files(&delete_file_ids);

        let mut written = Vec::new();
        if let Err(error) = self
            .attach_uploads(&mut note, &image_uploads, &file_uploads, &mut written)
            .await
        {
            self.discard(&written).await;
            return Err(error);
        }

        let tag_names = tags::parse_tag_names(tag_string.as_deref());
        let saved = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                if !repository::exists(&tx, note.id, &note.owner_id)? {
                    return Ok(false);
                }
                note.tags = tags::resolve(&tx, &tag_names)?;
                repository::save(&tx, &note)?;
                tx.commit()?;
                Ok(true)
            })
            .await;

        match saved {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(note_id = %id, %owner_id, "notes: update skipped, note deleted meanwhile");
                self.discard(&written).await;
                return Ok(());
            }
            Err(error) => {
                self.discard(&written).await;
                return Err(error.into());
            }
        }

        tracing::info!(
            note_id = %id,
            %owner_id,
            removed_images = removed_images.len(),
            removed_files = removed_files.len(),
            added = written.len(),
            "notes: updated"
        );

        self.delete_from_disk(&stored_names(removed_images, removed_files))
            .await
    }

    /// Deletes an owned note and every file it owns on disk. Does nothing
    /// when the note is absent.
    pub async fn delete_note(&self, id: Uuid, owner_id: &str) -> Result<()> {
        let owner = owner_id.to_owned();
        let removed = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let note = repository::get_by_id_and_owner(&tx, id, &owner)?;
                if note.is_some() {
                    repository::remove(&tx, id, &owner)?;
                }
                tx.commit()?;
                Ok(note)
            })
            .await?;

        let Some(note) = removed else {
            tracing::debug!(note_id = %id, owner_id, "notes: delete skipped, note not found");
            return Ok(());
        };

        tracing::info!(note_id = %id, owner_id, "notes: deleted");

        self.delete_from_disk(&stored_names(note.images, note.files))
            .await
    }

    pub async fn delete_image(&self, note_id: Uuid, image_id: Uuid, owner_id: &str) -> Result<()> {
        let owner = owner_id.to_owned();
        let removed = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let image = repository::get_image(&tx, note_id, image_id, &owner)?;
                if let Some(image) = &image {
                    repository::remove_image(&tx, image.id)?;
                }
                tx.commit()?;
                Ok(image)
            })
            .await?;

        match removed {
            Some(image) => {
                tracing::info!(%note_id, %image_id, "notes: image deleted");
                self.delete_from_disk(&stored_names(vec![image], vec![])).await
            }
            None => Ok(()),
        }
    }

    pub async fn delete_file(&self, note_id: Uuid, file_id: Uuid, owner_id: &str) -> Result<()> {
        let owner = owner_id.to_owned();
        let removed = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let file = repository::get_file(&tx, note_id, file_id, &owner)?;
                if let Some(file) = &file {
                    repository::remove_file(&tx, file.id)?;
                }
                tx.commit()?;
                Ok(file)
            })
            .await?;

        match removed {
            Some(file) => {
                tracing::info!(%note_id, %file_id, "notes: file deleted");
                self.delete_from_disk(&stored_names(vec![], vec![file])).await
            }
            None => Ok(()),
        }
    }

    /// Authorizes a download. The caller still has to check that the file is
    /// present on disk.
    pub async fn get_file_for_download(&self, stored_name: &str, owner_id: &str) -> Result<Option<NoteFile>> {
        let stored_name = stored_name.to_owned();
        let owner_id = owner_id.to_owned();
        let file = self
            .db
            .call(move |conn| Ok(repository::get_file_by_stored_name(conn, &stored_name, &owner_id)?))
            .await?;
        Ok(file)
    }

    pub async fn get_image_for_display(&self, stored_name: &str, owner_id: &str) -> Result<Option<NoteImage>> {
        let stored_name = stored_name.to_owned();
        let owner_id = owner_id.to_owned();
        let image = self
            .db
            .call(move |conn| Ok(repository::get_image_by_stored_name(conn, &stored_name, &owner_id)?))
            .await?;
        Ok(image)
    }

    /// Stores every non-empty upload and attaches it to the note. Each stored
    /// name is pushed to `written` as soon as it exists on disk.
    async fn attach_uploads(
        &self,
        note: &mut Note,
        image_uploads: &[Upload],
        file_uploads: &[Upload],
        written: &mut Vec<(StorageRoot, String)>,
    ) -> Result<()> {
        for upload in image_uploads.iter().filter(|u| !u.is_empty()) {
            let stored_name = self.storage.store(StorageRoot::Images, upload).await?;
            written.push((StorageRoot::Images, stored_name.clone()));
            note.images.push(NoteImage {
                id: Uuid::now_v7(),
                note_id: note.id,
                stored_name,
            });
        }

        for upload in file_uploads.iter().filter(|u| !u.is_empty()) {
            let stored_name = self.storage.store(StorageRoot::Files, upload).await?;
            written.push((StorageRoot::Files, stored_name.clone()));
            note.files.push(NoteFile {
                id: Uuid::now_v7(),
                note_id: note.id,
                stored_name,
                original_name: upload.file_name.clone(),
                content_type: upload.content_type.clone(),
            });
        }

        Ok(())
    }

    /// Deletes stored files whose rows are already gone. Every delete is
    /// attempted; the first failure is returned.
    async fn delete_from_disk(&self, stored: &[(StorageRoot, String)]) -> Result<()> {
        let mut first_error: Option<storage::Error> = None;

        for (root, stored_name) in stored {
            if let Err(error) = self.storage.delete(*root, stored_name).await {
                tracing::warn!(%stored_name, %error, "notes: failed to delete stored file");
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Removes files written by an operation that did not commit.
    async fn discard(&self, written: &[(StorageRoot, String)]) {
        for (root, stored_name) in written {
            if let Err(error) = self.storage.delete(*root, stored_name).await {
                tracing::warn!(%stored_name, %error, "notes: failed to discard uncommitted upload");
            }
        }
    }
}

fn stored_names(images: Vec<NoteImage>, files: Vec<NoteFile>) -> Vec<(StorageRoot, String)> {
    images
        .into_iter()
        .map(|image| (StorageRoot::Images, image.stored_name))
        .chain(files.into_iter().map(|file| (StorageRoot::Files, file.stored_name)))
        .collect()
}
