use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{storage::Upload, users::UserId};

pub const TITLE_MAX_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub owner_id: UserId,
    pub images: Vec<NoteImage>,
    pub files: Vec<NoteFile>,
    pub tags: Vec<Tag>,
}

impl Note {
    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(|t| t.name.as_str()).collect()
    }

    /// Detaches the listed images, returning what was removed. Ids that do
    /// not belong to this note are ignored.
    pub fn take_images(&mut self, ids: &[Uuid]) -> Vec<NoteImage> {
        let (removed, kept) = std::mem::take(&mut self.images)
            .into_iter()
            .partition(|image| ids.contains(&image.id));
        self.images = kept;
        removed
    }

    pub fn take_files(&mut self, ids: &[Uuid]) -> Vec<NoteFile> {
        let (removed, kept) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|file| ids.contains(&file.id));
        self.files = kept;
        removed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteImage {
    pub id: Uuid,
    pub note_id: Uuid,
    pub stored_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteFile {
    pub id: Uuid,
    pub note_id: Uuid,
    pub stored_name: String,
    pub original_name: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

/// User-supplied fields of a note that is about to be created.
#[derive(Debug, Clone, Default)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct CreateNote {
    pub draft: NoteDraft,
    pub image_uploads: Vec<Upload>,
    pub file_uploads: Vec<Upload>,
    pub tags: Option<String>,
}

#[derive(Debug, Default)]
pub struct UpdateNote {
    pub title: String,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
    pub image_uploads: Vec<Upload>,
    pub file_uploads: Vec<Upload>,
    pub delete_image_ids: Vec<Uuid>,
    pub delete_file_ids: Vec<Uuid>,
    pub tags: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FindNotesResponse {
    pub results: Vec<Note>,
}

/// Checks the title and content rules. Returns the first violation.
pub fn validate_fields(title: &str, content: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("Title is required".into());
    }
    if title.chars().count() > TITLE_MAX_LEN {
        return Err(format!("Title cannot be longer than {TITLE_MAX_LEN} characters"));
    }
    if content.trim().is_empty() {
        return Err("Content is required".into());
    }
    Ok(())
}
