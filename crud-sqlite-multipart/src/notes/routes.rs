use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::{
    ctx::{protected, Ctx},
    extract::{Multipart, Path},
    state::AppState,
    storage::{is_valid_stored_name, StorageRoot, Upload},
    Error, Result,
};

use super::{validate_fields, CreateNote, FindNotesResponse, Note, NoteDraft, NoteService, UpdateNote};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/notes", get(find_notes).post(create_note))
        .route(
            "/api/v1/notes/{note_id}",
            get(get_note).post(update_note).delete(delete_note),
        )
        .route("/api/v1/notes/{note_id}/images/{image_id}", delete(delete_image))
        .route("/api/v1/notes/{note_id}/files/{file_id}", delete(delete_file))
        .route("/api/v1/files/{stored_name}", get(download_file))
        .route("/api/v1/images/{stored_name}", get(show_image))
        .route_layer(middleware::from_fn(protected))
        .with_state(state)
}

async fn find_notes(State(notes): State<NoteService>, ctx: Ctx) -> Result<Json<FindNotesResponse>> {
    let user = ctx.require_user()?;
    let results = notes.get_notes(&user.id).await?;
    Ok(Json(FindNotesResponse { results }))
}

async fn get_note(Path(note_id): Path<Uuid>, State(notes): State<NoteService>, ctx: Ctx) -> Result<Json<Note>> {
    let user = ctx.require_user()?;
    notes
        .get_note(note_id, &user.id)
        .await?
        .map(Json)
        .ok_or_else(|| note_not_found(note_id))
}

async fn create_note(
    State(notes): State<NoteService>,
    ctx: Ctx,
    Multipart(multipart): Multipart,
) -> Result<(StatusCode, Json<Note>)> {
    let user = ctx.require_user()?;
    let create = read_note_form(multipart).await?.into_create()?;

    let note = notes.create_note(create, &user.id).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

async fn update_note(
    Path(note_id): Path<Uuid>,
    State(notes): State<NoteService>,
    ctx: Ctx,
    Multipart(multipart): Multipart,
) -> Result<Json<Note>> {
    let user = ctx.require_user()?;

    // the service ignores missing notes, the API reports them
    if notes.get_note(note_id, &user.id).await?.is_none() {
        return Err(note_not_found(note_id));
    }

    let update = read_note_form(multipart).await?.into_update()?;
    notes.update_note(note_id, update, &user.id).await?;

    notes
        .get_note(note_id, &user.id)
        .await?
        .map(Json)
        .ok_or_else(|| note_not_found(note_id))
}

async fn delete_note(Path(note_id): Path<Uuid>, State(notes): State<NoteService>, ctx: Ctx) -> Result<StatusCode> {
    let user = ctx.require_user()?;
    notes.delete_note(note_id, &user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_image(
    Path((note_id, image_id)): Path<(Uuid, Uuid)>,
    State(notes): State<NoteService>,
    ctx: Ctx,
) -> Result<StatusCode> {
    let user = ctx.require_user()?;
    notes.delete_image(note_id, image_id, &user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_file(
    Path((note_id, file_id)): Path<(Uuid, Uuid)>,
    State(notes): State<NoteService>,
    ctx: Ctx,
) -> Result<StatusCode> {
    let user = ctx.require_user()?;
    notes.delete_file(note_id, file_id, &user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download_file(
    Path(stored_name): Path<String>,
    State(notes): State<NoteService>,
    ctx: Ctx,
) -> Result<Response> {
    let user = ctx.require_user()?;
    let not_found = || Error::NotFound(format!("File '{stored_name}' not found"));

    if !is_valid_stored_name(&stored_name) {
        return Err(not_found());
    }

    let file = notes
        .get_file_for_download(&stored_name, &user.id)
        .await?
        .ok_or_else(not_found)?;

    let content = notes
        .storage()
        .read(StorageRoot::Files, &file.stored_name)
        .await?
        .ok_or_else(|| {
            tracing::warn!(stored_name = %file.stored_name, "notes: file row without stored content");
            not_found()
        })?;

    let headers = [
        (header::CONTENT_TYPE, file.content_type.clone()),
        (header::CONTENT_DISPOSITION, content_disposition(&file.original_name)),
    ];

    Ok((headers, content).into_response())
}

/// Uploaded images are served from the API origin, so an SVG must not run
/// scripts or load anything when opened directly.
const IMAGE_CSP: &str = "default-src 'none'; style-src 'unsafe-inline'; sandbox";

async fn show_image(
    Path(stored_name): Path<String>,
    State(notes): State<NoteService>,
    ctx: Ctx,
) -> Result<Response> {
    let user = ctx.require_user()?;
    let not_found = || Error::NotFound(format!("Image '{stored_name}' not found"));

    if !is_valid_stored_name(&stored_name) {
        return Err(not_found());
    }

    let image = notes
        .get_image_for_display(&stored_name, &user.id)
        .await?
        .ok_or_else(not_found)?;

    let content = notes
        .storage()
        .read(StorageRoot::Images, &image.stored_name)
        .await?
        .ok_or_else(not_found)?;

    let headers = [
        (header::CONTENT_TYPE, image_content_type(&image.stored_name, &content)),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::CONTENT_SECURITY_POLICY, IMAGE_CSP),
    ];

    Ok((headers, content).into_response())
}

fn note_not_found(note_id: Uuid) -> Error {
    Error::NotFound(format!("Note '{note_id}' not found"))
}

/// Fields of the create and edit forms as they arrive.
#[derive(Debug, Default)]
struct NoteForm {
    title: Option<String>,
    content: Option<String>,
    created_at: Option<String>,
    tags: Option<String>,
    image_uploads: Vec<Upload>,
    file_uploads: Vec<Upload>,
    delete_image_ids: Vec<Uuid>,
    delete_file_ids: Vec<Uuid>,
}

impl NoteForm {
    fn validated_fields(&mut self) -> Result<(String, String)> {
        let title = self.title.take().unwrap_or_default();
        let content = self.content.take().unwrap_or_default();
        validate_fields(&title, &content).map_err(Error::Validation)?;
        Ok((title, content))
    }

    fn into_create(mut self) -> Result<CreateNote> {
        let (title, content) = self.validated_fields()?;

        Ok(CreateNote {
            draft: NoteDraft { title, content },
            image_uploads: self.image_uploads,
            file_uploads: self.file_uploads,
            tags: self.tags,
        })
    }

    fn into_update(mut self) -> Result<UpdateNote> {
        let (title, content) = self.validated_fields()?;
        let created_at = match self.created_at.as_deref() {
            Some(value) => parse_created_at(value)?,
            None => None,
        };

        Ok(UpdateNote {
            title,
            content,
            created_at,
            image_uploads: self.image_uploads,
            file_uploads: self.file_uploads,
            delete_image_ids: self.delete_image_ids,
            delete_file_ids: self.delete_file_ids,
            tags: self.tags,
        })
    }
}

async fn read_note_form(mut multipart: axum::extract::Multipart) -> Result<NoteForm> {
    let mut form = NoteForm::default();

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        match name.as_str() {
            "title" => form.title = Some(field.text().await?),
            "content" => form.content = Some(field.text().await?),
            "created_at" => form.created_at = Some(field.text().await?),
            "tags" => form.tags = Some(field.text().await?),
            "image_files" | "note_files" => {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_owned();
                let content = field.bytes().await?;

                // browsers submit an empty part for an untouched file input
                if file_name.is_empty() && content.is_empty() {
                    continue;
                }

                let upload = Upload::new(file_name, content_type, content);
                if name == "image_files" {
                    form.image_uploads.push(upload);
                } else {
                    form.file_uploads.push(upload);
                }
            }
            "delete_image_ids" => {
                if let Some(id) = parse_id(&field.text().await?)? {
                    form.delete_image_ids.push(id);
                }
            }
            "delete_file_ids" => {
                if let Some(id) = parse_id(&field.text().await?)? {
                    form.delete_file_ids.push(id);
                }
            }
            other => tracing::debug!(field = other, "notes: ignoring unknown form field"),
        }
    }

    Ok(form)
}

fn parse_id(value: &str) -> Result<Option<Uuid>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(value)
        .map(Some)
        .map_err(|_| Error::Validation(format!("Invalid id '{value}'")))
}

/// Accepts RFC 3339 or the `datetime-local` input format, which carries no
/// offset and is taken as UTC. An empty value means "unchanged".
fn parse_created_at(value: &str) -> Result<Option<DateTime<Utc>>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    if let Ok(created_at) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(created_at.with_timezone(&Utc)));
    }

    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|created_at| Some(created_at.and_utc()))
        .ok_or_else(|| Error::Validation(format!("Invalid created_at '{value}'")))
}

/// `attachment` disposition with an ASCII fallback name and the exact name
/// percent-encoded in `filename*`.
fn content_disposition(original_name: &str) -> String {
    let base = original_name.rsplit(['/', '\\']).next().unwrap_or(original_name);
    let base = if base.is_empty() { "download" } else { base };

    let fallback = base
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect::<String>();

    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(base)
    )
}

/// Sniffs the content first and falls back to the stored extension for
/// formats without magic bytes.
fn image_content_type(stored_name: &str, content: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(content).filter(|kind| kind.matcher_type() == infer::MatcherType::Image) {
        return kind.mime_type();
    }

    match stored_name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}
