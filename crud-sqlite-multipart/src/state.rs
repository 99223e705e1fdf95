use axum::extract::FromRef;

use crate::{db::DB, notes::NoteService};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub conn: DB,
    pub notes: NoteService,
}
