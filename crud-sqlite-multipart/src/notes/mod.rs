mod model;
pub(crate) mod repository;
mod routes;
mod service;
pub(crate) mod tags;

pub use model::*;
pub use routes::router;
pub use service::NoteService;
