pub mod html;
pub mod web;

pub use web::{router, selection_from_pairs, AppState};
