mod models;
mod write;

pub use models::*;
pub use write::*;
