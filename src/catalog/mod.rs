pub mod key;
pub mod schema;

pub use key::Key;
pub use schema::{IndexParams, IndexPath, KeyPath};
