pub mod db;
mod files;
pub mod models;
mod shares;
mod tables;
mod users;

pub use db::{Database, DatabaseError};
pub use files::FileContent;
pub use tables::*;
