//! Storage and browsing collaborators used by docent capabilities.
//!
//! - [`ObjectStore`]: named binary objects with a content type
//! - [`Browser`]: fetch a page and reduce it to visible text

pub mod atomic;
pub mod browser;
pub mod html;
pub mod object_store;

pub use browser::{Browser, HttpBrowser};
pub use object_store::{FsObjectStore, ObjectStore, StoredObject};
