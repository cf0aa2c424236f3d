//! `docent-domain`: types shared by every docent crate.

pub mod config;
pub mod error;
pub mod event;
pub mod stream;
pub mod tool;
pub mod trace;
