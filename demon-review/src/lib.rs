//! demon-review library - read-only analytics over an extraction store

pub mod analytics;
pub mod db;
