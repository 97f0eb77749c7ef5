//! Backend wire records.

pub mod models;
