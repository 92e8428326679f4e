// src/models/mod.rs
pub mod linking;
pub mod records;
pub mod stats;
