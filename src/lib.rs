// src/lib.rs
pub mod adjudication;
pub mod error;
pub mod ledger;
pub mod linking;
pub mod matching;
pub mod models;
pub mod utils;
