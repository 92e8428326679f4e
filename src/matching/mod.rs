// src/matching/mod.rs
pub mod classifier;
pub mod corpus;
pub mod features;
pub mod labeler;
pub mod matcher;
pub mod model;
pub mod normalize;
