//! API handlers module

pub mod decks;
pub mod files;
pub mod health;
pub mod jobs;
