pub mod health;
pub mod mood_entries;
pub mod schedule;
pub mod ws;
