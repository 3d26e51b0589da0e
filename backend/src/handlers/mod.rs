pub mod analytics;
pub mod consents;
pub mod files;
pub mod health;
pub mod messages;
pub mod sessions;
pub mod ws;
