pub mod auth;
pub mod health;
pub mod hooks;
pub mod repos;
pub mod reviews;
pub mod settings;
pub mod webhook;
