pub mod agent;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod gitlab;
pub mod installer;
pub mod server;
pub mod session;
pub mod tracker;

pub use error::RevlinkError;
pub use server::router::{AppState, app_router};
