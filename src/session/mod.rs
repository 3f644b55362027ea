mod manager;

pub use manager::{Session, SessionManager};
