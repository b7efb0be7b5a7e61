//! Authentication and session lifecycle
//!
//! A session is created by `login`, rotated by the API client's refresh
//! path, and destroyed by `logout` or by a failed refresh.

pub mod session;
pub mod tokens;

pub use session::{login, logout, status};
pub use tokens::{FileTokenStore, MemoryTokenStore, Session, TokenStore};
