//! Data models for donation platform entities

mod donation;
mod payment;
mod user;

pub use donation::*;
pub use payment::*;
pub use user::*;
