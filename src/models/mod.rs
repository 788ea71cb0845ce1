//! Data models shared with the dashboard API

mod envelope;
mod user;

pub use envelope::*;
pub use user::*;
