//! HTTP request handlers.

pub mod capabilities;
pub mod files;
pub mod health;
pub mod uploads;

pub use capabilities::*;
pub use files::*;
pub use health::*;
pub use uploads::*;
