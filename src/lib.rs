pub mod audio;
pub mod collab;
pub mod config;
pub mod core;
pub mod message;
pub mod session;
pub mod utils;

pub use session::Session;
