pub mod config;
pub mod credentials;
pub mod error;
pub mod ids;
pub mod io;
pub mod messages;
pub mod repository;
pub mod state;
