pub mod api;
pub mod chat;
pub mod cli;
pub mod core;
pub mod identity;
pub mod session;
pub mod settings;
