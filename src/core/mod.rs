pub mod api_client;
pub mod classifier;
pub mod config;
pub mod conversation;
pub mod lifecycle;
pub mod llm;
pub mod protocol;
pub mod session;
pub mod tasks;
pub mod terminal;
pub mod transcript;
