pub mod cli;
pub mod core;
pub mod interfaces;
mod logging;
