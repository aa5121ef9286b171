//! Chat surfaces for MedBot.

pub mod cli;
mod line_editor;

pub use cli::CliChannel;
