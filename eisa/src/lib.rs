pub mod commands;
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use commands::command_argument_builder;
pub use handlers::{apply_run_overrides, load_settings, write_config_template, write_json_lines};
