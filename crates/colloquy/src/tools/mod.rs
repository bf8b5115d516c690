//! Built-in tools that models can use.

mod list_files;

pub use list_files::ListFilesTool;
