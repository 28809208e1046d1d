pub mod api;
pub mod app;
pub mod config;
pub mod editor;
pub mod flow;
pub mod language;
pub mod sandbox;
pub mod state;
pub mod types;
pub mod util;

#[cfg(test)]
pub mod test_support;

pub use app::{Notice, NoticeLevel, Workbench, WorkbenchError, WorkbenchOptions};
pub use language::Language;
