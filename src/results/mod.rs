//! Result providers and report export.

pub mod file;
pub mod memory;
pub mod report;

pub use file::FileResultProvider;
pub use memory::InMemoryResultProvider;
pub use report::build_report_archive;
