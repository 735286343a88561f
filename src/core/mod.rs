pub mod catalog;
pub mod context;
pub mod engine;
pub mod http;
pub mod metadata;
pub mod payload;
pub mod xml;

pub use crate::domain::ports::{ConfigProvider, ResultProvider, Storage};
pub use crate::utils::error::Result;
