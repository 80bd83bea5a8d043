pub mod cli;
pub mod error;
pub mod source;
pub mod monitor;
pub mod notify;
pub mod storage;
pub mod service;
pub mod config;

pub use config::Config;
pub use error::{Error, Result};
pub use service::FilterService;
