pub mod account_cache;
pub mod config_loader;
pub mod constants;

pub use account_cache::{AccountCache, AccountRecord, CacheStats};
pub use config_loader::*;
pub use constants::*;
