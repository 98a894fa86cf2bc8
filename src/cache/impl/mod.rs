//! Cache implementations

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryCache;
pub use self::redis::RedisCache;
