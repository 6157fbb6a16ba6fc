// Database and Redis connection management

pub mod pool;
pub mod redis;

pub use pool::DbPool;
pub use redis::RedisPool;
