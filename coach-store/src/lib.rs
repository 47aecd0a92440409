pub mod app_config;
pub mod memory_repo;
pub mod redis_repo;

pub use memory_repo::InMemoryScheduleStore;
pub use redis_repo::RedisScheduleStore;
