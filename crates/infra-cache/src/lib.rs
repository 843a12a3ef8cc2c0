// Keystone Infrastructure - Counter Stores
// Implements: CounterStore

mod memory;
mod redis_store;

pub use memory::MemoryCounterStore;
pub use redis_store::{map_redis_error, RedisCounterStore};
