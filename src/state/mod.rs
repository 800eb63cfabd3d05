// Expiring credential state

pub mod redis_store;
