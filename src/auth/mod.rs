// Authentication & authorization module

pub mod audit_logger;
pub mod gate;
pub mod link;
pub mod permission;
pub mod session;
pub mod ticket;
