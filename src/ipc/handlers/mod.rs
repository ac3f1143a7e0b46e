pub mod attendance;
pub mod backup_exchange;
pub mod core;
pub mod hearing;
pub mod masters;
pub mod permits;
pub mod ranking;
pub mod students;
pub mod violations;
