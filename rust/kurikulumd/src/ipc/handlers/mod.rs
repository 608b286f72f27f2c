pub mod attendance;
pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod materials;
pub mod plans;
pub mod sessions;
pub mod setup;
pub mod students;
