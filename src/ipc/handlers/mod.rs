pub mod attendance;
pub mod auth;
pub mod backup_exchange;
pub mod categories;
pub mod core;
pub mod courses;
pub mod dashboard;
pub mod lectures;
pub mod students;
pub mod teachers;
