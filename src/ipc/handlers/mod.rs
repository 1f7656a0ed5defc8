pub mod core;
pub mod curriculum;
pub mod hafalan;
pub mod reports;
pub mod setup;
pub mod students;
pub mod teachers;
