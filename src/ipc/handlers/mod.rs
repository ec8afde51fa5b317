pub mod auth;
pub mod classes;
pub mod core;
pub mod papers;
pub mod results;
pub mod students;
