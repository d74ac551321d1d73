pub mod health;
pub mod module;
pub mod projects;
pub mod runs;
