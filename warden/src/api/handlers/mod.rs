pub mod health;
pub mod roles;
pub mod services;
pub mod users;
