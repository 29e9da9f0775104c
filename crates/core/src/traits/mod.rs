pub mod listener;
pub mod repository;
pub mod services;

pub use listener::*;
pub use repository::*;
pub use services::*;
