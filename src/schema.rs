pub mod model;
pub mod retry;
pub mod service;
