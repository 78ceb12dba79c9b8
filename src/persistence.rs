pub mod model;
pub(crate) mod repo;
