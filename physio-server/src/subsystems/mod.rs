pub mod persist;
pub mod pipeline;
pub mod reports;
