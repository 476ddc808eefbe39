pub mod http;
pub mod parse;
pub mod provider;
pub mod types;

pub use provider::Planner;
