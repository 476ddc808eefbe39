pub mod hierarchy;
pub mod snapshot;
pub mod types;
pub mod view_dump;
pub mod window;
