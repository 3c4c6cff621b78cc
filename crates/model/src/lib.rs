pub mod core;
pub mod events;
pub mod records;
pub mod task;
