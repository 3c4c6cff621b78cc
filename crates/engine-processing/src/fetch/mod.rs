pub mod range;
pub mod sizing;
