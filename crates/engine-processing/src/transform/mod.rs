pub mod pipeline;
pub mod rules;
