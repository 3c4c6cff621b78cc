pub mod assemble;
pub mod cb;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod processor;
pub mod retry;
pub mod tail;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;
