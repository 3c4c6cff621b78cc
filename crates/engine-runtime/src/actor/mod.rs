pub mod actor;
pub mod spawn;
pub mod ticker;

pub use actor::{Actor, ActorContext, ActorRef};
pub use spawn::spawn_actor;
