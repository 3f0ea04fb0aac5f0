pub mod dispatch;
pub mod job;
pub mod message;
pub mod order;

pub use dispatch::*;
pub use job::*;
pub use message::*;
pub use order::*;
