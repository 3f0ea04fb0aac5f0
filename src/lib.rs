pub mod app;
pub mod shutdown;

pub use app::{Application, DispatchServices, ImportServices};
pub use shutdown::ShutdownManager;
