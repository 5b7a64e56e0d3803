pub mod extract;
pub mod http;
pub mod mock;

pub use http::{DeciderConfig, HttpDecider};
pub use mock::MockDecider;
