//! Rate limiting logic and state management.

mod limiter;
mod store;
mod window;

pub use limiter::{now_millis, Decision, RateLimiter};
pub use store::WindowStore;
pub use window::ClientWindow;
