//! Capability checks for protected screens.

mod gate;
mod screens;

pub use gate::{decide, AccessDecision, Placeholder, ProtectedView, Rendered};
pub use screens::Screen;
