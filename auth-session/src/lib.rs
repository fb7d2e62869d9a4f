pub mod access;
pub mod config;
pub mod models;
pub mod services;
pub mod startup;

pub use access::{AccessDecision, ProtectedView, Screen};
pub use services::{AuthError, AuthSnapshot, SessionStore};
