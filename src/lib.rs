//! Agent supervisor library — runs a local ngrok agent and exposes its API address.

pub mod agent;
pub mod authtoken;
pub mod config;
pub mod error;
pub mod log_scan;
pub mod options;
pub mod supervisor;

pub use authtoken::{set_authtoken, set_authtoken_with_options};
pub use error::SupervisorError;
pub use options::AgentOptions;
pub use supervisor::{Supervisor, SupervisorState};
