pub mod bootstrap;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod validator;

pub use config::AppConfig;
pub use observability::{init_tracing, init_tracing_with_level};
pub use server::{AppState, ServerBuilder, ToriiServer, build_app};
pub use validator::{ValidatorClient, ValidatorError};
