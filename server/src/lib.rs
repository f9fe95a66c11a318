#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! toolrelay library: the control server's building blocks.
//!
//! - `config` — configuration loading
//! - `hub` — per-client command queues and result waiters
//! - `routes` — HTTP and SSE route handlers
//! - `state` — shared handler state

pub mod config;
pub mod hub;
pub mod routes;
pub mod state;

pub use config::Config;
pub use hub::Hub;
pub use routes::router;
pub use state::AppState;
