//! A worker framework for voice agents on media rooms.
//!
//! A binary describes itself with [`WorkerOptions`] and an async
//! entrypoint, then calls [`cli::run_app`]. The worker registers over
//! the server's agent socket, accepts room jobs, and invokes the
//! entrypoint with a [`JobContext`] per job. Inside the entrypoint an
//! [`AgentSession`] wires speech recognition, chat completion and
//! speech synthesis capabilities into the job's room.

pub mod agent;
pub mod audio;
pub mod capability;
pub mod cli;
pub mod error;
pub mod job;
pub mod room;
mod signal;
pub mod session;
pub mod text;
pub mod worker;

pub use agent::Agent;
pub use error::AgentError;
pub use job::JobContext;
pub use room::RoomHandle;
pub use session::{AgentSession, AgentSessionBuilder};
pub use worker::{ServerConfig, Worker, WorkerOptions};
