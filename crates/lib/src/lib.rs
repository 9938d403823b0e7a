//! Quill core library — sessions, assistant runs, backlog replay, routing,
//! and the Discord channel, shared by the CLI.

pub mod assistant;
pub mod backlog;
pub mod channels;
pub mod config;
pub mod init;
pub mod lifecycle;
pub mod router;
pub mod session;
