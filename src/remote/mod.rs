//! Remote command execution over SSH
//!
//! The rollout orchestrator only needs a small executor capability: run a
//! command, upload a file, and re-scope to another local user. Everything
//! else (transport, host keys, agents) stays behind the `ssh`/`scp` binaries.

pub mod executor;

pub use executor::{CommandOutput, Executor, SshExecutor};
