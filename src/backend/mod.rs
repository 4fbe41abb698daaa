//! Process backends.
//!
//! A backend turns a [`LaunchSpec`] into a [`BackendHandle`] and keeps the
//! handle's native state fresh when polled. Supervisors only ever see these
//! two traits, so a backend can be swapped without touching admission
//! control or state translation.
//!
//! # Components
//!
//! - [`BackendFactory`]: builds handles, reloads them after a restart, polls
//!   and shuts down the whole group
//! - [`BackendHandle`]: one launched (or not yet launched) process
//! - [`local::LocalProcessFactory`]: child processes of the agent itself

pub mod local;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use local::LocalProcessFactory;

/// What to execute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub exec: String,
    #[serde(default)]
    pub argv: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Files that belong to this launch and are removed on cleanup.
    /// Never accepted from a launch request.
    #[serde(skip)]
    pub owned_files: Vec<PathBuf>,
}

impl LaunchSpec {
    pub fn new(exec: impl Into<String>) -> Self {
        Self {
            exec: exec.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_owned_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.owned_files.push(path.into());
        self
    }
}

/// Encode a process name for use as a single path component.
///
/// ASCII alphanumerics, `-`, `_` and `.` pass through; every other byte
/// becomes `%XX`. The encoding is injective and never yields a separator,
/// so callers only need to append a suffix to keep `.`/`..` out.
pub fn file_safe_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// A single backend process.
///
/// State is reported in the backend's own vocabulary (see
/// [`crate::process::translate`]) and is only as fresh as the last
/// [`BackendFactory::poll`].
pub trait BackendHandle: Send {
    fn start(&mut self);
    fn cancel_request(&mut self);
    fn terminate(&mut self);
    /// Release every resource held for this process. Idempotent.
    fn cleanup(&mut self);
    fn state_label(&self) -> String;
    fn result_code(&self) -> Option<i32>;
    fn error_message(&self) -> String;
}

pub trait BackendFactory: Send + Sync {
    fn create_handle(&self, name: &str, spec: LaunchSpec) -> Result<Box<dyn BackendHandle>>;

    /// Handles registered by a previous incarnation of the agent.
    fn reload_handles(&self) -> Result<Vec<(String, Box<dyn BackendHandle>)>>;

    /// Refresh the cached state of every handle.
    fn poll(&self) -> Result<()>;

    /// Stop the whole group.
    fn terminate(&self);
}
