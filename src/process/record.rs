use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::registry::ProcessRegistry;
use super::translate::translate;
use super::ProcessState;
use crate::backend::BackendHandle;

/// Error message reported by a record that never got a backend handle.
pub const LOST_ON_SUBMISSION: &str = "Launch request lost on submission";

/// One logical process, tracked independently of its backend handle.
///
/// A record exists from the moment a launch is requested. Until a backend
/// handle is attached (or if attaching never succeeds) it reports
/// [`ProcessState::Failed`] with its fallback error message.
pub struct ProcessRecord {
    name: String,
    handle: Mutex<Option<Box<dyn BackendHandle>>>,
    error_message: Mutex<String>,
    owner: Weak<ProcessRegistry>,
}

impl ProcessRecord {
    pub fn new(name: impl Into<String>, owner: Weak<ProcessRegistry>) -> Self {
        Self {
            name: name.into(),
            handle: Mutex::new(None),
            error_message: Mutex::new(LOST_ON_SUBMISSION.to_string()),
            owner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_handle(&self) -> bool {
        self.handle.lock().is_some()
    }

    pub fn state(&self) -> ProcessState {
        match self.handle.lock().as_ref() {
            Some(handle) => translate(&handle.state_label(), handle.result_code()),
            None => ProcessState::Failed,
        }
    }

    pub fn error_message(&self) -> String {
        match self.handle.lock().as_ref() {
            Some(handle) => handle.error_message(),
            None => self.error_message.lock().clone(),
        }
    }

    pub(crate) fn attach(&self, handle: Box<dyn BackendHandle>) {
        *self.handle.lock() = Some(handle);
    }

    pub(crate) fn set_error_message(&self, msg: impl Into<String>) {
        *self.error_message.lock() = msg.into();
    }

    pub(crate) fn start(&self) {
        if let Some(handle) = self.handle.lock().as_mut() {
            handle.start();
        }
    }

    pub(crate) fn cancel_request(&self) {
        if let Some(handle) = self.handle.lock().as_mut() {
            handle.cancel_request();
        }
    }

    /// Ask the backend to stop the process. No-op without a handle.
    pub fn terminate(&self) {
        if let Some(handle) = self.handle.lock().as_mut() {
            tracing::info!(name = %self.name, "Terminating process");
            handle.terminate();
        }
    }

    /// Release backend resources and drop the record from its supervisor.
    ///
    /// This is the only way a record leaves its supervisor. Calling it again
    /// is a no-op.
    pub fn cleanup(self: &Arc<Self>) {
        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            handle.cleanup();
        }
        if let Some(owner) = self.owner.upgrade() {
            if owner.remove(self) {
                tracing::info!(name = %self.name, "Process cleaned up");
            }
        }
    }
}

impl std::fmt::Debug for ProcessRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRecord")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("has_handle", &self.has_handle())
            .finish()
    }
}
