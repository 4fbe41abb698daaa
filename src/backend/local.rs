use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{file_safe_name, BackendFactory, BackendHandle, LaunchSpec};
use crate::error::{AgentError, Result};
use crate::process::translate::{
    STATE_EXITED, STATE_INITIAL, STATE_REQUEST_CANCELED, STATE_RUNNING, STATE_STARTING,
    STATE_STOPPING, STATE_TERMINATED,
};

const LOST_ACROSS_RESTART: &str = "process lost across agent restart";
const ADOPTED_STATUS_UNKNOWN: &str = "exit status unavailable for a process adopted across agent restart";

enum PidStatus {
    Alive,
    Exited(Option<i32>),
}

/// Liveness of a process that may or may not be our child.
///
/// Our own children are reaped through `waitpid`; anything else (a child of
/// a previous agent, reparented to init) is probed with signal 0.
fn pid_status(pid: Pid) -> PidStatus {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(_, code)) => PidStatus::Exited(Some(code)),
        Ok(WaitStatus::Signaled(..)) => PidStatus::Exited(None),
        Ok(_) => PidStatus::Alive,
        Err(_) => match kill(pid, None::<Signal>) {
            Err(Errno::ESRCH) => PidStatus::Exited(None),
            _ => PidStatus::Alive,
        },
    }
}

/// Persisted form of one process, written to the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProcessEntry {
    name: String,
    exec: String,
    argv: Vec<String>,
    working_directory: Option<PathBuf>,
    owned_files: Vec<PathBuf>,
    label: String,
    result_code: Option<i32>,
    error_message: String,
    #[serde(default)]
    pid: Option<u32>,
}

#[derive(Debug)]
struct LocalProcess {
    name: String,
    spec: LaunchSpec,
    label: String,
    result_code: Option<i32>,
    error_message: String,
    child: Option<Child>,
    /// A live process left behind by a previous agent.
    adopted: Option<Pid>,
    stop_requested: bool,
}

impl LocalProcess {
    fn new(name: &str, spec: LaunchSpec) -> Self {
        Self {
            name: name.to_string(),
            spec,
            label: STATE_INITIAL.to_string(),
            result_code: None,
            error_message: String::new(),
            child: None,
            adopted: None,
            stop_requested: false,
        }
    }

    fn from_entry(entry: ProcessEntry) -> Self {
        let spec = LaunchSpec {
            exec: entry.exec,
            argv: entry.argv,
            working_directory: entry.working_directory,
            owned_files: entry.owned_files,
        };
        let mut process = Self::new(&entry.name, spec);
        match entry.label.as_str() {
            STATE_STARTING | STATE_RUNNING | STATE_STOPPING => {
                let pid = entry.pid.map(|pid| Pid::from_raw(pid as i32));
                match pid.map(pid_status) {
                    Some(PidStatus::Alive) => {
                        tracing::info!(name = %entry.name, pid = ?pid, "Adopted live process from previous run");
                        process.adopted = pid;
                        process.stop_requested = entry.label == STATE_STOPPING;
                        process.label = if process.stop_requested {
                            STATE_STOPPING.to_string()
                        } else {
                            STATE_RUNNING.to_string()
                        };
                    }
                    Some(PidStatus::Exited(code)) if entry.label == STATE_STOPPING => {
                        process.label = STATE_TERMINATED.to_string();
                        process.result_code = code;
                    }
                    Some(PidStatus::Exited(Some(code))) => process.finish_with(code),
                    _ => process.mark_lost(),
                }
            }
            STATE_INITIAL => process.mark_lost(),
            _ => {
                process.label = entry.label;
                process.result_code = entry.result_code;
                process.error_message = entry.error_message;
            }
        }
        process
    }

    fn mark_lost(&mut self) {
        self.label = STATE_EXITED.to_string();
        self.error_message = LOST_ACROSS_RESTART.to_string();
    }

    fn finish_with(&mut self, code: i32) {
        self.label = STATE_EXITED.to_string();
        self.result_code = Some(code);
        if code != 0 {
            self.error_message = format!("process exit status: {}", code);
        }
    }

    fn live_pid(&self) -> Option<Pid> {
        match self.child.as_ref() {
            Some(child) => Some(Pid::from_raw(child.id() as i32)),
            None => self.adopted,
        }
    }

    fn to_entry(&self) -> ProcessEntry {
        ProcessEntry {
            name: self.name.clone(),
            exec: self.spec.exec.clone(),
            argv: self.spec.argv.clone(),
            working_directory: self.spec.working_directory.clone(),
            owned_files: self.spec.owned_files.clone(),
            label: self.label.clone(),
            result_code: self.result_code,
            error_message: self.error_message.clone(),
            pid: self.live_pid().map(|pid| pid.as_raw() as u32),
        }
    }

    fn spawn(&mut self, directory: &Path, launcher: Option<&Path>) {
        match self.try_spawn(directory, launcher) {
            Ok(child) => {
                tracing::info!(name = %self.name, pid = child.id(), exec = %self.spec.exec, "Process started");
                self.child = Some(child);
                self.label = STATE_STARTING.to_string();
            }
            Err(e) => {
                tracing::error!(name = %self.name, exec = %self.spec.exec, error = %e, "Process failed to start");
                self.label = STATE_EXITED.to_string();
                self.result_code = None;
                self.error_message = format!("failed to start {}: {}", self.spec.exec, e);
            }
        }
    }

    fn try_spawn(&self, directory: &Path, launcher: Option<&Path>) -> std::io::Result<Child> {
        let log_path = directory.join(format!("{}.log", file_safe_name(&self.name)));
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let mut command = match launcher {
            Some(launcher) => {
                let mut c = Command::new(launcher);
                c.arg(&self.spec.exec);
                c
            }
            None => Command::new(&self.spec.exec),
        };
        command
            .args(&self.spec.argv)
            .current_dir(self.spec.working_directory.as_deref().unwrap_or(directory))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
        command.spawn()
    }

    /// Reap the child if it has exited.
    fn refresh(&mut self) -> std::io::Result<()> {
        if let Some(pid) = self.adopted {
            self.refresh_adopted(pid);
            return Ok(());
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        match child.try_wait()? {
            Some(status) => {
                self.child = None;
                self.result_code = status.code();
                if self.stop_requested {
                    self.label = STATE_TERMINATED.to_string();
                } else {
                    self.label = STATE_EXITED.to_string();
                    if !status.success() {
                        self.error_message = format!("process {}", status);
                    }
                }
                tracing::info!(name = %self.name, status = %status, label = %self.label, "Process finished");
            }
            None => {
                if self.label == STATE_STARTING {
                    self.label = STATE_RUNNING.to_string();
                }
            }
        }
        Ok(())
    }

    fn refresh_adopted(&mut self, pid: Pid) {
        let PidStatus::Exited(code) = pid_status(pid) else {
            return;
        };
        self.adopted = None;
        match code {
            _ if self.stop_requested => {
                self.result_code = code;
                self.label = STATE_TERMINATED.to_string();
            }
            Some(code) => self.finish_with(code),
            None => {
                self.label = STATE_EXITED.to_string();
                self.error_message = ADOPTED_STATUS_UNKNOWN.to_string();
            }
        }
        tracing::info!(name = %self.name, pid = %pid, label = %self.label, "Adopted process finished");
    }

    fn signal_stop(&mut self) {
        match self.live_pid() {
            Some(pid) => {
                self.stop_requested = true;
                if let Err(e) = kill(pid, Signal::SIGTERM) {
                    tracing::debug!(name = %self.name, error = %e, "SIGTERM not delivered");
                }
                self.label = STATE_STOPPING.to_string();
            }
            None => {
                if self.label == STATE_INITIAL || self.label == STATE_REQUEST_CANCELED {
                    self.label = STATE_TERMINATED.to_string();
                }
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!(name = %self.name, error = %e, "Kill failed");
            }
            if let Err(e) = child.wait() {
                tracing::warn!(name = %self.name, error = %e, "Failed to reap process");
            }
        }
        if let Some(pid) = self.adopted.take() {
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                tracing::debug!(name = %self.name, error = %e, "Kill failed");
            }
            // only reaps when the previous agent was this same process
            if let Err(e) = waitpid(pid, None) {
                tracing::debug!(name = %self.name, error = %e, "Adopted process not reaped here");
            }
        }
        for path in self.spec.owned_files.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(name = %self.name, path = %path.display(), error = %e, "Failed to remove launch file")
                }
            }
        }
    }
}

type SharedProcess = Arc<Mutex<LocalProcess>>;

#[derive(Debug)]
struct FactoryInner {
    directory: PathBuf,
    launcher: Option<PathBuf>,
    state_file: Option<PathBuf>,
    processes: Mutex<BTreeMap<String, SharedProcess>>,
}

impl FactoryInner {
    fn all(&self) -> Vec<SharedProcess> {
        self.processes.lock().values().cloned().collect()
    }

    /// Write the state file. Must not be called while holding a process lock.
    fn persist(&self) -> Result<()> {
        let Some(state_file) = self.state_file.as_ref() else {
            return Ok(());
        };
        let entries: Vec<ProcessEntry> = self.all().iter().map(|p| p.lock().to_entry()).collect();
        let mut tmp = tempfile::NamedTempFile::new_in(&self.directory)?;
        tmp.write_all(&serde_json::to_vec_pretty(&entries)?)?;
        tmp.persist(state_file)
            .map_err(|e| AgentError::Io(e.error))?;
        Ok(())
    }

    fn persist_or_warn(&self) {
        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "Failed to persist process state");
        }
    }
}

/// Backend that runs launches as child processes of the agent.
///
/// With a state file, the registry survives agent restarts: finished
/// processes come back with their final state, and processes that are
/// still alive are adopted by pid and keep their slot. A process that
/// vanished without a known exit status comes back as lost.
#[derive(Debug, Clone)]
pub struct LocalProcessFactory {
    inner: Arc<FactoryInner>,
}

impl LocalProcessFactory {
    /// A factory that keeps no state across restarts.
    pub fn new(directory: impl Into<PathBuf>, launcher: Option<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            inner: Arc::new(FactoryInner {
                directory,
                launcher,
                state_file: None,
                processes: Mutex::new(BTreeMap::new()),
            }),
        })
    }

    /// A factory that records its processes in `<directory>/<agent_name>.processes.json`.
    pub fn persistent(
        directory: impl Into<PathBuf>,
        agent_name: &str,
        launcher: Option<PathBuf>,
    ) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        let state_file = directory.join(format!("{}.processes.json", agent_name));
        Ok(Self {
            inner: Arc::new(FactoryInner {
                directory,
                launcher,
                state_file: Some(state_file),
                processes: Mutex::new(BTreeMap::new()),
            }),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    pub fn state_file(&self) -> Option<&Path> {
        self.inner.state_file.as_deref()
    }
}

impl BackendFactory for LocalProcessFactory {
    fn create_handle(&self, name: &str, spec: LaunchSpec) -> Result<Box<dyn BackendHandle>> {
        if spec.exec.trim().is_empty() {
            return Err(AgentError::InvalidParameters("exec must not be empty".to_string()));
        }
        let process = {
            let mut processes = self.inner.processes.lock();
            if processes.contains_key(name) {
                return Err(AgentError::Backend(format!(
                    "process {} is already registered",
                    name
                )));
            }
            let process = Arc::new(Mutex::new(LocalProcess::new(name, spec)));
            processes.insert(name.to_string(), process.clone());
            process
        };
        self.inner.persist_or_warn();
        Ok(Box::new(LocalHandle {
            name: name.to_string(),
            process,
            factory: self.inner.clone(),
        }))
    }

    fn reload_handles(&self) -> Result<Vec<(String, Box<dyn BackendHandle>)>> {
        let Some(state_file) = self.inner.state_file.as_ref() else {
            return Ok(Vec::new());
        };
        if !state_file.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read(state_file)?;
        let entries: Vec<ProcessEntry> = serde_json::from_slice(&content)?;

        let mut handles: Vec<(String, Box<dyn BackendHandle>)> = Vec::with_capacity(entries.len());
        {
            let mut processes = self.inner.processes.lock();
            for entry in entries {
                let name = entry.name.clone();
                let process = Arc::new(Mutex::new(LocalProcess::from_entry(entry)));
                processes.insert(name.clone(), process.clone());
                handles.push((
                    name.clone(),
                    Box::new(LocalHandle {
                        name,
                        process,
                        factory: self.inner.clone(),
                    }),
                ));
            }
        }
        tracing::info!(count = handles.len(), state_file = %state_file.display(), "Reloaded processes");
        self.inner.persist()?;
        Ok(handles)
    }

    fn poll(&self) -> Result<()> {
        let mut failures = Vec::new();
        for process in self.inner.all() {
            let mut process = process.lock();
            if let Err(e) = process.refresh() {
                failures.push(format!("{}: {}", process.name, e));
            }
        }
        self.inner.persist()?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Backend(failures.join("; ")))
        }
    }

    fn terminate(&self) {
        let processes = self.inner.all();
        tracing::info!(count = processes.len(), "Stopping all processes");
        for process in processes {
            let mut process = process.lock();
            if process.live_pid().is_some() {
                process.signal_stop();
            }
        }
        self.inner.persist_or_warn();
    }
}

/// Handle onto one [`LocalProcess`].
#[derive(Debug)]
pub struct LocalHandle {
    name: String,
    process: SharedProcess,
    factory: Arc<FactoryInner>,
}

impl BackendHandle for LocalHandle {
    fn start(&mut self) {
        {
            let mut process = self.process.lock();
            if process.label != STATE_INITIAL {
                return;
            }
            process.spawn(&self.factory.directory, self.factory.launcher.as_deref());
        }
        self.factory.persist_or_warn();
    }

    fn cancel_request(&mut self) {
        {
            let mut process = self.process.lock();
            if process.label != STATE_INITIAL {
                return;
            }
            process.label = STATE_REQUEST_CANCELED.to_string();
        }
        self.factory.persist_or_warn();
    }

    fn terminate(&mut self) {
        self.process.lock().signal_stop();
        self.factory.persist_or_warn();
    }

    fn cleanup(&mut self) {
        self.process.lock().release();
        {
            let mut processes = self.factory.processes.lock();
            if processes
                .get(&self.name)
                .is_some_and(|p| Arc::ptr_eq(p, &self.process))
            {
                processes.remove(&self.name);
            }
        }
        self.factory.persist_or_warn();
    }

    fn state_label(&self) -> String {
        self.process.lock().label.clone()
    }

    fn result_code(&self) -> Option<i32> {
        self.process.lock().result_code
    }

    fn error_message(&self) -> String {
        self.process.lock().error_message.clone()
    }
}
