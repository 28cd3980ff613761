use crate::errors::DemoreelError;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// When set, combined stdout/stderr is redirected to this file instead
    /// of being captured in `ProcessOutput`.
    pub combined_log: Option<PathBuf>,
}

impl ProcessRequest {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
            combined_log: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep_until(&self, deadline: SystemTime) -> Result<(), DemoreelError>;
}

pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, DemoreelError>;
    fn wait(&self, handle: u64) -> Result<ProcessOutput, DemoreelError>;
    /// Deliver a graceful interrupt (Ctrl-C equivalent) without reaping the
    /// process; callers follow up with `wait`.
    fn interrupt(&self, handle: u64) -> Result<(), DemoreelError>;

    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, DemoreelError> {
        let handle = self.spawn(request)?;
        self.wait(handle)
    }
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, DemoreelError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), DemoreelError>;
    fn remove_file(&self, path: &Path) -> Result<(), DemoreelError>;
    fn remove_dir_all(&self, path: &Path) -> Result<(), DemoreelError>;
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), DemoreelError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), DemoreelError> {
        let now = SystemTime::now();
        if let Ok(duration) = deadline.duration_since(now) {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, DemoreelError> {
        std::fs::read_to_string(path).map_err(|e| DemoreelError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), DemoreelError> {
        std::fs::create_dir_all(path).map_err(|e| DemoreelError::Io(e.to_string()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), DemoreelError> {
        std::fs::remove_file(path).map_err(|e| DemoreelError::Io(e.to_string()))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), DemoreelError> {
        std::fs::remove_dir_all(path).map_err(|e| DemoreelError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

#[derive(Default)]
struct ProcessState {
    next_handle: u64,
    children: HashMap<u64, std::process::Child>,
}

pub struct ProductionProcessRunner {
    state: Mutex<ProcessState>,
}

impl ProductionProcessRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProcessState::default()),
        }
    }
}

impl Default for ProductionProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for ProductionProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, DemoreelError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        match &request.combined_log {
            Some(log_path) => {
                let log = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(log_path)
                    .map_err(|e| DemoreelError::Io(e.to_string()))?;
                let log_err = log
                    .try_clone()
                    .map_err(|e| DemoreelError::Io(e.to_string()))?;
                cmd.stdout(std::process::Stdio::from(log))
                    .stderr(std::process::Stdio::from(log_err));
            }
            None => {
                cmd.stdout(std::process::Stdio::piped())
                    .stderr(std::process::Stdio::piped());
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| DemoreelError::Process(e.to_string()))?;
        let mut state = self.state.lock().expect("process lock poisoned");
        let handle = state.next_handle;
        state.next_handle += 1;
        state.children.insert(handle, child);
        Ok(handle)
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, DemoreelError> {
        let child = {
            let mut state = self.state.lock().expect("process lock poisoned");
            state.children.remove(&handle)
        };
        let child =
            child.ok_or_else(|| DemoreelError::Process(format!("unknown handle {handle}")))?;
        let output = child
            .wait_with_output()
            .map_err(|e| DemoreelError::Process(e.to_string()))?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn interrupt(&self, handle: u64) -> Result<(), DemoreelError> {
        let pid = {
            let state = self.state.lock().expect("process lock poisoned");
            state.children.get(&handle).map(|child| child.id())
        }
        .ok_or_else(|| DemoreelError::Process(format!("unknown handle {handle}")))?;
        send_interrupt(pid)
    }
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> Result<(), DemoreelError> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc == 0 {
        Ok(())
    } else {
        Err(DemoreelError::Process(
            std::io::Error::last_os_error().to_string(),
        ))
    }
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> Result<(), DemoreelError> {
    Err(DemoreelError::Process(
        "graceful interrupt is not supported on this platform".to_string(),
    ))
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), DemoreelError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| DemoreelError::Io(e.to_string()))
    }
}

pub struct Runtime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl Runtime {
    pub fn production() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner::new()),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<SystemTime>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<SystemTime> {
        self.sleeps.lock().expect("sleep lock").clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock")
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), DemoreelError> {
        self.sleeps.lock().expect("sleep lock").push(deadline);
        *self.now.lock().expect("clock lock") = deadline;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<DemoreelError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.add_file(path, contents);
        fs
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
    }

    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        self.dirs.lock().expect("dirs lock").push(path.into());
    }

    pub fn set_fail_next(&self, error: DemoreelError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    fn maybe_fail(&self) -> Result<(), DemoreelError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, DemoreelError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| DemoreelError::Io(format!("missing file {}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), DemoreelError> {
        self.maybe_fail()?;
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), DemoreelError> {
        self.maybe_fail()?;
        self.files.lock().expect("files lock").remove(path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), DemoreelError> {
        self.maybe_fail()?;
        self.dirs.lock().expect("dirs lock").retain(|p| p != path);
        self.files
            .lock()
            .expect("files lock")
            .retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
            || self.dirs.lock().expect("dirs lock").iter().any(|p| p == path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.lock().expect("dirs lock").iter().any(|p| p == path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }

    /// Makes every `write_line` whose text contains `needle` fail, simulating
    /// a broken output stream mid-run.
    pub fn fail_on_line_containing(&self, needle: &str) {
        *self.fail_on.lock().expect("fail_on lock") = Some(needle.to_string());
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), DemoreelError> {
        if let Some(needle) = self.fail_on.lock().expect("fail_on lock").as_deref() {
            if line.contains(needle) {
                return Err(DemoreelError::Io(format!(
                    "terminal write failed: broken pipe while writing {line:?}"
                )));
            }
        }
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<Result<ProcessOutput, DemoreelError>>>>,
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
    waits: Arc<Mutex<Vec<u64>>>,
    interrupts: Arc<Mutex<Vec<u64>>>,
    next_handle: Arc<Mutex<u64>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, DemoreelError>) {
        self.responses.lock().expect("responses lock").push(output);
    }

    pub fn push_exit(&self, exit_code: i32, stdout: &str) {
        self.push_response(Ok(ProcessOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }));
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }

    pub fn waits(&self) -> Vec<u64> {
        self.waits.lock().expect("waits lock").clone()
    }

    pub fn interrupts(&self) -> Vec<u64> {
        self.interrupts.lock().expect("interrupts lock").clone()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, DemoreelError> {
        self.spawned.lock().expect("spawned lock").push(request);
        let mut next = self.next_handle.lock().expect("next lock");
        let handle = *next;
        *next += 1;
        Ok(handle)
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, DemoreelError> {
        self.waits.lock().expect("waits lock").push(handle);
        let mut responses = self.responses.lock().expect("responses lock");
        if responses.is_empty() {
            return Err(DemoreelError::Process(
                "no fake response queued".to_string(),
            ));
        }
        responses.remove(0)
    }

    fn interrupt(&self, handle: u64) -> Result<(), DemoreelError> {
        self.interrupts.lock().expect("interrupts lock").push(handle);
        Ok(())
    }
}
