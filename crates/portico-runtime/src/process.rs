use crate::backend::{CommandBackend, CommandOutcome, Invocation, OutputMode};
use crate::RuntimeError;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs invocations as real subprocesses.
#[derive(Debug, Default)]
pub struct ProcessBackend;

impl ProcessBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CommandBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn execute(&self, invocation: &Invocation) -> Result<CommandOutcome, RuntimeError> {
        let (program, args) = invocation
            .argv
            .split_first()
            .ok_or(RuntimeError::EmptyCommand)?;
        debug!("exec: {}", invocation.display());

        let mut cmd = Command::new(program);
        cmd.args(args);

        match invocation.mode {
            OutputMode::Stream => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
                let mut child = spawn(&mut cmd, program)?;
                let status = wait_with_timeout(&mut child, invocation)?;
                Ok(CommandOutcome {
                    code: exit_code(status),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
            OutputMode::Capture => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                let mut child = spawn(&mut cmd, program)?;

                // Drain concurrently; a full pipe would block the child.
                let stdout = child.stdout.take().map(drain);
                let stderr = child.stderr.take().map(drain);

                let status = wait_with_timeout(&mut child, invocation)?;
                Ok(CommandOutcome {
                    code: exit_code(status),
                    stdout: stdout.map(join_reader).unwrap_or_default(),
                    stderr: stderr.map(join_reader).unwrap_or_default(),
                })
            }
        }
    }
}

fn spawn(cmd: &mut Command, program: &str) -> Result<Child, RuntimeError> {
    cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RuntimeError::ToolNotFound(program.to_owned())
        } else {
            RuntimeError::Io(e)
        }
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn wait_with_timeout(child: &mut Child, invocation: &Invocation) -> Result<ExitStatus, RuntimeError> {
    let Some(limit) = invocation.timeout else {
        return Ok(child.wait()?);
    };

    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RuntimeError::Timeout {
                command: invocation.display(),
                after: limit,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
