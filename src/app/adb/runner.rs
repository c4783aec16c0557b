use std::io::{ErrorKind, Read};
use std::process::{ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::app::cancel::CancelToken;
use crate::app::error::AppError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancelToken,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    if cancel.is_cancelled() {
        return Err(AppError::cancelled(trace_id));
    }
    debug!(trace_id = %trace_id, program = %program, args = ?args, "spawning command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AppError::dependency(format!("{program} was not found: {err}"), trace_id)
            } else {
                AppError::system(format!("Failed to spawn {program}: {err}"), trace_id)
            }
        })?;

    // Both pipes are drained on their own threads; a chatty child would
    // otherwise block on a full pipe buffer and look like a timeout.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_handle = spawn_drain(PipeSource::Stdout(stdout));
    let stderr_handle = spawn_drain(PipeSource::Stderr(stderr));

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                let stop = if cancel.is_cancelled() {
                    Some(AppError::cancelled(trace_id))
                } else if start.elapsed() > timeout {
                    Some(AppError::transient(
                        format!("{program} timed out after {}s", timeout.as_secs_f32()),
                        trace_id,
                    ))
                } else {
                    None
                };
                if let Some(err) = stop {
                    let _ = child.kill();
                    let _ = child.wait();
                    // A grandchild may still hold the pipes open; the drain
                    // threads finish on their own once it exits.
                    drop(stdout_handle);
                    drop(stderr_handle);
                    return Err(err);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                let _ = child.kill();
                return Err(AppError::system(
                    format!("Failed to poll {program}: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

enum PipeSource {
    Stdout(ChildStdout),
    Stderr(ChildStderr),
}

impl Read for PipeSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            PipeSource::Stdout(pipe) => pipe.read(buf),
            PipeSource::Stderr(pipe) => pipe.read(buf),
        }
    }
}

fn spawn_drain(mut reader: PipeSource) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}
