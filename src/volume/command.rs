use std::{
    ffi::OsStr,
    io::{self, Write},
    process::{Command, Output, Stdio},
    thread,
    time::Duration,
};

use zeroize::Zeroizing;

use crate::{
    error::{CryptainerError, Result, MISSING_BINARY_PREFIX},
    types::SecretValue,
};

const EXEC_BUSY_RETRY_ATTEMPTS: usize = 20;
const EXEC_BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Runs one external tool to completion.
///
/// When `secret` is set it is written to the child's stdin followed by a
/// newline and stdin is closed; otherwise stdin is null. Non-zero exit maps to
/// `BackendFailure` carrying the captured diagnostic text.
pub(crate) fn run_tool<I, S>(binary: &str, args: I, secret: Option<&SecretValue>) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_os_string())
        .collect::<Vec<_>>();
    tracing::debug!(tool = binary, ?args, "running backend tool");

    let output = retry_exec_busy(|| spawn_and_wait(binary, &args, secret))
        .map_err(|error| map_command_execution_error(binary, error))?;
    if output.status.success() {
        return Ok(());
    }

    Err(CryptainerError::BackendFailure {
        tool: binary.to_owned(),
        diagnostic: diagnostic_text(&output),
    })
}

fn spawn_and_wait(
    binary: &str,
    args: &[std::ffi::OsString],
    secret: Option<&SecretValue>,
) -> io::Result<Output> {
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(if secret.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn()?;

    if let Some(secret) = secret {
        let mut payload = Zeroizing::new(secret.expose(<[u8]>::to_vec));
        payload.push(b'\n');
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload) {
                Ok(()) => {}
                // the tool may exit before reading; its status decides the outcome
                Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {}
                Err(error) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(error);
                }
            }
        }
    }

    child.wait_with_output()
}

fn diagnostic_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if !stdout.is_empty() {
        return stdout;
    }
    match output.status.code() {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_owned(),
    }
}

fn map_command_execution_error(binary: &str, error: io::Error) -> CryptainerError {
    if error.kind() == io::ErrorKind::NotFound {
        return CryptainerError::BackendFailure {
            tool: binary.to_owned(),
            diagnostic: format!("{MISSING_BINARY_PREFIX}: {binary}"),
        };
    }
    CryptainerError::Io(error)
}

pub(crate) fn retry_exec_busy<T, F>(mut operation: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut last_error = None;
    for attempt in 0..EXEC_BUSY_RETRY_ATTEMPTS {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if is_exec_busy_error(&error) && attempt + 1 < EXEC_BUSY_RETRY_ATTEMPTS => {
                last_error = Some(error);
                thread::sleep(EXEC_BUSY_RETRY_DELAY);
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error.unwrap_or_else(|| io::Error::other("command execution failed")))
}

fn is_exec_busy_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::ExecutableFileBusy || error.raw_os_error() == Some(26)
}

#[cfg(all(test, unix))]
mod unit_tests {
    use super::run_tool;
    use crate::{error::CryptainerError, types::SecretValue};

    #[test]
    fn missing_binary_is_reported_as_backend_failure() {
        let error = run_tool("/nonexistent/cryptainer-tool", ["x"], None).unwrap_err();
        assert!(matches!(
            error,
            CryptainerError::BackendFailure { diagnostic, .. }
                if diagnostic.starts_with("required binary not found")
        ));
    }

    #[test]
    fn non_zero_exit_carries_stderr() {
        let error = run_tool("sh", ["-c", "echo bad password >&2; exit 3"], None).unwrap_err();
        assert!(matches!(
            error,
            CryptainerError::BackendFailure { tool, diagnostic }
                if tool == "sh" && diagnostic == "bad password"
        ));
    }

    #[test]
    fn secret_is_delivered_on_stdin() {
        let secret = SecretValue::from_string("s3cret".to_owned());
        run_tool(
            "sh",
            ["-c", "read line; [ \"$line\" = s3cret ]"],
            Some(&secret),
        )
        .unwrap();
    }
}
