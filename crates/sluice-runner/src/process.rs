use crate::errors::RunnerError;
use crate::log::TaskLog;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long a cancelled task process gets between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Spawns `cmd` and supervises it to completion, feeding each stdout line
/// through `on_stdout` and each stderr line through `on_stderr`.
///
/// On cancellation the child receives a terminate signal, a grace period,
/// then a kill, and the call returns [`RunnerError::Interrupted`].
pub(crate) async fn run_streamed<F, G>(
    mut cmd: Command,
    program: &str,
    cancel: &CancellationToken,
    on_stdout: F,
    on_stderr: G,
) -> Result<(), RunnerError>
where
    F: FnMut(String) + Send + 'static,
    G: FnMut(String) + Send + 'static,
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let out_pump = child
        .stdout
        .take()
        .map(|stream| tokio::spawn(pump_lines(stream, on_stdout)));
    let err_pump = child
        .stderr
        .take()
        .map(|stream| tokio::spawn(pump_lines(stream, on_stderr)));

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            terminate(&mut child, program).await;
            for pump in [out_pump, err_pump].into_iter().flatten() {
                let _ = pump.await;
            }
            return Err(RunnerError::Interrupted);
        }
    };

    for pump in [out_pump, err_pump].into_iter().flatten() {
        let _ = pump.await;
    }

    if status.success() {
        Ok(())
    } else if let Some(code) = status.code() {
        Err(RunnerError::NonZeroExit {
            program: program.to_string(),
            code,
        })
    } else {
        Err(RunnerError::Signalled {
            program: program.to_string(),
        })
    }
}

/// The common case: both streams merged into the task log.
pub(crate) async fn run_logged(
    cmd: Command,
    program: &str,
    cancel: &CancellationToken,
    log: &TaskLog,
) -> Result<(), RunnerError> {
    let out_log = log.clone();
    let err_log = log.clone();
    run_streamed(
        cmd,
        program,
        cancel,
        move |line| out_log.write_line(&line),
        move |line| err_log.write_line(&line),
    )
    .await
}

async fn pump_lines<R, F>(stream: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        on_line(line);
    }
}

async fn terminate(child: &mut Child, program: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        debug!(program, pid, "terminating cancelled task process");
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}
