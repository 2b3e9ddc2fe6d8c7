use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared, line-oriented writer for a task's merged stdout and stderr.
///
/// Every line lands in the task's log file. In verbose mode lines are also
/// echoed to a second sink (the caller's terminal), optionally prefixed with
/// `[<task_name>] ` so concurrent tasks stay distinguishable. Writes are
/// serialized by an internal lock, so concurrent stream pumps interleave per
/// line, never mid-line.
#[derive(Clone)]
pub struct TaskLog {
    inner: Arc<Mutex<Sinks>>,
}

struct Sinks {
    file: Box<dyn Write + Send>,
    echo: Option<Echo>,
}

struct Echo {
    prefix: Option<String>,
    dest: Box<dyn Write + Send>,
}

impl TaskLog {
    /// Opens (truncating) the task's log file.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::to_sink(Box::new(file)))
    }

    /// Builds a log over an arbitrary sink; used by tests and the sql stub.
    pub fn to_sink(sink: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Sinks {
                file: sink,
                echo: None,
            })),
        }
    }

    /// Adds a terminal echo branch. `prefix` is the task name to prepend in
    /// concurrent levels; `None` echoes lines verbatim.
    pub fn with_echo(self, dest: Box<dyn Write + Send>, prefix: Option<String>) -> Self {
        {
            let mut sinks = self.inner.lock().expect("log lock");
            sinks.echo = Some(Echo {
                prefix: prefix.map(|name| format!("[{name}] ")),
                dest,
            });
        }
        self
    }

    /// Convenience for verbose mode: echo to the process stdout.
    pub fn echo_stdout(self, prefix: Option<String>) -> Self {
        self.with_echo(Box::new(std::io::stdout()), prefix)
    }

    pub fn write_line(&self, line: &str) {
        let mut sinks = self.inner.lock().expect("log lock");
        let _ = writeln!(sinks.file, "{line}");
        if let Some(echo) = &mut sinks.echo {
            match &echo.prefix {
                Some(prefix) => {
                    let _ = write!(echo.dest, "{prefix}");
                }
                None => {}
            }
            let _ = writeln!(echo.dest, "{line}");
        }
    }

    /// The banner written before every retry attempt.
    pub fn retry_banner(&self, attempt: u32, max_attempts: u32) {
        self.write_line("");
        self.write_line(&format!("--- retry attempt {attempt}/{max_attempts} ---"));
    }

    pub fn flush(&self) {
        let mut sinks = self.inner.lock().expect("log lock");
        let _ = sinks.file.flush();
        if let Some(echo) = &mut sinks.echo {
            let _ = echo.dest.flush();
        }
    }
}

/// An in-memory sink for tests.
#[derive(Clone, Default)]
pub struct MemorySink(pub Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("sink lock")).into_owned()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("sink lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
