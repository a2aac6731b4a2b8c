//! PostgreSQL export/import through `pg_dump` and `psql`
//!
//! Both tools run as child processes. The dump is streamed from `pg_dump`'s
//! stdout into the caller's writer, and a snapshot is streamed into `psql`'s
//! stdin. stderr is drained on a separate thread so a chatty tool can never
//! block on a full pipe, and is used verbatim as the error message.

use std::io::{self, Read, Write};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::{ConnectionConfig, Exporter, Importer};
use crate::config::settings::{DumpOptions, Settings};
use crate::error::{SnapshotError, SnapshotResult};

/// Fragments of libpq diagnostics that mean "never got a working session"
const CONNECTION_FAILURES: &[&str] = &[
    "could not connect",
    "connection to server",
    "connection refused",
    "could not translate host name",
    "password authentication failed",
    "no password supplied",
    "no pg_hba.conf entry",
    "does not exist",
    "timeout expired",
];

/// Runs `pg_dump` in plain-text format
#[derive(Debug, Clone)]
pub struct PgDump {
    program: String,
    options: DumpOptions,
}

impl PgDump {
    pub fn new(program: impl Into<String>, options: DumpOptions) -> Self {
        Self {
            program: program.into(),
            options,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.tools.pg_dump, settings.dump.clone())
    }

    fn command(&self, source: &ConnectionConfig) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--format=plain")
            .arg("--no-password")
            .arg("--host")
            .arg(&source.host)
            .arg("--port")
            .arg(source.port.to_string())
            .arg("--username")
            .arg(&source.user);
        if self.options.clean {
            command.arg("--clean").arg("--if-exists");
        }
        if self.options.no_owner {
            command.arg("--no-owner");
        }
        command.arg("--dbname").arg(&source.database);
        with_password(&mut command, source);
        command
    }
}

impl Exporter for PgDump {
    fn name(&self) -> &str {
        "pg_dump"
    }

    fn export(&self, source: &ConnectionConfig, out: &mut dyn Write) -> SnapshotResult<()> {
        let mut command = self.command(source);
        debug!(program = %self.program, source = %source.identifier(), "starting export");

        let mut child = spawn(
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped()),
            &self.program,
        )?;
        let stderr = drain_stderr(&mut child);

        let copied = match child.stdout.take() {
            Some(mut stdout) => io::copy(&mut stdout, out).and_then(|_| out.flush()),
            None => Err(io::Error::new(io::ErrorKind::Other, "pg_dump stdout unavailable")),
        };

        if let Err(e) = copied {
            let _ = child.kill();
            let _ = child.wait();
            collect(stderr);
            return Err(e.into());
        }

        let status = child.wait()?;
        let diagnostics = collect(stderr);
        if status.success() {
            return Ok(());
        }

        let message = failure_message(&self.program, status, &diagnostics);
        if is_connection_failure(&diagnostics) {
            Err(SnapshotError::Connection(message))
        } else {
            Err(SnapshotError::ExportProcess(message))
        }
    }
}

/// Runs `psql`, stopping at the first failed statement
#[derive(Debug, Clone)]
pub struct Psql {
    program: String,
}

impl Psql {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.tools.psql)
    }

    fn command(&self, target: &ConnectionConfig) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-psqlrc")
            .arg("--quiet")
            .arg("--no-password")
            .arg("--set")
            .arg("ON_ERROR_STOP=1")
            .arg("--host")
            .arg(&target.host)
            .arg("--port")
            .arg(target.port.to_string())
            .arg("--username")
            .arg(&target.user)
            .arg("--dbname")
            .arg(&target.database);
        with_password(&mut command, target);
        command
    }
}

impl Importer for Psql {
    fn name(&self) -> &str {
        "psql"
    }

    fn import(&self, target: &ConnectionConfig, input: &mut dyn Read) -> SnapshotResult<()> {
        let mut command = self.command(target);
        debug!(program = %self.program, target = %target.identifier(), "starting import");

        let mut child = spawn(
            command
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::piped()),
            &self.program,
        )?;
        let stderr = drain_stderr(&mut child);

        let fed = match child.stdin.take() {
            // stdin is closed when it goes out of scope, which ends the session
            Some(mut stdin) => io::copy(input, &mut stdin).map(|_| ()),
            None => Err(io::Error::new(io::ErrorKind::Other, "psql stdin unavailable")),
        };

        let status = child.wait()?;
        let diagnostics = collect(stderr);

        match fed {
            // psql stopped reading early; its exit status explains why
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Err(e) => {
                return Err(SnapshotError::ImportProcess(format!(
                    "failed to stream snapshot into {}: {}",
                    self.program, e
                )))
            }
            Ok(()) => {}
        }

        if status.success() {
            return Ok(());
        }

        let message = failure_message(&self.program, status, &diagnostics);
        if is_connection_failure(&diagnostics) {
            Err(SnapshotError::TargetUnreachable(message))
        } else {
            Err(SnapshotError::ImportProcess(message))
        }
    }
}

fn with_password(command: &mut Command, conn: &ConnectionConfig) {
    if let Some(password) = &conn.password {
        command.env("PGPASSWORD", password);
    }
}

fn spawn(command: &mut Command, program: &str) -> SnapshotResult<Child> {
    command.spawn().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            SnapshotError::Config(format!(
                "'{}' not found; install the PostgreSQL client tools or set its path in config.json",
                program
            ))
        } else {
            SnapshotError::Io(format!("Failed to start {}: {}", program, e))
        }
    })
}

fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let stderr: ChildStderr = child.stderr.take()?;
    Some(thread::spawn(move || {
        let mut stderr = stderr;
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf);
        buf
    }))
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn is_connection_failure(diagnostics: &str) -> bool {
    let lower = diagnostics.to_lowercase();
    let session_failure = CONNECTION_FAILURES.iter().any(|needle| lower.contains(needle));
    // "does not exist" also matches missing relations mid-import; only count
    // it when libpq reports it for the database itself
    session_failure && (!lower.contains("does not exist") || lower.contains("database \""))
}

fn failure_message(program: &str, status: ExitStatus, diagnostics: &str) -> String {
    let diagnostics = diagnostics.trim();
    if diagnostics.is_empty() {
        format!("{} exited with {}", program, status)
    } else {
        format!("{} exited with {}: {}", program, status, diagnostics)
    }
}
