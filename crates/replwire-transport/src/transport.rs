//! Transports that execute one multiplexer control command.

use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::{debug, error};

use replwire_core::{Error, Result, TransportKind, TransportSettings};

/// Captured result of one control invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlOutput {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Exit status (-1 when the process was killed by a signal)
    pub exit_code: i32,
}

impl ControlOutput {
    /// Build a successful output.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Build a failed output.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs multiplexer control commands.
///
/// `args` never include the multiplexer binary itself, e.g.
/// `["has-session", "-t", "console"]`. A non-zero exit status is returned as
/// data; `Err` means the command could not be run at all.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Execute one control command.
    fn run_control(&self, args: &[String]) -> Result<ControlOutput>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Escape characters a double-quoted shell word treats specially.
pub fn escape_control_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if matches!(ch, '\\' | '`' | '$' | '"') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Quote one argument for a remote shell command line.
pub fn quote_control_arg(arg: &str) -> String {
    format!("\"{}\"", escape_control_text(arg))
}

fn run_process(mut command: Command, label: &str) -> Result<ControlOutput> {
    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            error!("Failed to run {}: {}", label, e);
            Error::Transport(format!("Failed to run {label}: {e}"))
        })?;

    Ok(ControlOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Runs the multiplexer on this machine.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    binary: String,
}

impl LocalTransport {
    /// Create a transport for the given multiplexer binary.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl Transport for LocalTransport {
    fn run_control(&self, args: &[String]) -> Result<ControlOutput> {
        debug!("Local control: {} {}", self.binary, args.first().map(String::as_str).unwrap_or(""));
        let mut command = Command::new(&self.binary);
        command.args(args);
        run_process(command, &self.binary)
    }

    fn describe(&self) -> String {
        format!("local:{}", self.binary)
    }
}

/// Runs the multiplexer on a remote host over ssh.
///
/// ssh joins its trailing arguments into one remote shell command line, so
/// every control argument is quoted with [`quote_control_arg`].
#[derive(Debug, Clone)]
pub struct SshTransport {
    host: String,
    user: Option<String>,
    port: Option<u16>,
    identity_file: Option<String>,
    options: Vec<String>,
    tmux_binary: String,
}

impl SshTransport {
    /// Create a transport for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
            options: Vec::new(),
            tmux_binary: "tmux".to_string(),
        }
    }

    /// Set the remote user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the remote port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the private key.
    pub fn with_identity_file(mut self, path: impl Into<String>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Add an `-o` option.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Set the remote multiplexer binary.
    pub fn with_tmux_binary(mut self, binary: impl Into<String>) -> Self {
        self.tmux_binary = binary.into();
        self
    }

    /// Full ssh argument vector for a control command.
    pub fn command_line(&self, args: &[String]) -> Vec<String> {
        let mut line = vec!["-T".to_string()];
        if let Some(port) = self.port {
            line.push("-p".to_string());
            line.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            line.push("-i".to_string());
            line.push(identity.clone());
        }
        for option in &self.options {
            line.push("-o".to_string());
            line.push(option.clone());
        }
        line.push(match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        });
        line.push("--".to_string());

        let mut remote = self.tmux_binary.clone();
        for arg in args {
            remote.push(' ');
            remote.push_str(&quote_control_arg(arg));
        }
        line.push(remote);
        line
    }
}

impl Transport for SshTransport {
    fn run_control(&self, args: &[String]) -> Result<ControlOutput> {
        debug!(
            "Ssh control on {}: {}",
            self.host,
            args.first().map(String::as_str).unwrap_or("")
        );
        let mut command = Command::new("ssh");
        command.args(self.command_line(args));
        run_process(command, "ssh")
    }

    fn describe(&self) -> String {
        format!("ssh:{}", self.host)
    }
}

/// Build the transport selected by configuration.
pub fn transport_from_settings(settings: &TransportSettings) -> Result<Arc<dyn Transport>> {
    match settings.kind {
        TransportKind::Local => Ok(Arc::new(LocalTransport::new(&settings.tmux_binary))),
        TransportKind::Ssh => {
            let host = settings.ssh_host.as_ref().ok_or_else(|| {
                Error::Config("transport.ssh_host is required for ssh".to_string())
            })?;
            let mut ssh = SshTransport::new(host).with_tmux_binary(&settings.tmux_binary);
            if let Some(user) = &settings.ssh_user {
                ssh = ssh.with_user(user);
            }
            if let Some(port) = settings.ssh_port {
                ssh = ssh.with_port(port);
            }
            if let Some(identity) = &settings.identity_file {
                ssh = ssh.with_identity_file(identity);
            }
            for option in &settings.ssh_options {
                ssh = ssh.with_option(option);
            }
            Ok(Arc::new(ssh))
        }
    }
}
