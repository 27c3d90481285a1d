//! Launching and waiting on the external ffmpeg process.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, Command};
use tracing::{info, warn};

use crate::errors::SupervisorError;
use crate::session::{DeliveryMode, StreamSession};

pub const DEFAULT_TOOL: &str = "ffmpeg";

/// Which program to run. `leading_args` go before the generated ffmpeg arguments, which
/// allows wrappers such as `nice -n 10 ffmpeg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub program: String,
    pub leading_args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_TOOL.to_string(),
            leading_args: Vec::new(),
        }
    }
}

impl ToolConfig {
    pub fn program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// ffmpeg arguments for the session's delivery mode.
pub fn tool_arguments(session: &StreamSession) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-listen".into(),
        "1".into(),
        "-i".into(),
        session.rtmp_input(),
        "-c".into(),
        "copy".into(),
        "-f".into(),
        "hls".into(),
    ];
    match session.playlist_path() {
        Some(playlist) if session.mode() == DeliveryMode::LocalFile => {
            args.extend([
                "-hls_time".into(),
                session.segment_duration().to_string(),
                "-hls_list_size".into(),
                "0".into(),
                playlist.to_string_lossy().into_owned(),
            ]);
        }
        _ => {
            // ffmpeg expects every custom header line to end in CRLF.
            args.extend([
                "-headers".into(),
                format!("Authorization: {}\r\n", session.token()),
                "-method".into(),
                "POST".into(),
                "-hls_time".into(),
                session.segment_duration().to_string(),
                "-hls_list_size".into(),
                "0".into(),
                session.playlist_upload_url(),
            ]);
        }
    }
    args
}

pub struct ProcessSupervisor {
    tool: ToolConfig,
}

impl ProcessSupervisor {
    pub fn new(tool: ToolConfig) -> Self {
        Self { tool }
    }

    pub fn tool(&self) -> &ToolConfig {
        &self.tool
    }

    /// Create the output directory for local-file delivery. No-op in self-push mode.
    pub async fn prepare(&self, session: &StreamSession) -> Result<(), SupervisorError> {
        let Some(dir) = output_directory(session) else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| SupervisorError::OutputDirectory {
                path: dir.to_path_buf(),
                source,
            })
    }

    /// Spawn the tool. Self-push mode mirrors its output to this process's console; local-file
    /// mode discards stdout and pipes stderr for [`SupervisedProcess::take_diagnostics`].
    pub fn launch(&self, session: &StreamSession) -> Result<SupervisedProcess, SupervisorError> {
        let args = tool_arguments(session);
        let mut command = Command::new(&self.tool.program);
        command
            .args(&self.tool.leading_args)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        match session.mode() {
            DeliveryMode::SelfPush => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            DeliveryMode::LocalFile => {
                command.stdout(Stdio::null()).stderr(Stdio::piped());
            }
        }
        info!(
            event = "tool.launching",
            domain = "supervisor",
            command = %display_command(&self.tool, &args, session.token())
        );
        let child = command.spawn().map_err(|source| SupervisorError::Launch {
            program: self.tool.program.clone(),
            source,
        })?;
        info!(
            event = "tool.launched",
            domain = "supervisor",
            pid = child.id().unwrap_or_default()
        );
        Ok(SupervisedProcess {
            child,
            program: self.tool.program.clone(),
        })
    }
}

/// Command line for logs with the token blanked out.
pub fn display_command(tool: &ToolConfig, args: &[String], token: &str) -> String {
    std::iter::once(tool.program.as_str())
        .chain(tool.leading_args.iter().map(String::as_str))
        .chain(args.iter().map(String::as_str))
        .map(|arg| {
            let arg = arg.replace(token, "<redacted>").replace("\r\n", "\\r\\n");
            if arg.contains(' ') {
                format!("{arg:?}")
            } else {
                arg
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A running tool. Dropping it kills the process.
pub struct SupervisedProcess {
    child: Child,
    program: String,
}

impl SupervisedProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// The piped stderr stream; `None` after the first call or in self-push mode.
    pub fn take_diagnostics(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Wait for the tool to exit and log how it ended.
    pub async fn wait(mut self) -> Result<ExitStatus, SupervisorError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|source| SupervisorError::Wait {
                program: self.program.clone(),
                source,
            })?;
        if status.success() {
            info!(event = "tool.exited", domain = "supervisor", status = %status);
        } else {
            warn!(event = "tool.exited", domain = "supervisor", status = %status, "QUIT");
        }
        Ok(status)
    }
}

/// Output directory the tool will write into, if any.
pub fn output_directory(session: &StreamSession) -> Option<&Path> {
    session
        .output_directory()
        .filter(|_| session.mode() == DeliveryMode::LocalFile)
}
