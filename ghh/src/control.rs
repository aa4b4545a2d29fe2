//! Inter-process control channel.
//!
//! A pipe whose write end is installed as fd 3 in a child process. The child
//! finds it through `GHH_CONTROL_FD` and writes one JSON object per line.
//! The parent races the first line against the child's exit.

use crate::error::{Error, Result};
use event_stream::source::drive_lines;
use event_stream::EventStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::process::ExitStatus;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

pub const CONTROL_FD_ENV: &str = "GHH_CONTROL_FD";

/// Descriptor number of the write end inside the child.
pub const CONTROL_FD: RawFd = 3;

/// Parent side of a control channel.
pub struct ControlChannel {
    reader: OwnedFd,
    writer: OwnedFd,
}

impl ControlChannel {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?;
        Ok(Self { reader, writer })
    }

    /// Make `command` inherit the write end as fd 3.
    pub fn attach(&self, command: &mut Command) {
        let fd = self.writer.as_raw_fd();
        command.env(CONTROL_FD_ENV, CONTROL_FD.to_string());

        // SAFETY: only async-signal-safe libc calls run between fork and exec.
        unsafe {
            command.pre_exec(move || install_control_fd(fd));
        }
    }

    /// Close the parent's copy of the write end and return the read end.
    ///
    /// Call after the child has been spawned so the pipe reports EOF once
    /// the child exits.
    pub fn into_receiver(self) -> io::Result<pipe::Receiver> {
        drop(self.writer);
        pipe::Receiver::from_owned_fd(self.reader)
    }
}

fn install_control_fd(fd: RawFd) -> io::Result<()> {
    let rc = if fd == CONTROL_FD {
        // SAFETY: fd is a valid descriptor inherited from the parent.
        unsafe { libc::fcntl(fd, libc::F_SETFD, 0) }
    } else {
        // SAFETY: as above; dup2 clears FD_CLOEXEC on the new descriptor.
        unsafe { libc::dup2(fd, CONTROL_FD) }
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Child side of a control channel.
pub struct ControlWriter {
    file: File,
}

impl ControlWriter {
    /// Take ownership of the descriptor named by `GHH_CONTROL_FD`.
    ///
    /// Returns `None` when the process was not started with a control
    /// channel.
    pub fn from_env() -> io::Result<Option<Self>> {
        let Ok(raw) = std::env::var(CONTROL_FD_ENV) else {
            return Ok(None);
        };
        let fd: RawFd = raw
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("{CONTROL_FD_ENV}={raw:?}")))?;

        // SAFETY: the parent installed this descriptor for us and nothing
        // else in this process owns it.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        // Keep the channel away from anything this process spawns later.
        // SAFETY: owned is a valid open descriptor.
        if unsafe { libc::fcntl(owned.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: removing the variable before any other thread reads the
        // environment.
        unsafe { std::env::remove_var(CONTROL_FD_ENV) };

        Ok(Some(Self { file: File::from(owned) }))
    }

    /// Write one message as a JSON line.
    pub fn send<M: Serialize>(&mut self, message: &M) -> io::Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()
    }
}

/// Send `message` if this process has a control channel.
pub fn report<M: Serialize>(message: &M) -> io::Result<()> {
    match ControlWriter::from_env()? {
        Some(mut writer) => writer.send(message),
        None => {
            debug!("No control channel, handshake not sent");
            Ok(())
        }
    }
}

/// Wait for the first message on `receiver`, or for `child` to exit.
///
/// If the child exits first, the pipe is drained so a message written just
/// before exiting still wins. No timeout is applied.
pub async fn await_handshake<M>(receiver: pipe::Receiver, child: &mut Child) -> Result<M>
where
    M: DeserializeOwned + Clone + Send + 'static,
{
    let lines: EventStream<String, Error> = EventStream::new();
    let mut first = lines
        .try_map(|line: &String| serde_json::from_str::<M>(line).map_err(|e| Error::decode(format!("{e}: {line}"))))
        .first();
    let reader = tokio::spawn(drive_lines(receiver, lines.clone()));

    let outcome = tokio::select! {
        biased;
        message = &mut first => message,
        status = child.wait() => {
            let exit = describe_exit(status);
            debug!(%exit, "Child exited before handshake, draining control channel");
            match first.await {
                Ok(None) => Err(Error::spawn(format!("process exited before handshake ({exit})"))),
                other => other,
            }
        }
    };

    lines.end();
    reader.abort();

    match outcome {
        Ok(Some(message)) => Ok(message),
        Ok(None) => Err(Error::spawn("control channel closed before handshake")),
        Err(error) => {
            warn!(%error, "Handshake failed");
            Err(error)
        }
    }
}

fn describe_exit(status: io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(error) => format!("wait failed: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::process::Stdio;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Hello {
        hello: String,
    }

    fn shell(script: &str) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script).stdin(Stdio::null());
        command
    }

    async fn handshake_of(script: &str) -> Result<Hello> {
        let channel = ControlChannel::new().unwrap();
        let mut command = shell(script);
        channel.attach(&mut command);
        let mut child = command.spawn().unwrap();
        drop(command);
        let receiver = channel.into_receiver().unwrap();
        let outcome = await_handshake::<Hello>(receiver, &mut child).await;
        let _ = child.start_kill();
        let _ = child.wait().await;
        outcome
    }

    #[tokio::test]
    async fn test_first_line_is_the_handshake() {
        let outcome = handshake_of(r#"echo '{"hello":"world"}' >&"$GHH_CONTROL_FD"; sleep 5"#).await;
        assert_eq!(
            outcome,
            Ok(Hello {
                hello: "world".into()
            })
        );
    }

    #[tokio::test]
    async fn test_message_written_before_exit_still_wins() {
        let outcome = handshake_of(r#"echo '{"hello":"bye"}' >&3; exit 1"#).await;
        assert_eq!(outcome.map(|h| h.hello), Ok("bye".to_string()));
    }

    #[tokio::test]
    async fn test_exit_without_message_is_a_spawn_error() {
        let outcome = handshake_of("exit 3").await;
        assert!(matches!(outcome, Err(Error::Spawn(_))));
    }

    #[tokio::test]
    async fn test_garbage_is_a_decode_error() {
        let outcome = handshake_of("echo 'not json' >&3; sleep 5").await;
        assert!(matches!(outcome, Err(Error::Decode(_))));
    }
}
