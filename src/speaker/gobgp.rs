use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};

use super::{Speaker, SpeakerError, UpdateFeed};

pub const GOBGP_CMD: &str = "gobgp";

/// GoBGP driven through its command line client
#[derive(Debug)]
pub struct GobgpSpeaker {
    command: String,
    // Global client flags, e.g. ["-p", "50051"]
    args: Vec<String>,
}

impl GobgpSpeaker {
    pub fn new(command: &str, args: Vec<String>) -> Self {
        Self {
            command: command.to_string(),
            args,
        }
    }

    fn build(&self, subcommand: &[&str]) -> (String, Command) {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args).args(subcommand).stdin(Stdio::null());
        let display = self
            .args
            .iter()
            .map(String::as_str)
            .chain(subcommand.iter().copied())
            .fold(self.command.clone(), |acc, arg| acc + " " + arg);
        (display, cmd)
    }

    async fn run(&self, subcommand: &[&str]) -> Result<String, SpeakerError> {
        let (display, mut cmd) = self.build(subcommand);
        trace!("Executing '{}'", display);
        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| SpeakerError::Spawn(display.clone(), err))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SpeakerError::Failed(display, stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Speaker for GobgpSpeaker {
    async fn rib_snapshot(&self) -> Result<String, SpeakerError> {
        let rib = self.run(&["global", "rib", "-j"]).await?;
        debug!("Fetched {} bytes of RIB from {}", rib.len(), self.command);
        Ok(rib)
    }

    async fn monitor(&self) -> Result<UpdateFeed, SpeakerError> {
        let (display, mut cmd) = self.build(&["monitor", "global", "rib", "-j"]);
        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| SpeakerError::Spawn(display.clone(), err))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpeakerError::Failed(display.clone(), "stdout not captured".to_string()))?;
        info!("Monitoring RIB updates with '{}'", display);
        Ok(Box::new(ChildFeed {
            command: display,
            child,
            stdout,
        }))
    }

    async fn originate(&self, prefix: IpNetwork) -> Result<(), SpeakerError> {
        let family = if prefix.is_ipv4() { "ipv4" } else { "ipv6" };
        let prefix = prefix.to_string();
        self.run(&["global", "rib", "add", prefix.as_str(), "-a", family])
            .await?;
        info!("Originated {} into the global RIB", prefix);
        Ok(())
    }
}

/// Stdout of the monitor process, the process is killed when dropped
///
/// The monitor never ends on its own, so end of output is reported as an
/// `UnexpectedEof` error carrying the exit status when it is known.
struct ChildFeed {
    command: String,
    child: Child,
    stdout: ChildStdout,
}

impl ChildFeed {
    fn closed(&mut self) -> io::Error {
        let reason = match self.child.try_wait() {
            Ok(Some(status)) => format!("'{}' exited with {}", self.command, status),
            _ => format!("'{}' closed its output", self.command),
        };
        warn!("{}", reason);
        io::Error::new(io::ErrorKind::UnexpectedEof, reason)
    }
}

impl AsyncRead for ChildFeed {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let filled = buf.filled().len();
        let wants_data = buf.remaining() > 0;
        match Pin::new(&mut self.stdout).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if wants_data && buf.filled().len() == filled => {
                Poll::Ready(Err(self.closed()))
            }
            poll => poll,
        }
    }
}
