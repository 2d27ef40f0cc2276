//! Transport subprocess and its message channel.
//!
//! Each live remote owns one ssh subprocess whose stdio carries framed
//! messages. A writer task drains the bounded outbound queue onto the
//! child's stdin; a reader task decodes frames off its stdout and
//! feeds the master loop. Both tag their events with the link's
//! generation so the loop can discard leftovers from a torn-down link.

use std::process::Stdio;

use farside_proto::{read_message, write_message, FrameDecoder};
use farside_types::{Message, RemoteId};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::master::{LinkEvent, MasterEvent};

/// Bound on queued-but-unsent messages per remote. A peer that stalls
/// past this fails rather than growing memory without bound.
pub const OUTBOUND_BACKLOG: usize = 256;

/// Transport settings for one remote, after overlaying the per-remote
/// section on the global defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub remote_shell: String,
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub identity_file: Option<String>,
    pub username: Option<String>,
    pub remote_command: String,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            remote_shell: "ssh".to_string(),
            port: None,
            bind_address: None,
            identity_file: None,
            username: None,
            remote_command: "farside".to_string(),
        }
    }
}

/// A live transport: the child process and the outbound queue's
/// sending end. Dropping the sender stops the writer task.
#[derive(Debug)]
pub struct RemoteLink {
    pub tx: mpsc::Sender<Message>,
    pub child: Option<Child>,
}

/// Argument vector for the transport command. Batch mode keeps ssh
/// from prompting; the keepalives detect a dead peer within seconds.
#[must_use]
pub fn transport_argv(ssh: &SshSettings, hostname: &str) -> Vec<String> {
    let mut argv = vec![
        "-oBatchMode=yes".to_string(),
        "-oServerAliveInterval=2".to_string(),
        "-oServerAliveCountMax=3".to_string(),
    ];

    if let Some(port) = ssh.port {
        argv.push("-p".to_string());
        argv.push(port.to_string());
    }

    if let Some(bind) = &ssh.bind_address {
        argv.push("-b".to_string());
        argv.push(bind.clone());
    }

    if let Some(identity) = &ssh.identity_file {
        argv.push("-oIdentitiesOnly=yes".to_string());
        argv.push("-i".to_string());
        argv.push(identity.clone());
    }

    if let Some(user) = &ssh.username {
        argv.push("-l".to_string());
        argv.push(user.clone());
    }

    argv.push(hostname.to_string());
    argv.push(ssh.remote_command.clone());
    argv
}

/// Spawn the transport with piped stdio. stderr stays inherited so ssh
/// diagnostics land on the master's stderr.
pub fn spawn_transport(ssh: &SshSettings, hostname: &str) -> std::io::Result<Child> {
    Command::new(&ssh.remote_shell)
        .args(transport_argv(ssh, hostname))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
}

/// Start the reader and writer tasks for a freshly spawned transport.
pub(crate) fn start_io(
    stdin: ChildStdin,
    stdout: ChildStdout,
    id: RemoteId,
    generation: u64,
    events: mpsc::Sender<MasterEvent>,
    mut outbound: mpsc::Receiver<Message>,
) {
    let write_events = events.clone();
    tokio::spawn(async move {
        let mut stdin = stdin;
        while let Some(msg) = outbound.recv().await {
            if let Err(e) = write_message(&mut stdin, &msg).await {
                let _ = write_events
                    .send(MasterEvent::Link {
                        id,
                        generation,
                        event: LinkEvent::Closed {
                            reason: format!("write failed: {e}"),
                        },
                    })
                    .await;
                return;
            }
        }
        debug!(remote = id.0, "outbound queue closed, writer exiting");
    });

    tokio::spawn(async move {
        let mut stdout = stdout;
        let mut decoder = FrameDecoder::new();
        loop {
            let event = match read_message::<_, Message>(&mut stdout, &mut decoder).await {
                Ok(Some(msg)) => LinkEvent::Message(msg),
                Ok(None) => LinkEvent::Closed {
                    reason: "transport closed the stream".to_string(),
                },
                Err(e) => LinkEvent::Closed {
                    reason: e.to_string(),
                },
            };
            let closing = matches!(event, LinkEvent::Closed { .. });
            if events
                .send(MasterEvent::Link {
                    id,
                    generation,
                    event,
                })
                .await
                .is_err()
                || closing
            {
                return;
            }
        }
    });
}
