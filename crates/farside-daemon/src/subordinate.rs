//! Subordinate mode: the receiving end of a transport.
//!
//! When the binary is started with no arguments (by ssh, on the far
//! host), it reads framed messages on stdin, replays them through the
//! platform driver, and writes its responses on stdout. Log output that
//! matters operationally travels upstream as LogMsg frames so it lands
//! on the master's stderr.

use farside_platform::{Platform, PlatformEvent};
use farside_proto::{read_message, write_message, FrameDecoder};
use farside_types::{Message, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::DaemonError;

const EVENT_QUEUE: usize = 1024;

/// Run a subordinate session over stdin/stdout.
pub async fn run(platform: Box<dyn Platform>) -> Result<(), DaemonError> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run_with_io(platform, stdin, stdout).await
}

/// Run a subordinate session over arbitrary streams. Returns when the
/// master closes the stream cleanly; protocol violations are errors.
pub async fn run_with_io<R, W>(
    mut platform: Box<dyn Platform>,
    mut reader: R,
    mut writer: W,
) -> Result<(), DaemonError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (event_tx, mut events) = mpsc::channel(EVENT_QUEUE);
    platform.start(event_tx).await?;

    let mut decoder = FrameDecoder::new();
    let mut pump_alive = true;
    loop {
        tokio::select! {
            incoming = read_message::<_, Message>(&mut reader, &mut decoder) => {
                match incoming? {
                    Some(msg) => apply_message(platform.as_mut(), &mut writer, msg).await?,
                    None => {
                        info!("master closed the stream");
                        platform.shutdown();
                        return Ok(());
                    }
                }
            }
            event = events.recv(), if pump_alive => {
                match event {
                    Some(PlatformEvent::EdgeMask { old, new, x, y }) => {
                        write_message(&mut writer, &Message::EdgeMaskChange { old, new, x, y }).await?;
                    }
                    // local input is not captured in subordinate mode
                    Some(_) => {}
                    None => pump_alive = false,
                }
            }
        }
    }
}

/// Apply one message from the master.
async fn apply_message<W>(
    platform: &mut dyn Platform,
    writer: &mut W,
    msg: Message,
) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
{
    match msg {
        Message::Setup { version, params } => {
            if version != PROTOCOL_VERSION {
                let text = format!(
                    "protocol version mismatch: master speaks {version}, this end speaks {PROTOCOL_VERSION}"
                );
                write_message(writer, &Message::LogMsg { text: text.clone() }).await?;
                return Err(DaemonError::Config(text));
            }
            for (key, value) in &params {
                debug!(%key, %value, "setup parameter");
            }
            write_message(writer, &Message::Ready).await?;
            info!("session ready");
        }

        Message::KeyEvent { key, state } => platform.inject_key(key, state),
        Message::MoveRel { dx, dy } => platform.move_mouse_rel(dx, dy),
        Message::ClickEvent { button, state } => platform.inject_button(button, state),
        Message::SetMousePosScreenRel { x, y } => platform.set_mouse_pos_screenrel(x, y),
        Message::SetBrightness { level } => platform.set_display_brightness(level),
        Message::SetClipboard { text } => platform.set_clipboard_text(&text),

        Message::GetClipboard => {
            let text = platform.clipboard_text();
            write_message(writer, &Message::SetClipboard { text }).await?;
        }

        other => {
            let text = format!("unexpected {} message from master", other.kind());
            write_message(writer, &Message::LogMsg { text: text.clone() }).await?;
            return Err(DaemonError::Config(text));
        }
    }
    Ok(())
}
