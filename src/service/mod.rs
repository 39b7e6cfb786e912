//! Line-framed JSON transport for the kernel.
//!
//! Each input line is one inbound message tuple; each output line is one
//! frame. The service emits the `online` status before reading anything,
//! feeds decoded messages to the dispatcher and reports undecodable lines on
//! the process fault channel. Reading, dispatching and writing run
//! concurrently on the calling task.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::runtime::{Frame, Kernel, Message, Outbox, ServerConfig};

/// Capacity of the queue between the reader and the dispatcher.
pub const INBOUND_CAPACITY: usize = 64;

/// Serve the kernel over the process's stdin/stdout.
pub async fn serve_stdio(config: ServerConfig) -> io::Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    run_service(config, reader, tokio::io::stdout()).await?;
    Ok(())
}

/// Serve the kernel over an arbitrary reader/writer pair until the reader
/// reaches end of input and every queued frame has been written. Returns the
/// writer.
pub async fn run_service<R, W>(config: ServerConfig, reader: R, writer: W) -> io::Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (outbox, frames) = Outbox::channel();
    debug!(protocol = crate::PROTOCOL_VERSION, "service online");
    outbox.send(Frame::Online);

    let kernel = Kernel::new(config, outbox.clone());
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

    let read = read_messages(reader, inbound_tx, outbox);
    let dispatch = async move {
        kernel.dispatcher().serve(inbound_rx).await;
        debug!(contexts = kernel.contexts().len(), "dispatcher finished");
    };
    let write = write_frames(frames, writer);

    let (read_result, (), write_result) = tokio::join!(read, dispatch, write);
    read_result?;
    write_result
}

async fn read_messages<R>(
    mut reader: R,
    inbound: mpsc::Sender<Message>,
    outbox: Outbox,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(error) => {
                warn!(%error, "input line is not UTF-8");
                outbox.send(Frame::Stderr(format!("input line is not valid UTF-8: {error}")));
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match Message::decode(line) {
            Ok(message) => {
                if inbound.send(message).await.is_err() {
                    warn!("dispatcher stopped; discarding remaining input");
                    break;
                }
            }
            Err(error) => {
                warn!(%error, "undecodable input line");
                outbox.send(Frame::Stderr(error.to_string()));
            }
        }
    }
    Ok(())
}

async fn write_frames<W>(mut frames: mpsc::UnboundedReceiver<Frame>, mut writer: W) -> io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let mut line = frame.encode();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(writer)
}
