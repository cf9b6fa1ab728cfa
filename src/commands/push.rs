//! Producer client: pipe lines into a run over the push endpoint.
//!
//! Each input line becomes one text frame on `/live/{runID}`. Lines sent by
//! other connections on the same run are echoed to the output as they
//! arrive. When input ends the sentinel is optionally sent, then the
//! connection is closed and the server's close reply awaited.
//!
//! # Example
//!
//! ```bash
//! ./train.sh | runstream push run-42 --finish
//! ```

use std::time::Duration;

use anyhow::{bail, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::run_id::RunId;
use crate::ws::{self, WsMessage};

/// How long to wait for the server to acknowledge our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for one push session.
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Server base URL (`http://host:port` or `ws://host:port`).
    pub url: String,
    /// Send `sentinel` after the last input line.
    pub finish: bool,
    /// End-of-run marker line.
    pub sentinel: String,
}

/// Push stdin into `run`, echoing peer lines to stdout.
pub async fn run(run: &RunId, options: &PushOptions) -> Result<usize> {
    let input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();
    pump(run, options, input, &mut output).await
}

/// Push `input` into `run`, echoing peer lines to `output`.
///
/// Returns the number of lines sent, not counting the sentinel.
pub async fn pump<R, W>(run: &RunId, options: &PushOptions, input: R, output: &mut W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let url = ws::live_url(&options.url, run);
    let (mut writer, mut reader) = ws::connect(&url).await?;
    log::info!("[Push] Connected to {url}");

    let mut lines = input.lines();
    let mut sent = 0usize;

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    writer.send_text(&line).await?;
                    sent += 1;
                }
                None => break,
            },
            msg = reader.recv() => {
                if !echo(msg, output).await? {
                    bail!("Server closed the connection after {sent} lines");
                }
            }
        }
    }

    if options.finish {
        writer.send_text(&options.sentinel).await?;
        log::info!("[Push] Sent end marker for run {run}");
    }
    writer.send_close("Producer finished").await?;

    // Keep echoing until the server answers the close
    let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
        while echo(reader.recv().await, output).await? {}
        Ok::<_, anyhow::Error>(())
    })
    .await;
    match drained {
        Ok(result) => result?,
        Err(_) => log::warn!("[Push] No close reply within {CLOSE_TIMEOUT:?}"),
    }
    drop(reader);
    let _ = writer.close().await;

    output.flush().await?;
    log::info!("[Push] Sent {sent} lines to run {run}");
    Ok(sent)
}

/// Write a received line to `output`. Returns `false` once the connection
/// has closed.
async fn echo<W: AsyncWrite + Unpin>(
    msg: Option<Result<WsMessage>>,
    output: &mut W,
) -> Result<bool> {
    match msg {
        None => Ok(false),
        Some(Err(e)) => Err(e),
        Some(Ok(WsMessage::Text(text))) => {
            output.write_all(text.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
            Ok(true)
        }
        Some(Ok(WsMessage::Binary(data))) => {
            log::debug!("[Push] Ignoring {} byte binary frame", data.len());
            Ok(true)
        }
        Some(Ok(WsMessage::Close { code, reason })) => {
            log::info!("[Push] Server closed connection ({code}): {reason}");
            Ok(false)
        }
    }
}
