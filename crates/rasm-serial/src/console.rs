//! Interactive serial console: terminal line in, device reply out.

use crate::port::SerialError;
use crate::session::SerialSession;
use std::future::Future;
use std::io::{BufRead, Read, Write};
use tokio::sync::mpsc;

/// Read lines from `reader` on a dedicated thread.
///
/// Terminal reads cannot be cancelled, so they live off the async task;
/// the channel closes on EOF or a read error.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("rasm-console-input".into())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "terminal read failed");
                        break;
                    }
                }
            }
            tracing::debug!("terminal input closed");
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn terminal reader");
    }
    rx
}

/// How a console run ended.
pub struct ConsoleSummary<P> {
    pub exchanges: usize,
    /// `None` when shutdown arrived while an exchange was in flight; the
    /// blocking worker still owns the session and drops it once the read
    /// deadline passes.
    pub session: Option<SerialSession<P>>,
}

/// Run the console until input ends or `shutdown` resolves.
///
/// Each line is sent verbatim, then one reply is read and printed. The
/// exchange runs on the blocking pool so `shutdown` is still observed while
/// a read waits out its timeout.
pub async fn run_console<P, W, S>(
    mut session: SerialSession<P>,
    mut lines: mpsc::Receiver<String>,
    mut out: W,
    shutdown: S,
) -> Result<ConsoleSummary<P>, SerialError>
where
    P: Read + Write + Send + 'static,
    W: Write,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut exchanges = 0usize;

    loop {
        let line = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!(exchanges, "console interrupted");
                break;
            }
            line = lines.recv() => match line {
                Some(line) => line,
                None => {
                    tracing::info!(exchanges, "console input ended");
                    break;
                }
            },
        };

        let mut task = tokio::task::spawn_blocking(move || {
            let reply = session.exchange(&line);
            (session, reply)
        });
        let (returned, reply) = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!(exchanges, "console interrupted while awaiting a reply");
                return Ok(ConsoleSummary { exchanges, session: None });
            }
            joined = &mut task => joined?,
        };
        session = returned;
        let reply = reply?;
        exchanges += 1;

        if !reply.is_utf8() {
            tracing::warn!(bytes = reply.bytes.len(), "reply is not valid UTF-8");
        }
        if reply.timed_out {
            tracing::debug!(received = reply.bytes.len(), "no delimiter before timeout");
        }

        writeln!(out, "{}", reply.line())?;
        out.flush()?;
    }

    Ok(ConsoleSummary {
        exchanges,
        session: Some(session),
    })
}
