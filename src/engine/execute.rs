// ABOUTME: Executor: runs the job on an established session and maps the result to an Outcome.
// ABOUTME: Commands use an exec channel with bounded capture; transfers go through SCP.

use super::connect::{CLOSE_TIMEOUT, Session};
use super::scp;
use crate::ssh;
use crate::transport::{Channel, ChannelEvent, Connection};
use crate::types::{CommandOutput, Direction, Job, Outcome, Target, Transfer};
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::debug;

/// Run `job` for `target` over `session`, bounded by `limit`.
///
/// Never retries; a timeout closes the channel and yields `Outcome::TimedOut`.
pub async fn execute<C: Connection>(
    session: &Session<C>,
    target: &Target,
    job: &Job,
    limit: Duration,
    output_limit: usize,
) -> Outcome {
    let deadline = Instant::now() + limit;
    match job {
        Job::Command(command) => {
            run_command(session.connection(), command, deadline, output_limit).await
        }
        Job::Transfer(transfer) => run_transfer(session.connection(), target, transfer, deadline).await,
    }
}

async fn run_command<C: Connection>(
    connection: &C,
    command: &str,
    deadline: Instant,
    output_limit: usize,
) -> Outcome {
    let mut channel = match timeout_at(deadline, connection.open_channel()).await {
        Ok(Ok(channel)) => channel,
        Ok(Err(e)) => return Outcome::CommandFailed(CommandOutput::failed(e.to_string())),
        Err(_) => return Outcome::TimedOut,
    };

    let captured = timeout_at(deadline, capture(&mut channel, command, output_limit)).await;
    close_channel(&mut channel).await;

    match captured {
        Ok(Ok(output)) if output.success() => Outcome::Success(output),
        Ok(Ok(output)) => Outcome::CommandFailed(output),
        Ok(Err(e)) => Outcome::CommandFailed(CommandOutput::failed(e.to_string())),
        Err(_) => {
            debug!("command timed out; channel closed");
            Outcome::TimedOut
        }
    }
}

/// Exec `command` and collect its output until the channel reports exit and EOF.
async fn capture<Ch: Channel>(
    channel: &mut Ch,
    command: &str,
    output_limit: usize,
) -> ssh::Result<CommandOutput> {
    channel.exec(command).await?;

    let mut stdout = BoundedBuffer::new(output_limit);
    let mut stderr = BoundedBuffer::new(output_limit);
    let mut exit_code = None;
    let mut signal = None;
    let mut got_eof = false;

    loop {
        match channel.recv().await {
            Some(ChannelEvent::Stdout(data)) => stdout.push(&data),
            Some(ChannelEvent::Stderr(data)) => stderr.push(&data),
            Some(ChannelEvent::ExitStatus(code)) => {
                exit_code = Some(code);
                if got_eof {
                    break;
                }
            }
            Some(ChannelEvent::ExitSignal(name)) => signal = Some(name),
            Some(ChannelEvent::Eof) => {
                got_eof = true;
                if exit_code.is_some() {
                    break;
                }
            }
            Some(ChannelEvent::Close) | None => break,
        }
    }

    let truncated = stdout.truncated || stderr.truncated;
    let error = match (exit_code, &signal) {
        (None, None) => Some("channel closed without exit status".to_string()),
        _ => None,
    };

    Ok(CommandOutput {
        exit_code,
        signal,
        stdout: stdout.data,
        stderr: stderr.data,
        truncated,
        error,
    })
}

async fn run_transfer<C: Connection>(
    connection: &C,
    target: &Target,
    transfer: &Transfer,
    deadline: Instant,
) -> Outcome {
    let work = async {
        match transfer.direction {
            Direction::Upload => {
                scp::upload(connection, &transfer.local_path, &transfer.remote_path).await
            }
            Direction::Download => {
                let local = transfer.local_path.join(target.id().to_string());
                scp::download(connection, &transfer.remote_path, &local).await
            }
        }
    };

    match timeout_at(deadline, work).await {
        Ok(Ok(bytes)) => Outcome::Transferred { bytes },
        Ok(Err(e)) => Outcome::TransferFailed(e.to_string()),
        Err(_) => Outcome::TimedOut,
    }
}

async fn close_channel<Ch: Channel>(channel: &mut Ch) {
    match timeout(CLOSE_TIMEOUT, channel.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("error while closing channel: {}", e),
        Err(_) => debug!("closing channel timed out"),
    }
}

/// Keeps at most `limit` bytes; anything beyond is dropped and flagged.
#[derive(Debug)]
struct BoundedBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BoundedBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}
