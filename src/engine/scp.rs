// ABOUTME: SCP remote-copy protocol over an exec channel, for single regular files.
// ABOUTME: Upload drives `scp -t`, download drives `scp -f`; both verify the byte count.

use crate::ssh;
use crate::transport::{Channel, ChannelEvent, Connection};
use bytes::{Buf, BytesMut};
use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Snafu)]
pub enum TransferError {
    #[snafu(display("cannot read {}: {source}", path.display()))]
    ReadLocal {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("cannot write {}: {source}", path.display()))]
    WriteLocal {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("{} is not a regular file", path))]
    NotAFile { path: String },

    #[snafu(display("remote error: {message}"))]
    Remote { message: String },

    #[snafu(display("size mismatch: expected {expected} bytes, transferred {actual}"))]
    SizeMismatch { expected: u64, actual: u64 },

    #[snafu(display("protocol error: {message}"))]
    Protocol { message: String },

    #[snafu(display("{source}"))]
    Channel { source: ssh::Error },
}

/// The `C` control record announcing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub mode: u32,
    pub size: u64,
    pub name: String,
}

impl FileHeader {
    /// Parse a record such as `C0644 1024 notes.txt` (without the trailing newline).
    pub fn parse(line: &str) -> Result<Self, TransferError> {
        let invalid = || TransferError::Protocol {
            message: format!("malformed file record {:?}", line),
        };

        let rest = line.strip_prefix('C').ok_or_else(invalid)?;
        let mut parts = rest.splitn(3, ' ');
        let mode = parts
            .next()
            .and_then(|m| u32::from_str_radix(m, 8).ok())
            .ok_or_else(invalid)?;
        let size = parts
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(invalid)?;

        Ok(Self {
            mode,
            size,
            name: name.to_string(),
        })
    }

    /// Render the record, newline included. Names that would break the framing are refused.
    pub fn encode(&self) -> Result<String, TransferError> {
        if self.name.is_empty() || self.name.contains(['\n', '/']) {
            return ProtocolSnafu {
                message: format!("file name {:?} cannot be sent over scp", self.name),
            }
            .fail();
        }
        Ok(format!("C{:04o} {} {}\n", self.mode & 0o7777, self.size, self.name))
    }
}

/// Copy `local` to `remote` on the connected host. Returns the bytes sent.
pub async fn upload<C: Connection>(
    connection: &C,
    local: &Path,
    remote: &str,
) -> Result<u64, TransferError> {
    let metadata = tokio::fs::metadata(local)
        .await
        .context(ReadLocalSnafu { path: local })?;
    if !metadata.is_file() {
        return NotAFileSnafu {
            path: local.display().to_string(),
        }
        .fail();
    }

    let header = FileHeader {
        mode: local_mode(&metadata),
        size: metadata.len(),
        name: local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::NotAFile {
                path: local.display().to_string(),
            })?,
    };

    let record = header.encode()?;
    let mut file = tokio::fs::File::open(local)
        .await
        .context(ReadLocalSnafu { path: local })?;

    let mut stream = ScpStream::open(connection, &format!("scp -t {}", shell_quote(remote))).await?;
    let result: Result<u64, TransferError> = async {
        stream.read_ack().await?;
        stream.send(record.as_bytes()).await?;
        stream.read_ack().await?;

        let mut sent = 0u64;
        let mut chunk = vec![0u8; CHUNK_SIZE];
        while sent < header.size {
            let want = CHUNK_SIZE.min((header.size - sent) as usize);
            let n = file
                .read(&mut chunk[..want])
                .await
                .context(ReadLocalSnafu { path: local })?;
            if n == 0 {
                break;
            }
            stream.send(&chunk[..n]).await?;
            sent += n as u64;
        }
        if sent != header.size {
            // The file shrank under us; the remote end is still waiting for bytes.
            return SizeMismatchSnafu {
                expected: header.size,
                actual: sent,
            }
            .fail();
        }

        stream.send(&[0]).await?;
        stream.read_ack().await?;
        stream.finish().await?;
        Ok(sent)
    }
    .await;

    stream.close().await;
    result
}

/// Copy `remote` from the connected host into the file `local`. Returns the bytes received.
///
/// A partially written local file is removed on failure, and also when the
/// returned future is dropped by a timeout or a stop.
pub async fn download<C: Connection>(
    connection: &C,
    remote: &str,
    local: &Path,
) -> Result<u64, TransferError> {
    let mut stream = ScpStream::open(connection, &format!("scp -f {}", shell_quote(remote))).await?;

    let result: Result<u64, TransferError> = async {
        stream.send(&[0]).await?;
        let header = stream.read_file_header(remote).await?;
        stream.send(&[0]).await?;

        // Declared before the file so the handle is closed before the guard removes it.
        let mut partial = PartialFile::new(local);
        let mut file = tokio::fs::File::create(local)
            .await
            .context(WriteLocalSnafu { path: local })?;
        partial.arm();

        let received = stream.copy_to(&mut file, header.size, local).await?;
        if received != header.size {
            return SizeMismatchSnafu {
                expected: header.size,
                actual: received,
            }
            .fail();
        }
        file.flush().await.context(WriteLocalSnafu { path: local })?;

        stream.read_ack().await?;
        stream.send(&[0]).await?;
        stream.finish().await?;

        apply_mode(local, header.mode).await?;
        partial.keep();
        Ok(received)
    }
    .await;

    stream.close().await;
    result
}

/// Removes a download target on drop unless it was kept.
///
/// Covers error returns as well as the future being dropped by a timeout or a stop.
struct PartialFile<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> PartialFile<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, armed: false }
    }

    /// The file now exists and belongs to this download.
    fn arm(&mut self) {
        self.armed = true;
    }

    fn keep(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(self.path) {
            debug!("failed to remove partial download {}: {}", self.path.display(), e);
        }
    }
}

/// Buffered reader/writer over one SCP exec channel.
struct ScpStream<Ch: Channel> {
    channel: Ch,
    buf: BytesMut,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    ended: bool,
}

impl<Ch: Channel> ScpStream<Ch> {
    async fn open<C>(connection: &C, command: &str) -> Result<Self, TransferError>
    where
        C: Connection<Channel = Ch>,
    {
        let mut channel = connection.open_channel().await.context(ChannelSnafu)?;
        if let Err(source) = channel.exec(command).await {
            let _ = channel.close().await;
            return Err(TransferError::Channel { source });
        }
        Ok(Self {
            channel,
            buf: BytesMut::new(),
            stderr: Vec::new(),
            exit_status: None,
            ended: false,
        })
    }

    /// Pull the next message into the buffer. Returns false once the remote side is done.
    async fn fill(&mut self) -> bool {
        while !self.ended {
            match self.channel.recv().await {
                Some(ChannelEvent::Stdout(data)) => {
                    self.buf.extend_from_slice(&data);
                    return true;
                }
                Some(ChannelEvent::Stderr(data)) => self.stderr.extend_from_slice(&data),
                Some(ChannelEvent::ExitStatus(code)) => self.exit_status = Some(code),
                // Exit status may still follow EOF, so keep reading until close.
                Some(ChannelEvent::ExitSignal(_)) | Some(ChannelEvent::Eof) => {}
                Some(ChannelEvent::Close) | None => self.ended = true,
            }
        }
        false
    }

    fn ended_early(&self) -> TransferError {
        let message = String::from_utf8_lossy(&self.stderr).trim().to_string();
        if !message.is_empty() {
            return TransferError::Remote { message };
        }
        match self.exit_status {
            Some(code) if code != 0 => TransferError::Remote {
                message: format!("scp exited with status {}", code),
            },
            _ => TransferError::Protocol {
                message: "channel closed unexpectedly".to_string(),
            },
        }
    }

    async fn read_byte(&mut self) -> Result<u8, TransferError> {
        while self.buf.is_empty() {
            if !self.fill().await {
                return Err(self.ended_early());
            }
        }
        Ok(self.buf.get_u8())
    }

    async fn read_line(&mut self) -> Result<String, TransferError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                return Ok(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            if !self.fill().await {
                return Err(self.ended_early());
            }
        }
    }

    /// Expect a `\0` acknowledgement; `\1` and `\2` carry an error message.
    async fn read_ack(&mut self) -> Result<(), TransferError> {
        match self.read_byte().await? {
            0 => Ok(()),
            1 | 2 => {
                let message = self.read_line().await?;
                RemoteSnafu { message }.fail()
            }
            other => ProtocolSnafu {
                message: format!("unexpected response byte {:#04x}", other),
            }
            .fail(),
        }
    }

    async fn read_file_header(&mut self, remote: &str) -> Result<FileHeader, TransferError> {
        loop {
            match self.read_byte().await? {
                b'C' => {
                    let line = self.read_line().await?;
                    return FileHeader::parse(&format!("C{}", line));
                }
                // Timestamp record; only sent with -p but harmless to skip.
                b'T' => {
                    self.read_line().await?;
                    self.send(&[0]).await?;
                }
                b'D' => {
                    return NotAFileSnafu {
                        path: remote.to_string(),
                    }
                    .fail();
                }
                1 | 2 => {
                    let message = self.read_line().await?;
                    return RemoteSnafu { message }.fail();
                }
                other => {
                    return ProtocolSnafu {
                        message: format!("unexpected record type {:#04x}", other),
                    }
                    .fail();
                }
            }
        }
    }

    /// Copy exactly `size` bytes into `file`, or fewer if the stream ends first.
    async fn copy_to(
        &mut self,
        file: &mut tokio::fs::File,
        size: u64,
        path: &Path,
    ) -> Result<u64, TransferError> {
        let mut received = 0u64;
        while received < size {
            if self.buf.is_empty() && !self.fill().await {
                break;
            }
            let take = self.buf.len().min((size - received) as usize);
            let chunk = self.buf.split_to(take);
            file.write_all(&chunk)
                .await
                .context(WriteLocalSnafu { path })?;
            received += take as u64;
        }
        Ok(received)
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.channel.send(data).await.context(ChannelSnafu)
    }

    /// Signal end of input and wait for the remote scp to exit cleanly.
    async fn finish(&mut self) -> Result<(), TransferError> {
        self.channel.eof().await.context(ChannelSnafu)?;
        while self.exit_status.is_none() && self.fill().await {}
        match self.exit_status {
            Some(0) | None => Ok(()),
            Some(_) => Err(self.ended_early()),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            debug!("error while closing scp channel: {}", e);
        }
    }
}

/// Quote a path for the remote POSIX shell.
fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

#[cfg(unix)]
fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn local_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

#[cfg(unix)]
async fn apply_mode(path: &Path, mode: u32) -> Result<(), TransferError> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
    tokio::fs::set_permissions(path, permissions)
        .await
        .context(WriteLocalSnafu { path })
}

#[cfg(not(unix))]
async fn apply_mode(_path: &Path, _mode: u32) -> Result<(), TransferError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_record() {
        let header = FileHeader::parse("C0755 1024 deploy.sh").unwrap();
        assert_eq!(
            header,
            FileHeader {
                mode: 0o755,
                size: 1024,
                name: "deploy.sh".to_string()
            }
        );
    }

    #[test]
    fn file_names_may_contain_spaces() {
        let header = FileHeader::parse("C0644 3 release notes.txt").unwrap();
        assert_eq!(header.name, "release notes.txt");
    }

    #[test]
    fn rejects_malformed_records() {
        assert!(FileHeader::parse("C0644 abc file").is_err());
        assert!(FileHeader::parse("D0755 0 dir").is_err());
        assert!(FileHeader::parse("C0644 12").is_err());
    }

    #[test]
    fn encodes_mode_as_four_octal_digits() {
        let header = FileHeader {
            mode: 0o100644,
            size: 5,
            name: "a.txt".to_string(),
        };
        assert_eq!(header.encode().unwrap(), "C0644 5 a.txt\n");
    }

    #[test]
    fn refuses_names_that_break_the_record() {
        let header = FileHeader {
            mode: 0o644,
            size: 5,
            name: "evil\nC0777 1 other".to_string(),
        };
        assert!(matches!(
            header.encode(),
            Err(TransferError::Protocol { .. })
        ));
    }

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(shell_quote("/tmp/it's"), r"'/tmp/it'\''s'");
    }
}
