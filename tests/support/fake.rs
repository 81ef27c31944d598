// ABOUTME: Scripted in-memory transport for engine tests.
// ABOUTME: Emulates refusing, hanging and auth-rejecting hosts plus exec and SCP channels.

use async_trait::async_trait;
use herd::ssh::{Error, Result};
use herd::transport::{AuthResult, Channel, ChannelEvent, Connection, Transport};
use herd::types::{AuthMethod, Target};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How a host reacts to a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Accept,
    Refuse,
    /// Never completes the handshake.
    Hang,
    RejectAuth,
    /// Accepts, but never answers the disconnect.
    StallClose,
}

/// Counters shared by every connection of one transport.
#[derive(Debug, Default)]
pub struct Stats {
    active: AtomicUsize,
    high_water: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    open_channels: AtomicUsize,
}

impl Stats {
    /// Connections currently open or being opened.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Most connections that were ever open or being opened at the same time.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connections closed through `Connection::close`.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::SeqCst)
    }
}

/// Decrements the active count when the connection attempt or connection goes away.
#[derive(Debug)]
struct ActiveGuard(Arc<Stats>);

impl ActiveGuard {
    fn new(stats: &Arc<Stats>) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.high_water.fetch_max(now, Ordering::SeqCst);
        stats.connects.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(stats))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct ChannelGuard(Arc<Stats>);

impl ChannelGuard {
    fn new(stats: &Arc<Stats>) -> Self {
        stats.open_channels.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(stats))
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.0.open_channels.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Remote files, keyed by host then path.
#[derive(Debug, Default)]
pub struct RemoteFs {
    files: Mutex<HashMap<(String, String), (u32, Vec<u8>)>>,
}

impl RemoteFs {
    pub fn put(&self, host: &str, path: &str, mode: u32, data: Vec<u8>) {
        self.files
            .lock()
            .insert((host.to_string(), path.to_string()), (mode, data));
    }

    pub fn get(&self, host: &str, path: &str) -> Option<(u32, Vec<u8>)> {
        self.files
            .lock()
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    behaviours: HashMap<String, Behaviour>,
    latency: Duration,
    unwritable: HashSet<(String, String)>,
    stats: Arc<Stats>,
    fs: Arc<RemoteFs>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(host.to_string(), behaviour);
        self
    }

    /// Delay before every successful handshake.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Uploads to `path` on `host` are refused with a permission error.
    pub fn unwritable(mut self, host: &str, path: &str) -> Self {
        self.unwritable.insert((host.to_string(), path.to_string()));
        self
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    pub fn fs(&self) -> Arc<RemoteFs> {
        Arc::clone(&self.fs)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Connection = FakeConnection;

    async fn connect(&self, target: &Target) -> Result<FakeConnection> {
        let guard = ActiveGuard::new(&self.stats);
        let behaviour = self
            .behaviours
            .get(&target.host)
            .copied()
            .unwrap_or(Behaviour::Accept);

        match behaviour {
            Behaviour::Refuse => Err(Error::Connection(format!(
                "{}:{}: Connection refused (os error 111)",
                target.host, target.port
            ))),
            Behaviour::Hang => std::future::pending().await,
            Behaviour::Accept | Behaviour::RejectAuth | Behaviour::StallClose => {
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                Ok(FakeConnection {
                    host: target.host.clone(),
                    reject_auth: behaviour == Behaviour::RejectAuth,
                    stall_close: behaviour == Behaviour::StallClose,
                    unwritable: self
                        .unwritable
                        .iter()
                        .filter(|(host, _)| host == &target.host)
                        .map(|(_, path)| path.clone())
                        .collect(),
                    stats: Arc::clone(&self.stats),
                    fs: Arc::clone(&self.fs),
                    _guard: guard,
                })
            }
        }
    }
}

#[derive(Debug)]
pub struct FakeConnection {
    host: String,
    reject_auth: bool,
    stall_close: bool,
    unwritable: HashSet<String>,
    stats: Arc<Stats>,
    fs: Arc<RemoteFs>,
    _guard: ActiveGuard,
}

#[async_trait]
impl Connection for FakeConnection {
    type Channel = FakeChannel;

    async fn authenticate(&mut self, _user: &str, method: &AuthMethod) -> Result<AuthResult> {
        if self.reject_auth {
            return Ok(AuthResult::Rejected("permission denied".to_string()));
        }
        match method {
            AuthMethod::Password(password) if password.expose() == "wrong" => {
                Ok(AuthResult::Rejected("permission denied".to_string()))
            }
            AuthMethod::PrivateKey { path, .. } if !path.exists() => Err(Error::KeyLoadFailed {
                path: path.clone(),
                reason: "No such file or directory".to_string(),
            }),
            _ => Ok(AuthResult::Accepted),
        }
    }

    async fn open_channel(&self) -> Result<FakeChannel> {
        Ok(FakeChannel {
            host: self.host.clone(),
            unwritable: self.unwritable.clone(),
            fs: Arc::clone(&self.fs),
            outgoing: VecDeque::new(),
            mode: Mode::Idle,
            input: Vec::new(),
            closed: false,
            _guard: ChannelGuard::new(&self.stats),
        })
    }

    async fn close(self) -> Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        if self.stall_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Mode {
    Idle,
    /// Command that finishes after sleeping.
    Sleep(Duration),
    /// Command that never produces anything.
    Stuck,
    Sink(SinkStage),
    Source(SourceStage),
    Done,
}

#[derive(Debug)]
enum SinkStage {
    Header {
        path: String,
    },
    Data {
        path: String,
        mode: u32,
        size: usize,
    },
    Finished,
}

#[derive(Debug)]
enum SourceStage {
    Start { path: String },
    /// Header sent; waiting for the client's go-ahead before sending `data`.
    Header { data: Vec<u8>, ending: Ending },
    Trailer,
}

/// How a source transfer ends after the file bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Complete,
    /// `*.short`: fewer bytes than announced, then exit 1.
    Short,
    /// `*.stall`: fewer bytes than announced, then silence.
    Stall,
}

#[derive(Debug)]
pub struct FakeChannel {
    host: String,
    unwritable: HashSet<String>,
    fs: Arc<RemoteFs>,
    outgoing: VecDeque<ChannelEvent>,
    mode: Mode,
    input: Vec<u8>,
    closed: bool,
    _guard: ChannelGuard,
}

impl FakeChannel {
    fn exit(&mut self, code: u32) {
        self.outgoing.push_back(ChannelEvent::ExitStatus(code));
        self.outgoing.push_back(ChannelEvent::Eof);
        self.outgoing.push_back(ChannelEvent::Close);
        self.mode = Mode::Done;
    }

    fn stdout(&mut self, data: impl Into<Vec<u8>>) {
        self.outgoing.push_back(ChannelEvent::Stdout(data.into()));
    }

    fn fail_scp(&mut self, message: &str) {
        let mut frame = vec![1u8];
        frame.extend_from_slice(format!("scp: {}\n", message).as_bytes());
        self.stdout(frame);
        self.exit(1);
    }

    fn run(&mut self, command: &str) {
        let mut words = command.split_whitespace();
        match (words.next(), words.next()) {
            (Some("echo"), _) => {
                let text = command.trim_start_matches("echo").trim_start();
                self.stdout(format!("{}\n", text));
                self.exit(0);
            }
            (Some("exit"), Some(code)) => {
                let code = code.parse().unwrap_or(1);
                self.exit(code);
            }
            (Some("sleep"), Some(secs)) => {
                let secs: u64 = secs.parse().unwrap_or(1);
                self.mode = Mode::Sleep(Duration::from_secs(secs));
            }
            (Some("spew"), Some(bytes)) => {
                let bytes: usize = bytes.parse().unwrap_or(0);
                for chunk in vec![b'x'; bytes].chunks(1000) {
                    self.stdout(chunk.to_vec());
                }
                self.outgoing.push_back(ChannelEvent::Stderr(b"done\n".to_vec()));
                self.exit(0);
            }
            (Some("kill"), _) => {
                self.outgoing
                    .push_back(ChannelEvent::ExitSignal("KILL".to_string()));
                self.outgoing.push_back(ChannelEvent::Eof);
                self.outgoing.push_back(ChannelEvent::Close);
                self.mode = Mode::Done;
            }
            (Some("hang"), _) => self.mode = Mode::Stuck,
            (Some("scp"), Some("-t")) => {
                let path = unquote(command.trim_start_matches("scp -t "));
                self.stdout(vec![0]);
                self.mode = Mode::Sink(SinkStage::Header { path });
            }
            (Some("scp"), Some("-f")) => {
                let path = unquote(command.trim_start_matches("scp -f "));
                self.mode = Mode::Source(SourceStage::Start { path });
            }
            _ => {
                self.outgoing.push_back(ChannelEvent::Stderr(
                    format!("sh: {}: command not found\n", command).into_bytes(),
                ));
                self.exit(127);
            }
        }
    }

    /// Feed bytes written by the client into the SCP emulation.
    fn consume(&mut self) {
        loop {
            let mode = std::mem::replace(&mut self.mode, Mode::Done);
            let next = match mode {
                Mode::Sink(SinkStage::Header { path }) => {
                    let Some(pos) = self.input.iter().position(|b| *b == b'\n') else {
                        self.mode = Mode::Sink(SinkStage::Header { path });
                        return;
                    };
                    let line: Vec<u8> = self.input.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line[..pos]).into_owned();
                    if self.unwritable.contains(&path) {
                        self.fail_scp(&format!("{}: Permission denied", path));
                        return;
                    }
                    let mut parts = line.trim_start_matches('C').splitn(3, ' ');
                    let mode = u32::from_str_radix(parts.next().unwrap_or("644"), 8).unwrap_or(0o644);
                    let size = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    self.stdout(vec![0]);
                    Mode::Sink(SinkStage::Data { path, mode, size })
                }
                Mode::Sink(SinkStage::Data { path, mode, size }) => {
                    // File bytes plus the trailing zero byte.
                    if self.input.len() < size + 1 {
                        self.mode = Mode::Sink(SinkStage::Data { path, mode, size });
                        return;
                    }
                    let data: Vec<u8> = self.input.drain(..size).collect();
                    self.input.drain(..1);
                    self.fs.put(&self.host, &path, mode, data);
                    self.stdout(vec![0]);
                    Mode::Sink(SinkStage::Finished)
                }
                Mode::Source(SourceStage::Start { path }) => {
                    if self.input.is_empty() {
                        self.mode = Mode::Source(SourceStage::Start { path });
                        return;
                    }
                    self.input.drain(..1);
                    let Some((mode, data)) = self.fs.get(&self.host, &path) else {
                        self.fail_scp(&format!("{}: No such file or directory", path));
                        return;
                    };
                    let name = path.rsplit('/').next().unwrap_or(&path).to_string();
                    let ending = if path.ends_with(".short") {
                        Ending::Short
                    } else if path.ends_with(".stall") {
                        Ending::Stall
                    } else {
                        Ending::Complete
                    };
                    let announced = match ending {
                        Ending::Complete => data.len(),
                        Ending::Short | Ending::Stall => data.len() + 10,
                    };
                    self.stdout(format!("C{:04o} {} {}\n", mode, announced, name));
                    Mode::Source(SourceStage::Header { data, ending })
                }
                Mode::Source(SourceStage::Header { data, ending }) => {
                    if self.input.is_empty() {
                        self.mode = Mode::Source(SourceStage::Header { data, ending });
                        return;
                    }
                    self.input.drain(..1);
                    self.stdout(data);
                    match ending {
                        Ending::Short => {
                            self.exit(1);
                            return;
                        }
                        Ending::Stall => {
                            self.mode = Mode::Stuck;
                            return;
                        }
                        Ending::Complete => {}
                    }
                    self.stdout(vec![0]);
                    Mode::Source(SourceStage::Trailer)
                }
                Mode::Source(SourceStage::Trailer) => {
                    if self.input.is_empty() {
                        self.mode = Mode::Source(SourceStage::Trailer);
                        return;
                    }
                    self.input.drain(..1);
                    self.exit(0);
                    return;
                }
                other => {
                    self.mode = other;
                    return;
                }
            };
            self.mode = next;
        }
    }
}

#[async_trait]
impl Channel for FakeChannel {
    async fn exec(&mut self, command: &str) -> Result<()> {
        self.run(command);
        Ok(())
    }

    async fn recv(&mut self) -> Option<ChannelEvent> {
        if let Some(event) = self.outgoing.pop_front() {
            return Some(event);
        }
        if self.closed {
            return None;
        }
        match std::mem::replace(&mut self.mode, Mode::Done) {
            Mode::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                self.exit(0);
                self.outgoing.pop_front()
            }
            Mode::Done => None,
            // Waiting on input that will never come, or stuck on purpose.
            other => {
                self.mode = other;
                std::future::pending().await
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed || matches!(self.mode, Mode::Done) {
            return Err(Error::ChannelClosed);
        }
        self.input.extend_from_slice(data);
        self.consume();
        Ok(())
    }

    async fn eof(&mut self) -> Result<()> {
        if let Mode::Sink(SinkStage::Finished) = self.mode {
            self.exit(0);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.outgoing.clear();
        Ok(())
    }
}

fn unquote(path: &str) -> String {
    let path = path.trim();
    let inner = path
        .strip_prefix('\'')
        .and_then(|p| p.strip_suffix('\''))
        .unwrap_or(path);
    inner.replace(r"'\''", "'")
}
