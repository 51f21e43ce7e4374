//! Monitor session: launches the agent on the board and applies a sync
//!
//! A session moves the device connection from the interactive REPL into
//! monitor mode, where the framed channel is valid, and back. Leaving the
//! monitor never fails; problems while restoring the REPL are only logged.

use crate::channel::Channel;
use crate::device::{Connection, ConnectionKind, Device};
use crate::error::ProtocolError;
use crate::logger::{Logger, NoopLogger};
use crate::manifest::{self, ManifestEntry};
use crate::protocol::{Command, Timing, MANIFEST_PATH};
use crate::reconcile::{Reconciler, SyncOp};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Interactive,
    Monitor,
}

pub struct MonitorOptions {
    pub timing: Timing,
    pub logger: Arc<dyn Logger>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            logger: Arc::new(NoopLogger),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub ops: u64,
    pub bytes: u64,
    pub conflicts: Vec<String>,
}

/// Python assignments the agent reads to pick its transport
pub fn preamble(kind: ConnectionKind, user: &str, password: &str) -> String {
    match kind {
        ConnectionKind::Serial => "connection_type = 'u'\n".to_string(),
        ConnectionKind::Telnet => format!(
            "connection_type = 's'\ntelnet_login = ('{}', '{}')\n",
            py_quote(user),
            py_quote(password)
        ),
    }
}

// Contents of a single-quoted Python string literal
fn py_quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Local files are uploaded as text: UTF-8 with universal newlines.
pub fn read_text_file(path: &Path) -> Result<Vec<u8>> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8(raw).map_err(|_| {
        anyhow!(
            "{} is not a UTF-8 text file (binary upload is not supported)",
            path.display()
        )
    })?;
    Ok(text.replace("\r\n", "\n").replace('\r', "\n").into_bytes())
}

pub struct Monitor<'d> {
    device: &'d mut dyn Device,
    root: PathBuf,
    state: ChannelState,
    timing: Timing,
    logger: Arc<dyn Logger>,
}

impl<'d> Monitor<'d> {
    /// Upload and start the agent, then open the channel.
    ///
    /// `root` is the local folder that manifest paths are relative to.
    pub fn start(
        device: &'d mut dyn Device,
        agent_source: &[u8],
        root: impl Into<PathBuf>,
        opts: MonitorOptions,
    ) -> Result<Self> {
        let kind = device.connection_kind();
        let (user, password) = device.credentials();
        let mut script = preamble(kind, &user, &password).into_bytes();
        script.extend_from_slice(agent_source);

        device
            .enter_raw_repl_no_reset()
            .context("Failed to enter raw REPL")?;
        if let Err(e) = device.exec_raw_no_follow(&script) {
            let _ = device.exit_raw_repl();
            return Err(e).context("Failed to start monitor agent");
        }
        sleep_ms(opts.timing.settle_ms);

        let opened = match kind {
            ConnectionKind::Serial => device.flush(),
            ConnectionKind::Telnet => device.reconnect(true),
        };
        opened.context("Failed to open monitor channel")?;

        Ok(Self {
            device,
            root: root.into(),
            state: ChannelState::Monitor,
            timing: opts.timing,
            logger: opts.logger,
        })
    }

    /// Run `f` inside a monitor session. The monitor is always exited
    /// afterwards, also when `f` fails; the error of `f` is returned.
    pub fn session<T, F>(
        device: &'d mut dyn Device,
        agent_source: &[u8],
        root: impl Into<PathBuf>,
        opts: MonitorOptions,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut Monitor<'d>) -> Result<T>,
    {
        let mut monitor = Monitor::start(device, agent_source, root, opts)?;
        let result = f(&mut monitor);
        monitor.exit_monitor();
        result
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn channel(&mut self) -> Result<Channel<&mut dyn Connection>, ProtocolError> {
        if self.state != ChannelState::Monitor {
            return Err(ProtocolError::NotInMonitor);
        }
        Ok(Channel::new(self.device.connection()))
    }

    pub fn write_file_contents(&mut self, name: &str, content: &[u8]) -> Result<()> {
        self.channel()?
            .write_file_contents(name, content)
            .with_context(|| format!("Failed to write {}", name))?;
        Ok(())
    }

    pub fn read_file(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let data = self
            .channel()?
            .read_file(name)
            .with_context(|| format!("Failed to read {}", name))?;
        Ok(data)
    }

    pub fn remove_file(&mut self, name: &str) -> Result<()> {
        self.channel()?.remove_file(name)?;
        Ok(())
    }

    pub fn create_dir(&mut self, name: &str) -> Result<()> {
        self.channel()?.create_dir(name)?;
        Ok(())
    }

    pub fn remove_dir(&mut self, name: &str) -> Result<()> {
        self.channel()?.remove_dir(name)?;
        Ok(())
    }

    pub fn last_file_hash(&mut self, name: &str) -> Result<Vec<u8>> {
        let hash = self
            .channel()?
            .req_last_file_hash(name)
            .with_context(|| format!("Failed to get hash of {}", name))?;
        Ok(hash)
    }

    /// Upload the local file `root/name` to `name` on the device; returns the
    /// number of content bytes sent.
    pub fn write_file(&mut self, name: &str) -> Result<u64> {
        let content = read_text_file(&self.root.join(name))?;
        self.write_file_contents(name, &content)?;
        Ok(content.len() as u64)
    }

    /// Apply the reconciler's delta in its fixed phase order.
    pub fn sync(&mut self, reconciler: &Reconciler) -> Result<SyncStats> {
        let mut stats = SyncStats {
            conflicts: reconciler.kind_conflicts(),
            ..Default::default()
        };
        for path in &stats.conflicts {
            self.logger.conflict(path);
        }

        for op in reconciler.plan().ops {
            let result = match &op {
                SyncOp::DeleteFile(p) => self.remove_file(p).map(|_| 0),
                SyncOp::DeleteDir(p) => self.remove_dir(p).map(|_| 0),
                SyncOp::CreateDir(p) => self.create_dir(p).map(|_| 0),
                SyncOp::CreateFile(p) | SyncOp::UpdateFile(p) => self.write_file(p),
            };
            match result {
                Ok(bytes) => {
                    self.logger.op(&op, bytes);
                    stats.ops += 1;
                    stats.bytes += bytes;
                }
                Err(e) => {
                    self.logger.error(&op.to_string(), &format!("{:#}", e));
                    return Err(e.context(format!("sync aborted at: {}", op)));
                }
            }
        }
        Ok(stats)
    }

    /// The listing the device was last synced to; empty if it has none.
    pub fn read_remote_manifest(&mut self) -> Result<Vec<ManifestEntry>> {
        match self.read_file(MANIFEST_PATH)? {
            Some(data) => manifest::decode(&data),
            None => Ok(Vec::new()),
        }
    }

    /// Sync the device to `local` and record `local` as its new manifest.
    ///
    /// The manifest is only written when every operation went through. The
    /// fire-and-forget operations cannot report device-side failures, so a
    /// written manifest does not prove the device matches it.
    pub fn sync_pyboard(&mut self, local: &[ManifestEntry]) -> Result<SyncStats> {
        let start = Instant::now();
        let remote = self.read_remote_manifest()?;
        let reconciler = Reconciler::new(local.iter().cloned(), remote);
        let stats = self.sync(&reconciler)?;

        let encoded = manifest::encode(local)?;
        self.write_file_contents(MANIFEST_PATH, &encoded)
            .context("Failed to write device manifest")?;

        self.logger
            .done(stats.ops, stats.bytes, start.elapsed().as_secs_f64());
        Ok(stats)
    }

    /// Reboot the board and return the connection to the REPL.
    pub fn reset_board(&mut self) {
        if self.state != ChannelState::Monitor {
            return;
        }
        let sent = self.channel().and_then(|mut ch| ch.send(Command::ResetBoard));
        if let Err(e) = sent {
            self.logger.error("reset", &e.to_string());
        }
        sleep_ms(self.timing.reset_grace_ms);
        self.restore();
    }

    /// Stop the agent and return the connection to the REPL.
    pub fn exit_monitor(&mut self) {
        if self.state != ChannelState::Monitor {
            return;
        }
        let sent = self.channel().and_then(|mut ch| ch.send(Command::ExitMonitor));
        if let Err(e) = sent {
            self.logger.error("exit", &e.to_string());
        }
        self.restore();
    }

    fn restore(&mut self) {
        let result = match self.device.connection_kind() {
            ConnectionKind::Telnet => {
                sleep_ms(self.timing.restore_ms);
                let r = self.device.reconnect(false);
                sleep_ms(self.timing.restore_ms);
                r
            }
            ConnectionKind::Serial => self
                .device
                .exit_raw_repl()
                .and_then(|_| self.device.flush()),
        };
        if let Err(e) = result {
            self.logger.error("restore", &e.to_string());
        }
        self.state = ChannelState::Interactive;
    }
}

fn sleep_ms(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
