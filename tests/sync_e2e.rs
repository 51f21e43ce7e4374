#![cfg(unix)]

use anyhow::Result;
use pymakr_sync::device::{Connection, ConnectionKind, Device};
use pymakr_sync::error::DeviceError;
use pymakr_sync::fs_enum::{enumerate_listing, FileFilter};
use pymakr_sync::logger::NoopLogger;
use pymakr_sync::manifest;
use pymakr_sync::protocol::{Command, Timing, ACK_REPLY, BLOCK_SIZE, ESCAPE, MANIFEST_NAME, NOT_FOUND};
use pymakr_sync::protocol_core::{decode_u16, decode_u32, parse_command};
use pymakr_sync::{Monitor, MonitorOptions};
use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Board whose agent is already running: raw REPL steps are no-ops and the
/// connection carries only the framed protocol.
struct SimDevice {
    conn: UnixStream,
}

impl Device for SimDevice {
    fn connection_kind(&self) -> ConnectionKind {
        ConnectionKind::Serial
    }

    fn credentials(&self) -> (String, String) {
        ("micro".into(), "python".into())
    }

    fn reconnect(&mut self, _raw: bool) -> Result<(), DeviceError> {
        Ok(())
    }

    fn connection(&mut self) -> &mut dyn Connection {
        &mut self.conn
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn enter_raw_repl_no_reset(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn exec_raw_no_follow(&mut self, _code: &[u8]) -> Result<(), DeviceError> {
        Ok(())
    }

    fn exit_raw_repl(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Monitor agent applying commands to a folder standing in for `/flash`.
struct Agent {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    flash: PathBuf,
    hashes: HashMap<String, Vec<u8>>,
    seen: Vec<Command>,
}

impl Agent {
    fn new(conn: UnixStream, flash: PathBuf) -> std::io::Result<Self> {
        let writer = conn.try_clone()?;
        Ok(Self {
            reader: BufReader::new(conn),
            writer,
            flash,
            hashes: HashMap::new(),
            seen: Vec::new(),
        })
    }

    fn byte(&mut self) -> std::io::Result<u8> {
        let mut b = [0u8; 1];
        self.reader.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn arg(&mut self, n: usize) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let b = self.byte()?;
            if b == ESCAPE {
                assert_eq!(self.byte()?, ESCAPE, "unpaired escape in argument");
            }
            out.push(b);
        }
        Ok(out)
    }

    fn command(&mut self) -> std::io::Result<Command> {
        let frame = [self.byte()?, self.byte()?, self.byte()?];
        let cmd = parse_command(&frame).unwrap_or_else(|| panic!("bad frame {:02x?}", frame));
        self.seen.push(cmd);
        Ok(cmd)
    }

    fn name(&mut self) -> std::io::Result<String> {
        let len = self.arg(2)?;
        let len = decode_u16([len[0], len[1]]) as usize;
        Ok(String::from_utf8(self.arg(len)?).expect("utf-8 name"))
    }

    fn path(&self, name: &str) -> PathBuf {
        self.flash.join(name.strip_prefix("/flash/").unwrap_or(name))
    }

    fn run(mut self) -> std::io::Result<Vec<Command>> {
        loop {
            match self.command()? {
                Command::RequestAck => self.writer.write_all(&ACK_REPLY)?,
                Command::WriteFile => {
                    let name = self.name()?;
                    let len = self.arg(4)?;
                    let len = decode_u32([len[0], len[1], len[2], len[3]]) as usize;
                    let mut data = Vec::with_capacity(len);
                    for i in 0..=len / BLOCK_SIZE {
                        let size = len.saturating_sub(i * BLOCK_SIZE).min(BLOCK_SIZE);
                        let block = self.arg(size)?;
                        data.extend_from_slice(&block);
                        assert_eq!(self.command()?, Command::RequestAck);
                        self.writer.write_all(&ACK_REPLY)?;
                    }
                    std::fs::write(self.path(&name), &data)?;
                    let sum = data.iter().fold(0u32, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u32));
                    self.hashes.insert(name, sum.to_be_bytes().to_vec());
                }
                Command::ReadFile => {
                    let name = self.name()?;
                    match std::fs::read(self.path(&name)) {
                        Ok(data) => {
                            self.writer.write_all(&(data.len() as u32).to_be_bytes())?;
                            self.writer.write_all(&data)?;
                        }
                        Err(_) => self.writer.write_all(&NOT_FOUND.to_be_bytes())?,
                    }
                }
                Command::RemoveFile => {
                    let name = self.name()?;
                    let _ = std::fs::remove_file(self.path(&name));
                }
                Command::CreateDir => {
                    let name = self.name()?;
                    let _ = std::fs::create_dir(self.path(&name));
                }
                Command::RemoveDir => {
                    let name = self.name()?;
                    let _ = std::fs::remove_dir(self.path(&name));
                }
                Command::LastFileHash => {
                    let name = self.name()?;
                    let hash = self.hashes.get(&name).cloned().unwrap_or_default();
                    self.writer.write_all(&(hash.len() as u16).to_be_bytes())?;
                    self.writer.write_all(&hash)?;
                }
                Command::ExitMonitor | Command::ResetBoard => return Ok(self.seen),
            }
        }
    }
}

/// One monitor session against a fresh agent; returns `f`'s result and the
/// commands the agent received.
fn run_session<T, F>(flash: &Path, project: &Path, f: F) -> Result<(T, Vec<Command>)>
where
    F: FnOnce(&mut Monitor<'_>) -> Result<T>,
{
    let (dev_end, agent_end) = UnixStream::pair()?;
    let agent = Agent::new(agent_end, flash.to_path_buf())?;
    let handle = std::thread::spawn(move || agent.run());

    let mut device = SimDevice { conn: dev_end };
    let opts = MonitorOptions {
        timing: Timing::immediate(),
        logger: Arc::new(NoopLogger),
    };
    let result = Monitor::session(&mut device, b"# agent", project, opts, f);
    drop(device);
    let seen = handle.join().expect("agent thread panicked")?;
    Ok((result?, seen))
}

fn write(root: &Path, rel: &str, content: &str) -> Result<()> {
    let p = root.join(rel);
    if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(p, content)?;
    Ok(())
}

fn assert_mirrored(project: &Path, flash: &Path) -> Result<()> {
    let local = enumerate_listing(project, &FileFilter::default())?;
    let board = enumerate_listing(flash, &FileFilter::default())?;
    assert_eq!(local, board);
    for e in local.iter().filter(|e| e.kind == manifest::EntryKind::File) {
        assert_eq!(
            std::fs::read(project.join(&e.path))?,
            std::fs::read(flash.join(&e.path))?,
            "content differs for {}",
            e.path
        );
    }
    let stored = manifest::decode(&std::fs::read(flash.join(MANIFEST_NAME))?)?;
    assert_eq!(stored, local);
    Ok(())
}

#[test]
fn sync_then_resync_mirrors_project() -> Result<()> {
    let project = tempfile::tempdir()?;
    let flash = tempfile::tempdir()?;

    write(project.path(), "main.py", "import util\nutil.run()\n")?;
    write(project.path(), "lib/util.py", "def run():\n    print('\x1b[1mhi\x1b[0m')\n")?;
    write(project.path(), "lib/drivers/sensor.py", &"x = 1\n".repeat(100))?;
    write(project.path(), "data/empty.txt", "")?;

    let listing = enumerate_listing(project.path(), &FileFilter::default())?;
    let (stats, seen) = run_session(flash.path(), project.path(), |m| m.sync_pyboard(&listing))?;
    assert_eq!(stats.ops, 7);
    assert!(stats.conflicts.is_empty());
    assert_eq!(seen.first(), Some(&Command::ReadFile));
    assert_eq!(seen.last(), Some(&Command::ExitMonitor));
    assert_mirrored(project.path(), flash.path())?;

    // Drop a subtree, change a file, add one, turn a file into a folder
    std::fs::remove_dir_all(project.path().join("lib/drivers"))?;
    write(project.path(), "main.py", "print('v2')\n")?;
    write(project.path(), "boot.py", "")?;
    std::fs::remove_file(project.path().join("data/empty.txt"))?;
    write(project.path(), "data/empty.txt/inner.py", "pass\n")?;

    let listing = enumerate_listing(project.path(), &FileFilter::default())?;
    let (stats, seen) = run_session(flash.path(), project.path(), |m| m.sync_pyboard(&listing))?;
    assert_eq!(stats.conflicts, vec!["data/empty.txt".to_string()]);
    assert!(seen.contains(&Command::RemoveDir));
    assert_mirrored(project.path(), flash.path())?;
    assert!(!flash.path().join("lib/drivers").exists());
    Ok(())
}

#[test]
fn unchanged_resync_only_rewrites_files() -> Result<()> {
    let project = tempfile::tempdir()?;
    let flash = tempfile::tempdir()?;
    write(project.path(), "main.py", "pass\n")?;
    write(project.path(), "lib/a.py", "a = 1\n")?;

    let listing = enumerate_listing(project.path(), &FileFilter::default())?;
    run_session(flash.path(), project.path(), |m| m.sync_pyboard(&listing))?;
    let (stats, seen) = run_session(flash.path(), project.path(), |m| m.sync_pyboard(&listing))?;

    assert_eq!(stats.ops, 2);
    assert!(!seen.contains(&Command::CreateDir));
    assert!(!seen.contains(&Command::RemoveFile));
    assert!(!seen.contains(&Command::RemoveDir));
    assert_mirrored(project.path(), flash.path())?;
    Ok(())
}

#[test]
fn upload_translates_newlines_and_reports_hash() -> Result<()> {
    let project = tempfile::tempdir()?;
    let flash = tempfile::tempdir()?;
    write(project.path(), "main.py", "a = 1\r\nb = 2\rc = 3\n")?;

    let (hashes, _) = run_session(flash.path(), project.path(), |m| {
        let first = m.last_file_hash("main.py")?;
        m.write_file("main.py")?;
        let second = m.last_file_hash("main.py")?;
        Ok((first, second))
    })?;

    assert!(hashes.0.is_empty());
    assert_eq!(hashes.1.len(), 4);
    assert_eq!(std::fs::read(flash.path().join("main.py"))?, b"a = 1\nb = 2\nc = 3\n");
    Ok(())
}

#[test]
fn missing_remote_manifest_reads_as_empty() -> Result<()> {
    let project = tempfile::tempdir()?;
    let flash = tempfile::tempdir()?;

    let (remote, seen) = run_session(flash.path(), project.path(), |m| m.read_remote_manifest())?;
    assert!(remote.is_empty());
    assert_eq!(seen, vec![Command::ReadFile, Command::ExitMonitor]);
    Ok(())
}
