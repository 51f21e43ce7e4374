use crate::reconcile::SyncOp;
use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use parking_lot::Mutex;
use std::sync::Arc;

/// Session events reported by the monitor. All methods default to no-ops.
pub trait Logger: Send + Sync {
    fn start(&self, _device: &str, _root: &Path) {}
    fn op(&self, _op: &SyncOp, _bytes: u64) {}
    fn conflict(&self, _path: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn done(&self, _ops: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn start(&self, device: &str, root: &Path) {
        self.line(&format!("START device={} root={}", device, root.display()));
    }
    fn op(&self, op: &SyncOp, bytes: u64) {
        self.line(&format!(
            "{} path={} bytes={}",
            op.label().to_ascii_uppercase(),
            op.path(),
            bytes
        ));
    }
    fn conflict(&self, path: &str) {
        self.line(&format!("CONFLICT path={} kind changed", path));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
    fn done(&self, ops: u64, bytes: u64, seconds: f64) {
        self.line(&format!("DONE ops={ops} bytes={bytes} seconds={seconds:.3}"));
    }
}

/// Forwards every event to each inner logger
pub struct TeeLogger {
    inner: Vec<Arc<dyn Logger>>,
}

impl TeeLogger {
    pub fn new(inner: Vec<Arc<dyn Logger>>) -> Self {
        Self { inner }
    }
}

impl Logger for TeeLogger {
    fn start(&self, device: &str, root: &Path) {
        self.inner.iter().for_each(|l| l.start(device, root));
    }
    fn op(&self, op: &SyncOp, bytes: u64) {
        self.inner.iter().for_each(|l| l.op(op, bytes));
    }
    fn conflict(&self, path: &str) {
        self.inner.iter().for_each(|l| l.conflict(path));
    }
    fn error(&self, context: &str, msg: &str) {
        self.inner.iter().for_each(|l| l.error(context, msg));
    }
    fn done(&self, ops: u64, bytes: u64, seconds: f64) {
        self.inner.iter().for_each(|l| l.done(ops, bytes, seconds));
    }
}
