//! Cargo-style progress display for a sync
//!
//! Operations scroll above a spinner that stays on the bottom line.

use crate::logger::Logger;
use crate::reconcile::SyncOp;
use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct SyncProgress {
    spinner: ProgressBar,
    start_time: Instant,
    ops: AtomicU64,
    bytes: AtomicU64,
    show_ops: bool,
}

impl SyncProgress {
    pub fn new(verbose: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        Self {
            spinner,
            start_time: Instant::now(),
            ops: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            show_ops: verbose,
        }
    }

    /// Hidden spinner, for non-interactive output
    pub fn hidden() -> Self {
        let p = Self::new(false);
        p.spinner.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        p
    }

    pub fn set_stage(&self, stage: &str) {
        self.spinner.set_message(format!(
            "{} in {:.1}s",
            stage.with(Color::Green).bold(),
            self.start_time.elapsed().as_secs_f64()
        ));
    }

    /// Print a line above the spinner
    fn print_line(&self, label: &str, color: Color, path: &str) {
        self.spinner.suspend(|| {
            println!("  {} {}", label.with(color).bold(), path.with(Color::Cyan));
        });
    }

    pub fn finish_success(&self) {
        let ops = self.ops.load(Ordering::Relaxed);
        let bytes = self.bytes.load(Ordering::Relaxed);
        self.spinner.finish_with_message(format!(
            "{} {} operations ({:.1} KB uploaded) in {:.1}s",
            "Synced".with(Color::Green).bold(),
            ops,
            bytes as f64 / 1024.0,
            self.start_time.elapsed().as_secs_f64()
        ));
    }

    pub fn finish_error(&self, msg: &str) {
        self.spinner
            .finish_with_message(format!("{} {}", "Failed".with(Color::Red).bold(), msg));
    }
}

impl Logger for SyncProgress {
    fn start(&self, device: &str, _root: &Path) {
        self.set_stage(&format!("Connected to {}", device));
    }

    fn op(&self, op: &SyncOp, bytes: u64) {
        let n = self.ops.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if self.show_ops {
            let color = match op {
                SyncOp::DeleteFile(_) | SyncOp::DeleteDir(_) => Color::Red,
                _ => Color::Green,
            };
            self.print_line(op.label(), color, op.path());
        }
        self.spinner.set_message(format!(
            "{} ({} ops, {:.1} KB) in {:.1}s",
            "Syncing".with(Color::Green).bold(),
            n,
            total as f64 / 1024.0,
            self.start_time.elapsed().as_secs_f64()
        ));
    }

    fn conflict(&self, path: &str) {
        self.print_line("conflict", Color::Yellow, &format!("{} (kind changed)", path));
    }
}
