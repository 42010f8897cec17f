//! Progress bars that share the terminal with log output.
//!
//! Log lines are routed through the same `MultiProgress` as the bars so a
//! running ingest bar stays pinned below them instead of being torn apart.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(10))
    })
}

/// A styled item counter, or None when there is nothing to count
pub fn item_progress_bar(len: usize, message: &str) -> Option<ProgressBar> {
    if len == 0 {
        return None;
    }

    let pb = multi_progress().add(ProgressBar::new(len as u64));
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
    ) {
        pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// `MakeWriter` for tracing-subscriber that prints above active bars
#[derive(Default, Clone, Copy)]
pub struct LogWriterFactory;

/// Buffers one log event and emits it line by line on flush or drop
#[derive(Default)]
pub struct LogWriter {
    buffer: Vec<u8>,
}

impl LogWriter {
    fn emit_lines(&mut self, include_partial: bool) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            print_line(&line[..line.len() - 1]);
        }
        if include_partial && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            print_line(&rest);
        }
    }
}

fn print_line(bytes: &[u8]) {
    let text = String::from_utf8_lossy(bytes);
    let _ = multi_progress().println(text.trim_end_matches('\r'));
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.emit_lines(false);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit_lines(true);
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.emit_lines(true);
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter::default()
    }
}
