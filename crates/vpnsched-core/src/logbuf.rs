//! Bounded diagnostic log buffer.
//!
//! Every `tracing` event is mirrored into a size-capped text buffer that is
//! persisted to disk after each write, so `vpnsched logs` can show what the
//! background trigger did even though it ran headless.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Append-only text buffer trimmed from the front once it exceeds `max_bytes`.
pub struct LogBuffer {
    buffer: RwLock<String>,
    max_bytes: usize,
    /// Backing file; `None` keeps the buffer purely in memory.
    path: Option<PathBuf>,
}

impl LogBuffer {
    /// Open a file-backed buffer, loading (and trimming) any previous content.
    pub fn open(path: impl Into<PathBuf>, max_bytes: usize) -> Self {
        let path = path.into();
        let mut content = std::fs::read_to_string(&path).unwrap_or_default();
        trim_front(&mut content, max_bytes);
        Self {
            buffer: RwLock::new(content),
            max_bytes,
            path: Some(path),
        }
    }

    pub fn in_memory(max_bytes: usize) -> Self {
        Self {
            buffer: RwLock::new(String::new()),
            max_bytes,
            path: None,
        }
    }

    /// Append one entry: `MM-dd HH:mm:ss.SSS L/target: message`.
    pub fn log(&self, level: char, target: &str, message: &str) {
        let timestamp = chrono::Local::now().format("%m-%d %H:%M:%S%.3f");
        let entry = format!("{timestamp} {level}/{target}: {message}\n");
        {
            let mut buffer = self.buffer.write().expect("log buffer poisoned");
            buffer.push_str(&entry);
            trim_front(&mut buffer, self.max_bytes);
        }
        self.persist();
    }

    /// Raw buffer content, oldest entry first.
    pub fn contents(&self) -> String {
        self.buffer.read().expect("log buffer poisoned").clone()
    }

    /// Non-blank lines, newest entry first.
    pub fn newest_first(&self) -> String {
        let buffer = self.buffer.read().expect("log buffer poisoned");
        let lines: Vec<&str> = buffer.lines().filter(|l| !l.trim().is_empty()).collect();
        lines.into_iter().rev().collect::<Vec<_>>().join("\n")
    }

    pub fn clear(&self) {
        self.buffer.write().expect("log buffer poisoned").clear();
        self.persist();
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self) {
        let Some(ref path) = self.path else {
            return;
        };
        let snapshot = self.contents();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        // Failures cannot be reported through the log itself.
        let _ = std::fs::create_dir_all(dir);
        let Ok(mut tmp) = tempfile::NamedTempFile::new_in(dir) else {
            return;
        };
        if tmp.write_all(snapshot.as_bytes()).is_ok() {
            let _ = tmp.persist(path);
        }
    }
}

/// Drop whole lines from the front until `buf` fits in `max_bytes`.
///
/// Falls back to a raw cut when no newline follows the excess, i.e. a single
/// oversized entry. Every cut lands on a char boundary.
fn trim_front(buf: &mut String, max_bytes: usize) {
    if buf.len() <= max_bytes {
        return;
    }
    let mut excess = buf.len() - max_bytes;
    while !buf.is_char_boundary(excess) {
        excess += 1;
    }
    let cut = match buf[excess..].find('\n') {
        Some(offset) => excess + offset + 1,
        None => excess,
    };
    buf.drain(..cut);
}

/// `tracing` layer feeding a shared [`LogBuffer`].
pub struct LogBufferLayer {
    buffer: Arc<LogBuffer>,
}

impl LogBufferLayer {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        self.buffer
            .log(level_char(meta.level()), meta.target(), &visitor.finish());
    }
}

fn level_char(level: &Level) -> char {
    match *level {
        Level::TRACE => 'V',
        Level::DEBUG => 'D',
        Level::INFO => 'I',
        Level::WARN => 'W',
        Level::ERROR => 'E',
    }
}

/// Collects the `message` field plus `key=value` pairs for the rest.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn trims_on_line_boundary() {
        let buffer = LogBuffer::in_memory(64);
        for i in 0..10 {
            buffer.log('I', "test", &format!("entry number {i}"));
        }
        let content = buffer.contents();
        assert!(content.len() <= 64);
        // Every surviving line is complete.
        for line in content.lines() {
            assert!(line.contains("I/test: entry number"), "partial line: {line}");
        }
        assert!(content.contains("entry number 9"));
        assert!(!content.contains("entry number 0"));
    }

    #[test]
    fn oversized_single_entry_is_cut_raw() {
        let mut buf = "é".repeat(40); // 80 bytes, no newline
        trim_front(&mut buf, 11);
        assert!(buf.len() <= 11);
        assert!(buf.chars().all(|c| c == 'é'));
    }

    #[test]
    fn cut_inside_multibyte_char_keeps_whole_lines() {
        let mut buf = String::from("aé\nb\n");
        trim_front(&mut buf, 4);
        assert_eq!(buf, "b\n");
    }

    #[test]
    fn accented_entries_never_poison_the_buffer() {
        let buffer = LogBuffer::in_memory(128);
        for i in 0..20 {
            buffer.log('I', "t", &format!("profil café-{i} démarré"));
        }
        let content = buffer.contents();
        assert!(content.len() <= 128);
        assert!(content.contains("café-19"), "{content}");
        // Still usable after many trims.
        buffer.clear();
        assert!(buffer.contents().is_empty());
    }

    #[test]
    fn newest_first_reverses_lines() {
        let buffer = LogBuffer::in_memory(4096);
        buffer.log('I', "t", "first");
        buffer.log('W', "t", "second");
        let view = buffer.newest_first();
        let lines: Vec<&str> = view.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("W/t: second"));
        assert!(lines[1].ends_with("I/t: first"));
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("app_logs.txt");
        {
            let buffer = LogBuffer::open(&path, 4096);
            buffer.log('E', "vpnsched", "boom");
        }
        let reopened = LogBuffer::open(&path, 4096);
        assert!(reopened.contents().contains("E/vpnsched: boom"));

        reopened.clear();
        assert!(reopened.contents().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn persist_replaces_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_logs.txt");
        let buffer = LogBuffer::open(&path, 4096);
        for i in 0..5 {
            buffer.log('I', "t", &format!("line {i}"));
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), buffer.contents());
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn reload_trims_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_logs.txt");
        std::fs::write(&path, "aaaaaaaaaa\nbbbbbbbbbb\ncccccccccc\n").unwrap();
        let buffer = LogBuffer::open(&path, 12);
        assert_eq!(buffer.contents(), "cccccccccc\n");
    }

    #[test]
    fn layer_records_message_and_fields() {
        let buffer = Arc::new(LogBuffer::in_memory(4096));
        let subscriber =
            tracing_subscriber::registry().with(LogBufferLayer::new(Arc::clone(&buffer)));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(profile = "work", "profile not found");
        });
        let content = buffer.contents();
        assert!(content.contains("W/"), "{content}");
        assert!(content.contains("profile not found profile=work"), "{content}");
    }
}
