//! Job-scoped log collection
//!
//! Each job writes into its own buffer keyed by a [`LogScope`], so output
//! from jobs running at the same time is never interleaved. Secret values
//! registered on a [`JobLog`] are redacted from every line before it is
//! stored.

use gantry_core::domain::log::{LogEntry, LogLevel, LogScope};
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, Mutex};

/// Replacement text for redacted secret values
pub const REDACTED: &str = "[REDACTED]";

/// Buffer that collects log entries during job execution
pub trait LogBuffer: Send + Sync {
    /// Adds a log entry to the buffer
    fn add_entry(&self, entry: LogEntry);

    /// Drains all log entries from the buffer
    fn drain(&self) -> Vec<LogEntry>;
}

/// In-memory implementation of LogBuffer
#[derive(Clone, Default)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogBuffer for InMemoryLogBuffer {
    fn add_entry(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(entry);
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }
}

/// Log sink for one job of one run
pub struct JobLog {
    scope: LogScope,
    buffer: Arc<dyn LogBuffer>,
    // Zeroized with the log
    redactions: Mutex<Vec<SecretString>>,
}

impl JobLog {
    pub fn new(scope: LogScope, buffer: Arc<dyn LogBuffer>) -> Self {
        Self {
            scope,
            buffer,
            redactions: Mutex::new(Vec::new()),
        }
    }

    /// A job log backed by a fresh in-memory buffer
    pub fn in_memory(scope: LogScope) -> Self {
        Self::new(scope, Arc::new(InMemoryLogBuffer::new()))
    }

    pub fn scope(&self) -> &LogScope {
        &self.scope
    }

    /// Registers values that must never appear in the log
    pub fn redact<I, S>(&self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut redactions = self.redactions.lock().unwrap_or_else(|e| e.into_inner());
        for value in values {
            let value = SecretString::from(value.into());
            let secret = value.expose_secret();
            if secret.is_empty() || redactions.iter().any(|r| r.expose_secret() == secret) {
                continue;
            }
            redactions.push(value);
        }
    }

    /// Returns `text` with every registered secret value masked
    pub fn sanitize(&self, text: &str) -> String {
        let redactions = self.redactions.lock().unwrap_or_else(|e| e.into_inner());
        redactions
            .iter()
            .fold(text.to_string(), |acc, secret| {
                acc.replace(secret.expose_secret(), REDACTED)
            })
    }

    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        self.buffer.add_entry(LogEntry {
            timestamp: chrono::Utc::now(),
            level,
            message: self.sanitize(message.as_ref()),
        });
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message);
    }

    /// Logs each non-empty line of a command's output
    pub fn output(&self, level: LogLevel, output: &str) {
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            self.log(level, line);
        }
    }

    /// Takes every entry collected so far
    pub fn drain(&self) -> Vec<LogEntry> {
        self.buffer.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job_log() -> JobLog {
        JobLog::in_memory(LogScope::new(Uuid::new_v4(), "test", "pytest"))
    }

    #[test]
    fn test_secret_values_are_redacted() {
        let log = job_log();
        log.redact(["s3cr3t-key"]);
        log.info("connecting with s3cr3t-key to supabase");

        let entries = log.drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "connecting with [REDACTED] to supabase");
    }

    #[test]
    fn test_empty_redaction_is_ignored() {
        let log = job_log();
        log.redact([""]);
        assert_eq!(log.sanitize("unchanged"), "unchanged");
    }

    #[test]
    fn test_redactions_are_held_once_as_secrets() {
        let log = job_log();
        let key = String::from("service-role-key");
        log.redact([key.as_str()]);
        log.redact([key.clone()]);

        let redactions = log.redactions.lock().unwrap();
        assert_eq!(redactions.len(), 1);
        assert!(!format!("{:?}", redactions[0]).contains("service-role-key"));
        drop(redactions);

        assert_eq!(log.sanitize("key=service-role-key"), "key=[REDACTED]");
    }

    #[test]
    fn test_output_skips_blank_lines() {
        let log = job_log();
        log.output(LogLevel::Info, "first\n\n   \nsecond\n");

        let messages: Vec<String> = log.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let log = job_log();
        log.warning("one");
        log.error("two");
        assert_eq!(log.drain().len(), 2);
        assert!(log.drain().is_empty());
    }
}
