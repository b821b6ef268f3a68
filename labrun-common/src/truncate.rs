//! Output and log truncation shared by every runner

use crate::result::{ConsoleLogEntry, LogKind};

/// Appended to output that exceeded the output-size limit
pub const OUTPUT_TRUNCATED_MARKER: &str = "\n... [output truncated: maximum output length exceeded]";

/// Truncate `output` to `max_chars` characters, appending [`OUTPUT_TRUNCATED_MARKER`].
///
/// Lengths are counted in characters, not bytes, so multi-byte text is never
/// split. Already-truncated output is returned unchanged.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    if let Some(kept) = output.strip_suffix(OUTPUT_TRUNCATED_MARKER) {
        if kept.chars().count() <= max_chars {
            return output.to_string();
        }
    }

    match output.char_indices().nth(max_chars) {
        None => output.to_string(),
        Some((cut, _)) => {
            let mut truncated = String::with_capacity(cut + OUTPUT_TRUNCATED_MARKER.len());
            truncated.push_str(&output[..cut]);
            truncated.push_str(OUTPUT_TRUNCATED_MARKER);
            truncated
        }
    }
}

/// Keep the first `max_entries` entries and append a `warn` trailer counting the rest.
pub fn truncate_logs(logs: Vec<ConsoleLogEntry>, max_entries: usize) -> Vec<ConsoleLogEntry> {
    let mut collector = LogCollector::new(max_entries);
    for entry in logs {
        collector.push(entry);
    }
    collector.finish()
}

/// Ordinary output of a run, collected independently of the log cap.
///
/// Keeps at most one character past `max_chars`, enough for
/// [`truncate_output`] to see the overflow and append the marker.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    text: String,
    chars: usize,
    max_chars: usize,
}

impl OutputBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            max_chars,
        }
    }

    pub fn push_str(&mut self, text: &str) {
        let room = self.max_chars.saturating_add(1).saturating_sub(self.chars);
        if room == 0 || text.is_empty() {
            return;
        }
        let kept = match text.char_indices().nth(room) {
            Some((cut, _)) => &text[..cut],
            None => text,
        };
        self.chars += kept.chars().count();
        self.text.push_str(kept);
    }

    /// Append `line` followed by a newline
    pub fn push_line(&mut self, line: &str) {
        self.push_str(line);
        self.push_str("\n");
    }

    /// Whether more output would be discarded
    pub fn is_full(&self) -> bool {
        self.chars > self.max_chars
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The output, truncated with the marker if it overflowed
    pub fn finish(self) -> String {
        truncate_output(&self.text, self.max_chars)
    }
}

/// Bounded, order-preserving log buffer.
///
/// Entries past the cap are counted instead of stored; `finish` appends the
/// synthetic trailer.
#[derive(Debug, Clone)]
pub struct LogCollector {
    entries: Vec<ConsoleLogEntry>,
    max_entries: usize,
    dropped: usize,
    last_dropped_ms: Option<i64>,
}

impl LogCollector {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
            dropped: 0,
            last_dropped_ms: None,
        }
    }

    pub fn push(&mut self, entry: ConsoleLogEntry) {
        if self.entries.len() < self.max_entries {
            self.entries.push(entry);
        } else {
            self.record_dropped(1, entry.timestamp_ms);
        }
    }

    /// Count entries that were discarded before reaching the collector
    pub fn record_dropped(&mut self, count: usize, timestamp_ms: i64) {
        if count == 0 {
            return;
        }
        self.dropped += count;
        self.last_dropped_ms = Some(
            self.last_dropped_ms
                .map_or(timestamp_ms, |last| last.max(timestamp_ms)),
        );
    }

    pub fn entries(&self) -> &[ConsoleLogEntry] {
        &self.entries
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn finish(mut self) -> Vec<ConsoleLogEntry> {
        if self.dropped > 0 {
            let floor = self.entries.last().map_or(0, |e| e.timestamp_ms);
            let timestamp_ms = self.last_dropped_ms.unwrap_or(floor).max(floor);
            let noun = if self.dropped == 1 { "entry" } else { "entries" };
            self.entries.push(ConsoleLogEntry::new(
                LogKind::Warn,
                format!("{} log {} truncated", self.dropped, noun),
                timestamp_ms,
            ));
        }
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(i: i64) -> ConsoleLogEntry {
        ConsoleLogEntry::new(LogKind::Log, format!("line {i}"), i)
    }

    #[test]
    fn test_output_under_limit_is_untouched() {
        assert_eq!(truncate_output("hello", 5), "hello");
        assert_eq!(truncate_output("", 0), "");
    }

    #[test]
    fn test_output_one_over_limit() {
        let output = "x".repeat(11);
        let truncated = truncate_output(&output, 10);
        assert_eq!(truncated, format!("{}{}", "x".repeat(10), OUTPUT_TRUNCATED_MARKER));
    }

    #[test]
    fn test_truncation_is_idempotent() {
        let once = truncate_output(&"y".repeat(50), 20);
        assert_eq!(truncate_output(&once, 20), once);
    }

    #[test]
    fn test_truncation_counts_characters() {
        let truncated = truncate_output("héllo wörld", 4);
        assert!(truncated.starts_with("héll"));
        assert!(truncated.ends_with(OUTPUT_TRUNCATED_MARKER));
    }

    #[test]
    fn test_logs_truncated_with_trailer() {
        let logs: Vec<_> = (0..5).map(entry).collect();
        let kept = truncate_logs(logs, 3);

        assert_eq!(kept.len(), 4);
        assert_eq!(kept[2].content, "line 2");
        assert_eq!(kept[3].kind, LogKind::Warn);
        assert_eq!(kept[3].content, "2 log entries truncated");
        assert_eq!(kept[3].timestamp_ms, 4);
    }

    #[test]
    fn test_logs_under_limit_have_no_trailer() {
        let logs: Vec<_> = (0..3).map(entry).collect();
        assert_eq!(truncate_logs(logs.clone(), 3), logs);
    }

    #[test]
    fn test_collector_counts_external_drops() {
        let mut collector = LogCollector::new(2);
        collector.push(entry(1));
        collector.push(entry(2));
        collector.record_dropped(1, 3);
        assert_eq!(collector.dropped(), 1);

        let logs = collector.finish();
        assert_eq!(logs.last().map(|e| e.content.as_str()), Some("1 log entry truncated"));
    }

    #[test]
    fn test_output_buffer_ignores_log_cap() {
        let mut logs = LogCollector::new(1000);
        let mut output = OutputBuffer::new(100_000);
        let line = "z".repeat(59);
        for i in 0..2000 {
            let entry = ConsoleLogEntry::new(LogKind::Log, line.clone(), i);
            output.push_line(&entry.content);
            logs.push(entry);
        }

        assert!(output.is_full());
        let output = output.finish();
        assert!(output.ends_with(OUTPUT_TRUNCATED_MARKER));
        assert_eq!(
            output.chars().count(),
            100_000 + OUTPUT_TRUNCATED_MARKER.chars().count()
        );
        assert_eq!(logs.finish().len(), 1001);
    }

    #[test]
    fn test_output_buffer_under_limit() {
        let mut output = OutputBuffer::new(10);
        output.push_line("héllo");
        output.push_str("ab");
        assert!(!output.is_full());
        assert_eq!(output.as_str(), "héllo\nab");
        assert_eq!(output.finish(), "héllo\nab");
    }

    #[test]
    fn test_output_buffer_cuts_on_char_boundary() {
        let mut output = OutputBuffer::new(3);
        output.push_str("ééééé");
        assert_eq!(output.as_str(), "éééé");
        output.push_str("more");
        assert_eq!(output.finish(), format!("ééé{OUTPUT_TRUNCATED_MARKER}"));
    }
}
