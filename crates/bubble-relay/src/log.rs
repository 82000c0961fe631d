//! Relay request logging.
//!
//! Outcomes are appended to `relay.log` with a timestamp. Anything
//! echoed from a request is truncated and has control characters
//! escaped first, so a hostile client can't forge log lines.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use bubble_core::DataDir;

/// Replace line-control characters for safe single-line logging.
pub fn sanitize_for_log(s: &str) -> String {
    s.replace('\n', "\\n").replace('\r', "\\r").replace('\t', "\\t")
}

pub struct RelayLog {
    path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl RelayLog {
    pub fn new(data_dir: &DataDir) -> Self {
        Self {
            path: data_dir.relay_log(),
            file: Mutex::new(None),
        }
    }

    pub fn line(&self, message: &str) {
        let mut guard = self.file.lock().expect("relay log poisoned");
        if guard.is_none() {
            *guard = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .ok();
        }
        if let Some(file) = guard.as_mut() {
            let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(file, "{stamp}  {message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_control_characters() {
        assert_eq!(sanitize_for_log("a\nb\rc\td"), "a\\nb\\rc\\td");
    }

    #[test]
    fn appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let log = RelayLog::new(&data);
        log.line("ACCEPT  container=c1  target=o/r");
        log.line("REJECT  malformed JSON");

        let contents = std::fs::read_to_string(data.relay_log()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("ACCEPT  container=c1  target=o/r"));
    }
}
