//! Best-effort transcript logging.
//!
//! When enabled with `--log <file>`, every rendered chat line is appended to
//! the file as it is displayed. Failures here must never disturb the
//! session, so callers log and move on.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

pub struct ChatLogger {
    file_path: Option<String>,
    is_active: bool,
}

impl ChatLogger {
    pub fn new(log_file: Option<String>) -> Result<Self, Box<dyn std::error::Error>> {
        if let Some(path) = &log_file {
            Self::test_file_access(path)?;
        }
        Ok(ChatLogger {
            is_active: log_file.is_some(),
            file_path: log_file,
        })
    }

    pub fn log_line(&self, line: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.file_path.as_ref().filter(|_| self.is_active) else {
            return Ok(());
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    pub fn toggle(&mut self) -> bool {
        if self.file_path.is_some() {
            self.is_active = !self.is_active;
        }
        self.is_active
    }

    pub fn status_string(&self) -> String {
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!(
                "active ({})",
                Path::new(path).file_name().unwrap_or_default().to_string_lossy()
            ),
            (Some(path), false) => format!(
                "paused ({})",
                Path::new(path).file_name().unwrap_or_default().to_string_lossy()
            ),
        }
    }

    fn test_file_access(path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.flush()?;
        Ok(())
    }
}
