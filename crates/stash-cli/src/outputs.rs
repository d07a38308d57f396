//! Step outputs as `name=value` lines.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Writes outputs to stdout and, when set, appends them to a file.
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    file: Option<PathBuf>,
}

impl Outputs {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self { file }
    }

    pub fn set(&self, name: &str, value: &str) -> std::io::Result<()> {
        let line = format!("{}={}", name, value);
        println!("{}", line);

        if let Some(path) = &self.file {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}
