use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use super::TickSource;

/// Replays a recorded JSON-lines capture, one trade payload per line.
pub struct ReplaySource {
    lines: Lines<BufReader<File>>,
    line_no: u64,
}

impl ReplaySource {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("failed to open replay file {}", path.display()))?;
        tracing::info!(path = %path.display(), "Replaying ticks from file");
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    pub fn lines_read(&self) -> u64 {
        self.line_no
    }
}

#[async_trait]
impl TickSource for ReplaySource {
    async fn next_message(&mut self) -> Result<Option<String>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .with_context(|| format!("replay read failed after line {}", self.line_no))?;
            match line {
                Some(text) => {
                    self.line_no += 1;
                    if text.trim().is_empty() {
                        continue;
                    }
                    return Ok(Some(text));
                }
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn yields_non_blank_lines_then_closes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"T":1000,"p":"1","q":"1","m":false}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"T":2000,"p":"2","q":"1","m":true}}"#).unwrap();
        file.flush().unwrap();

        let mut source = ReplaySource::open(file.path()).await.unwrap();
        let first = source.next_message().await.unwrap().unwrap();
        assert!(first.contains("\"T\":1000"));
        let second = source.next_message().await.unwrap().unwrap();
        assert!(second.contains("\"T\":2000"));
        assert!(source.next_message().await.unwrap().is_none());
        assert_eq!(source.lines_read(), 3);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let res = ReplaySource::open(Path::new("/definitely/not/here.jsonl")).await;
        assert!(res.is_err());
    }
}
