use crate::article::Article;
use crate::publish::{PublishError, Publisher};
use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

#[derive(Serialize)]
struct Envelope<'a> {
    destination: &'a str,
    article: &'a Article,
}

/// Writes `{"destination": .., "article": ..}` per line to a writer.
///
/// Used by `--dry-run` in place of the broker.
pub struct JsonLinesPublisher {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesPublisher {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl Publisher for JsonLinesPublisher {
    async fn publish(&self, destination: &str, article: &Article) -> Result<(), PublishError> {
        let line = serde_json::to_string(&Envelope {
            destination,
            article,
        })?;

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}
