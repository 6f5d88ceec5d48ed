//! Log initialisation. Every formatted line is redacted before it reaches stdout.

use std::io::{self, Write};
use std::sync::Arc;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::redact::Redactor;

/// A `MakeWriter` that buffers one formatted event and writes it redacted on
/// drop. Writes to stdout unless built with another sink.
#[derive(Clone)]
pub struct RedactingWriter<M = fn() -> io::Stdout> {
    redactor: Arc<Redactor>,
    sink: M,
}

impl RedactingWriter {
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self {
            redactor,
            sink: io::stdout,
        }
    }
}

impl<M> RedactingWriter<M> {
    pub fn with_sink(redactor: Arc<Redactor>, sink: M) -> Self {
        Self { redactor, sink }
    }
}

pub struct RedactingLine<W: Write> {
    redactor: Arc<Redactor>,
    buf: Vec<u8>,
    sink: W,
}

impl<W: Write> Write for RedactingLine<W> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> Drop for RedactingLine<W> {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.buf);
        let line = self.redactor.redact(&text);
        let _ = self.sink.write_all(line.as_bytes());
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for RedactingWriter<M> {
    type Writer = RedactingLine<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingLine {
            redactor: self.redactor.clone(),
            buf: Vec::new(),
            sink: self.sink.make_writer(),
        }
    }
}

/// Install the global subscriber: `RUST_LOG` filtering with an
/// `intranet_archive=info` default, output through the redactor.
pub fn init_logging(redactor: Arc<Redactor>) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("intranet_archive=info".parse()?),
        )
        .with_writer(RedactingWriter::new(redactor))
        .init();
    Ok(())
}
