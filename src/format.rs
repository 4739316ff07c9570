//! Document stream formats.
//!
//! Two on-disk layouts share one writer interface: NDJSON (one LF-terminated
//! document per line) and a pretty-printed JSON array. Reading only supports
//! NDJSON; blank lines are skipped, and the first malformed line kills the
//! stream with an `INPUT_READ` error carrying the line's prefix.

use crate::error::Error;
use crate::value::Value;
use std::io::{BufRead, Error as IoError, Write};

/// Longest prefix of a malformed line carried in the error.
const ERROR_PREFIX_LEN: usize = 64;

/// Wrapper of a writer which serializes a document stream according to
/// specific layout rules.
pub trait DocumentFormat {
    /// Writes the content before all documents.
    fn write_header(&self, writer: &mut dyn Write) -> Result<(), IoError>;

    /// Writes a single document.
    fn write_document(&self, writer: &mut dyn Write, document: &Value) -> Result<(), IoError>;

    /// Writes the separator between every document.
    fn write_separator(&self, writer: &mut dyn Write) -> Result<(), IoError>;

    /// Writes the content after all documents.
    fn write_trailer(&self, writer: &mut dyn Write) -> Result<(), IoError>;
}

/// NDJSON: documents separated by a line feed, no surrounding punctuation.
#[derive(Debug)]
pub struct NdjsonFormat;

impl DocumentFormat for NdjsonFormat {
    fn write_header(&self, _: &mut dyn Write) -> Result<(), IoError> {
        Ok(())
    }

    fn write_document(&self, writer: &mut dyn Write, document: &Value) -> Result<(), IoError> {
        serde_json::to_writer(&mut *writer, document)?;
        Ok(())
    }

    fn write_separator(&self, writer: &mut dyn Write) -> Result<(), IoError> {
        writer.write_all(b"\n")
    }

    fn write_trailer(&self, writer: &mut dyn Write) -> Result<(), IoError> {
        writer.write_all(b"\n")
    }
}

/// A single JSON array, 2-space indented, one indentation level per element.
#[derive(Debug)]
pub struct JsonArrayFormat;

impl DocumentFormat for JsonArrayFormat {
    fn write_header(&self, writer: &mut dyn Write) -> Result<(), IoError> {
        writer.write_all(b"[\n")
    }

    fn write_document(&self, writer: &mut dyn Write, document: &Value) -> Result<(), IoError> {
        let rendered = serde_json::to_string_pretty(document)?;
        for (index, line) in rendered.lines().enumerate() {
            if index > 0 {
                writer.write_all(b"\n")?;
            }
            writer.write_all(b"  ")?;
            writer.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    fn write_separator(&self, writer: &mut dyn Write) -> Result<(), IoError> {
        writer.write_all(b",\n")
    }

    fn write_trailer(&self, writer: &mut dyn Write) -> Result<(), IoError> {
        writer.write_all(b"\n]\n")
    }
}

/// Stateful writer pairing a format with an output stream.
#[derive(Debug)]
pub struct DocumentWriter<W: Write, F: DocumentFormat> {
    writer: W,
    format: F,
    empty: bool,
}

impl<W: Write, F: DocumentFormat> DocumentWriter<W, F> {
    /// Wraps `writer`.
    pub fn new(writer: W, format: F) -> Self {
        DocumentWriter {
            writer,
            format,
            empty: true,
        }
    }

    /// Writes one document, emitting header or separator as needed.
    pub fn write(&mut self, document: &Value) -> Result<(), IoError> {
        if std::mem::take(&mut self.empty) {
            self.format.write_header(&mut self.writer)?;
        } else {
            self.format.write_separator(&mut self.writer)?;
        }
        self.format.write_document(&mut self.writer, document)
    }

    /// Writes the trailer and hands the inner writer back.
    pub fn finish(mut self) -> Result<W, IoError> {
        if self.empty {
            self.format.write_header(&mut self.writer)?;
        }
        self.format.write_trailer(&mut self.writer)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Pull iterator over an NDJSON stream.
#[derive(Debug)]
pub struct NdjsonReader<R: BufRead> {
    reader: R,
    line: u64,
}

impl<R: BufRead> NdjsonReader<R> {
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        NdjsonReader { reader, line: 0 }
    }
}

impl<R: BufRead> Iterator for NdjsonReader<R> {
    type Item = Result<Value, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut buffer = String::new();
            self.line += 1;
            match self.reader.read_line(&mut buffer) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(source) => {
                    return Some(Err(Error::Io {
                        action: "read input line",
                        path: "<stream>".into(),
                        source,
                    }));
                }
            }
            let trimmed = buffer.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str::<serde_json::Value>(trimmed)
                    .map(|json| Value::from_json(&json))
                    .map_err(|source| Error::InputRead {
                        line: self.line,
                        prefix: trimmed.chars().take(ERROR_PREFIX_LEN).collect(),
                        source,
                    }),
            );
        }
    }
}
