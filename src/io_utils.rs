//! File and stream plumbing for the CLI.
//!
//! - The `-` path convention routes through stdin/stdout.
//! - Text input in a non-UTF-8 encoding is decoded with `encoding_rs_io`
//!   before tokenizing; text output can be transcoded on the way out.
//! - Binary streams are passed through untouched.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Opens a text source, decoding it to UTF-8 when another encoding is named.
pub fn open_text_input(path: &Path, encoding: &'static Encoding) -> Result<Box<dyn BufRead>> {
    let raw = open_binary_input(path)?;
    if encoding == UTF_8 {
        return Ok(raw);
    }
    let decoder = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .build(raw);
    Ok(Box::new(BufReader::new(decoder)))
}

pub fn open_binary_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if is_dash(path) {
        return Ok(Box::new(BufReader::new(io::stdin().lock())));
    }
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(Box::new(BufReader::new(file)))
}

pub fn open_binary_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(BufWriter::new(io::stdout())),
    })
}

/// Opens a text sink, transcoding from UTF-8 when another encoding is named.
pub fn open_text_output(
    path: Option<&Path>,
    encoding: &'static Encoding,
) -> Result<Box<dyn Write>> {
    let base = open_binary_output(path)?;
    if encoding == UTF_8 {
        Ok(base)
    } else {
        Ok(Box::new(TranscodingWriter::new(base, encoding)))
    }
}

pub fn csv_writer<W: Write>(writer: W, delimiter: u8) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(delimiter)
        .double_quote(true)
        .from_writer(writer)
}

/// Re-encodes UTF-8 bytes. Incomplete trailing sequences wait for the next
/// write; at flush time they are an error.
struct TranscodingWriter<W: Write> {
    inner: W,
    encoding: &'static Encoding,
    pending: Vec<u8>,
}

impl<W: Write> TranscodingWriter<W> {
    fn new(inner: W, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            encoding,
            pending: Vec::new(),
        }
    }

    fn drain_valid(&mut self) -> io::Result<()> {
        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(err) if err.error_len().is_some() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Invalid UTF-8 sequence in output stream",
                ));
            }
            Err(err) => err.valid_up_to(),
        };
        if valid_up_to == 0 {
            return Ok(());
        }
        let chunk: Vec<u8> = self.pending.drain(..valid_up_to).collect();
        let text = String::from_utf8(chunk)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let (encoded, _, had_errors) = self.encoding.encode(&text);
        if had_errors {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to encode text using {}", self.encoding.name()),
            ));
        }
        self.inner.write_all(&encoded)
    }
}

impl<W: Write> Write for TranscodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.drain_valid()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain_valid()?;
        if !self.pending.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Incomplete UTF-8 sequence at end of output stream",
            ));
        }
        self.inner.flush()
    }
}
