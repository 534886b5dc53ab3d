//! File helpers shared by the `darwin` subcommands.
//!
//! A run produces two kinds of JSON: one pretty-printed summary and a stream of
//! per-generation metrics records, one per line. Both go through [`Output`], which
//! flushes after every document so a crashed run still leaves complete records behind.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;

use crate::config::Config;

/// Destination for the run summary or the metrics stream.
#[derive(Debug)]
pub struct Output {
    sink: Sink,
}

#[derive(Debug)]
enum Sink {
    // not locked: a metrics sink moves to the handler thread
    Stdout(io::Stdout),
    File { writer: BufWriter<File>, path: PathBuf },
}

impl Output {
    /// Writes to `path`, or to standard output when there is none.
    pub fn create(path: Option<PathBuf>) -> anyhow::Result<Self> {
        path.map_or_else(|| Ok(Self::stdout()), Self::file)
    }

    #[must_use]
    pub fn stdout() -> Self {
        Self {
            sink: Sink::Stdout(io::stdout()),
        }
    }

    /// Creates (or truncates) `path`.
    pub fn file(path: PathBuf) -> anyhow::Result<Self> {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Self {
            sink: Sink::File {
                writer: BufWriter::new(file),
                path,
            },
        })
    }

    /// `"stdout"` or the file path, for log messages.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.sink {
            Sink::Stdout(_) => "stdout".to_owned(),
            Sink::File { path, .. } => path.display().to_string(),
        }
    }

    /// Writes `summary` as indented JSON.
    pub fn write_summary<T>(&mut self, summary: &T) -> anyhow::Result<()>
    where
        T: serde::Serialize + ?Sized,
    {
        self.write_document(|w| serde_json::to_writer_pretty(w, summary))
    }

    /// Appends `record` as one line of compact JSON.
    pub fn append_record<T>(&mut self, record: &T) -> anyhow::Result<()>
    where
        T: serde::Serialize + ?Sized,
    {
        self.write_document(|w| serde_json::to_writer(w, record))
    }

    fn write_document<F>(&mut self, encode: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut dyn Write) -> serde_json::Result<()>,
    {
        let label = self.label();
        let writer = self.writer();
        encode(&mut *writer).with_context(|| format!("Failed to write JSON to {label}"))?;
        writer
            .write_all(b"\n")
            .and_then(|()| writer.flush())
            .with_context(|| format!("Failed to flush output to {label}"))
    }

    fn writer(&mut self) -> &mut dyn Write {
        match &mut self.sink {
            Sink::Stdout(stdout) => stdout,
            Sink::File { writer, .. } => writer,
        }
    }
}

/// Loads a run configuration and checks it.
///
/// Parse errors carry the line and column of the offending JSON.
pub fn load_config<P>(path: P) -> anyhow::Result<Config>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration: {}", path.display()))?;
    Ok(config)
}
