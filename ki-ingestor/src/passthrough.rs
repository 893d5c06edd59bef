use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    str::FromStr,
};

use crate::{errors::KiIngestorError, Result};

pub const STDOUT_TOKEN: &str = "stdout";
const EOL: u8 = b'\n';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout,
    File(PathBuf),
}

impl Output {
    /// Files are created, or truncated if they already exist.
    pub fn open(&self) -> Result<Box<dyn Write + Send>> {
        match self {
            Output::Stdout => Ok(Box::new(BufWriter::new(io::stdout()))),
            Output::File(path) => {
                let file = File::create(path).map_err(|source| KiIngestorError::Open {
                    path: path.clone(),
                    source,
                })?;
                Ok(Box::new(BufWriter::new(file)))
            }
        }
    }
}

impl FromStr for Output {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Ok(match s {
            STDOUT_TOKEN => Output::Stdout,
            path => Output::File(path.into()),
        })
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Stdout => f.write_str(STDOUT_TOKEN),
            Output::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Echoes raw lines, each followed by a newline, in the order given.
pub struct PassThrough<W: Write> {
    out: W,
    lines: u64,
}

impl<W: Write> PassThrough<W> {
    pub fn new(out: W) -> Self {
        Self { out, lines: 0 }
    }

    pub fn echo(&mut self, raw: &[u8]) -> io::Result<()> {
        self.out.write_all(raw)?;
        self.out.write_all(&[EOL])?;
        self.lines += 1;
        Ok(())
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Flushes and hands back the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
