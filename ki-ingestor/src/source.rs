use std::{
    collections::VecDeque,
    fmt,
    fs::File,
    io::{self, BufRead, BufReader},
    path::PathBuf,
    str::FromStr,
};

use crate::{errors::KiIngestorError, record::RawRecord, Result};

pub const STDIN_TOKEN: &str = "stdin";

/// Where a stream of lines comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Stdin,
    File(PathBuf),
}

impl Input {
    fn open(&self) -> Result<Box<dyn BufRead + Send>> {
        match self {
            Input::Stdin => Ok(Box::new(BufReader::new(io::stdin()))),
            Input::File(path) => {
                let file = File::open(path).map_err(|source| KiIngestorError::Open {
                    path: path.clone(),
                    source,
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

impl FromStr for Input {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Ok(match s {
            STDIN_TOKEN => Input::Stdin,
            path => Input::File(path.into()),
        })
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Stdin => f.write_str(STDIN_TOKEN),
            Input::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Concatenates several readers into a single forward-only sequence of
/// lines. Each reader is read to the end before moving to the next one.
pub struct RecordSource {
    readers: VecDeque<Box<dyn BufRead + Send>>,
}

impl RecordSource {
    /// Opens every input up front, so a missing file fails the run before
    /// any line is consumed.
    pub fn open(inputs: &[Input]) -> Result<Self> {
        let readers = inputs.iter().map(Input::open).collect::<Result<_>>()?;
        Ok(Self { readers })
    }

    pub fn from_readers<I>(readers: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn BufRead + Send>>,
    {
        Self {
            readers: readers.into_iter().collect(),
        }
    }

    fn next_line(&mut self) -> io::Result<Option<RawRecord>> {
        while let Some(reader) = self.readers.front_mut() {
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line)? == 0 {
                self.readers.pop_front();
                continue;
            }

            if line.last() == Some(&b'\n') {
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
            }
            return Ok(Some(line));
        }
        Ok(None)
    }
}

impl Iterator for RecordSource {
    type Item = io::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Write};

    use super::*;

    fn reader(text: &'static str) -> Box<dyn BufRead + Send> {
        Box::new(Cursor::new(text.as_bytes()))
    }

    #[test]
    fn it_concatenates_readers_in_order() -> anyhow::Result<()> {
        let source = RecordSource::from_readers([reader("a\nb\n"), reader(""), reader("c\r\nd")]);
        let lines = source.collect::<io::Result<Vec<_>>>()?;

        assert_eq!(
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()],
            lines
        );
        Ok(())
    }

    #[test]
    fn it_keeps_blank_lines() -> anyhow::Result<()> {
        let lines = RecordSource::from_readers([reader("\n\nx\n")]).collect::<io::Result<Vec<_>>>()?;
        assert_eq!(vec![vec![], vec![], b"x".to_vec()], lines);
        Ok(())
    }

    #[test]
    fn it_opens_files() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "{{\"a\":1}}")?;

        let input: Input = file.path().to_str().unwrap_or_default().parse()?;
        let lines = RecordSource::open(&[input])?.collect::<io::Result<Vec<_>>>()?;

        assert_eq!(vec![br#"{"a":1}"#.to_vec()], lines);
        Ok(())
    }

    #[test]
    fn it_fails_to_open_missing_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let missing = Input::File(dir.path().join("nope.json"));

        assert!(matches!(
            RecordSource::open(&[missing]),
            Err(KiIngestorError::Open { .. })
        ));
        Ok(())
    }

    #[test]
    fn it_surfaces_read_errors() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
            }
        }

        let mut source = RecordSource::from_readers([
            Box::new(BufReader::new(Broken)) as Box<dyn BufRead + Send>
        ]);
        assert!(matches!(source.next(), Some(Err(_))));
    }

    #[test]
    fn it_parses_the_stdin_token() {
        assert_eq!(Ok(Input::Stdin), "stdin".parse());
        assert_eq!(Ok(Input::File("in.json".into())), "in.json".parse());
    }
}
