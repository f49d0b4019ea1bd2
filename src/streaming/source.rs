//! Command files.
//!
//! One textual command per line. The file is read lazily and can be
//! re-opened any number of times.

use crate::error::{NbfError, Result};
use crate::streaming::protocol::Command;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// Line count past which `peek_length` gives up
pub const PEEK_LINE_CUTOFF: usize = 10_000;

#[derive(Debug, Clone)]
pub struct NbfFile {
    path: PathBuf,
}

impl NbfFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file and iterate its commands in order.
    pub fn commands(&self) -> Result<NbfCommands> {
        let file = File::open(&self.path).map_err(|e| NbfError::io(&self.path, e))?;
        Ok(NbfCommands {
            path: self.path.clone(),
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }

    /// Count lines to predict the number of commands.
    ///
    /// Returns `None` when the file has more than `PEEK_LINE_CUTOFF` lines.
    /// A hint for progress display only.
    pub fn peek_length(&self) -> Result<Option<usize>> {
        let file = File::open(&self.path).map_err(|e| NbfError::io(&self.path, e))?;
        let mut count = 0;
        for line in BufReader::new(file).lines() {
            line.map_err(|e| NbfError::io(&self.path, e))?;
            count += 1;
            if count > PEEK_LINE_CUTOFF {
                return Ok(None);
            }
        }
        Ok(Some(count))
    }
}

/// Lazy iterator over the commands of an [`NbfFile`]. Blank lines are skipped.
#[derive(Debug)]
pub struct NbfCommands {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: usize,
}

impl Iterator for NbfCommands {
    type Item = Result<Command>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(NbfError::io(&self.path, e))),
            };
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            return Some(Command::parse(&line).map_err(|e| e.at_line(self.line_number)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::protocol::opcode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn nbf_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_commands_in_order() {
        let file = nbf_file(
            "03_0080000000_0000000000000001\n\
             \n\
             13_0080000000_0000000000000000\n\
             fe_0000000000_0000000000000000\n",
        );
        let source = NbfFile::new(file.path());

        let commands: Vec<Command> = source.commands().unwrap().map(|c| c.unwrap()).collect();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], Command::write_8(0x8000_0000, 1));
        assert_eq!(commands[1].opcode, opcode::READ_8);
        assert_eq!(commands[2].opcode, opcode::FENCE);

        // Re-opening starts over
        assert_eq!(source.commands().unwrap().count(), 3);
    }

    #[test]
    fn test_parse_error_carries_line_number() {
        let file = nbf_file("03_0080000000_0000000000000001\n03_0080000000\n");
        let mut commands = NbfFile::new(file.path()).commands().unwrap();

        assert!(commands.next().unwrap().is_ok());
        match commands.next().unwrap() {
            Err(NbfError::Parse { line_number, .. }) => assert_eq!(line_number, Some(2)),
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_peek_length() {
        let file = nbf_file("03_0080000000_0000000000000001\nff_0000000000_0000000000000000\n");
        assert_eq!(NbfFile::new(file.path()).peek_length().unwrap(), Some(2));
    }

    #[test]
    fn test_peek_length_gives_up_past_cutoff() {
        let line = "03_0080000000_0000000000000001\n";
        let file = nbf_file(&line.repeat(PEEK_LINE_CUTOFF + 1));
        assert_eq!(NbfFile::new(file.path()).peek_length().unwrap(), None);

        let file = nbf_file(&line.repeat(PEEK_LINE_CUTOFF));
        assert_eq!(
            NbfFile::new(file.path()).peek_length().unwrap(),
            Some(PEEK_LINE_CUTOFF)
        );
    }

    #[test]
    fn test_missing_file() {
        let err = NbfFile::new("/nonexistent/program.nbf").commands().unwrap_err();
        assert!(matches!(err, NbfError::Io { .. }));
    }
}
