//! Read-only and write-only views of an open transaction.
//!
//! The input view reads the original snapshot of the target; the output view
//! writes the staging file. Neither can be used for the other's job: the
//! input has no `Write` impl and the output has no `Read` impl, so staged
//! bytes can never be read back by mistake.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Read-only view of the target's content as it was when the transaction opened.
#[derive(Debug)]
pub struct InputView {
    reader: BufReader<File>,
    path: PathBuf,
}

impl InputView {
    pub(crate) fn new(file: File, path: PathBuf) -> Self {
        Self {
            reader: BufReader::new(file),
            path,
        }
    }

    /// Path of the target file this snapshot was taken from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for InputView {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl BufRead for InputView {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt)
    }
}

/// Write-only view of the staging file.
///
/// The staging file starts as a copy of the target with the cursor at 0.
/// Sequential writes replace the content: the commit truncates the file
/// after the last byte written. Seeking switches the view to in-place
/// editing, where bytes that were never overwritten are kept.
#[derive(Debug)]
pub struct OutputView {
    writer: BufWriter<File>,
    path: PathBuf,
    position: u64,
    in_place: bool,
}

impl OutputView {
    pub(crate) fn new(file: File, path: PathBuf) -> Self {
        Self {
            writer: BufWriter::new(file),
            path,
            position: 0,
            in_place: false,
        }
    }

    /// Path of the staging file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the view has been seeked and now edits the copy in place.
    pub fn is_in_place(&self) -> bool {
        self.in_place
    }

    /// Flush buffered bytes, trim the file to the written content when
    /// writing sequentially, and hand back the file for syncing.
    pub(crate) fn finish(self) -> io::Result<File> {
        let position = self.position;
        let in_place = self.in_place;
        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        if !in_place {
            file.set_len(position)?;
        }
        Ok(file)
    }
}

impl Write for OutputView {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Seek for OutputView {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        // BufWriter flushes before seeking.
        let position = self.writer.seek(pos)?;
        self.position = position;
        self.in_place = true;
        Ok(position)
    }
}
