// SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Read};

/// Common function for reading a structure from a reader.
pub trait FromReader<R: Read>: Sized {
    type Error;

    fn from_reader(reader: R) -> Result<Self, Self::Error>;
}

/// Extensions for readers to read fixed-size buffers.
pub trait ReadFixedSizeExt {
    /// Read fixed-size array.
    fn read_array_exact<const N: usize>(&mut self) -> io::Result<[u8; N]>;

    /// Read fixed-sized [`Vec`].
    fn read_vec_exact(&mut self, size: usize) -> io::Result<Vec<u8>>;
}

impl<R: Read> ReadFixedSizeExt for R {
    fn read_array_exact<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_vec_exact(&mut self, size: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Extensions for readers to read strings in on-disk formats.
pub trait ReadStringExt {
    /// Read a string field with an exact size and no terminator.
    fn read_string_exact(&mut self, size: usize) -> io::Result<String>;

    /// Read a string field that is zero-padded to a fixed size. Trailing
    /// zeros are stripped; intermediate zeros are kept.
    fn read_string_padded(&mut self, size: usize) -> io::Result<String>;
}

impl<R: Read> ReadStringExt for R {
    fn read_string_exact(&mut self, size: usize) -> io::Result<String> {
        let buf = self.read_vec_exact(size)?;

        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn read_string_padded(&mut self, size: usize) -> io::Result<String> {
        let mut buf = self.read_vec_exact(size)?;
        let unpadded_size = buf
            .iter()
            .rposition(|b| *b != 0)
            .map(|pos| pos + 1)
            .unwrap_or_default();
        buf.truncate(unpadded_size);

        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Extensions for readers to read and discard data (eg. for padding).
pub trait ReadDiscardExt {
    fn read_discard_exact(&mut self, size: u64) -> io::Result<()>;
}

impl<R: Read> ReadDiscardExt for R {
    fn read_discard_exact(&mut self, size: u64) -> io::Result<()> {
        let n = io::copy(&mut self.take(size), &mut io::sink())?;
        if n != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Expected to read {size} bytes, but reached EOF after {n} bytes"),
            ));
        }
        Ok(())
    }
}

/// A reader wrapper that reports how many bytes have been consumed.
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::{CountingReader, ReadDiscardExt, ReadStringExt};

    #[test]
    fn string_padded_trims_trailing_zeros_only() {
        let data = b"sha\x00256\x00\x00\x00";
        assert_eq!(data.as_slice().read_string_padded(10).unwrap(), "sha\x00256");

        let data = [0u8; 4];
        assert_eq!(data.as_slice().read_string_padded(4).unwrap(), "");
    }

    #[test]
    fn string_exact_requires_utf8() {
        let data = b"\xff\xfe";
        assert!(data.as_slice().read_string_exact(2).is_err());
    }

    #[test]
    fn counting_reader_tracks_consumption() {
        let data = [0u8; 16];
        let mut reader = CountingReader::new(data.as_slice());

        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.count(), 5);

        reader.read_discard_exact(11).unwrap();
        assert_eq!(reader.count(), 16);

        assert!(reader.read_discard_exact(1).is_err());
    }
}
