// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Byte-level access to partition block devices. Block devices report a zero
//! length via metadata, so sizing goes through seeks, and all reads are
//! positional so that no state is shared between probes.

use std::{
    fs::File,
    io::{self, Cursor, Seek, SeekFrom},
    os::unix::fs::FileExt,
    path::Path,
    thread,
    time::{Duration, Instant},
};

use crate::format::avb::{self, Footer};
use crate::stream::FromReader;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Length of the device in bytes, leaving the seek position where it was.
pub fn total_size(mut file: &File) -> io::Result<u64> {
    let saved = file.stream_position()?;
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(saved))?;

    Ok(size)
}

/// Read and validate the AVB footer stored in the last [`Footer::SIZE`] bytes
/// of the device.
pub fn read_footer(file: &File) -> Result<Footer, avb::Error> {
    let size = total_size(file)?;
    let offset = size.checked_sub(Footer::SIZE as u64).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{size} byte partition is too small to hold an AVB footer"),
        )
    })?;

    let mut buf = [0u8; Footer::SIZE];
    file.read_exact_at(&mut buf, offset)?;

    Footer::from_reader(Cursor::new(buf.as_slice()))
}

/// Positional read of exactly `buf.len()` bytes. Interrupted reads are
/// retried.
pub fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    file.read_exact_at(buf, offset)
}

/// Positional read of up to `buf.len()` bytes, stopping early at EOF.
/// Interrupted reads are retried. Returns the number of bytes read.
pub fn read_at_most(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut total = 0;

    while total < buf.len() {
        match file.read_at(&mut buf[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    Ok(total)
}

/// Poll until `path` exists or the timeout elapses. Device nodes are created
/// asynchronously by init/ueventd, so a just-resolved path may not be ready.
pub fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;

    loop {
        if path.exists() {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }

        thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
    }
}
