// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Loaded vbmeta images and the tri-state outcome of verifying them. An image
//! owns its bytes; descriptors are parsed out of it on demand.

use std::{cmp, fmt, io::Cursor};

use tracing::{error, warn};

use crate::format::avb::{
    self, ChainPartitionDescriptor, Descriptor, DescriptorIter, HashTreeDescriptor, Header,
};
use crate::stream::FromReader;

/// Outcome of verifying one vbmeta image. Ranked so that combining results
/// across a chain keeps the worst one: `Success < ErrorVerification < Error`.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub enum VerifyResult {
    /// Signature and key expectation both check out.
    Success,
    /// The image parses, but the signature or pinned-key comparison failed.
    /// The caller decides whether this is tolerable.
    ErrorVerification,
    /// I/O failure, malformed structure, or policy violation.
    Error,
    /// Not yet verified.
    #[default]
    Unknown,
}

impl VerifyResult {
    /// Combine with the result of another image; the worst status wins.
    pub fn worst(self, other: Self) -> Self {
        cmp::max(self, other)
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::ErrorVerification => "verification error",
            Self::Error => "error",
            Self::Unknown => "unknown",
        };

        write!(f, "{name}")
    }
}

/// A vbmeta blob read from a partition, together with the partition name it
/// came from. The buffer initially spans whatever was read from disk;
/// [`VbmetaImage::update_size`] shrinks it to the size the verified header
/// declares.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VbmetaImage {
    partition: String,
    data: Vec<u8>,
}

impl VbmetaImage {
    pub fn new(partition: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            partition: partition.into(),
            data,
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Parse the fixed header out of the blob.
    pub fn header(&self) -> Result<Header, avb::Error> {
        Header::from_reader(Cursor::new(self.data.as_slice()))
    }

    /// Shrink the buffer to the effective image size declared by the header.
    /// A vbmeta partition is read at its maximum size, so the buffer usually
    /// extends past the image.
    pub fn update_size(&mut self, header: &Header) {
        if let Some(total_size) = header.total_size() {
            if total_size <= self.data.len() as u64 {
                self.data.truncate(total_size as usize);
            }
        }
    }

    /// Iterate over the descriptor region. Requires a parseable header.
    pub fn descriptors(&self) -> Result<DescriptorIter<'_>, avb::Error> {
        let header = self.header()?;

        let aux_start = (Header::SIZE as u64)
            .checked_add(header.authentication_data_block_size)
            .ok_or(avb::Error::IntegerTooLarge("descriptors_offset"))?;
        let start = aux_start
            .checked_add(header.descriptors_offset)
            .ok_or(avb::Error::IntegerTooLarge("descriptors_offset"))?;
        let end = start
            .checked_add(header.descriptors_size)
            .ok_or(avb::Error::IntegerTooLarge("descriptors_size"))?;

        if end > self.data.len() as u64 {
            return Err(avb::Error::FieldOutOfBounds("descriptors"));
        }

        Ok(DescriptorIter::new(&self.data[start as usize..end as usize]))
    }

    /// Verify the blob's signature and compare the embedded public key
    /// against `expected_public_key`. An empty expectation denotes the
    /// top-level root of trust and skips the comparison.
    pub fn verify(&self, expected_public_key: &[u8]) -> VerifyResult {
        match avb::verify_image(&self.data) {
            Ok(public_key) => {
                if verify_public_key_blob(public_key, expected_public_key) {
                    VerifyResult::Success
                } else {
                    error!(
                        "{}: Error verifying vbmeta image: public key used to sign data \
                         does not match key in chain descriptor",
                        self.partition,
                    );
                    VerifyResult::ErrorVerification
                }
            }
            Err(e) if e.is_verification_failure() => {
                error!("{}: Error verifying vbmeta image: {e}", self.partition);
                VerifyResult::ErrorVerification
            }
            Err(e) => {
                error!("{}: Error verifying vbmeta image: {e}", self.partition);
                VerifyResult::Error
            }
        }
    }
}

fn verify_public_key_blob(key: &[u8], expected: &[u8]) -> bool {
    expected.is_empty() || key == expected
}

/// Find the hashtree descriptor for a partition across a set of verified
/// images. The first exact name match wins. Malformed descriptors are logged
/// and skipped so that one damaged entry cannot mask a later match.
pub fn find_hashtree_descriptor(
    partition_name: &str,
    images: &[VbmetaImage],
) -> Option<HashTreeDescriptor> {
    for image in images {
        let iter = match image.descriptors() {
            Ok(iter) => iter,
            Err(e) => {
                warn!("{}: Failed to enumerate descriptors: {e}", image.partition());
                continue;
            }
        };

        for entry in iter {
            match entry {
                Ok(Descriptor::HashTree(d)) if d.partition_name == partition_name => {
                    return Some(d);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("{}: Skipping invalid descriptor: {e}", image.partition());
                }
            }
        }
    }

    error!("Partition descriptor not found: {partition_name}");
    None
}

/// Collect the chain-partition descriptors of an image. Unlike the hashtree
/// search, any malformed descriptor here is fatal.
pub fn chain_partitions(image: &VbmetaImage) -> Result<Vec<ChainPartitionDescriptor>, avb::Error> {
    let mut chains = Vec::new();

    for entry in image.descriptors()? {
        if let Descriptor::ChainPartition(d) = entry? {
            chains.push(d);
        }
    }

    Ok(chains)
}

#[cfg(test)]
mod tests {
    use super::{verify_public_key_blob, VerifyResult};

    #[test]
    fn worst_result_ranking() {
        use VerifyResult::*;

        assert_eq!(Success.worst(ErrorVerification), ErrorVerification);
        assert_eq!(ErrorVerification.worst(Success), ErrorVerification);
        assert_eq!(ErrorVerification.worst(Error), Error);
        assert_eq!(Error.worst(Success), Error);
        assert_eq!(Success.worst(Success), Success);
        assert_eq!(VerifyResult::default(), Unknown);
    }

    #[test]
    fn display_names() {
        assert_eq!(VerifyResult::Success.to_string(), "success");
        assert_eq!(
            VerifyResult::ErrorVerification.to_string(),
            "verification error"
        );
        assert_eq!(VerifyResult::Error.to_string(), "error");
        assert_eq!(VerifyResult::Unknown.to_string(), "unknown");
    }

    #[test]
    fn empty_expectation_accepts_any_key() {
        assert!(verify_public_key_blob(b"some key", b""));
        assert!(verify_public_key_blob(b"some key", b"some key"));
        assert!(!verify_public_key_blob(b"some key", b"other key"));
        assert!(!verify_public_key_blob(b"some key", b"some key + suffix"));
    }
}
