/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fmt,
    io::{self, Cursor, Read},
};

use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt};
use num_bigint_dig::{ModInverse, ToBigInt};
use num_traits::{Pow, ToPrimitive};
use rsa::{traits::PublicKeyParts, BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use crate::stream::{
    CountingReader, FromReader, ReadDiscardExt, ReadFixedSizeExt, ReadStringExt,
};

pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 2;

pub const HEADER_MAGIC: [u8; 4] = *b"AVB0";
pub const FOOTER_MAGIC: [u8; 4] = *b"AVBf";

/// Largest vbmeta image we will ever load. Caps boot-time memory and matches
/// what the signing tooling will emit.
pub const MAX_VBMETA_SIZE: u64 = 64 * 1024;

pub const TAG_HASH_TREE: u64 = 1;
pub const TAG_CHAIN_PARTITION: u64 = 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read {0:?} field: {1}")]
    ReadFieldError(&'static str, io::Error),
    #[error("{0:?} field is not ASCII encoded: {1:?}")]
    StringNotAscii(&'static str, String),
    #[error("{0:?} field exceeds integer bounds")]
    IntegerTooLarge(&'static str),
    #[error("{0:?} field range is out of bounds")]
    FieldOutOfBounds(&'static str),
    #[error("Invalid VBMeta header magic: {0:?}")]
    InvalidHeaderMagic([u8; 4]),
    #[error("Invalid VBMeta footer magic: {0:?}")]
    InvalidFooterMagic([u8; 4]),
    #[error("Unsupported libavb version: {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },
    #[error("Image size ({actual} bytes) is smaller than the declared vbmeta size ({expected} bytes)")]
    TruncatedImage { expected: u64, actual: usize },
    #[error("Descriptor framing is misaligned or out of bounds")]
    InvalidDescriptorFraming,
    #[error("Descriptor padding is too long or data was not consumed")]
    PaddingTooLong,
    #[error("Image is not signed")]
    NotSigned,
    #[error("Signature algorithm not supported: {0:?}")]
    UnsupportedAlgorithm(AlgorithmType),
    #[error("Image is missing the embedded public key")]
    MissingPublicKey,
    #[error("Digest does not match the authentication block hash")]
    HashMismatch,
    #[error("Failed to decode RSA public key")]
    InvalidPublicKey(#[source] rsa::Error),
    #[error("Failed to RSA verify signature")]
    RsaVerify(#[source] rsa::Error),
    #[error("RSA public key exponent not supported: {0}")]
    UnsupportedRsaPublicExponent(BigUint),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the cryptographic check itself failed, as opposed to the image
    /// being too malformed to evaluate.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::NotSigned | Self::HashMismatch | Self::RsaVerify(_)
        )
    }
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlgorithmType {
    None,
    Sha256Rsa2048,
    Sha256Rsa4096,
    Sha256Rsa8192,
    Sha512Rsa2048,
    Sha512Rsa4096,
    Sha512Rsa8192,
    Unknown(u32),
}

impl AlgorithmType {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Sha256Rsa2048,
            2 => Self::Sha256Rsa4096,
            3 => Self::Sha256Rsa8192,
            4 => Self::Sha512Rsa2048,
            5 => Self::Sha512Rsa4096,
            6 => Self::Sha512Rsa8192,
            v => Self::Unknown(v),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Sha256Rsa2048 => 1,
            Self::Sha256Rsa4096 => 2,
            Self::Sha256Rsa8192 => 3,
            Self::Sha512Rsa2048 => 4,
            Self::Sha512Rsa4096 => 5,
            Self::Sha512Rsa8192 => 6,
            Self::Unknown(v) => v,
        }
    }

    pub fn hash_len(self) -> usize {
        match self {
            Self::None | Self::Unknown(_) => 0,
            Self::Sha256Rsa2048 | Self::Sha256Rsa4096 | Self::Sha256Rsa8192 => {
                Sha256::output_size()
            }
            Self::Sha512Rsa2048 | Self::Sha512Rsa4096 | Self::Sha512Rsa8192 => {
                Sha512::output_size()
            }
        }
    }

    pub fn signature_len(self) -> usize {
        match self {
            Self::None | Self::Unknown(_) => 0,
            Self::Sha256Rsa2048 | Self::Sha512Rsa2048 => 256,
            Self::Sha256Rsa4096 | Self::Sha512Rsa4096 => 512,
            Self::Sha256Rsa8192 | Self::Sha512Rsa8192 => 1024,
        }
    }

    pub fn public_key_len(self) -> usize {
        match self {
            Self::None | Self::Unknown(_) => 0,
            Self::Sha256Rsa2048 | Self::Sha512Rsa2048 => 8 + 2 * 2048 / 8,
            Self::Sha256Rsa4096 | Self::Sha512Rsa4096 => 8 + 2 * 4096 / 8,
            Self::Sha256Rsa8192 | Self::Sha512Rsa8192 => 8 + 2 * 8192 / 8,
        }
    }

    /// Digest the concatenation of `parts`.
    pub fn hash_parts(self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::None | Self::Unknown(_) => vec![],
            Self::Sha256Rsa2048 | Self::Sha256Rsa4096 | Self::Sha256Rsa8192 => {
                let mut hasher = Sha256::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize().to_vec()
            }
            Self::Sha512Rsa2048 | Self::Sha512Rsa4096 | Self::Sha512Rsa8192 => {
                let mut hasher = Sha512::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize().to_vec()
            }
        }
    }

    pub fn verify(self, key: &RsaPublicKey, digest: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            Self::None | Self::Unknown(_) => {}
            Self::Sha256Rsa2048 | Self::Sha256Rsa4096 | Self::Sha256Rsa8192 => {
                let scheme = Pkcs1v15Sign::new::<Sha256>();
                key.verify(scheme, digest, signature)
                    .map_err(Error::RsaVerify)?;
            }
            Self::Sha512Rsa2048 | Self::Sha512Rsa4096 | Self::Sha512Rsa8192 => {
                let scheme = Pkcs1v15Sign::new::<Sha512>();
                key.verify(scheme, digest, signature)
                    .map_err(Error::RsaVerify)?;
            }
        }

        Ok(())
    }
}

bitflags! {
    /// Flag word in the vbmeta header. Only the top-level image may carry a
    /// non-zero value.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct HeaderFlags: u32 {
        const HASHTREE_DISABLED = 1 << 0;
        const VERIFICATION_DISABLED = 1 << 1;
    }
}

/// The fixed portion of a vbmeta image, in host byte order. The
/// authentication and auxiliary blocks immediately follow it on disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub required_libavb_version_major: u32,
    pub required_libavb_version_minor: u32,
    pub authentication_data_block_size: u64,
    pub auxiliary_data_block_size: u64,
    pub algorithm_type: AlgorithmType,
    pub hash_offset: u64,
    pub hash_size: u64,
    pub signature_offset: u64,
    pub signature_size: u64,
    pub public_key_offset: u64,
    pub public_key_size: u64,
    pub public_key_metadata_offset: u64,
    pub public_key_metadata_size: u64,
    pub descriptors_offset: u64,
    pub descriptors_size: u64,
    pub rollback_index: u64,
    pub flags: HeaderFlags,
    pub rollback_index_location: u32,
    pub release_string: String,
}

impl Header {
    pub const SIZE: usize = 256;

    /// Effective size of the image: header plus the two declared blocks.
    pub fn total_size(&self) -> Option<u64> {
        (Self::SIZE as u64)
            .checked_add(self.authentication_data_block_size)?
            .checked_add(self.auxiliary_data_block_size)
    }
}

impl<R: Read> FromReader<R> for Header {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let magic = reader.read_array_exact::<4>()?;
        if magic != HEADER_MAGIC {
            return Err(Error::InvalidHeaderMagic(magic));
        }

        let required_libavb_version_major = reader.read_u32::<BigEndian>()?;
        let required_libavb_version_minor = reader.read_u32::<BigEndian>()?;
        let authentication_data_block_size = reader.read_u64::<BigEndian>()?;
        let auxiliary_data_block_size = reader.read_u64::<BigEndian>()?;
        let algorithm_type = AlgorithmType::from_raw(reader.read_u32::<BigEndian>()?);
        let hash_offset = reader.read_u64::<BigEndian>()?;
        let hash_size = reader.read_u64::<BigEndian>()?;
        let signature_offset = reader.read_u64::<BigEndian>()?;
        let signature_size = reader.read_u64::<BigEndian>()?;
        let public_key_offset = reader.read_u64::<BigEndian>()?;
        let public_key_size = reader.read_u64::<BigEndian>()?;
        let public_key_metadata_offset = reader.read_u64::<BigEndian>()?;
        let public_key_metadata_size = reader.read_u64::<BigEndian>()?;
        let descriptors_offset = reader.read_u64::<BigEndian>()?;
        let descriptors_size = reader.read_u64::<BigEndian>()?;
        let rollback_index = reader.read_u64::<BigEndian>()?;
        let flags = HeaderFlags::from_bits_retain(reader.read_u32::<BigEndian>()?);
        let rollback_index_location = reader.read_u32::<BigEndian>()?;

        // Unlike the other string fields, garbage here must not make the
        // image unparseable.
        let release_raw = reader.read_array_exact::<48>()?;
        let release_len = release_raw
            .iter()
            .rposition(|b| *b != 0)
            .map(|pos| pos + 1)
            .unwrap_or_default();
        let release_string = String::from_utf8_lossy(&release_raw[..release_len]).into_owned();

        reader.read_discard_exact(80)?;

        Ok(Self {
            required_libavb_version_major,
            required_libavb_version_minor,
            authentication_data_block_size,
            auxiliary_data_block_size,
            algorithm_type,
            hash_offset,
            hash_size,
            signature_offset,
            signature_size,
            public_key_offset,
            public_key_size,
            public_key_metadata_offset,
            public_key_metadata_size,
            descriptors_offset,
            descriptors_size,
            rollback_index,
            flags,
            rollback_index_location,
            release_string,
        })
    }
}

/// Fixed-size structure at the very end of a non-vbmeta partition, pointing
/// at the vbmeta blob appended to the partition data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Footer {
    pub version_major: u32,
    pub version_minor: u32,
    pub original_image_size: u64,
    pub vbmeta_offset: u64,
    pub vbmeta_size: u64,
}

impl Footer {
    pub const SIZE: usize = 64;
}

impl<R: Read> FromReader<R> for Footer {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let magic = reader.read_array_exact::<4>()?;
        if magic != FOOTER_MAGIC {
            return Err(Error::InvalidFooterMagic(magic));
        }

        let version_major = reader.read_u32::<BigEndian>()?;
        let version_minor = reader.read_u32::<BigEndian>()?;
        let original_image_size = reader.read_u64::<BigEndian>()?;
        let vbmeta_offset = reader.read_u64::<BigEndian>()?;
        let vbmeta_size = reader.read_u64::<BigEndian>()?;

        reader.read_discard_exact(28)?;

        Ok(Self {
            version_major,
            version_minor,
            original_image_size,
            vbmeta_offset,
            vbmeta_size,
        })
    }
}

#[derive(Clone, Eq, PartialEq)]
pub struct HashTreeDescriptor {
    pub dm_verity_version: u32,
    pub image_size: u64,
    pub tree_offset: u64,
    pub tree_size: u64,
    pub data_block_size: u32,
    pub hash_block_size: u32,
    pub fec_num_roots: u32,
    pub fec_offset: u64,
    pub fec_size: u64,
    pub hash_algorithm: String,
    pub partition_name: String,
    pub salt: Vec<u8>,
    pub root_digest: Vec<u8>,
    pub flags: u32,
}

impl fmt::Debug for HashTreeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTreeDescriptor")
            .field("dm_verity_version", &self.dm_verity_version)
            .field("image_size", &self.image_size)
            .field("tree_offset", &self.tree_offset)
            .field("tree_size", &self.tree_size)
            .field("data_block_size", &self.data_block_size)
            .field("hash_block_size", &self.hash_block_size)
            .field("fec_num_roots", &self.fec_num_roots)
            .field("fec_offset", &self.fec_offset)
            .field("fec_size", &self.fec_size)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("partition_name", &self.partition_name)
            .field("salt", &hex::encode(&self.salt))
            .field("root_digest", &hex::encode(&self.root_digest))
            .field("flags", &self.flags)
            .finish()
    }
}

impl<R: Read> FromReader<R> for HashTreeDescriptor {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let dm_verity_version = reader.read_u32::<BigEndian>()?;
        let image_size = reader.read_u64::<BigEndian>()?;
        let tree_offset = reader.read_u64::<BigEndian>()?;
        let tree_size = reader.read_u64::<BigEndian>()?;
        let data_block_size = reader.read_u32::<BigEndian>()?;
        let hash_block_size = reader.read_u32::<BigEndian>()?;
        let fec_num_roots = reader.read_u32::<BigEndian>()?;
        let fec_offset = reader.read_u64::<BigEndian>()?;
        let fec_size = reader.read_u64::<BigEndian>()?;

        let hash_algorithm = reader
            .read_string_padded(32)
            .map_err(|e| Error::ReadFieldError("hash_algorithm", e))?;
        if !hash_algorithm.is_ascii() {
            return Err(Error::StringNotAscii("hash_algorithm", hash_algorithm));
        }

        let partition_name_len = reader.read_u32::<BigEndian>()?;
        let salt_len = reader.read_u32::<BigEndian>()?;
        let root_digest_len = reader.read_u32::<BigEndian>()?;
        let flags = reader.read_u32::<BigEndian>()?;

        reader.read_discard_exact(60)?;

        // Not NULL-terminated; the length comes from the field above.
        let partition_name = reader
            .read_string_exact(
                partition_name_len
                    .to_usize()
                    .ok_or(Error::IntegerTooLarge("partition_name_len"))?,
            )
            .map_err(|e| Error::ReadFieldError("partition_name", e))?;

        let salt = reader.read_vec_exact(
            salt_len
                .to_usize()
                .ok_or(Error::IntegerTooLarge("salt_len"))?,
        )?;

        let root_digest = reader.read_vec_exact(
            root_digest_len
                .to_usize()
                .ok_or(Error::IntegerTooLarge("root_digest_len"))?,
        )?;

        Ok(Self {
            dm_verity_version,
            image_size,
            tree_offset,
            tree_size,
            data_block_size,
            hash_block_size,
            fec_num_roots,
            fec_offset,
            fec_size,
            hash_algorithm,
            partition_name,
            salt,
            root_digest,
            flags,
        })
    }
}

#[derive(Clone, Eq, PartialEq)]
pub struct ChainPartitionDescriptor {
    pub rollback_index_location: u32,
    pub partition_name: String,
    pub public_key: Vec<u8>,
}

impl fmt::Debug for ChainPartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainPartitionDescriptor")
            .field("rollback_index_location", &self.rollback_index_location)
            .field("partition_name", &self.partition_name)
            .field("public_key", &hex::encode(&self.public_key))
            .finish()
    }
}

impl<R: Read> FromReader<R> for ChainPartitionDescriptor {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let rollback_index_location = reader.read_u32::<BigEndian>()?;
        let partition_name_len = reader.read_u32::<BigEndian>()?;
        let public_key_len = reader.read_u32::<BigEndian>()?;

        reader.read_discard_exact(64)?;

        // Not NULL-terminated.
        let partition_name = reader
            .read_string_exact(
                partition_name_len
                    .to_usize()
                    .ok_or(Error::IntegerTooLarge("partition_name_len"))?,
            )
            .map_err(|e| Error::ReadFieldError("partition_name", e))?;

        let public_key = reader.read_vec_exact(
            public_key_len
                .to_usize()
                .ok_or(Error::IntegerTooLarge("public_key_len"))?,
        )?;

        Ok(Self {
            rollback_index_location,
            partition_name,
            public_key,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Descriptor {
    HashTree(HashTreeDescriptor),
    ChainPartition(ChainPartitionDescriptor),
    /// Any other tag. The payload is skipped, not interpreted.
    Unknown(u64),
}

impl Descriptor {
    pub fn partition_name(&self) -> Option<&str> {
        match self {
            Self::HashTree(d) => Some(&d.partition_name),
            Self::ChainPartition(d) => Some(&d.partition_name),
            Self::Unknown(_) => None,
        }
    }
}

/// Lazily frame and parse descriptors out of the descriptor region of a
/// vbmeta image. Each item is validated independently so that the caller can
/// choose whether a malformed entry is skippable or fatal. A frame that
/// cannot be advanced past fuses the iterator.
pub struct DescriptorIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DescriptorIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl Iterator for DescriptorIter<'_> {
    type Item = Result<Descriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let remaining = &self.data[self.pos..];
        let Some((tag, nbf)) = read_descriptor_frame(remaining) else {
            self.pos = self.data.len();
            return Some(Err(Error::InvalidDescriptorFraming));
        };

        let Some(nbf) = nbf.to_usize() else {
            self.pos = self.data.len();
            return Some(Err(Error::IntegerTooLarge("num_bytes_following")));
        };

        // The tag/length prefix is 16 bytes, so the payload length carries
        // the 8-byte alignment of the whole frame.
        if nbf % 8 != 0 || nbf > remaining.len() - 16 {
            self.pos = self.data.len();
            return Some(Err(Error::InvalidDescriptorFraming));
        }

        let payload = &remaining[16..16 + nbf];
        self.pos += 16 + nbf;

        let mut reader = CountingReader::new(payload);

        let descriptor = match tag {
            TAG_HASH_TREE => HashTreeDescriptor::from_reader(&mut reader).map(Descriptor::HashTree),
            TAG_CHAIN_PARTITION => {
                ChainPartitionDescriptor::from_reader(&mut reader).map(Descriptor::ChainPartition)
            }
            _ => return Some(Ok(Descriptor::Unknown(tag))),
        };

        match descriptor {
            Ok(d) => {
                // Only zero padding up to the 8-byte boundary may remain.
                if nbf as u64 - reader.count() >= 8 {
                    Some(Err(Error::PaddingTooLong))
                } else {
                    Some(Ok(d))
                }
            }
            Err(e) => Some(Err(e)),
        }
    }
}

fn read_descriptor_frame(data: &[u8]) -> Option<(u64, u64)> {
    if data.len() < 16 {
        return None;
    }

    let tag = u64::from_be_bytes(data[..8].try_into().ok()?);
    let nbf = u64::from_be_bytes(data[8..16].try_into().ok()?);

    Some((tag, nbf))
}

/// Verify the signature of a raw vbmeta image against the public key embedded
/// in its auxiliary block and return that key blob. This is the hot path for
/// untrusted data: every offset is bounds-checked before use and the
/// descriptors are not touched.
pub fn verify_image(data: &[u8]) -> Result<&[u8]> {
    let header = Header::from_reader(Cursor::new(data))?;

    if header.required_libavb_version_major != VERSION_MAJOR
        || header.required_libavb_version_minor > VERSION_MINOR
    {
        return Err(Error::UnsupportedVersion {
            major: header.required_libavb_version_major,
            minor: header.required_libavb_version_minor,
        });
    }

    let total_size = header
        .total_size()
        .ok_or(Error::IntegerTooLarge("total_size"))?;
    if (data.len() as u64) < total_size {
        return Err(Error::TruncatedImage {
            expected: total_size,
            actual: data.len(),
        });
    }

    let auth_size = header
        .authentication_data_block_size
        .to_usize()
        .ok_or(Error::IntegerTooLarge("authentication_data_block_size"))?;
    let auth_block = &data[Header::SIZE..Header::SIZE + auth_size];
    let aux_block = &data[Header::SIZE + auth_size..total_size as usize];

    match header.algorithm_type {
        AlgorithmType::None => return Err(Error::NotSigned),
        a @ AlgorithmType::Unknown(_) => return Err(Error::UnsupportedAlgorithm(a)),
        _ => {}
    }

    let hash = checked_slice(auth_block, header.hash_offset, header.hash_size, "hash")?;
    let signature = checked_slice(
        auth_block,
        header.signature_offset,
        header.signature_size,
        "signature",
    )?;
    let public_key = checked_slice(
        aux_block,
        header.public_key_offset,
        header.public_key_size,
        "public_key",
    )?;
    if public_key.is_empty() {
        return Err(Error::MissingPublicKey);
    }

    // The authenticated data is the header itself plus the auxiliary block;
    // the authentication block carries the digest and signature over it.
    let digest = header
        .algorithm_type
        .hash_parts(&[&data[..Header::SIZE], aux_block]);
    if digest != hash {
        return Err(Error::HashMismatch);
    }

    let key = decode_public_key(public_key)?;
    header.algorithm_type.verify(&key, &digest, signature)?;

    Ok(public_key)
}

fn checked_slice<'a>(
    block: &'a [u8],
    offset: u64,
    size: u64,
    field: &'static str,
) -> Result<&'a [u8]> {
    let offset = offset.to_usize().ok_or(Error::IntegerTooLarge(field))?;
    let size = size.to_usize().ok_or(Error::IntegerTooLarge(field))?;
    let end = offset
        .checked_add(size)
        .ok_or(Error::IntegerTooLarge(field))?;

    if end > block.len() {
        return Err(Error::FieldOutOfBounds(field));
    }

    Ok(&block[offset..end])
}

/// Encode a public key in the AVB binary format.
pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>> {
    if key.e() != &BigUint::from(65537u32) {
        return Err(Error::UnsupportedRsaPublicExponent(key.e().clone()));
    }

    // libavb expects certain values to be precomputed so that the bootloader's
    // verification operations can run faster.
    //
    // Values:
    //   n0inv = -1 / n[0] (mod 2 ^ 32)
    //     - Guaranteed to fit in a u32
    //   r = 2 ^ (key size in bits)
    //   rr = r^2 (mod N)
    //     - Guaranteed to fit in key size bits

    let b = BigUint::from(2u64.pow(32));
    let n0inv = b.to_bigint().unwrap() - key.n().mod_inverse(&b).unwrap();
    let r = BigUint::from(2u32).pow(key.n().bits());
    let rrmodn = r.modpow(&BigUint::from(2u32), key.n());

    let key_bits = (key.size() * 8).to_u32().unwrap();

    let mut data = vec![];
    data.extend_from_slice(&key_bits.to_be_bytes());
    data.extend_from_slice(&n0inv.to_u32().unwrap().to_be_bytes());

    let modulus_raw = key.n().to_bytes_be();
    data.resize(data.len() + key.size() - modulus_raw.len(), 0);
    data.extend_from_slice(&modulus_raw);

    let rrmodn_raw = rrmodn.to_bytes_be();
    data.resize(data.len() + key.size() - rrmodn_raw.len(), 0);
    data.extend_from_slice(&rrmodn_raw);

    Ok(data)
}

/// Decode a public key from the AVB binary format.
pub fn decode_public_key(data: &[u8]) -> Result<RsaPublicKey> {
    let mut reader = Cursor::new(data);
    let key_bits = reader
        .read_u32::<BigEndian>()?
        .to_usize()
        .ok_or(Error::IntegerTooLarge("key_bits"))?;

    // The blob is the bit count, n0inv, the modulus, and rr, in that order.
    let modulus_len = key_bits / 8;
    if data.len() != 8 + 2 * modulus_len {
        return Err(Error::FieldOutOfBounds("public_key"));
    }

    // Skip n0inv.
    reader.read_discard_exact(4)?;

    let modulus_raw = reader.read_vec_exact(modulus_len)?;

    let modulus = BigUint::from_bytes_be(&modulus_raw);
    let public_key =
        RsaPublicKey::new(modulus, BigUint::from(65537u32)).map_err(Error::InvalidPublicKey)?;

    Ok(public_key)
}
