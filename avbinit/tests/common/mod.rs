// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Assembles signed vbmeta images on disk, standing in for what avbtool
//! produces at build time.

use std::{fs, path::Path};

use byteorder::{BigEndian, WriteBytesExt};
use pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};

use avbinit::format::avb::{
    encode_public_key, Footer, Header, FOOTER_MAGIC, HEADER_MAGIC, TAG_CHAIN_PARTITION,
    TAG_HASH_TREE,
};

pub const IMAGE_SIZE: u64 = 40960;
pub const BLOCK_SIZE: u32 = 4096;

const PARTITION_SIZE: usize = 64 * 1024;
const VBMETA_OFFSET: usize = 8192;

pub fn test_key() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(include_str!("../data/testkey_rsa2048.pem")).unwrap()
}

pub fn other_key() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(include_str!("../data/testkey2_rsa2048.pem")).unwrap()
}

pub fn public_key_blob(key: &RsaPrivateKey) -> Vec<u8> {
    encode_public_key(&key.to_public_key()).unwrap()
}

fn framed(tag: u64, payload: &[u8]) -> Vec<u8> {
    let padding = (8 - payload.len() % 8) % 8;

    let mut data = Vec::new();
    data.write_u64::<BigEndian>(tag).unwrap();
    data.write_u64::<BigEndian>((payload.len() + padding) as u64)
        .unwrap();
    data.extend_from_slice(payload);
    data.resize(data.len() + padding, 0);
    data
}

/// Hashtree descriptor with a small fixed geometry.
pub fn hashtree_descriptor(partition_name: &str) -> Vec<u8> {
    let salt = [0xaau8; 8];
    let root_digest = [0x5au8; 32];

    let mut payload = Vec::new();
    payload.write_u32::<BigEndian>(1).unwrap(); // dm_verity_version
    payload.write_u64::<BigEndian>(IMAGE_SIZE).unwrap();
    payload.write_u64::<BigEndian>(IMAGE_SIZE).unwrap(); // tree_offset
    payload.write_u64::<BigEndian>(4096).unwrap(); // tree_size
    payload.write_u32::<BigEndian>(BLOCK_SIZE).unwrap();
    payload.write_u32::<BigEndian>(BLOCK_SIZE).unwrap();
    payload.write_u32::<BigEndian>(0).unwrap(); // fec_num_roots
    payload.write_u64::<BigEndian>(0).unwrap(); // fec_offset
    payload.write_u64::<BigEndian>(0).unwrap(); // fec_size

    let mut hash_algorithm = b"sha256".to_vec();
    hash_algorithm.resize(32, 0);
    payload.extend_from_slice(&hash_algorithm);

    payload
        .write_u32::<BigEndian>(partition_name.len() as u32)
        .unwrap();
    payload.write_u32::<BigEndian>(salt.len() as u32).unwrap();
    payload
        .write_u32::<BigEndian>(root_digest.len() as u32)
        .unwrap();
    payload.write_u32::<BigEndian>(0).unwrap(); // flags
    payload.resize(payload.len() + 60, 0); // reserved

    payload.extend_from_slice(partition_name.as_bytes());
    payload.extend_from_slice(&salt);
    payload.extend_from_slice(&root_digest);

    framed(TAG_HASH_TREE, &payload)
}

pub fn chain_descriptor(partition_name: &str, public_key: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.write_u32::<BigEndian>(1).unwrap(); // rollback_index_location
    payload
        .write_u32::<BigEndian>(partition_name.len() as u32)
        .unwrap();
    payload
        .write_u32::<BigEndian>(public_key.len() as u32)
        .unwrap();
    payload.resize(payload.len() + 64, 0); // reserved

    payload.extend_from_slice(partition_name.as_bytes());
    payload.extend_from_slice(public_key);

    framed(TAG_CHAIN_PARTITION, &payload)
}

fn align64(size: usize) -> usize {
    (size + 63) & !63
}

/// Serialize and sign a complete vbmeta image (SHA256_RSA2048).
pub fn make_vbmeta_image(
    key: &RsaPrivateKey,
    flags: u32,
    rollback_index: u64,
    descriptors: &[Vec<u8>],
) -> Vec<u8> {
    let descriptors_raw = descriptors.concat();
    let public_key = public_key_blob(key);

    let hash_size = 32u64;
    let signature_size = 256u64;
    let auth_block_size = align64((hash_size + signature_size) as usize);
    let aux_block_size = align64(descriptors_raw.len() + public_key.len());

    let mut header = Vec::new();
    header.extend_from_slice(&HEADER_MAGIC);
    header.write_u32::<BigEndian>(1).unwrap(); // required libavb major
    header.write_u32::<BigEndian>(0).unwrap(); // required libavb minor
    header.write_u64::<BigEndian>(auth_block_size as u64).unwrap();
    header.write_u64::<BigEndian>(aux_block_size as u64).unwrap();
    header.write_u32::<BigEndian>(1).unwrap(); // SHA256_RSA2048
    header.write_u64::<BigEndian>(0).unwrap(); // hash_offset
    header.write_u64::<BigEndian>(hash_size).unwrap();
    header.write_u64::<BigEndian>(hash_size).unwrap(); // signature_offset
    header.write_u64::<BigEndian>(signature_size).unwrap();
    header
        .write_u64::<BigEndian>(descriptors_raw.len() as u64)
        .unwrap(); // public_key_offset
    header
        .write_u64::<BigEndian>(public_key.len() as u64)
        .unwrap();
    header
        .write_u64::<BigEndian>((descriptors_raw.len() + public_key.len()) as u64)
        .unwrap(); // public_key_metadata_offset
    header.write_u64::<BigEndian>(0).unwrap(); // public_key_metadata_size
    header.write_u64::<BigEndian>(0).unwrap(); // descriptors_offset
    header
        .write_u64::<BigEndian>(descriptors_raw.len() as u64)
        .unwrap();
    header.write_u64::<BigEndian>(rollback_index).unwrap();
    header.write_u32::<BigEndian>(flags).unwrap();
    header.write_u32::<BigEndian>(0).unwrap(); // rollback_index_location

    let mut release_string = b"avbtool 1.3.0".to_vec();
    release_string.resize(48, 0);
    header.extend_from_slice(&release_string);

    header.resize(header.len() + 80, 0); // reserved
    assert_eq!(header.len(), Header::SIZE);

    let mut aux_block = descriptors_raw;
    aux_block.extend_from_slice(&public_key);
    aux_block.resize(aux_block_size, 0);

    let mut hasher = Sha256::new();
    hasher.update(&header);
    hasher.update(&aux_block);
    let digest = hasher.finalize().to_vec();

    let signature = key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();

    let mut image = header;
    image.extend_from_slice(&digest);
    image.extend_from_slice(&signature);
    image.resize(Header::SIZE + auth_block_size, 0);
    image.extend_from_slice(&aux_block);
    image
}

/// Flip a byte of the stored digest so signature verification fails while
/// the structure stays intact.
pub fn corrupt_signature(vbmeta: &mut [u8]) {
    vbmeta[Header::SIZE] ^= 0xff;
}

/// Write a raw vbmeta partition image (blob at offset zero, file may be
/// shorter than the maximum vbmeta size).
pub fn write_vbmeta_partition(path: &Path, vbmeta: &[u8]) {
    fs::write(path, vbmeta).unwrap();
}

/// Write a partition image whose vbmeta blob is appended after the data,
/// located by an AVB footer in the last bytes of the partition.
pub fn write_appended_partition(path: &Path, vbmeta: &[u8]) {
    write_appended_partition_with_footer(path, vbmeta, vbmeta.len() as u64);
}

/// Same, but with an arbitrary declared vbmeta size in the footer.
pub fn write_appended_partition_with_footer(path: &Path, vbmeta: &[u8], declared_size: u64) {
    let mut image = vec![0u8; PARTITION_SIZE];
    image[VBMETA_OFFSET..VBMETA_OFFSET + vbmeta.len()].copy_from_slice(vbmeta);

    let mut footer = Vec::new();
    footer.extend_from_slice(&FOOTER_MAGIC);
    footer.write_u32::<BigEndian>(1).unwrap();
    footer.write_u32::<BigEndian>(0).unwrap();
    footer.write_u64::<BigEndian>(VBMETA_OFFSET as u64).unwrap(); // original_image_size
    footer.write_u64::<BigEndian>(VBMETA_OFFSET as u64).unwrap(); // vbmeta_offset
    footer.write_u64::<BigEndian>(declared_size).unwrap();
    footer.resize(Footer::SIZE, 0);

    image[PARTITION_SIZE - Footer::SIZE..].copy_from_slice(&footer);

    fs::write(path, image).unwrap();
}
