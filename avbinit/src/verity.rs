// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Translation of a verified hashtree descriptor into a device-mapper
//! "verity" target, plus the plumbing that realizes the target through an
//! injected device-mapper service. The table format is described in the
//! kernel's Documentation/device-mapper/verity.txt.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tracing::info;

use crate::blockdev;
use crate::bootconfig::BootConfig;
use crate::format::avb::HashTreeDescriptor;

const DM_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown androidboot.veritymode: {0:?}")]
    UnknownVerityMode(String),
    #[error("Hashtree descriptor has a zero block size")]
    ZeroBlockSize,
    #[error("Timed out waiting for verity device: {0:?}")]
    WaitTimedOut(PathBuf),
    #[error("Device-mapper operation failed")]
    DeviceMapper(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// What dm-verity does when a block fails verification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CorruptionPolicy {
    /// `restart_on_corruption`: reboot the device.
    Restart,
    /// `ignore_corruption`: log and hand out the data anyway.
    Ignore,
    /// Kernel default (fail the read with EIO); no parameter is emitted.
    Eio,
}

impl CorruptionPolicy {
    fn parameter(self) -> Option<&'static str> {
        match self {
            Self::Restart => Some("restart_on_corruption"),
            Self::Ignore => Some("ignore_corruption"),
            Self::Eio => None,
        }
    }
}

/// Forward-error-correction sub-target parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FecSpec {
    pub device: String,
    pub num_roots: u32,
    pub blocks: u64,
    pub start_block: u64,
}

/// One device-mapper "verity" target. Owns copies of every string it needs so
/// it can outlive the verified images it was derived from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerityTable {
    pub version: u32,
    pub data_device: String,
    pub hash_device: String,
    pub data_block_size: u32,
    pub hash_block_size: u32,
    pub num_data_blocks: u64,
    pub hash_start_block: u64,
    pub hash_algorithm: String,
    /// Hex-encoded root digest.
    pub root_digest: String,
    /// Hex-encoded salt, or `-` for an empty salt.
    pub salt: String,
    /// Length of the mapped device in 512-byte sectors.
    pub num_sectors: u64,
    pub corruption_policy: CorruptionPolicy,
    pub fec: Option<FecSpec>,
    pub ignore_zero_blocks: bool,
}

impl VerityTable {
    /// Render the target parameters in the kernel's table format:
    /// the positional fields followed by the optional-argument count and the
    /// optional arguments.
    pub fn parameter_string(&self) -> String {
        let mut optional = Vec::<String>::new();

        if let Some(fec) = &self.fec {
            optional.extend([
                "use_fec_from_device".to_owned(),
                fec.device.clone(),
                "fec_roots".to_owned(),
                fec.num_roots.to_string(),
                "fec_blocks".to_owned(),
                fec.blocks.to_string(),
                "fec_start_block".to_owned(),
                fec.start_block.to_string(),
            ]);
        }
        if let Some(mode) = self.corruption_policy.parameter() {
            optional.push(mode.to_owned());
        }
        if self.ignore_zero_blocks {
            optional.push("ignore_zero_blocks".to_owned());
        }

        let mut params = format!(
            "{} {} {} {} {} {} {} {} {} {}",
            self.version,
            self.data_device,
            self.hash_device,
            self.data_block_size,
            self.hash_block_size,
            self.num_data_blocks,
            self.hash_start_block,
            self.hash_algorithm,
            self.root_digest,
            self.salt,
        );

        if !optional.is_empty() {
            params.push(' ');
            params.push_str(&optional.len().to_string());
            for arg in &optional {
                params.push(' ');
                params.push_str(arg);
            }
        }

        params
    }
}

/// Operations the core consumes from the device-mapper service. Implemented
/// by the platform against `/dev/mapper/control`; kept narrow so the core can
/// stay ioctl-free.
pub trait DeviceMapper {
    /// Create a verity device named `name` backed by `table`.
    fn create_verity_device(&self, name: &str, table: &VerityTable) -> io::Result<()>;

    /// Device node path for a previously created device.
    fn device_path(&self, name: &str) -> io::Result<PathBuf>;

    /// Mark the underlying block device read-only.
    fn set_readonly(&self, blk_device: &Path) -> io::Result<()>;
}

/// Build the verity target for one partition from its hashtree descriptor and
/// the boot policy on the kernel command line. The same block device provides
/// both the data and the hash tree.
pub fn construct_verity_table(
    hashtree_desc: &HashTreeDescriptor,
    blk_device: &str,
    config: &BootConfig,
) -> Result<VerityTable> {
    // Defaults to enforcing when androidboot.veritymode is absent.
    let verity_mode = config.find("veritymode").unwrap_or("enforcing");
    let corruption_policy = match verity_mode {
        "enforcing" => CorruptionPolicy::Restart,
        "logging" => CorruptionPolicy::Ignore,
        "eio" => CorruptionPolicy::Eio,
        other => return Err(Error::UnknownVerityMode(other.to_owned())),
    };

    if hashtree_desc.data_block_size == 0 || hashtree_desc.hash_block_size == 0 {
        return Err(Error::ZeroBlockSize);
    }

    let salt = if hashtree_desc.salt.is_empty() {
        "-".to_owned()
    } else {
        hex::encode(&hashtree_desc.salt)
    };

    let fec = (hashtree_desc.fec_size > 0).then(|| FecSpec {
        device: blk_device.to_owned(),
        num_roots: hashtree_desc.fec_num_roots,
        blocks: hashtree_desc.fec_offset / u64::from(hashtree_desc.data_block_size),
        start_block: hashtree_desc.fec_offset / u64::from(hashtree_desc.data_block_size),
    });

    Ok(VerityTable {
        version: hashtree_desc.dm_verity_version,
        data_device: blk_device.to_owned(),
        hash_device: blk_device.to_owned(),
        data_block_size: hashtree_desc.data_block_size,
        hash_block_size: hashtree_desc.hash_block_size,
        num_data_blocks: hashtree_desc.image_size / u64::from(hashtree_desc.data_block_size),
        hash_start_block: hashtree_desc.tree_offset / u64::from(hashtree_desc.hash_block_size),
        hash_algorithm: hashtree_desc.hash_algorithm.clone(),
        root_digest: hex::encode(&hashtree_desc.root_digest),
        salt,
        num_sectors: hashtree_desc.image_size / 512,
        corruption_policy,
        fec,
        ignore_zero_blocks: true,
    })
}

/// Stack a verity device on top of a partition: build the table, realize it
/// under the basename of the mount point, mark the backing device read-only,
/// and rewrite `blk_device` to the device-mapper node that callers should
/// mount from now on.
pub fn setup_verity_device(
    dm: &dyn DeviceMapper,
    mount_point: &str,
    blk_device: &mut String,
    hashtree_desc: &HashTreeDescriptor,
    config: &BootConfig,
) -> Result<()> {
    let table = construct_verity_table(hashtree_desc, blk_device, config)?;
    info!("Built verity table: '{}'", table.parameter_string());

    let name = Path::new(mount_point)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| mount_point.to_owned());

    dm.create_verity_device(&name, &table)?;
    let dev_path = dm.device_path(&name)?;

    dm.set_readonly(Path::new(blk_device.as_str()))?;

    *blk_device = dev_path.to_string_lossy().into_owned();

    if !blockdev::wait_for_file(&dev_path, DM_WAIT_TIMEOUT) {
        return Err(Error::WaitTimedOut(dev_path));
    }

    Ok(())
}
