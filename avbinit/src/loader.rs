// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Top-level vbmeta loading: resolve each partition to a device node, read
//! and verify the blob, then walk chain descriptors depth-first so that every
//! reachable image ends up in the returned set.

use std::{
    fs::File,
    path::PathBuf,
    time::Duration,
};

use tracing::{error, warn};

use crate::blockdev;
use crate::format::avb::{HeaderFlags, MAX_VBMETA_SIZE};
use crate::vbmeta::{self, VbmetaImage, VerifyResult};

const DEVICE_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Builds the path of the device node for a resolved partition name. Pure;
/// the loader does the waiting.
pub type DevicePathFn<'a> = dyn Fn(&str) -> PathBuf + 'a;

/// Reports whether a stored rollback index is newer than the image's,
/// i.e. whether loading the image would be a downgrade.
pub type RollbackFn<'a> = dyn Fn(&str, u64) -> bool + 'a;

/// Rollback oracle that accepts every image. Persistent rollback-index
/// storage plugs in behind [`RollbackFn`] once it exists.
pub fn no_rollback_protection(_partition_name: &str, _rollback_index: u64) -> bool {
    false
}

/// Map an AVB partition name to the on-disk partition for the current slot:
/// `system` becomes `system` + `ab_suffix`, while `system_other` drops the
/// marker and takes `ab_other_suffix`. Both suffixes are empty on non-A/B
/// devices, yielding the bare name.
pub fn avb_partition_to_device_partition(
    partition_name: &str,
    ab_suffix: &str,
    ab_other_suffix: &str,
) -> String {
    match partition_name.strip_suffix("_other") {
        Some(base) => format!("{base}{ab_other_suffix}"),
        None => format!("{partition_name}{ab_suffix}"),
    }
}

/// Load and verify the vbmeta image of `partition_name` and, when
/// `load_chained` is set, every image reachable through chain descriptors.
/// Returns the worst verification status encountered along with all images
/// that were verified before the walk stopped (the set may be partial when
/// the status is [`VerifyResult::Error`]).
///
/// An empty `expected_public_key` leaves the top-level signing key
/// unconstrained. With `allow_verification_error` unset, any
/// [`VerifyResult::ErrorVerification`] is promoted to [`VerifyResult::Error`]
/// so that production boots fail closed.
#[allow(clippy::too_many_arguments)]
pub fn load_and_verify_vbmeta(
    partition_name: &str,
    ab_suffix: &str,
    ab_other_suffix: &str,
    expected_public_key: &[u8],
    allow_verification_error: bool,
    load_chained: bool,
    rollback_protection: bool,
    device_path: &DevicePathFn<'_>,
    rollback_detected: &RollbackFn<'_>,
) -> (VerifyResult, Vec<VbmetaImage>) {
    let mut images = Vec::new();

    let result = load_and_verify_impl(
        partition_name,
        ab_suffix,
        ab_other_suffix,
        expected_public_key,
        allow_verification_error,
        load_chained,
        rollback_protection,
        device_path,
        rollback_detected,
        false,
        &mut images,
    );

    (result, images)
}

#[allow(clippy::too_many_arguments)]
fn load_and_verify_impl(
    partition_name: &str,
    ab_suffix: &str,
    ab_other_suffix: &str,
    expected_public_key: &[u8],
    allow_verification_error: bool,
    load_chained: bool,
    rollback_protection: bool,
    device_path: &DevicePathFn<'_>,
    rollback_detected: &RollbackFn<'_>,
    is_chained_vbmeta: bool,
    images: &mut Vec<VbmetaImage>,
) -> VerifyResult {
    let device_partition =
        avb_partition_to_device_partition(partition_name, ab_suffix, ab_other_suffix);

    // The path might be a symlink that init has not created yet.
    let path = device_path(&device_partition);
    if !blockdev::wait_for_file(&path, DEVICE_WAIT_TIMEOUT) {
        error!("No such partition: {path:?}");
        return VerifyResult::Error;
    }

    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            error!("Failed to open {path:?}: {e}");
            return VerifyResult::Error;
        }
    };

    let Some(mut image) = read_vbmeta_image(&file, partition_name) else {
        return VerifyResult::Error;
    };

    let mut verify_result = image.verify(expected_public_key);
    if verify_result == VerifyResult::Error {
        error!("{partition_name}: Failed to load vbmeta, result: {verify_result}");
        return VerifyResult::Error;
    }

    if !allow_verification_error && verify_result == VerifyResult::ErrorVerification {
        error!("{partition_name}: Verification errors are not allowed");
        return VerifyResult::Error;
    }

    let header = match image.header() {
        Ok(h) => h,
        Err(e) => {
            error!("{partition_name}: Failed to get vbmeta header: {e}");
            return VerifyResult::Error;
        }
    };
    image.update_size(&header);

    if rollback_protection && rollback_detected(partition_name, header.rollback_index) {
        error!("{partition_name}: Rollback detected");
        return VerifyResult::Error;
    }

    // vbmeta flags can only be set by the top-level vbmeta image.
    if is_chained_vbmeta && !header.flags.is_empty() {
        error!("{partition_name}: chained vbmeta image has non-zero flags");
        return VerifyResult::Error;
    }

    let verification_disabled = header.flags.contains(HeaderFlags::VERIFICATION_DISABLED);

    let chains = if load_chained && !verification_disabled {
        vbmeta::chain_partitions(&image)
    } else {
        Ok(Vec::new())
    };

    images.push(image);

    // If verification has been disabled by setting a bit in the image, we're
    // done; chains are not evaluated.
    if verification_disabled {
        warn!("VERIFICATION_DISABLED bit is set for partition: {partition_name}");
        return verify_result;
    }

    let chains = match chains {
        Ok(chains) => chains,
        Err(e) => {
            error!("{partition_name}: Invalid chain partition descriptor: {e}");
            return VerifyResult::Error;
        }
    };

    for chain in chains {
        let sub_result = load_and_verify_impl(
            &chain.partition_name,
            ab_suffix,
            ab_other_suffix,
            &chain.public_key,
            allow_verification_error,
            load_chained,
            rollback_protection,
            device_path,
            rollback_detected,
            true,
            images,
        );

        if sub_result != VerifyResult::Success {
            verify_result = verify_result.worst(sub_result);
            if verify_result == VerifyResult::Error {
                return verify_result;
            }
        }
    }

    verify_result
}

/// Read the vbmeta blob of a partition. A `vbmeta*` partition holds the blob
/// at offset zero and may be shorter than [`MAX_VBMETA_SIZE`]; any other
/// partition carries an AVB footer pointing at a blob appended after the
/// filesystem data, which must be read in full.
fn read_vbmeta_image(file: &File, partition_name: &str) -> Option<VbmetaImage> {
    let is_vbmeta_partition = partition_name.starts_with("vbmeta");

    let (vbmeta_offset, vbmeta_size) = if is_vbmeta_partition {
        (0, MAX_VBMETA_SIZE)
    } else {
        let footer = match blockdev::read_footer(file) {
            Ok(f) => f,
            Err(e) => {
                error!("{partition_name}: Failed to read AVB footer: {e}");
                return None;
            }
        };

        (footer.vbmeta_offset, footer.vbmeta_size)
    };

    if vbmeta_size > MAX_VBMETA_SIZE {
        error!("{partition_name}: vbmeta size in footer exceeds {MAX_VBMETA_SIZE} bytes");
        return None;
    }

    let mut data = vec![0u8; vbmeta_size as usize];

    if is_vbmeta_partition {
        match blockdev::read_at_most(file, &mut data, vbmeta_offset) {
            Ok(n) => data.truncate(n),
            Err(e) => {
                error!("{partition_name}: Failed to read vbmeta at offset {vbmeta_offset}: {e}");
                return None;
            }
        }
    } else if let Err(e) = blockdev::read_exact_at(file, &mut data, vbmeta_offset) {
        error!(
            "{partition_name}: Failed to read vbmeta at offset {vbmeta_offset} \
             with size {vbmeta_size}: {e}"
        );
        return None;
    }

    Some(VbmetaImage::new(partition_name, data))
}
