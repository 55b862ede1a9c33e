//! FAT BPB inference and default CHS geometry fill-in.
//!
//! A device's declared geometry arrives with `cylinders` overloaded to carry
//! the requested total size in bytes. This module fills in
//! whichever of `(bytes_per_sector, sectors_per_track, tracks_per_cylinder)`
//! the caller left at zero, first from the backend's boot sector if it looks
//! like a FAT BPB, then from fixed defaults by device class.

use crate::flags::DeviceClass;

/// BPB byte offsets (FAT12/16/32 share this prefix).
const BPB_BYTES_PER_SECTOR: usize = 11;
const BPB_SECTORS_PER_TRACK: usize = 24;
const BPB_NUMBER_OF_HEADS: usize = 26;

const SECTOR_SIZE_HDD: u32 = 512;
const SECTORS_PER_TRACK_HDD: u32 = 63;

const SECTOR_SIZE_CD: u32 = 2048;
const SECTORS_PER_TRACK_CD: u32 = 32;
const TRACKS_PER_CYLINDER_CD: u32 = 64;

/// Threshold above which a straight doubling search would overflow the
/// 128-track cap; past it tracks-per-cylinder jumps straight to 255.
const HDD_CYLINDER_OVERFLOW_THRESHOLD: u64 = 130_560;

/// The geometry fields a device carries, with `cylinders` still meaning
/// "total size in bytes" until [`finalize_cylinders`] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub cylinders: u64,
    pub tracks_per_cylinder: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
}

impl Geometry {
    /// `cylinders × tracks × sectors × bytes`, i.e. the size implied by a
    /// fully resolved (post-fill) geometry.
    pub fn total_bytes(self) -> u64 {
        self.cylinders
            * u64::from(self.tracks_per_cylinder)
            * u64::from(self.sectors_per_track)
            * u64::from(self.bytes_per_sector)
    }

    fn any_unset(self) -> bool {
        self.tracks_per_cylinder == 0 || self.sectors_per_track == 0 || self.bytes_per_sector == 0
    }
}

/// Geometry hints recovered from a FAT BPB, any of which may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct BpbHints {
    pub bytes_per_sector: Option<u32>,
    pub sectors_per_track: Option<u32>,
    pub heads: Option<u32>,
}

/// Parses the first 512 bytes of a backend as a FAT BPB, applying the
/// sanity checks: bytes-per-sector nonzero and a power of two, sectors-per-
/// track below 64, heads below 256. Returns `None` if the sector doesn't
/// look like a BPB at all.
pub fn infer_from_bpb(sector0: &[u8]) -> Option<BpbHints> {
    if sector0.len() < BPB_NUMBER_OF_HEADS + 2 {
        return None;
    }

    let bytes_per_sector = u16::from_le_bytes([
        sector0[BPB_BYTES_PER_SECTOR],
        sector0[BPB_BYTES_PER_SECTOR + 1],
    ]) as u32;
    let sectors_per_track = u16::from_le_bytes([
        sector0[BPB_SECTORS_PER_TRACK],
        sector0[BPB_SECTORS_PER_TRACK + 1],
    ]) as u32;
    let heads = u16::from_le_bytes([
        sector0[BPB_NUMBER_OF_HEADS],
        sector0[BPB_NUMBER_OF_HEADS + 1],
    ]) as u32;

    if bytes_per_sector == 0 || !bytes_per_sector.is_power_of_two() {
        return None;
    }
    if sectors_per_track >= 64 {
        return None;
    }
    if heads >= 256 {
        return None;
    }

    Some(BpbHints {
        bytes_per_sector: Some(bytes_per_sector),
        sectors_per_track: if sectors_per_track == 0 {
            None
        } else {
            Some(sectors_per_track)
        },
        heads: if heads == 0 { None } else { Some(heads) },
    })
}

/// One entry of the common-floppy-size table: total image size in bytes
/// mapped to its canonical CHS geometry. Deliberately small — the
/// exhaustive format table lives with the licensed floppy-emulation
/// component and is out of scope here.
const FLOPPY_SIZES: &[(u64, Geometry)] = &[
    (
        163_840,
        Geometry {
            cylinders: 40,
            tracks_per_cylinder: 1,
            sectors_per_track: 8,
            bytes_per_sector: 512,
        },
    ),
    (
        368_640,
        Geometry {
            cylinders: 40,
            tracks_per_cylinder: 2,
            sectors_per_track: 9,
            bytes_per_sector: 512,
        },
    ),
    (
        737_280,
        Geometry {
            cylinders: 80,
            tracks_per_cylinder: 2,
            sectors_per_track: 9,
            bytes_per_sector: 512,
        },
    ),
    (
        1_228_800,
        Geometry {
            cylinders: 80,
            tracks_per_cylinder: 2,
            sectors_per_track: 15,
            bytes_per_sector: 512,
        },
    ),
    (
        1_474_560,
        Geometry {
            cylinders: 80,
            tracks_per_cylinder: 2,
            sectors_per_track: 18,
            bytes_per_sector: 512,
        },
    ),
    (
        2_949_120,
        Geometry {
            cylinders: 80,
            tracks_per_cylinder: 2,
            sectors_per_track: 36,
            bytes_per_sector: 512,
        },
    ),
];

/// Looks up a common floppy size. Only consulted when device class is still
/// unresolved at this point.
pub fn floppy_geometry_for_size(total_size: u64) -> Option<Geometry> {
    FLOPPY_SIZES
        .iter()
        .find(|(size, _)| *size == total_size)
        .map(|(_, geometry)| *geometry)
}

/// Infers device class from filename extension when nothing else has
/// settled it: `.iso`/`.nrg`/`.bin` imply CD/DVD.
pub fn device_class_from_extension(filename: &str) -> DeviceClass {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".iso") || lower.ends_with(".nrg") || lower.ends_with(".bin") {
        DeviceClass::Cd
    } else {
        DeviceClass::HardDisk
    }
}

/// Fills whichever of a CD geometry's fields are still zero with the fixed
/// CD defaults. `geometry.cylinders` is left untouched; it is resolved
/// separately by [`finalize_cylinders`].
pub fn fill_cd_defaults(geometry: &mut Geometry) {
    if geometry.bytes_per_sector == 0 {
        geometry.bytes_per_sector = SECTOR_SIZE_CD;
    }
    if geometry.sectors_per_track == 0 {
        geometry.sectors_per_track = SECTORS_PER_TRACK_CD;
    }
    if geometry.tracks_per_cylinder == 0 {
        geometry.tracks_per_cylinder = TRACKS_PER_CYLINDER_CD;
    }
}

/// Fills whichever of a hard-disk geometry's fields are still zero,
/// choosing tracks-per-cylinder by repeatedly folding factors of two out of
/// the raw track count into the cylinder divisor until at most 128 remain,
/// or jumping straight to the fixed 255 once the raw count is too large for
/// that search to converge below the cap. Mirrors the reference driver's
/// default-geometry fill exactly (see `sys/createdev.cpp`); `cylinders` here
/// is still the caller's total-size value and is resolved by
/// [`finalize_cylinders`].
pub fn fill_hdd_defaults(geometry: &mut Geometry, total_size: u64) {
    if geometry.bytes_per_sector == 0 {
        geometry.bytes_per_sector = SECTOR_SIZE_HDD;
    }
    if geometry.sectors_per_track == 0 {
        geometry.sectors_per_track = SECTORS_PER_TRACK_HDD;
    }
    if geometry.tracks_per_cylinder == 0 {
        let mut raw_tracks = total_size / u64::from(geometry.bytes_per_sector);
        raw_tracks /= u64::from(geometry.sectors_per_track).max(1);

        if raw_tracks >= HDD_CYLINDER_OVERFLOW_THRESHOLD {
            geometry.tracks_per_cylinder = 255;
        } else {
            let mut tracks_per_cylinder: u32 = 1;
            while raw_tracks > 128 && tracks_per_cylinder < 128 {
                tracks_per_cylinder <<= 1;
                raw_tracks >>= 1;
            }
            geometry.tracks_per_cylinder = tracks_per_cylinder;
        }
    }
}

/// Collapses the overloaded `cylinders` (total size in bytes) down to an
/// actual cylinder count once the other three fields are resolved.
pub fn finalize_cylinders(geometry: &mut Geometry, total_size: u64) {
    let per_cylinder = u64::from(geometry.tracks_per_cylinder)
        * u64::from(geometry.sectors_per_track)
        * u64::from(geometry.bytes_per_sector);
    geometry.cylinders = if per_cylinder == 0 {
        0
    } else {
        total_size.div_ceil(per_cylinder).max(1)
    };
}

/// Runs the full fill-in sequence for a device whose geometry is not yet
/// fully specified: BPB hints (if a boot sector was supplied), then
/// class-appropriate defaults, then cylinder finalisation.
pub fn resolve(
    geometry: &mut Geometry,
    total_size: u64,
    device_class: DeviceClass,
    bpb: Option<BpbHints>,
) {
    if geometry.any_unset() {
        if let Some(hints) = bpb {
            if geometry.bytes_per_sector == 0 {
                if let Some(value) = hints.bytes_per_sector {
                    geometry.bytes_per_sector = value;
                }
            }
            if geometry.sectors_per_track == 0 {
                if let Some(value) = hints.sectors_per_track {
                    geometry.sectors_per_track = value;
                }
            }
            if geometry.tracks_per_cylinder == 0 {
                if let Some(value) = hints.heads {
                    geometry.tracks_per_cylinder = value;
                }
            }
        }
    }

    match device_class {
        DeviceClass::Cd => fill_cd_defaults(geometry),
        _ => fill_hdd_defaults(geometry, total_size),
    }

    finalize_cylinders(geometry, total_size);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bpb_sector(bytes_per_sector: u16, sectors_per_track: u16, heads: u16) -> [u8; 512] {
        let mut sector = [0u8; 512];
        sector[BPB_BYTES_PER_SECTOR..BPB_BYTES_PER_SECTOR + 2]
            .copy_from_slice(&bytes_per_sector.to_le_bytes());
        sector[BPB_SECTORS_PER_TRACK..BPB_SECTORS_PER_TRACK + 2]
            .copy_from_slice(&sectors_per_track.to_le_bytes());
        sector[BPB_NUMBER_OF_HEADS..BPB_NUMBER_OF_HEADS + 2]
            .copy_from_slice(&heads.to_le_bytes());
        sector
    }

    #[test]
    fn bpb_round_trips_bytes_sectors_heads() {
        let sector = bpb_sector(512, 63, 16);
        let hints = infer_from_bpb(&sector).expect("valid bpb");
        assert_eq!(hints.bytes_per_sector, Some(512));
        assert_eq!(hints.sectors_per_track, Some(63));
        assert_eq!(hints.heads, Some(16));
    }

    #[test]
    fn bpb_rejects_non_power_of_two_sector_size() {
        let sector = bpb_sector(500, 63, 16);
        assert!(infer_from_bpb(&sector).is_none());
    }

    #[test]
    fn bpb_rejects_sectors_per_track_at_or_above_64() {
        let sector = bpb_sector(512, 64, 16);
        assert!(infer_from_bpb(&sector).is_none());
    }

    #[test]
    fn bpb_rejects_heads_at_or_above_256() {
        let sector = bpb_sector(512, 63, 256);
        assert!(infer_from_bpb(&sector).is_none());
    }

    #[test]
    fn extension_based_class_inference() {
        assert_eq!(device_class_from_extension("image.ISO"), DeviceClass::Cd);
        assert_eq!(device_class_from_extension("image.nrg"), DeviceClass::Cd);
        assert_eq!(
            device_class_from_extension("image.vhd"),
            DeviceClass::HardDisk
        );
    }

    #[test]
    fn hdd_defaults_fold_small_track_counts_into_low_power_of_two() {
        // 1 MiB at the standard 512/63 defaults: 1_048_576 / 512 / 63 = 32
        // raw tracks, below 128, so the doubling loop never runs.
        let mut geometry = Geometry::default();
        fill_hdd_defaults(&mut geometry, 1_048_576);
        assert_eq!(geometry.bytes_per_sector, 512);
        assert_eq!(geometry.sectors_per_track, 63);
        assert_eq!(geometry.tracks_per_cylinder, 1);
    }

    #[test]
    fn hdd_defaults_use_fixed_255_past_overflow_threshold() {
        let total_size = 130_560u64 * 512 * 63 + 1;
        let mut geometry = Geometry::default();
        fill_hdd_defaults(&mut geometry, total_size);
        assert_eq!(geometry.tracks_per_cylinder, 255);
    }

    #[test]
    fn cd_defaults_fill_all_zero_fields() {
        let mut geometry = Geometry::default();
        fill_cd_defaults(&mut geometry);
        assert_eq!(geometry.bytes_per_sector, SECTOR_SIZE_CD);
        assert_eq!(geometry.sectors_per_track, SECTORS_PER_TRACK_CD);
        assert_eq!(geometry.tracks_per_cylinder, TRACKS_PER_CYLINDER_CD);
    }

    #[test]
    fn finalize_cylinders_recovers_total_size() {
        let mut geometry = Geometry {
            cylinders: 0,
            tracks_per_cylinder: 1,
            sectors_per_track: 63,
            bytes_per_sector: 512,
        };
        finalize_cylinders(&mut geometry, 1_048_576);
        assert_eq!(geometry.cylinders, 33);
    }

    #[test]
    fn floppy_table_matches_standard_1440k_geometry() {
        let geometry = floppy_geometry_for_size(1_474_560).expect("known size");
        assert_eq!(geometry.sectors_per_track, 18);
        assert_eq!(geometry.tracks_per_cylinder, 2);
        assert_eq!(geometry.cylinders, 80);
    }
}
