//! On-disk mapping-pairs encoding of an extent map.
//!
//! Each run is a header byte (low nibble: size of the cluster-count field,
//! high nibble: size of the LCN-delta field) followed by the little-endian
//! count and the signed little-endian delta from the previous run's LCN.
//! Sparse runs omit the delta. A zero header byte terminates the list.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{ExtentError, ExtentMap, ExtentTarget};

/// How chunk bytes are laid out as volume clusters.
///
/// Chunk `n` occupies the clusters `[n * clusters_per_chunk, (n + 1) * clusters_per_chunk)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterLayout {
    cluster_size: u64,
    chunk_size: u64,
}

impl ClusterLayout {
    /// `cluster_size` must be a power of two and divide `chunk_size`.
    pub fn new(cluster_size: u64, chunk_size: u64) -> Result<Self, ExtentError> {
        if !cluster_size.is_power_of_two() {
            return Err(ExtentError::malformed(format!(
                "cluster size {cluster_size} is not a power of two"
            )));
        }
        if chunk_size == 0 || chunk_size % cluster_size != 0 {
            return Err(ExtentError::malformed(format!(
                "chunk size {chunk_size} is not a multiple of cluster size {cluster_size}"
            )));
        }
        Ok(Self {
            cluster_size,
            chunk_size,
        })
    }

    pub fn cluster_size(&self) -> u64 {
        self.cluster_size
    }

    pub fn clusters_per_chunk(&self) -> u64 {
        self.chunk_size / self.cluster_size
    }
}

/// One decoded run, in clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// First virtual cluster of the run.
    pub vcn: u64,
    /// Number of clusters.
    pub length: u64,
    /// First logical cluster, `None` for sparse runs.
    pub lcn: Option<u64>,
}

fn unsigned_width(value: u64) -> u8 {
    (((64 - value.leading_zeros()) + 7) / 8).max(1) as u8
}

fn signed_width(value: i64) -> u8 {
    (1..8u8)
        .find(|n| {
            let bits = u32::from(*n) * 8 - 1;
            value >= -(1i64 << bits) && value < (1i64 << bits)
        })
        .unwrap_or(8)
}

fn io_err(e: std::io::Error) -> ExtentError {
    ExtentError::malformed(format!("run list: {e}"))
}

impl ExtentMap {
    /// Encode as mapping pairs.
    ///
    /// Every extent must start on a cluster boundary and every mapped chunk
    /// offset must be cluster aligned. Only the final extent may end mid-cluster.
    pub fn encode_run_list(&self, layout: &ClusterLayout) -> Result<Vec<u8>, ExtentError> {
        let cluster_size = layout.cluster_size();
        let mut out = Vec::new();
        let mut previous_lcn: i64 = 0;
        let last = self.extents.len().saturating_sub(1);

        for (i, extent) in self.extents.iter().enumerate() {
            if extent.offset % cluster_size != 0 {
                return Err(ExtentError::UnalignedExtent {
                    offset: extent.offset,
                    cluster_size,
                });
            }
            if i != last && extent.length % cluster_size != 0 {
                return Err(ExtentError::UnalignedExtent {
                    offset: extent.end(),
                    cluster_size,
                });
            }

            let clusters = extent.length.div_ceil(cluster_size);
            let length_width = unsigned_width(clusters);

            match extent.target {
                ExtentTarget::Sparse => {
                    out.push(length_width);
                    out.write_uint::<LittleEndian>(clusters, length_width.into())
                        .map_err(io_err)?;
                }
                ExtentTarget::Mapped(locator) => {
                    if locator.offset % cluster_size != 0 {
                        return Err(ExtentError::UnalignedExtent {
                            offset: extent.offset,
                            cluster_size,
                        });
                    }
                    let lcn = u64::from(locator.chunk)
                        .checked_mul(layout.clusters_per_chunk())
                        .and_then(|base| base.checked_add(locator.offset / cluster_size))
                        .and_then(|lcn| i64::try_from(lcn).ok())
                        .ok_or_else(|| {
                            ExtentError::malformed(format!(
                                "lcn of chunk {} does not fit a run list",
                                locator.chunk
                            ))
                        })?;
                    let delta = lcn - previous_lcn;
                    previous_lcn = lcn;

                    let delta_width = signed_width(delta);
                    out.push((delta_width << 4) | length_width);
                    out.write_uint::<LittleEndian>(clusters, length_width.into())
                        .map_err(io_err)?;
                    out.write_int::<LittleEndian>(delta, delta_width.into())
                        .map_err(io_err)?;
                }
            }
        }

        out.push(0);
        Ok(out)
    }
}

/// Decode mapping pairs back into runs.
pub fn decode_run_list(bytes: &[u8]) -> Result<Vec<Run>, ExtentError> {
    let mut reader = Cursor::new(bytes);
    let mut runs = Vec::new();
    let mut vcn = 0u64;
    let mut lcn = 0i64;

    loop {
        let header = reader
            .read_u8()
            .map_err(|_| ExtentError::malformed("run list is missing its terminator"))?;
        if header == 0 {
            break;
        }

        let length_width = usize::from(header & 0x0F);
        let delta_width = usize::from(header >> 4);
        if length_width == 0 || length_width > 8 || delta_width > 8 {
            return Err(ExtentError::malformed(format!(
                "bad run header {header:#04x}"
            )));
        }

        let length = reader
            .read_uint::<LittleEndian>(length_width)
            .map_err(|_| ExtentError::malformed("truncated run length"))?;
        if length == 0 {
            return Err(ExtentError::malformed(format!("zero-length run at vcn {vcn}")));
        }
        let run_lcn = if delta_width == 0 {
            None
        } else {
            let delta = reader
                .read_int::<LittleEndian>(delta_width)
                .map_err(|_| ExtentError::malformed("truncated run offset"))?;
            lcn = lcn
                .checked_add(delta)
                .ok_or_else(|| ExtentError::malformed(format!("lcn overflow at vcn {vcn}")))?;
            Some(u64::try_from(lcn).map_err(|_| ExtentError::malformed("negative lcn"))?)
        };

        runs.push(Run {
            vcn,
            length,
            lcn: run_lcn,
        });
        vcn = vcn
            .checked_add(length)
            .ok_or_else(|| ExtentError::malformed("run list covers more than 2^64 clusters"))?;
    }

    Ok(runs)
}
