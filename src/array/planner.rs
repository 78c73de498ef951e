//! Per-level chunk distribution policy
//!
//! The planner is pure: it takes the ordered eligible device list (online
//! members with spare capacity, in priority order), a RAID level and a data
//! chunk count, and produces the full chunk-index-to-devices assignment.
//! Nothing here touches storage.

use crate::array::error::{ArrayError, ArrayResult};
use crate::array::types::RaidLevel;
use std::collections::BTreeMap;

/// Output of planning one upload.
#[derive(Debug, Clone)]
pub struct DistributionPlan {
    /// Chunk index (data indices 0..N-1, parity indices >= N) to ordered
    /// target device ids.
    pub assignments: BTreeMap<usize, Vec<String>>,

    /// Number of parity chunks the caller must produce (level 5 only).
    pub parity_chunk_count: usize,

    /// Data chunks per stripe (level 5 only).
    pub stripe_width: Option<usize>,

    /// Usable fraction of raw capacity under this plan.
    pub efficiency: f64,
}

impl DistributionPlan {
    /// Total number of planned chunk locations.
    pub fn location_count(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }
}

pub struct DistributionPlanner;

impl DistributionPlanner {
    /// Plan the placement of `data_chunk_count` data chunks onto `devices`.
    pub fn plan(
        level: RaidLevel,
        devices: &[String],
        data_chunk_count: usize,
    ) -> ArrayResult<DistributionPlan> {
        if devices.is_empty() {
            return Err(ArrayError::NoEligibleDevices);
        }

        match level {
            RaidLevel::Mirror => Ok(Self::plan_mirror(devices, data_chunk_count)),
            RaidLevel::Parity => Self::plan_parity(devices, data_chunk_count),
            RaidLevel::MirroredStripes => Self::plan_mirrored_stripes(devices, data_chunk_count),
        }
    }

    /// Level 1: every chunk goes to every device.
    fn plan_mirror(devices: &[String], data_chunk_count: usize) -> DistributionPlan {
        let assignments = (0..data_chunk_count)
            .map(|i| (i, devices.to_vec()))
            .collect();

        DistributionPlan {
            assignments,
            parity_chunk_count: 0,
            stripe_width: None,
            efficiency: RaidLevel::Mirror.efficiency(devices.len()),
        }
    }

    /// Level 5: data chunk i on device i mod n, one rotating parity chunk
    /// per stripe of n-1 data chunks.
    ///
    /// Stripe s's data occupies n-1 consecutive devices of the rotation, so
    /// its parity lands on the one device holding none of that stripe's
    /// data: index (n-1-(s mod n)) mod n. A partial final stripe uses a
    /// subset of those devices and the same parity slot.
    fn plan_parity(devices: &[String], data_chunk_count: usize) -> ArrayResult<DistributionPlan> {
        let n = devices.len();
        // A stripe needs at least one data member plus a distinct parity
        // target.
        if n < 2 {
            return Err(ArrayError::TooFewDevices {
                level: RaidLevel::Parity.number(),
                needed: 2,
                available: n,
            });
        }

        let stripe_width = n - 1;
        let stripe_count = data_chunk_count.div_ceil(stripe_width);

        let mut assignments: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for i in 0..data_chunk_count {
            assignments.insert(i, vec![devices[i % n].clone()]);
        }
        for s in 0..stripe_count {
            let parity_device = (n - 1 - (s % n)) % n;
            assignments.insert(data_chunk_count + s, vec![devices[parity_device].clone()]);
        }

        Ok(DistributionPlan {
            assignments,
            parity_chunk_count: stripe_count,
            stripe_width: Some(stripe_width),
            efficiency: RaidLevel::Parity.efficiency(n),
        })
    }

    /// Level 10: consecutive devices form mirror pairs, chunks stripe
    /// across the pairs and land on both devices of their pair.
    fn plan_mirrored_stripes(
        devices: &[String],
        data_chunk_count: usize,
    ) -> ArrayResult<DistributionPlan> {
        let n = devices.len();
        if n < 4 {
            return Err(ArrayError::TooFewDevices {
                level: RaidLevel::MirroredStripes.number(),
                needed: 4,
                available: n,
            });
        }

        let pairs: Vec<&[String]> = devices.chunks_exact(2).collect();
        let pair_count = pairs.len();

        let assignments = (0..data_chunk_count)
            .map(|i| (i, pairs[i % pair_count].to_vec()))
            .collect();

        Ok(DistributionPlan {
            assignments,
            parity_chunk_count: 0,
            stripe_width: None,
            efficiency: RaidLevel::MirroredStripes.efficiency(n),
        })
    }
}
