use thiserror::Error;

use crate::condition::Partition;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TreatmentsError {
    #[error("partition sizes must add up to 100, got {0}")]
    InvalidPartitions(u32),
    #[error("bucket {0} is outside of [0, 100]")]
    BucketOutOfRange(u32),
}

/// A condition's partitions as a cumulative range table.
///
/// `ranges[i]` is the sum of the sizes of partitions `0..=i`; a bucket belongs to the first
/// partition whose cumulative range reaches it.
#[derive(Clone, Debug, PartialEq)]
pub struct Treatments {
    ranges: Vec<u32>,
    treatments: Vec<String>,
}

impl Treatments {
    pub fn parse(partitions: &[Partition]) -> Result<Self, TreatmentsError> {
        let mut ranges = Vec::with_capacity(partitions.len());
        let mut treatments = Vec::with_capacity(partitions.len());
        let mut total = 0_u32;
        for partition in partitions {
            total = total.saturating_add(partition.size);
            ranges.push(total);
            treatments.push(partition.treatment.clone());
        }

        if ranges.last() != Some(&100) {
            return Err(TreatmentsError::InvalidPartitions(total));
        }

        Ok(Treatments { ranges, treatments })
    }

    pub fn get_treatment_for(&self, bucket: u32) -> Result<&str, TreatmentsError> {
        if bucket > 100 {
            return Err(TreatmentsError::BucketOutOfRange(bucket));
        }
        let index = self.ranges.partition_point(|range| *range < bucket);
        Ok(&self.treatments[index])
    }
}
