//! Conversion between cached resources and their on-disk bytes

use crate::error::Result;

/// Encodes resources for the disk tier and decodes them back.
///
/// The cache treats both directions as opaque and fallible. A decode failure
/// is reported to callers as a plain miss.
pub trait Codec: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    fn encode(&self, resource: &Self::Resource) -> Result<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> Result<Self::Resource>;

    /// Estimated memory footprint in bytes, used to weigh memory eviction.
    fn cost(&self, resource: &Self::Resource) -> usize;
}

/// Codec for resources that are already raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Resource = Vec<u8>;

    fn encode(&self, resource: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(resource.clone())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn cost(&self, resource: &Vec<u8>) -> usize {
        resource.len()
    }
}
