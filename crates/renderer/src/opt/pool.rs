/// Depth of each ring: one buffer per in-flight frame under triple buffering.
pub(crate) const POOL_DEPTH: usize = 3;

/// Cap on distinct sizes requested beyond the pre-warmed set. The only caller
/// is capture readback, pre-warmed with the current target size and rebuilt
/// on resize; anything past this cap indicates a leak of one-off sizes.
const MAX_DYNAMIC_SIZES: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("buffer pool refuses a zero-length request")]
    ZeroSize,
    #[error("buffer pool exceeded {limit} dynamic sizes (requested {requested} bytes)")]
    TooManySizes { requested: usize, limit: usize },
}

struct Bucket {
    size: usize,
    ring: Vec<Vec<u8>>,
    cursor: usize,
}

impl Bucket {
    fn new(size: usize) -> Self {
        Self {
            size,
            ring: (0..POOL_DEPTH).map(|_| vec![0u8; size]).collect(),
            cursor: 0,
        }
    }
}

/// Round-robin pool of fixed-size staging buffers.
///
/// Pre-warmed sizes are allocated up front; requests for other sizes create
/// new rings up to a hard cap and then fail loudly instead of growing without
/// bound.
pub(crate) struct BufferPool {
    buckets: Vec<Bucket>,
    prewarmed: usize,
}

impl BufferPool {
    pub fn with_sizes(sizes: &[usize]) -> Self {
        let mut unique: Vec<usize> = Vec::with_capacity(sizes.len());
        for &size in sizes {
            if size > 0 && !unique.contains(&size) {
                unique.push(size);
            }
        }
        let buckets = unique.into_iter().map(Bucket::new).collect::<Vec<_>>();
        let prewarmed = buckets.len();
        Self { buckets, prewarmed }
    }

    /// Hands out the next buffer of exactly `size` bytes, rotating through
    /// `POOL_DEPTH` slots so a buffer still referenced by an in-flight copy
    /// is not rewritten immediately.
    pub fn acquire(&mut self, size: usize) -> Result<&mut [u8], PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }
        let index = match self.buckets.iter().position(|bucket| bucket.size == size) {
            Some(index) => index,
            None => {
                let dynamic = self.buckets.len() - self.prewarmed;
                if dynamic >= MAX_DYNAMIC_SIZES {
                    return Err(PoolError::TooManySizes {
                        requested: size,
                        limit: MAX_DYNAMIC_SIZES,
                    });
                }
                self.buckets.push(Bucket::new(size));
                self.buckets.len() - 1
            }
        };
        let bucket = &mut self.buckets[index];
        bucket.cursor = (bucket.cursor + 1) % POOL_DEPTH;
        Ok(&mut bucket.ring[bucket.cursor])
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
