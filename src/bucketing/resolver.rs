//! Signature → bucket id resolution.
//!
//! Lookups go through a process-local cache first and the bucket store second.
//! A miss in both allocates a fresh id and persists a new bucket; the cache
//! only learns about a new bucket once the store has accepted it.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{Bucket, BucketId};
use crate::signature::Signature;
use crate::store::{BucketStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use xxhash_rust::xxh3::Xxh3Builder;

/// Monotonic bucket id allocator.
///
/// Ids are never reused: an id burned by a failed insert is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdAllocator {
    next: BucketId,
}

impl IdAllocator {
    /// Starts handing out ids at `next`.
    pub fn starting_at(next: BucketId) -> Self {
        Self { next }
    }

    /// Seeds the allocator above every id already present in `store`.
    ///
    /// # Arguments
    /// * `store` - Bucket store to read the current maximum from
    /// * `floor` - Lowest id to hand out
    ///
    /// # Returns
    /// Allocator starting at `max(max_bucket_id + 1, floor)`
    pub fn seeded<B: BucketStore + ?Sized>(store: &B, floor: BucketId) -> Result<Self> {
        let next = match store.max_bucket_id().map_err(Error::Startup)? {
            Some(max) => max
                .checked_add(1)
                .ok_or(Error::IdSpaceExhausted { last: max })?
                .max(floor),
            None => floor,
        };
        Ok(Self { next })
    }

    /// The id the next allocation returns.
    pub fn peek(&self) -> BucketId {
        self.next
    }

    pub fn allocate(&mut self) -> Result<BucketId> {
        let id = self.next;
        self.next = id
            .checked_add(1)
            .ok_or(Error::IdSpaceExhausted { last: id })?;
        Ok(id)
    }
}

/// Whether a resolved bucket already existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    Existing,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub bucket_id: BucketId,
    pub kind: ResolutionKind,
}

impl Resolution {
    pub fn existing(bucket_id: BucketId) -> Self {
        Self {
            bucket_id,
            kind: ResolutionKind::Existing,
        }
    }

    pub fn created(bucket_id: BucketId) -> Self {
        Self {
            bucket_id,
            kind: ResolutionKind::Created,
        }
    }

    pub fn is_created(&self) -> bool {
        self.kind == ResolutionKind::Created
    }
}

/// Two-tier signature resolver owning the id allocator.
pub struct BucketResolver<'s, B: BucketStore + ?Sized> {
    store: &'s B,
    cache: HashMap<Signature, BucketId, Xxh3Builder>,
    allocator: IdAllocator,
    clock: Arc<dyn Clock>,
}

impl<'s, B: BucketStore + ?Sized> BucketResolver<'s, B> {
    pub fn new(store: &'s B, allocator: IdAllocator, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache: HashMap::with_hasher(Xxh3Builder::new()),
            allocator,
            clock,
        }
    }

    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Number of cached signatures.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    /// Returns the bucket for `signature`, creating it on first sight.
    pub fn resolve(&mut self, signature: &Signature) -> Result<Resolution> {
        if let Some(&bucket_id) = self.cache.get(signature) {
            return Ok(Resolution::existing(bucket_id));
        }

        if let Some(bucket) = self.store.find_by_signature(signature)? {
            self.cache.insert(signature.clone(), bucket.id);
            return Ok(Resolution::existing(bucket.id));
        }

        let bucket_id = self.allocator.allocate()?;
        let bucket = Bucket::first_occurrence(bucket_id, signature.clone(), self.clock.now());
        match self.store.insert(&bucket) {
            Ok(()) => {
                debug!(bucket_id, %signature, "created bucket");
                self.cache.insert(bucket.signature, bucket_id);
                Ok(Resolution::created(bucket_id))
            }
            Err(conflict @ StoreError::Conflict(_)) => {
                warn!(
                    burned_id = bucket_id,
                    %signature,
                    "bucket created concurrently, re-resolving"
                );
                match self.store.find_by_signature(signature)? {
                    Some(existing) => {
                        self.cache.insert(bucket.signature, existing.id);
                        Ok(Resolution::existing(existing.id))
                    }
                    None => Err(conflict.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}
