//! Descriptor pool management.
//!
//! Pools are keyed by the descriptor-type census of the set layout they
//! serve. Each pool holds a fixed number of sets; when every pool of a
//! signature is full a new one is opened. A pool whose usage drops back
//! to zero is destroyed, and a signature with no pools left is dropped.
//!
//! Slots are stable: destroying a pool leaves a hole that the next pool
//! of the signature fills, so the indices stored in uniform-set records
//! stay valid. All bookkeeping lives in [`PoolLedger`], separate from the
//! Vulkan calls, so the recycle rules can be exercised without a device.

use ash::vk;
use hashbrown::HashMap;

use crate::error::Result;
use crate::shader::{descriptor_type, MergedBinding};

/// Sets per descriptor pool.
pub const MAX_SETS_PER_POOL: u32 = 64;

/// Descriptor-type census of one set layout, sorted for stable hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolSignature(Vec<(vk::DescriptorType, u32)>);

impl PoolSignature {
    /// Census of a merged set's bindings. Array bindings count each element.
    pub fn from_bindings(bindings: &[MergedBinding]) -> Self {
        let mut counts: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for binding in bindings {
            *counts.entry(descriptor_type(binding.kind)).or_insert(0) += binding.count;
        }
        let mut sorted: Vec<(vk::DescriptorType, u32)> = counts.into_iter().collect();
        sorted.sort_by_key(|(ty, _)| ty.as_raw());
        Self(sorted)
    }

    /// Pool sizes scaled for a full pool of this signature.
    fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.0
            .iter()
            .map(|(ty, count)| {
                vk::DescriptorPoolSize::default()
                    .ty(*ty)
                    .descriptor_count(count * MAX_SETS_PER_POOL)
            })
            .collect()
    }
}

/// Where the next allocation of a signature lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// An existing pool with room.
    Existing(usize),
    /// A new pool, created at this slot index.
    NewAt(usize),
}

/// Pick the first live pool with room; otherwise the first hole, or the
/// end of the list, for a new pool.
pub(crate) fn place_allocation(slots: &[Option<u32>]) -> Placement {
    for (index, slot) in slots.iter().enumerate() {
        if matches!(slot, Some(count) if *count < MAX_SETS_PER_POOL) {
            return Placement::Existing(index);
        }
    }
    slots
        .iter()
        .position(Option::is_none)
        .map_or(Placement::NewAt(slots.len()), Placement::NewAt)
}

struct PoolState {
    pool: vk::DescriptorPool,
    allocated: u32,
}

/// Slot bookkeeping for every pool of one signature. Holds handles and
/// usage counts; never touches the device.
#[derive(Default)]
pub(crate) struct PoolLedger {
    slots: Vec<Option<PoolState>>,
}

impl PoolLedger {
    pub fn place(&self) -> Placement {
        let counts: Vec<Option<u32>> = self
            .slots
            .iter()
            .map(|slot| slot.as_ref().map(|state| state.allocated))
            .collect();
        place_allocation(&counts)
    }

    /// Record a freshly created pool at the slot `place` chose.
    pub fn open(&mut self, index: usize, pool: vk::DescriptorPool) {
        let state = PoolState { pool, allocated: 0 };
        if index == self.slots.len() {
            self.slots.push(Some(state));
        } else {
            debug_assert!(self.slots[index].is_none(), "opened over a live pool");
            self.slots[index] = Some(state);
        }
    }

    pub fn pool(&self, index: usize) -> vk::DescriptorPool {
        self.slots[index].as_ref().expect("live pool slot").pool
    }

    /// Count one more set against the pool at `index`.
    pub fn acquire(&mut self, index: usize) {
        self.slots[index].as_mut().expect("live pool slot").allocated += 1;
    }

    /// Return one set; a pool that empties is removed from the ledger and
    /// its handle handed back for destruction.
    pub fn release(&mut self, index: usize) -> Option<vk::DescriptorPool> {
        let state = self.slots[index].as_mut().expect("release for a dead pool slot");
        state.allocated -= 1;
        if state.allocated == 0 {
            let state = self.slots[index].take().expect("slot was live");
            return Some(state.pool);
        }
        None
    }

    /// Whether no pool of this signature remains.
    pub fn is_retired(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn live(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    fn drain(&mut self) -> Vec<vk::DescriptorPool> {
        self.slots
            .iter_mut()
            .filter_map(Option::take)
            .map(|state| state.pool)
            .collect()
    }
}

/// All descriptor pools, grouped by signature.
#[derive(Default)]
pub struct DescriptorPools {
    pools: HashMap<PoolSignature, PoolLedger>,
}

impl DescriptorPools {
    /// Allocate one set of `layout` from a pool matching `signature`.
    ///
    /// Returns the set and the slot of the pool it came from; the slot
    /// must be passed back to [`Self::free`].
    ///
    /// # Safety
    ///
    /// `device` must be valid and `layout` must be a live layout whose
    /// census matches `signature`.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn allocate(
        &mut self,
        device: &ash::Device,
        signature: &PoolSignature,
        layout: vk::DescriptorSetLayout,
    ) -> Result<(vk::DescriptorSet, usize)> {
        let ledger = self.pools.entry(signature.clone()).or_default();
        let index = match ledger.place() {
            Placement::Existing(index) => index,
            Placement::NewAt(index) => {
                let sizes = signature.pool_sizes();
                let create_info = vk::DescriptorPoolCreateInfo::default()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(MAX_SETS_PER_POOL)
                    .pool_sizes(&sizes);
                let pool = unsafe { device.create_descriptor_pool(&create_info, None)? };
                tracing::debug!(slot = index, "opened descriptor pool");
                ledger.open(index, pool);
                index
            }
        };

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(ledger.pool(index))
            .set_layouts(&layouts);
        let set = unsafe { device.allocate_descriptor_sets(&alloc_info)?[0] };
        ledger.acquire(index);
        Ok((set, index))
    }

    /// Return a set to its pool; destroys the pool when it empties and
    /// drops the signature when no pools remain.
    ///
    /// # Safety
    ///
    /// The set must no longer be referenced by any pending command buffer.
    pub unsafe fn free(
        &mut self,
        device: &ash::Device,
        signature: &PoolSignature,
        slot: usize,
        set: vk::DescriptorSet,
    ) -> Result<()> {
        let ledger = self
            .pools
            .get_mut(signature)
            .expect("free for unknown pool signature");
        unsafe { device.free_descriptor_sets(ledger.pool(slot), &[set])? };
        if let Some(pool) = ledger.release(slot) {
            unsafe { device.destroy_descriptor_pool(pool, None) };
            tracing::debug!(slot, "recycled empty descriptor pool");
            if ledger.is_retired() {
                self.pools.remove(signature);
            }
        }
        Ok(())
    }

    /// Destroy every pool.
    ///
    /// # Safety
    ///
    /// No allocated set may still be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for ledger in self.pools.values_mut() {
            for pool in ledger.drain() {
                unsafe { device.destroy_descriptor_pool(pool, None) };
            }
        }
        self.pools.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_spirv::DescriptorKind;

    fn acquire_next(ledger: &mut PoolLedger) -> usize {
        let index = match ledger.place() {
            Placement::Existing(index) => index,
            Placement::NewAt(index) => {
                ledger.open(index, vk::DescriptorPool::null());
                index
            }
        };
        ledger.acquire(index);
        index
    }

    #[test]
    fn signature_sums_array_counts() {
        let bindings = [
            MergedBinding {
                binding: 0,
                kind: DescriptorKind::CombinedImageSampler,
                count: 3,
                stages: vk::ShaderStageFlags::FRAGMENT,
            },
            MergedBinding {
                binding: 1,
                kind: DescriptorKind::CombinedImageSampler,
                count: 1,
                stages: vk::ShaderStageFlags::FRAGMENT,
            },
            MergedBinding {
                binding: 2,
                kind: DescriptorKind::UniformBuffer,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
            },
        ];
        let signature = PoolSignature::from_bindings(&bindings);
        let sizes = signature.pool_sizes();
        let sampler_size = sizes
            .iter()
            .find(|size| size.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .unwrap();
        assert_eq!(sampler_size.descriptor_count, 4 * MAX_SETS_PER_POOL);
    }

    #[test]
    fn binding_order_does_not_change_signature() {
        let a = [
            MergedBinding {
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
            },
            MergedBinding {
                binding: 1,
                kind: DescriptorKind::CombinedImageSampler,
                count: 1,
                stages: vk::ShaderStageFlags::FRAGMENT,
            },
        ];
        let b = [a[1], a[0]];
        assert_eq!(
            PoolSignature::from_bindings(&a),
            PoolSignature::from_bindings(&b)
        );
    }

    #[test]
    fn full_pools_promote_to_a_new_one() {
        assert_eq!(place_allocation(&[]), Placement::NewAt(0));
        assert_eq!(
            place_allocation(&[Some(MAX_SETS_PER_POOL)]),
            Placement::NewAt(1)
        );
        assert_eq!(
            place_allocation(&[Some(MAX_SETS_PER_POOL), Some(12)]),
            Placement::Existing(1)
        );
    }

    #[test]
    fn holes_are_refilled_before_growing() {
        // Slot 0 was recycled; a new pool goes there, not at the end.
        assert_eq!(
            place_allocation(&[None, Some(MAX_SETS_PER_POOL)]),
            Placement::NewAt(0)
        );
    }

    #[test]
    fn freed_capacity_is_reused_before_new_pools() {
        assert_eq!(
            place_allocation(&[Some(MAX_SETS_PER_POOL - 1), Some(MAX_SETS_PER_POOL)]),
            Placement::Existing(0)
        );
    }

    #[test]
    fn matched_acquires_and_releases_retire_the_signature() {
        let mut ledger = PoolLedger::default();
        let slots: Vec<usize> = (0..MAX_SETS_PER_POOL)
            .map(|_| acquire_next(&mut ledger))
            .collect();
        assert_eq!(ledger.live(), 1);

        let mut retired = 0;
        for slot in slots {
            if ledger.release(slot).is_some() {
                retired += 1;
            }
        }
        assert_eq!(retired, 1);
        assert_eq!(ledger.live(), 0);
        assert!(ledger.is_retired());
    }

    #[test]
    fn promoted_pool_retires_independently() {
        let mut ledger = PoolLedger::default();
        for _ in 0..MAX_SETS_PER_POOL {
            assert_eq!(acquire_next(&mut ledger), 0);
        }
        // Pool 0 is full; the next set opens a second pool.
        assert_eq!(acquire_next(&mut ledger), 1);
        assert_eq!(ledger.live(), 2);

        for _ in 0..MAX_SETS_PER_POOL - 1 {
            assert!(ledger.release(0).is_none());
        }
        assert!(ledger.release(0).is_some());
        assert_eq!(ledger.live(), 1);
        assert!(!ledger.is_retired());

        // The hole at slot 0 is preferred for the next pool.
        for _ in 0..MAX_SETS_PER_POOL - 1 {
            acquire_next(&mut ledger);
        }
        assert_eq!(acquire_next(&mut ledger), 0);
    }
}
