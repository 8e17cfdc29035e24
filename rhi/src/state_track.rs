use std::collections::HashMap;

use kiln_core::gpu::*;

use crate::ResourceId;

#[derive(Debug)]
struct TextureState {
    state: ResourceStates,
    /// `None` while every subresource shares `state`.
    subresource_states: Option<Vec<ResourceStates>>,
    enable_uav_barriers: bool,
    uav_barrier_placed: bool,
}

#[derive(Debug)]
struct BufferState {
    state: ResourceStates,
    enable_uav_barriers: bool,
    uav_barrier_placed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBarrier {
    pub resource: ResourceId,
    pub mip_level: u32,
    pub array_slice: u32,
    pub entire_texture: bool,
    pub before: ResourceStates,
    pub after: ResourceStates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub resource: ResourceId,
    pub before: ResourceStates,
    pub after: ResourceStates,
}

/// Owns the logical state of every resource a recorder has touched and
/// produces the minimum barrier sequence for each requested state. Barriers
/// accumulate in a scratch list until the recorder commits them.
#[derive(Default)]
pub struct ResourceStateTracker {
    texture_states: HashMap<ResourceId, TextureState>,
    buffer_states: HashMap<ResourceId, BufferState>,
    texture_barriers: Vec<TextureBarrier>,
    buffer_barriers: Vec<BufferBarrier>,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_texture_enable_uav_barriers(
        &mut self,
        id: ResourceId,
        desc: &TextureDesc,
        enable: bool,
    ) {
        let track = Self::texture_track(&mut self.texture_states, id, desc);
        track.enable_uav_barriers = enable;
        track.uav_barrier_placed = false;
    }

    pub fn set_buffer_enable_uav_barriers(&mut self, id: ResourceId, desc: &BufferDesc, enable: bool) {
        let track = Self::buffer_track(&mut self.buffer_states, id, desc);
        track.enable_uav_barriers = enable;
        track.uav_barrier_placed = false;
    }

    pub fn texture_state(
        &mut self,
        id: ResourceId,
        desc: &TextureDesc,
        array_slice: u32,
        mip_level: u32,
    ) -> ResourceStates {
        let track = Self::texture_track(&mut self.texture_states, id, desc);
        match &track.subresource_states {
            Some(states) => states[subresource_index(mip_level, array_slice, desc) as usize],
            None => track.state,
        }
    }

    pub fn buffer_state(&mut self, id: ResourceId, desc: &BufferDesc) -> ResourceStates {
        Self::buffer_track(&mut self.buffer_states, id, desc).state
    }

    /// Requests `state` for `subresources` of the texture, queueing whatever
    /// transition / UAV barriers that takes. At most one UAV barrier is
    /// queued per call even when the range spans several subresources.
    pub fn require_texture_state(
        &mut self,
        id: ResourceId,
        desc: &TextureDesc,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
    ) {
        let subresources = subresources.resolve(desc, false);
        let track = Self::texture_track(&mut self.texture_states, id, desc);

        if subresources.is_entire_texture(desc) && track.subresource_states.is_none() {
            let transition_necessary = !track.state.contains(state);
            let uav_necessary = state.contains(ResourceStates::UNORDERED_ACCESS)
                && track.enable_uav_barriers
                && !track.uav_barrier_placed;

            if transition_necessary || uav_necessary {
                self.texture_barriers.push(TextureBarrier {
                    resource: id,
                    mip_level: 0,
                    array_slice: 0,
                    entire_texture: true,
                    before: track.state,
                    after: state,
                });
            }
            if transition_necessary {
                track.state = state;
            } else if uav_necessary {
                track.uav_barrier_placed = true;
            }
            return;
        }

        let subresource_count = desc.num_subresources() as usize;
        let uniform_state = track.state;
        let states = track
            .subresource_states
            .get_or_insert_with(|| vec![uniform_state; subresource_count]);

        let mut any_uav_barrier = false;
        for slice in
            subresources.base_array_slice..subresources.base_array_slice + subresources.array_slice_count
        {
            for mip in
                subresources.base_mip_level..subresources.base_mip_level + subresources.mip_level_count
            {
                let index = subresource_index(mip, slice, desc) as usize;
                let prior = states[index];

                let transition_necessary = !prior.contains(state);
                let uav_necessary = state.contains(ResourceStates::UNORDERED_ACCESS)
                    && track.enable_uav_barriers
                    && !track.uav_barrier_placed
                    && !any_uav_barrier;

                if transition_necessary || uav_necessary {
                    self.texture_barriers.push(TextureBarrier {
                        resource: id,
                        mip_level: mip,
                        array_slice: slice,
                        entire_texture: false,
                        before: prior,
                        after: state,
                    });
                }
                if transition_necessary {
                    states[index] = state;
                } else if uav_necessary {
                    any_uav_barrier = true;
                    track.uav_barrier_placed = true;
                }
            }
        }

        // Collapse back to uniform tracking once the whole texture agrees
        // on exactly the requested state.
        if subresources.is_entire_texture(desc)
            && track
                .subresource_states
                .as_ref()
                .map(|states| states.iter().all(|s| *s == state))
                .unwrap_or(false)
        {
            track.state = state;
            track.subresource_states = None;
        }
    }

    /// Requests `state` for the whole buffer. CPU-visible and volatile
    /// buffers never transition; forcing one towards a GPU-write state is a
    /// policy violation.
    pub fn require_buffer_state(
        &mut self,
        id: ResourceId,
        desc: &BufferDesc,
        state: ResourceStates,
    ) -> RhiResult<()> {
        if desc.is_volatile {
            return Ok(());
        }
        if desc.cpu_access != CpuAccessMode::None {
            let permanent = match desc.cpu_access {
                CpuAccessMode::Read => ResourceStates::COPY_DEST,
                _ => ResourceStates::COMMON,
            };
            if state.is_gpu_write() && !permanent.contains(state) {
                log::error!(
                    "buffer '{}' is CPU-visible and can't be transitioned to a GPU-write state",
                    desc.name
                );
                return Err(RhiError::StatePolicyViolation);
            }
            return Ok(());
        }

        let track = Self::buffer_track(&mut self.buffer_states, id, desc);
        let transition_necessary = !track.state.contains(state);

        if transition_necessary {
            // A pending barrier for this buffer absorbs the new after-state.
            for barrier in self.buffer_barriers.iter_mut() {
                if barrier.resource == id {
                    barrier.after |= state;
                    track.state = barrier.after;
                    return Ok(());
                }
            }
        }

        let uav_necessary = state.contains(ResourceStates::UNORDERED_ACCESS)
            && track.enable_uav_barriers
            && !track.uav_barrier_placed;

        if transition_necessary || uav_necessary {
            self.buffer_barriers.push(BufferBarrier {
                resource: id,
                before: track.state,
                after: state,
            });
        }
        if transition_necessary {
            track.state = state;
        } else if uav_necessary {
            track.uav_barrier_placed = true;
        }
        Ok(())
    }

    pub fn texture_barriers(&self) -> &[TextureBarrier] {
        &self.texture_barriers
    }

    pub fn buffer_barriers(&self) -> &[BufferBarrier] {
        &self.buffer_barriers
    }

    pub fn has_pending_barriers(&self) -> bool {
        !self.texture_barriers.is_empty() || !self.buffer_barriers.is_empty()
    }

    /// Discards the scratch list after the recorder has committed it.
    pub fn clear_barriers(&mut self) {
        self.texture_barriers.clear();
        self.buffer_barriers.clear();
    }

    fn texture_track<'a>(
        states: &'a mut HashMap<ResourceId, TextureState>,
        id: ResourceId,
        desc: &TextureDesc,
    ) -> &'a mut TextureState {
        states.entry(id).or_insert_with(|| TextureState {
            state: desc.initial_state,
            subresource_states: None,
            enable_uav_barriers: false,
            uav_barrier_placed: false,
        })
    }

    fn buffer_track<'a>(
        states: &'a mut HashMap<ResourceId, BufferState>,
        id: ResourceId,
        desc: &BufferDesc,
    ) -> &'a mut BufferState {
        states.entry(id).or_insert_with(|| BufferState {
            state: desc.initial_state,
            enable_uav_barriers: false,
            uav_barrier_placed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture_desc(mips: u32, slices: u32) -> TextureDesc {
        TextureDesc {
            width: 16,
            height: 16,
            mip_levels: mips,
            array_size: slices,
            dimension: if slices > 1 {
                TextureDimension::Texture2DArray
            } else {
                TextureDimension::Texture2D
            },
            ..Default::default()
        }
    }

    #[test]
    fn whole_texture_transition_emits_one_barrier() {
        let mut tracker = ResourceStateTracker::new();
        let id = ResourceId::next();
        let desc = texture_desc(4, 2);

        tracker.require_texture_state(
            id,
            &desc,
            ENTIRE_SUBRESOURCE_SET,
            ResourceStates::RENDER_TARGET,
        );
        assert_eq!(tracker.texture_barriers().len(), 1);
        let barrier = tracker.texture_barriers()[0];
        assert!(barrier.entire_texture);
        assert_eq!(barrier.before, ResourceStates::COMMON);
        assert_eq!(barrier.after, ResourceStates::RENDER_TARGET);

        // Same state again: nothing new.
        tracker.clear_barriers();
        tracker.require_texture_state(
            id,
            &desc,
            ENTIRE_SUBRESOURCE_SET,
            ResourceStates::RENDER_TARGET,
        );
        assert!(tracker.texture_barriers().is_empty());
    }

    #[test]
    fn partial_transition_emits_only_changed_subresources() {
        let mut tracker = ResourceStateTracker::new();
        let id = ResourceId::next();
        let desc = texture_desc(4, 1);

        tracker.require_texture_state(
            id,
            &desc,
            TextureSubresourceSet::single(1, 0),
            ResourceStates::COPY_DEST,
        );
        assert_eq!(tracker.texture_barriers().len(), 1);
        tracker.clear_barriers();

        // Mips 0..4: mip 1 is already CopyDest, three barriers remain.
        tracker.require_texture_state(
            id,
            &desc,
            TextureSubresourceSet {
                base_mip_level: 0,
                mip_level_count: 4,
                base_array_slice: 0,
                array_slice_count: 1,
            },
            ResourceStates::COPY_DEST,
        );
        assert_eq!(tracker.texture_barriers().len(), 3);
        assert!(tracker.texture_barriers().iter().all(|b| !b.entire_texture));
    }

    #[test]
    fn uav_guard_places_one_barrier_per_require() {
        let mut tracker = ResourceStateTracker::new();
        let id = ResourceId::next();
        let desc = TextureDesc {
            is_uav: true,
            initial_state: ResourceStates::UNORDERED_ACCESS,
            ..texture_desc(1, 1)
        };

        // Guard closed: no barrier for same-state UAV use.
        tracker.require_texture_state(
            id,
            &desc,
            ENTIRE_SUBRESOURCE_SET,
            ResourceStates::UNORDERED_ACCESS,
        );
        assert!(tracker.texture_barriers().is_empty());

        tracker.set_texture_enable_uav_barriers(id, &desc, true);
        tracker.require_texture_state(
            id,
            &desc,
            ENTIRE_SUBRESOURCE_SET,
            ResourceStates::UNORDERED_ACCESS,
        );
        assert_eq!(tracker.texture_barriers().len(), 1);
        let barrier = tracker.texture_barriers()[0];
        assert_eq!(barrier.before, barrier.after);

        // Guard stays shut until re-armed.
        tracker.clear_barriers();
        tracker.require_texture_state(
            id,
            &desc,
            ENTIRE_SUBRESOURCE_SET,
            ResourceStates::UNORDERED_ACCESS,
        );
        assert!(tracker.texture_barriers().is_empty());

        tracker.set_texture_enable_uav_barriers(id, &desc, true);
        tracker.require_texture_state(
            id,
            &desc,
            ENTIRE_SUBRESOURCE_SET,
            ResourceStates::UNORDERED_ACCESS,
        );
        assert_eq!(tracker.texture_barriers().len(), 1);
    }

    #[test]
    fn buffer_barriers_coalesce_by_or_ing_after_states() {
        let mut tracker = ResourceStateTracker::new();
        let id = ResourceId::next();
        let desc = BufferDesc::vertex(256, "vb");

        tracker
            .require_buffer_state(id, &desc, ResourceStates::COPY_SOURCE)
            .unwrap();
        assert_eq!(tracker.buffer_barriers().len(), 1);

        tracker
            .require_buffer_state(id, &desc, ResourceStates::NON_PIXEL_SHADER_RESOURCE)
            .unwrap();
        assert_eq!(tracker.buffer_barriers().len(), 1);
        let barrier = tracker.buffer_barriers()[0];
        assert_eq!(
            barrier.after,
            ResourceStates::COPY_SOURCE | ResourceStates::NON_PIXEL_SHADER_RESOURCE
        );
        assert_eq!(tracker.buffer_state(id, &desc), barrier.after);
    }

    #[test]
    fn cpu_visible_buffer_rejects_gpu_write_states() {
        let mut tracker = ResourceStateTracker::new();
        let id = ResourceId::next();
        let readback = BufferDesc::read_back(256, "rb");

        // Its permanent state is fine.
        assert!(tracker
            .require_buffer_state(id, &readback, ResourceStates::COPY_DEST)
            .is_ok());
        assert!(tracker.buffer_barriers().is_empty());

        assert_eq!(
            tracker.require_buffer_state(id, &readback, ResourceStates::UNORDERED_ACCESS),
            Err(RhiError::StatePolicyViolation)
        );
    }

    #[test]
    fn volatile_buffers_are_never_tracked() {
        let mut tracker = ResourceStateTracker::new();
        let id = ResourceId::next();
        let desc = BufferDesc::constant(256, true, "volatile");
        tracker
            .require_buffer_state(id, &desc, ResourceStates::CONSTANT_BUFFER)
            .unwrap();
        assert!(tracker.buffer_barriers().is_empty());
    }

    #[test]
    fn initial_state_comes_from_the_descriptor() {
        let mut tracker = ResourceStateTracker::new();
        let id = ResourceId::next();
        let desc = TextureDesc {
            initial_state: ResourceStates::PIXEL_SHADER_RESOURCE,
            ..texture_desc(1, 1)
        };
        tracker.require_texture_state(
            id,
            &desc,
            ENTIRE_SUBRESOURCE_SET,
            ResourceStates::COPY_DEST,
        );
        let barrier = tracker.texture_barriers()[0];
        assert_eq!(barrier.before, ResourceStates::PIXEL_SHADER_RESOURCE);
        assert_eq!(barrier.after, ResourceStates::COPY_DEST);
    }
}
