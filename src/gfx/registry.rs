// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Resource registry.
//!
//! Every native resource the context knows about lives in one fixed-size
//! table, tagged with its current state and the format views of it should
//! use.  Handles are index plus generation; a freed slot bumps its
//! generation, so a handle held past its release can never alias the
//! slot's next tenant.  The table never grows.  Exhausting it is a
//! provisioning bug and traps.

use crate::imp;
use crate::pixel_formats::PixelFormat;

pub const MAX_RESOURCES: usize = 256;

/// Generation-checked index into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    index: u16,
    generation: u16,
}

struct Slot {
    resource: Option<imp::RawResource>,
    state: imp::ResourceState,
    format: PixelFormat,
    generation: u16,
    refcount: u32,
}

pub struct ResourceRegistry {
    slots: Vec<Slot>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_RESOURCES);
        for _ in 0..MAX_RESOURCES {
            slots.push(Slot {
                resource: None,
                state: imp::ResourceState::Common,
                format: PixelFormat::Unknown,
                generation: 0,
                refcount: 0,
            });
        }
        ResourceRegistry { slots }
    }

    /// Register a resource the caller just created (or adopted, for
    /// swapchain buffers).  The new entry starts with refcount 1.
    pub fn add(
        &mut self,
        resource: imp::RawResource,
        state: imp::ResourceState,
        format: PixelFormat,
    ) -> ResourceHandle {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.resource.is_none())
            .expect("resource registry is full");
        let slot = &mut self.slots[index];
        slot.resource = Some(resource);
        slot.state = state;
        slot.format = format;
        slot.refcount = 1;
        ResourceHandle {
            index: index as u16,
            generation: slot.generation,
        }
    }

    pub fn is_valid(&self, handle: ResourceHandle) -> bool {
        let slot = &self.slots[handle.index as usize];
        slot.resource.is_some() && slot.generation == handle.generation
    }

    fn slot(&self, handle: ResourceHandle) -> &Slot {
        let slot = &self.slots[handle.index as usize];
        assert!(
            slot.resource.is_some() && slot.generation == handle.generation,
            "stale or invalid resource handle"
        );
        slot
    }

    pub fn get(&self, handle: ResourceHandle) -> &imp::RawResource {
        self.slot(handle).resource.as_ref().unwrap()
    }

    pub fn state(&self, handle: ResourceHandle) -> imp::ResourceState {
        self.slot(handle).state
    }

    pub fn format(&self, handle: ResourceHandle) -> PixelFormat {
        self.slot(handle).format
    }

    pub fn add_ref(&mut self, handle: ResourceHandle) -> u32 {
        assert!(self.is_valid(handle), "stale or invalid resource handle");
        let slot = &mut self.slots[handle.index as usize];
        slot.refcount += 1;
        slot.refcount
    }

    /// Drop one reference.  At zero the native resource is destroyed and
    /// the slot's generation advances, invalidating every outstanding copy
    /// of the handle.  Returns the remaining count.
    pub fn release(&mut self, handle: ResourceHandle) -> u32 {
        assert!(self.is_valid(handle), "stale or invalid resource handle");
        let slot = &mut self.slots[handle.index as usize];
        slot.refcount -= 1;
        if slot.refcount == 0 {
            slot.resource = None;
            slot.state = imp::ResourceState::Common;
            slot.format = PixelFormat::Unknown;
            slot.generation = slot.generation.wrapping_add(1);
        }
        slot.refcount
    }

    /// Record a transition barrier if the resource is not already in
    /// `state`.  Re-requesting the current state records nothing.
    pub fn transition(
        &mut self,
        list: &mut imp::CommandList,
        handle: ResourceHandle,
        state: imp::ResourceState,
    ) {
        assert!(self.is_valid(handle), "stale or invalid resource handle");
        let slot = &mut self.slots[handle.index as usize];
        if slot.state == state {
            return;
        }
        list.record(imp::Command::Transition {
            resource: slot.resource.as_ref().unwrap().id(),
            from: slot.state,
            to: state,
        });
        slot.state = state;
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.resource.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::{
        Command, Device, DeviceOptions, HeapType, ResourceDesc, ResourceState,
    };

    fn device() -> Device {
        Device::new(DeviceOptions::default()).unwrap()
    }

    fn buffer(device: &Device) -> imp::RawResource {
        device
            .create_resource(
                HeapType::Default,
                &ResourceDesc::buffer(64),
                ResourceState::Common,
            )
            .unwrap()
    }

    #[test]
    fn handles_go_stale_on_release() {
        let device = device();
        let mut registry = ResourceRegistry::new();
        let handle = registry.add(buffer(&device), ResourceState::Common, PixelFormat::Unknown);
        assert!(registry.is_valid(handle));
        assert_eq!(registry.release(handle), 0);
        assert!(!registry.is_valid(handle));
    }

    #[test]
    fn freed_slot_forgets_state_and_format() {
        let device = device();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);
        let mut registry = ResourceRegistry::new();
        let handle = registry.add(
            buffer(&device),
            ResourceState::Common,
            PixelFormat::Rgba8Unorm,
        );
        registry.transition(&mut list, handle, ResourceState::CopyDest);
        registry.release(handle);

        let slot = &registry.slots[0];
        assert_eq!(slot.state, ResourceState::Common);
        assert_eq!(slot.format, PixelFormat::Unknown);
    }

    #[test]
    fn freed_slot_reuse_does_not_alias_old_handle() {
        let device = device();
        let mut registry = ResourceRegistry::new();
        let old = registry.add(buffer(&device), ResourceState::Common, PixelFormat::Unknown);
        registry.release(old);
        let new = registry.add(buffer(&device), ResourceState::Common, PixelFormat::Unknown);
        assert_ne!(old, new);
        assert!(registry.is_valid(new));
        assert!(!registry.is_valid(old));
    }

    #[test]
    fn refcount_defers_destruction() {
        let device = device();
        let mut registry = ResourceRegistry::new();
        let handle = registry.add(buffer(&device), ResourceState::Common, PixelFormat::Unknown);
        assert_eq!(registry.add_ref(handle), 2);
        assert_eq!(registry.release(handle), 1);
        assert!(registry.is_valid(handle));
        assert_eq!(registry.release(handle), 0);
        assert!(!registry.is_valid(handle));
        assert_eq!(device.live_resource_count(), 0);
    }

    #[test]
    #[should_panic(expected = "registry is full")]
    fn table_overflow_traps() {
        let device = device();
        let mut registry = ResourceRegistry::new();
        for _ in 0..=MAX_RESOURCES {
            registry.add(buffer(&device), ResourceState::Common, PixelFormat::Unknown);
        }
    }

    #[test]
    fn transition_is_idempotent() {
        let device = device();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);
        let mut registry = ResourceRegistry::new();
        let handle = registry.add(buffer(&device), ResourceState::Common, PixelFormat::Unknown);
        let id = registry.get(handle).id();

        registry.transition(&mut list, handle, ResourceState::CopyDest);
        registry.transition(&mut list, handle, ResourceState::CopyDest);
        registry.transition(&mut list, handle, ResourceState::GenericRead);
        list.close();

        let queue = device.create_command_queue();
        queue.execute(&mut list);
        assert_eq!(
            queue.executed(),
            vec![
                Command::Transition {
                    resource: id,
                    from: ResourceState::Common,
                    to: ResourceState::CopyDest,
                },
                Command::Transition {
                    resource: id,
                    from: ResourceState::CopyDest,
                    to: ResourceState::GenericRead,
                },
            ]
        );
    }

    #[test]
    #[should_panic(expected = "stale or invalid")]
    fn stale_handle_access_traps() {
        let device = device();
        let mut registry = ResourceRegistry::new();
        let handle = registry.add(buffer(&device), ResourceState::Common, PixelFormat::Unknown);
        registry.release(handle);
        registry.get(handle);
    }
}
