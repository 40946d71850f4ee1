use vulkanalia::{
    prelude::v1_0::*,
    loader::{LibloadingLoader, LIBRARY},
};

use anyhow::{anyhow, Result};
use log::*;
use caliban_alloc::{Allocator, AllocatorConfig, MemoryUse, PlacementRequirements};

/// Sizes of the buffers placed by the demo: many small buffers
/// and one larger than a region.
const BUFFER_SIZES: &[u64] = &[256, 1024, 4096, 64 * 1024, 1024 * 1024, 32 * 1024 * 1024];

fn main() -> Result<()> {
    std::env::set_var("RUST_LOG", "info");
    pretty_env_logger::init();

    // Vulkan entry point
    let loader = unsafe { LibloadingLoader::new(LIBRARY)? };
    let entry = unsafe { Entry::new(loader) }.map_err(|b| anyhow!("{}", b))?;

    // Application info
    let application_info = vk::ApplicationInfo::builder()
        .application_name(b"buffer-alloc\0")
        .application_version(vk::make_version(1, 0, 0))
        .api_version(vk::make_version(1, 0, 0));

    let info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info);

    // Vulkan instance
    let instance = unsafe { entry.create_instance(&info, None)? };

    // Physical device: the first one with a graphics queue.
    let (physical_device, graphics_queue) = unsafe { instance.enumerate_physical_devices()? }
        .into_iter()
        .find_map(|physical_device| {
            let properties = unsafe {
                instance.get_physical_device_queue_family_properties(physical_device)
            };
            properties
                .iter()
                .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|index| (physical_device, index as u32))
        })
        .ok_or(anyhow!("Failed to find a graphics device."))?;

    // Logical device
    let priorities = &[1.0];
    let graphics_queues = &[
        vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue)
            .queue_priorities(priorities)
    ];

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(graphics_queues);

    let device = unsafe { instance.create_device(physical_device, &create_info, None)? };
    info!("Created device.");

    // The allocator uses small regions here, so that the large
    // buffer has to get a region of its own.
    let config = AllocatorConfig::default().with_region_size(16 * 1024 * 1024);
    let mut allocator = Allocator::from_device(&instance, physical_device, config);

    let mut buffers = Vec::new();
    for &size in BUFFER_SIZES.iter().cycle().take(BUFFER_SIZES.len() * 4) {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };

        // The buffer is placed in one of the regions, then
        // bound to the region memory at the placement offset.
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let handle = allocator.place_for(
            &device,
            PlacementRequirements::from(requirements),
            MemoryUse::GpuOnly,
        )?;
        let memory = *allocator.memory(&handle).ok_or(anyhow!("Unknown region {}.", handle.region))?;
        unsafe { device.bind_buffer_memory(buffer, memory, handle.offset)? };

        info!("Buffer of {} bytes placed in region {} at offset {}.", size, handle.region, handle.offset);
        buffers.push((buffer, handle));
    }

    for region in allocator.regions() {
        info!(
            "Region {}: {} / {} bytes used in {} blocks.",
            region.id(),
            region.allocated(),
            region.size(),
            region.blocks().count(),
        );
    }

    // Resources are destroyed before their placement is
    // released, and every placement before the teardown.
    for (buffer, handle) in buffers {
        unsafe { device.destroy_buffer(buffer, None) };
        allocator.release(&handle)?;
    }
    allocator.teardown(&device);

    unsafe {
        device.destroy_device(None);
        instance.destroy_instance(None);
    }
    info!("Destroyed device.");

    Ok(())
}
