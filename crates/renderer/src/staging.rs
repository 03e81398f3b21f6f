//! Host writes into allocator-owned buffers.

use ash::vk;

use blackhole_rhi::{DeviceApi, RhiError};

use crate::error::{RenderError, RenderResult};
use crate::resource::Buffer;

/// Copies `data` into `buffer` starting `offset` bytes into the buffer.
///
/// The buffer must live in host-visible memory. Non-coherent memory is
/// mapped and flushed in whole atoms before unmapping.
pub fn write_buffer<D: DeviceApi + ?Sized>(
    device: &D,
    buffer: &Buffer,
    offset: vk::DeviceSize,
    data: &[u8],
) -> RenderResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    if !buffer.is_host_visible() {
        return Err(RenderError::InvalidState {
            operation: "write_buffer",
            state: "the buffer is not host visible",
        });
    }

    let size = data.len() as vk::DeviceSize;
    if offset + size > buffer.size() {
        return Err(RenderError::CapacityExceeded {
            what: "staging buffer",
            capacity: buffer.size() as usize,
            requested: (offset + size) as usize,
        });
    }

    let memory = buffer.memory();
    if memory == vk::DeviceMemory::null() {
        return Err(RhiError::InvalidHandle(format!("{} has no memory", buffer.name())).into());
    }

    let memory_offset = buffer.memory_offset() + offset;
    let coherent = buffer.is_host_coherent();
    let (map_offset, map_size) = if coherent {
        (memory_offset, size)
    } else {
        atom_range(
            memory_offset,
            size,
            device.non_coherent_atom_size(),
            buffer.memory_size(),
        )
    };

    let ptr = device.map_memory(memory, map_offset, map_size)?;
    // SAFETY: the mapping starts at or before `memory_offset` and covers the
    // written bytes; it does not overlap `data`.
    unsafe {
        let dst = ptr.add((memory_offset - map_offset) as usize);
        std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
    }

    let flushed = if coherent {
        Ok(())
    } else {
        device.flush_memory(memory, map_offset, map_size)
    };
    device.unmap_memory(memory);
    flushed?;

    Ok(())
}

/// Widens `offset..offset + size` to whole multiples of `atom`, clamped to
/// the end of the allocation.
fn atom_range(
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    atom: vk::DeviceSize,
    memory_size: vk::DeviceSize,
) -> (vk::DeviceSize, vk::DeviceSize) {
    let atom = atom.max(1);
    let start = offset / atom * atom;
    let end = (offset + size).div_ceil(atom) * atom;
    let end = end.min(memory_size.max(offset + size));
    (start, end - start)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::allocator::{GpuAllocator, MemoryPolicy};
    use crate::resource::CreateBufferInfo;
    use blackhole_rhi::mock::MockDevice;

    #[test]
    fn test_write_lands_at_buffer_offset() {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device.clone());
        allocator
            .add_buffer(
                &CreateBufferInfo::new("first", 16, vk::BufferUsageFlags::TRANSFER_SRC),
                MemoryPolicy::HOST_VISIBLE,
            )
            .unwrap();
        let second = allocator
            .add_buffer(
                &CreateBufferInfo::new("second", 16, vk::BufferUsageFlags::TRANSFER_SRC),
                MemoryPolicy::HOST_VISIBLE,
            )
            .unwrap();
        allocator.present_resources().unwrap();

        let buffer = allocator.buffer(second).unwrap();
        write_buffer(device.as_ref(), buffer, 4, &[9, 8, 7]).unwrap();

        let bytes = device
            .read_memory(buffer.memory(), buffer.memory_offset() + 4, 3)
            .unwrap();
        assert_eq!(bytes, vec![9, 8, 7]);
    }

    #[test]
    fn test_write_rejects_device_local_and_overflow() {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device.clone());
        let local = allocator
            .add_buffer(
                &CreateBufferInfo::new("local", 16, vk::BufferUsageFlags::STORAGE_BUFFER),
                MemoryPolicy::DEVICE_LOCAL,
            )
            .unwrap();
        let staging = allocator
            .add_buffer(
                &CreateBufferInfo::new("staging", 16, vk::BufferUsageFlags::TRANSFER_SRC),
                MemoryPolicy::HOST_VISIBLE,
            )
            .unwrap();
        allocator.present_resources().unwrap();

        let local = allocator.buffer(local).unwrap();
        assert!(matches!(
            write_buffer(device.as_ref(), local, 0, &[1]),
            Err(RenderError::InvalidState { .. })
        ));

        let staging = allocator.buffer(staging).unwrap();
        assert!(matches!(
            write_buffer(device.as_ref(), staging, 8, &[0; 9]),
            Err(RenderError::CapacityExceeded { requested: 17, .. })
        ));
    }

    #[test]
    fn test_atom_range() {
        assert_eq!(atom_range(4, 3, 64, 1024), (0, 64));
        assert_eq!(atom_range(64, 64, 64, 1024), (64, 64));
        assert_eq!(atom_range(100, 100, 64, 1024), (64, 192));
        // The last atom is cut at the end of the allocation.
        assert_eq!(atom_range(1000, 10, 64, 1010), (960, 50));
    }

    #[test]
    fn test_non_coherent_flush_is_atom_aligned() {
        let device = Arc::new(MockDevice::with_memory_types(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]));
        let mut allocator = GpuAllocator::new(device.clone());
        allocator
            .add_buffer(
                &CreateBufferInfo::new("first", 100, vk::BufferUsageFlags::TRANSFER_SRC),
                MemoryPolicy::HOST_VISIBLE,
            )
            .unwrap();
        let second = allocator
            .add_buffer(
                &CreateBufferInfo::new("second", 37, vk::BufferUsageFlags::TRANSFER_SRC),
                MemoryPolicy::HOST_VISIBLE,
            )
            .unwrap();
        allocator.present_resources().unwrap();

        let buffer = allocator.buffer(second).unwrap();
        assert!(!buffer.is_host_coherent());
        write_buffer(device.as_ref(), buffer, 4, &[9, 8, 7]).unwrap();
        write_buffer(device.as_ref(), buffer, 30, &[1; 7]).unwrap();

        let atom = device.non_coherent_atom_size();
        let flushes = device.flushes();
        assert_eq!(flushes.len(), 2);
        for (offset, size) in flushes {
            assert_eq!(offset % atom, 0);
            assert!(size % atom == 0 || offset + size == buffer.memory_size());
            assert!(offset <= buffer.memory_offset());
        }

        let bytes = device
            .read_memory(buffer.memory(), buffer.memory_offset() + 4, 3)
            .unwrap();
        assert_eq!(bytes, vec![9, 8, 7]);
        let tail = device
            .read_memory(buffer.memory(), buffer.memory_offset() + 30, 7)
            .unwrap();
        assert_eq!(tail, vec![1; 7]);
    }

    #[test]
    fn test_coherent_memory_is_not_flushed() {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device.clone());
        let staging = allocator
            .add_buffer(
                &CreateBufferInfo::new("staging", 16, vk::BufferUsageFlags::TRANSFER_SRC),
                MemoryPolicy::HOST_VISIBLE,
            )
            .unwrap();
        allocator.present_resources().unwrap();

        write_buffer(device.as_ref(), allocator.buffer(staging).unwrap(), 1, &[5]).unwrap();
        assert!(device.flushes().is_empty());
    }
}
