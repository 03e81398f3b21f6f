//! Meshes and acceleration structures for the ray-query variant.
//!
//! All storage goes through the pass's [`GpuAllocator`]:
//!
//! ```text
//! allocate_resources  load OBJ + texture, query build sizes,
//!                     declare geometry, texture, AS storage and scratch buffers
//! init                create BLAS/TLAS objects, write geometry and instances
//! first frame         upload textures, build every BLAS, then the TLAS
//! ```
//!
//! Geometry lives in host-visible memory and is written before the first
//! submission, so no transfer is needed for it.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};

use blackhole_core::MeshConfig;
use blackhole_resources::{ObjMesh, Rgba8Image};
use blackhole_rhi::command::CommandBuffer;
use blackhole_rhi::debug::{LabelGuard, colors};
use blackhole_rhi::device::Device;

use crate::allocator::{GpuAllocator, MemoryPolicy, align_up};
use crate::barrier::{image_barrier, memory_barrier};
use crate::error::RenderResult;
use crate::passes::common::{SHADER_READ, TRANSFER_WRITE, capacity_check};
use crate::resource::{BufferId, CreateBufferInfo, CreateImageInfo, ImageId};
use crate::staging::write_buffer;

/// Slots in the mesh texture array binding.
pub const MESH_TEXTURE_CAPACITY: usize = 8;

/// Largest `minAccelerationStructureScratchOffsetAlignment` allowed by Vulkan.
const SCRATCH_ALIGNMENT: vk::DeviceSize = 256;

const POSITION_STRIDE: vk::DeviceSize = 3 * std::mem::size_of::<f32>() as vk::DeviceSize;

const OWNER: &str = "BlackHolePass";

/// One entry of the TLAS instance buffer, laid out like
/// `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct TlasInstance {
    transform: [f32; 12],
    custom_index_and_mask: u32,
    sbt_offset_and_flags: u32,
    blas_address: u64,
}

impl TlasInstance {
    fn new(index: u32, transform: [f32; 12], blas_address: vk::DeviceAddress) -> Self {
        let flags = vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw();
        Self {
            transform,
            custom_index_and_mask: (index & 0x00ff_ffff) | (0xff << 24),
            sbt_offset_and_flags: flags << 24,
            blas_address,
        }
    }
}

/// Device addresses of one mesh's buffers, indexed by instance custom index.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct InstanceData {
    pub positions: u64,
    pub indices: u64,
    pub tex_coords: u64,
    pub tex_coord_indices: u64,
}

struct MeshResources {
    name: String,
    mesh: ObjMesh,
    texture: Rgba8Image,
    transform: [f32; 12],
    positions: BufferId,
    indices: BufferId,
    tex_coords: BufferId,
    tex_coord_indices: BufferId,
    texture_image: ImageId,
    texture_staging: BufferId,
    blas_storage: BufferId,
    blas_scratch: BufferId,
    blas_size: vk::DeviceSize,
    blas: vk::AccelerationStructureKHR,
}

/// Meshes, their textures and the acceleration structures built over them.
pub struct SceneGeometry {
    meshes: Vec<MeshResources>,
    instances: BufferId,
    instance_data: BufferId,
    tlas_storage: BufferId,
    tlas_scratch: BufferId,
    tlas_size: vk::DeviceSize,
    tlas: vk::AccelerationStructureKHR,
    device: Option<Arc<Device>>,
}

impl SceneGeometry {
    /// Loads every configured mesh and declares its storage.
    ///
    /// # Errors
    ///
    /// Fails with `CapacityExceeded` when more meshes are configured than the
    /// texture array holds, or if an asset cannot be loaded.
    pub fn declare(
        allocator: &mut GpuAllocator<Device>,
        configs: &[MeshConfig],
    ) -> RenderResult<Self> {
        capacity_check("mesh texture array", MESH_TEXTURE_CAPACITY, configs.len())?;
        let device = Arc::clone(allocator.device());
        let loader = device.acceleration_structure()?;

        let mut meshes = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let mesh = ObjMesh::load(&config.obj)?;
            let texture = Rgba8Image::load(&config.texture)?;
            let name = format!("{}::Mesh{}", OWNER, index);

            let geometry = triangles_geometry(&mesh, 0, 0);
            let sizes = build_sizes(
                loader,
                vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
                &geometry,
                mesh.triangle_count() as u32,
            );

            let input_usage = vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
            let mut host_buffer = |suffix: &str, bytes: usize| {
                allocator.add_buffer(
                    &CreateBufferInfo::new(
                        format!("{}::{}", name, suffix),
                        buffer_size(bytes),
                        input_usage,
                    ),
                    MemoryPolicy::HOST_VISIBLE,
                )
            };
            let positions = host_buffer("Positions", std::mem::size_of_val(mesh.positions.as_slice()))?;
            let indices = host_buffer("Indices", std::mem::size_of_val(mesh.indices.as_slice()))?;
            let tex_coords = host_buffer("TexCoords", std::mem::size_of_val(mesh.tex_coords.as_slice()))?;
            let tex_coord_indices = host_buffer(
                "TexCoordIndices",
                std::mem::size_of_val(mesh.tex_coord_indices.as_slice()),
            )?;

            let texture_staging = allocator.add_buffer(
                &CreateBufferInfo::new(
                    format!("{}::TextureStaging", name),
                    buffer_size(texture.byte_size()),
                    vk::BufferUsageFlags::TRANSFER_SRC,
                ),
                MemoryPolicy::HOST_VISIBLE,
            )?;
            let texture_image = allocator.add_image(
                &CreateImageInfo::new_2d(
                    format!("{}::Texture", name),
                    texture.width,
                    texture.height,
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                ),
                MemoryPolicy::DEVICE_LOCAL,
            )?;

            let (blas_storage, blas_scratch) = declare_structure_buffers(allocator, &name, "Blas", &sizes)?;

            debug!(
                "{}: {} vertices, {} triangles, BLAS {} bytes",
                name,
                mesh.vertex_count(),
                mesh.triangle_count(),
                sizes.acceleration_structure_size
            );

            meshes.push(MeshResources {
                name,
                mesh,
                texture,
                transform: config.transform,
                positions,
                indices,
                tex_coords,
                tex_coord_indices,
                texture_image,
                texture_staging,
                blas_storage,
                blas_scratch,
                blas_size: sizes.acceleration_structure_size,
                blas: vk::AccelerationStructureKHR::null(),
            });
        }

        let instance_count = meshes.len();
        let instances = allocator.add_buffer(
            &CreateBufferInfo::new(
                format!("{}::TlasInstances", OWNER),
                buffer_size(instance_count * std::mem::size_of::<TlasInstance>()),
                vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            ),
            MemoryPolicy::HOST_VISIBLE,
        )?;
        let instance_data = allocator.add_buffer(
            &CreateBufferInfo::new(
                format!("{}::InstanceData", OWNER),
                buffer_size(instance_count * std::mem::size_of::<InstanceData>()),
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            ),
            MemoryPolicy::HOST_VISIBLE,
        )?;

        let tlas_geometry = instances_geometry(0);
        let tlas_sizes = build_sizes(
            loader,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            &tlas_geometry,
            instance_count as u32,
        );
        let (tlas_storage, tlas_scratch) =
            declare_structure_buffers(allocator, OWNER, "Tlas", &tlas_sizes)?;

        info!("Declared {} mesh(es) for ray queries", instance_count);

        Ok(Self {
            meshes,
            instances,
            instance_data,
            tlas_storage,
            tlas_scratch,
            tlas_size: tlas_sizes.acceleration_structure_size,
            tlas: vk::AccelerationStructureKHR::null(),
            device: None,
        })
    }

    /// Creates the acceleration structure objects and writes every host-side input.
    pub fn create(
        &mut self,
        device: &Arc<Device>,
        allocator: &GpuAllocator<Device>,
    ) -> RenderResult<()> {
        let loader = device.acceleration_structure()?;
        self.device = Some(Arc::clone(device));

        let mut tlas_instances = Vec::with_capacity(self.meshes.len());
        let mut instance_data = Vec::with_capacity(self.meshes.len());

        for (index, mesh) in (0u32..).zip(self.meshes.iter_mut()) {
            let storage = allocator.buffer(mesh.blas_storage)?;
            mesh.blas = create_structure(
                loader,
                storage.handle(),
                mesh.blas_size,
                vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            )?;
            blackhole_rhi::debug::name_object(device.as_ref(), mesh.blas, &format!("{}::Blas", mesh.name));

            let upload = |id: BufferId, bytes: &[u8]| -> RenderResult<u64> {
                let buffer = allocator.buffer(id)?;
                write_buffer(device.as_ref(), buffer, 0, bytes)?;
                Ok(device.buffer_device_address(buffer.handle()))
            };
            instance_data.push(InstanceData {
                positions: upload(mesh.positions, bytemuck::cast_slice(&mesh.mesh.positions))?,
                indices: upload(mesh.indices, bytemuck::cast_slice(&mesh.mesh.indices))?,
                tex_coords: upload(mesh.tex_coords, bytemuck::cast_slice(&mesh.mesh.tex_coords))?,
                tex_coord_indices: upload(
                    mesh.tex_coord_indices,
                    bytemuck::cast_slice(&mesh.mesh.tex_coord_indices),
                )?,
            });
            write_buffer(
                device.as_ref(),
                allocator.buffer(mesh.texture_staging)?,
                0,
                &mesh.texture.pixels,
            )?;

            let blas_address = unsafe {
                loader.get_acceleration_structure_device_address(
                    &vk::AccelerationStructureDeviceAddressInfoKHR::default()
                        .acceleration_structure(mesh.blas),
                )
            };
            tlas_instances.push(TlasInstance::new(index, mesh.transform, blas_address));
        }

        write_buffer(
            device.as_ref(),
            allocator.buffer(self.instances)?,
            0,
            bytemuck::cast_slice(&tlas_instances),
        )?;
        write_buffer(
            device.as_ref(),
            allocator.buffer(self.instance_data)?,
            0,
            bytemuck::cast_slice(&instance_data),
        )?;

        let storage = allocator.buffer(self.tlas_storage)?;
        self.tlas = create_structure(
            loader,
            storage.handle(),
            self.tlas_size,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        )?;
        blackhole_rhi::debug::name_object(device.as_ref(), self.tlas, &format!("{}::Tlas", OWNER));

        debug!("Created {} BLAS and one TLAS", self.meshes.len());
        Ok(())
    }

    /// Records the texture uploads and the acceleration structure builds.
    pub fn record_build(
        &self,
        cmd: &CommandBuffer,
        allocator: &mut GpuAllocator<Device>,
    ) -> RenderResult<()> {
        let _label = LabelGuard::new(cmd, "BlackHolePass::BuildScene", colors::UPLOAD);
        let device = Arc::clone(allocator.device());

        memory_barrier(
            cmd,
            vk::PipelineStageFlags::HOST,
            vk::AccessFlags::HOST_WRITE,
            vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::SHADER_READ,
        );

        for mesh in &self.meshes {
            image_barrier(cmd, allocator.image_mut(mesh.texture_image)?, TRANSFER_WRITE, None);
            let image = allocator.image(mesh.texture_image)?;
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: image.extent(),
            };
            cmd.copy_buffer_to_image(
                allocator.buffer(mesh.texture_staging)?.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            image_barrier(cmd, allocator.image_mut(mesh.texture_image)?, SHADER_READ, None);
        }

        let address = |id: BufferId| -> RenderResult<vk::DeviceAddress> {
            Ok(device.buffer_device_address(allocator.buffer(id)?.handle()))
        };

        let geometries = self
            .meshes
            .iter()
            .map(|mesh| {
                Ok(triangles_geometry(
                    &mesh.mesh,
                    address(mesh.positions)?,
                    address(mesh.indices)?,
                ))
            })
            .collect::<RenderResult<Vec<_>>>()?;
        let mut infos = Vec::with_capacity(self.meshes.len());
        for (mesh, geometry) in self.meshes.iter().zip(&geometries) {
            infos.push(
                build_info(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL, std::slice::from_ref(geometry))
                    .dst_acceleration_structure(mesh.blas)
                    .scratch_data(vk::DeviceOrHostAddressKHR {
                        device_address: align_up(address(mesh.blas_scratch)?, SCRATCH_ALIGNMENT),
                    }),
            );
        }
        let ranges: Vec<[vk::AccelerationStructureBuildRangeInfoKHR; 1]> = self
            .meshes
            .iter()
            .map(|mesh| {
                [vk::AccelerationStructureBuildRangeInfoKHR::default()
                    .primitive_count(mesh.mesh.triangle_count() as u32)]
            })
            .collect();
        let range_refs: Vec<&[vk::AccelerationStructureBuildRangeInfoKHR]> =
            ranges.iter().map(|range| range.as_slice()).collect();
        cmd.build_acceleration_structures(&infos, &range_refs)?;

        memory_barrier(
            cmd,
            vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
            vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR,
        );

        let tlas_geometry = instances_geometry(address(self.instances)?);
        let tlas_info = build_info(
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            std::slice::from_ref(&tlas_geometry),
        )
        .dst_acceleration_structure(self.tlas)
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: align_up(address(self.tlas_scratch)?, SCRATCH_ALIGNMENT),
        });
        let tlas_range = [vk::AccelerationStructureBuildRangeInfoKHR::default()
            .primitive_count(self.meshes.len() as u32)];
        cmd.build_acceleration_structures(&[tlas_info], &[&tlas_range])?;

        memory_barrier(
            cmd,
            vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR,
        );

        info!("Recorded builds of {} BLAS and one TLAS", self.meshes.len());
        Ok(())
    }

    #[inline]
    pub fn tlas(&self) -> vk::AccelerationStructureKHR {
        self.tlas
    }

    /// Texture images in instance order.
    pub fn textures(&self) -> Vec<ImageId> {
        self.meshes.iter().map(|mesh| mesh.texture_image).collect()
    }

    pub fn instance_data(&self) -> BufferId {
        self.instance_data
    }

    /// Destroys the acceleration structures. Their storage stays with the allocator.
    pub fn destroy(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        let Ok(loader) = device.acceleration_structure() else {
            return;
        };
        for mesh in &mut self.meshes {
            if mesh.blas != vk::AccelerationStructureKHR::null() {
                unsafe { loader.destroy_acceleration_structure(mesh.blas, None) };
                mesh.blas = vk::AccelerationStructureKHR::null();
            }
        }
        if self.tlas != vk::AccelerationStructureKHR::null() {
            unsafe { loader.destroy_acceleration_structure(self.tlas, None) };
            self.tlas = vk::AccelerationStructureKHR::null();
        }
        debug!("Destroyed acceleration structures");
    }
}

impl Drop for SceneGeometry {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Buffers may not be empty; meshes without texture coordinates still get one.
fn buffer_size(bytes: usize) -> vk::DeviceSize {
    (bytes as vk::DeviceSize).max(4)
}

fn declare_structure_buffers(
    allocator: &mut GpuAllocator<Device>,
    owner: &str,
    kind: &str,
    sizes: &vk::AccelerationStructureBuildSizesInfoKHR<'_>,
) -> RenderResult<(BufferId, BufferId)> {
    let storage = allocator.add_buffer(
        &CreateBufferInfo::new(
            format!("{}::{}Storage", owner, kind),
            sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        ),
        MemoryPolicy::DEVICE_LOCAL,
    )?;
    let scratch = allocator.add_buffer(
        &CreateBufferInfo::new(
            format!("{}::{}Scratch", owner, kind),
            sizes.build_scratch_size + SCRATCH_ALIGNMENT,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        ),
        MemoryPolicy::DEVICE_LOCAL,
    )?;
    Ok((storage, scratch))
}

fn triangles_geometry(
    mesh: &ObjMesh,
    positions: vk::DeviceAddress,
    indices: vk::DeviceAddress,
) -> vk::AccelerationStructureGeometryKHR<'static> {
    let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
        .vertex_format(vk::Format::R32G32B32_SFLOAT)
        .vertex_data(vk::DeviceOrHostAddressConstKHR {
            device_address: positions,
        })
        .vertex_stride(POSITION_STRIDE)
        .max_vertex(mesh.vertex_count().saturating_sub(1) as u32)
        .index_type(vk::IndexType::UINT32)
        .index_data(vk::DeviceOrHostAddressConstKHR {
            device_address: indices,
        });

    vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
}

fn instances_geometry(instances: vk::DeviceAddress) -> vk::AccelerationStructureGeometryKHR<'static> {
    let data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
        .array_of_pointers(false)
        .data(vk::DeviceOrHostAddressConstKHR {
            device_address: instances,
        });

    vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR { instances: data })
}

fn build_info<'a>(
    ty: vk::AccelerationStructureTypeKHR,
    geometries: &'a [vk::AccelerationStructureGeometryKHR<'a>],
) -> vk::AccelerationStructureBuildGeometryInfoKHR<'a> {
    vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(ty)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(geometries)
}

fn build_sizes(
    loader: &ash::khr::acceleration_structure::Device,
    ty: vk::AccelerationStructureTypeKHR,
    geometry: &vk::AccelerationStructureGeometryKHR<'_>,
    primitive_count: u32,
) -> vk::AccelerationStructureBuildSizesInfoKHR<'static> {
    let info = build_info(ty, std::slice::from_ref(geometry));
    let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
    unsafe {
        loader.get_acceleration_structure_build_sizes(
            vk::AccelerationStructureBuildTypeKHR::DEVICE,
            &info,
            &[primitive_count],
            &mut sizes,
        );
    }
    sizes
}

fn create_structure(
    loader: &ash::khr::acceleration_structure::Device,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    ty: vk::AccelerationStructureTypeKHR,
) -> RenderResult<vk::AccelerationStructureKHR> {
    let create_info = vk::AccelerationStructureCreateInfoKHR::default()
        .buffer(buffer)
        .size(size)
        .ty(ty);
    Ok(unsafe { loader.create_acceleration_structure(&create_info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_layout_matches_vulkan() {
        assert_eq!(
            std::mem::size_of::<TlasInstance>(),
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>()
        );
        assert_eq!(std::mem::size_of::<InstanceData>(), 32);
    }

    #[test]
    fn test_instance_packing() {
        let instance = TlasInstance::new(3, [0.0; 12], 0xdead_beef);
        assert_eq!(instance.custom_index_and_mask & 0x00ff_ffff, 3);
        assert_eq!(instance.custom_index_and_mask >> 24, 0xff);
        assert_eq!(
            instance.sbt_offset_and_flags >> 24,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw()
        );
        assert_eq!(instance.blas_address, 0xdead_beef);
    }

    #[test]
    fn test_empty_buffers_get_minimum_size() {
        assert_eq!(buffer_size(0), 4);
        assert_eq!(buffer_size(96), 96);
    }
}
