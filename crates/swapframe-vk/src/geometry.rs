// SPDX-License-Identifier: CEPL-1.0
//! The fixed vertex list and the host-visible buffer it lives in.
use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::device::DeviceContext;
use crate::error::{GraphicsError, Result, VkResultExt};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

impl Vertex {
    pub const fn new(pos: [f32; 2], color: [f32; 3]) -> Self {
        Self { pos, color }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

const RED: [f32; 3] = [1.0, 0.0, 0.0];
const GREEN: [f32; 3] = [0.0, 1.0, 0.0];
const BLUE: [f32; 3] = [0.0, 0.0, 1.0];

/// Two triangles side by side, the second shifted 0.6 to the right.
pub const TRIANGLE_PAIR: [Vertex; 6] = [
    Vertex::new([0.0, -0.5], RED),
    Vertex::new([0.5, 0.5], GREEN),
    Vertex::new([-0.5, 0.5], BLUE),
    Vertex::new([0.6, -0.5], RED),
    Vertex::new([1.1, 0.5], GREEN),
    Vertex::new([0.1, 0.5], BLUE),
];

/// First memory type allowed by `type_bits` whose flags include `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(GraphicsError::NoMemoryType {
            type_bits,
            required,
        })
}

/// Vertex buffer written once at creation and never again.
pub struct GeometryBuffer {
    device: ash::Device,
    pub(crate) buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    vertex_count: u32,
}

impl GeometryBuffer {
    pub fn new(ctx: &DeviceContext, vertices: &[Vertex]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let size = bytes.len() as vk::DeviceSize;

        let bci = vk::BufferCreateInfo {
            size,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe { ctx.device.create_buffer(&bci, None) }.context("vkCreateBuffer")?;

        let mut this = GeometryBuffer {
            device: ctx.device.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            vertex_count: vertices.len() as u32,
        };

        let req = unsafe { this.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = find_memory_type(
            &ctx.memory_properties,
            req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let mai = vk::MemoryAllocateInfo {
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };

        unsafe {
            this.memory = this
                .device
                .allocate_memory(&mai, None)
                .context("vkAllocateMemory")?;
            this.device
                .bind_buffer_memory(buffer, this.memory, 0)
                .context("vkBindBufferMemory")?;

            // Coherent memory: no flush needed before unmapping.
            let dst = this
                .device
                .map_memory(this.memory, 0, size, vk::MemoryMapFlags::empty())
                .context("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), bytes.len());
            this.device.unmap_memory(this.memory);
        }

        Ok(this)
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

impl Drop for GeometryBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}
