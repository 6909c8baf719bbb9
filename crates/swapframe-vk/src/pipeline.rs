// SPDX-License-Identifier: CEPL-1.0
//! Render pass, graphics pipeline and framebuffers: everything that depends on
//! the swapchain's format and extent.
use std::io::Cursor;

use ash::util::read_spv;
use ash::vk;
use swapframe_render::ShaderSource;
use tracing::debug;

use crate::error::{GraphicsError, Result, VkResultExt};
use crate::geometry::Vertex;
use crate::swapchain::Swapchain;

const SHADER_ENTRY: &std::ffi::CStr = c"main";

/// SPIR-V words for both stages, parsed once and reused on every rebuild.
#[derive(Clone, Debug)]
pub struct ShaderCode {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderCode {
    pub fn from_source(source: &dyn ShaderSource) -> Result<Self> {
        Ok(ShaderCode {
            vertex: parse_spirv("vertex", source.vertex_spirv())?,
            fragment: parse_spirv("fragment", source.fragment_spirv())?,
        })
    }
}

fn parse_spirv(stage: &'static str, bytes: &[u8]) -> Result<Vec<u32>> {
    read_spv(&mut Cursor::new(bytes)).map_err(|source| GraphicsError::InvalidShader { stage, source })
}

pub struct RenderTargets {
    device: ash::Device,
    pub(crate) render_pass: vk::RenderPass,
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
    layout: vk::PipelineLayout,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) framebuffers: Vec<vk::Framebuffer>,
}

impl RenderTargets {
    /// Builds render pass, shader modules, pipeline and one framebuffer per
    /// swapchain view, in that order.
    pub fn new(device: &ash::Device, chain: &Swapchain, shaders: &ShaderCode) -> Result<Self> {
        let mut this = RenderTargets {
            device: device.clone(),
            render_pass: vk::RenderPass::null(),
            vert: vk::ShaderModule::null(),
            frag: vk::ShaderModule::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            framebuffers: Vec::new(),
        };

        unsafe {
            this.render_pass = create_render_pass(device, chain.format)?;
            this.vert = create_shader_module(device, &shaders.vertex)?;
            this.frag = create_shader_module(device, &shaders.fragment)?;

            // Empty layout: no descriptor sets, no push constants.
            let layout_info = vk::PipelineLayoutCreateInfo::default();
            this.layout = device
                .create_pipeline_layout(&layout_info, None)
                .context("vkCreatePipelineLayout")?;

            this.pipeline = create_pipeline(
                device,
                this.render_pass,
                this.layout,
                this.vert,
                this.frag,
                chain.extent,
            )?;

            this.framebuffers.reserve(chain.views.len());
            for view in &chain.views {
                let fb_info = vk::FramebufferCreateInfo {
                    render_pass: this.render_pass,
                    attachment_count: 1,
                    p_attachments: view,
                    width: chain.extent.width,
                    height: chain.extent.height,
                    layers: 1,
                    ..Default::default()
                };
                let fb = device
                    .create_framebuffer(&fb_info, None)
                    .context("vkCreateFramebuffer")?;
                this.framebuffers.push(fb);
            }
        }

        debug!(
            "render targets: {} framebuffers at {}x{}",
            this.framebuffers.len(),
            chain.extent.width,
            chain.extent.height
        );
        Ok(this)
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Destroys framebuffers, pipeline, layout, render pass and shader
    /// modules. Safe to call more than once.
    pub fn release(&mut self) {
        let d = &self.device;
        unsafe {
            for fb in self.framebuffers.drain(..) {
                d.destroy_framebuffer(fb, None);
            }
            if self.pipeline != vk::Pipeline::null() {
                d.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                d.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
            if self.render_pass != vk::RenderPass::null() {
                d.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
            for module in [&mut self.vert, &mut self.frag] {
                if *module != vk::ShaderModule::null() {
                    d.destroy_shader_module(*module, None);
                    *module = vk::ShaderModule::null();
                }
            }
        }
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        self.release();
    }
}

unsafe fn create_shader_module(device: &ash::Device, words: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        code_size: std::mem::size_of_val(words),
        p_code: words.as_ptr(),
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .context("vkCreateShaderModule")
}

unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_att = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    // The pass must not write the attachment before the previous frame's
    // acquire has released it.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let rp_info = vk::RenderPassCreateInfo {
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device
        .create_render_pass(&rp_info, None)
        .context("vkCreateRenderPass")
}

unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
    extent: vk::Extent2D,
) -> Result<vk::Pipeline> {
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::VERTEX,
            module: vert,
            p_name: SHADER_ENTRY.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: frag,
            p_name: SHADER_ENTRY.as_ptr(),
            ..Default::default()
        },
    ];

    let binding = Vertex::binding_description();
    let attributes = Vertex::attribute_descriptions();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };

    // Static viewport and scissor: the pipeline is rebuilt with the swapchain.
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };

    let raster = vk::PipelineRasterizationStateCreateInfo {
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        sample_shading_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        logic_op_enable: vk::FALSE,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        blend_constants: [0.0; 4],
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let pipelines = device
        .create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        )
        .map_err(|(_, result)| GraphicsError::Vulkan {
            op: "vkCreateGraphicsPipelines",
            result,
        })?;
    pipelines.into_iter().next().ok_or(GraphicsError::Vulkan {
        op: "vkCreateGraphicsPipelines",
        result: vk::Result::ERROR_UNKNOWN,
    })
}
