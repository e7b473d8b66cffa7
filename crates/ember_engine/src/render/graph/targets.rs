//! Pass target framebuffers owned by the frame graph

use crate::render::api::TextureFormat;
use crate::render::context::GraphicsContext;
use crate::render::framebuffer::{Framebuffer, FramebufferSpecification};
use crate::render::settings::RendererSettings;

use super::renderer::MAX_DIRECTIONAL_LIGHTS;

/// Every framebuffer the pass sequence writes or samples
///
/// Viewport-sized targets resize with the viewport; shadow maps keep their
/// configured resolution. The bloom chain halves dimensions per level.
pub struct RenderGraphData {
    /// G-buffer: albedo, normals, metallic/roughness/AO, emission + depth
    pub geometry_target: Framebuffer,
    /// HDR lighting result
    pub lighting_target: Framebuffer,
    /// One depth-only shadow map per directional light slot
    pub shadow_targets: Vec<Framebuffer>,
    /// Bloom prefilter output (half resolution)
    pub prefiltered: Framebuffer,
    /// Horizontal-blur scratch targets, one per bloom level
    pub temp_blur: Vec<Framebuffer>,
    /// Down-sample chain outputs, one per bloom level
    pub downsampled: Vec<Framebuffer>,
    /// Up-sample chain outputs; index 0 is what composite samples
    pub upsampled: Vec<Framebuffer>,
    /// FXAA output
    pub fxaa_target: Framebuffer,
    /// Final composite output, handed back to the embedding layer
    pub composite_target: Framebuffer,
    blur_levels: usize,
}

fn color_spec(name: &str, width: u32, height: u32, formats: &[TextureFormat]) -> FramebufferSpecification {
    FramebufferSpecification {
        width,
        height,
        attachments: formats.to_vec(),
        name: name.to_owned(),
        ..Default::default()
    }
}

fn bloom_dims(width: u32, height: u32, level: usize) -> (u32, u32) {
    ((width >> (level + 1)).max(1), (height >> (level + 1)).max(1))
}

impl RenderGraphData {
    /// Create all pass targets for an initial viewport size
    pub fn new(ctx: &mut GraphicsContext, width: u32, height: u32, settings: &RendererSettings) -> Self {
        let blur_levels = settings.bloom.levels.max(2);
        let hdr = [TextureFormat::R11G11B10Float];

        let geometry_target = Framebuffer::new(
            ctx,
            color_spec(
                "geometry pass",
                width,
                height,
                &[
                    TextureFormat::Rgba8Unorm,
                    TextureFormat::Rgba16Float,
                    TextureFormat::Rgba8Unorm,
                    TextureFormat::R11G11B10Float,
                    TextureFormat::Depth24Stencil8,
                ],
            ),
        );
        let lighting_target = Framebuffer::new(ctx, color_spec("lighting pass", width, height, &hdr));

        let shadow_targets = (0..MAX_DIRECTIONAL_LIGHTS)
            .map(|i| {
                Framebuffer::new(
                    ctx,
                    FramebufferSpecification {
                        width: settings.shadow_map_resolution,
                        height: settings.shadow_map_resolution,
                        attachments: vec![TextureFormat::Depth32Float],
                        name: format!("shadow map {i}"),
                        ..Default::default()
                    },
                )
            })
            .collect();

        let (pw, ph) = bloom_dims(width, height, 0);
        let prefiltered = Framebuffer::new(ctx, color_spec("bloom prefilter", pw, ph, &hdr));
        let mut temp_blur = Vec::with_capacity(blur_levels);
        let mut downsampled = Vec::with_capacity(blur_levels);
        let mut upsampled = Vec::with_capacity(blur_levels);
        for level in 0..blur_levels {
            let (w, h) = bloom_dims(width, height, level);
            temp_blur.push(Framebuffer::new(ctx, color_spec(&format!("bloom blur {level}"), w, h, &hdr)));
            downsampled
                .push(Framebuffer::new(ctx, color_spec(&format!("bloom down {level}"), w, h, &hdr)));
            upsampled.push(Framebuffer::new(ctx, color_spec(&format!("bloom up {level}"), w, h, &hdr)));
        }

        let fxaa_target = Framebuffer::new(ctx, color_spec("fxaa pass", width, height, &hdr));
        let composite_target =
            Framebuffer::new(ctx, color_spec("composite pass", width, height, &[TextureFormat::Rgba8Unorm]));

        Self {
            geometry_target,
            lighting_target,
            shadow_targets,
            prefiltered,
            temp_blur,
            downsampled,
            upsampled,
            fxaa_target,
            composite_target,
            blur_levels,
        }
    }

    /// Number of bloom levels the chain was built with
    pub fn blur_levels(&self) -> usize {
        self.blur_levels
    }

    /// Resize every viewport-sized target
    ///
    /// Shadow maps are excluded; their resolution is a setting, not a
    /// function of the viewport.
    pub fn resize(&mut self, ctx: &mut GraphicsContext, width: u32, height: u32) {
        self.geometry_target.resize(ctx, width, height);
        self.lighting_target.resize(ctx, width, height);
        self.fxaa_target.resize(ctx, width, height);
        self.composite_target.resize(ctx, width, height);

        let (pw, ph) = bloom_dims(width, height, 0);
        self.prefiltered.resize(ctx, pw, ph);
        for level in 0..self.blur_levels {
            let (w, h) = bloom_dims(width, height, level);
            self.temp_blur[level].resize(ctx, w, h);
            self.downsampled[level].resize(ctx, w, h);
            self.upsampled[level].resize(ctx, w, h);
        }
    }

    /// Release every attachment of every target
    pub fn release(&mut self, ctx: &mut GraphicsContext) {
        self.geometry_target.release_attachments(ctx);
        self.lighting_target.release_attachments(ctx);
        for target in &mut self.shadow_targets {
            target.release_attachments(ctx);
        }
        self.prefiltered.release_attachments(ctx);
        for target in self.temp_blur.iter_mut().chain(&mut self.downsampled).chain(&mut self.upsampled) {
            target.release_attachments(ctx);
        }
        self.fxaa_target.release_attachments(ctx);
        self.composite_target.release_attachments(ctx);
    }
}
