//! The multi-pass scene renderer
//!
//! Frame lifecycle: [`SceneRenderer::begin_scene`] snapshots the frame's
//! camera/skylight/lights and uploads the per-frame GPU data,
//! [`SceneRenderer::submit_mesh`] appends draw entries into a bounded arena,
//! and [`SceneRenderer::end_scene`] records the pass sequence and submits
//! the command list. Pass-level failures (a shader that has not compiled
//! yet) skip the affected pass and never propagate across pass boundaries.

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Mat4Ext, Vec3};
use crate::render::api::{BackendKind, CommandList};
use crate::render::buffer::{ConstantBuffer, IndexBuffer, StructuredBuffer, VertexBuffer};
use crate::render::context::GraphicsContext;
use crate::render::pipeline::{
    CullMode, DepthFunc, PipelineLibrary, PipelineSpecification, ShaderType, SharedPipeline,
    VertexLayout,
};
use crate::render::settings::RendererSettings;
use crate::render::api::TextureFormat;
use crate::render::{RenderError, RenderResult};
use crate::scene::{CameraData, LightKind, SceneLight, SkylightData};

use super::targets::RenderGraphData;

/// Directional light slots (each owns a shadow map)
pub const MAX_DIRECTIONAL_LIGHTS: usize = 3;
/// Point light capacity per frame
pub const MAX_POINT_LIGHTS: usize = 200;
/// Spot light capacity per frame
pub const MAX_SPOT_LIGHTS: usize = 200;

const CUBE_VERTEX_COUNT: u32 = 36;

/// Per-frame draw statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Mesh draw calls recorded by the geometry pass
    pub draw_calls: u32,
    /// Indices those draws consumed
    pub index_count: u32,
}

/// Mesh vertex consumed by the geometry and shadow pipelines
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Normal
    pub normal: [f32; 3],
    /// Texture coordinates
    pub uv: [f32; 2],
}

/// Material factors bound per draw
#[derive(Debug, Clone)]
pub struct Material {
    /// Base color (rgba)
    pub base_color: [f32; 4],
    /// Metallic factor
    pub metallic: f32,
    /// Roughness factor
    pub roughness: f32,
    /// Emissive color + intensity
    pub emissive: [f32; 4],
}

impl Material {
    /// A neutral white material
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base color
    pub fn with_color(mut self, r: f32, g: f32, b: f32) -> Self {
        self.base_color = [r, g, b, 1.0];
        self
    }

    /// Set the metallic factor
    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    /// Set the roughness factor
    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    fn constants(&self) -> MaterialConstants {
        MaterialConstants {
            base_color: self.base_color,
            emissive: self.emissive,
            factors: [self.metallic, self.roughness, 0.0, 0.0],
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: [1.0, 1.0, 1.0, 1.0],
            metallic: 0.0,
            roughness: 0.5,
            emissive: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Geometry buffers shared between draws
pub struct Geometry {
    /// Vertex stream
    pub vertex_buffer: VertexBuffer,
    /// Index stream
    pub index_buffer: IndexBuffer,
}

struct MeshDraw {
    transform: Mat4,
    material: Material,
    geometry: Rc<Geometry>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GlobalData {
    view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
    view_projection: [[f32; 4]; 4],
    camera_position: [f32; 4],
    num_directional_lights: u32,
    num_point_lights: u32,
    num_spot_lights: u32,
    _padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SkyboxData {
    view_projection: [[f32; 4]; 4],
    rotation_intensity: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DirectionalLightData {
    direction: [f32; 4],
    /// rgb: color, a: intensity
    color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PointLightData {
    /// xyz: position, w: radius
    position: [f32; 4],
    /// rgb: color, a: intensity
    color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SpotLightData {
    /// xyz: position, w: radius
    position: [f32; 4],
    /// rgb: color, a: intensity
    color: [f32; 4],
    /// xy: cos of cut-off angles
    attenuation: [f32; 4],
    direction: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MaterialConstants {
    /// Base color (rgba)
    base_color: [f32; 4],
    /// Emissive color + intensity
    emissive: [f32; 4],
    /// x: metallic, y: roughness
    factors: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BloomConstants {
    /// x: threshold, y: knee, z: 2*knee, w: 0.25/knee
    threshold: [f32; 4],
    /// x: clamp, y: mode, z: upsample stage, w: additive blend
    params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BlurConstants {
    /// x: horizontal flag
    direction: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FxaaConstants {
    /// xy: thresholds
    threshold: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CompositeConstants {
    /// x: tone-mapping curve id, y: exposure
    tonemapping: [f32; 4],
    /// rgb: color, a: intensity
    vignette_color: [f32; 4],
    /// xy: offset, z: use mask, w: enable
    vignette_offset: [f32; 4],
    /// x: bloom strength (-1 disables)
    bloom: [f32; 4],
}

struct PassPipelines {
    geometry: SharedPipeline,
    skybox: SharedPipeline,
    shadow: SharedPipeline,
    lighting: SharedPipeline,
    bloom: SharedPipeline,
    blur: SharedPipeline,
    fxaa: SharedPipeline,
    composite: SharedPipeline,
}

/// Cached parameter slot indices, resolved once at creation
struct PassSlots {
    transform: u32,
    material: u32,
    skybox_environment: u32,
    shadow_transform: u32,
    lighting_albedo: u32,
    lighting_normal: u32,
    lighting_mra: u32,
    lighting_emission: u32,
    lighting_depth: u32,
    lighting_environment: u32,
    lighting_shadow_maps: u32,
    bloom_params: u32,
    bloom_texture: u32,
    bloom_additive: u32,
    blur_params: u32,
    blur_texture: u32,
    fxaa_params: u32,
    fxaa_texture: u32,
    composite_params: u32,
    composite_texture: u32,
    composite_bloom: u32,
}

/// The frame graph: owns the context, pass targets and per-frame buffers
pub struct SceneRenderer {
    context: GraphicsContext,
    library: PipelineLibrary,
    settings: RendererSettings,
    targets: RenderGraphData,
    pipelines: PassPipelines,
    slots: PassSlots,

    global_buffer: ConstantBuffer,
    skybox_buffer: ConstantBuffer,
    shadow_buffer: ConstantBuffer,
    directional_lights: StructuredBuffer,
    point_lights: StructuredBuffer,
    spot_lights: StructuredBuffer,

    cube_vertices: VertexBuffer,
    quad: Geometry,

    meshes: Vec<MeshDraw>,
    overflow_warned: bool,
    stats: Statistics,

    camera: CameraData,
    skylight: Option<SkylightData>,
    lights: Vec<SceneLight>,
    light_counts: (usize, usize, usize),
    shadow_maps_written: usize,
    active_list: Option<CommandList>,
}

impl SceneRenderer {
    /// Create a renderer for a backend, loading pipelines from
    /// `settings.shader_dir`
    pub fn new(kind: BackendKind, settings: RendererSettings) -> RenderResult<Self> {
        let mut context = GraphicsContext::new(kind)?;
        let mut library = PipelineLibrary::new();
        let shader_dir = settings.shader_dir.clone();

        let gbuffer_formats = vec![
            TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba8Unorm,
            TextureFormat::R11G11B10Float,
        ];
        let hdr = vec![TextureFormat::R11G11B10Float];

        let geometry = library.load(
            &mut context,
            &shader_dir.join("geometry.spv"),
            PipelineSpecification {
                depth_func: Some(DepthFunc::Less),
                depth_format: TextureFormat::Depth24Stencil8,
                output_formats: gbuffer_formats.clone(),
                vertex_layout: VertexLayout::position_normal_uv(),
                parameters: vec![
                    "GlobalData".into(),
                    "DirectionalLights".into(),
                    "PointLights".into(),
                    "SpotLights".into(),
                    "Transform".into(),
                    "MaterialData".into(),
                ],
                ..Default::default()
            },
        );
        let skybox = library.load(
            &mut context,
            &shader_dir.join("skybox.spv"),
            PipelineSpecification {
                cull_mode: CullMode::Front,
                depth_format: TextureFormat::Depth24Stencil8,
                output_formats: gbuffer_formats,
                vertex_layout: VertexLayout::position(),
                parameters: vec!["SkyboxData".into(), "EnvironmentTexture".into()],
                ..Default::default()
            },
        );
        let shadow = library.load(
            &mut context,
            &shader_dir.join("shadow.spv"),
            PipelineSpecification {
                shader_type: ShaderType::Vertex,
                depth_func: Some(DepthFunc::Less),
                depth_format: TextureFormat::Depth32Float,
                vertex_layout: VertexLayout::position_normal_uv(),
                parameters: vec!["ShadowData".into(), "Transform".into()],
                ..Default::default()
            },
        );
        let lighting = library.load(
            &mut context,
            &shader_dir.join("lighting.spv"),
            PipelineSpecification {
                cull_mode: CullMode::None,
                output_formats: hdr.clone(),
                vertex_layout: VertexLayout::position_uv(),
                parameters: vec![
                    "GlobalData".into(),
                    "DirectionalLights".into(),
                    "PointLights".into(),
                    "SpotLights".into(),
                    "Albedo".into(),
                    "Normal".into(),
                    "MetallicRoughnessAo".into(),
                    "Emission".into(),
                    "Depth".into(),
                    "EnvironmentTexture".into(),
                    "DirectionalShadowMaps".into(),
                ],
                ..Default::default()
            },
        );
        let bloom = library.load(
            &mut context,
            &shader_dir.join("bloom.spv"),
            PipelineSpecification {
                cull_mode: CullMode::None,
                output_formats: hdr.clone(),
                vertex_layout: VertexLayout::position_uv(),
                parameters: vec!["BloomParams".into(), "Texture".into(), "AdditiveTexture".into()],
                ..Default::default()
            },
        );
        let blur = library.load(
            &mut context,
            &shader_dir.join("gaussian_blur.spv"),
            PipelineSpecification {
                cull_mode: CullMode::None,
                output_formats: hdr.clone(),
                vertex_layout: VertexLayout::position_uv(),
                parameters: vec!["BlurParams".into(), "Texture".into()],
                ..Default::default()
            },
        );
        let fxaa = library.load(
            &mut context,
            &shader_dir.join("fxaa.spv"),
            PipelineSpecification {
                cull_mode: CullMode::None,
                output_formats: hdr,
                vertex_layout: VertexLayout::position_uv(),
                parameters: vec!["FxaaParams".into(), "Texture".into()],
                ..Default::default()
            },
        );
        let composite = library.load(
            &mut context,
            &shader_dir.join("composite.spv"),
            PipelineSpecification {
                cull_mode: CullMode::None,
                output_formats: vec![TextureFormat::Rgba8Unorm],
                vertex_layout: VertexLayout::position_uv(),
                parameters: vec![
                    "CompositeParams".into(),
                    "Texture".into(),
                    "BloomTexture".into(),
                    "VignetteMask".into(),
                ],
                ..Default::default()
            },
        );

        let slots = PassSlots {
            transform: geometry.borrow().slot("Transform")?,
            material: geometry.borrow().slot("MaterialData")?,
            skybox_environment: skybox.borrow().slot("EnvironmentTexture")?,
            shadow_transform: shadow.borrow().slot("Transform")?,
            lighting_albedo: lighting.borrow().slot("Albedo")?,
            lighting_normal: lighting.borrow().slot("Normal")?,
            lighting_mra: lighting.borrow().slot("MetallicRoughnessAo")?,
            lighting_emission: lighting.borrow().slot("Emission")?,
            lighting_depth: lighting.borrow().slot("Depth")?,
            lighting_environment: lighting.borrow().slot("EnvironmentTexture")?,
            lighting_shadow_maps: lighting.borrow().slot("DirectionalShadowMaps")?,
            bloom_params: bloom.borrow().slot("BloomParams")?,
            bloom_texture: bloom.borrow().slot("Texture")?,
            bloom_additive: bloom.borrow().slot("AdditiveTexture")?,
            blur_params: blur.borrow().slot("BlurParams")?,
            blur_texture: blur.borrow().slot("Texture")?,
            fxaa_params: fxaa.borrow().slot("FxaaParams")?,
            fxaa_texture: fxaa.borrow().slot("Texture")?,
            composite_params: composite.borrow().slot("CompositeParams")?,
            composite_texture: composite.borrow().slot("Texture")?,
            composite_bloom: composite.borrow().slot("BloomTexture")?,
        };

        let targets =
            RenderGraphData::new(&mut context, settings.viewport_width, settings.viewport_height, &settings);

        let global_buffer = ConstantBuffer::new(
            &mut context,
            std::mem::size_of::<GlobalData>() as u32,
            1,
            geometry.borrow().slot("GlobalData")?,
            "global data",
        )?;
        let skybox_buffer = ConstantBuffer::new(
            &mut context,
            std::mem::size_of::<SkyboxData>() as u32,
            1,
            skybox.borrow().slot("SkyboxData")?,
            "skybox data",
        )?;
        let shadow_buffer = ConstantBuffer::new(
            &mut context,
            std::mem::size_of::<[[f32; 4]; 4]>() as u32,
            MAX_DIRECTIONAL_LIGHTS as u32,
            shadow.borrow().slot("ShadowData")?,
            "shadow data",
        )?;
        let directional_lights = StructuredBuffer::new(
            &mut context,
            std::mem::size_of::<DirectionalLightData>() as u32,
            MAX_DIRECTIONAL_LIGHTS as u32,
            geometry.borrow().slot("DirectionalLights")?,
            "directional lights",
        )?;
        let point_lights = StructuredBuffer::new(
            &mut context,
            std::mem::size_of::<PointLightData>() as u32,
            MAX_POINT_LIGHTS as u32,
            geometry.borrow().slot("PointLights")?,
            "point lights",
        )?;
        let spot_lights = StructuredBuffer::new(
            &mut context,
            std::mem::size_of::<SpotLightData>() as u32,
            MAX_SPOT_LIGHTS as u32,
            geometry.borrow().slot("SpotLights")?,
            "spot lights",
        )?;

        // Static geometry shared by the skybox and fullscreen passes
        let upload = context.device.begin_command_list()?;
        let cube_vertices =
            VertexBuffer::new(&mut context, upload, bytemuck::cast_slice(&cube_positions()), 12, "unit cube")?;
        let quad = Geometry {
            vertex_buffer: VertexBuffer::new(
                &mut context,
                upload,
                bytemuck::cast_slice(&quad_vertices()),
                20,
                "fullscreen quad",
            )?,
            index_buffer: IndexBuffer::new(&mut context, upload, &QUAD_INDICES, "fullscreen quad")?,
        };
        context.device.submit(upload)?;

        let max_meshes = settings.max_meshes;
        Ok(Self {
            context,
            library,
            settings,
            targets,
            pipelines: PassPipelines { geometry, skybox, shadow, lighting, bloom, blur, fxaa, composite },
            slots,
            global_buffer,
            skybox_buffer,
            shadow_buffer,
            directional_lights,
            point_lights,
            spot_lights,
            cube_vertices,
            quad,
            meshes: Vec::with_capacity(max_meshes),
            overflow_warned: false,
            stats: Statistics::default(),
            camera: CameraData::new(Mat4::identity(), Mat4::identity(), Vec3::zeros()),
            skylight: None,
            lights: Vec::new(),
            light_counts: (0, 0, 0),
            shadow_maps_written: 0,
            active_list: None,
        })
    }

    /// Open the frame: snapshot the scene and upload per-frame data
    pub fn begin_scene(
        &mut self,
        camera: &CameraData,
        skylight: Option<SkylightData>,
        lights: &[SceneLight],
    ) -> RenderResult<()> {
        self.stats = Statistics::default();
        self.overflow_warned = false;
        self.shadow_maps_written = 0;

        let list = self.context.begin_frame()?;
        self.active_list = Some(list);
        self.camera = camera.clone();
        self.skylight = skylight;
        self.lights.clear();
        self.lights.extend_from_slice(lights);

        if self.pipelines.geometry.borrow().bind(&mut self.context, list) {
            self.setup_lights_data(list)?;
            self.setup_global_data(list)?;
        } else {
            log::warn!("geometry pipeline unavailable; frame data upload skipped");
        }

        if let Some(sky) = self.skylight.clone() {
            if self.pipelines.skybox.borrow().bind(&mut self.context, list) {
                let data = SkyboxData {
                    view_projection: (self.camera.projection * self.camera.view.rotation_only()).into(),
                    rotation_intensity: [sky.rotation, sky.intensity, 0.0, 0.0],
                };
                self.skybox_buffer.bind(&mut self.context, list, 0);
                self.skybox_buffer.set_data(&mut self.context, bytemuck::bytes_of(&data), 0)?;
            }
        }
        Ok(())
    }

    /// Append a draw entry for this frame
    ///
    /// The arena has a fixed capacity (`RendererSettings::max_meshes`);
    /// submissions beyond it are dropped for the rest of the frame, with a
    /// single warning per frame. Bounded cost over completeness, by policy.
    pub fn submit_mesh(&mut self, transform: Mat4, material: Material, geometry: Rc<Geometry>) {
        if self.meshes.len() >= self.settings.max_meshes {
            if !self.overflow_warned {
                log::warn!(
                    "mesh submission capacity ({}) exceeded; dropping further draws this frame",
                    self.settings.max_meshes
                );
                self.overflow_warned = true;
            }
            return;
        }
        self.meshes.push(MeshDraw { transform, material, geometry });
    }

    /// Record the pass sequence, submit the frame and reset the arena
    pub fn end_scene(&mut self) -> RenderResult<()> {
        let list = self
            .active_list
            .take()
            .ok_or_else(|| RenderError::InvalidOperation("end_scene without begin_scene".into()))?;

        self.shadow_map_pass(list);
        self.geometry_pass(list);
        self.lighting_pass(list);
        self.bloom_pass(list);
        self.fxaa_pass(list);
        self.composite_pass(list);

        self.context.device.submit(list)?;
        self.meshes.clear();
        Ok(())
    }

    fn setup_lights_data(&mut self, list: CommandList) -> RenderResult<()> {
        let mut directional = [DirectionalLightData::zeroed(); MAX_DIRECTIONAL_LIGHTS];
        let mut point = vec![PointLightData::zeroed(); MAX_POINT_LIGHTS];
        let mut spot = vec![SpotLightData::zeroed(); MAX_SPOT_LIGHTS];
        let (mut nd, mut np, mut ns) = (0usize, 0usize, 0usize);

        // Fixed-capacity truncation: the first N lights of each type win
        for light in &self.lights {
            let color = [light.color.x, light.color.y, light.color.z, light.intensity];
            match light.kind {
                LightKind::Directional if nd < MAX_DIRECTIONAL_LIGHTS => {
                    let direction = light.transform.transform_direction(Vec3::new(0.0, 0.0, 1.0));
                    directional[nd] = DirectionalLightData {
                        direction: [direction.x, direction.y, direction.z, 0.0],
                        color,
                    };
                    nd += 1;
                }
                LightKind::Point if np < MAX_POINT_LIGHTS => {
                    let position = light.transform.translation_part();
                    point[np] = PointLightData {
                        position: [position.x, position.y, position.z, light.range],
                        color,
                    };
                    np += 1;
                }
                LightKind::Spot if ns < MAX_SPOT_LIGHTS => {
                    let position = light.transform.translation_part();
                    let direction = light.transform.transform_direction(Vec3::new(0.0, 0.0, 1.0));
                    spot[ns] = SpotLightData {
                        position: [position.x, position.y, position.z, light.range],
                        color,
                        attenuation: [
                            light.cut_off_angle.cos(),
                            light.outer_cut_off_angle.cos(),
                            0.0,
                            0.0,
                        ],
                        direction: [direction.x, direction.y, direction.z, 0.0],
                    };
                    ns += 1;
                }
                _ => {}
            }
        }
        self.light_counts = (nd, np, ns);

        self.directional_lights.bind(&mut self.context, list);
        self.directional_lights.set_data(&mut self.context, bytemuck::cast_slice(&directional[..nd]))?;
        self.point_lights.bind(&mut self.context, list);
        self.point_lights.set_data(&mut self.context, bytemuck::cast_slice(&point[..np]))?;
        self.spot_lights.bind(&mut self.context, list);
        self.spot_lights.set_data(&mut self.context, bytemuck::cast_slice(&spot[..ns]))?;
        Ok(())
    }

    fn setup_global_data(&mut self, list: CommandList) -> RenderResult<()> {
        let (nd, np, ns) = self.light_counts;
        let data = GlobalData {
            view: self.camera.view.into(),
            projection: self.camera.projection.into(),
            view_projection: self.camera.view_projection.into(),
            camera_position: [self.camera.position.x, self.camera.position.y, self.camera.position.z, 1.0],
            num_directional_lights: nd as u32,
            num_point_lights: np as u32,
            num_spot_lights: ns as u32,
            _padding: 0,
        };
        self.global_buffer.bind(&mut self.context, list, 0);
        self.global_buffer.set_data(&mut self.context, bytemuck::bytes_of(&data), 0)
    }

    fn draw_mesh_geometry(&mut self, list: CommandList, index: usize) {
        let mesh = &self.meshes[index];
        let transform: [[f32; 4]; 4] = mesh.transform.into();
        self.context.device.cmd_set_graphics_constants(
            list,
            self.slots.shadow_transform,
            bytemuck::bytes_of(&transform),
        );
        mesh.geometry.vertex_buffer.bind(&mut self.context, list);
        mesh.geometry.index_buffer.bind(&mut self.context, list);
        self.context.device.cmd_draw_indexed(list, mesh.geometry.index_buffer.count());
    }

    /// Depth-only pass, once per directional light
    fn shadow_map_pass(&mut self, list: CommandList) {
        let (num_directional, _, _) = self.light_counts;
        if num_directional == 0 {
            return;
        }
        if !self.pipelines.shadow.borrow().bind(&mut self.context, list) {
            log::warn!("shadow pipeline unavailable; shadow pass skipped");
            return;
        }

        let directional = self
            .lights
            .iter()
            .filter(|l| l.kind == LightKind::Directional)
            .take(MAX_DIRECTIONAL_LIGHTS)
            .cloned()
            .collect::<Vec<_>>();

        for (index, light) in directional.iter().enumerate() {
            self.targets.shadow_targets[index].bind(&mut self.context, list);
            self.targets.shadow_targets[index].clear(&mut self.context, list);

            // Ortho frustum looking along the light's +Z axis
            let position = light.transform.translation_part();
            let direction = light.transform.transform_direction(Vec3::new(0.0, 0.0, 1.0)).normalize();
            let view = Mat4::looking_at(position, position + direction, Vec3::new(0.0, 1.0, 0.0));
            let projection = Mat4::orthographic_centered(20.0, -100.0, 100.0);
            let view_projection: [[f32; 4]; 4] = (projection * view).into();

            self.shadow_buffer
                .set_data(&mut self.context, bytemuck::bytes_of(&view_projection), index as u32)
                .unwrap_or_else(|err| log::error!("shadow data upload failed: {err}"));
            self.shadow_buffer.bind(&mut self.context, list, index as u32);

            let order: Vec<usize> = if self.settings.shadow_front_to_back {
                (0..self.meshes.len()).collect()
            } else {
                (0..self.meshes.len()).rev().collect()
            };
            for mesh_index in order {
                self.draw_mesh_geometry(list, mesh_index);
            }
            self.shadow_maps_written = index + 1;
        }
    }

    /// Opaque geometry into the G-buffer, skybox first
    fn geometry_pass(&mut self, list: CommandList) {
        self.targets.geometry_target.bind(&mut self.context, list);
        self.targets.geometry_target.clear(&mut self.context, list);

        if let Some(sky) = self.skylight.clone() {
            if self.pipelines.skybox.borrow().bind(&mut self.context, list) {
                self.skybox_buffer.bind(&mut self.context, list, 0);
                if let Some(srv) = sky.environment_srv {
                    self.context.device.cmd_bind_shader_resource(list, srv, self.slots.skybox_environment);
                }
                self.cube_vertices.bind(&mut self.context, list);
                self.context.device.cmd_draw(list, CUBE_VERTEX_COUNT);
            }
        }

        if self.meshes.is_empty() {
            return;
        }
        if !self.pipelines.geometry.borrow().bind(&mut self.context, list) {
            return;
        }

        self.global_buffer.bind(&mut self.context, list, 0);
        self.directional_lights.bind(&mut self.context, list);
        self.point_lights.bind(&mut self.context, list);
        self.spot_lights.bind(&mut self.context, list);

        for index in 0..self.meshes.len() {
            let constants = self.meshes[index].material.constants();
            self.context.device.cmd_set_graphics_constants(
                list,
                self.slots.material,
                bytemuck::bytes_of(&constants),
            );
            let transform: [[f32; 4]; 4] = self.meshes[index].transform.into();
            self.context.device.cmd_set_graphics_constants(
                list,
                self.slots.transform,
                bytemuck::bytes_of(&transform),
            );
            self.meshes[index].geometry.vertex_buffer.bind(&mut self.context, list);
            self.meshes[index].geometry.index_buffer.bind(&mut self.context, list);
            let index_count = self.meshes[index].geometry.index_buffer.count();
            self.context.device.cmd_draw_indexed(list, index_count);
            self.stats.draw_calls += 1;
            self.stats.index_count += index_count;
        }
    }

    /// Fullscreen lighting resolve sampling the G-buffer and shadow maps
    fn lighting_pass(&mut self, list: CommandList) {
        self.targets.lighting_target.bind(&mut self.context, list);
        self.targets.lighting_target.clear(&mut self.context, list);

        self.targets.geometry_target.transition_to_shader_resource(&mut self.context, list);
        for index in 0..self.shadow_maps_written {
            self.targets.shadow_targets[index].transition_to_shader_resource(&mut self.context, list);
        }

        if !self.pipelines.lighting.borrow().bind(&mut self.context, list) {
            return;
        }

        self.global_buffer.bind(&mut self.context, list, 0);
        self.directional_lights.bind(&mut self.context, list);
        self.point_lights.bind(&mut self.context, list);
        self.spot_lights.bind(&mut self.context, list);

        self.targets.geometry_target.bind_color_attachment(&mut self.context, list, 0, self.slots.lighting_albedo);
        self.targets.geometry_target.bind_color_attachment(&mut self.context, list, 1, self.slots.lighting_normal);
        self.targets.geometry_target.bind_color_attachment(&mut self.context, list, 2, self.slots.lighting_mra);
        self.targets
            .geometry_target
            .bind_color_attachment(&mut self.context, list, 3, self.slots.lighting_emission);
        self.targets.geometry_target.bind_depth_attachment(&mut self.context, list, self.slots.lighting_depth);

        if let Some(sky) = self.skylight.clone() {
            if let Some(srv) = sky.environment_srv {
                self.context.device.cmd_bind_shader_resource(list, srv, self.slots.lighting_environment);
            }
        }
        for index in 0..self.shadow_maps_written {
            self.targets.shadow_targets[index].bind_depth_attachment(
                &mut self.context,
                list,
                self.slots.lighting_shadow_maps + index as u32,
            );
        }

        self.draw_quad(list);
    }

    /// Threshold prefilter, gaussian down-sample chain, additive up-sample
    fn bloom_pass(&mut self, list: CommandList) {
        if !self.settings.bloom.enabled {
            return;
        }
        if !self.pipelines.bloom.borrow().bind(&mut self.context, list) {
            return;
        }

        let bloom = &self.settings.bloom;
        let threshold = [bloom.threshold, bloom.knee, bloom.knee * 2.0, 0.25 / bloom.knee];
        let clamp = bloom.clamp;
        let levels = self.targets.blur_levels();

        // Prefilter
        self.targets.prefiltered.bind(&mut self.context, list);
        self.targets.lighting_target.transition_to_shader_resource(&mut self.context, list);
        let constants = BloomConstants { threshold, params: [clamp, 2.0, 0.0, 0.0] };
        self.context.device.cmd_set_graphics_constants(
            list,
            self.slots.bloom_params,
            bytemuck::bytes_of(&constants),
        );
        self.targets.lighting_target.bind_color_attachment(&mut self.context, list, 0, self.slots.bloom_texture);
        self.draw_quad(list);

        // Down-sample: horizontal into scratch, vertical into the chain
        if self.pipelines.blur.borrow().bind(&mut self.context, list) {
            for level in 0..levels {
                self.targets.temp_blur[level].bind(&mut self.context, list);
                let horizontal = BlurConstants { direction: [1.0, 0.0, 0.0, 0.0] };
                self.context.device.cmd_set_graphics_constants(
                    list,
                    self.slots.blur_params,
                    bytemuck::bytes_of(&horizontal),
                );
                if level == 0 {
                    self.targets.prefiltered.transition_to_shader_resource(&mut self.context, list);
                    self.targets
                        .prefiltered
                        .bind_color_attachment(&mut self.context, list, 0, self.slots.blur_texture);
                } else {
                    self.targets.downsampled[level - 1]
                        .transition_to_shader_resource(&mut self.context, list);
                    self.targets.downsampled[level - 1].bind_color_attachment(
                        &mut self.context,
                        list,
                        0,
                        self.slots.blur_texture,
                    );
                }
                self.draw_quad(list);

                self.targets.downsampled[level].bind(&mut self.context, list);
                let vertical = BlurConstants { direction: [0.0, 0.0, 0.0, 0.0] };
                self.context.device.cmd_set_graphics_constants(
                    list,
                    self.slots.blur_params,
                    bytemuck::bytes_of(&vertical),
                );
                self.targets.temp_blur[level].transition_to_shader_resource(&mut self.context, list);
                self.targets.temp_blur[level].bind_color_attachment(
                    &mut self.context,
                    list,
                    0,
                    self.slots.blur_texture,
                );
                self.draw_quad(list);
            }
        }

        // Up-sample with additive blend back to half resolution
        if !self.pipelines.bloom.borrow().bind(&mut self.context, list) {
            return;
        }
        let upsample_top = levels - 1;
        for level in (1..=upsample_top).rev() {
            self.targets.upsampled[level].bind(&mut self.context, list);
            let constants = BloomConstants { threshold, params: [clamp, 3.0, 1.0, 1.0] };
            self.context.device.cmd_set_graphics_constants(
                list,
                self.slots.bloom_params,
                bytemuck::bytes_of(&constants),
            );

            let (source, additive): (usize, Option<usize>) = if level == upsample_top {
                (upsample_top, None)
            } else {
                (level, Some(level + 1))
            };
            self.targets.downsampled[source].transition_to_shader_resource(&mut self.context, list);
            self.targets.downsampled[source].bind_color_attachment(
                &mut self.context,
                list,
                0,
                self.slots.bloom_texture,
            );
            match additive {
                Some(up) => {
                    self.targets.upsampled[up].transition_to_shader_resource(&mut self.context, list);
                    self.targets.upsampled[up].bind_color_attachment(
                        &mut self.context,
                        list,
                        0,
                        self.slots.bloom_additive,
                    );
                }
                None if upsample_top >= 1 => {
                    self.targets.downsampled[upsample_top - 1]
                        .transition_to_shader_resource(&mut self.context, list);
                    self.targets.downsampled[upsample_top - 1].bind_color_attachment(
                        &mut self.context,
                        list,
                        0,
                        self.slots.bloom_additive,
                    );
                }
                None => {}
            }
            self.draw_quad(list);
        }

        self.targets.upsampled[0].bind(&mut self.context, list);
        let constants = BloomConstants { threshold, params: [clamp, 3.0, 1.0, 0.0] };
        self.context.device.cmd_set_graphics_constants(
            list,
            self.slots.bloom_params,
            bytemuck::bytes_of(&constants),
        );
        self.targets.upsampled[1].transition_to_shader_resource(&mut self.context, list);
        self.targets.upsampled[1].bind_color_attachment(&mut self.context, list, 0, self.slots.bloom_texture);
        self.draw_quad(list);
    }

    /// Optional antialiasing over the lighting result
    fn fxaa_pass(&mut self, list: CommandList) {
        if !self.settings.fxaa.enabled {
            return;
        }
        self.targets.fxaa_target.bind(&mut self.context, list);
        if !self.pipelines.fxaa.borrow().bind(&mut self.context, list) {
            return;
        }

        let threshold = self.settings.fxaa.threshold;
        let constants = FxaaConstants { threshold: [threshold[0], threshold[1], 0.0, 0.0] };
        self.context.device.cmd_set_graphics_constants(
            list,
            self.slots.fxaa_params,
            bytemuck::bytes_of(&constants),
        );
        self.targets.lighting_target.transition_to_shader_resource(&mut self.context, list);
        self.targets.lighting_target.bind_color_attachment(&mut self.context, list, 0, self.slots.fxaa_texture);
        self.draw_quad(list);
    }

    /// Tone mapping, bloom blend and vignette into the final target
    ///
    /// The composite target is the only framebuffer left writable at frame
    /// end; the embedding layer consumes it from there.
    fn composite_pass(&mut self, list: CommandList) {
        self.targets.composite_target.bind(&mut self.context, list);
        if !self.pipelines.composite.borrow().bind(&mut self.context, list) {
            return;
        }

        let bloom_strength = if self.settings.bloom.enabled { self.settings.bloom.strength } else { -1.0 };
        let constants = CompositeConstants {
            tonemapping: [self.settings.tonemapping as u32 as f32, self.settings.exposure, 0.0, 0.0],
            vignette_color: self.settings.vignette.color,
            vignette_offset: self.settings.vignette.offset,
            bloom: [bloom_strength, 0.0, 0.0, 0.0],
        };
        self.context.device.cmd_set_graphics_constants(
            list,
            self.slots.composite_params,
            bytemuck::bytes_of(&constants),
        );

        if self.settings.fxaa.enabled {
            self.targets.fxaa_target.transition_to_shader_resource(&mut self.context, list);
            self.targets.fxaa_target.bind_color_attachment(
                &mut self.context,
                list,
                0,
                self.slots.composite_texture,
            );
        } else {
            self.targets.lighting_target.transition_to_shader_resource(&mut self.context, list);
            self.targets.lighting_target.bind_color_attachment(
                &mut self.context,
                list,
                0,
                self.slots.composite_texture,
            );
        }
        if self.settings.bloom.enabled {
            self.targets.upsampled[0].transition_to_shader_resource(&mut self.context, list);
            self.targets.upsampled[0].bind_color_attachment(
                &mut self.context,
                list,
                0,
                self.slots.composite_bloom,
            );
        }
        self.draw_quad(list);
    }

    fn draw_quad(&mut self, list: CommandList) {
        self.quad.vertex_buffer.bind(&mut self.context, list);
        self.quad.index_buffer.bind(&mut self.context, list);
        self.context.device.cmd_draw_indexed(list, self.quad.index_buffer.count());
    }

    /// Upload mesh geometry through a one-off command list
    pub fn create_geometry(&mut self, vertices: &[Vertex], indices: &[u32]) -> RenderResult<Rc<Geometry>> {
        let upload = self.context.device.begin_command_list()?;
        let vertex_buffer = VertexBuffer::new(
            &mut self.context,
            upload,
            bytemuck::cast_slice(vertices),
            std::mem::size_of::<Vertex>() as u32,
            "mesh",
        )?;
        let index_buffer = IndexBuffer::new(&mut self.context, upload, indices, "mesh")?;
        self.context.device.submit(upload)?;
        Ok(Rc::new(Geometry { vertex_buffer, index_buffer }))
    }

    /// Resize every viewport-sized pass target
    pub fn on_viewport_resize(&mut self, width: u32, height: u32) {
        let spec = self.targets.composite_target.specification();
        if spec.width == width && spec.height == height {
            return;
        }
        self.targets.resize(&mut self.context, width, height);
    }

    /// Recompile every pipeline from disk (editor hot-reload command)
    pub fn reload_shaders(&mut self) {
        self.library.reload_all(&mut self.context);
    }

    /// Draw statistics accumulated since the last `begin_scene`
    pub fn stats(&self) -> Statistics {
        self.stats
    }

    /// The renderer's settings
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// Mutable settings; post-processing options apply from the next frame
    pub fn settings_mut(&mut self) -> &mut RendererSettings {
        &mut self.settings
    }

    /// The graphics context
    pub fn context(&self) -> &GraphicsContext {
        &self.context
    }

    /// The pass targets
    pub fn targets(&self) -> &RenderGraphData {
        &self.targets
    }

    /// The pipeline library
    pub fn pipeline_library(&self) -> &PipelineLibrary {
        &self.library
    }

    /// Number of draw entries currently in the arena (testing/diagnostics)
    pub fn pending_mesh_count(&self) -> usize {
        self.meshes.len()
    }
}

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

fn quad_vertices() -> [f32; 20] {
    [
        -1.0, -1.0, 0.0, 0.0, 0.0, //
        1.0, -1.0, 0.0, 1.0, 0.0, //
        1.0, 1.0, 0.0, 1.0, 1.0, //
        -1.0, 1.0, 0.0, 0.0, 1.0,
    ]
}

#[rustfmt::skip]
fn cube_positions() -> [f32; 108] {
    [
        // back face
         0.5, -0.5, -0.5,   0.5,  0.5, -0.5,  -0.5, -0.5, -0.5,
        -0.5,  0.5, -0.5,  -0.5, -0.5, -0.5,   0.5,  0.5, -0.5,
        // front face
         0.5,  0.5,  0.5,   0.5, -0.5,  0.5,  -0.5, -0.5,  0.5,
        -0.5, -0.5,  0.5,  -0.5,  0.5,  0.5,   0.5,  0.5,  0.5,
        // left face
        -0.5, -0.5, -0.5,  -0.5,  0.5, -0.5,  -0.5,  0.5,  0.5,
        -0.5,  0.5,  0.5,  -0.5, -0.5,  0.5,  -0.5, -0.5, -0.5,
        // right face
         0.5,  0.5, -0.5,   0.5, -0.5, -0.5,   0.5,  0.5,  0.5,
         0.5, -0.5,  0.5,   0.5,  0.5,  0.5,   0.5, -0.5, -0.5,
        // bottom face
         0.5, -0.5,  0.5,   0.5, -0.5, -0.5,  -0.5, -0.5, -0.5,
        -0.5, -0.5, -0.5,  -0.5, -0.5,  0.5,   0.5, -0.5,  0.5,
        // top face
         0.5,  0.5, -0.5,   0.5,  0.5,  0.5,  -0.5,  0.5, -0.5,
        -0.5,  0.5,  0.5,  -0.5,  0.5, -0.5,   0.5,  0.5,  0.5,
    ]
}
