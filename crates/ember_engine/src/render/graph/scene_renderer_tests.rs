//! Frame-level tests for the scene renderer
//!
//! Run against the headless backend: every recorded command is inspectable,
//! so pass ordering, barrier placement and draw statistics can be asserted
//! for whole frames without a GPU.

use std::path::PathBuf;
use std::rc::Rc;

use crate::foundation::math::{Mat4, Vec3};
use crate::render::api::BackendKind;
use crate::render::backends::headless::{HeadlessDevice, RecordedCommand};
use crate::render::graph::{Geometry, Material, SceneRenderer, Vertex, MAX_DIRECTIONAL_LIGHTS};
use crate::render::settings::RendererSettings;
use crate::render::state::ResourceState;
use crate::scene::{CameraData, SceneLight};

struct ShaderDir {
    root: PathBuf,
}

const PASS_SHADERS: [&str; 8] = [
    "geometry.spv",
    "skybox.spv",
    "shadow.spv",
    "lighting.spv",
    "bloom.spv",
    "gaussian_blur.spv",
    "fxaa.spv",
    "composite.spv",
];

impl ShaderDir {
    /// Write placeholder bytecode for every pass shader; the headless
    /// backend treats bytecode as opaque
    fn with_all_shaders(test: &str) -> Self {
        let root = std::env::temp_dir().join(format!("ember_graph_{}_{test}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        for shader in PASS_SHADERS {
            std::fs::write(root.join(shader), b"placeholder bytecode").unwrap();
        }
        Self { root }
    }

    fn empty(test: &str) -> Self {
        let root = std::env::temp_dir().join(format!("ember_graph_{}_{test}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        Self { root }
    }
}

impl Drop for ShaderDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn renderer_with(dir: &ShaderDir, configure: impl FnOnce(&mut RendererSettings)) -> SceneRenderer {
    let mut settings = RendererSettings { shader_dir: dir.root.clone(), ..Default::default() };
    configure(&mut settings);
    SceneRenderer::new(BackendKind::Headless, settings).unwrap()
}

fn camera() -> CameraData {
    CameraData::new(Mat4::identity(), Mat4::identity(), Vec3::new(0.0, 0.0, 5.0))
}

fn triangle(renderer: &mut SceneRenderer) -> Rc<Geometry> {
    let vertices = [
        Vertex { position: [0.0, 0.0, 0.0], normal: [0.0, 0.0, 1.0], uv: [0.0, 0.0] },
        Vertex { position: [1.0, 0.0, 0.0], normal: [0.0, 0.0, 1.0], uv: [1.0, 0.0] },
        Vertex { position: [0.0, 1.0, 0.0], normal: [0.0, 0.0, 1.0], uv: [0.0, 1.0] },
    ];
    renderer.create_geometry(&vertices, &[0, 1, 2]).unwrap()
}

fn directional_lights(count: usize) -> Vec<SceneLight> {
    (0..count)
        .map(|_| SceneLight::directional(Mat4::identity(), Vec3::new(1.0, 1.0, 1.0), 1.0))
        .collect()
}

fn headless(renderer: &SceneRenderer) -> &HeadlessDevice {
    renderer.context().device().as_any().downcast_ref().expect("headless backend")
}

fn last_frame_commands(renderer: &SceneRenderer) -> &[RecordedCommand] {
    let device = headless(renderer);
    device.submitted_commands(device.submission_count() - 1)
}

#[test]
fn full_frame_matches_draw_statistics_and_pass_order() {
    let dir = ShaderDir::with_all_shaders("full_frame");
    let mut renderer = renderer_with(&dir, |_| {});
    let geometry = triangle(&mut renderer);

    let mut lights = directional_lights(2);
    lights.push(SceneLight::point(Mat4::identity(), Vec3::new(1.0, 0.0, 0.0), 2.0, 10.0));

    renderer.begin_scene(&camera(), None, &lights).unwrap();
    for _ in 0..500 {
        renderer.submit_mesh(Mat4::identity(), Material::new(), Rc::clone(&geometry));
    }
    renderer.end_scene().unwrap();

    // Statistics count geometry-pass mesh draws only (no skylight, no
    // shadow-pass draws, no fullscreen quads)
    let stats = renderer.stats();
    assert_eq!(stats.draw_calls, 500);
    assert_eq!(stats.index_count, 500 * 3);

    // Pass order through render-target binds: two depth-only shadow maps,
    // then the four-color G-buffer, then single-color fullscreen targets
    let commands = last_frame_commands(&renderer);
    let target_sets: Vec<(usize, bool)> = commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::SetRenderTargets { colors, depth, .. } => {
                Some((colors.len(), depth.is_some()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(&target_sets[..3], &[(0, true), (0, true), (4, true)]);
    assert!(target_sets[3..].iter().all(|&(colors, depth)| colors == 1 && !depth));

    // Shadow pass drew every mesh once per directional light
    let shadow_draws = commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::DrawIndexed { index_count: 3 }))
        .count();
    assert_eq!(shadow_draws, 500 * 2 + 500);

    // End-of-frame states: every pass output readable except the final
    // composite target
    let frame = renderer.context().frame_index();
    let targets = renderer.targets();
    for index in 0..targets.geometry_target.color_attachment_count() {
        assert_eq!(
            targets.geometry_target.color_attachment_state(frame, index),
            ResourceState::PixelShaderResource
        );
    }
    assert_eq!(
        targets.geometry_target.depth_attachment_state(frame),
        Some(ResourceState::PixelShaderResource)
    );
    for shadow in &targets.shadow_targets[..2] {
        assert_eq!(shadow.depth_attachment_state(frame), Some(ResourceState::PixelShaderResource));
    }
    assert_eq!(
        targets.lighting_target.color_attachment_state(frame, 0),
        ResourceState::PixelShaderResource
    );
    assert_eq!(
        targets.fxaa_target.color_attachment_state(frame, 0),
        ResourceState::PixelShaderResource
    );
    assert_eq!(
        targets.upsampled[0].color_attachment_state(frame, 0),
        ResourceState::PixelShaderResource
    );
    assert_eq!(
        targets.composite_target.color_attachment_state(frame, 0),
        ResourceState::RenderTarget
    );
}

#[test]
fn submissions_beyond_capacity_are_dropped_silently() {
    let dir = ShaderDir::with_all_shaders("capacity");
    let mut renderer = renderer_with(&dir, |settings| settings.max_meshes = 8);
    let geometry = triangle(&mut renderer);

    renderer.begin_scene(&camera(), None, &[]).unwrap();
    for _ in 0..8 + 5 {
        renderer.submit_mesh(Mat4::identity(), Material::new(), Rc::clone(&geometry));
    }
    assert_eq!(renderer.pending_mesh_count(), 8);
    renderer.end_scene().unwrap();

    assert_eq!(renderer.stats().draw_calls, 8);
    // Insertion index reset for the next frame
    assert_eq!(renderer.pending_mesh_count(), 0);

    renderer.begin_scene(&camera(), None, &[]).unwrap();
    renderer.submit_mesh(Mat4::identity(), Material::new(), Rc::clone(&geometry));
    assert_eq!(renderer.pending_mesh_count(), 1);
    renderer.end_scene().unwrap();
    assert_eq!(renderer.stats().draw_calls, 1);
}

#[test]
fn directional_lights_truncate_at_capacity() {
    let dir = ShaderDir::with_all_shaders("truncate");
    let mut renderer = renderer_with(&dir, |_| {});
    let geometry = triangle(&mut renderer);

    renderer.begin_scene(&camera(), None, &directional_lights(5)).unwrap();
    renderer.submit_mesh(Mat4::identity(), Material::new(), geometry);
    renderer.end_scene().unwrap();

    // Only the first MAX_DIRECTIONAL_LIGHTS got a shadow pass
    let depth_only_binds = last_frame_commands(&renderer)
        .iter()
        .filter(|c| matches!(c, RecordedCommand::SetRenderTargets { colors, .. } if colors.is_empty()))
        .count();
    assert_eq!(depth_only_binds, MAX_DIRECTIONAL_LIGHTS);
}

#[test]
fn missing_shaders_degrade_to_an_empty_frame() {
    let dir = ShaderDir::empty("degraded");
    let mut renderer = renderer_with(&dir, |_| {});
    let geometry = triangle(&mut renderer);

    renderer.begin_scene(&camera(), None, &directional_lights(1)).unwrap();
    renderer.submit_mesh(Mat4::identity(), Material::new(), geometry);
    renderer.end_scene().unwrap();

    // No pipeline compiled, so nothing drew; the frame still submitted
    assert_eq!(renderer.stats().draw_calls, 0);
    let draws = last_frame_commands(&renderer)
        .iter()
        .filter(|c| matches!(c, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }))
        .count();
    assert_eq!(draws, 0);
}

#[test]
fn disabled_fxaa_and_bloom_skip_their_passes() {
    let dir = ShaderDir::with_all_shaders("toggles");
    let mut renderer = renderer_with(&dir, |settings| {
        settings.fxaa.enabled = false;
        settings.bloom.enabled = false;
    });
    let geometry = triangle(&mut renderer);

    renderer.begin_scene(&camera(), None, &[]).unwrap();
    renderer.submit_mesh(Mat4::identity(), Material::new(), geometry);
    renderer.end_scene().unwrap();

    // Targets bound: G-buffer, lighting, composite. No shadow (no lights),
    // no bloom chain, no FXAA
    let target_sets = last_frame_commands(&renderer)
        .iter()
        .filter(|c| matches!(c, RecordedCommand::SetRenderTargets { .. }))
        .count();
    assert_eq!(target_sets, 3);

    // Composite sampled the lighting result directly
    let frame = renderer.context().frame_index();
    assert_eq!(
        renderer.targets().lighting_target.color_attachment_state(frame, 0),
        ResourceState::PixelShaderResource
    );
    // Untouched optional targets stayed writable
    assert_eq!(
        renderer.targets().fxaa_target.color_attachment_state(frame, 0),
        ResourceState::RenderTarget
    );
}

#[test]
fn shadow_pass_iterates_meshes_in_configured_order() {
    let dir = ShaderDir::with_all_shaders("shadow_order");
    for front_to_back in [false, true] {
        let mut renderer = renderer_with(&dir, |settings| {
            settings.shadow_front_to_back = front_to_back;
        });
        let small = renderer.create_geometry(
            &[Vertex { position: [0.0; 3], normal: [0.0, 0.0, 1.0], uv: [0.0; 2] }; 3],
            &[0, 1, 2],
        )
        .unwrap();
        let large = renderer.create_geometry(
            &[Vertex { position: [0.0; 3], normal: [0.0, 0.0, 1.0], uv: [0.0; 2] }; 6],
            &[0, 1, 2, 3, 4, 5],
        )
        .unwrap();

        renderer.begin_scene(&camera(), None, &directional_lights(1)).unwrap();
        renderer.submit_mesh(Mat4::identity(), Material::new(), small);
        renderer.submit_mesh(Mat4::identity(), Material::new(), large);
        renderer.end_scene().unwrap();

        // First two indexed draws of the frame belong to the shadow pass
        let draw_sizes: Vec<u32> = last_frame_commands(&renderer)
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::DrawIndexed { index_count } => Some(*index_count),
                _ => None,
            })
            .take(2)
            .collect();
        let expected = if front_to_back { vec![3, 6] } else { vec![6, 3] };
        assert_eq!(draw_sizes, expected, "front_to_back = {front_to_back}");
    }
}

#[test]
fn viewport_resize_rebuilds_viewport_sized_targets_only() {
    let dir = ShaderDir::with_all_shaders("resize");
    let mut renderer = renderer_with(&dir, |_| {});
    let shadow_resolution = renderer.targets().shadow_targets[0].specification().width;

    renderer.on_viewport_resize(640, 360);
    assert_eq!(renderer.targets().composite_target.specification().width, 640);
    assert_eq!(renderer.targets().geometry_target.specification().height, 360);
    assert_eq!(renderer.targets().prefiltered.specification().width, 320);
    assert_eq!(renderer.targets().shadow_targets[0].specification().width, shadow_resolution);
}

#[test]
fn reload_shaders_survives_a_missing_file() {
    let dir = ShaderDir::with_all_shaders("reload");
    let mut renderer = renderer_with(&dir, |_| {});
    std::fs::remove_file(dir.root.join("bloom.spv")).unwrap();

    renderer.reload_shaders();

    // The bloom pipeline kept its last-good state; a frame still renders
    let geometry = triangle(&mut renderer);
    renderer.begin_scene(&camera(), None, &[]).unwrap();
    renderer.submit_mesh(Mat4::identity(), Material::new(), geometry);
    renderer.end_scene().unwrap();
    assert_eq!(renderer.stats().draw_calls, 1);
}
