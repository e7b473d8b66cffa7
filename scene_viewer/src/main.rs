//! Headless scene viewer
//!
//! Drives the renderer through a few full frames on the headless backend and
//! prints per-frame statistics. Useful as a smoke test of the frame graph on
//! machines without a GPU; pass `--vulkan` to run against the Vulkan backend
//! instead (requires SPIR-V shaders in the shader directory).

use std::path::PathBuf;
use std::rc::Rc;

use ember_engine::foundation::math::{Mat4, Point3, Vec3};
use ember_engine::prelude::*;
use ember_engine::render::graph::Vertex;

fn cube_mesh(renderer: &mut SceneRenderer) -> Rc<ember_engine::render::graph::Geometry> {
    let corners = [
        [-0.5, -0.5, -0.5],
        [0.5, -0.5, -0.5],
        [0.5, 0.5, -0.5],
        [-0.5, 0.5, -0.5],
        [-0.5, -0.5, 0.5],
        [0.5, -0.5, 0.5],
        [0.5, 0.5, 0.5],
        [-0.5, 0.5, 0.5],
    ];
    let vertices: Vec<Vertex> = corners
        .iter()
        .map(|&position| Vertex { position, normal: [0.0, 1.0, 0.0], uv: [0.0, 0.0] })
        .collect();
    #[rustfmt::skip]
    let indices = [
        0u32, 1, 2, 0, 2, 3, // back
        4, 6, 5, 4, 7, 6,    // front
        0, 3, 7, 0, 7, 4,    // left
        1, 5, 6, 1, 6, 2,    // right
        3, 2, 6, 3, 6, 7,    // top
        0, 4, 5, 0, 5, 1,    // bottom
    ];
    renderer.create_geometry(&vertices, &indices).expect("geometry upload")
}

/// Placeholder bytecode so the headless backend compiles every pass pipeline;
/// the Vulkan backend needs real SPIR-V in the shader directory instead
fn write_placeholder_shaders(dir: &PathBuf) {
    std::fs::create_dir_all(dir).expect("shader dir");
    for shader in [
        "geometry.spv",
        "skybox.spv",
        "shadow.spv",
        "lighting.spv",
        "bloom.spv",
        "gaussian_blur.spv",
        "fxaa.spv",
        "composite.spv",
    ] {
        let path = dir.join(shader);
        if !path.exists() {
            std::fs::write(&path, b"headless placeholder").expect("shader write");
        }
    }
}

fn main() {
    env_logger::init();

    let vulkan = std::env::args().any(|arg| arg == "--vulkan");
    let backend = if vulkan { BackendKind::Vulkan } else { BackendKind::Headless };

    let mut settings = RendererSettings::default();
    if !vulkan {
        let shader_dir = std::env::temp_dir().join("scene_viewer_shaders");
        write_placeholder_shaders(&shader_dir);
        settings.shader_dir = shader_dir;
    }

    log::info!("creating renderer ({backend:?})");
    let mut renderer = match SceneRenderer::new(backend, settings) {
        Ok(renderer) => renderer,
        Err(err) => {
            log::error!("renderer creation failed: {err}");
            std::process::exit(1);
        }
    };
    let cube = cube_mesh(&mut renderer);

    let projection = Mat4::new_perspective(16.0 / 9.0, 45f32.to_radians(), 0.1, 100.0);
    let view = Mat4::look_at_rh(
        &Point3::new(4.0, 3.0, 8.0),
        &Point3::new(0.0, 0.0, 0.0),
        &Vec3::new(0.0, 1.0, 0.0),
    );
    let camera = CameraData::new(view, projection, Vec3::new(4.0, 3.0, 8.0));

    let lights = vec![
        SceneLight::directional(Mat4::identity(), Vec3::new(1.0, 0.98, 0.9), 2.0),
        SceneLight::point(
            Mat4::new_translation(&Vec3::new(2.0, 1.0, 0.0)),
            Vec3::new(0.9, 0.3, 0.2),
            5.0,
            12.0,
        ),
    ];

    for frame in 0..3 {
        renderer.begin_scene(&camera, None, &lights).expect("begin_scene");
        for x in -4..=4 {
            for z in -4..=4 {
                let transform = Mat4::new_translation(&Vec3::new(x as f32 * 1.5, 0.0, z as f32 * 1.5));
                renderer.submit_mesh(transform, Material::new().with_color(0.8, 0.7, 0.5), Rc::clone(&cube));
            }
        }
        renderer.end_scene().expect("end_scene");

        let stats = renderer.stats();
        log::info!(
            "frame {frame}: {} draw calls, {} indices",
            stats.draw_calls,
            stats.index_count
        );
    }

    log::info!("done");
}
