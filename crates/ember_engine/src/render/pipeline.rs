//! Pipeline state objects and the shader-keyed pipeline library
//!
//! Pipelines are cached by shader name and shared through
//! [`SharedPipeline`] (`Rc<RefCell<...>>`; command recording is
//! single-threaded by contract, and the non-`Send` handle keeps it that way
//! in the type system). Hot reload recompiles in place so every holder of a
//! shared pipeline observes the new state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::render::api::{CommandList, PipelineHandle, TextureFormat};
use crate::render::context::GraphicsContext;
use crate::render::{RenderError, RenderResult};

/// Shader program kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShaderType {
    /// No shader
    None,
    /// Vertex-only program (depth prepass, shadow maps)
    Vertex,
    /// Vertex + pixel program
    #[default]
    Pixel,
}

/// Triangle culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    #[default]
    Back,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    /// Triangle list
    #[default]
    Triangle,
    /// Line list
    Line,
    /// Point list
    Point,
}

/// Polygon fill mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Filled polygons
    #[default]
    Solid,
    /// Wireframe
    Wireframe,
}

/// Depth comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthFunc {
    /// Pass when nearer
    Less,
    /// Pass when nearer or equal
    LessEqual,
    /// Pass when farther
    Greater,
    /// Always pass
    Always,
}

/// Format of one vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexAttributeFormat {
    /// Two f32 components
    Float2,
    /// Three f32 components
    Float3,
    /// Four f32 components
    Float4,
}

/// One attribute within a vertex layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Component format
    pub format: VertexAttributeFormat,
    /// Byte offset within the vertex
    pub offset: u32,
}

/// Layout of the vertex stream a pipeline consumes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexLayout {
    /// Vertex stride in bytes
    pub stride: u32,
    /// Ordered attribute list
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Position-only layout (`[f32; 3]`)
    pub fn position() -> Self {
        Self {
            stride: 12,
            attributes: vec![VertexAttribute { format: VertexAttributeFormat::Float3, offset: 0 }],
        }
    }

    /// Position + UV layout (fullscreen quads)
    pub fn position_uv() -> Self {
        Self {
            stride: 20,
            attributes: vec![
                VertexAttribute { format: VertexAttributeFormat::Float3, offset: 0 },
                VertexAttribute { format: VertexAttributeFormat::Float2, offset: 12 },
            ],
        }
    }

    /// Position + normal + UV layout (mesh geometry)
    pub fn position_normal_uv() -> Self {
        Self {
            stride: 32,
            attributes: vec![
                VertexAttribute { format: VertexAttributeFormat::Float3, offset: 0 },
                VertexAttribute { format: VertexAttributeFormat::Float3, offset: 12 },
                VertexAttribute { format: VertexAttributeFormat::Float2, offset: 24 },
            ],
        }
    }
}

/// Everything needed to compile a pipeline besides the shader bytecode
#[derive(Debug, Clone, Default)]
pub struct PipelineSpecification {
    /// Shader program kind
    pub shader_type: ShaderType,
    /// Culling mode
    pub cull_mode: CullMode,
    /// Primitive topology
    pub primitive: PrimitiveTopology,
    /// Fill mode
    pub fill_mode: FillMode,
    /// Depth test function; `None` disables depth testing
    pub depth_func: Option<DepthFunc>,
    /// Depth attachment format ([`TextureFormat::None`] when absent)
    pub depth_format: TextureFormat,
    /// Color output formats
    pub output_formats: Vec<TextureFormat>,
    /// Vertex stream layout
    pub vertex_layout: VertexLayout,
    /// Ordered named parameter slots
    ///
    /// Stand-in for shader reflection: a parameter's slot index is its
    /// position in this list, resolved through [`PipelineState::slot`].
    pub parameters: Vec<String>,
}

/// A compiled (or pending) pipeline state object
pub struct PipelineState {
    name: String,
    path: PathBuf,
    spec: PipelineSpecification,
    handle: Option<PipelineHandle>,
}

impl PipelineState {
    /// Bind on a command list; false when the shader has not compiled yet
    ///
    /// Callers skip the dependent pass on false rather than treating it as
    /// an error, so one missing shader cannot take the frame down.
    pub fn bind(&self, ctx: &mut GraphicsContext, list: CommandList) -> bool {
        match self.handle {
            Some(handle) => ctx.device.cmd_bind_pipeline(list, handle),
            None => false,
        }
    }

    /// Resolve a named parameter to its slot index
    pub fn slot(&self, name: &str) -> RenderResult<u32> {
        self.spec
            .parameters
            .iter()
            .position(|p| p == name)
            .map(|i| i as u32)
            .ok_or_else(|| RenderError::NotFound(format!("{}: parameter '{name}'", self.name)))
    }

    /// Shader name (file stem of the source path)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source path the pipeline compiles from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a compiled pipeline object exists
    pub fn is_compiled(&self) -> bool {
        self.handle.is_some()
    }

    /// The pipeline's specification
    pub fn specification(&self) -> &PipelineSpecification {
        &self.spec
    }
}

/// Shared reference to a pipeline in the library
pub type SharedPipeline = Rc<RefCell<PipelineState>>;

/// Cache of compiled pipelines keyed by shader name
#[derive(Default)]
pub struct PipelineLibrary {
    pipelines: HashMap<String, SharedPipeline>,
}

impl PipelineLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or fetch) the pipeline for a shader path
    ///
    /// When the shader is already cached the existing pipeline is returned
    /// and `spec` is **discarded**: loading twice is safe but cannot
    /// re-specialize a pipeline. Compilation failure is logged; the returned
    /// pipeline then stays unbound until a successful
    /// [`reload_all`](Self::reload_all).
    pub fn load(&mut self, ctx: &mut GraphicsContext, path: &Path, spec: PipelineSpecification) -> SharedPipeline {
        let name = shader_name(path);
        if let Some(existing) = self.pipelines.get(&name) {
            log::debug!("pipeline '{name}' already loaded; new specification discarded");
            return Rc::clone(existing);
        }

        let handle = compile(ctx, path, &spec);
        let pipeline = Rc::new(RefCell::new(PipelineState {
            name: name.clone(),
            path: path.to_owned(),
            spec,
            handle,
        }));
        self.pipelines.insert(name, Rc::clone(&pipeline));
        pipeline
    }

    /// Recompile every cached pipeline from its stored source path
    ///
    /// A failing shader keeps its last-good compiled state and is reported;
    /// the other pipelines still reload. Replaced pipeline objects retire
    /// through the deferred-release queue.
    pub fn reload_all(&mut self, ctx: &mut GraphicsContext) {
        for (name, pipeline) in &self.pipelines {
            let mut pipeline = pipeline.borrow_mut();
            match compile(ctx, &pipeline.path, &pipeline.spec) {
                Some(new_handle) => {
                    if let Some(old) = pipeline.handle.replace(new_handle) {
                        ctx.deferred_release_pipeline(old);
                    }
                    log::info!("reloaded pipeline '{name}'");
                }
                None => {
                    // compile already logged the error; keep the last good state
                }
            }
        }
    }

    /// Fetch a pipeline by shader name
    pub fn get(&self, name: &str) -> RenderResult<SharedPipeline> {
        self.pipelines.get(name).map(Rc::clone).ok_or_else(|| RenderError::NotFound(name.to_owned()))
    }

    /// Whether a shader name is present
    pub fn exists(&self, name: &str) -> bool {
        self.pipelines.contains_key(name)
    }
}

fn shader_name(path: &Path) -> String {
    path.file_stem().map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned())
}

fn compile(ctx: &mut GraphicsContext, path: &Path, spec: &PipelineSpecification) -> Option<PipelineHandle> {
    let bytecode = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::error!("failed to read shader '{}': {err}", path.display());
            return None;
        }
    };
    match ctx.device.create_pipeline(&shader_name(path), &bytecode, spec) {
        Ok(handle) => Some(handle),
        Err(err) => {
            log::error!("{err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::BackendKind;
    use crate::render::backends::headless::HeadlessDevice;

    fn context() -> GraphicsContext {
        GraphicsContext::new(BackendKind::Headless).unwrap()
    }

    fn headless(ctx: &GraphicsContext) -> &HeadlessDevice {
        ctx.device().as_any().downcast_ref().expect("headless backend")
    }

    struct ShaderDir {
        root: PathBuf,
    }

    impl ShaderDir {
        fn new(test: &str) -> Self {
            let root = std::env::temp_dir().join(format!("ember_pipeline_{}_{test}", std::process::id()));
            std::fs::create_dir_all(&root).unwrap();
            Self { root }
        }

        fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
            let path = self.root.join(name);
            std::fs::write(&path, contents).unwrap();
            path
        }
    }

    impl Drop for ShaderDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn load_twice_returns_identical_pipeline() {
        let mut ctx = context();
        let dir = ShaderDir::new("identity");
        let path = dir.write("pbr.spv", b"bytecode");

        let mut library = PipelineLibrary::new();
        let first = library.load(&mut ctx, &path, PipelineSpecification::default());
        let second = library.load(
            &mut ctx,
            &path,
            PipelineSpecification { cull_mode: CullMode::Front, ..Default::default() },
        );

        assert!(Rc::ptr_eq(&first, &second));
        // The second specification was discarded
        assert_eq!(first.borrow().specification().cull_mode, CullMode::Back);
    }

    #[test]
    fn missing_shader_loads_unbound() {
        let mut ctx = context();
        let dir = ShaderDir::new("missing");
        let path = dir.root.join("absent.spv");

        let mut library = PipelineLibrary::new();
        let pipeline = library.load(&mut ctx, &path, PipelineSpecification::default());
        assert!(!pipeline.borrow().is_compiled());

        let list = ctx.device_mut().begin_command_list().unwrap();
        assert!(!pipeline.borrow().bind(&mut ctx, list));
    }

    #[test]
    fn reload_all_isolates_per_shader_failure() {
        let mut ctx = context();
        let dir = ShaderDir::new("reload");
        let good_a = dir.write("lighting.spv", b"v1");
        let good_b = dir.write("composite.spv", b"v1");
        let failing = dir.write("bloom.spv", b"v1");

        let mut library = PipelineLibrary::new();
        let a = library.load(&mut ctx, &good_a, PipelineSpecification::default());
        let b = library.load(&mut ctx, &good_b, PipelineSpecification::default());
        let c = library.load(&mut ctx, &failing, PipelineSpecification::default());
        assert!(a.borrow().is_compiled() && b.borrow().is_compiled() && c.borrow().is_compiled());
        let pipelines_before = headless(&ctx).pipeline_count();

        // Empty bytecode fails compilation
        dir.write("bloom.spv", b"");
        library.reload_all(&mut ctx);

        assert!(a.borrow().is_compiled());
        assert!(b.borrow().is_compiled());
        // The failing pipeline keeps its previous compiled state
        assert!(c.borrow().is_compiled());

        // Two recompiles retired two old pipelines; the failed one retired nothing.
        // Retired handles are queued, so the live count grows by the two new objects
        // until the frame cycle destroys the old ones.
        assert_eq!(headless(&ctx).pipeline_count(), pipelines_before + 2);
        for _ in 0..crate::render::FRAME_COUNT {
            ctx.begin_frame().unwrap();
        }
        assert_eq!(headless(&ctx).pipeline_count(), pipelines_before);
    }

    #[test]
    fn get_reports_missing_pipelines() {
        let library = PipelineLibrary::new();
        assert!(matches!(library.get("nope"), Err(RenderError::NotFound(_))));
        assert!(!library.exists("nope"));
    }

    #[test]
    fn named_parameters_resolve_in_order() {
        let mut ctx = context();
        let dir = ShaderDir::new("slots");
        let path = dir.write("geometry.spv", b"bytecode");

        let mut library = PipelineLibrary::new();
        let pipeline = library.load(
            &mut ctx,
            &path,
            PipelineSpecification {
                parameters: vec!["GlobalData".into(), "Transform".into(), "MaterialData".into()],
                ..Default::default()
            },
        );
        let pipeline = pipeline.borrow();
        assert_eq!(pipeline.slot("GlobalData").unwrap(), 0);
        assert_eq!(pipeline.slot("MaterialData").unwrap(), 2);
        assert!(matches!(pipeline.slot("Nope"), Err(RenderError::NotFound(_))));
    }
}
