//! OpenGL shader programs.
//!
//! This module defines the [`Shader`] and [`ShaderProgram`] structs for
//! compiling and linking GLSL, the [`Uniform`] trait for writing uniform
//! values, and [`ShaderError`] for the three fatal failure classes (file
//! read, compile, link). Resolved uniform locations are memoized per
//! program, including the not-found case, so the backend is queried at most
//! once per name.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fxhash::FxHashMap;
use glam::{IVec2, IVec3, IVec4, Vec2, Vec3, Vec4};
use thiserror::Error;

use crate::abs::backend::GlApi;

/// The pipeline role a shader object is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn gl_enum(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Errors raised while building a shader program. None of these are
/// recoverable for a fixed, known-good shader pair; callers are expected to
/// log the message and exit with [`ShaderError::exit_code`].
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("failed to open shader file {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to compile {stage} shader:\n{log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("failed to link shader program:\n{log}")]
    Link { log: String },
    #[error("shader backend error: {0}")]
    Backend(String),
}

impl ShaderError {
    /// Process exit code for this failure class. The three classes the
    /// sample distinguishes get their own codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShaderError::FileOpen { .. } => 2,
            ShaderError::Compile { .. } => 3,
            ShaderError::Link { .. } => 4,
            ShaderError::Backend(_) => 1,
        }
    }
}

/// An individual compiled shader stage. Only needed while linking; the
/// stage object is deleted when this is dropped.
pub struct Shader<G: GlApi = glow::Context> {
    gl: Arc<G>,
    id: G::Shader,
    _stage: ShaderStage,
}

impl<G: GlApi> Shader<G> {
    /// Compiles a shader stage from the given source code.
    pub fn new(gl: &Arc<G>, stage: ShaderStage, source: &str) -> Result<Self, ShaderError> {
        let shader = gl.create_shader(stage.gl_enum()).map_err(ShaderError::Backend)?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);

        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(ShaderError::Compile { stage, log });
        }

        Ok(Self {
            gl: Arc::clone(gl),
            id: shader,
            _stage: stage,
        })
    }
}

impl<G: GlApi> Drop for Shader<G> {
    fn drop(&mut self) {
        self.gl.delete_shader(self.id);
    }
}

/// A value that can be written to a uniform location, dispatching to the
/// backend call matching its arity and numeric kind.
pub trait Uniform<G: GlApi> {
    fn apply(&self, gl: &G, location: &G::UniformLocation);
}

impl<G: GlApi> Uniform<G> for i32 {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_1_i32(location, *self);
    }
}

impl<G: GlApi> Uniform<G> for (i32, i32) {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_2_i32(location, self.0, self.1);
    }
}

impl<G: GlApi> Uniform<G> for (i32, i32, i32) {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_3_i32(location, self.0, self.1, self.2);
    }
}

impl<G: GlApi> Uniform<G> for (i32, i32, i32, i32) {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_4_i32(location, self.0, self.1, self.2, self.3);
    }
}

impl<G: GlApi> Uniform<G> for f32 {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_1_f32(location, *self);
    }
}

impl<G: GlApi> Uniform<G> for (f32, f32) {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_2_f32(location, self.0, self.1);
    }
}

impl<G: GlApi> Uniform<G> for (f32, f32, f32) {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_3_f32(location, self.0, self.1, self.2);
    }
}

impl<G: GlApi> Uniform<G> for (f32, f32, f32, f32) {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_4_f32(location, self.0, self.1, self.2, self.3);
    }
}

impl<G: GlApi> Uniform<G> for Vec2 {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_2_f32(location, self.x, self.y);
    }
}

impl<G: GlApi> Uniform<G> for Vec3 {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_3_f32(location, self.x, self.y, self.z);
    }
}

impl<G: GlApi> Uniform<G> for Vec4 {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_4_f32(location, self.x, self.y, self.z, self.w);
    }
}

impl<G: GlApi> Uniform<G> for IVec2 {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_2_i32(location, self.x, self.y);
    }
}

impl<G: GlApi> Uniform<G> for IVec3 {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_3_i32(location, self.x, self.y, self.z);
    }
}

impl<G: GlApi> Uniform<G> for IVec4 {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        gl.uniform_4_i32(location, self.x, self.y, self.z, self.w);
    }
}

impl<G: GlApi, T: Uniform<G>> Uniform<G> for &T {
    fn apply(&self, gl: &G, location: &G::UniformLocation) {
        (*self).apply(gl, location);
    }
}

/// A linked shader program. Sole owner of the underlying program object;
/// deleted exactly once on drop. Uniform locations are cached per name,
/// `None` meaning the backend reported the name as not found.
pub struct ShaderProgram<G: GlApi = glow::Context> {
    gl: Arc<G>,
    id: G::Program,
    uniform_locations: RefCell<FxHashMap<String, Option<G::UniformLocation>>>,
}

impl<G: GlApi> ShaderProgram<G> {
    /// Compiles both stages and links them into a program. The intermediate
    /// stage objects are deleted before this returns, success or not; the
    /// linked program is self-contained.
    ///
    /// A valid rendering context must be current.
    pub fn from_sources(
        gl: &Arc<G>,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, ShaderError> {
        let vert = Shader::new(gl, ShaderStage::Vertex, vertex_source)?;
        let frag = Shader::new(gl, ShaderStage::Fragment, fragment_source)?;

        let program = gl.create_program().map_err(ShaderError::Backend)?;
        gl.attach_shader(program, vert.id);
        gl.attach_shader(program, frag.id);
        gl.link_program(program);

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(ShaderError::Link { log });
        }

        gl.detach_shader(program, vert.id);
        gl.detach_shader(program, frag.id);

        Ok(Self {
            gl: Arc::clone(gl),
            id: program,
            uniform_locations: RefCell::new(FxHashMap::default()),
        })
    }

    /// Reads both stage sources from disk and links them. Paths are
    /// relative to the working directory.
    pub fn from_files(
        gl: &Arc<G>,
        vertex_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
    ) -> Result<Self, ShaderError> {
        let vertex_source = read_source(vertex_path.as_ref())?;
        let fragment_source = read_source(fragment_path.as_ref())?;
        Self::from_sources(gl, &vertex_source, &fragment_source)
    }

    /// Makes this program the active one for subsequent draw and uniform
    /// calls on the current context.
    pub fn bind(&self) {
        self.gl.use_program(Some(self.id));
    }

    /// Resolves the location of a uniform by name, querying the backend at
    /// most once per name. The not-found answer is cached too, so a typo'd
    /// or optimized-out name costs a single query over the program's
    /// lifetime.
    pub fn location(&self, name: &str) -> Option<G::UniformLocation> {
        if let Some(cached) = self.uniform_locations.borrow().get(name) {
            return cached.clone();
        }

        let location = self.gl.get_uniform_location(self.id, name);
        self.uniform_locations
            .borrow_mut()
            .insert(name.to_owned(), location.clone());
        location
    }

    /// Writes a uniform value. Unknown names are silently ignored.
    ///
    /// The program must currently be bound; the backend discards writes to
    /// a program that is not active.
    pub fn set_uniform<T: Uniform<G>>(&self, name: &str, value: T) {
        if let Some(location) = self.location(name) {
            value.apply(&self.gl, &location);
        }
    }
}

impl<G: GlApi> Drop for ShaderProgram<G> {
    fn drop(&mut self) {
        self.gl.delete_program(self.id);
    }
}

impl<G: GlApi> fmt::Debug for ShaderProgram<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgram").finish_non_exhaustive()
    }
}

fn read_source(path: &Path) -> Result<String, ShaderError> {
    std::fs::read_to_string(path).map_err(|source| ShaderError::FileOpen {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::{HashMap, HashSet};

    use super::*;

    const VERT_OK: &str = "#version 330 core\nvoid main() { gl_Position = vec4(0.0); }";
    const FRAG_OK: &str = "#version 330 core\nout vec4 FragColor;\nvoid main() { FragColor = vec4(1.0); }";
    // The fake fails compilation on this directive, like a real driver would.
    const VERT_BAD: &str = "#version 330 core\n#error deliberate\nvoid main() {}";
    const FRAG_BAD: &str = "#version 330 core\n#error deliberate\nvoid main() {}";

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Write {
        I1(i32),
        I2(i32, i32),
        I3(i32, i32, i32),
        I4(i32, i32, i32, i32),
        F1(f32),
        F2(f32, f32),
        F3(f32, f32, f32),
        F4(f32, f32, f32, f32),
    }

    /// Records every call the shader layer makes, so tests can observe
    /// object lifetimes, query counts and uniform writes.
    struct FakeGl {
        next_id: Cell<u32>,
        shaders: RefCell<HashMap<u32, String>>,
        programs: RefCell<HashSet<u32>>,
        attachments: RefCell<HashMap<u32, Vec<u32>>>,
        active_program: Cell<Option<u32>>,
        uniforms: HashMap<String, i32>,
        location_queries: Cell<usize>,
        writes: RefCell<Vec<(i32, Write)>>,
        link_ok: Cell<bool>,
    }

    impl FakeGl {
        fn new(uniforms: &[(&str, i32)]) -> Arc<Self> {
            Arc::new(Self {
                next_id: Cell::new(1),
                shaders: RefCell::new(HashMap::new()),
                programs: RefCell::new(HashSet::new()),
                attachments: RefCell::new(HashMap::new()),
                active_program: Cell::new(None),
                uniforms: uniforms
                    .iter()
                    .map(|(name, loc)| (name.to_string(), *loc))
                    .collect(),
                location_queries: Cell::new(0),
                writes: RefCell::new(Vec::new()),
                link_ok: Cell::new(true),
            })
        }

        fn alloc_id(&self) -> u32 {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            id
        }

        fn live_shaders(&self) -> usize {
            self.shaders.borrow().len()
        }

        fn live_programs(&self) -> usize {
            self.programs.borrow().len()
        }
    }

    impl GlApi for FakeGl {
        type Shader = u32;
        type Program = u32;
        type UniformLocation = i32;

        fn create_shader(&self, _stage: u32) -> Result<u32, String> {
            let id = self.alloc_id();
            self.shaders.borrow_mut().insert(id, String::new());
            Ok(id)
        }

        fn shader_source(&self, shader: u32, source: &str) {
            self.shaders.borrow_mut().insert(shader, source.to_owned());
        }

        fn compile_shader(&self, _shader: u32) {}

        fn get_shader_compile_status(&self, shader: u32) -> bool {
            !self.shaders.borrow()[&shader].contains("#error")
        }

        fn get_shader_info_log(&self, _shader: u32) -> String {
            "0:2: '#error' : deliberate".to_owned()
        }

        fn delete_shader(&self, shader: u32) {
            assert!(
                self.shaders.borrow_mut().remove(&shader).is_some(),
                "double delete of shader {shader}"
            );
        }

        fn create_program(&self) -> Result<u32, String> {
            let id = self.alloc_id();
            self.programs.borrow_mut().insert(id);
            Ok(id)
        }

        fn attach_shader(&self, program: u32, shader: u32) {
            self.attachments.borrow_mut().entry(program).or_default().push(shader);
        }

        fn detach_shader(&self, program: u32, shader: u32) {
            let mut attachments = self.attachments.borrow_mut();
            let attached = attachments.entry(program).or_default();
            let pos = attached.iter().position(|&s| s == shader).expect("not attached");
            attached.remove(pos);
        }

        fn link_program(&self, _program: u32) {}

        fn get_program_link_status(&self, _program: u32) -> bool {
            self.link_ok.get()
        }

        fn get_program_info_log(&self, _program: u32) -> String {
            "error: interface mismatch".to_owned()
        }

        fn delete_program(&self, program: u32) {
            assert!(
                self.programs.borrow_mut().remove(&program),
                "double delete of program {program}"
            );
        }

        fn use_program(&self, program: Option<u32>) {
            self.active_program.set(program);
        }

        fn get_uniform_location(&self, _program: u32, name: &str) -> Option<i32> {
            self.location_queries.set(self.location_queries.get() + 1);
            self.uniforms.get(name).copied()
        }

        fn uniform_1_i32(&self, location: &i32, x: i32) {
            self.writes.borrow_mut().push((*location, Write::I1(x)));
        }

        fn uniform_2_i32(&self, location: &i32, x: i32, y: i32) {
            self.writes.borrow_mut().push((*location, Write::I2(x, y)));
        }

        fn uniform_3_i32(&self, location: &i32, x: i32, y: i32, z: i32) {
            self.writes.borrow_mut().push((*location, Write::I3(x, y, z)));
        }

        fn uniform_4_i32(&self, location: &i32, x: i32, y: i32, z: i32, w: i32) {
            self.writes.borrow_mut().push((*location, Write::I4(x, y, z, w)));
        }

        fn uniform_1_f32(&self, location: &i32, x: f32) {
            self.writes.borrow_mut().push((*location, Write::F1(x)));
        }

        fn uniform_2_f32(&self, location: &i32, x: f32, y: f32) {
            self.writes.borrow_mut().push((*location, Write::F2(x, y)));
        }

        fn uniform_3_f32(&self, location: &i32, x: f32, y: f32, z: f32) {
            self.writes.borrow_mut().push((*location, Write::F3(x, y, z)));
        }

        fn uniform_4_f32(&self, location: &i32, x: f32, y: f32, z: f32, w: f32) {
            self.writes.borrow_mut().push((*location, Write::F4(x, y, z, w)));
        }
    }

    fn linked_program(gl: &Arc<FakeGl>) -> ShaderProgram<FakeGl> {
        ShaderProgram::from_sources(gl, VERT_OK, FRAG_OK).unwrap()
    }

    #[test]
    fn location_is_queried_once_per_name() {
        let gl = FakeGl::new(&[("texture1", 3)]);
        let program = linked_program(&gl);

        assert_eq!(program.location("texture1"), Some(3));
        assert_eq!(program.location("texture1"), Some(3));
        assert_eq!(gl.location_queries.get(), 1);
    }

    #[test]
    fn not_found_location_is_memoized() {
        let gl = FakeGl::new(&[("texture1", 3)]);
        let program = linked_program(&gl);

        assert_eq!(program.location("no_such_uniform"), None);
        assert_eq!(program.location("no_such_uniform"), None);
        assert_eq!(gl.location_queries.get(), 1);
    }

    #[test]
    fn bind_then_set_sampler_writes_through() {
        let gl = FakeGl::new(&[("texture1", 0), ("texture2", 1)]);
        let program = linked_program(&gl);

        program.bind();
        program.set_uniform("texture1", 0);
        program.set_uniform("texture2", 1);

        assert!(gl.active_program.get().is_some());
        assert_eq!(
            *gl.writes.borrow(),
            vec![(0, Write::I1(0)), (1, Write::I1(1))]
        );
    }

    #[test]
    fn set_uniform_on_unknown_name_is_ignored() {
        let gl = FakeGl::new(&[]);
        let program = linked_program(&gl);

        program.bind();
        program.set_uniform("no_such_uniform", 7);

        assert!(gl.writes.borrow().is_empty());
    }

    #[test]
    fn vertex_compile_error_reports_vertex_stage() {
        let gl = FakeGl::new(&[]);
        let err = ShaderProgram::from_sources(&gl, VERT_BAD, FRAG_OK).unwrap_err();

        match &err {
            ShaderError::Compile { stage, log } => {
                assert_eq!(*stage, ShaderStage::Vertex);
                assert!(log.contains("#error"));
            }
            other => panic!("expected compile error, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 3);
        assert_eq!(gl.live_shaders(), 0);
        assert_eq!(gl.live_programs(), 0);
    }

    #[test]
    fn fragment_compile_error_releases_compiled_vertex_stage() {
        let gl = FakeGl::new(&[]);
        let err = ShaderProgram::from_sources(&gl, VERT_OK, FRAG_BAD).unwrap_err();

        match &err {
            ShaderError::Compile { stage, .. } => assert_eq!(*stage, ShaderStage::Fragment),
            other => panic!("expected compile error, got {other:?}"),
        }
        assert_eq!(gl.live_shaders(), 0);
        assert_eq!(gl.live_programs(), 0);
    }

    #[test]
    fn link_failure_releases_all_objects() {
        let gl = FakeGl::new(&[]);
        gl.link_ok.set(false);

        let err = ShaderProgram::from_sources(&gl, VERT_OK, FRAG_OK).unwrap_err();
        match &err {
            ShaderError::Link { log } => assert!(log.contains("mismatch")),
            other => panic!("expected link error, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 4);
        assert_eq!(gl.live_shaders(), 0);
        assert_eq!(gl.live_programs(), 0);
    }

    #[test]
    fn successful_link_releases_stage_objects_and_drop_releases_program() {
        let gl = FakeGl::new(&[]);
        let program = linked_program(&gl);

        assert_eq!(gl.live_shaders(), 0);
        assert_eq!(gl.live_programs(), 1);

        drop(program);
        assert_eq!(gl.live_programs(), 0);
    }

    // unwrap_err in the construction-failure tests needs the program type
    // to be debug-printable.
    #[test]
    fn program_debug_does_not_expose_backend_handles() {
        let gl = FakeGl::new(&[]);
        let program = linked_program(&gl);

        assert_eq!(format!("{program:?}"), "ShaderProgram { .. }");
    }

    #[test]
    fn uniform_dispatch_matches_arity_and_kind() {
        let gl = FakeGl::new(&[("u", 5)]);
        let program = linked_program(&gl);
        program.bind();

        program.set_uniform("u", 1);
        program.set_uniform("u", (1, 2));
        program.set_uniform("u", (1, 2, 3));
        program.set_uniform("u", (1, 2, 3, 4));
        program.set_uniform("u", 1.0f32);
        program.set_uniform("u", (1.0f32, 2.0));
        program.set_uniform("u", (1.0f32, 2.0, 3.0));
        program.set_uniform("u", (1.0f32, 2.0, 3.0, 4.0));

        let writes: Vec<Write> = gl.writes.borrow().iter().map(|(_, w)| *w).collect();
        assert_eq!(
            writes,
            vec![
                Write::I1(1),
                Write::I2(1, 2),
                Write::I3(1, 2, 3),
                Write::I4(1, 2, 3, 4),
                Write::F1(1.0),
                Write::F2(1.0, 2.0),
                Write::F3(1.0, 2.0, 3.0),
                Write::F4(1.0, 2.0, 3.0, 4.0),
            ]
        );
        // All writes went to the single cached location.
        assert!(gl.writes.borrow().iter().all(|(loc, _)| *loc == 5));
        assert_eq!(gl.location_queries.get(), 1);
    }

    #[test]
    fn glam_vectors_dispatch_by_component_kind() {
        let gl = FakeGl::new(&[("u", 2)]);
        let program = linked_program(&gl);
        program.bind();

        program.set_uniform("u", Vec3::new(0.5, 0.25, 0.125));
        program.set_uniform("u", IVec2::new(8, 9));

        assert_eq!(
            *gl.writes.borrow(),
            vec![(2, Write::F3(0.5, 0.25, 0.125)), (2, Write::I2(8, 9))]
        );
    }

    #[test]
    fn missing_source_file_is_a_file_open_error() {
        let gl = FakeGl::new(&[]);
        let err = ShaderProgram::from_files(
            &gl,
            "shaders/does-not-exist.vert",
            "shaders/does-not-exist.frag",
        )
        .unwrap_err();

        match &err {
            ShaderError::FileOpen { path, .. } => {
                assert!(path.ends_with("does-not-exist.vert"));
            }
            other => panic!("expected file open error, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 2);
        // Nothing was handed to the backend.
        assert_eq!(gl.live_shaders(), 0);
        assert_eq!(gl.live_programs(), 0);
    }
}
