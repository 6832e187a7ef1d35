//! A minimal OpenGL sample: a textured quad blended from two textures,
//! drawn until the window closes.

use std::sync::Arc;

use glam::{Vec2, Vec3};
use glow::HasContext;
use sdl2::event::{Event, WindowEvent};
use sdl2::keyboard::Keycode;

use crate::abs::{App, Mesh, ShaderProgram, Texture, Vertex, letterbox};

mod abs;

#[derive(Clone, Copy)]
#[repr(C)]
struct QuadVertex {
    position: Vec2,
    color: Vec3,
    uv: Vec2,
}

impl QuadVertex {
    const fn new(position: Vec2, color: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            color,
            uv,
        }
    }
}

impl Vertex for QuadVertex {
    fn vertex_attribs(gl: &glow::Context) {
        let stride = std::mem::size_of::<QuadVertex>() as i32;
        unsafe {
            gl.enable_vertex_attrib_array(0);
            gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, stride, 0);
            gl.enable_vertex_attrib_array(1);
            gl.vertex_attrib_pointer_f32(1, 3, glow::FLOAT, false, stride, 8);
            gl.enable_vertex_attrib_array(2);
            gl.vertex_attrib_pointer_f32(2, 2, glow::FLOAT, false, stride, 20);
        }
    }
}

const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex::new(Vec2::new(0.9, 0.9), Vec3::new(1.0, 0.0, 0.0), Vec2::new(1.0, 1.0)),
    QuadVertex::new(Vec2::new(0.9, -0.9), Vec3::new(0.0, 1.0, 0.0), Vec2::new(1.0, 0.0)),
    QuadVertex::new(Vec2::new(-0.9, -0.9), Vec3::new(0.0, 0.0, 1.0), Vec2::new(0.0, 0.0)),
    QuadVertex::new(Vec2::new(-0.9, 0.9), Vec3::new(0.0, 0.0, 1.0), Vec2::new(0.0, 1.0)),
];

const QUAD_INDICES: [u32; 6] = [0, 1, 3, 1, 2, 3];

fn setup_logging() {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()
        .unwrap();
}

fn load_texture(gl: &Arc<glow::Context>, bytes: &[u8]) -> Texture {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Png).unwrap();
    Texture::new(gl, &image)
}

fn main() {
    setup_logging();

    let mut app = App::new("texquad", 600, 600);
    let version = unsafe { app.gl.get_parameter_string(glow::VERSION) };
    log::info!("using OpenGL {version}");

    let quad = Mesh::new(&app.gl, &QUAD_VERTICES, &QUAD_INDICES);

    // Texture units 0 and 1 stay bound for the whole run; the sampler
    // uniforms below point at them.
    let checker = load_texture(&app.gl, include_bytes!("assets/checker.png"));
    checker.bind(0);
    let gradient = load_texture(&app.gl, include_bytes!("assets/gradient.png"));
    gradient.bind(1);

    let program = match ShaderProgram::from_sources(
        &app.gl,
        include_str!("shaders/quad/vert.glsl"),
        include_str!("shaders/quad/frag.glsl"),
    ) {
        Ok(program) => program,
        Err(err) => {
            log::error!("{err}");
            std::process::exit(err.exit_code());
        }
    };
    program.bind();
    program.set_uniform("texture1", 0);
    program.set_uniform("texture2", 1);

    'running: loop {
        for event in app.event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape),
                    ..
                } => break 'running,
                Event::Window {
                    win_event: WindowEvent::SizeChanged(width, height),
                    ..
                } => {
                    let (x, y, w, h) = letterbox(width, height);
                    unsafe { app.gl.viewport(x, y, w, h) };
                }
                _ => {}
            }
        }

        unsafe {
            app.gl.clear_color(0.0, 0.0, 0.0, 1.0);
            app.gl.clear(glow::COLOR_BUFFER_BIT);
        }

        program.bind();
        quad.draw();

        app.window.gl_swap_window();
    }
}
