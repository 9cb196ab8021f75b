use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use image::{ImageFormat, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use nalgebra::UnitQuaternion;

use pathtracing_engine::camera::{Camera, PinholeCamera};
use pathtracing_engine::geometry::{Object3D, Shape3D, Vec2f, Vec3f};
use pathtracing_engine::materials::Material;
use pathtracing_engine::sbvh::build_sbvh;
use pathtracing_engine::spectrum::black;
use pathtracing_engine::{
    Accumulator, Bvh, BvhConfig, Film, Integrator, IntegratorConfig, Primitive, PrimitiveArena,
    RenderError, RenderSession, Scene, SessionConfig,
};

/// Renders a small built-in scene with the path tracer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Where to write the PPM image
    output: PathBuf,

    /// Also write a PNG copy
    #[arg(long)]
    png: Option<PathBuf>,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    #[arg(long, default_value_t = 64)]
    samples_per_pixel: usize,

    /// The samples are traced in this many batches
    #[arg(long, default_value_t = 8)]
    passes: usize,

    /// Worker threads, 0 for one per core
    #[arg(long, default_value_t = 0)]
    threads: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Build with spatial splits
    #[arg(long)]
    spatial: bool,

    #[arg(long)]
    no_roulette: bool,

    /// Lens radius; focus is set on whatever the image center shows
    #[arg(long, default_value_t = 0.0)]
    aperture: f64,
}

fn demo_scene(args: &Args) -> Result<PrimitiveArena, RenderError> {
    let white = Arc::new(Material::diffuse(Vec3f::new(0.75, 0.75, 0.75)));
    let red = Arc::new(Material::diffuse(Vec3f::new(0.75, 0.2, 0.2)));
    let green = Arc::new(Material::diffuse(Vec3f::new(0.2, 0.75, 0.2)));
    let mirror = Arc::new(Material::specular(Vec3f::new(0.95, 0.95, 0.95)));
    let light = Arc::new(Material::emissive(black(), Vec3f::new(12.0, 11.0, 9.0)));
    let glossy = Arc::new(Material::glossy(Vec3f::new(0.7, 0.7, 0.75), 0.35)?);
    let fog = Arc::new(Material::volumetric(
        0.8,
        Vec3f::new(0.8, 0.8, 0.9),
        black(),
    )?);

    let mut arena = PrimitiveArena::new();
    let wall = |min: Vec3f, max: Vec3f| Object3D::axis_aligned_box(min, max);
    arena.push(Primitive::new(
        wall(Vec3f::new(-5.0, -5.1, -5.0), Vec3f::new(5.0, -5.0, 15.0)),
        white.clone(),
    ));
    arena.push(Primitive::new(
        wall(Vec3f::new(-5.0, 5.0, -5.0), Vec3f::new(5.0, 5.1, 15.0)),
        white.clone(),
    ));
    arena.push(Primitive::new(
        wall(Vec3f::new(-5.0, -5.0, 15.0), Vec3f::new(5.0, 5.0, 15.1)),
        white.clone(),
    ));
    arena.push(Primitive::new(
        wall(Vec3f::new(-5.1, -5.0, -5.0), Vec3f::new(-5.0, 5.0, 15.0)),
        red,
    ));
    arena.push(Primitive::new(
        wall(Vec3f::new(5.0, -5.0, -5.0), Vec3f::new(5.1, 5.0, 15.0)),
        green,
    ));
    arena.push(Primitive::new(
        wall(Vec3f::new(-1.5, 4.9, 8.5), Vec3f::new(1.5, 5.0, 11.5)),
        light,
    ));
    arena.push(Primitive::new(
        Object3D::sphere(Vec3f::new(-2.2, -3.3, 11.0), 1.7),
        mirror,
    ));
    arena.push(Primitive::new(
        Object3D {
            shape: Shape3D::Ellipsoid {
                r: Vec3f::new(1.6, 1.0, 1.6),
            },
            position: Vec3f::new(2.3, -4.0, 8.0),
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.4, 0.0),
        },
        fog,
    ));
    arena.push(Primitive::new(
        Object3D {
            shape: Shape3D::Box {
                s: Vec3f::new(1.0, 2.0, 1.0),
            },
            position: Vec3f::new(2.2, -3.0, 12.5),
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.6, 0.0),
        },
        glossy,
    ));
    // a low pyramid of triangles on the floor
    let apex = Vec3f::new(-2.5, -3.5, 6.5);
    let base = [
        Vec3f::new(-3.5, -5.0, 5.5),
        Vec3f::new(-1.5, -5.0, 5.5),
        Vec3f::new(-1.5, -5.0, 7.5),
        Vec3f::new(-3.5, -5.0, 7.5),
    ];
    for i in 0..base.len() {
        arena.push(Primitive::new(
            Object3D::triangle(base[i], base[(i + 1) % base.len()], apex),
            white.clone(),
        ));
    }
    info!(
        "demo scene with {} primitives at {}x{}",
        arena.len(),
        args.width,
        args.height
    );
    Ok(arena)
}

fn dump_rendered_to_ppm(width: u32, height: u32, rendered: &[u8], path: &Path) -> std::io::Result<()> {
    let mut out_file = BufWriter::new(File::create(path)?);
    out_file.write_all(b"P6\n")?;
    out_file.write_all(format!("{} {}\n", width, height).as_bytes())?;
    out_file.write_all(b"255\n")?;
    out_file.write_all(rendered)?;
    out_file.flush()
}

fn dump_rendered_to_png(
    width: u32,
    height: u32,
    rendered: Vec<u8>,
    path: &Path,
) -> Result<(), Box<dyn Error>> {
    let img = RgbImage::from_raw(width, height, rendered).ok_or("image buffer has the wrong size")?;
    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let bvh_config = BvhConfig::default();
    let primitives = demo_scene(&args)?;
    let build_start = Instant::now();
    let structure = if args.spatial {
        build_sbvh(primitives, &bvh_config)
    } else {
        Bvh::build(primitives, &bvh_config)
    };
    info!("structure built in {:?}", build_start.elapsed());

    let camera = PinholeCamera::look_at(
        Vec3f::new(0.0, 0.0, -4.5),
        Vec3f::new(0.0, -0.5, 10.0),
        Vec3f::y(),
        std::f64::consts::PI / 2.5,
        args.width,
        args.height,
    )?;
    let mut scene = Scene::new(Box::new(camera.clone()), structure);
    if args.aperture > 0.0 {
        let center_ray = camera.get_camera_ray(&Vec2f::new(0.5, 0.5), &Vec2f::zeros())?;
        let focus_distance = scene
            .first_surface(&center_ray)
            .map_or(camera.focus_distance, |(_, distance)| distance);
        info!("focusing at {:.3}", focus_distance);
        scene.camera = Box::new(camera.with_aperture(args.aperture, focus_distance));
    }
    let scene = Arc::new(scene);

    let session = RenderSession::new(SessionConfig {
        thread_count: args.threads,
        seed: args.seed,
        ..SessionConfig::default()
    })?;
    let integrator = Integrator::new(IntegratorConfig {
        russian_roulette: !args.no_roulette,
        max_recursion_depth: args.no_roulette.then_some(32),
        ..IntegratorConfig::default()
    })?;
    let film = Arc::new(Accumulator::new(args.width as usize, args.height as usize));

    let passes = args.passes.max(1);
    let total = args.width as usize * args.height as usize * args.samples_per_pixel;
    let progress = ProgressBar::new(passes as u64);
    progress.set_style(ProgressStyle::with_template(
        "{elapsed_precise} [{bar:40}] pass {pos}/{len} {msg}",
    )?);
    let render_start = Instant::now();
    let mut dropped = 0;
    for pass in 0..passes {
        let count = total / passes + usize::from(pass < total % passes);
        let report = integrator.integrate(
            &session,
            scene.clone(),
            count,
            film.clone() as Arc<dyn Film>,
        )?;
        dropped += report.dropped;
        progress.set_message(format!("{} dropped", dropped));
        progress.inc(1);
    }
    progress.finish();
    info!(
        "rendered {} samples in {:?}: hit ratio {:.3}, {:.1} nodes per sample",
        film.total_samples(),
        render_start.elapsed(),
        film.hit_ratio(),
        film.average_traversals()
    );

    let rendered = film.to_rgb_bytes();
    dump_rendered_to_ppm(args.width, args.height, &rendered, &args.output)?;
    if let Some(png) = &args.png {
        dump_rendered_to_png(args.width, args.height, rendered, png)?;
    }
    Ok(())
}
