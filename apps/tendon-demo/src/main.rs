//! Tendon IK demo CLI.
//!
//! Provides three modes of operation:
//! - `headless`: Drive a 2D arm and a 3D leg toward orbiting targets and
//!   print end-effector positions
//! - `validate`: Parse a TOML stack file and list its entries
//! - `info`: Print workspace crate versions

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use bevy::prelude::*;
use clap::{Parser, Subcommand, ValueEnum};
use nalgebra::{Vector2, Vector3};

use tendon_core::prelude::*;
use tendon_ik::ik2d::Modifier2DConfig;
use tendon_ik::ik3d::Modifier3DConfig;
use tendon_ik::prelude::*;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Inverse kinematics and secondary motion for 2D and 3D bone chains.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo rigs without a window and print where they end up.
    Headless {
        /// Number of frames to simulate.
        #[arg(short, long, default_value_t = 120)]
        frames: u32,

        /// Frame delta in seconds.
        #[arg(short, long, default_value_t = 1.0 / 60.0)]
        delta: f32,

        /// Print a line every N frames.
        #[arg(short, long, default_value_t = 20)]
        report_every: u32,
    },

    /// Check that a stack file parses and every modifier config is valid.
    Validate {
        /// Path to the TOML stack file.
        path: PathBuf,

        /// Which modifier family the file describes.
        #[arg(short, long, value_enum, default_value_t = Dimension::TwoD)]
        dimension: Dimension,
    },

    /// Print crate information.
    Info,
}

#[derive(Clone, Copy, ValueEnum)]
enum Dimension {
    #[value(name = "2d")]
    TwoD,
    #[value(name = "3d")]
    ThreeD,
}

// ---------------------------------------------------------------------------
// Demo rigs
// ---------------------------------------------------------------------------

const ARM_TARGET: &str = "arm_target";
const FOOT_TARGET: &str = "foot_target";
const KNEE_POLE: &str = "knee_pole";

fn add_chain_2d(
    skeleton: &mut Skeleton2D,
    names: &[&str],
    start: Vector2<f32>,
    lengths: &[f32],
) -> Result<Vec<BoneId>, SkeletonError> {
    let mut bones = Vec::with_capacity(names.len());
    let mut parent = None;
    let offsets = std::iter::once(0.0).chain(lengths.iter().copied());
    for (i, (name, offset)) in names.iter().zip(offsets).enumerate() {
        let local = if i == 0 {
            Transform2::from_translation(start)
        } else {
            Transform2::from_translation(Vector2::new(offset, 0.0))
        };
        let id = skeleton.add_bone(*name, parent, local)?;
        bones.push(id);
        parent = Some(id);
    }
    Ok(bones)
}

/// A three-bone arm solved with FABRIK and a two-bone tail that trails the
/// same target with Verlet motion.
fn build_rig_2d() -> Result<IkRig2D, TendonError> {
    let mut skeleton = Skeleton2D::default();
    let arm = add_chain_2d(
        &mut skeleton,
        &["shoulder", "elbow", "wrist", "hand"],
        Vector2::zeros(),
        &[1.0, 1.0, 0.5],
    )?;
    let tail = add_chain_2d(
        &mut skeleton,
        &["tail_0", "tail_1", "tail_end"],
        Vector2::new(0.0, -1.0),
        &[0.75, 0.75],
    )?;
    skeleton.auto_setup();

    let mut scene = SceneGraph::new();
    scene.insert(ARM_TARGET, Transform2::from_translation(Vector2::new(2.0, 0.0)));

    let mut stack = ModifierStack::new(StackConfig::default());
    let fabrik = Fabrik2D::new(Fabrik2DConfig {
        target: Some(NodeRef::from(ARM_TARGET)),
        joints: arm[..3].iter().copied().map(FabrikJoint2D::new).collect(),
        ..Fabrik2DConfig::default()
    })?;
    stack.push(Modifier2D::Fabrik(fabrik), Phase::Visual);

    let velvet = Velvet2D::new(Velvet2DConfig {
        target: Some(NodeRef::from(ARM_TARGET)),
        joints: tail[..2].iter().copied().map(VelvetJoint2D::new).collect(),
        ..Velvet2DConfig::default()
    })?;
    stack.push(Modifier2D::Velvet(velvet), Phase::Physics);

    Ok(IkRig2D::new(skeleton, scene, stack))
}

/// A hip-knee-ankle leg solved with the pole-driven two-bone solver.
fn build_rig_3d() -> Result<IkRig3D, TendonError> {
    let mut skeleton = Skeleton3D::default();
    let hip = skeleton.add_bone("hip", None, Transform3::identity())?;
    let knee = skeleton.add_bone(
        "knee",
        Some(hip),
        Transform3::from_translation(Vector3::new(0.0, 0.0, -1.0)),
    )?;
    skeleton.add_bone(
        "ankle",
        Some(knee),
        Transform3::from_translation(Vector3::new(0.0, 0.0, -1.0)),
    )?;
    skeleton.auto_setup();

    let mut scene = SceneGraph::new();
    scene.insert(FOOT_TARGET, Transform3::from_translation(Vector3::new(0.0, 0.0, -1.5)));
    scene.insert(KNEE_POLE, Transform3::from_translation(Vector3::new(0.0, 2.0, -1.0)));

    let mut stack = ModifierStack::new(StackConfig::default());
    let leg = TwoBoneIk3D::new(TwoBoneIk3DConfig {
        target: Some(NodeRef::from(FOOT_TARGET)),
        use_pole: true,
        pole: Some(NodeRef::from(KNEE_POLE)),
        bone_one: Some(hip),
        bone_two: Some(knee),
        ..TwoBoneIk3DConfig::default()
    })?;
    stack.push(Modifier3D::TwoBone(leg), Phase::Visual);

    Ok(IkRig3D::new(skeleton, scene, stack))
}

/// Move both targets one step along their orbits.
fn orbit_targets(app: &mut App, t: f32) {
    let world = app.world_mut();
    let arm = Vector2::new(1.5 * t.cos(), 1.5 * t.sin());
    world
        .resource_mut::<IkRig2D>()
        .scene
        .set_world(ARM_TARGET, Transform2::from_translation(arm));

    let foot = Vector3::new(0.5 * t.sin(), 0.0, -1.5 + 0.25 * t.cos());
    world
        .resource_mut::<IkRig3D>()
        .scene
        .set_world(FOOT_TARGET, Transform3::from_translation(foot));
}

fn bone_origin_2d(rig: &IkRig2D, name: &str) -> Option<Vector2<f32>> {
    let id = rig.skeleton.find_bone(name)?;
    rig.skeleton.world_transform(id).ok().map(|t| t.origin)
}

fn bone_origin_3d(rig: &IkRig3D, name: &str) -> Option<Vector3<f32>> {
    let id = rig.skeleton.find_bone(name)?;
    rig.skeleton.world_transform(id).ok().map(|t| t.origin)
}

fn status(report: Option<&TickReport>) -> String {
    report.map_or_else(
        || "-".to_string(),
        |r| format!("{:?} ran={} ok={}", r.status, r.ran(), r.all_ok()),
    )
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn run_headless(frames: u32, delta: f32, report_every: u32) -> Result<(), TendonError> {
    let mut app = App::new();
    app.add_plugins(TendonIkPlugin);
    app.insert_resource(build_rig_2d()?);
    app.insert_resource(build_rig_3d()?);
    app.insert_resource(Time::<()>::default());
    app.finish();
    app.cleanup();

    let step = Duration::from_secs_f32(delta.max(0.0));
    for frame in 1..=frames {
        #[allow(clippy::cast_precision_loss)]
        orbit_targets(&mut app, frame as f32 * delta);
        app.world_mut().resource_mut::<Time>().advance_by(step);
        app.update();
        app.world_mut().run_schedule(FixedUpdate);

        if report_every > 0 && frame % report_every == 0 {
            let rig_2d = app.world().resource::<IkRig2D>();
            let rig_3d = app.world().resource::<IkRig3D>();
            let reports = app.world().resource::<LastTickReports>();
            println!(
                "frame {frame}: hand={:?} tail={:?} ankle={:?}",
                bone_origin_2d(rig_2d, "hand"),
                bone_origin_2d(rig_2d, "tail_end"),
                bone_origin_3d(rig_3d, "ankle"),
            );
            println!(
                "  2d visual [{}] physics [{}] | 3d visual [{}]",
                status(reports.visual_2d.as_ref()),
                status(reports.physics_2d.as_ref()),
                status(reports.visual_3d.as_ref()),
            );
        }
    }
    Ok(())
}

fn run_validate(path: &Path, dimension: Dimension) -> Result<(), TendonError> {
    let names: Vec<(String, Phase, bool)> = match dimension {
        Dimension::TwoD => {
            let definition = StackDefinition::<Modifier2DConfig>::from_file(path)?;
            let stack: ModifierStack<Modifier2D> = ModifierStack::from_definition(definition)?;
            stack
                .entries()
                .iter()
                .map(|e| (e.modifier.name().to_string(), e.phase, e.enabled))
                .collect()
        }
        Dimension::ThreeD => {
            let definition = StackDefinition::<Modifier3DConfig>::from_file(path)?;
            let stack: ModifierStack<Modifier3D> = ModifierStack::from_definition(definition)?;
            stack
                .entries()
                .iter()
                .map(|e| (e.modifier.name().to_string(), e.phase, e.enabled))
                .collect()
        }
    };

    println!("{}: {} modifier(s)", path.display(), names.len());
    for (i, (name, phase, enabled)) in names.iter().enumerate() {
        let state = if *enabled { "" } else { " (disabled)" };
        println!("  [{i}] {name} phase={phase:?}{state}");
    }
    Ok(())
}

fn run_info() {
    println!("tendon v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  tendon-core  {}", env!("CARGO_PKG_VERSION"));
    println!("  tendon-ik    {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("solvers: look_at two_bone duo fabrik constrained_fabrik ccd curve slider velvet");
    println!("edition: 2024");
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Headless {
            frames,
            delta,
            report_every,
        }) => run_headless(frames, delta, report_every),
        Some(Commands::Validate { path, dimension }) => run_validate(&path, dimension),
        Some(Commands::Info) => {
            run_info();
            Ok(())
        }
        None => run_headless(120, 1.0 / 60.0, 20),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
