//! Source fixtures and a ready-wired set of in-memory ports.

use super::mocks::{
    FakeFrameRenderer, FakeMeshConverter, FakeReconstructionTool, FakeVideoEncoder,
    ScriptedVisionService,
};
use crate::core::{BoundingBox, MeshEncoding, MeshFormat};
use crate::imaging::{codec, Rgb32FImage};
use crate::stages::{StagePorts, ToolPorts};
use crate::store::{InMemoryArtifactStore, InMemoryJobStore, JobStore};
use crate::vision::RegionDetection;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;
use std::sync::Arc;

/// A unit cube as Wavefront OBJ.
pub const CUBE_OBJ: &str = "\
o cube
v -0.5 -0.5 -0.5
v 0.5 -0.5 -0.5
v 0.5 0.5 -0.5
v -0.5 0.5 -0.5
v -0.5 -0.5 0.5
v 0.5 -0.5 0.5
v 0.5 0.5 0.5
v -0.5 0.5 0.5
f 1 2 3 4
f 5 8 7 6
f 1 5 6 2
f 2 6 7 3
f 3 7 8 4
f 5 1 4 8
";

/// Light oak with banded grain and a top-to-bottom light falloff.
/// Deterministic for a given seed.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn synthetic_wood(width: u32, height: u32, seed: u64) -> Rgb32FImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let phase: f32 = rng.gen_range(0.0..TAU);
    let frequency: f32 = rng.gen_range(0.35..0.6);
    let base = [215.0 / 255.0, 190.0 / 255.0, 150.0 / 255.0];

    let mut image = Rgb32FImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let ring = (x as f32 * frequency + (y as f32 * 0.15).sin() * 2.0 + phase).sin();
        let light = 1.0 - 0.25 * (y as f32 / height.max(1) as f32);
        let noise: f32 = rng.gen_range(-0.02..0.02);
        let tone = (1.0 + 0.08 * ring + noise) * light;
        *pixel = Rgb(base.map(|c: f32| (c * tone).clamp(0.0, 1.0)));
    }
    image
}

/// [`synthetic_wood`] encoded as PNG.
#[must_use]
pub fn synthetic_wood_png(width: u32, height: u32, seed: u64) -> Vec<u8> {
    codec::encode_rgb_png(&synthetic_wood(width, height, seed)).expect("PNG encoding of a fixture")
}

/// A single-color PNG.
#[must_use]
pub fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, Rgb(rgb))
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("PNG encoding of a fixture");
    bytes.into_inner()
}

/// In-memory stores, a scripted vision service and fake tools.
///
/// The artifact store is seeded with `mem://src/wood.png` (a 64×48
/// synthetic wood photo) and `mem://fixtures/cube.obj`, which the vision
/// service hands back for single-image mesh requests.
pub struct TestFixture {
    /// Job records.
    pub jobs: Arc<InMemoryJobStore>,
    /// Blob storage.
    pub artifacts: Arc<InMemoryArtifactStore>,
    /// Vision service.
    pub vision: Arc<ScriptedVisionService>,
}

impl TestFixture {
    /// URL of the seeded wood photograph.
    pub const WOOD_URL: &'static str = "mem://src/wood.png";

    /// Creates the fixture. Every detection call sees one seat region.
    #[must_use]
    pub fn new() -> Self {
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        artifacts.insert("src/wood.png", synthetic_wood_png(64, 48, 11), codec::PNG);
        let cube = artifacts.insert("fixtures/cube.obj", CUBE_OBJ.as_bytes().to_vec(), "model/obj");
        let vision = ScriptedVisionService::new()
            .with_default_regions(vec![RegionDetection::new(
                "seat",
                BoundingBox::new(8.0, 8.0, 32.0, 16.0),
                0.92,
            )
            .with_material("oak")])
            .with_mesh(vec![MeshEncoding::new(MeshFormat::Obj, cube)]);
        Self {
            jobs: Arc::new(InMemoryJobStore::new()),
            artifacts,
            vision: Arc::new(vision),
        }
    }

    /// Replaces the vision service.
    #[must_use]
    pub fn with_vision(mut self, vision: ScriptedVisionService) -> Self {
        self.vision = Arc::new(vision);
        self
    }

    /// Ports wired to the fixture's stores, vision service and fake tools.
    #[must_use]
    pub fn ports(&self) -> StagePorts {
        self.ports_with_jobs(self.jobs.clone())
    }

    /// Like [`TestFixture::ports`], with a different job store.
    #[must_use]
    pub fn ports_with_jobs(&self, jobs: Arc<dyn JobStore>) -> StagePorts {
        let tools = ToolPorts::new()
            .with_reconstruction(Arc::new(FakeReconstructionTool::new()))
            .with_converter(Arc::new(FakeMeshConverter))
            .with_renderer(Arc::new(FakeFrameRenderer))
            .with_video(Arc::new(FakeVideoEncoder));
        StagePorts::new(jobs, self.artifacts.clone())
            .with_vision(self.vision.clone())
            .with_tools(tools)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
