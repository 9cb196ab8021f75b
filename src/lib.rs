extern crate nalgebra as na;

pub mod aabb;
pub mod boundaries;
pub mod bvh;
pub mod camera;
pub mod config;
pub mod directions;
pub mod distributions;
pub mod error;
pub mod film;
pub mod geometry;
pub mod integrator;
pub mod materials;
pub mod sbvh;
pub mod scene;
pub mod session;
pub mod spectrum;
pub mod threadpool;
pub mod utils;


pub use bvh::{Bvh, SplitStrategy};
pub use config::{BvhConfig, IntegratorConfig, SessionConfig};
pub use error::{PoolError, RenderError, TraceError};
pub use film::{Accumulator, CameraSample, Film};
pub use integrator::{IntegrationReport, Integrator};
pub use scene::{Primitive, PrimitiveArena, PrimitiveId, Scene};
pub use session::RenderSession;
