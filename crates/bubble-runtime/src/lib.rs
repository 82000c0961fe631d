//! Container runtime contract and the Incus backend.
//!
//! [`ContainerRuntime`] is the seam between bubble and the container
//! backend: a value-based async trait with one concrete implementation
//! per backend, routed by the `runtime.backend` config key. Production
//! code uses [`IncusRuntime`]; tests use `mockall`-generated mocks.

pub mod colima;
pub mod error;
pub mod incus;
pub mod readiness;
pub mod runtime;

pub use error::RuntimeError;
pub use incus::IncusRuntime;
pub use readiness::wait_for_container;
pub use runtime::{ContainerInfo, ContainerRuntime, ContainerState, ImageInfo};
