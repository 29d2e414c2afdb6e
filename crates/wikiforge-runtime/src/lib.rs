//! wikiforge-runtime — Docker-backed container runtime adapter.
//!
//! Implements [`wikiforge_core::ContainerRuntime`] against the Docker
//! control plane via [bollard](https://docs.rs/bollard). One shared
//! bridge network carries all instances and is created on first use.

pub mod docker;

pub use docker::DockerRuntime;
