pub mod artifact_service;

pub use artifact_service::{ArtifactError, ArtifactFetcher, ArtifactService, ArtifactSource, HttpFetcher};
