pub mod ports;

pub use ports::{Artifact, ArtifactSink, TableSource};
