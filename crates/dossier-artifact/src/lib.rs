//! Dossier artifact primitives
//!
//! Typed artifacts and the hashing used to sign them.
//!
//! # Core Concepts
//!
//! - [`Artifact`]: one produced file with its relative path, kind and bytes
//! - [`ArtifactPath`]: validated path relative to a plan directory
//! - [`ContentHash`]: 32-byte digest, hex on the wire
//! - [`ContentHasher`]: incremental hasher for streaming large files
//!
//! # Example
//!
//! ```rust
//! use dossier_artifact::{Artifact, ArtifactKind, ArtifactPath, HashAlgorithm};
//!
//! let path = ArtifactPath::file("dossier-us-ca.md").unwrap();
//! let artifact = Artifact::new(path, ArtifactKind::Markdown, "# Dossier\n");
//! println!("{}", artifact.hash(HashAlgorithm::Sha256));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod hash;
mod path;

pub use artifact::{Artifact, ArtifactKind, ArtifactRef};
pub use hash::{ContentHash, ContentHasher, HashAlgorithm, HashError};
pub use path::{ArtifactPath, PathError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
