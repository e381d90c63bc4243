//! datacompiler: worker-side core for out-of-process asset data compilers.
//!
//! A worker compiles one source file into one or more target artifacts, either
//! once from the command line or repeatedly while a parent build cache drives
//! it over an IPC channel.

mod build_state;
mod compiler;
mod paths;
mod resource;

pub mod bridge;
pub mod cli;
pub mod logging;
pub mod orchestrator;

pub use build_state::{BuildRequest, BuildResult, BuildState};
pub use compiler::{
    CompileError, CompileOutput, Compiler, DEFAULT_COMPILER_VERSION, write_metadata,
};
pub use orchestrator::Orchestrator;
pub use paths::{copy_file, is_directory, is_file, resolve, with_extension, with_extension_path};
pub use resource::{ResourceDescriptor, parse_resource_path};
