#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Import map generation: CDN providers, package resolution, version locks
//! and module graph tracing.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod generator;
pub mod importmap;
pub mod install;
pub mod package;
pub mod provider;
pub mod range;
pub mod resolver;
pub mod trace;
pub mod version;

pub use config::GeneratorConfig;
pub use error::{Error, Result};
pub use fetch::{Fetch, FetchResponse, HttpFetcher, MemoryFetcher};
pub use generator::Generator;
pub use importmap::{ImportMap, MapLookup};
pub use install::{InstallMode, Installer, InstallerOptions, LockResolutions};
pub use package::{ExactPackage, InstallTarget, PackageTarget, Target};
pub use provider::{Provider, ProviderRef, ProviderRegistry};
pub use resolver::Resolver;
pub use trace::{TraceInfo, TraceMap};
pub use version::VERSION;
