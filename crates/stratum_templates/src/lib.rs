//! # stratum_templates
//!
//! Layered configuration templates for Stratum.
//!
//! A template package declares three top-level fields: `defaults` and
//! `resource` are constrained by the package's schema, and `template`
//! derives the output from them. Rendering narrows the package with
//! defaults, then with a caller-supplied resource, and exports `template`
//! as JSON. Every step is a unification, so a resource field the schema
//! does not allow fails with the exact field path.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stratum_templates::TemplateRegistry;
//! use serde_json::json;
//!
//! let mut registry = TemplateRegistry::new("templates");
//! registry.load().unwrap();
//!
//! let generator = registry
//!     .with_resource(
//!         "example.com/templates/cluster",
//!         &json!({"metadata": {"name": "foo1", "namespace": "default"}}),
//!     )
//!     .unwrap();
//! let rendered = generator.render_json().unwrap();
//! println!("{}", String::from_utf8_lossy(&rendered));
//! ```

pub mod compiler;
pub mod error;
pub mod generator;
pub mod loader;
pub mod matchers;
pub mod registry;

pub use compiler::{CompiledValue, Compiler};
pub use error::{TemplateError, TemplateResult};
pub use generator::{Generator, ToJson, DEFAULTS_KEY, RESOURCE_KEY, TEMPLATE_KEY};
pub use loader::{PackageLoader, PackageSource, ScanMode};
pub use matchers::{MatchOutcome, PackageMatcher, SchemaMatcher};
pub use registry::{RegistryOptions, TemplateRegistry};
