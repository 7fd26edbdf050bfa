//! # stratum_lang
//!
//! Constraint-language engine for Stratum templates.
//!
//! The language is a subset of CUE: values are ordered in a lattice from
//! top (`_`) to bottom (`_|_`), and the only way to combine them is
//! unification (`&`) or disjunction (`|`). Schemas, defaults and concrete
//! data are all values, so narrowing a template with user input is a
//! single operation that either yields a more specific value or fails with
//! a path-qualified conflict.
//!
//! ## Example
//!
//! ```rust
//! use stratum_lang::{CompileOptions, Context, Path};
//! use serde_json::json;
//!
//! let ctx = Context::new();
//! let schema = ctx
//!     .compile_str("#Port: int & >0 & <65536\nport: #Port\n", &CompileOptions::default())
//!     .unwrap();
//!
//! let filled = schema.fill_path(&Path::parse("port").unwrap(), &json!(8080)).unwrap();
//! assert_eq!(filled.marshal_json().unwrap(), r#"{"port":8080}"#);
//!
//! assert!(schema.fill_path(&Path::parse("port").unwrap(), &json!(0)).is_err());
//! ```

pub mod ast;
mod atom;
mod builtins;
mod check;
mod context;
mod error;
mod eval;
mod export;
mod lexer;
pub mod load;
mod parser;
mod path;
mod scalar;
mod value;

pub use atom::{Atom, Kind};
pub use context::{CompileOptions, Context, Limits};
pub use error::{Error, ErrorKind, Errors, LangResult, Pos};
pub use parser::parse_file;
pub use path::Path;
pub use value::{ValidateOptions, Value};
