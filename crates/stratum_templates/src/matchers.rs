//! Assertion helpers for tests of template packages and schemas.
//!
//! Every matcher yields a [`MatchOutcome`] that can describe a failure in
//! either direction, so tests can assert both `matched` and `!matched`
//! with a useful message:
//!
//! ```rust,no_run
//! use stratum_templates::matchers::{PackageMatcher, SchemaMatcher};
//!
//! let outcome = PackageMatcher::new().with_dir("testdata/basic").be_valid_package(".");
//! assert!(outcome.matched, "{}", outcome.failure_message("."));
//!
//! let outcome = SchemaMatcher::new("bar: int").matches(r#"{"bar": 1}"#).unwrap();
//! assert!(outcome.matched, "{}", outcome.failure_message(r#"{"bar": 1}"#));
//! ```

use std::fmt;
use std::path::PathBuf;

use serde_json::Value as Json;
use stratum_lang::{CompileOptions, Path, ValidateOptions};

use crate::compiler::Compiler;
use crate::error::{TemplateError, TemplateResult};

/// Result of a match, with the expectation it was checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub matched: bool,
    /// Why the value did or did not match, when known.
    pub reason: Option<String>,
    expectation: String,
    negated_expectation: String,
}

impl MatchOutcome {
    fn new(matched: bool, expectation: impl Into<String>, negated: impl Into<String>) -> Self {
        Self {
            matched,
            reason: None,
            expectation: expectation.into(),
            negated_expectation: negated.into(),
        }
    }

    fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Message for a failed positive assertion.
    pub fn failure_message(&self, actual: impl fmt::Display) -> String {
        self.message(actual, &self.expectation)
    }

    /// Message for a failed negated assertion.
    pub fn negated_failure_message(&self, actual: impl fmt::Display) -> String {
        self.message(actual, &self.negated_expectation)
    }

    fn message(&self, actual: impl fmt::Display, expectation: &str) -> String {
        let mut msg = format!("Expected\n    {}\n{}", actual, expectation);
        if let Some(reason) = &self.reason {
            msg.push_str("\nerror: ");
            msg.push_str(reason);
        }
        msg
    }
}

/// Matchers over packages built from disk, relative to a working directory.
#[derive(Debug, Clone, Default)]
pub struct PackageMatcher {
    compiler: Compiler,
    dir: PathBuf,
}

impl PackageMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Whether `selector` builds and validates.
    pub fn be_valid_package(&self, selector: &str) -> MatchOutcome {
        let result = self.compiler.build_all(&self.dir, &[selector.to_string()]);
        let outcome = MatchOutcome::new(
            result.is_ok(),
            "to be a valid package",
            "to be an invalid package",
        );
        match result {
            Ok(_) => outcome,
            Err(e) => outcome.with_reason(format!("failed to build: {}", e)),
        }
    }

    /// Whether the package exports JSON equal to `expected`, ignoring key
    /// order.
    pub fn value_matches_json(&self, selector: &str, expected: &str) -> TemplateResult<MatchOutcome> {
        let expected: Json = serde_json::from_str(expected)?;
        let actual = self.exported(selector)?;
        Ok(MatchOutcome::new(
            actual == expected,
            format!("to match JSON of\n    {}", expected),
            format!("not to match JSON of\n    {}", expected),
        )
        .with_reason(format!("actual JSON: {}", actual)))
    }

    /// Whether the exported struct, list or string has `count` elements.
    pub fn value_has_len(&self, selector: &str, count: usize) -> TemplateResult<MatchOutcome> {
        let actual = self.exported(selector)?;
        let len = match &actual {
            Json::Object(map) => Some(map.len()),
            Json::Array(items) => Some(items.len()),
            Json::String(s) => Some(s.chars().count()),
            _ => None,
        };
        let outcome = MatchOutcome::new(
            len == Some(count),
            format!("to have length {}", count),
            format!("not to have length {}", count),
        );
        Ok(match len {
            Some(len) => outcome.with_reason(format!("actual length: {}", len)),
            None => outcome.with_reason(format!("{} has no length", actual)),
        })
    }

    /// Whether the exported struct has a field named `key`.
    pub fn value_has_key(&self, selector: &str, key: &str) -> TemplateResult<MatchOutcome> {
        let actual = self.exported(selector)?;
        let found = actual.as_object().is_some_and(|map| map.contains_key(key));
        Ok(MatchOutcome::new(
            found,
            format!("to have key {:?}", key),
            format!("not to have key {:?}", key),
        ))
    }

    /// Whether the exported struct has `key` set to `value`.
    pub fn value_has_key_with_value(
        &self,
        selector: &str,
        key: &str,
        value: &Json,
    ) -> TemplateResult<MatchOutcome> {
        let actual = self.exported(selector)?;
        let found = actual.get(key);
        let outcome = MatchOutcome::new(
            found == Some(value),
            format!("to have {{{:?}: {}}}", key, value),
            format!("not to have {{{:?}: {}}}", key, value),
        );
        Ok(match found {
            Some(found) => outcome.with_reason(format!("actual value: {}", found)),
            None => outcome,
        })
    }

    fn exported(&self, selector: &str) -> TemplateResult<Json> {
        let compiled = self.compiler.build_all(&self.dir, &[selector.to_string()])?;
        let data = self.compiler.marshal_value_json(&compiled.value)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Whether `selector`, relative to the working directory, is a valid package.
pub fn be_valid_package(selector: &str) -> MatchOutcome {
    PackageMatcher::new().be_valid_package(selector)
}

/// Whether `selector`, relative to `dir`, is a valid package.
pub fn is_valid_package(dir: impl Into<PathBuf>, selector: &str) -> MatchOutcome {
    PackageMatcher::new().with_dir(dir).be_valid_package(selector)
}

pub fn value_matches_json(selector: &str, expected: &str) -> TemplateResult<MatchOutcome> {
    PackageMatcher::new().value_matches_json(selector, expected)
}

pub fn value_has_len(selector: &str, count: usize) -> TemplateResult<MatchOutcome> {
    PackageMatcher::new().value_has_len(selector, count)
}

pub fn value_has_key(selector: &str, key: &str) -> TemplateResult<MatchOutcome> {
    PackageMatcher::new().value_has_key(selector, key)
}

pub fn value_has_key_with_value(
    selector: &str,
    key: &str,
    value: &Json,
) -> TemplateResult<MatchOutcome> {
    PackageMatcher::new().value_has_key_with_value(selector, key, value)
}

/// Checks JSON documents against a schema.
///
/// The schema is compiled from source, or, with an import path, looked up
/// as a path inside the imported package.
#[derive(Debug, Clone)]
pub struct SchemaMatcher {
    schema: String,
    import_path: Option<String>,
    work_dir: PathBuf,
    compiler: Compiler,
}

impl SchemaMatcher {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            import_path: None,
            work_dir: PathBuf::new(),
            compiler: Compiler::new(),
        }
    }

    pub fn with_import_path(mut self, import_path: impl Into<String>) -> Self {
        self.import_path = Some(import_path.into());
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Unifies the JSON document with the schema. Conflicts are a failed
    /// match; an unusable schema or document is an error.
    pub fn matches(&self, json: &str) -> TemplateResult<MatchOutcome> {
        let schema = match &self.import_path {
            Some(import_path) => {
                let imported = self
                    .compiler
                    .build_all(&self.work_dir, &[import_path.clone()])?;
                let path = Path::parse(&self.schema).map_err(|source| {
                    TemplateError::InvalidPath {
                        path: self.schema.clone(),
                        source,
                    }
                })?;
                imported
                    .value
                    .lookup_path(&path)
                    .map_err(|source| TemplateError::RenderLookup {
                        path: self.schema.clone(),
                        source,
                    })?
            }
            None => self.compiler.compile_string(
                &self.schema,
                &CompileOptions::default().with_filename("test_schema.cue"),
            )?,
        };

        let document: Json = serde_json::from_str(json)?;
        let value = stratum_lang::Context::new().compile_json(&document);
        let unified = schema.unify(&value);

        let outcome = |matched| {
            MatchOutcome::new(
                matched,
                format!("to match schema\n    {}", self.schema),
                format!("not to match schema\n    {}", self.schema),
            )
        };
        Ok(match unified.validate(ValidateOptions::default()) {
            Ok(()) => outcome(true),
            Err(errors) => outcome(false).with_reason(format!("failed to unify: {}", errors)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages() {
        let outcome = MatchOutcome::new(false, "to be a valid package", "to be an invalid package")
            .with_reason("failed to build: boom");
        assert_eq!(
            outcome.failure_message("./pkg"),
            "Expected\n    ./pkg\nto be a valid package\nerror: failed to build: boom"
        );
        assert_eq!(
            outcome.negated_failure_message("./pkg"),
            "Expected\n    ./pkg\nto be an invalid package\nerror: failed to build: boom"
        );
    }

    #[test]
    fn test_schema_table() {
        let cases = [
            (r#"{ "bar": 1 }"#, "bar: string", false),
            (r#"{ "bar": 1 }"#, "#Bar: bar: string\n#Bar", false),
            (r#"{ "foo": 1 }"#, "bar: string", true),
            (r#"{ "foo": 1 }"#, "#Bar: bar: string\n#Bar", false),
            (r#"{ "bar": "", "foo": 1 }"#, "#Bar: bar: string\n#Bar", false),
            (r#"{ "bar": 1 }"#, "bar: int", true),
            ("[]", "bar: []", false),
            (r#"{ "foo": "bar" }"#, "[_]: string", true),
            (r#"{ "foo": "bar" }"#, "foo: string & =~ \"^bar$\"", true),
            (r#"{ "foo": "brr" }"#, "foo: string & =~ \"^bar$\"", false),
            ("{ }", "[_]: string", true),
            (r#"{ "foo": [], "bar": {} }"#, "[_]: string", false),
        ];
        for (json, schema, expected) in cases {
            let outcome = SchemaMatcher::new(schema).matches(json).unwrap();
            assert_eq!(
                outcome.matched,
                expected,
                "{}",
                if expected {
                    outcome.failure_message(json)
                } else {
                    outcome.negated_failure_message(json)
                }
            );
        }
    }

    #[test]
    fn test_schema_compile_error() {
        let err = SchemaMatcher::new("bar: {").matches("{}").unwrap_err();
        assert!(matches!(err, TemplateError::Compile(_)));
    }

    #[test]
    fn test_invalid_document() {
        let err = SchemaMatcher::new("bar: int").matches("{").unwrap_err();
        assert!(matches!(err, TemplateError::Json(_)));
    }
}
