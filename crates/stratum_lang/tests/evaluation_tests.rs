//! Integration tests for evaluation, validation and export.

use serde_json::json;
use stratum_lang::{CompileOptions, Context, ErrorKind, Path, ValidateOptions, Value};

fn compile(src: &str) -> Value {
    Context::new()
        .compile_str(src, &CompileOptions::default().with_filename("test.cue"))
        .unwrap()
}

fn path(p: &str) -> Path {
    Path::parse(p).unwrap()
}

#[test]
fn test_struct_fields_keep_declaration_order() {
    let value = compile("b: 1\na: 2\nb: int\nc: a + b\n");
    assert_eq!(value.marshal_json().unwrap(), r#"{"b":1,"a":2,"c":3}"#);
}

#[test]
fn test_unified_fields_follow_operand_order() {
    let value = compile("_x: {a: 1, b: 2}\nout: _x & {c: 1}\n");
    assert_eq!(value.lookup("out").unwrap().marshal_json().unwrap(), r#"{"a":1,"b":2,"c":1}"#);

    let value = compile("_x: {a: 1, b: 2}\nout: {c: 1} & _x\n");
    assert_eq!(value.lookup("out").unwrap().marshal_json().unwrap(), r#"{"c":1,"a":1,"b":2}"#);
}

#[test]
fn test_conflicting_atoms() {
    let value = compile("a: 1\na: 2\n");
    let err = value.validate(ValidateOptions::default()).unwrap_err();
    let first = err.first();
    assert_eq!(first.kind, ErrorKind::Conflict);
    assert_eq!(first.path_string(), "a");
    assert!(first.message.contains("conflicting values"));
}

#[test]
fn test_definition_is_closed() {
    let value = compile("#A: {x: string}\na: #A & {y: 1}\n");
    let err = value.validate(ValidateOptions::default()).unwrap_err();
    assert!(err.to_string().starts_with("a.y: field not allowed"));
}

#[test]
fn test_ellipsis_reopens_definition() {
    let value = compile("#A: {x: string, ...}\na: #A & {x: \"1\", y: 1}\n");
    assert_eq!(value.to_json().unwrap(), json!({"a": {"x": "1", "y": 1}}));
}

#[test]
fn test_embedded_definition_closes_literal() {
    let value = compile("#A: {x: int}\na: {#A, y: 2}\nb: a & {z: 3}\n");
    let err = value.validate(ValidateOptions::default()).unwrap_err();
    assert!(err.to_string().contains("b.z: field not allowed"));
    assert!(value.lookup("a").unwrap().validate(ValidateOptions::default()).is_ok());
}

#[test]
fn test_disjunction_default_is_exported() {
    let value = compile("mode: *\"fast\" | \"safe\"\n");
    assert_eq!(value.to_json().unwrap(), json!({"mode": "fast"}));

    let value = compile("mode: *\"fast\" | \"safe\"\nmode: \"safe\"\n");
    assert_eq!(value.to_json().unwrap(), json!({"mode": "safe"}));
}

#[test]
fn test_disjunction_without_default_is_incomplete() {
    let value = compile("mode: \"fast\" | \"safe\"\n");
    assert!(value.validate(ValidateOptions::default()).is_ok());
    let err = value.validate(ValidateOptions::concrete()).unwrap_err();
    assert_eq!(err.first().kind, ErrorKind::Incomplete);
}

#[test]
fn test_empty_disjunction() {
    let value = compile("mode: (\"fast\" | \"safe\") & \"slow\"\n");
    let err = value.validate(ValidateOptions::default()).unwrap_err();
    assert_eq!(err.first().path_string(), "mode");
}

#[test]
fn test_bounds() {
    let value = compile("port: int & >0 & <65536\nport: 8080\n");
    assert_eq!(value.to_json().unwrap(), json!({"port": 8080}));

    let value = compile("port: int & >0 & <65536\nport: 0\n");
    let err = value.validate(ValidateOptions::default()).unwrap_err();
    assert!(err.to_string().contains("invalid value 0 (out of bound >0)"));
}

#[test]
fn test_regex_constraint() {
    let schema = compile("foo: string & =~\"^bar$\"\n");
    assert!(schema.fill_path(&path("foo"), &json!("bar")).is_ok());
    assert!(schema.fill_path(&path("foo"), &json!("brr")).is_err());
}

#[test]
fn test_pattern_constraint() {
    let schema = compile("[_]: string\n");
    assert!(schema.fill_path(&Path::root(), &json!({"foo": "bar"})).is_ok());
    assert!(schema
        .fill_path(&Path::root(), &json!({"foo": [], "bar": {}}))
        .is_err());
}

#[test]
fn test_list_comprehension() {
    let value = compile("xs: [1, 2, 3]\nys: [for x in xs if x > 1 { x * 10 }]\n");
    assert_eq!(value.lookup("ys").unwrap().to_json().unwrap(), json!([20, 30]));
}

#[test]
fn test_struct_comprehension() {
    let value = compile(
        "names: [\"a\", \"b\"]\nout: { for i, n in names { \"\\(n)\": i } }\n",
    );
    assert_eq!(value.lookup("out").unwrap().to_json().unwrap(), json!({"a": 0, "b": 1}));
}

#[test]
fn test_dynamic_field_labels() {
    let value = compile("k: \"name\"\nout: {(k): 1, \"\\(k)-x\": 2, z: 3}\n");
    assert_eq!(
        value.lookup("out").unwrap().marshal_json().unwrap(),
        r#"{"name":1,"name-x":2,"z":3}"#
    );

    let value = compile("out: {(1): 2}\n");
    let err = value.to_json().unwrap_err();
    assert!(err.to_string().contains("invalid field label"));
}

#[test]
fn test_interpolation() {
    let value = compile("name: \"foo\"\ngreeting: \"hello \\(name)\"\n");
    assert_eq!(value.lookup("greeting").unwrap().to_json().unwrap(), json!("hello foo"));
}

#[test]
fn test_interpolation_of_non_concrete_value() {
    let value = compile("name: string\ngreeting: \"hello \\(name)\"\n");
    assert!(value.validate(ValidateOptions::default()).is_ok());
    let err = value.lookup("greeting").unwrap().to_json().unwrap_err();
    let first = err.first();
    assert_eq!(first.path_string(), "greeting");
    assert!(first.message.starts_with("invalid interpolation"));
}

#[test]
fn test_references_see_later_fills() {
    let value = compile("a: int\nb: a * 2\n");
    let filled = value.fill_path(&path("a"), &json!(21)).unwrap();
    assert_eq!(filled.to_json().unwrap(), json!({"a": 21, "b": 42}));
    assert!(value.to_json().is_err());
}

#[test]
fn test_fill_conflict_reports_path() {
    let value = compile("#R: {name: string}\nresource: #R\n");
    let err = value
        .fill_path(&path("resource"), &json!({"foo": "bar"}))
        .unwrap_err();
    assert!(err.to_string().starts_with("resource.foo: field not allowed:"));
}

#[test]
fn test_fill_mismatched_types() {
    let value = compile("#R: {name: string}\nresource: #R\n");
    let err = value.fill_path(&path("resource"), &json!(0)).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("resource: conflicting values 0 and"));
    assert!(message.contains("(mismatched types int and struct)"));
}

#[test]
fn test_fill_list_index_is_rejected() {
    let value = compile("xs: [1, 2]\n");
    assert!(value.fill_path(&path("xs[0]"), &json!(1)).is_err());
}

#[test]
fn test_lookup_missing_field() {
    let value = compile("a: 1\n");
    let err = value.lookup_path(&path("b.c")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Incomplete);
}

#[test]
fn test_unify_values() {
    let schema = compile("bar: int\n");
    let doc = Context::new().compile_json(&json!({"bar": 1}));
    let unified = schema.unify(&doc);
    assert!(unified.validate(ValidateOptions::concrete()).is_ok());

    let doc = Context::new().compile_json(&json!({"bar": "x"}));
    assert!(schema.unify(&doc).validate(ValidateOptions::default()).is_err());
}

#[test]
fn test_strings_builtins() {
    let value = compile(
        "import \"strings\"\nup: strings.ToUpper(\"abc\")\nparts: strings.Split(\"a,b\", \",\")\n",
    );
    assert_eq!(
        value.to_json().unwrap(),
        json!({"up": "ABC", "parts": ["a", "b"]})
    );
}

#[test]
fn test_len_builtin() {
    let value = compile("xs: [1, 2, 3]\nn: len(xs)\n");
    assert_eq!(value.lookup("n").unwrap().to_json().unwrap(), json!(3));
}

#[test]
fn test_optional_and_required_fields() {
    let value = compile("a?: int\nb: 1\n");
    assert_eq!(value.to_json().unwrap(), json!({"b": 1}));

    let value = compile("a!: int\nb: 1\n");
    assert!(value.validate(ValidateOptions::concrete()).is_err());
}

#[test]
fn test_value_fields_and_len() {
    let value = compile("a: 1\n_hidden: 2\n#Def: 3\nb: [1, 2]\n");
    let names: Vec<String> = value.fields().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(value.len(), Some(2));
    assert_eq!(value.lookup("b").unwrap().len(), Some(2));
    assert_eq!(value.lookup("a").unwrap().len(), None);
}

#[test]
fn test_value_serializes_as_json() {
    let value = compile("a: {b: [true, null]}\n");
    assert_eq!(serde_json::to_value(&value).unwrap(), json!({"a": {"b": [true, null]}}));
}

#[test]
fn test_float_overflow_is_out_of_range() {
    let value = compile("a: 1e308 * 10\n");
    let err = value.to_json().unwrap_err();
    assert!(err.to_string().contains("value out of range"));
}

#[test]
fn test_integers_beyond_i64() {
    let value = compile("a: int\nb: -9223372036854775808\n");
    let filled = value.fill_path(&path("a"), &json!(u64::MAX)).unwrap();
    assert_eq!(
        filled.to_json().unwrap(),
        json!({"a": u64::MAX, "b": i64::MIN})
    );
}

#[test]
fn test_deep_nesting_is_a_parse_error() {
    let src = format!("a: {}1{}\n", "[".repeat(500), "]".repeat(500));
    let err = Context::new()
        .compile_str(&src, &CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.first().kind, ErrorKind::Parse);
}
