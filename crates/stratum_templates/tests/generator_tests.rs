//! Integration tests for the overlay generator.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use serde_json::{json, Value as Json};
use stratum_templates::{Generator, TemplateError, ToJson};
use tempfile::tempdir;

fn testdata(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join(rel)
}

#[derive(Debug, Default, Serialize)]
struct Cluster {
    metadata: ClusterMeta,
    spec: ClusterSpec,
}

#[derive(Debug, Default, Serialize)]
struct ClusterMeta {
    namespace: String,
    name: String,
}

#[derive(Debug, Default, Serialize)]
struct ClusterSpec {
    location: String,
    #[serde(rename = "subnetCIDR", skip_serializing_if = "Option::is_none")]
    subnet_cidr: Option<String>,
}

fn foo1(subnet_cidr: Option<&str>) -> Cluster {
    Cluster {
        metadata: ClusterMeta {
            namespace: "default".to_string(),
            name: "foo1".to_string(),
        },
        spec: ClusterSpec {
            location: "us-central1-a".to_string(),
            subnet_cidr: subnet_cidr.map(str::to_string),
        },
    }
}

fn base_generator() -> Generator {
    let mut primary = Generator::new(testdata("cluster"), &[]);
    primary.compile_and_validate().unwrap();
    let defaults = Cluster {
        spec: ClusterSpec {
            subnet_cidr: Some("10.128.0.0/20".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    primary.with_defaults(&defaults).unwrap()
}

fn expected_with_cidr(cidr: &str) -> Json {
    let metadata = json!({
        "name": "foo1",
        "namespace": "default",
        "labels": {"cluster": "foo1"}
    });
    json!({
        "kind": "List",
        "apiVersion": "v1",
        "items": [
            {
                "metadata": {
                    "name": "foo1",
                    "namespace": "default",
                    "labels": {"cluster": "foo1"},
                    "annotations": {
                        "cnrm.cloud.google.com/remove-default-node-pool": "false"
                    }
                },
                "spec": {
                    "location": "us-central1-a",
                    "networkRef": {"name": "foo1"},
                    "subnetworkRef": {"name": "foo1"},
                    "initialNodeCount": 1,
                    "loggingService": "logging.googleapis.com/kubernetes",
                    "monitoringService": "monitoring.googleapis.com/kubernetes",
                    "masterAuth": {
                        "clientCertificateConfig": {"issueClientCertificate": false}
                    }
                },
                "kind": "ContainerCluster",
                "apiVersion": "container.cnrm.cloud.google.com/v1beta1"
            },
            {
                "metadata": metadata,
                "spec": {
                    "routingMode": "REGIONAL",
                    "autoCreateSubnetworks": false,
                    "deleteDefaultRoutesOnCreate": false
                },
                "kind": "ComputeNetwork",
                "apiVersion": "compute.cnrm.cloud.google.com/v1beta1"
            },
            {
                "metadata": metadata,
                "spec": {
                    "networkRef": {"name": "foo1"},
                    "region": "us-central1",
                    "ipCidrRange": cidr
                },
                "kind": "ComputeSubnetwork",
                "apiVersion": "compute.cnrm.cloud.google.com/v1beta1"
            }
        ]
    })
}

fn render(gen: &Generator) -> Json {
    serde_json::from_slice(&gen.render_json().unwrap()).unwrap()
}

#[test]
fn test_render_uses_default_cidr() {
    let gen = base_generator().with_resource(&foo1(None)).unwrap();
    assert_eq!(render(&gen), expected_with_cidr("10.128.0.0/20"));
}

#[test]
fn test_resource_cidr_overrides_default() {
    let gen = base_generator()
        .with_resource(&foo1(Some("10.128.0.0/16")))
        .unwrap();
    assert_eq!(render(&gen), expected_with_cidr("10.128.0.0/16"));
}

#[test]
fn test_render_keeps_declaration_order() {
    let gen = base_generator().with_resource(&foo1(None)).unwrap();
    let rendered = String::from_utf8(gen.render_json().unwrap()).unwrap();
    assert!(rendered.starts_with(r#"{"kind":"List","apiVersion":"v1","items":[{"metadata":{"namespace":"default","name":"foo1""#));
}

#[test]
fn test_repeated_builds_render_identical_bytes() {
    let first = base_generator().with_resource(&foo1(None)).unwrap();
    let second = base_generator().with_resource(&foo1(None)).unwrap();
    let bytes = first.render_json().unwrap();
    assert_eq!(bytes, second.render_json().unwrap());
    assert_eq!(bytes, first.render_json().unwrap());
}

#[test]
fn test_defaults_and_resource_commute() {
    let mut primary = Generator::new(testdata("cluster"), &[]);
    primary.compile_and_validate().unwrap();
    let defaults = json!({"spec": {"subnetCIDR": "10.128.0.0/20"}});
    let resource = foo1(None);

    let defaults_first = primary
        .with_defaults(&defaults)
        .unwrap()
        .with_resource(&resource)
        .unwrap();
    let resource_first = primary
        .with_resource(&resource)
        .unwrap()
        .with_defaults(&defaults)
        .unwrap();
    assert_eq!(
        defaults_first.render_json().unwrap(),
        resource_first.render_json().unwrap()
    );
    assert_eq!(render(&resource_first), expected_with_cidr("10.128.0.0/20"));
}

#[test]
fn test_disallowed_resource_field() {
    let err = base_generator()
        .with_resource(&json!({"foo": "bar"}))
        .unwrap_err();
    assert!(matches!(err, TemplateError::OverlayConflict { .. }));
    assert!(
        err.to_string()
            .starts_with("unable to fill path \"resource\": resource.foo: field not allowed:"),
        "{}",
        err
    );
}

#[test]
fn test_render_without_resource_fields() {
    let gen = base_generator().with_resource(&json!({})).unwrap();
    let err = gen.render_json().unwrap_err();
    assert!(matches!(err, TemplateError::RenderMarshal(_)));
    assert!(
        err.to_string().starts_with(
            "unable to render JSON: template.items.0.metadata.namespace: invalid interpolation:"
        ),
        "{}",
        err
    );
}

#[test]
fn test_resource_of_wrong_type() {
    let err = base_generator().with_resource(&0).unwrap_err();
    let message = err.to_string();
    assert!(
        message.starts_with("unable to fill path \"resource\": resource: conflicting values 0 and"),
        "{}",
        message
    );
    assert!(message.contains("(mismatched types int and struct)"));
}

#[test]
fn test_forks_leave_receiver_unchanged() {
    let base = base_generator();
    let first = base.with_resource(&foo1(Some("10.0.0.0/8"))).unwrap();
    let second = base.with_resource(&foo1(None)).unwrap();
    assert_eq!(render(&first), expected_with_cidr("10.0.0.0/8"));
    assert_eq!(render(&second), expected_with_cidr("10.128.0.0/20"));
    assert!(base.render_json().is_err());
}

#[test]
fn test_foreign_object_overlay() {
    struct ForeignCluster;

    impl ToJson for ForeignCluster {
        fn to_json(&self) -> serde_json::Result<Json> {
            serde_json::to_value(foo1(None))
        }
    }

    let obj: Box<dyn ToJson> = Box::new(ForeignCluster);
    let gen = base_generator().with_resource(&*obj).unwrap();
    assert_eq!(render(&gen), expected_with_cidr("10.128.0.0/20"));
}

#[test]
fn test_empty_directory() {
    let mut gen = Generator::new("", &[]);
    let err = gen.compile_and_validate().unwrap_err();
    assert!(matches!(err, TemplateError::Load { .. }));
    assert_eq!(
        err.to_string(),
        "failed to load instances (dir: \"\", args: [.]): no CUE files in ."
    );
}

#[test]
fn test_nonexistent_directory() {
    let mut gen = Generator::new("./nonexistent", &[]);
    let err = gen.compile_and_validate().unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to load instances (dir: \"./nonexistent\", args: [.]): cannot find package \".\""
    );
}

#[test]
fn test_import_path_selectors() {
    let mut gen = Generator::new(testdata("cluster"), &["example.com/stratum/testdata/nested/2"]);
    gen.compile_and_validate().unwrap();
    assert_eq!(gen.import_path(), "example.com/stratum/testdata/nested/2:nested2");

    let mut gen = Generator::new(testdata("cluster"), &[]);
    gen.compile_and_validate().unwrap();
    assert_eq!(gen.import_path(), "example.com/stratum/testdata/cluster");
}

#[test]
fn test_package_without_template() {
    let mut gen = Generator::new(testdata("basic"), &[]);
    gen.compile_and_validate().unwrap();
    let err = gen.render_json().unwrap_err();
    assert!(matches!(err, TemplateError::RenderLookup { .. }));
    assert!(err.to_string().starts_with("unable to lookup path \"template\": "));
}

#[test]
fn test_concurrent_builds_and_renders() {
    let base = Arc::new(base_generator());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let base = Arc::clone(&base);
            thread::spawn(move || {
                let mut fresh = Generator::new(testdata("cluster"), &[]);
                fresh.compile_and_validate().unwrap();

                let cidr = format!("10.{}.0.0/16", i);
                let gen = base.with_resource(&foo1(Some(&cidr))).unwrap();
                (cidr, render(&gen))
            })
        })
        .collect();

    for handle in handles {
        let (cidr, rendered) = handle.join().unwrap();
        assert_eq!(rendered, expected_with_cidr(&cidr));
    }
}

#[test]
fn test_concurrent_builds_of_different_directories() {
    let root = tempdir().unwrap();
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let dir = root.path().join(format!("pkg{}", i));
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join("template.cue"),
                format!(
                    "package pkg{i}\n\nresource: name: string\n\ntemplate: {{\n\tid: {i}\n\tname: \"\\(resource.name)-{i}\"\n}}\n"
                ),
            )
            .unwrap();
            thread::spawn(move || {
                let mut gen = Generator::new(dir, &[]);
                gen.compile_and_validate().unwrap();
                let gen = gen.with_resource(&json!({"name": "svc"})).unwrap();
                (i, String::from_utf8(gen.render_json().unwrap()).unwrap())
            })
        })
        .collect();

    for handle in handles {
        let (i, rendered) = handle.join().unwrap();
        assert_eq!(rendered, format!(r#"{{"id":{i},"name":"svc-{i}"}}"#));
    }
}
