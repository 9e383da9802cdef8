use lumen_cache::AssemblyArtifact;
use lumen_compiler::{Declaration, DeclarationKind};
use lumen_core::UnitId;
use lumen_index::OperationCatalog;

fn declaration(name: &str, deprecated: bool) -> Declaration {
    Declaration {
        qualified_name: name.to_string(),
        kind: DeclarationKind::Operation,
        source: UnitId::file(format!("/src/{name}.lm")),
        documentation: Some(format!("docs for {name}")),
        attributes: Vec::new(),
        deprecated,
    }
}

fn artifact(image: &[u8], declarations: Vec<Declaration>) -> AssemblyArtifact {
    AssemblyArtifact::new("/obj/test.bin", image.to_vec(), declarations, None)
}

#[test]
fn operations_are_memoized_per_artifact_identity() {
    let mut catalog = OperationCatalog::new();
    let first = artifact(b"v1", vec![declaration("Ns.Foo", false)]);

    let a = catalog.operations(&first);
    let b = catalog.operations(&first);
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert_eq!(catalog.extraction_count(), 1);

    // Same image under a different path is the same artifact.
    let relocated = AssemblyArtifact::new("/elsewhere.bin", b"v1".to_vec(), Vec::new(), None);
    catalog.operations(&relocated);
    assert_eq!(catalog.extraction_count(), 1);

    let second = artifact(b"v2", vec![declaration("Ns.Bar", false)]);
    assert_eq!(catalog.operations(&second)[0].qualified_name, "Ns.Bar");
    assert_eq!(catalog.extraction_count(), 2);
}

#[test]
fn republishing_a_slot_replaces_its_entries() {
    let mut catalog = OperationCatalog::new();
    catalog.publish("project:a", &artifact(b"a1", vec![declaration("A.Foo", false)]));
    catalog.publish("snippets", &artifact(b"s1", vec![declaration("S.Foo", false)]));

    assert_eq!(catalog.resolve("Foo").unwrap().qualified_name, "A.Foo");

    catalog.publish("project:a", &artifact(b"a2", vec![declaration("A.Bar", false)]));
    assert_eq!(catalog.resolve("Foo").unwrap().qualified_name, "S.Foo");
    assert!(catalog.resolve("A.Foo").is_none());
    assert_eq!(catalog.slots().collect::<Vec<_>>(), vec!["project:a", "snippets"]);

    // Republishing the identical artifact does not extract again.
    let count = catalog.extraction_count();
    catalog.publish("project:a", &artifact(b"a2", vec![declaration("A.Bar", false)]));
    assert_eq!(catalog.extraction_count(), count);
}

#[test]
fn deprecated_entries_lose_across_slots() {
    let mut catalog = OperationCatalog::new();
    catalog.publish("legacy", &artifact(b"l", vec![declaration("Legacy.Run", true)]));
    catalog.publish("current", &artifact(b"c", vec![declaration("Current.Run", false)]));

    assert_eq!(catalog.resolve("Run").unwrap().qualified_name, "Current.Run");
    let names: Vec<_> = catalog
        .entries()
        .into_iter()
        .map(|entry| entry.qualified_name)
        .collect();
    assert_eq!(names, vec!["Current.Run", "Legacy.Run"]);

    assert!(catalog.retract("current"));
    assert_eq!(catalog.resolve("Run").unwrap().qualified_name, "Legacy.Run");
    assert!(!catalog.retract("current"));
}

#[test]
fn entries_can_be_filtered_by_slot_and_grouped() {
    let mut catalog = OperationCatalog::new();
    catalog.publish(
        "project:a",
        &artifact(b"a", vec![declaration("A.One", false), declaration("A.Two", false)]),
    );
    catalog.publish("snippets", &artifact(b"s", vec![declaration("S.Three", false)]));

    let projects_only = catalog.entries_where(|slot| slot.starts_with("project:"));
    assert_eq!(projects_only.len(), 2);

    let grouped = catalog.by_namespace();
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped["A"], vec!["One".to_string(), "Two".to_string()]);
}
