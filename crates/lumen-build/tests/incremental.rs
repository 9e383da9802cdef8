use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use lumen_build::{BuildAction, BuildReport, ProjectBuilder};
use lumen_cache::{ArtifactCache, AssemblyArtifact};
use lumen_core::{codes, UnitId};
use lumen_project::{load_graph, LoadOptions, ProjectGraph};
use lumen_refs::ReferenceProjection;
use lumen_test_utils::{codes as toy_codes, set_mtime, write_files, ToyCompiler};

const APP_XML: &str = r#"<Project>
  <ItemGroup>
    <ProjectReference Include="Lib/Lib.lmproj" />
  </ItemGroup>
</Project>"#;

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    compiler: Arc<ToyCompiler>,
    builder: ProjectBuilder,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        Self::with_compiler(files, ToyCompiler::new())
    }

    fn with_compiler(files: &[(&str, &str)], compiler: ToyCompiler) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        write_files(&root, files);
        let compiler = Arc::new(compiler);
        let builder = ProjectBuilder::new(compiler.clone(), ArtifactCache::new(root.join("obj")));
        Self {
            _dir: dir,
            root,
            compiler,
            builder,
        }
    }

    fn graph(&self) -> ProjectGraph {
        load_graph(&self.root, &LoadOptions::default()).unwrap()
    }

    fn build(&self) -> BuildReport {
        self.builder
            .build(&self.graph(), &ReferenceProjection::default())
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Pin every input to t=1000 and every artifact to t=2000.
    fn settle(&self, report: &BuildReport) {
        for project in &self.graph().projects {
            for input in project.freshness_inputs() {
                set_mtime(&input, 1_000);
            }
        }
        for (_, artifact) in report.artifacts() {
            set_mtime(artifact.path(), 2_000);
        }
    }
}

fn app_and_lib() -> Fixture {
    Fixture::new(&[
        ("App.lmproj", APP_XML),
        ("Main.lm", "namespace App {\n    open Lib;\n    operation Main() : Unit {}\n}\n"),
        ("Lib/Lib.lmproj", "<Project />"),
        ("Lib/Math.lm", "namespace Lib {\n    function Square(x : Int) : Int { return x * x; }\n}\n"),
    ])
}

fn names(keys: &[PathBuf]) -> Vec<String> {
    keys.iter()
        .map(|key| key.file_stem().unwrap().to_string_lossy().into_owned())
        .collect()
}

fn declared(artifact: &AssemblyArtifact) -> Vec<String> {
    artifact
        .declarations()
        .iter()
        .map(|d| d.qualified_name.clone())
        .collect()
}

#[test]
fn first_build_compiles_every_project_in_order() {
    let fx = app_and_lib();

    let report = fx.build();

    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(names(&report.rebuilt()), vec!["Lib", "App"]);
    assert_eq!(report.compile_invocations, 2);
    assert_eq!(report.source_file_count, 2);

    let app = report.artifact(&fx.path("App.lmproj")).unwrap();
    let app_names: Vec<_> = app
        .declarations()
        .iter()
        .map(|d| d.qualified_name.as_str())
        .collect();
    assert_eq!(app_names, vec!["App.Main"]);
    assert!(app.path().starts_with(fx.path("obj")));
    assert!(app.path().is_file());
}

#[test]
fn touching_a_referenced_project_rebuilds_its_dependents_then_settles() {
    let fx = app_and_lib();
    let first = fx.build();
    fx.settle(&first);

    set_mtime(&fx.path("Lib/Math.lm"), 3_000);
    let second = fx.build();
    assert!(second.diagnostics.is_empty(), "{:?}", second.diagnostics);
    assert_eq!(names(&second.rebuilt()), vec!["Lib", "App"]);
    assert_eq!(fx.compiler.compile_count(), 4);

    let third = fx.build();
    assert_eq!(names(&third.loaded()), vec!["Lib", "App"]);
    assert_eq!(third.compile_invocations, 0);
    assert_eq!(fx.compiler.compile_count(), 4);
    assert_eq!(
        third.artifact(&fx.path("App.lmproj")),
        second.artifact(&fx.path("App.lmproj"))
    );
}

#[test]
fn touching_only_the_dependent_leaves_the_reference_cached() {
    let fx = app_and_lib();
    let first = fx.build();
    fx.settle(&first);

    set_mtime(&fx.path("Main.lm"), 3_000);
    let report = fx.build();

    assert_eq!(names(&report.loaded()), vec!["Lib"]);
    assert_eq!(names(&report.rebuilt()), vec!["App"]);
    // The cached Lib artifact still satisfies `open Lib;`.
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
}

#[test]
fn a_changed_descriptor_invalidates_the_project() {
    let fx = app_and_lib();
    let first = fx.build();
    fx.settle(&first);

    set_mtime(&fx.path("Lib/Lib.lmproj"), 3_000);
    let report = fx.build();

    assert_eq!(names(&report.rebuilt()), vec!["Lib", "App"]);
}

#[test]
fn dependents_see_reference_artifacts_as_compile_inputs() {
    let fx = app_and_lib();
    fx.build();

    let calls = fx.compiler.compiled_units();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].len(), 1, "App compiles only its own sources");

    // Without Lib's artifact the toy compiler rejects `open Lib;`.
    let without_lib = Fixture::new(&[
        ("App.lmproj", "<Project />"),
        ("Main.lm", "namespace App {\n    open Lib;\n}\n"),
    ]);
    let report = without_lib.build();
    assert_eq!(report.error_codes(), vec![toy_codes::UNKNOWN_NAMESPACE]);
}

#[test]
fn failed_projects_store_nothing_and_dependents_still_compile() {
    let fx = Fixture::new(&[
        ("App.lmproj", APP_XML),
        ("Main.lm", "namespace App {\n    open Lib;\n}\n"),
        ("Lib/Lib.lmproj", "<Project />"),
        ("Lib/Math.lm", "namespace Lib {\n    function Broken() : Int {\n}\n"),
    ]);

    let report = fx.build();

    let lib = report.outcome(&fx.path("Lib/Lib.lmproj")).unwrap();
    assert_eq!(lib.action, BuildAction::Failed);
    assert!(lib.artifact.is_none());
    assert!(!fx.builder.cache().artifact_path_for(&fx.path("Lib/Lib.lmproj")).exists());

    assert!(report.has_errors());
    assert_eq!(
        report.error_codes(),
        vec![toy_codes::UNBALANCED_DELIMITER, toy_codes::UNKNOWN_NAMESPACE]
    );
    assert_eq!(report.compile_invocations, 2);
}

#[test]
fn unreadable_artifacts_fall_back_to_a_rebuild() {
    let fx = app_and_lib();
    let first = fx.build();
    fx.settle(&first);

    let lib_artifact = first.artifact(&fx.path("Lib/Lib.lmproj")).unwrap().path().to_path_buf();
    fs::write(&lib_artifact, b"garbage").unwrap();
    set_mtime(&lib_artifact, 2_000);

    let report = fx.build();

    assert_eq!(names(&report.rebuilt()), vec!["Lib", "App"]);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
}

#[test]
fn persistence_failures_keep_the_in_memory_artifact() {
    let fx = app_and_lib();
    fs::write(fx.path("obj"), "").unwrap();

    let report = fx.build();

    assert!(!report.has_errors());
    assert_eq!(names(&report.rebuilt()), vec!["Lib", "App"]);
    assert!(report.artifact(&fx.path("App.lmproj")).is_some());
    let warnings: Vec<_> = report.diagnostics.iter().map(|d| d.code.as_str()).collect();
    assert_eq!(
        warnings,
        vec![codes::ARTIFACT_NOT_PERSISTED, codes::ARTIFACT_NOT_PERSISTED]
    );
}

#[test]
fn compiler_panics_are_contained_per_project() {
    let fx = Fixture::with_compiler(
        &[
            ("App.lmproj", APP_XML),
            ("Main.lm", "namespace App {\n    operation Main() : Unit {}\n}\n"),
            ("Lib/Lib.lmproj", "<Project />"),
            ("Lib/Math.lm", "// boom\n"),
        ],
        ToyCompiler::new().panic_on("boom"),
    );

    let report = fx.build();

    assert_eq!(report.error_codes(), vec![codes::COMPILER_FAULT]);
    assert_eq!(names(&report.rebuilt()), vec!["App"]);
}

#[test]
fn implicit_root_projects_are_cached_by_folder() {
    let fx = Fixture::new(&[("Main.lm", "operation Main() : Unit {}")]);
    let first = fx.build();
    assert_eq!(first.rebuilt(), vec![fx.root.clone()]);
    fx.settle(&first);

    let second = fx.build();
    assert_eq!(second.loaded(), vec![fx.root.clone()]);
    let path = second.artifact(&fx.root).unwrap().path();
    assert_eq!(
        path.file_name().unwrap().to_string_lossy(),
        format!("{}.bin", lumen_core::cache_file_stem(&fx.root))
    );
    assert!(path.starts_with(fx.path("obj")));
}

#[test]
fn descriptors_whose_names_sanitize_alike_keep_separate_artifacts() {
    let fx = Fixture::new(&[
        (
            "App.lmproj",
            r#"<Project>
  <ItemGroup>
    <ProjectReference Include="x/a/b.lmproj" />
    <ProjectReference Include="x/a_b.lmproj" />
  </ItemGroup>
</Project>"#,
        ),
        ("Main.lm", "namespace App {\n    open One;\n    open Two;\n}\n"),
        ("x/a/b.lmproj", "<Project />"),
        ("x/a/One.lm", "namespace One {\n    operation First() : Unit {}\n}\n"),
        ("x/a_b.lmproj", "<Project />"),
        ("x/Two.lm", "namespace Two {\n    operation Second() : Unit {}\n}\n"),
    ]);
    let nested = fx.path("x/a/b.lmproj");
    let flat = fx.path("x/a_b.lmproj");
    let cache = fx.builder.cache();
    assert_ne!(cache.artifact_path_for(&nested), cache.artifact_path_for(&flat));

    let first = fx.build();
    assert!(first.diagnostics.is_empty(), "{:?}", first.diagnostics);
    fx.settle(&first);

    let second = fx.build();
    assert_eq!(second.compile_invocations, 0);
    assert_eq!(declared(second.artifact(&nested).unwrap()), vec!["One.First"]);
    assert_eq!(declared(second.artifact(&flat).unwrap()), vec!["Two.Second"]);
}

#[test]
fn deleting_a_source_file_rebuilds_the_project() {
    let fx = Fixture::new(&[
        ("App.lmproj", "<Project />"),
        ("A.lm", "namespace App {\n    operation Foo() : Unit {}\n}\n"),
        ("B.lm", "namespace App {\n    operation Bar() : Unit {}\n}\n"),
    ]);
    let first = fx.build();
    fx.settle(&first);
    assert_eq!(fx.build().compile_invocations, 0);

    // Removing a file leaves every remaining input older than the artifact.
    fs::remove_file(fx.path("B.lm")).unwrap();
    let report = fx.build();

    assert_eq!(names(&report.rebuilt()), vec!["App"]);
    let app = report.artifact(&fx.path("App.lmproj")).unwrap();
    assert_eq!(declared(app), vec!["App.Foo"]);
}

#[test]
fn failed_projects_still_report_declarations_of_healthy_files() {
    let fx = Fixture::new(&[
        ("App.lmproj", "<Project />"),
        ("Good.lm", "namespace App {\n    operation Foo() : Unit {}\n}\n"),
        ("Bad.lm", "namespace App {\n    operation Bar() : Unit {\n}\n"),
    ]);
    let key = fx.path("App.lmproj");

    let report = fx.build();

    let outcome = report.outcome(&key).unwrap();
    assert_eq!(outcome.action, BuildAction::Failed);
    assert!(outcome.artifact.is_none());
    assert_eq!(report.declared_names(&key), vec!["App.Foo"]);

    assert_eq!(report.diagnostics.len(), 1, "{:?}", report.diagnostics);
    let diagnostic = &report.diagnostics[0];
    assert_eq!(diagnostic.code, toy_codes::UNBALANCED_DELIMITER);
    assert_eq!(diagnostic.unit, Some(UnitId::file(fx.path("Bad.lm"))));
}
