use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use lumen_config::{LumenConfig, WorkspaceSettings};
use lumen_core::codes;
use lumen_test_utils::{codes as toy_codes, set_mtime, write_files, StaticLibraryLoader, ToyCompiler};
use lumen_workspace::{
    FileChange, LibraryPackageResolver, ReloadStatus, Workspace, WorkspaceBuilder, WorkspaceError,
};

const APP_XML: &str = r#"<Project>
  <ItemGroup>
    <ProjectReference Include="Lib/Lib.lmproj" />
  </ItemGroup>
</Project>"#;

const LIB_MATH: &str = "namespace Lib {\n    function Square(x : Int) : Int { return x * x; }\n}\n";

/// Far enough in the future that an edited input is always newer than any artifact.
const LATER: i64 = 4_000_000_000;

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    compiler: Arc<ToyCompiler>,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        write_files(&root, files);
        Self {
            _dir: dir,
            root,
            compiler: Arc::new(ToyCompiler::new()),
        }
    }

    fn app_and_lib() -> Self {
        Self::new(&[
            ("App.lmproj", APP_XML),
            ("Main.lm", "namespace App {\n    open Lib;\n    operation Main() : Unit {}\n}\n"),
            ("Lib/Lib.lmproj", "<Project />"),
            ("Lib/Math.lm", LIB_MATH),
        ])
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Write `rel` and date it after every artifact.
    fn edit(&self, rel: &str, text: &str) {
        write_files(&self.root, &[(rel, text)]);
        set_mtime(&self.path(rel), LATER);
    }

    fn config(&self) -> LumenConfig {
        LumenConfig {
            workspace: WorkspaceSettings::for_root(&self.root),
            ..LumenConfig::default()
        }
    }

    fn builder(&self) -> WorkspaceBuilder {
        Workspace::builder(self.config(), self.compiler.clone())
            .library_loader(Arc::new(StaticLibraryLoader::new(&[])))
    }

    fn open(&self) -> Workspace {
        self.builder().open().unwrap()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

#[test]
fn workspace_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Workspace>();
}

#[test]
fn opening_builds_the_graph_and_catalogs_project_operations() {
    let fx = Fixture::app_and_lib();
    let ws = fx.open();

    assert_eq!(ws.root(), fx.root);
    let event = ws.last_reload().unwrap();
    assert!(event.is_ok(), "{event:?}");
    assert_eq!(event.project_count, 2);
    assert_eq!(event.source_file_count, 2);
    assert!(event.error_codes.is_empty());
    assert_eq!(
        event.root_label,
        fx.root.file_name().unwrap().to_string_lossy()
    );

    assert_eq!(
        ws.projects(),
        vec![fx.path("Lib/Lib.lmproj"), fx.path("App.lmproj")]
    );
    assert_eq!(ws.workspace_operations(), strings(&["Lib.Square", "App.Main"]));
    assert!(ws.snippet_operations().is_empty());
    assert_eq!(fx.compiler.compile_count(), 2);
}

#[test]
fn snippets_build_on_project_artifacts() {
    let fx = Fixture::app_and_lib();
    let ws = fx.open();

    let outcome = ws.compile_snippet("cell-1", "open Lib;\noperation Foo() : Unit {}\n");

    assert!(outcome.accepted, "{:?}", outcome.diagnostics);
    assert_eq!(ws.snippet_operations(), strings(&["Lumen.Snippets.Foo"]));
    assert_eq!(
        ws.available_operations(),
        strings(&["Lib.Square", "App.Main", "Lumen.Snippets.Foo"])
    );
    assert_eq!(ws.workspace_operations().len(), 2);

    let foo = ws.operation_metadata("Foo").unwrap();
    assert_eq!(foo.qualified_name, "Lumen.Snippets.Foo");
    assert_eq!(foo.namespace, "Lumen.Snippets");
    assert_eq!(foo.source, "snippet:cell-1");
    assert!(!foo.deprecated);

    let square = ws.operation_metadata("Lib.Square").unwrap();
    assert_eq!(square.source, fx.path("Lib/Math.lm").display().to_string());

    let by_namespace = ws.operations_by_namespace();
    assert_eq!(by_namespace["Lib"], strings(&["Square"]));
    assert_eq!(by_namespace["Lumen.Snippets"], strings(&["Foo"]));
}

#[test]
fn rejected_snippets_leave_the_session_untouched() {
    let fx = Fixture::new(&[]);
    let ws = fx.open();

    assert!(ws.compile_snippet("1", "operation Foo() : Unit {}").accepted);
    let outcome = ws.compile_snippet("2", "operation Bar() : Unit {");

    assert!(!outcome.accepted);
    assert_eq!(ws.snippet_declarations(), strings(&["Lumen.Snippets.Foo"]));
    assert_eq!(ws.snippet_operations(), strings(&["Lumen.Snippets.Foo"]));
    let codes: Vec<_> = ws
        .last_diagnostics()
        .iter()
        .map(|d| d.code.clone())
        .collect();
    assert_eq!(codes, strings(&[toy_codes::UNBALANCED_DELIMITER]));
}

#[test]
fn requested_reloads_reach_every_subscriber() {
    let fx = Fixture::app_and_lib();
    let ws = fx.open();
    let first = ws.subscribe();
    let second = ws.subscribe();

    fx.edit(
        "Lib/More.lm",
        "namespace Lib {\n    function Cube(x : Int) : Int { return x * x * x; }\n}\n",
    );
    ws.request_reload().unwrap();

    let event = first.recv_blocking().unwrap();
    assert_eq!(event.status, ReloadStatus::Ok);
    assert_eq!(event.source_file_count, 3);
    assert_eq!(second.recv_blocking().unwrap(), event);
    assert!(first.try_recv().is_err());

    assert_eq!(
        ws.workspace_operations(),
        strings(&["Lib.Square", "Lib.Cube", "App.Main"])
    );
    assert_eq!(ws.last_reload(), Some(event));
}

#[test]
fn only_relevant_file_changes_request_a_reload() {
    let fx = Fixture::app_and_lib();
    let ws = fx.open();
    let events = ws.subscribe();

    assert!(!ws.apply_file_changes(&[
        FileChange::Modified(fx.path("obj/App.bin")),
        FileChange::Modified(fx.path("README.md")),
        FileChange::Created(fx.path(".git/index.lm")),
    ]));
    assert!(events.try_recv().is_err());

    fx.edit("Main.lm", "namespace App {\n    operation Main() : Unit {}\n    operation Other() : Unit {}\n}\n");
    assert!(ws.apply_file_changes(&[FileChange::Modified(fx.path("Main.lm"))]));

    let event = events.recv_blocking().unwrap();
    assert!(event.is_ok());
    assert!(ws.workspace_operations().contains(&"App.Other".to_string()));
}

#[test]
fn reload_errors_are_reported_and_recovered_from() {
    let fx = Fixture::app_and_lib();
    let ws = fx.open();

    fx.edit("Lib/Math.lm", "namespace Lib {\n    function Square(x : Int) : Int {\n}\n");
    let broken = ws.reload_now().unwrap();
    assert_eq!(broken.status, ReloadStatus::Error);
    assert_eq!(
        broken.error_codes,
        strings(&[toy_codes::UNBALANCED_DELIMITER, toy_codes::UNKNOWN_NAMESPACE])
    );
    // App cannot open Lib without Lib's artifact, so neither project is published.
    assert!(ws.workspace_operations().is_empty());

    fx.edit("Lib/Math.lm", LIB_MATH);
    let fixed = ws.reload_now().unwrap();
    assert!(fixed.is_ok(), "{fixed:?}");
    assert_eq!(ws.workspace_operations(), strings(&["Lib.Square", "App.Main"]));
}

#[test]
fn added_projects_join_the_graph() {
    let fx = Fixture::app_and_lib();
    let shared = tempfile::tempdir().unwrap();
    let shared_root = fs::canonicalize(shared.path()).unwrap();
    write_files(
        &shared_root,
        &[
            ("Extra/Extra.lmproj", "<Project />"),
            ("Extra/Ops.lm", "namespace Extra {\n    operation Run() : Unit {}\n}\n"),
        ],
    );
    let ws = fx.open();
    let events = ws.subscribe();

    let added = ws.add_project(shared_root.join("Extra/Extra.lmproj")).unwrap();
    assert_eq!(added, shared_root.join("Extra/Extra.lmproj"));

    let event = events.recv_blocking().unwrap();
    assert_eq!(event.project_count, 3);
    assert!(ws.projects().contains(&added));
    assert!(ws.workspace_operations().contains(&"Extra.Run".to_string()));

    assert!(matches!(
        ws.add_project("Missing/Missing.lmproj"),
        Err(WorkspaceError::MissingProject { .. })
    ));
}

#[test]
fn packages_extend_the_snippet_references() {
    let fx = Fixture::new(&[]);
    let ws = fx
        .builder()
        .package_resolver(Arc::new(LibraryPackageResolver::new(
            StaticLibraryLoader::new(&[("Contoso.Math", &[])]),
        )))
        .open()
        .unwrap();

    let before = ws.compile_snippet("1", "open Contoso.Math;\n");
    assert!(!before.accepted);
    assert_eq!(before.diagnostics[0].code, toy_codes::UNKNOWN_NAMESPACE);

    assert!(ws.add_package("Contoso.Math::1.2.0").unwrap().is_empty());
    let after = ws.compile_snippet("2", "open Contoso.Math;\n");
    assert!(after.accepted, "{:?}", after.diagnostics);
    assert!(after.references_reloaded);

    let missing = ws.add_package("Contoso.Missing").unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].code, codes::LIBRARY_NOT_LOADED);

    assert_eq!(
        ws.packages(),
        strings(&["Contoso.Math::1.2.0", "Contoso.Missing"])
    );
    assert!(matches!(
        ws.add_package("::1.0"),
        Err(WorkspaceError::InvalidPackage(_))
    ));
}

#[test]
fn project_package_references_are_resolved_on_reload() {
    let fx = Fixture::new(&[
        (
            "App.lmproj",
            r#"<Project>
  <ItemGroup>
    <PackageReference Include="Contoso.Math" Version="1.2.0" />
  </ItemGroup>
</Project>"#,
        ),
        ("Main.lm", "namespace App {\n    open Contoso.Math;\n}\n"),
    ]);
    let ws = fx
        .builder()
        .package_resolver(Arc::new(LibraryPackageResolver::new(
            StaticLibraryLoader::new(&[("Contoso.Math", &[])]),
        )))
        .open()
        .unwrap();

    assert!(ws.last_reload().unwrap().is_ok());
    assert_eq!(ws.packages(), strings(&["Contoso.Math::1.2.0"]));
    assert!(ws.compile_snippet("1", "open Contoso.Math;\n").accepted);
}

#[test]
fn session_options_persist_across_opens() {
    let fx = Fixture::new(&[]);
    {
        let ws = fx.open();
        assert_eq!(ws.option("dump.verbosity"), None);
        ws.set_option("dump.verbosity", 2);
        ws.save_options().unwrap();
    }

    let ws = fx.open();
    assert_eq!(ws.option("dump.verbosity"), Some(serde_json::Value::from(2)));
}

#[test]
fn lumen_toml_configures_snippets_and_the_cache() {
    let fx = Fixture::new(&[(
        "lumen.toml",
        "[workspace]\ncache_folder = \"build/cache\"\n\n[snippets]\nnamespace = \"Notebook\"\n",
    )]);

    let ws = Workspace::open(&fx.root, fx.compiler.clone()).unwrap();
    let outcome = ws.compile_snippet("1", "operation Foo() : Unit {}");

    assert!(outcome.accepted, "{:?}", outcome.diagnostics);
    assert_eq!(ws.snippet_operations(), strings(&["Notebook.Foo"]));
    let artifact = outcome.artifact.unwrap();
    assert!(artifact.path().starts_with(fx.path("build/cache")));
    assert!(artifact.path().is_file());
}

#[test]
fn a_missing_root_cannot_be_opened() {
    let fx = Fixture::new(&[]);
    let config = LumenConfig {
        workspace: WorkspaceSettings::for_root(fx.path("nope")),
        ..LumenConfig::default()
    };
    assert!(Workspace::builder(config, fx.compiler.clone()).open().is_err());
}

#[test]
fn monitored_workspaces_watch_the_root() {
    let fx = Fixture::new(&[("Main.lm", "operation Main() : Unit {}")]);
    let mut config = fx.config();
    config.workspace.monitor_for_changes = true;

    let ws = Workspace::builder(config, fx.compiler.clone())
        .open()
        .unwrap();

    assert!(ws.is_watching());
    assert!(!fx.open().is_watching());
}

#[test]
fn concurrent_snippets_and_reloads_are_serialised() {
    let fx = Fixture::app_and_lib();
    let ws = Arc::new(fx.open());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ws = Arc::clone(&ws);
            thread::spawn(move || {
                if i % 2 == 0 {
                    ws.reload_now().unwrap();
                } else {
                    let text = format!("operation Op{i}() : Unit {{}}");
                    assert!(ws.compile_snippet(&format!("cell-{i}"), &text).accepted);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut snippets = ws.snippet_declarations();
    snippets.sort();
    assert_eq!(snippets, strings(&["Lumen.Snippets.Op1", "Lumen.Snippets.Op3"]));
    assert_eq!(ws.workspace_operations(), strings(&["Lib.Square", "App.Main"]));
}
