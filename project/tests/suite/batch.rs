//! One batch at a time: isolation, restore aggregation, follow-up loads.

use std::path::PathBuf;

use projsys_buildhost::FallbackPolicy;
use projsys_project::ProjectLoadingConfig;
use projsys_types::{
    BuildHostKind, DiagnosticLogItem, DiagnosticSeverity, PackageReference, ProjectFileReference,
    SolutionProjectEntry,
};

use crate::common::{Harness, Seen, snapshot, test_config};

fn toasts(seen: &[Seen]) -> usize {
    seen.iter().filter(|s| matches!(s, Seen::Toast(_))).count()
}

#[tokio::test]
async fn failing_project_does_not_stop_its_siblings() {
    let h = Harness::new();
    let one = h.sdk_project("One", &["A.cs"]);
    let two = h.sdk_project("Two", &["B.cs"]);
    let three = h.sdk_project("Three", &["C.cs"]);
    h.script.lock().unwrap().failing.insert(two.clone());

    h.system.open(&[one, two.clone(), three]).await;

    let names: Vec<String> = h.model().projects().into_iter().map(|(_, p)| p.name).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"One".to_string()));
    assert!(names.contains(&"Three".to_string()));

    let diagnostics = h.system.diagnostics();
    assert_eq!(diagnostics.error_count(), 1);
    assert_eq!(diagnostics.projects()[0].0, two);

    h.wait_for_client(|s| *s == Seen::InitializationComplete).await;
    assert_eq!(toasts(&h.seen()), 1);
}

#[tokio::test]
async fn panicking_project_is_reported_not_propagated() {
    let h = Harness::new();
    let good = h.sdk_project("Good", &["A.cs"]);
    let bad = h.sdk_project("Bad", &["B.cs"]);
    h.script.lock().unwrap().panicking.insert(bad.clone());

    h.system.open(&[good, bad.clone()]).await;

    assert_eq!(h.model().len(), 1);
    let items = h.system.diagnostics();
    let items = items.for_project(&bad);
    assert_eq!(items.len(), 1);
    assert!(items[0].message().contains("panicked"));
    assert!(items[0].message().contains("evaluation blew up"));

    // The batch still completed and the client heard about it.
    h.wait_for_client(|s| *s == Seen::InitializationComplete).await;
}

#[tokio::test]
async fn toast_is_shown_once_per_session() {
    let h = Harness::new();
    let a = h.sdk_project("A", &[]);
    let b = h.sdk_project("B", &[]);
    {
        let mut script = h.script.lock().unwrap();
        script.failing.insert(a.clone());
        script.failing.insert(b.clone());
    }
    h.system.open(&[a.clone(), b]).await;
    h.system.reload_project(&a);
    h.system.wait_for_pending_loads().await;

    h.wait_for_client(|s| *s == Seen::InitializationComplete).await;
    let seen = h.seen();
    assert_eq!(toasts(&seen), 1);
    let error_logs = seen
        .iter()
        .filter(|s| matches!(s, Seen::Log(DiagnosticSeverity::Error, _)))
        .count();
    assert_eq!(error_logs, 3);
}

#[tokio::test]
async fn error_item_from_evaluation_skips_only_that_project() {
    let h = Harness::new();
    let ok = h.sdk_project("Ok", &["A.cs"]);
    let warned = h.sdk_project("Warned", &["B.cs"]);
    let broken = h.sdk_project("Broken", &["C.cs"]);
    {
        let mut script = h.script.lock().unwrap();
        script.diagnostics.insert(
            warned.clone(),
            vec![DiagnosticLogItem::warning("SDK is old", &warned)],
        );
        script.diagnostics.insert(
            broken.clone(),
            vec![
                DiagnosticLogItem::warning("SDK is old", &broken),
                DiagnosticLogItem::error("MSB4025: project file could not be loaded", &broken),
            ],
        );
    }

    h.system.open(&[ok, warned.clone(), broken.clone()]).await;

    assert_eq!(h.model().len(), 2);
    assert!(h.model().find_by_name("Broken").is_none());

    let diagnostics = h.system.diagnostics();
    assert_eq!(diagnostics.projects()[0].0, broken);
    assert_eq!(diagnostics.for_project(&broken).len(), 2);
    assert_eq!(diagnostics.for_project(&warned).len(), 1);
    assert_eq!(diagnostics.status_string(), "E:1 W:2");
}

#[tokio::test]
async fn unresolved_packages_produce_one_restore_request() {
    let h = Harness::new();
    let app = h.sdk_project("App", &[]);
    let lib = h.sdk_project("Lib", &[]);
    let clean = h.sdk_project("Clean", &[]);
    for path in [&app, &lib] {
        let mut info = snapshot(path, Some("net8.0"), &[]);
        info.package_references = vec![PackageReference::new("Newtonsoft.Json", "12.0.0")];
        info.project_assets_file_path = Some(path.parent().unwrap().join("obj/project.assets.json"));
        h.set_info(path, vec![info]);
    }

    h.system.open(&[app.clone(), lib.clone(), clean]).await;

    h.wait_for_client(|s| *s == Seen::InitializationComplete).await;
    let restores: Vec<Vec<PathBuf>> = h
        .seen()
        .into_iter()
        .filter_map(|s| match s {
            Seen::Restore(projects) => Some(projects),
            _ => None,
        })
        .collect();
    let mut expected = vec![app, lib];
    expected.sort();
    assert_eq!(restores, vec![expected]);

    // Restore is acknowledged before initialization completes.
    let seen = h.seen();
    let restore_at = seen.iter().position(|s| matches!(s, Seen::Restore(_)));
    let complete_at = seen.iter().position(|s| *s == Seen::InitializationComplete);
    assert!(restore_at < complete_at);
}

#[tokio::test]
async fn no_restore_request_when_auto_restore_is_off() {
    let h = Harness::with_config(ProjectLoadingConfig {
        auto_restore: false,
        ..test_config()
    });
    let app = h.sdk_project("App", &[]);
    let mut info = snapshot(&app, Some("net8.0"), &[]);
    info.package_references = vec![PackageReference::new("Serilog", "3.1.1")];
    h.set_info(&app, vec![info]);

    h.system.open(&[app]).await;

    h.wait_for_client(|s| *s == Seen::InitializationComplete).await;
    assert!(!h.seen().iter().any(|s| matches!(s, Seen::Restore(_))));
    assert_eq!(h.model().len(), 1);
}

#[tokio::test]
async fn referenced_projects_are_loaded_as_follow_ups() {
    let h = Harness::new();
    let lib = h.sdk_project("Lib", &["Lib.cs"]);
    let app = h.sdk_project("App", &["Program.cs"]);
    let mut info = snapshot(&app, Some("net8.0"), &["Program.cs"]);
    info.project_references = vec![ProjectFileReference::new(&lib)];
    h.set_info(&app, vec![info]);

    h.system.open(&[app]).await;

    assert!(h.model().find_by_name("App").is_some());
    assert!(h.model().find_by_name("Lib").is_some());
    assert_eq!(h.system.loaded_project_paths().await.len(), 2);
}

#[tokio::test]
async fn solution_projects_are_loaded_before_completion() {
    let h = Harness::new();
    let app = h.sdk_project("App", &["Program.cs"]);
    let lib = h.sdk_project("Lib", &["Lib.cs"]);
    h.script.lock().unwrap().solution = vec![
        SolutionProjectEntry {
            path: app,
            project_guid: Some("{11111111-1111-1111-1111-111111111111}".to_string()),
        },
        SolutionProjectEntry {
            path: lib,
            project_guid: None,
        },
    ];
    let solution = h.dir.path().join("All.sln");
    std::fs::write(&solution, "").unwrap();

    h.system.open(&[solution]).await;

    assert_eq!(h.model().len(), 2);
    h.wait_for_client(|s| *s == Seen::InitializationComplete).await;
}

#[tokio::test]
async fn unknown_extension_is_a_warning() {
    let h = Harness::new();
    let dir = h.dir.path().join("Fs");
    std::fs::create_dir_all(&dir).unwrap();
    let fsproj = dir.join("Fs.fsproj");
    std::fs::write(&fsproj, r#"<Project Sdk="Microsoft.NET.Sdk" />"#).unwrap();
    let app = h.sdk_project("App", &[]);

    h.system.open(&[fsproj.clone(), app]).await;

    assert_eq!(h.model().len(), 1);
    let diagnostics = h.system.diagnostics();
    assert_eq!(diagnostics.warning_count(), 1);
    assert!(diagnostics.for_project(&fsproj)[0]
        .message()
        .contains("not associated with a language"));
    h.wait_for_client(|s| *s == Seen::InitializationComplete).await;
    assert_eq!(toasts(&h.seen()), 0);
}

#[tokio::test]
async fn unsupported_project_is_skipped() {
    let h = Harness::new();
    let app = h.sdk_project("App", &[]);
    h.script.lock().unwrap().unsupported.insert(app.clone());

    h.system.open(&[app.clone()]).await;

    assert!(h.model().is_empty());
    assert_eq!(h.launcher().total_loads(), 0);
    assert_eq!(
        h.system.diagnostics().for_project(&app)[0].severity(),
        DiagnosticSeverity::Warning
    );
}

#[tokio::test]
async fn unusable_toolchain_falls_back_to_configured_host() {
    let h = Harness::with_options(
        test_config(),
        FallbackPolicy::none().with(BuildHostKind::NetCore, BuildHostKind::Mono),
    );
    let app = h.sdk_project("App", &["Program.cs"]);
    h.script
        .lock()
        .unwrap()
        .unusable
        .insert(BuildHostKind::NetCore);

    h.system.open(&[app]).await;

    assert_eq!(h.model().len(), 1);
    assert_eq!(
        h.launcher().launched_kinds(),
        vec![BuildHostKind::NetCore, BuildHostKind::Mono]
    );
}

#[tokio::test]
async fn no_usable_toolchain_names_what_was_tried() {
    let h = Harness::new();
    let app = h.sdk_project("App", &[]);
    h.script
        .lock()
        .unwrap()
        .unusable
        .insert(BuildHostKind::NetCore);

    h.system.open(&[app.clone()]).await;

    assert!(h.model().is_empty());
    let diagnostics = h.system.diagnostics();
    let message = diagnostics.for_project(&app)[0].message();
    assert!(message.contains("no usable toolchain"), "{message}");
}

#[tokio::test]
async fn legacy_project_uses_legacy_host() {
    let h = Harness::new();
    let legacy = h.write_project(
        "Legacy",
        r#"<Project ToolsVersion="15.0" xmlns="http://schemas.microsoft.com/developer/msbuild/2003"><ItemGroup /></Project>"#,
    );
    h.set_info(&legacy, vec![snapshot(&legacy, Some("v4.8"), &["Form1.cs"])]);

    h.system.open(&[legacy]).await;

    assert_eq!(h.model().len(), 1);
    assert_eq!(
        h.launcher().launched_kinds(),
        vec![BuildHostKind::legacy_for_platform()]
    );
}

#[tokio::test]
async fn file_uris_are_opened_and_other_schemes_skipped() {
    let h = Harness::new();
    let app = h.sdk_project("App", &["Program.cs"]);
    let uris = vec![
        url::Url::from_file_path(&app).unwrap(),
        url::Url::parse("https://example.com/App.csproj").unwrap(),
    ];

    h.system.open_uris(&uris).await;

    assert_eq!(h.system.loaded_project_paths().await, vec![app]);
    h.wait_for_client(|s| *s == Seen::InitializationComplete).await;
}

#[tokio::test]
async fn reference_spelled_differently_is_not_loaded_twice() {
    let h = Harness::new();
    let lib = h.sdk_project("Lib", &["Lib.cs"]);
    let app = h.sdk_project("App", &["Program.cs"]);
    let mut info = snapshot(&app, Some("net8.0"), &["Program.cs"]);
    let lib_via_app = app.parent().unwrap().join("../Lib/Lib.csproj");
    info.project_references = vec![ProjectFileReference::new(&lib_via_app)];
    h.set_info(&app, vec![info]);

    h.system.open(&[lib.clone()]).await;
    h.system.open(&[app.clone()]).await;

    assert_eq!(h.launcher().total_loads(), 2);
    assert_eq!(h.model().len(), 2);
    assert_eq!(h.system.loaded_project_paths().await, vec![app, lib]);
}

#[tokio::test]
async fn restore_need_survives_a_failing_sibling_target() {
    let h = Harness::new();
    let app = h.sdk_project("App", &[]);
    h.set_info(
        &app,
        vec![
            snapshot(&app, Some("net8.0"), &["Program.cs"]),
            snapshot(&app, Some("net6.0"), &["Program.cs"]),
        ],
    );
    h.system.open(&[app.clone()]).await;

    // net8.0 gains a package; net6.0 comes back under another path and fails.
    let mut net8 = snapshot(&app, Some("net8.0"), &["Program.cs"]);
    net8.package_references = vec![PackageReference::new("Serilog", "3.1.1")];
    let mut net6 = snapshot(&app, Some("net6.0"), &["Program.cs"]);
    net6.file_path = h.dir.path().join("Elsewhere/App.csproj");
    h.set_info(&app, vec![net8, net6]);

    h.system.reload_project(&app);
    h.system.wait_for_pending_loads().await;

    h.wait_for_client(|s| matches!(s, Seen::Restore(_))).await;
    let restores: Vec<Vec<PathBuf>> = h
        .seen()
        .into_iter()
        .filter_map(|s| match s {
            Seen::Restore(projects) => Some(projects),
            _ => None,
        })
        .collect();
    assert_eq!(restores, vec![vec![app.clone()]]);

    let diagnostics = h.system.diagnostics();
    assert!(diagnostics.for_project(&app)[0]
        .message()
        .contains("identity changed"));
}
