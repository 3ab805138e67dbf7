//! Loaded projects over time: reloads, target changes, unloads, file changes.

use std::path::PathBuf;
use std::time::Duration;

use projsys_project::{FileChangeKind, ProjectState};
use projsys_types::{BuildHostKind, DocumentFileInfo, FileGlobs};

use crate::common::{Harness, snapshot};

fn documents(state: &ProjectState) -> Vec<PathBuf> {
    state.documents.keys().cloned().collect()
}

/// Poll until `check` holds; reloads driven by the watcher arrive asynchronously.
async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn reload_applies_only_the_difference() {
    let h = Harness::new();
    let app = h.sdk_project("App", &["A.cs", "B.cs"]);
    h.system.open(&[app.clone()]).await;
    let (id, before) = h.model().find_by_name("App").unwrap();
    assert_eq!(before.batches_applied, 1);

    h.set_info(&app, vec![snapshot(&app, Some("net8.0"), &["B.cs", "C.cs"])]);
    h.system.reload_project(&app);
    h.system.wait_for_pending_loads().await;

    let after = h.model().project(id).unwrap();
    let dir = app.parent().unwrap();
    assert_eq!(documents(&after), vec![dir.join("B.cs"), dir.join("C.cs")]);
    assert_eq!(after.batches_applied, 2);
    assert_eq!(h.model().len(), 1);
}

#[tokio::test]
async fn unchanged_reload_leaves_the_model_alone() {
    let h = Harness::new();
    let app = h.sdk_project("App", &["A.cs"]);
    h.system.open(&[app.clone()]).await;

    h.system.reload_project(&app);
    h.system.wait_for_pending_loads().await;

    let (_, state) = h.model().find_by_name("App").unwrap();
    assert_eq!(state.batches_applied, 1);
    assert_eq!(h.launcher().total_loads(), 2);
}

#[tokio::test]
async fn each_target_framework_is_its_own_project() {
    let h = Harness::new();
    let app = h.sdk_project("App", &[]);
    h.set_info(
        &app,
        vec![
            snapshot(&app, Some("net8.0"), &["Program.cs"]),
            snapshot(&app, Some("net6.0"), &["Program.cs", "Compat.cs"]),
        ],
    );
    h.system.open(&[app.clone()]).await;

    let (_, net8) = h.model().find_by_name("App(net8.0)").unwrap();
    let (_, net6) = h.model().find_by_name("App(net6.0)").unwrap();
    assert_eq!(net8.documents.len(), 1);
    assert_eq!(net6.documents.len(), 2);
    assert_eq!(net6.target_framework.as_deref(), Some("net6.0"));

    // Dropping a target leaves a single-targeted project under its plain name.
    h.set_info(&app, vec![snapshot(&app, Some("net8.0"), &["Program.cs"])]);
    h.system.reload_project(&app);
    h.system.wait_for_pending_loads().await;

    let names: Vec<String> = h.model().projects().into_iter().map(|(_, p)| p.name).collect();
    assert_eq!(names, vec!["App".to_string()]);
    assert_eq!(h.system.loaded_project_paths().await, vec![app]);
}

#[tokio::test]
async fn adding_a_target_keeps_the_other_targets() {
    let h = Harness::new();
    let lib = h.sdk_project("Lib", &[]);
    h.set_info(
        &lib,
        vec![
            snapshot(&lib, Some("net8.0"), &["Lib.cs"]),
            snapshot(&lib, Some("netstandard2.0"), &["Lib.cs"]),
        ],
    );
    h.system.open(&[lib.clone()]).await;
    let (kept, _) = h.model().find_by_name("Lib(net8.0)").unwrap();

    h.set_info(
        &lib,
        vec![
            snapshot(&lib, Some("net8.0"), &["Lib.cs"]),
            snapshot(&lib, Some("netstandard2.0"), &["Lib.cs"]),
            snapshot(&lib, Some("net472"), &["Lib.cs"]),
        ],
    );
    h.system.reload_project(&lib);
    h.system.wait_for_pending_loads().await;

    assert_eq!(h.model().len(), 3);
    assert_eq!(h.model().find_by_name("Lib(net8.0)").unwrap().0, kept);
    assert!(h.model().find_by_name("Lib(net472)").is_some());
}

#[tokio::test]
async fn unload_removes_every_target() {
    let h = Harness::new();
    let app = h.sdk_project("App", &[]);
    let other = h.sdk_project("Other", &["O.cs"]);
    h.set_info(
        &app,
        vec![
            snapshot(&app, Some("net8.0"), &["Program.cs"]),
            snapshot(&app, Some("net6.0"), &["Program.cs"]),
        ],
    );
    h.system.open(&[app.clone(), other.clone()]).await;
    assert_eq!(h.model().len(), 3);
    assert!(h.watcher.subscription_count() > 0);

    assert!(h.system.unload_project(&app).await);
    assert_eq!(h.model().len(), 1);
    assert!(h.model().find_by_name("Other").is_some());
    assert_eq!(h.system.loaded_project_paths().await, vec![other]);

    assert!(!h.system.unload_project(&app).await);
    assert!(!h.system.unload_project(&h.dir.path().join("Nope/Nope.csproj")).await);
}

#[tokio::test]
async fn unloaded_project_can_be_opened_again() {
    let h = Harness::new();
    let app = h.sdk_project("App", &["A.cs"]);
    h.system.open(&[app.clone()]).await;
    let (first, _) = h.model().find_by_name("App").unwrap();

    assert!(h.system.unload_project(&app).await);
    h.system.open(&[app]).await;

    let (second, state) = h.model().find_by_name("App").unwrap();
    assert_ne!(first, second);
    assert_eq!(state.documents.len(), 1);
}

#[tokio::test]
async fn project_file_change_triggers_reload() {
    let h = Harness::new();
    let app = h.sdk_project("App", &["A.cs"]);
    h.system.open(&[app.clone()]).await;

    h.set_info(&app, vec![snapshot(&app, Some("net8.0"), &["A.cs", "B.cs"])]);
    h.system.file_changed(&app, FileChangeKind::Changed);

    eventually(|| {
        h.model()
            .find_by_name("App")
            .is_some_and(|(_, state)| state.documents.len() == 2)
    })
    .await;
}

#[tokio::test]
async fn new_file_matching_a_glob_triggers_reload() {
    let h = Harness::new();
    let app = h.sdk_project("App", &[]);
    let mut info = snapshot(&app, Some("net8.0"), &["A.cs"]);
    info.file_globs = vec![FileGlobs {
        includes: vec!["**/*.cs".to_string()],
        excludes: vec!["bin/**".to_string(), "obj/**".to_string()],
        removes: Vec::new(),
    }];
    h.set_info(&app, vec![info.clone()]);
    h.system.open(&[app.clone()]).await;
    let loads = h.launcher().total_loads();
    let dir = app.parent().unwrap().to_path_buf();

    // Excluded and non-matching paths do nothing.
    h.system
        .file_changed(&dir.join("obj/Generated.cs"), FileChangeKind::Created);
    h.system
        .file_changed(&dir.join("README.md"), FileChangeKind::Created);
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.system.wait_for_pending_loads().await;
    assert_eq!(h.launcher().total_loads(), loads);

    info.documents.push(DocumentFileInfo::new(dir.join("Models/New.cs")));
    h.set_info(&app, vec![info]);
    h.system
        .file_changed(&dir.join("Models/New.cs"), FileChangeKind::Created);

    eventually(|| {
        h.model()
            .find_by_name("App")
            .is_some_and(|(_, state)| state.documents.contains_key(&dir.join("Models/New.cs")))
    })
    .await;
}

#[tokio::test]
async fn unloaded_project_stops_reacting_to_changes() {
    let h = Harness::new();
    let app = h.sdk_project("App", &["A.cs"]);
    h.system.open(&[app.clone()]).await;
    assert!(h.system.unload_project(&app).await);
    assert_eq!(h.watcher.subscription_count(), 0);

    h.system.file_changed(&app, FileChangeKind::Changed);
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.system.wait_for_pending_loads().await;

    assert!(h.model().is_empty());
    assert_eq!(h.launcher().total_loads(), 1);
}

#[tokio::test]
async fn shutdown_stops_every_build_host() {
    let h = Harness::new();
    let app = h.sdk_project("App", &["A.cs"]);
    h.system.open(&[app]).await;
    assert_eq!(
        h.system.manager().running_kinds().await,
        vec![BuildHostKind::NetCore]
    );

    h.system.shutdown().await;

    assert!(h.system.manager().running_kinds().await.is_empty());
    assert!(!h.system.manager().is_running(BuildHostKind::NetCore).await);
}

#[tokio::test]
async fn project_opened_by_a_roundabout_path_stays_one_project() {
    let h = Harness::new();
    let app = h.sdk_project("App", &["A.cs"]);
    let roundabout = h.dir.path().join("App/../App/./App.csproj");
    h.system.open(&[roundabout.clone()]).await;
    assert_eq!(h.model().len(), 1);
    assert_eq!(h.system.loaded_project_paths().await, vec![app.clone()]);

    // The watcher reports the plain path; it must land in the same slot.
    h.set_info(&app, vec![snapshot(&app, Some("net8.0"), &["A.cs", "B.cs"])]);
    h.system.file_changed(&app, FileChangeKind::Changed);
    eventually(|| {
        h.model()
            .find_by_name("App")
            .is_some_and(|(_, state)| state.documents.len() == 2)
    })
    .await;
    h.system.wait_for_pending_loads().await;

    assert_eq!(h.model().len(), 1);
    assert_eq!(h.model().find_by_name("App").unwrap().1.batches_applied, 2);
    assert_eq!(h.system.loaded_project_paths().await, vec![app]);

    assert!(h.system.unload_project(&roundabout).await);
    assert!(h.model().is_empty());
    assert_eq!(h.watcher.subscription_count(), 0);
}
