use std::sync::Arc;
use std::time::{Duration, Instant};

use hotswap_kernel::plugin::{HotReloadConfig, LifecycleState, PluginConfig, ReloadEvent};
use hotswap_plugins::hot_reload::{
    HookError, HotReloadManager, ReloadError, UnknownOperatorPolicy,
};
use hotswap_testing::{Hook, MockPlugin, MockScript, assert_hook_called, init_tracing};
use serde_json::json;

fn setup(config: HotReloadConfig) -> (Arc<HotReloadManager>, MockScript) {
    init_tracing();
    (Arc::new(HotReloadManager::new(config)), MockScript::new())
}

fn register(manager: &HotReloadManager, script: &MockScript, name: &str, version: &str, deps: &[&str]) {
    manager.register_factory(name, script.factory(name, version, deps));
}

async fn with_mock<R>(
    manager: &HotReloadManager,
    name: &str,
    f: impl FnOnce(&mut MockPlugin) -> R,
) -> R {
    let handle = manager.get(name).expect("plugin is live");
    let mut guard = handle.lock().await;
    let mock = guard
        .as_any_mut()
        .downcast_mut::<MockPlugin>()
        .expect("plugin is a MockPlugin");
    f(mock)
}

// ============================================================================
// State continuity
// ============================================================================

#[tokio::test]
async fn test_reload_preserves_scalar_and_nested_state() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    with_mock(&manager, "svc", |mock| {
        mock.set("counter", json!(3));
        mock.set("settings", json!({"depth": 2, "tags": ["a", "b"]}));
    })
    .await;

    manager.set_plugin_config("svc", PluginConfig::new().with("version", "1.1.0"));
    let result = manager.reload("svc").await?;
    assert_eq!(result.version, "1.1.0");
    assert_eq!(result.previous_version.as_deref(), Some("1.0.0"));
    assert!(result.state_preserved);

    let (counter, settings) = with_mock(&manager, "svc", |mock| {
        (mock.value("counter").cloned(), mock.value("settings").cloned())
    })
    .await;
    assert_eq!(counter, Some(json!(3)));
    assert_eq!(settings, Some(json!({"depth": 2, "tags": ["a", "b"]})));
    Ok(())
}

#[tokio::test]
async fn test_reload_runs_hooks_in_swap_order() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    manager.set_plugin_config("svc", PluginConfig::new().with("version", "2.0.0"));
    manager.reload("svc").await?;

    let calls: Vec<(Hook, String)> = script
        .calls()
        .into_iter()
        .skip(2)
        .map(|call| (call.hook, call.version))
        .collect();
    assert_eq!(
        calls,
        vec![
            (Hook::GetState, "1.0.0".to_string()),
            (Hook::Construct, "2.0.0".to_string()),
            (Hook::RestoreState, "2.0.0".to_string()),
            (Hook::OnLoad, "2.0.0".to_string()),
            (Hook::OnUnload, "1.0.0".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_reload_with_state_preservation_disabled() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::new().with_preserve_state(false));
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;
    with_mock(&manager, "svc", |mock| mock.set("counter", json!(1))).await;

    let result = manager.reload("svc").await?;
    assert!(!result.state_preserved);
    assert_hook_called!(script, "svc", Hook::GetState, 0);
    assert_hook_called!(script, "svc", Hook::RestoreState, 0);
    assert_eq!(with_mock(&manager, "svc", |mock| mock.value("counter").cloned()).await, None);
    Ok(())
}

// ============================================================================
// Rollback
// ============================================================================

#[tokio::test]
async fn test_failed_reconstruction_leaves_list_unchanged() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "base", "1.0.0", &[]);
    register(&manager, &script, "svc", "1.0.0", &["base>=1.0"]);
    manager.load("base").await?;
    manager.load("svc").await?;
    with_mock(&manager, "svc", |mock| mock.set("counter", json!(7))).await;

    let before = manager.list();
    script.fail("svc", Hook::Construct, "syntax error in new build");

    let err = manager.reload("svc").await.unwrap_err();
    assert!(matches!(err, ReloadError::ReloadFailed { .. }));
    assert!(err.to_string().starts_with("reload failed"));

    let after = manager.list();
    assert_eq!(
        after.iter().map(|r| (&r.name, &r.version)).collect::<Vec<_>>(),
        before.iter().map(|r| (&r.name, &r.version)).collect::<Vec<_>>()
    );
    assert_eq!(manager.status("svc"), LifecycleState::RolledBack);
    assert!(manager.is_registered("svc"));

    // The old instance was never retired.
    assert_hook_called!(script, "svc", Hook::OnUnload, 0);
    let (loaded, counter) =
        with_mock(&manager, "svc", |mock| (mock.is_loaded(), mock.value("counter").cloned())).await;
    assert!(loaded);
    assert_eq!(counter, Some(json!(7)));
    Ok(())
}

#[tokio::test]
async fn test_failed_on_load_keeps_old_instance() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    manager.set_plugin_config("svc", PluginConfig::new().with("version", "2.0.0"));
    script.fail("svc", Hook::OnLoad, "port in use");

    let err = manager.reload("svc").await.unwrap_err();
    match &err {
        ReloadError::ReloadFailed { source, .. } => assert_eq!(source.hook(), "on_load"),
        other => panic!("unexpected error: {other}"),
    }

    let record = manager.record("svc").unwrap();
    assert_eq!(record.version, "1.0.0");
    assert_eq!(record.reload_count, 0);
    assert_eq!(record.status, LifecycleState::RolledBack);

    // A later successful reload returns the plugin to Loaded.
    script.clear("svc", Hook::OnLoad);
    manager.reload("svc").await?;
    assert_eq!(manager.status("svc"), LifecycleState::Loaded);
    assert_eq!(manager.record("svc").unwrap().version, "2.0.0");
    Ok(())
}

#[tokio::test]
async fn test_reload_failure_emits_rollback_events() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    let mut events = manager.subscribe();
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    script.fail("svc", Hook::RestoreState, "schema mismatch");
    assert!(manager.reload("svc").await.is_err());

    assert!(matches!(events.recv().await?, ReloadEvent::Loaded { .. }));
    assert!(matches!(events.recv().await?, ReloadEvent::ReloadStarted { .. }));
    assert!(matches!(events.recv().await?, ReloadEvent::StatePreserved { .. }));
    match events.recv().await? {
        ReloadEvent::ReloadFailed { name, error } => {
            assert_eq!(name, "svc");
            assert!(error.contains("schema mismatch"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(events.recv().await?, ReloadEvent::RollbackTriggered { .. }));
    Ok(())
}

#[tokio::test]
async fn test_reload_rejected_when_new_version_breaks_own_dependencies() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    manager.set_plugin_config(
        "svc",
        PluginConfig::new().with("dependencies", vec!["metrics>=1.0"]),
    );
    let err = manager.reload("svc").await.unwrap_err();
    assert!(matches!(err, ReloadError::DependencyUnsatisfied { .. }));
    assert_eq!(manager.status("svc"), LifecycleState::RolledBack);
    assert!(manager.check_dependencies("svc").satisfied);
    Ok(())
}

#[tokio::test]
async fn test_retiring_old_instance_failure_still_swaps() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    script.fail("svc", Hook::OnUnload, "socket already closed");
    manager.set_plugin_config("svc", PluginConfig::new().with("version", "1.0.1"));
    let result = manager.reload("svc").await?;

    assert_eq!(result.version, "1.0.1");
    assert_eq!(manager.status("svc"), LifecycleState::Loaded);
    Ok(())
}

// ============================================================================
// Panics and timeouts
// ============================================================================

#[tokio::test]
async fn test_panicking_on_load_is_a_load_failure() {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    script.panic_on("svc", Hook::OnLoad, "boom");

    let err = manager.load("svc").await.unwrap_err();
    match err {
        ReloadError::LoadFailed { source: HookError::Panicked { hook, message }, .. } => {
            assert_eq!(hook, "on_load");
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!manager.is_loaded("svc"));
    assert!(!manager.is_registered("svc"));
    assert_eq!(manager.status("svc"), LifecycleState::Unloaded);
}

#[tokio::test]
async fn test_panicking_constructor_rolls_back_reload() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    script.panic_on("svc", Hook::Construct, "constructor exploded");
    let err = manager.reload("svc").await.unwrap_err();
    match err {
        ReloadError::ReloadFailed { source: HookError::Panicked { hook, message }, .. } => {
            assert_eq!(hook, "construct");
            assert!(message.contains("constructor exploded"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.is_loaded("svc"));
    Ok(())
}

#[tokio::test]
async fn test_hook_timeout() {
    let config = HotReloadConfig::new().with_hook_timeout(Duration::from_millis(100));
    let (manager, script) = setup(config);
    register(&manager, &script, "svc", "1.0.0", &[]);
    script.delay("svc", Hook::OnLoad, Duration::from_secs(5));

    let start = Instant::now();
    let err = manager.load("svc").await.unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(2));

    match err {
        ReloadError::LoadFailed { source, .. } => {
            assert!(source.is_timeout());
            assert_eq!(source.hook(), "on_load");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!manager.is_loaded("svc"));
}

// ============================================================================
// Dependencies
// ============================================================================

#[tokio::test]
async fn test_load_reports_version_mismatch() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "A", "1.0", &[]);
    register(&manager, &script, "B", "1.0", &["A>=2.0"]);
    manager.load("A").await?;

    let err = manager.load("B").await.unwrap_err();
    match &err {
        ReloadError::DependencyUnsatisfied { name, missing } => {
            assert_eq!(name, "B");
            assert_eq!(missing, &vec!["A (requires >=2.0, found 1.0)".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        err.to_string(),
        "dependency unsatisfied: A (requires >=2.0, found 1.0)"
    );

    // No ghost registration after the failed load.
    assert!(!manager.is_registered("B"));
    assert_hook_called!(script, "B", Hook::OnLoad, 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_operator_policy() -> anyhow::Result<()> {
    let (permissive, script) = setup(HotReloadConfig::default());
    register(&permissive, &script, "A", "1.0", &[]);
    register(&permissive, &script, "B", "1.0", &["A~=3.0"]);
    permissive.load("A").await?;
    permissive.load("B").await?;

    let strict_config =
        HotReloadConfig::new().with_unknown_operator_policy(UnknownOperatorPolicy::DenyAlways);
    let (strict, script) = setup(strict_config);
    register(&strict, &script, "A", "1.0", &[]);
    register(&strict, &script, "B", "1.0", &["A~=3.0"]);
    strict.load("A").await?;
    let err = strict.load("B").await.unwrap_err();
    assert!(matches!(err, ReloadError::DependencyUnsatisfied { .. }));
    Ok(())
}

#[tokio::test]
async fn test_load_all_orders_by_dependency() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "api", "1.0", &["db>=1.0", "cache"]);
    register(&manager, &script, "cache", "1.0", &["db"]);
    register(&manager, &script, "db", "1.2", &[]);

    let loaded = manager.load_all().await.map_err(|report| anyhow::anyhow!("{report:?}"))?;
    assert_eq!(loaded, vec!["db", "cache", "api"]);
    assert_eq!(script.order_of(Hook::OnLoad), vec!["db", "cache", "api"]);
    assert_eq!(manager.load_order()?, vec!["db", "cache", "api"]);

    let tree = manager.dependency_tree("api");
    assert_eq!(tree["api"], vec!["db", "cache"]);
    assert_eq!(tree["cache"], vec!["db"]);
    assert!(tree["db"].is_empty());

    // Everything is live now; a second batch does nothing.
    assert!(manager.load_all().await.map_err(|r| anyhow::anyhow!("{r:?}"))?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_load_all_reports_cycle() {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "A", "1.0", &[]);
    register(&manager, &script, "B", "1.0", &["A"]);
    register(&manager, &script, "C", "1.0", &["B", "D"]);
    register(&manager, &script, "D", "1.0", &["C"]);

    let report = manager.load_all().await.unwrap_err();
    match report.current_context() {
        ReloadError::Cycle(cycle) => {
            assert_eq!(cycle.involved, vec!["C", "D"]);
            assert_eq!(cycle.to_string(), "circular dependency involving: C, D");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing was loaded: ordering happens before any on_load.
    assert!(manager.is_empty());
    assert!(script.order_of(Hook::OnLoad).is_empty());
}

#[tokio::test]
async fn test_reload_that_breaks_dependents_proceeds() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "A", "1.0", &[]);
    register(&manager, &script, "B", "1.0", &["A<2.0"]);
    manager.load("A").await?;
    manager.load("B").await?;

    manager.set_plugin_config("A", PluginConfig::new().with("version", "2.0"));
    let result = manager.reload("A").await?;
    assert_eq!(result.version, "2.0");

    let report = manager.check_dependencies("B");
    assert!(!report.satisfied);
    assert_eq!(report.missing, vec!["A (requires <2.0, found 2.0)"]);
    Ok(())
}

#[tokio::test]
async fn test_unload_with_dependents_proceeds() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "A", "1.0", &[]);
    register(&manager, &script, "B", "1.0", &["A"]);
    manager.load("A").await?;
    manager.load("B").await?;

    assert!(manager.unload("A").await?);
    assert_eq!(manager.list_names(), vec!["B"]);
    assert_eq!(manager.check_dependencies("B").missing, vec!["A (not installed)"]);
    Ok(())
}

// ============================================================================
// Unload and shutdown
// ============================================================================

#[tokio::test]
async fn test_unload_failure_retains_instance() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    script.fail("svc", Hook::OnUnload, "flush failed");
    let err = manager.unload("svc").await.unwrap_err();
    assert!(matches!(err, ReloadError::UnloadFailed { .. }));
    assert!(manager.is_loaded("svc"));
    assert!(manager.is_registered("svc"));

    script.clear("svc", Hook::OnUnload);
    assert!(manager.unload("svc").await?);
    assert!(!manager.is_loaded("svc"));
    assert!(!manager.is_registered("svc"));
    assert_eq!(manager.status("svc"), LifecycleState::Unloaded);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_unloads_dependents_first() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "A", "1.0", &[]);
    register(&manager, &script, "B", "1.0", &["A"]);
    register(&manager, &script, "C", "1.0", &["B"]);
    manager.load_all().await.map_err(|r| anyhow::anyhow!("{r:?}"))?;

    script.fail("B", Hook::OnUnload, "stuck");
    let failed = manager.shutdown().await;

    assert_eq!(failed, vec!["B"]);
    assert_eq!(script.order_of(Hook::OnUnload), vec!["C", "B", "A"]);
    assert!(manager.is_empty());
    assert!(manager.load_order()?.is_empty());
    Ok(())
}

// ============================================================================
// Factories
// ============================================================================

#[tokio::test]
async fn test_reregistered_factory_is_picked_up_on_reload() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    register(&manager, &script, "svc", "2.0.0", &[]);
    let result = manager.reload("svc").await?;
    assert_eq!(result.previous_version.as_deref(), Some("1.0.0"));
    assert_eq!(result.version, "2.0.0");
    assert_eq!(manager.record("svc").unwrap().reload_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_reload_of_absent_plugin_is_a_load() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);

    let result = manager.reload("svc").await?;
    assert!(result.fresh_load);
    assert_eq!(manager.status("svc"), LifecycleState::Loaded);

    let err = manager.reload("unknown").await.unwrap_err();
    assert!(err.to_string().starts_with("not found"));
    Ok(())
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_of_same_name() {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    script.delay("svc", Hook::OnLoad, Duration::from_millis(50));

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.load("svc").await })
        })
        .collect();

    let mut loaded = 0;
    let mut already = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => loaded += 1,
            Err(ReloadError::AlreadyLoaded(_)) => already += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!((loaded, already), (1, 4));
    assert_hook_called!(script, "svc", Hook::Construct, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reloads_of_same_name_serialize() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;
    with_mock(&manager, "svc", |mock| mock.set("counter", json!(3))).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.reload("svc").await })
        })
        .collect();
    for task in tasks {
        task.await??;
    }

    assert_eq!(manager.record("svc").unwrap().reload_count, 8);
    assert_hook_called!(script, "svc", Hook::Construct, 9);
    assert_hook_called!(script, "svc", Hook::OnUnload, 8);
    assert_eq!(
        with_mock(&manager, "svc", |mock| mock.value("counter").cloned()).await,
        Some(json!(3))
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_names_load_in_parallel() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    let names = ["p1", "p2", "p3", "p4"];
    for name in names {
        register(&manager, &script, name, "1.0", &[]);
        script.delay(name, Hook::OnLoad, Duration::from_millis(300));
    }

    let start = Instant::now();
    let tasks: Vec<_> = names
        .iter()
        .map(|name| {
            let manager = manager.clone();
            let name = name.to_string();
            tokio::spawn(async move { manager.load(&name).await })
        })
        .collect();
    for task in tasks {
        task.await??;
    }

    assert!(start.elapsed() < Duration::from_millis(1000));
    assert_eq!(manager.list_names(), names);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_plugin_stays_visible_while_reloading() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    script.delay("svc", Hook::OnLoad, Duration::from_millis(300));
    let reload = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.reload("svc").await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.status("svc"), LifecycleState::Reloading);
    assert_eq!(manager.list_names(), vec!["svc"]);
    assert!(manager.is_registered("svc"));

    reload.await??;
    assert_eq!(manager.status("svc"), LifecycleState::Loaded);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unload_waits_for_in_flight_reload() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;

    manager.set_plugin_config("svc", PluginConfig::new().with("version", "2.0.0"));
    script.delay("svc", Hook::OnLoad, Duration::from_millis(300));
    let reload = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.reload("svc").await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let unload = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.unload("svc").await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!unload.is_finished());
    assert_eq!(manager.status("svc"), LifecycleState::Reloading);

    let result = reload.await??;
    assert_eq!(result.version, "2.0.0");
    assert!(unload.await??);

    assert!(manager.list_names().is_empty());
    assert!(!manager.is_registered("svc"));

    // Retired instance once by the reload, new instance once by the unload.
    let unloaded: Vec<String> = script
        .calls()
        .into_iter()
        .filter(|call| call.hook == Hook::OnUnload)
        .map(|call| call.version)
        .collect();
    assert_eq!(unloaded, vec!["1.0.0", "2.0.0"]);
    Ok(())
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_reload_restores_status() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    manager.load("svc").await?;
    with_mock(&manager, "svc", |mock| mock.set("counter", json!(3))).await;

    manager.set_plugin_config("svc", PluginConfig::new().with("version", "2.0.0"));
    script.delay("svc", Hook::OnLoad, Duration::from_millis(300));

    let outcome = tokio::time::timeout(Duration::from_millis(50), manager.reload("svc")).await;
    assert!(outcome.is_err());

    assert_eq!(manager.status("svc"), LifecycleState::Loaded);
    let record = manager.record("svc").unwrap();
    assert_eq!(record.version, "1.0.0");
    assert_eq!(record.reload_count, 0);
    assert_hook_called!(script, "svc", Hook::OnUnload, 0);
    assert_eq!(
        with_mock(&manager, "svc", |mock| mock.value("counter").cloned()).await,
        Some(json!(3))
    );

    // The name lock was released with the dropped future.
    script.clear("svc", Hook::OnLoad);
    let result = manager.reload("svc").await?;
    assert_eq!(result.version, "2.0.0");
    assert_eq!(manager.status("svc"), LifecycleState::Loaded);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_load_leaves_plugin_unloaded() -> anyhow::Result<()> {
    let (manager, script) = setup(HotReloadConfig::default());
    register(&manager, &script, "svc", "1.0.0", &[]);
    script.delay("svc", Hook::OnLoad, Duration::from_millis(300));

    let outcome = tokio::time::timeout(Duration::from_millis(50), manager.load("svc")).await;
    assert!(outcome.is_err());

    assert_eq!(manager.status("svc"), LifecycleState::Unloaded);
    assert!(!manager.is_loaded("svc"));
    assert!(!manager.is_registered("svc"));

    script.clear("svc", Hook::OnLoad);
    manager.load("svc").await?;
    assert_eq!(manager.status("svc"), LifecycleState::Loaded);
    Ok(())
}
