//! Workspace loading and project configuration tests

use metal_config::{ConfigError, ConfigLoader, HeaderRef, ProjectConfig, PROJECT_FILE};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let config_path = dir.join(PROJECT_FILE);
    fs::write(&config_path, content).unwrap();
    config_path
}

fn loader(temp: &TempDir) -> ConfigLoader {
    ConfigLoader::new().with_global_config_path(temp.path().join("global.toml"))
}

fn project_names(temp: &TempDir, start: &Path) -> Vec<String> {
    loader(temp)
        .load_workspace(start)
        .unwrap()
        .projects
        .into_iter()
        .map(|p| p.name)
        .collect()
}

// ============================================================================
// Project File Tests
// ============================================================================

#[test]
fn test_load_project_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(
        temp_dir.path(),
        r#"
[project]
name = "bar"

[[sources]]
name = "main"
kind = "cxx"
sources = ["src/main/cxx"]
header-dependencies = ["src/main/include"]
"#,
    );

    let config = ProjectConfig::load_from_file(&path).unwrap();
    assert_eq!(config.project_name(), Some("bar"));
    assert_eq!(
        config.sources[0].header_dependencies,
        vec![HeaderRef::Directory(PathBuf::from("src/main/include"))]
    );
}

#[test]
fn test_invalid_toml_reports_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[project\nname = ");

    match ProjectConfig::load_from_file(&path) {
        Err(ConfigError::TomlParseError { file, .. }) => assert_eq!(file, path),
        other => panic!("expected TomlParseError, got {:?}", other),
    }
}

#[test]
fn test_missing_project_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join(PROJECT_FILE);
    assert!(matches!(
        ProjectConfig::load_from_file(&path),
        Err(ConfigError::NotFound(_))
    ));
}

#[rstest]
#[case("c")]
#[case("cpp")]
#[case("cxx")]
#[case("ixx")]
#[case("asm")]
fn test_every_kind_is_accepted(#[case] kind: &str) {
    let toml = format!(
        "[project]\nname = \"bar\"\n\n[[sources]]\nname = \"main\"\nkind = \"{}\"\n",
        kind
    );
    let config: ProjectConfig = toml::from_str(&toml).unwrap();
    assert!(config.validate().is_ok());
}

// ============================================================================
// Workspace Tests
// ============================================================================

#[test]
fn test_workspace_orders_producers_first() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    create_config_file(
        &root.join("app"),
        r#"
[project]
name = "app"

[dependencies.bar]
path = "../bar"

[dependencies.googletest]
path = "../googletest"
"#,
    );
    create_config_file(
        &root.join("bar"),
        r#"
[project]
name = "bar"

[dependencies.googletest]
path = "../googletest"
"#,
    );
    create_config_file(
        &root.join("googletest"),
        r#"
[project]
name = "googletest"

[expose.native]
archives = ["gtest"]
"#,
    );

    assert_eq!(
        project_names(&temp_dir, &root.join("app")),
        vec!["googletest", "bar", "app"]
    );
}

#[test]
fn test_workspace_root_is_last() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    create_config_file(
        &root.join("bar"),
        "[project]\nname = \"bar\"\n\n[dependencies.googletest]\npath = \"../googletest\"\n",
    );
    create_config_file(&root.join("googletest"), "[project]\nname = \"googletest\"\n");

    let workspace = loader(&temp_dir).load_workspace(&root.join("bar")).unwrap();
    assert_eq!(workspace.root().name(), "bar");
    assert!(workspace.project("googletest").is_some());
    assert!(workspace.project("missing").is_none());
}

#[test]
fn test_workspace_dependency_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    create_config_file(
        &root.join("a"),
        "[project]\nname = \"a\"\n\n[dependencies.b]\npath = \"../b\"\n",
    );
    create_config_file(
        &root.join("b"),
        "[project]\nname = \"b\"\n\n[dependencies.a]\npath = \"../a\"\n",
    );

    match loader(&temp_dir).load_workspace(&root.join("a")) {
        Err(ConfigError::DependencyCycle(cycle)) => assert_eq!(cycle, "a -> b -> a"),
        other => panic!("expected DependencyCycle, got {:?}", other.map(|w| w.projects)),
    }
}

#[test]
fn test_workspace_dependency_name_mismatch() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    create_config_file(
        &root.join("app"),
        "[project]\nname = \"app\"\n\n[dependencies.gtest]\npath = \"../googletest\"\n",
    );
    create_config_file(&root.join("googletest"), "[project]\nname = \"googletest\"\n");

    let err = loader(&temp_dir)
        .load_workspace(&root.join("app"))
        .unwrap_err();
    assert!(err.to_string().contains("googletest"));
}

#[test]
fn test_workspace_missing_dependency_path() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        "[project]\nname = \"app\"\n\n[dependencies.bar]\npath = \"missing\"\n",
    );

    assert!(matches!(
        loader(&temp_dir).load_workspace(temp_dir.path()),
        Err(ConfigError::NotFound(_))
    ));
}

#[test]
fn test_workspace_uses_global_defaults() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("global.toml"),
        "[defaults]\njobs = 3\n\n[toolchain]\narchiver = \"llvm-ar\"\n",
    )
    .unwrap();
    let project = temp_dir.path().join("bar");
    create_config_file(&project, "[project]\nname = \"bar\"\n");

    let workspace = loader(&temp_dir).load_workspace(&project).unwrap();
    assert_eq!(workspace.settings.jobs, Some(3));
    assert_eq!(workspace.settings.toolchain.archiver.as_deref(), Some("llvm-ar"));
}
