//! Integration tests for loading configuration into a context

use super::test_utils::name;
use skstore::dir::LazyFn;
use skstore::{ConfigLoader, Context, DirName, File, Key, StoreConfig, StoreError};
use std::sync::Arc;
use tempfile::TempDir;

fn self_reader() -> LazyFn {
    Arc::new(
        |ctx: &mut Context, name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            let me = ctx.dir_id(name)?;
            let seen = ctx.get_array(me, key)?;
            Ok(Some(vec![File::from(seen.len() as i64)]))
        },
    )
}

#[test]
fn test_written_defaults_load_back() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("conf").join("skstore.toml");
    ConfigLoader::write_default(&path).unwrap();
    assert!(path.exists());
    assert_eq!(ConfigLoader::load_from_file(&path).unwrap(), StoreConfig::default());
}

#[test]
fn test_file_changes_cycle_policy_of_context() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("skstore.toml");
    std::fs::write(&path, "[lazy]\nthrow_on_cycle = false\n").unwrap();

    let lenient = ConfigLoader::load(Some(&path)).unwrap();
    let mut ctx = Context::with_config(lenient);
    let id = ctx.mk_lazy(name("/self/"), self_reader(), false).unwrap();
    assert_eq!(ctx.get_array(id, &Key::Iid(1)).unwrap(), vec![File::from(0)]);

    let mut strict = Context::with_config(ConfigLoader::load(None).unwrap());
    let id = strict.mk_lazy(name("/self/"), self_reader(), false).unwrap();
    assert!(matches!(
        strict.get_array(id, &Key::Iid(1)),
        Err(StoreError::CycleDetected { .. })
    ));
}

#[test]
fn test_invalid_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("skstore.toml");
    std::fs::write(&path, "[logging]\nlevel = \"loud\"\n").unwrap();
    assert!(matches!(
        ConfigLoader::load(Some(&path)),
        Err(StoreError::Config(_))
    ));
    assert!(ConfigLoader::load(Some(&temp_dir.path().join("missing.toml"))).is_err());
}
