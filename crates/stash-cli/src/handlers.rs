//! Command handlers.

use crate::commands::{KeyArgs, RestoreArgs, SaveArgs, join_lines};
use crate::config::{Settings, StoreTarget};
use crate::outputs::Outputs;
use console::style;
use stash_cache::{CacheOrchestrator, RestoreInputs, SaveInputs, run_restore, run_save};
use stash_core::ObjectStore;
use stash_core::state::FileState;
use stash_store::{FilesystemStore, S3Store};
use std::sync::Arc;

async fn open_store(target: &StoreTarget) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match target {
        StoreTarget::S3(config) => Arc::new(S3Store::connect(config.clone()).await?),
        StoreTarget::Directory(dir) => Arc::new(FilesystemStore::new(dir)),
    };
    tracing::debug!(store = store.name(), "Opened object store");
    Ok(store)
}

async fn orchestrator(settings: &Settings) -> anyhow::Result<CacheOrchestrator> {
    let store = open_store(&settings.store).await?;
    Ok(CacheOrchestrator::new(store, settings.working_dir.clone())
        .with_compression(settings.compression))
}

fn restore_inputs(args: &KeyArgs, lookup_only: bool) -> RestoreInputs {
    RestoreInputs {
        path: join_lines(&args.paths),
        key: args.key.clone().unwrap_or_default(),
        restore_keys: join_lines(&args.restore_keys),
        lookup_only,
        fail_on_cache_miss: args.fail_on_cache_miss,
    }
}

pub async fn restore(settings: &Settings, args: RestoreArgs) -> anyhow::Result<()> {
    run_restore_step(settings, restore_inputs(&args.target, args.lookup_only)).await
}

pub async fn lookup(settings: &Settings, args: KeyArgs) -> anyhow::Result<()> {
    run_restore_step(settings, restore_inputs(&args, true)).await
}

async fn run_restore_step(settings: &Settings, inputs: RestoreInputs) -> anyhow::Result<()> {
    let cache = orchestrator(settings).await?;
    let state = FileState::new(&settings.state_file);
    let outputs = run_restore(&cache, &state, &inputs).await?;

    for prefix in &outputs.result.truncated_prefixes {
        eprintln!(
            "{} Listing for {} was truncated; a newer entry may exist",
            style("!").yellow(),
            style(prefix).bold()
        );
    }

    let out = Outputs::new(settings.output_file.clone());
    match (&outputs.matched_key, outputs.cache_hit) {
        (Some(matched), Some(hit)) => {
            out.set("cache-hit", &hit.to_string())?;
            out.set("matched-key", matched)?;
            let verb = if inputs.lookup_only { "Found" } else { "Restored" };
            eprintln!(
                "{} {} {} ({} bytes, {} ms)",
                style("✓").green(),
                verb,
                style(matched).bold(),
                outputs.result.bytes_transferred,
                outputs.result.duration_ms
            );
        }
        _ => eprintln!("{} No cache entry matched", style("i").blue()),
    }
    Ok(())
}

pub async fn save(settings: &Settings, args: SaveArgs) -> anyhow::Result<()> {
    let cache = orchestrator(settings).await?;
    let state = FileState::new(&settings.state_file);
    let inputs = SaveInputs {
        path: (!args.paths.is_empty()).then(|| join_lines(&args.paths)),
        key: args.key,
    };

    match run_save(&cache, &state, &inputs).await? {
        Some(result) if result.saved => eprintln!(
            "{} Saved {} ({} bytes, {} ms)",
            style("✓").green(),
            style(&result.storage_key).bold(),
            result.bytes_uploaded,
            result.duration_ms
        ),
        Some(result) => eprintln!(
            "{} Nothing uploaded for {}",
            style("i").blue(),
            style(&result.storage_key).bold()
        ),
        None => eprintln!("{} Restored entry is current, not saving", style("i").blue()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_core::Compression;
    use std::path::Path;

    fn local_settings(store: &Path, work: &Path, state: &Path, out: &Path) -> Settings {
        Settings {
            store: StoreTarget::Directory(store.to_path_buf()),
            compression: Compression::Gzip,
            working_dir: work.to_path_buf(),
            state_file: state.to_path_buf(),
            output_file: Some(out.to_path_buf()),
        }
    }

    fn key_args(path: &str, key: &str) -> KeyArgs {
        KeyArgs {
            paths: vec![path.to_string()],
            key: Some(key.to_string()),
            restore_keys: Vec::new(),
            fail_on_cache_miss: false,
        }
    }

    #[tokio::test]
    async fn test_job_through_local_store() {
        let root = tempfile::tempdir().unwrap();
        let store = root.path().join("store");
        let work = root.path().join("work");
        std::fs::create_dir_all(work.join("deps")).unwrap();
        std::fs::write(work.join("deps/lib.a"), "archive").unwrap();
        let out = root.path().join("outputs");

        let first = local_settings(&store, &work, &root.path().join("state-1.json"), &out);
        restore(
            &first,
            RestoreArgs {
                target: key_args("deps", "deps-v1"),
                lookup_only: false,
            },
        )
        .await
        .unwrap();
        assert!(!out.exists());
        save(
            &first,
            SaveArgs {
                paths: Vec::new(),
                key: None,
            },
        )
        .await
        .unwrap();

        std::fs::remove_dir_all(&work).unwrap();
        std::fs::create_dir_all(&work).unwrap();
        let second = local_settings(&store, &work, &root.path().join("state-2.json"), &out);
        restore(
            &second,
            RestoreArgs {
                target: key_args("deps", "deps-v1"),
                lookup_only: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read_to_string(work.join("deps/lib.a")).unwrap(), "archive");
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "cache-hit=true\nmatched-key=deps-v1\n"
        );
    }

    #[tokio::test]
    async fn test_lookup_strict_miss_fails() {
        let root = tempfile::tempdir().unwrap();
        let settings = local_settings(
            &root.path().join("store"),
            root.path(),
            &root.path().join("state.json"),
            &root.path().join("outputs"),
        );
        let mut args = key_args("deps", "deps-v1");
        args.fail_on_cache_miss = true;

        let err = lookup(&settings, args).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cache not found with key: deps-v1, restore keys: []"
        );
    }
}
