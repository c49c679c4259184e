//! Offline board commands: `shopflow init`, `snapshot`, `repair`.

use anyhow::{Context, Result, bail};

use shopflow::board::db::BoardDb;
use shopflow::board::rebuild::rebuild;
use shopflow::config::ShopConfig;

pub fn cmd_init(config: &ShopConfig) -> Result<()> {
    let path = &config.store.path;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    BoardDb::open(path, config.lock_timeout()).context("Failed to initialize board database")?;
    println!("Board database initialized at {}", path.display());
    Ok(())
}

fn open_existing(config: &ShopConfig) -> Result<BoardDb> {
    let path = &config.store.path;
    if !path.exists() {
        bail!(
            "No board database at {}. Run `shopflow init` first.",
            path.display()
        );
    }
    BoardDb::open(path, config.lock_timeout())
        .with_context(|| format!("Failed to open board database at {}", path.display()))
}

pub fn cmd_snapshot(config: &ShopConfig, pretty: bool) -> Result<()> {
    let db = open_existing(config)?;
    let snapshot = rebuild(&db).context("Failed to rebuild board snapshot")?;
    let json = if pretty {
        serde_json::to_string_pretty(&snapshot)?
    } else {
        serde_json::to_string(&snapshot)?
    };
    println!("{}", json);
    Ok(())
}

pub fn cmd_repair(config: &ShopConfig) -> Result<()> {
    let db = open_existing(config)?;
    let changed = db
        .normalize_positions()
        .context("Failed to normalize positions")?;
    let snapshot = rebuild(&db)?;
    if let Err(violation) = snapshot.check_invariants() {
        bail!("Board still inconsistent after repair: {}", violation);
    }
    if changed == 0 {
        println!("Board is consistent; nothing to repair.");
    } else {
        println!(
            "Repaired {} item(s); board is at version {}.",
            changed, snapshot.version
        );
    }
    Ok(())
}
