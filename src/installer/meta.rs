//! meta.ini generation for installed addons.
//!
//! Mod Organizer reads `meta.ini` from each mod folder to show the version
//! and a link back to the addon page.

use std::io::Write;
use std::path::Path;

use crate::catalog::AddonRecord;

/// File name Mod Organizer looks for in a mod folder.
pub const META_FILE: &str = "meta.ini";

/// Game identifier written into every stub.
const GAME_NAME: &str = "stalkeranomaly";

/// Fields recorded in the stub.
#[derive(Debug, Clone)]
pub struct MetaConfig {
    /// Nominal version: the archive name without its extension
    pub version: String,
    /// Archive the mod was installed from
    pub installation_file: String,
    /// Addon page shown as the mod's homepage
    pub url: String,
}

impl MetaConfig {
    pub fn for_record(record: &AddonRecord) -> Self {
        Self {
            version: record.version().to_string(),
            installation_file: record.archive_file_name.clone(),
            url: record.nice_url.clone(),
        }
    }
}

/// Write `meta.ini` into `mod_dir`, replacing any existing one.
pub fn write_meta(config: &MetaConfig, mod_dir: &Path) -> std::io::Result<()> {
    let mut file = std::fs::File::create(mod_dir.join(META_FILE))?;
    let installed = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");

    writeln!(file, "[General]")?;
    writeln!(file, "gameName={}", GAME_NAME)?;
    writeln!(file, "modid=0")?;
    writeln!(file, "version={}", config.version)?;
    writeln!(file, "newestVersion={}", config.version)?;
    writeln!(file, "category=\"-1,\"")?;
    writeln!(file, "installationFile={}", config.installation_file)?;
    writeln!(file, "url={}", config.url)?;
    writeln!(file, "hasCustomURL=true")?;
    writeln!(file, "installed={}", installed)?;
    writeln!(file)?;
    writeln!(file, "[installedFiles]")?;
    writeln!(file, "size=0")?;

    Ok(())
}
