//! XDG autostart registration
//!
//! Desktop sessions following the XDG autostart specification launch every
//! `*.desktop` entry found in `$XDG_CONFIG_HOME/autostart` at login.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mirrorkeep_core::ports::autostart::AutostartRegistrar;

/// Writes a desktop entry into the user's autostart directory
#[derive(Debug, Clone)]
pub struct XdgAutostart {
    dir: PathBuf,
}

impl XdgAutostart {
    /// Uses `$XDG_CONFIG_HOME/autostart` (usually `~/.config/autostart`)
    pub fn new() -> Self {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("autostart");
        Self { dir }
    }

    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn entry_path(&self, app_name: &str) -> PathBuf {
        self.dir.join(format!("{app_name}.desktop"))
    }
}

impl Default for XdgAutostart {
    fn default() -> Self {
        Self::new()
    }
}

fn desktop_entry(executable: &Path, app_name: &str) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name={app_name}\n\
         Exec=\"{}\"\n\
         NoDisplay=true\n\
         X-GNOME-Autostart-enabled=true\n",
        executable.display()
    )
}

impl AutostartRegistrar for XdgAutostart {
    fn ensure_registered(&self, executable: &Path, app_name: &str) -> Result<bool> {
        let path = self.entry_path(app_name);
        let wanted = desktop_entry(executable, app_name);

        if std::fs::read_to_string(&path).is_ok_and(|current| current == wanted) {
            return Ok(false);
        }

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        std::fs::write(&path, wanted).with_context(|| format!("writing {}", path.display()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_registration_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let registrar = XdgAutostart::with_dir(tmp.path().join("autostart"));
        let exe = Path::new("/opt/mirrorkeep/mirrorkeepd");

        assert!(registrar.ensure_registered(exe, "mirrorkeep").unwrap());
        assert!(!registrar.ensure_registered(exe, "mirrorkeep").unwrap());

        let entry = std::fs::read_to_string(registrar.entry_path("mirrorkeep")).unwrap();
        assert!(entry.starts_with("[Desktop Entry]\n"));
        assert!(entry.contains("Exec=\"/opt/mirrorkeep/mirrorkeepd\"\n"));
    }

    #[test]
    fn test_moved_executable_rewrites_entry() {
        let tmp = TempDir::new().unwrap();
        let registrar = XdgAutostart::with_dir(tmp.path().to_path_buf());

        registrar
            .ensure_registered(Path::new("/old/mirrorkeepd"), "mirrorkeep")
            .unwrap();
        assert!(registrar
            .ensure_registered(Path::new("/new/mirrorkeepd"), "mirrorkeep")
            .unwrap());
        let entry = std::fs::read_to_string(registrar.entry_path("mirrorkeep")).unwrap();
        assert!(entry.contains("/new/mirrorkeepd"));
    }
}
