//! Configuration commands.

use super::{explain, load_config};
use anyhow::{Context, Result};
use console::style;
use dbharness_core::{Dialect, HarnessConfig, Profile};
use std::path::Path;

const REDACTED: &str = "***";

/// Prints the effective configuration as TOML, password masked.
pub fn show(path: &Path, profile: Option<Profile>, driver: Option<Dialect>) -> Result<()> {
    let config = load_config(path, profile, driver)?;
    print!("{}", render(&config)?);
    Ok(())
}

/// Writes `path` from profile defaults.
pub fn init(path: &Path, profile: Option<Profile>, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    let profile = profile.unwrap_or_default();
    profile.defaults().save(path).map_err(explain)?;
    println!(
        "Wrote {} with {} defaults",
        style(path.display()).cyan(),
        style(profile).bold()
    );
    Ok(())
}

fn render(config: &HarnessConfig) -> Result<String> {
    let mut shown = config.clone();
    if !shown.database.password.is_empty() {
        shown.database.password = REDACTED.to_string();
    }
    if shown.database.url.is_some() {
        shown.database.url = Some(config.database.redacted_url());
    }
    toml::to_string_pretty(&shown).context("failed to serialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_masks_password() {
        let mut config = HarnessConfig::default();
        config.database.password = "hunter2".into();
        let text = render(&config).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains(REDACTED));
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dbharness.toml");

        init(&path, Some(Profile::Ci), false).unwrap();
        let written = HarnessConfig::load(&path).unwrap();
        assert_eq!(written, Profile::Ci.defaults());

        assert!(init(&path, None, false).is_err());
        init(&path, None, true).unwrap();
        assert_eq!(HarnessConfig::load(&path).unwrap(), Profile::Local.defaults());
    }
}
