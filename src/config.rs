//! Driver-settings document loading (§6 "Configuration").
//!
//! A TOML document naming, per FS flavor, the server-defined IOCtl
//! descriptors the gateway must validate buffers against (§4.8). A missing
//! file is not an error: the registry is simply empty and only the
//! well-known IOCtls are honored.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct IoctlDescriptor {
    pub command: u32,
    #[serde(default)]
    pub is_buffer: bool,
    #[serde(default)]
    pub buffer_size: u32,
    #[serde(default)]
    pub write_buffer_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlavorSettings {
    pub name: String,
    #[serde(default)]
    pub ioctl: Vec<IoctlDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default, rename = "flavor")]
    pub flavors: Vec<FlavorSettings>,
}

/// Validated, flavor-keyed view of `Settings`, consumed by `FileSystem`.
#[derive(Debug, Clone, Default)]
pub struct IoctlRegistry {
    by_command: HashMap<u32, IoctlDescriptor>,
}

impl IoctlRegistry {
    pub fn get(&self, command: u32) -> Option<&IoctlDescriptor> {
        self.by_command.get(&command)
    }

    pub fn is_empty(&self) -> bool {
        self.by_command.is_empty()
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(ConfigError::Parse)
    }

    /// Validate and index the IOCtl descriptors for one flavor, producing
    /// the registry `FileSystem` will hold.
    pub fn registry_for(&self, flavor: &str) -> Result<IoctlRegistry, ConfigError> {
        let mut seen_flavor = false;
        let mut by_command = HashMap::new();
        for entry in &self.flavors {
            if entry.name != flavor {
                continue;
            }
            if seen_flavor {
                return Err(ConfigError::DuplicateFlavor(flavor.to_owned()));
            }
            seen_flavor = true;
            for ioctl in &entry.ioctl {
                if by_command.contains_key(&ioctl.command) {
                    return Err(ConfigError::DuplicateIoctlCommand {
                        flavor: flavor.to_owned(),
                        command: ioctl.command,
                    });
                }
                if !ioctl.is_buffer && ioctl.write_buffer_size > 0 {
                    return Err(ConfigError::InvalidIoctl {
                        flavor: flavor.to_owned(),
                        command: ioctl.command,
                        reason: "write_buffer_size set without is_buffer",
                    });
                }
                by_command.insert(ioctl.command, ioctl.clone());
            }
        }
        Ok(IoctlRegistry { by_command })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_settings() {
        let settings = Settings::load(Path::new("/nonexistent/path/settings.toml")).unwrap();
        assert!(settings.flavors.is_empty());
    }

    #[test]
    fn parses_flavor_ioctls() {
        let doc = r#"
            [[flavor]]
            name = "ext-like"

            [[flavor.ioctl]]
            command = 1
            is_buffer = true
            buffer_size = 64
            write_buffer_size = 64
        "#;
        let settings = Settings::parse(doc).unwrap();
        let registry = settings.registry_for("ext-like").unwrap();
        let descriptor = registry.get(1).unwrap();
        assert_eq!(descriptor.buffer_size, 64);
    }

    #[test]
    fn rejects_write_size_without_buffer_flag() {
        let doc = r#"
            [[flavor]]
            name = "bad"

            [[flavor.ioctl]]
            command = 1
            write_buffer_size = 8
        "#;
        let settings = Settings::parse(doc).unwrap();
        assert!(settings.registry_for("bad").is_err());
    }

    #[test]
    fn loads_from_a_real_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
            [[flavor]]
            name = "ext-like"

            [[flavor.ioctl]]
            command = 2
            "#,
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        let registry = settings.registry_for("ext-like").unwrap();
        assert!(registry.get(2).is_some());
    }
}
