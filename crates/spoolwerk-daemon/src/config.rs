// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Daemon configuration file: scheduler settings plus the printers, classes
// and filter rules the daemon starts with.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use spoolwerk_core::config::SchedulerConfig;
use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_sched::{FilterRule, FilterTable, MemoryRegistry, PrinterInfo};

/// One configured printer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterConfig {
    pub name: String,
    pub device_uri: String,
    /// MIME type the device consumes.
    #[serde(default = "default_accepted_type")]
    pub accepted_type: String,
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub fax: bool,
    /// Per-user page quota.
    #[serde(default)]
    pub page_limit: Option<u32>,
}

fn default_accepted_type() -> String {
    "application/vnd.cups-raster".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassConfig {
    pub name: String,
    pub members: Vec<String>,
    /// Pooled automatically from identical remote queues rather than
    /// configured by an operator.
    #[serde(default)]
    pub implicit: bool,
}

/// Contents of `spoolwerkd.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub scheduler: SchedulerConfig,
    pub printers: Vec<PrinterConfig>,
    pub classes: Vec<ClassConfig>,
    pub filters: Vec<FilterRule>,
}

impl DaemonConfig {
    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(SpoolError::Config(format!("{}: {e}", path.display()))),
        };
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| SpoolError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        info!(
            path = %path.display(),
            printers = config.printers.len(),
            classes = config.classes.len(),
            filters = config.filters.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Class members must name configured printers.
    fn validate(&self) -> Result<()> {
        for class in &self.classes {
            if let Some(missing) = class
                .members
                .iter()
                .find(|m| !self.printers.iter().any(|p| &p.name == *m))
            {
                return Err(SpoolError::Config(format!(
                    "class {} lists unknown printer {missing}",
                    class.name
                )));
            }
        }
        Ok(())
    }

    pub fn registry(&self) -> MemoryRegistry {
        let mut registry = MemoryRegistry::new();
        for printer in &self.printers {
            let mut info = PrinterInfo::printer(&printer.name, &printer.device_uri, &printer.accepted_type);
            info.raw = printer.raw;
            info.flags.remote = printer.remote;
            info.flags.fax = printer.fax;
            registry.add_printer(info);
            if let Some(limit) = printer.page_limit {
                registry.set_page_limit(&printer.name, limit);
            }
        }
        for class in &self.classes {
            registry.add_class(&class.name, class.members.clone()).flags.implicit = class.implicit;
        }
        registry
    }

    pub fn filter_table(&self) -> FilterTable {
        FilterTable::new(self.filters.clone())
    }
}

#[cfg(test)]
mod tests {
    use spoolwerk_sched::{FilterResolver, PrinterRegistry};

    use super::*;

    const SAMPLE: &str = r#"{
        "scheduler": { "filter_limit": 200 },
        "printers": [
            { "name": "laser", "device_uri": "socket://10.0.0.5:9100", "accepted_type": "application/pdf" },
            { "name": "fax", "device_uri": "fax://0", "fax": true, "page_limit": 20 }
        ],
        "classes": [
            { "name": "office", "members": ["laser"] },
            { "name": "pool", "members": ["laser"], "implicit": true }
        ],
        "filters": [
            { "source": "text/plain", "dest": "application/pdf", "program": "texttopdf", "cost": 10 }
        ]
    }"#;

    fn write(dir: &Path, text: &str) -> std::path::PathBuf {
        let path = dir.join("spoolwerkd.json");
        std::fs::write(&path, text).expect("write config");
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = DaemonConfig::load(&dir.path().join("absent.json")).expect("load");
        assert!(config.printers.is_empty());
        assert_eq!(config.scheduler.filter_limit, 0);
    }

    #[test]
    fn builds_registry_and_filters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = DaemonConfig::load(&write(dir.path(), SAMPLE)).expect("load");
        assert_eq!(config.scheduler.filter_limit, 200);
        assert_eq!(config.scheduler.fax_retry_limit, 5);

        let registry = config.registry();
        let fax = registry.lookup("fax").expect("fax");
        assert!(fax.flags.fax);
        assert_eq!(fax.accepted_type, "application/vnd.cups-raster");
        let office = registry.lookup("office").expect("class");
        assert!(office.flags.class);
        assert_eq!(office.members, vec!["laser".to_string()]);
        assert!(!office.flags.implicit);
        let pool = registry.lookup("pool").expect("implicit class");
        assert!(pool.flags.implicit);
        assert!(pool.flags.is_pooled());

        let chain = config.filter_table().resolve("text/plain", "application/pdf").expect("chain");
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].program, "texttopdf");
    }

    #[test]
    fn rejects_unknown_class_member() {
        let dir = tempfile::tempdir().expect("tempdir");
        let text = r#"{ "classes": [ { "name": "office", "members": ["ghost"] } ] }"#;
        let err = DaemonConfig::load(&write(dir.path(), text)).expect_err("must fail");
        assert!(matches!(err, SpoolError::Config(_)));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = DaemonConfig::load(&write(dir.path(), "{ not json")).expect_err("must fail");
        assert!(matches!(err, SpoolError::Config(_)));
    }
}
