//! Host configuration.
//!
//! Read from TOML; every field has a default so an empty or missing file
//! is valid. Command-line flags are applied on top by the binary.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB1"
//! baud_rate = 2000000
//! timeout_ms = 3000
//!
//! [load]
//! window_size = 500
//! strict_replies = false
//! freeze_address = 0x0000200002
//!
//! [verify]
//! region_start = 0x0080000000
//! region_end = 0x1000000000
//! ```

use crate::error::{NbfError, Result};
use crate::streaming::{
    EngineConfig, MemoryRegion, ADDRESS_CSR_FREEZE, ADDRESS_MASK, DEFAULT_WINDOW_SIZE,
    DRAM_REGION_END, DRAM_REGION_START,
};
use crate::transport::SerialSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: &str = "/dev/ttyS4";
pub const DEFAULT_BAUD_RATE: u32 = 2_000_000;
/// Without a timeout an interrupt can't end a blocked read
pub const DEFAULT_TIMEOUT_MS: u64 = 3_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSection {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadSection {
    pub window_size: usize,
    pub strict_replies: bool,
    pub freeze_address: u64,
}

impl Default for LoadSection {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            strict_replies: false,
            freeze_address: ADDRESS_CSR_FREEZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifySection {
    pub region_start: u64,
    pub region_end: u64,
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            region_start: DRAM_REGION_START,
            region_end: DRAM_REGION_END,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub serial: SerialSection,
    pub load: LoadSection,
    pub verify: VerifySection,
}

impl HostConfig {
    /// `$CONFIG_DIR/nbf-host/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nbf-host").join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default path is used
    /// when present, otherwise built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| NbfError::io(path, e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            NbfError::Config(msg) => NbfError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| NbfError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(NbfError::Config("serial port must not be empty".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(NbfError::Config("baud rate must be positive".into()));
        }
        if self.serial.timeout_ms == 0 {
            return Err(NbfError::Config(
                "read timeout must be positive, or interrupts cannot end a blocked read".into(),
            ));
        }
        if self.load.freeze_address > ADDRESS_MASK {
            return Err(NbfError::Config(format!(
                "freeze address 0x{:x} does not fit in 40 bits",
                self.load.freeze_address
            )));
        }
        if self.verify.region_start >= self.verify.region_end {
            return Err(NbfError::Config(format!(
                "verify region is empty: 0x{:x}..0x{:x}",
                self.verify.region_start, self.verify.region_end
            )));
        }
        Ok(())
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            port: self.serial.port.clone(),
            baud_rate: self.serial.baud_rate,
            timeout: Duration::from_millis(self.serial.timeout_ms),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            freeze_address: self.load.freeze_address,
            verify_region: MemoryRegion::new(self.verify.region_start, self.verify.region_end),
            strict_replies: self.load.strict_replies,
        }
    }
}
