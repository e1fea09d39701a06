use std::collections::BTreeMap;
use std::env;

use crate::errors::{RtviError, RtviResult};

/// Values read from `RTVI_*` environment variables.
///
/// | Variable | Meaning |
/// |---|---|
/// | `RTVI_BASE_URL` | handshake endpoint |
/// | `RTVI_SERVICES` | `role=backend` pairs separated by commas |
/// | `RTVI_TIMEOUT_MS` | handshake deadline |
/// | `RTVI_REQUEST_TIMEOUT_MS` | pending request horizon |
/// | `RTVI_SWEEP_INTERVAL_MS` | pending request sweep period |
/// | `RTVI_ENABLE_MIC` / `RTVI_ENABLE_CAM` | local media defaults |
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub base_url: Option<String>,
    pub services: Option<BTreeMap<String, String>>,
    pub timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
    pub enable_mic: Option<bool>,
    pub enable_cam: Option<bool>,
}

impl EnvConfig {
    pub fn load() -> RtviResult<Self> {
        Ok(Self {
            base_url: read("RTVI_BASE_URL"),
            services: read("RTVI_SERVICES")
                .map(|v| parse_services(&v))
                .transpose()?,
            timeout_ms: read_u64("RTVI_TIMEOUT_MS")?,
            request_timeout_ms: read_u64("RTVI_REQUEST_TIMEOUT_MS")?,
            sweep_interval_ms: read_u64("RTVI_SWEEP_INTERVAL_MS")?,
            enable_mic: read_bool("RTVI_ENABLE_MIC")?,
            enable_cam: read_bool("RTVI_ENABLE_CAM")?,
        })
    }
}

fn read(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_u64(key: &str) -> RtviResult<Option<u64>> {
    read(key)
        .map(|v| {
            v.trim().parse::<u64>().map_err(|e| {
                RtviError::InvalidConfiguration(format!("{key} must be an integer: {e}"))
            })
        })
        .transpose()
}

fn read_bool(key: &str) -> RtviResult<Option<bool>> {
    read(key)
        .map(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(RtviError::InvalidConfiguration(format!(
                "{key} must be a boolean, got '{other}'"
            ))),
        })
        .transpose()
}

/// Parse `role=backend,role=backend`.
pub(crate) fn parse_services(value: &str) -> RtviResult<BTreeMap<String, String>> {
    let mut services = BTreeMap::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (role, backend) = pair.split_once('=').ok_or_else(|| {
            RtviError::InvalidConfiguration(format!(
                "RTVI_SERVICES entry '{pair}' must look like role=backend"
            ))
        })?;
        services.insert(role.trim().to_string(), backend.trim().to_string());
    }
    Ok(services)
}
