use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use crate::{error::ServiceError, model::DeviceSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBackend {
    Placeholder,
    TorchScript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    Http,
    /// Jobs arrive as JSON lines on stdin, results leave on stdout.
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub upload_url: String,
    pub public_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub device: DeviceSpec,
    pub accelerator_memory_bytes: u64,
    pub model_cache_dir: PathBuf,
    pub model_backend: ModelBackend,
    pub storage: Option<StorageConfig>,
    pub storage_prefix: String,
    pub cors_origins: Vec<String>,
    pub job_timeout: Duration,
    pub worker_mode: WorkerMode,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("SERVER_ADDR")
            .or_else(|| {
                let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
                let port = lookup("PORT").unwrap_or_else(|| "8000".into());
                Some(format!("{host}:{port}"))
            })
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000));

        let device = match lookup("DEVICE") {
            Some(raw) => DeviceSpec::parse(&raw),
            None if lookup("CUDA_VISIBLE_DEVICES").is_some() => DeviceSpec::Cuda(0),
            None => DeviceSpec::Cpu,
        };
        let accelerator_memory_bytes = match lookup("ACCELERATOR_MEMORY_GB") {
            None => 0,
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(gb) if gb.is_finite() && gb >= 0.0 => (gb * 1024.0 * 1024.0 * 1024.0) as u64,
                _ => {
                    return Err(ServiceError::Config(format!(
                        "ACCELERATOR_MEMORY_GB must be a non-negative number, got `{raw}`"
                    )));
                }
            },
        };

        let model_cache_dir =
            PathBuf::from(lookup("MODEL_CACHE_DIR").unwrap_or_else(|| "/tmp/models".into()));
        let model_backend = match lookup("MODEL_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("placeholder") => ModelBackend::Placeholder,
            Some("torchscript") => ModelBackend::TorchScript,
            Some(other) => {
                return Err(ServiceError::Config(format!(
                    "MODEL_BACKEND must be `placeholder` or `torchscript`, got `{other}`"
                )));
            }
        };

        let storage = lookup("STORAGE_UPLOAD_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|upload_url| StorageConfig {
                public_url: lookup("STORAGE_PUBLIC_URL").unwrap_or_else(|| upload_url.clone()),
                token: lookup("STORAGE_TOKEN"),
                upload_url,
            });
        let storage_prefix = lookup("STORAGE_PREFIX").unwrap_or_else(|| "gpu-worker".into());

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:3001".into())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let job_timeout = match lookup("JOB_TIMEOUT_SECS") {
            None => Duration::from_secs(600),
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ServiceError::Config(format!(
                        "JOB_TIMEOUT_SECS must be a positive whole number of seconds, got `{raw}`"
                    )));
                }
            },
        };

        let worker_mode = match lookup("WORKER_MODE").as_deref() {
            None | Some("http") => WorkerMode::Http,
            Some("queue") => WorkerMode::Queue,
            Some(other) => {
                return Err(ServiceError::Config(format!(
                    "WORKER_MODE must be `http` or `queue`, got `{other}`"
                )));
            }
        };
        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("compact") => LogFormat::Compact,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ServiceError::Config(format!(
                    "LOG_FORMAT must be `compact` or `json`, got `{other}`"
                )));
            }
        };

        Ok(Self {
            listen_addr,
            device,
            accelerator_memory_bytes,
            model_cache_dir,
            model_backend,
            storage,
            storage_prefix,
            cors_origins,
            job_timeout,
            worker_mode,
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ServiceError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.device, DeviceSpec::Cpu);
        assert_eq!(config.model_backend, ModelBackend::Placeholder);
        assert_eq!(config.worker_mode, WorkerMode::Http);
        assert!(config.storage.is_none());
        assert_eq!(config.cors_origins.len(), 2);
        assert_eq!(config.job_timeout, Duration::from_secs(600));
    }

    #[test]
    fn cuda_visible_devices_selects_cuda() {
        let implied = config(&[("CUDA_VISIBLE_DEVICES", "0")]).unwrap();
        assert_eq!(implied.device, DeviceSpec::Cuda(0));

        let explicit = config(&[("CUDA_VISIBLE_DEVICES", "0"), ("DEVICE", "cpu")]).unwrap();
        assert_eq!(explicit.device, DeviceSpec::Cpu);
    }

    #[test]
    fn host_and_port_compose_listen_addr() {
        let config = config(&[("HOST", "127.0.0.1"), ("PORT", "9100")]).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9100".parse().unwrap());
    }

    #[test]
    fn storage_public_url_defaults_to_upload_url() {
        let config = config(&[
            ("STORAGE_UPLOAD_URL", "https://bucket.test/up"),
            ("STORAGE_TOKEN", "secret"),
        ])
        .unwrap();
        let storage = config.storage.unwrap();
        assert_eq!(storage.public_url, "https://bucket.test/up");
        assert_eq!(storage.token.as_deref(), Some("secret"));
    }

    #[test]
    fn memory_size_is_read_in_gib() {
        let config = config(&[("ACCELERATOR_MEMORY_GB", "24")]).unwrap();
        assert_eq!(config.accelerator_memory_bytes, 24 * 1024 * 1024 * 1024);
    }

    #[test]
    fn rejects_unknown_backend_and_mode() {
        assert!(matches!(
            config(&[("MODEL_BACKEND", "onnx")]),
            Err(ServiceError::Config(_))
        ));
        assert!(matches!(
            config(&[("WORKER_MODE", "batch")]),
            Err(ServiceError::Config(_))
        ));
    }

    #[test]
    fn rejects_unusable_timeout_and_log_format() {
        for vars in [
            [("JOB_TIMEOUT_SECS", "abc")],
            [("JOB_TIMEOUT_SECS", "0")],
            [("JOB_TIMEOUT_SECS", "-5")],
            [("LOG_FORMAT", "xml")],
            [("ACCELERATOR_MEMORY_GB", "lots")],
        ] {
            assert!(
                matches!(config(&vars), Err(ServiceError::Config(_))),
                "{vars:?} should be rejected"
            );
        }

        let config = config(&[("JOB_TIMEOUT_SECS", "45"), ("LOG_FORMAT", "json")]).unwrap();
        assert_eq!(config.job_timeout, Duration::from_secs(45));
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
