use std::net::SocketAddr;

/// Runtime configuration of the runner service.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Address the HTTP API listens on.
    pub listen_addr: SocketAddr,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Allow any origin, method and header (browser front-ends on other ports).
    pub cors_permissive: bool,
    /// Wall-clock seconds per simulated second for the built-in nodes.
    pub time_scale: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8001)),
            log_filter: "info".to_string(),
            cors_permissive: true,
            time_scale: 1.0,
        }
    }
}

impl RunnerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn with_cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale;
        self
    }
}
