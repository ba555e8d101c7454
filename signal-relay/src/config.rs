//! Validated runtime configuration assembled from the command line and environment.

use std::{net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::relay::RelaySettings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{name} must start with '/', got '{value}'")]
    InvalidPath { name: &'static str, value: String },
    #[error("message type strings must be non-empty and distinct")]
    InvalidVocabulary,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub shutdown_timeout: Duration,
    pub websocket_path: String,
    pub max_message_size: usize,
    pub ping_interval: Duration,
    pub liveness_path: String,
    pub readiness_path: String,
    pub relay: RelaySettings,
}

impl ServerSettings {
    pub fn validate(self) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("queue capacity", self.relay.queue_capacity),
            ("hub capacity", self.relay.hub_capacity),
            ("max message size", self.max_message_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::Zero("ping interval"));
        }

        for (name, value) in [
            ("websocket path", &self.websocket_path),
            ("liveness path", &self.liveness_path),
            ("readiness path", &self.readiness_path),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::InvalidPath {
                    name,
                    value: value.clone(),
                });
            }
        }

        let vocabulary = &self.relay.vocabulary;
        let mut labels = vec![
            &vocabulary.broadcast,
            &vocabulary.join,
            &vocabulary.leave,
            &vocabulary.offer,
            &vocabulary.answer,
            &vocabulary.ice_candidate,
            &vocabulary.list,
            &vocabulary.me,
        ];
        let total = labels.len();
        labels.sort();
        labels.dedup();
        if labels.len() != total || labels.iter().any(|label| label.is_empty()) {
            return Err(ConfigError::InvalidVocabulary);
        }

        Ok(self)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            shutdown_timeout: Duration::from_secs(30),
            websocket_path: "/ws".into(),
            max_message_size: 1024 * 1024,
            ping_interval: Duration::from_secs(30),
            liveness_path: "/health/live".into(),
            readiness_path: "/health/ready".into(),
            relay: RelaySettings::default(),
        }
    }
}
