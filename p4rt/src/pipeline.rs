// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Forwarding pipeline configuration: the compiled P4 program for the device, its P4Info and
//! the cookie that identifies the pair.

use std::path::Path;
use tracing::debug;

use crate::error::SessionError;
use crate::proto::forwarding_pipeline_config::Cookie;
use crate::proto::get_forwarding_pipeline_config_request::ResponseType as ProtoResponseType;
use crate::proto::ForwardingPipelineConfig;

/// What a pipeline query should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    All,
    CookieOnly,
    P4InfoAndCookie,
    DeviceConfigAndCookie,
}

impl From<ResponseType> for ProtoResponseType {
    fn from(value: ResponseType) -> Self {
        match value {
            ResponseType::All => ProtoResponseType::All,
            ResponseType::CookieOnly => ProtoResponseType::CookieOnly,
            ResponseType::P4InfoAndCookie => ProtoResponseType::P4infoAndCookie,
            ResponseType::DeviceConfigAndCookie => ProtoResponseType::DeviceConfigAndCookie,
        }
    }
}

/// A forwarding pipeline. The P4Info is kept in its serialized (binary) form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FwdPipeConfig {
    pub p4info: Vec<u8>,
    pub device_config: Vec<u8>,
    pub cookie: u64,
}

impl FwdPipeConfig {
    /// Read the device binary and the binary P4Info from disk.
    pub async fn load(bin_path: &Path, p4info_path: &Path, cookie: u64) -> Result<Self, SessionError> {
        let read = |path: &Path| {
            let path = path.to_path_buf();
            async move {
                tokio::fs::read(&path)
                    .await
                    .map_err(|source| SessionError::PipelineFile { path, source })
            }
        };
        let device_config = read(bin_path).await?;
        let p4info = read(p4info_path).await?;
        debug!(
            "Loaded pipeline: {} bytes of device config, {} bytes of P4Info, cookie {cookie}",
            device_config.len(),
            p4info.len()
        );
        Ok(Self {
            p4info,
            device_config,
            cookie,
        })
    }
}

impl From<ForwardingPipelineConfig> for FwdPipeConfig {
    fn from(value: ForwardingPipelineConfig) -> Self {
        Self {
            p4info: value.p4info,
            device_config: value.p4_device_config,
            cookie: value.cookie.map_or(0, |c| c.cookie),
        }
    }
}

impl From<FwdPipeConfig> for ForwardingPipelineConfig {
    fn from(value: FwdPipeConfig) -> Self {
        Self {
            p4info: value.p4info,
            p4_device_config: value.device_config,
            cookie: Some(Cookie {
                cookie: value.cookie,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_reported_with_its_path() {
        let err = FwdPipeConfig::load(
            Path::new("/nonexistent/k8s_dp.pb.bin"),
            Path::new("/nonexistent/k8s_dp.p4info.bin"),
            1,
        )
        .await
        .unwrap_err();
        let SessionError::PipelineFile { path, .. } = err else {
            unreachable!("unexpected error {err}")
        };
        assert_eq!(path, Path::new("/nonexistent/k8s_dp.pb.bin"));
    }

    #[test]
    fn cookie_defaults_to_zero() {
        let config = FwdPipeConfig::from(ForwardingPipelineConfig::default());
        assert_eq!(config.cookie, 0);
        let back = ForwardingPipelineConfig::from(FwdPipeConfig {
            cookie: 9,
            ..Default::default()
        });
        assert_eq!(back.cookie, Some(Cookie { cookie: 9 }));
    }
}
