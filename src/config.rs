// Client configuration, loaded from the environment

use std::time::Duration;

use crate::error::Result;
use crate::log::Logger;
use crate::log_error;
use crate::utils::get_env_u32;

const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u32 = 10;
const DEFAULT_COMMAND_TIMEOUT_SECS: u32 = 30;
const DEFAULT_CHUNK_SIZE: u32 = 4096;

#[derive(Debug, Clone)]
pub struct RtmpClientConfig {
    pub handshake_timeout: Duration,
    pub command_timeout: Duration,
    /// Chunk size this client requests of the peer via `SetChunkSize` right after `connect`
    pub chunk_size: u32,
}

impl RtmpClientConfig {
    pub fn load_from_env(logger: &Logger) -> Result<RtmpClientConfig> {
        let handshake_timeout_secs =
            get_env_u32("RTMP_HANDSHAKE_TIMEOUT_SECS", DEFAULT_HANDSHAKE_TIMEOUT_SECS);
        let command_timeout_secs =
            get_env_u32("RTMP_COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT_SECS);
        let chunk_size = get_env_u32("RTMP_CHUNK_SIZE", DEFAULT_CHUNK_SIZE);

        if chunk_size == 0 {
            log_error!(
                logger,
                format!(
                    "RTMP_CHUNK_SIZE must be positive, falling back to {}",
                    DEFAULT_CHUNK_SIZE
                )
            );
        }

        Ok(RtmpClientConfig {
            handshake_timeout: Duration::from_secs(handshake_timeout_secs as u64),
            command_timeout: Duration::from_secs(command_timeout_secs as u64),
            chunk_size: if chunk_size == 0 {
                DEFAULT_CHUNK_SIZE
            } else {
                chunk_size
            },
        })
    }
}
