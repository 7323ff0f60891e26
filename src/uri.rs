// RTMP URI parsing: rtmp://host[:port]/app[/instance...]

use url::Url;

use crate::error::{Result, RtmpError};

pub const RTMP_DEFAULT_PORT: u16 = 1935;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpUri {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub app: String,
    pub instance: Option<String>,
}

impl RtmpUri {
    pub fn parse(uri: &str) -> Result<RtmpUri> {
        let url = Url::parse(uri)
            .map_err(|e| RtmpError::InvalidArgument(format!("invalid RTMP URI: {e}")))?;

        if url.scheme() != "rtmp" {
            return Err(RtmpError::InvalidArgument(format!(
                "unsupported scheme '{}', expected 'rtmp'",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| RtmpError::InvalidArgument("RTMP URI is missing a host".to_string()))?
            .to_string();
        let port = url.port().unwrap_or(RTMP_DEFAULT_PORT);

        let mut segments = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default();

        if segments.is_empty() {
            return Err(RtmpError::InvalidArgument(
                "RTMP URI is missing an application path segment".to_string(),
            ));
        }

        let app = segments.remove(0).to_string();
        let instance = if segments.is_empty() {
            None
        } else {
            Some(segments.join("/"))
        };

        Ok(RtmpUri {
            scheme: "rtmp".to_string(),
            host,
            port,
            app,
            instance,
        })
    }

    /// Reconstructs the `tcUrl` value sent in the `connect` command, per the form
    /// the server expects: `rtmp://host:port/app`.
    pub fn tc_url(&self) -> String {
        format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_app_and_default_port() {
        let uri = RtmpUri::parse("rtmp://localhost/live").unwrap();
        assert_eq!(uri.host, "localhost");
        assert_eq!(uri.port, RTMP_DEFAULT_PORT);
        assert_eq!(uri.app, "live");
        assert_eq!(uri.instance, None);
    }

    #[test]
    fn parses_explicit_port_and_instance() {
        let uri = RtmpUri::parse("rtmp://streamer.example:19350/live/mystream").unwrap();
        assert_eq!(uri.port, 19350);
        assert_eq!(uri.app, "live");
        assert_eq!(uri.instance.as_deref(), Some("mystream"));
    }

    #[test]
    fn rejects_non_rtmp_scheme() {
        let result = RtmpUri::parse("http://localhost/live");
        assert!(matches!(result, Err(RtmpError::InvalidArgument(_))));
    }

    #[test]
    fn rejects_missing_app_segment() {
        let result = RtmpUri::parse("rtmp://localhost/");
        assert!(matches!(result, Err(RtmpError::InvalidArgument(_))));
    }
}
