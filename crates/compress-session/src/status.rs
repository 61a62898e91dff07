use std::fmt;

use compress_offload_types::{AudioFormat, BackendRoute};
use serde::Serialize;

/// Lifecycle position of a compressed session.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Opened,
    Started,
    Paused,
    Closing,
    Closed,
}

/// Point-in-time view of a session, for logs and diagnostics.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Primary front-end id while the session is open.
    pub fe_id: Option<u32>,
    pub format: AudioFormat,
    /// Driver codec id from the current descriptor.
    pub codec_id: u32,
    pub gapless: bool,
    pub render_backends: Vec<BackendRoute>,
    /// Bytes accepted by the driver since open.
    pub bytes_written: u64,
    /// Write calls that hit a full driver buffer.
    pub short_writes: u64,
    pub dispatcher_running: bool,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fe = self
            .fe_id
            .map(|id| format!("COMPRESS{id}"))
            .unwrap_or_else(|| "-".to_string());
        let backends: Vec<&str> = self.render_backends.iter().map(|b| b.name.as_str()).collect();
        write!(
            f,
            "{fe} {:?} {:?} codec={:#x} gapless={} bytes={} short_writes={} backends=[{}]",
            self.state,
            self.format,
            self.codec_id,
            self.gapless,
            self.bytes_written,
            self.short_writes,
            backends.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_summarises_session() {
        let status = SessionStatus {
            state: SessionState::Started,
            fe_id: Some(5),
            format: AudioFormat::Mp3,
            codec_id: 2,
            gapless: true,
            render_backends: vec![BackendRoute::new(1, "SPK"), BackendRoute::new(2, "HP")],
            bytes_written: 4096,
            short_writes: 1,
            dispatcher_running: true,
        };
        assert_eq!(
            status.to_string(),
            "COMPRESS5 Started Mp3 codec=0x2 gapless=true bytes=4096 short_writes=1 backends=[SPK,HP]"
        );
    }

    #[test]
    fn display_without_front_end() {
        let status = SessionStatus {
            state: SessionState::Idle,
            fe_id: None,
            format: AudioFormat::DefaultPcm,
            codec_id: 1,
            gapless: false,
            render_backends: Vec::new(),
            bytes_written: 0,
            short_writes: 0,
            dispatcher_running: false,
        };
        assert!(status.to_string().starts_with("- Idle DefaultPcm"));
    }
}
