//! Collaborators a compressed session is built on.
//!
//! Everything here is owned by the surrounding audio stack: stream objects, the
//! resource manager, the mixer control plane, the compressed-audio driver and the
//! session-graph plumbing. [`crate::loopback`] provides in-memory versions.

use std::sync::Arc;
use std::time::Duration;

use compress_offload_proto::{CodecDescriptor, KeyValue};
use compress_offload_types::{
    BackendRoute, BufferInfo, CardState, DeviceAttributes, SessionTime, SpeakerRotation,
    StreamAttributes, StreamType,
};

use crate::error::{DriverError, MixerError, Result};

/// Stream the session is rendering for.
pub trait Stream: Send + Sync {
    fn attributes(&self) -> Result<StreamAttributes>;
    fn buffer_info(&self) -> Result<BufferInfo>;
    fn associated_devices(&self) -> Result<Vec<DeviceAttributes>>;
}

pub trait ResourceManager: Send + Sync {
    /// Reserve front-end device ids for a stream. Empty when none are free.
    fn allocate_front_end_ids(&self, attrs: &StreamAttributes) -> Vec<u32>;
    fn free_front_end_ids(&self, ids: &[u32], attrs: &StreamAttributes);
    fn mixer(&self) -> Result<Arc<dyn Mixer>>;
    /// Resolve `(render, capture)` backend routes for a device list.
    fn backend_names(&self, devices: &[DeviceAttributes]) -> (Vec<BackendRoute>, Vec<BackendRoute>);
    fn snd_card(&self) -> u32;
    fn card_state(&self) -> CardState;
    fn gapless_enabled(&self) -> bool;
    fn rotation(&self) -> SpeakerRotation;
    /// Device currently routed to a backend, if any.
    fn device_for_backend(&self, backend: &BackendRoute) -> Option<DeviceAttributes>;
}

pub trait Mixer: Send + Sync {
    /// Look up a control by its exact name.
    fn control(&self, name: &str) -> Option<Arc<dyn MixerControl>>;
}

pub trait MixerControl: Send + Sync {
    fn name(&self) -> &str;
    fn set_array(&self, data: &[u8]) -> std::result::Result<(), MixerError>;
    fn set_enum_by_string(&self, value: &str) -> std::result::Result<(), MixerError>;
}

/// Parameters for opening a compressed playback device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressConfig {
    pub fragment_size: usize,
    pub fragments: usize,
    pub codec: CodecDescriptor,
}

/// Encoder delay and padding (in frames) for gapless track transitions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GaplessMetadata {
    pub encoder_delay: u32,
    pub encoder_padding: u32,
}

pub trait CompressDriver: Send + Sync {
    fn open(
        &self,
        card: u32,
        device: u32,
        config: &CompressConfig,
    ) -> std::result::Result<Arc<dyn CompressHandle>, DriverError>;
}

/// An open compressed playback device.
///
/// Blocking calls (`wait`, `drain`, `partial_drain`) are only made from the
/// offload dispatcher; everything else comes from the session owner.
pub trait CompressHandle: Send + Sync {
    fn is_ready(&self) -> bool;
    fn set_nonblock(&self, nonblock: bool);
    /// Write compressed bytes, returning how many the driver accepted.
    fn write(&self, buf: &[u8]) -> std::result::Result<usize, DriverError>;
    fn start(&self) -> std::result::Result<(), DriverError>;
    fn stop(&self) -> std::result::Result<(), DriverError>;
    fn pause(&self) -> std::result::Result<(), DriverError>;
    fn resume(&self) -> std::result::Result<(), DriverError>;
    fn drain(&self) -> std::result::Result<(), DriverError>;
    fn partial_drain(&self) -> std::result::Result<(), DriverError>;
    fn next_track(&self) -> std::result::Result<(), DriverError>;
    /// Block until the driver has room for more data. `None` waits forever.
    fn wait(&self, timeout: Option<Duration>) -> std::result::Result<(), DriverError>;
    fn set_gapless_metadata(&self, meta: GaplessMetadata) -> std::result::Result<(), DriverError>;
    fn close(&self);
}

/// Front-end/back-end graph plumbing shared by all session kinds.
pub trait SessionGraph: Send + Sync {
    fn open(&self, stream: &dyn Stream, fe_ids: &[u32], backends: &[BackendRoute]) -> Result<()>;
    /// Module instance id of the module carrying `tag` on the `fe_id` -> `backend` path.
    fn module_instance_id(&self, fe_id: u32, backend: &str, tag: u32) -> Result<u32>;
    /// Send a blob of module parameter records through the front-end's parameter control.
    fn set_mixer_parameter(&self, fe_id: u32, payload: Vec<u8>) -> Result<()>;
    fn connect_device(
        &self,
        stream_type: StreamType,
        device: &DeviceAttributes,
        fe_ids: &[u32],
        backends: &[BackendRoute],
    ) -> Result<()>;
    fn disconnect_device(
        &self,
        stream_type: StreamType,
        device: &DeviceAttributes,
        fe_ids: &[u32],
        backends: &[BackendRoute],
    ) -> Result<()>;
    fn setup_device(
        &self,
        stream_type: StreamType,
        device: &DeviceAttributes,
        fe_ids: &[u32],
        backends: &[BackendRoute],
    ) -> Result<()>;
    fn timestamp(&self, fe_ids: &[u32], spr_miid: u32) -> Result<SessionTime>;
}

/// Platform rules mapping a stream and a tag to key vectors.
pub trait KeyVectorPopulator: Send + Sync {
    /// Append the tag keys for `tag`; returns the tag to send with them.
    fn populate_tag_key_vector(
        &self,
        stream: &dyn Stream,
        kvs: &mut Vec<KeyValue>,
        tag: u32,
    ) -> Result<u32>;
    fn populate_cal_key_vector(
        &self,
        stream: &dyn Stream,
        kvs: &mut Vec<KeyValue>,
        tag: u32,
    ) -> Result<()>;
}
