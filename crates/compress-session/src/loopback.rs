//! In-memory collaborators.
//!
//! The loopback driver behaves like a ring of `fragment_size * fragments` bytes that
//! something else (a test, or the probe's renderer thread) consumes. Mixer,
//! resource manager and graph record every write so callers can inspect what a
//! session sent.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use compress_offload_proto::{KeyValue, tag};
use compress_offload_types::{
    AudioFormat, BackendRoute, BufferInfo, CardState, DeviceAttributes, DeviceConfig, DeviceId,
    Direction, MediaConfig, SessionTime, SpeakerRotation, StreamAttributes, StreamFlags,
    StreamType,
};

use crate::error::{DriverError, MixerError, Result, SessionError};
use crate::keyvector::{DISCONNECT_CONTROL, SET_CALIBRATION_CONTROL, SET_PARAM_TAG_CONTROL, control_name};
use crate::platform::{
    CompressConfig, CompressDriver, CompressHandle, GaplessMetadata, KeyVectorPopulator, Mixer,
    MixerControl, ResourceManager, SessionGraph, Stream,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Driver call log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverCall {
    Write(usize),
    Start,
    Stop,
    Pause,
    Resume,
    Drain,
    PartialDrain,
    NextTrack,
    Wait,
    GaplessMetadata(GaplessMetadata),
    Close,
}

#[derive(Default)]
struct DriverState {
    opened: Vec<(u32, u32, CompressConfig)>,
    capacity: usize,
    buffered: usize,
    total_written: u64,
    nonblock: bool,
    closed: bool,
    calls: Vec<DriverCall>,
    reset_next: bool,
    instant_drain: bool,
    not_ready: bool,
    fail_open: bool,
}

#[derive(Default)]
struct DriverShared {
    state: Mutex<DriverState>,
    cv: Condvar,
}

/// Compressed-audio driver backed by a byte counter.
#[derive(Clone, Default)]
pub struct LoopbackDriver {
    shared: Arc<DriverShared>,
}

impl LoopbackDriver {
    /// Make drains complete immediately instead of waiting for the buffer to empty.
    pub fn set_instant_drain(&self, instant: bool) {
        lock(&self.shared.state).instant_drain = instant;
    }

    /// The next blocking call (wait, drain, partial drain, next track) reports a reset.
    pub fn fail_next_with_reset(&self) {
        lock(&self.shared.state).reset_next = true;
    }

    /// Devices opened from now on report not ready.
    pub fn set_not_ready(&self, not_ready: bool) {
        lock(&self.shared.state).not_ready = not_ready;
    }

    pub fn set_fail_open(&self, fail: bool) {
        lock(&self.shared.state).fail_open = fail;
    }

    /// Pretend the DSP played `bytes` of buffered data.
    pub fn consume(&self, bytes: usize) -> usize {
        let mut state = lock(&self.shared.state);
        let n = bytes.min(state.buffered);
        state.buffered -= n;
        self.shared.cv.notify_all();
        n
    }

    pub fn buffered(&self) -> usize {
        lock(&self.shared.state).buffered
    }

    pub fn total_written(&self) -> u64 {
        lock(&self.shared.state).total_written
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    pub fn is_nonblocking(&self) -> bool {
        lock(&self.shared.state).nonblock
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.shared.state)
            .calls
            .iter()
            .copied()
            .filter(|c| !matches!(c, DriverCall::Write(_) | DriverCall::Wait))
            .collect()
    }

    pub fn all_calls(&self) -> Vec<DriverCall> {
        lock(&self.shared.state).calls.clone()
    }

    /// `(card, device, config)` of every open request.
    pub fn opened(&self) -> Vec<(u32, u32, CompressConfig)> {
        lock(&self.shared.state).opened.clone()
    }
}

impl CompressDriver for LoopbackDriver {
    fn open(
        &self,
        card: u32,
        device: u32,
        config: &CompressConfig,
    ) -> std::result::Result<Arc<dyn CompressHandle>, DriverError> {
        let mut state = lock(&self.shared.state);
        state.opened.push((card, device, *config));
        if state.fail_open {
            return Err(DriverError::failed("open", format!("no device {card}:{device}")));
        }
        state.capacity = config.fragment_size * config.fragments;
        state.buffered = 0;
        state.closed = false;
        tracing::debug!(card, device, capacity = state.capacity, "loopback compress opened");
        Ok(Arc::new(LoopbackHandle {
            shared: self.shared.clone(),
            ready: !state.not_ready,
        }))
    }
}

struct LoopbackHandle {
    shared: Arc<DriverShared>,
    ready: bool,
}

impl LoopbackHandle {
    fn record(&self, call: DriverCall) -> MutexGuard<'_, DriverState> {
        let mut state = lock(&self.shared.state);
        state.calls.push(call);
        state
    }

    fn blocking(&self, call: DriverCall) -> std::result::Result<(), DriverError> {
        let mut state = self.record(call);
        if std::mem::take(&mut state.reset_next) {
            return Err(DriverError::Reset);
        }
        Ok(())
    }

    fn drain_until_empty(&self, call: DriverCall) -> std::result::Result<(), DriverError> {
        self.blocking(call)?;
        let mut state = lock(&self.shared.state);
        if state.instant_drain {
            state.buffered = 0;
            return Ok(());
        }
        while state.buffered > 0 && !state.closed {
            state = self
                .shared
                .cv
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        Ok(())
    }
}

impl CompressHandle for LoopbackHandle {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn set_nonblock(&self, nonblock: bool) {
        lock(&self.shared.state).nonblock = nonblock;
    }

    fn write(&self, buf: &[u8]) -> std::result::Result<usize, DriverError> {
        let mut state = lock(&self.shared.state);
        if state.closed {
            return Err(DriverError::failed("write", "device closed"));
        }
        let n = buf.len().min(state.capacity - state.buffered);
        state.buffered += n;
        state.total_written += n as u64;
        state.calls.push(DriverCall::Write(n));
        Ok(n)
    }

    fn start(&self) -> std::result::Result<(), DriverError> {
        self.record(DriverCall::Start);
        Ok(())
    }

    fn stop(&self) -> std::result::Result<(), DriverError> {
        let mut state = self.record(DriverCall::Stop);
        state.buffered = 0;
        self.shared.cv.notify_all();
        Ok(())
    }

    fn pause(&self) -> std::result::Result<(), DriverError> {
        self.record(DriverCall::Pause);
        Ok(())
    }

    fn resume(&self) -> std::result::Result<(), DriverError> {
        self.record(DriverCall::Resume);
        Ok(())
    }

    fn drain(&self) -> std::result::Result<(), DriverError> {
        self.drain_until_empty(DriverCall::Drain)
    }

    fn partial_drain(&self) -> std::result::Result<(), DriverError> {
        self.drain_until_empty(DriverCall::PartialDrain)
    }

    fn next_track(&self) -> std::result::Result<(), DriverError> {
        self.blocking(DriverCall::NextTrack)
    }

    fn wait(&self, timeout: Option<Duration>) -> std::result::Result<(), DriverError> {
        self.blocking(DriverCall::Wait)?;
        let mut state = lock(&self.shared.state);
        while state.buffered >= state.capacity && !state.closed {
            state = match timeout {
                Some(t) => {
                    let (guard, res) = self
                        .shared
                        .cv
                        .wait_timeout(state, t)
                        .unwrap_or_else(|e| e.into_inner());
                    if res.timed_out() {
                        return Err(DriverError::failed("wait", "timed out"));
                    }
                    guard
                }
                None => self
                    .shared
                    .cv
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner()),
            };
        }
        Ok(())
    }

    fn set_gapless_metadata(&self, meta: GaplessMetadata) -> std::result::Result<(), DriverError> {
        self.record(DriverCall::GaplessMetadata(meta));
        Ok(())
    }

    fn close(&self) {
        let mut state = self.record(DriverCall::Close);
        state.closed = true;
        self.shared.cv.notify_all();
    }
}

/// Value written to a mixer control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MixerWrite {
    Array(Vec<u8>),
    Enum(String),
}

struct LoopbackControl {
    name: String,
    writes: Mutex<Vec<MixerWrite>>,
    reject: AtomicBool,
}

impl MixerControl for LoopbackControl {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_array(&self, data: &[u8]) -> std::result::Result<(), MixerError> {
        if self.reject.load(Ordering::Relaxed) {
            return Err(MixerError::Rejected {
                control: self.name.clone(),
                reason: "write refused".into(),
            });
        }
        lock(&self.writes).push(MixerWrite::Array(data.to_vec()));
        Ok(())
    }

    fn set_enum_by_string(&self, value: &str) -> std::result::Result<(), MixerError> {
        if self.reject.load(Ordering::Relaxed) {
            return Err(MixerError::Rejected {
                control: self.name.clone(),
                reason: format!("enum value `{value}` refused"),
            });
        }
        lock(&self.writes).push(MixerWrite::Enum(value.to_string()));
        Ok(())
    }
}

/// Mixer whose controls exist only after [`LoopbackMixer::add_control`].
#[derive(Clone, Default)]
pub struct LoopbackMixer {
    controls: Arc<Mutex<HashMap<String, Arc<LoopbackControl>>>>,
}

impl LoopbackMixer {
    pub fn add_control(&self, name: &str) {
        lock(&self.controls)
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(LoopbackControl {
                    name: name.to_string(),
                    writes: Mutex::new(Vec::new()),
                    reject: AtomicBool::new(false),
                })
            });
    }

    pub fn remove_control(&self, name: &str) {
        lock(&self.controls).remove(name);
    }

    /// Make a control refuse every write.
    pub fn reject_writes(&self, name: &str) {
        if let Some(ctl) = lock(&self.controls).get(name) {
            ctl.reject.store(true, Ordering::Relaxed);
        }
    }

    pub fn writes(&self, name: &str) -> Vec<MixerWrite> {
        lock(&self.controls)
            .get(name)
            .map(|ctl| lock(&ctl.writes).clone())
            .unwrap_or_default()
    }

    pub fn array_writes(&self, name: &str) -> Vec<Vec<u8>> {
        self.writes(name)
            .into_iter()
            .filter_map(|w| match w {
                MixerWrite::Array(data) => Some(data),
                MixerWrite::Enum(_) => None,
            })
            .collect()
    }

    pub fn enum_writes(&self, name: &str) -> Vec<String> {
        self.writes(name)
            .into_iter()
            .filter_map(|w| match w {
                MixerWrite::Enum(value) => Some(value),
                MixerWrite::Array(_) => None,
            })
            .collect()
    }
}

impl Mixer for LoopbackMixer {
    fn control(&self, name: &str) -> Option<Arc<dyn MixerControl>> {
        lock(&self.controls)
            .get(name)
            .map(|ctl| ctl.clone() as Arc<dyn MixerControl>)
    }
}

struct RmState {
    free_fe_ids: Vec<u32>,
    allocated: Vec<u32>,
    card_state: CardState,
    gapless: bool,
    rotation: SpeakerRotation,
    render: HashMap<DeviceId, BackendRoute>,
    capture: HashMap<DeviceId, BackendRoute>,
    routed: HashMap<i32, DeviceAttributes>,
}

/// Resource manager with a small front-end id pool and a fixed backend table.
pub struct LoopbackResourceManager {
    state: Mutex<RmState>,
    mixer: LoopbackMixer,
    snd_card: u32,
}

impl Default for LoopbackResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackResourceManager {
    pub fn new() -> Self {
        let render = HashMap::from([
            (
                DeviceId::OutSpeaker,
                BackendRoute::new(1, "CODEC_DMA-LPAIF_WSA-RX-0"),
            ),
            (
                DeviceId::OutWiredHeadset,
                BackendRoute::new(2, "CODEC_DMA-LPAIF_RXTX-RX-0"),
            ),
            (
                DeviceId::OutWiredHeadphone,
                BackendRoute::new(2, "CODEC_DMA-LPAIF_RXTX-RX-0"),
            ),
            (
                DeviceId::OutBluetoothA2dp,
                BackendRoute::new(3, "SLIM-DEV1-RX-0"),
            ),
            (DeviceId::OutUsbHeadset, BackendRoute::new(4, "USB_AUDIO-RX")),
            (DeviceId::OutHdmi, BackendRoute::new(5, "DISPLAY_PORT-RX")),
        ]);
        Self {
            state: Mutex::new(RmState {
                free_fe_ids: vec![5, 6, 7, 8],
                allocated: Vec::new(),
                card_state: CardState::Online,
                gapless: true,
                rotation: SpeakerRotation::LeftRight,
                render,
                capture: HashMap::new(),
                routed: HashMap::new(),
            }),
            mixer: LoopbackMixer::default(),
            snd_card: 0,
        }
    }

    pub fn loopback_mixer(&self) -> &LoopbackMixer {
        &self.mixer
    }

    pub fn set_card_state(&self, state: CardState) {
        lock(&self.state).card_state = state;
    }

    pub fn set_gapless(&self, enabled: bool) {
        lock(&self.state).gapless = enabled;
    }

    pub fn set_rotation(&self, rotation: SpeakerRotation) {
        lock(&self.state).rotation = rotation;
    }

    /// Replace the front-end id pool.
    pub fn set_free_fe_ids(&self, ids: Vec<u32>) {
        lock(&self.state).free_fe_ids = ids;
    }

    pub fn add_render_backend(&self, device: DeviceId, route: BackendRoute) {
        lock(&self.state).render.insert(device, route);
    }

    pub fn add_capture_backend(&self, device: DeviceId, route: BackendRoute) {
        lock(&self.state).capture.insert(device, route);
    }

    pub fn clear_backends(&self) {
        let mut state = lock(&self.state);
        state.render.clear();
        state.capture.clear();
    }

    pub fn allocated_fe_ids(&self) -> Vec<u32> {
        lock(&self.state).allocated.clone()
    }
}

impl ResourceManager for LoopbackResourceManager {
    fn allocate_front_end_ids(&self, _attrs: &StreamAttributes) -> Vec<u32> {
        let mut state = lock(&self.state);
        if state.free_fe_ids.is_empty() {
            return Vec::new();
        }
        let id = state.free_fe_ids.remove(0);
        state.allocated.push(id);
        for control in [SET_PARAM_TAG_CONTROL, SET_CALIBRATION_CONTROL, DISCONNECT_CONTROL] {
            self.mixer.add_control(&control_name(id, control));
        }
        vec![id]
    }

    fn free_front_end_ids(&self, ids: &[u32], _attrs: &StreamAttributes) {
        let mut state = lock(&self.state);
        for id in ids {
            if let Some(pos) = state.allocated.iter().position(|a| a == id) {
                state.allocated.remove(pos);
                state.free_fe_ids.push(*id);
            }
        }
    }

    fn mixer(&self) -> Result<Arc<dyn Mixer>> {
        Ok(Arc::new(self.mixer.clone()))
    }

    fn backend_names(&self, devices: &[DeviceAttributes]) -> (Vec<BackendRoute>, Vec<BackendRoute>) {
        let mut state = lock(&self.state);
        let mut rx = Vec::new();
        let mut tx = Vec::new();
        for device in devices {
            if let Some(route) = state.render.get(&device.id).cloned() {
                state.routed.insert(route.id, *device);
                rx.push(route);
            }
            if let Some(route) = state.capture.get(&device.id).cloned() {
                tx.push(route);
            }
        }
        (rx, tx)
    }

    fn snd_card(&self) -> u32 {
        self.snd_card
    }

    fn card_state(&self) -> CardState {
        lock(&self.state).card_state
    }

    fn gapless_enabled(&self) -> bool {
        lock(&self.state).gapless
    }

    fn rotation(&self) -> SpeakerRotation {
        lock(&self.state).rotation
    }

    fn device_for_backend(&self, backend: &BackendRoute) -> Option<DeviceAttributes> {
        lock(&self.state).routed.get(&backend.id).copied()
    }
}

/// What a [`LoopbackGraph`] was asked to do with a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphOp {
    Connect(DeviceId, Vec<BackendRoute>),
    Disconnect(DeviceId, Vec<BackendRoute>),
    Setup(DeviceId, Vec<BackendRoute>),
}

#[derive(Default)]
struct GraphState {
    opened: Vec<(Vec<u32>, Vec<BackendRoute>)>,
    miids: HashMap<(String, u32), u32>,
    missing_tags: HashSet<u32>,
    next_miid: u32,
    params: Vec<(u32, Vec<u8>)>,
    ops: Vec<GraphOp>,
    fail_open: bool,
    fail_params: bool,
    session_time: SessionTime,
}

/// Session graph that hands out module instance ids on demand.
#[derive(Clone, Default)]
pub struct LoopbackGraph {
    state: Arc<Mutex<GraphState>>,
}

impl LoopbackGraph {
    /// Module lookups for `tag` fail from now on.
    pub fn remove_tag(&self, tag: u32) {
        lock(&self.state).missing_tags.insert(tag);
    }

    pub fn set_fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn set_fail_params(&self, fail: bool) {
        lock(&self.state).fail_params = fail;
    }

    pub fn set_session_time(&self, time: SessionTime) {
        lock(&self.state).session_time = time;
    }

    /// Module instance id previously handed out for `(backend, tag)`.
    pub fn miid(&self, backend: &str, tag: u32) -> Option<u32> {
        lock(&self.state)
            .miids
            .get(&(backend.to_string(), tag))
            .copied()
    }

    /// Every `(fe_id, blob)` sent through `set_mixer_parameter`.
    pub fn params(&self) -> Vec<(u32, Vec<u8>)> {
        lock(&self.state).params.clone()
    }

    pub fn ops(&self) -> Vec<GraphOp> {
        lock(&self.state).ops.clone()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opened.len()
    }
}

impl SessionGraph for LoopbackGraph {
    fn open(&self, _stream: &dyn Stream, fe_ids: &[u32], backends: &[BackendRoute]) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_open {
            return Err(SessionError::Graph("graph open refused".into()));
        }
        state.opened.push((fe_ids.to_vec(), backends.to_vec()));
        Ok(())
    }

    fn module_instance_id(&self, _fe_id: u32, backend: &str, tag: u32) -> Result<u32> {
        let mut state = lock(&self.state);
        if state.missing_tags.contains(&tag) {
            return Err(SessionError::Graph(format!(
                "no module with tag {tag:#x} on {backend}"
            )));
        }
        let key = (backend.to_string(), tag);
        if let Some(miid) = state.miids.get(&key) {
            return Ok(*miid);
        }
        state.next_miid += 1;
        let miid = 0x4000 + state.next_miid;
        state.miids.insert(key, miid);
        Ok(miid)
    }

    fn set_mixer_parameter(&self, fe_id: u32, payload: Vec<u8>) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_params {
            return Err(SessionError::Graph("parameter write refused".into()));
        }
        state.params.push((fe_id, payload));
        Ok(())
    }

    fn connect_device(
        &self,
        _stream_type: StreamType,
        device: &DeviceAttributes,
        _fe_ids: &[u32],
        backends: &[BackendRoute],
    ) -> Result<()> {
        lock(&self.state)
            .ops
            .push(GraphOp::Connect(device.id, backends.to_vec()));
        Ok(())
    }

    fn disconnect_device(
        &self,
        _stream_type: StreamType,
        device: &DeviceAttributes,
        _fe_ids: &[u32],
        backends: &[BackendRoute],
    ) -> Result<()> {
        lock(&self.state)
            .ops
            .push(GraphOp::Disconnect(device.id, backends.to_vec()));
        Ok(())
    }

    fn setup_device(
        &self,
        _stream_type: StreamType,
        device: &DeviceAttributes,
        _fe_ids: &[u32],
        backends: &[BackendRoute],
    ) -> Result<()> {
        lock(&self.state)
            .ops
            .push(GraphOp::Setup(device.id, backends.to_vec()));
        Ok(())
    }

    fn timestamp(&self, _fe_ids: &[u32], _spr_miid: u32) -> Result<SessionTime> {
        Ok(lock(&self.state).session_time)
    }
}

/// Stream with fixed attributes.
#[derive(Clone, Debug)]
pub struct LoopbackStream {
    pub attributes: StreamAttributes,
    pub buffer: BufferInfo,
    pub devices: Vec<DeviceAttributes>,
}

impl LoopbackStream {
    /// Non-blocking MP3 offload to a stereo speaker.
    pub fn mp3_stereo() -> Self {
        Self::new(AudioFormat::Mp3, 44_100, 2)
    }

    pub fn new(format: AudioFormat, sample_rate: u32, channels: u32) -> Self {
        Self {
            attributes: StreamAttributes {
                stream_type: StreamType::CompressedOffload,
                direction: Direction::Output,
                flags: StreamFlags(StreamFlags::NON_BLOCKING),
                out_media_config: MediaConfig {
                    format,
                    sample_rate,
                    bit_width: 16,
                    channels,
                },
            },
            buffer: BufferInfo {
                in_buf_size: 0,
                in_buf_count: 0,
                out_buf_size: 4096,
                out_buf_count: 4,
            },
            devices: vec![speaker(2)],
        }
    }

    pub fn with_buffer(mut self, size: usize, count: usize) -> Self {
        self.buffer.out_buf_size = size;
        self.buffer.out_buf_count = count;
        self
    }

    pub fn with_devices(mut self, devices: Vec<DeviceAttributes>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.attributes.flags = StreamFlags(flags);
        self
    }
}

/// Speaker at 48 kHz, 16 bit.
pub fn speaker(channels: u32) -> DeviceAttributes {
    device(DeviceId::OutSpeaker, channels)
}

pub fn device(id: DeviceId, channels: u32) -> DeviceAttributes {
    DeviceAttributes {
        id,
        config: DeviceConfig {
            sample_rate: 48_000,
            bit_width: 16,
            channels,
        },
    }
}

impl Stream for LoopbackStream {
    fn attributes(&self) -> Result<StreamAttributes> {
        Ok(self.attributes)
    }

    fn buffer_info(&self) -> Result<BufferInfo> {
        Ok(self.buffer)
    }

    fn associated_devices(&self) -> Result<Vec<DeviceAttributes>> {
        Ok(self.devices.clone())
    }
}

/// Key vector rules from a lookup table.
#[derive(Default)]
pub struct LoopbackPopulator {
    tags: Mutex<HashMap<u32, Vec<KeyValue>>>,
    calibrations: Mutex<HashMap<u32, Vec<KeyValue>>>,
}

impl LoopbackPopulator {
    /// Table with a stream volume calibration entry.
    pub fn with_defaults() -> Self {
        let populator = Self::default();
        populator.add_calibration(tag::STREAM_VOLUME, vec![KeyValue::new(0xA100_0000, 0)]);
        populator
    }

    pub fn add_tag(&self, tag: u32, kvs: Vec<KeyValue>) {
        lock(&self.tags).insert(tag, kvs);
    }

    pub fn add_calibration(&self, tag: u32, kvs: Vec<KeyValue>) {
        lock(&self.calibrations).insert(tag, kvs);
    }
}

impl KeyVectorPopulator for LoopbackPopulator {
    fn populate_tag_key_vector(
        &self,
        _stream: &dyn Stream,
        kvs: &mut Vec<KeyValue>,
        tag: u32,
    ) -> Result<u32> {
        if let Some(entries) = lock(&self.tags).get(&tag) {
            kvs.extend_from_slice(entries);
        }
        Ok(tag)
    }

    fn populate_cal_key_vector(
        &self,
        _stream: &dyn Stream,
        kvs: &mut Vec<KeyValue>,
        tag: u32,
    ) -> Result<()> {
        if let Some(entries) = lock(&self.calibrations).get(&tag) {
            kvs.extend_from_slice(entries);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compress_offload_proto::{CodecDescriptor, CodecOptions};

    fn config(fragment_size: usize, fragments: usize) -> CompressConfig {
        CompressConfig {
            fragment_size,
            fragments,
            codec: CodecDescriptor {
                id: 2,
                ch_in: 2,
                ch_out: 2,
                sample_rate: 44_100,
                bit_rate: 16,
                format: 0,
                options: CodecOptions::None,
            },
        }
    }

    #[test]
    fn driver_accepts_up_to_capacity() {
        let driver = LoopbackDriver::default();
        let handle = driver.open(0, 5, &config(4, 2)).unwrap();
        assert_eq!(handle.write(&[0; 6]).unwrap(), 6);
        assert_eq!(handle.write(&[0; 6]).unwrap(), 2);
        assert_eq!(driver.consume(3), 3);
        assert_eq!(handle.write(&[0; 6]).unwrap(), 3);
        assert_eq!(driver.total_written(), 11);
    }

    #[test]
    fn wait_returns_once_space_frees_up() {
        let driver = LoopbackDriver::default();
        let handle = driver.open(0, 5, &config(4, 1)).unwrap();
        handle.write(&[0; 4]).unwrap();
        let consumer = driver.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            consumer.consume(4);
        });
        handle.wait(None).unwrap();
        t.join().unwrap();
        assert_eq!(driver.buffered(), 0);
    }

    #[test]
    fn wait_times_out_when_full() {
        let driver = LoopbackDriver::default();
        let handle = driver.open(0, 5, &config(4, 1)).unwrap();
        handle.write(&[0; 4]).unwrap();
        assert!(handle.wait(Some(Duration::from_millis(10))).is_err());
    }

    #[test]
    fn close_wakes_a_blocked_drain() {
        let driver = LoopbackDriver::default();
        let handle = driver.open(0, 5, &config(4, 1)).unwrap();
        handle.write(&[0; 4]).unwrap();
        let closer = handle.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        handle.drain().unwrap();
        t.join().unwrap();
        assert!(driver.is_closed());
    }

    #[test]
    fn front_end_ids_come_with_controls() {
        let rm = LoopbackResourceManager::new();
        let attrs = LoopbackStream::mp3_stereo().attributes;
        let ids = rm.allocate_front_end_ids(&attrs);
        assert_eq!(ids, vec![5]);
        assert!(rm.loopback_mixer().control("COMPRESS5 disconnect").is_some());
        rm.free_front_end_ids(&ids, &attrs);
        assert!(rm.allocated_fe_ids().is_empty());
    }

    #[test]
    fn graph_miids_are_stable_per_backend_and_tag() {
        let graph = LoopbackGraph::default();
        let a = graph.module_instance_id(5, "BE", tag::STREAM_SPR).unwrap();
        let b = graph.module_instance_id(5, "BE", tag::STREAM_SPR).unwrap();
        let c = graph.module_instance_id(5, "BE", tag::MODULE_GAPLESS).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        graph.remove_tag(tag::MODULE_GAPLESS);
        assert!(graph.module_instance_id(5, "BE", tag::MODULE_GAPLESS).is_err());
    }
}
