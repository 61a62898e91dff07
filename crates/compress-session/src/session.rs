//! Compressed offload session controller.
//!
//! A session owns one front-end path from `open` to `close`: it opens the
//! compressed device with the stream's codec descriptor, pushes per-device and
//! gapless parameters onto the mixer control plane, forwards compressed writes,
//! and relays driver readiness through the offload dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use compress_offload_proto::{CodecDescriptor, KeyValue, encode_custom_param, tag};
use compress_offload_types::{
    AudioFormat, BackendRoute, CardState, DeviceAttributes, DeviceId, Direction, DrainType,
    OffloadEvent, SessionTime, SpeakerRotation, StreamAttributes, StreamType,
};

use crate::codec::{self, DecoderParams};
use crate::config::SessionConfig;
use crate::dispatcher::{CallbackSlot, DispatchContext, Dispatcher, EventCallback, HandleSlot, OffloadMsg};
use crate::error::{Result, SessionError};
use crate::keyvector::{ConfigType, DISCONNECT_CONTROL, EffectPayload, KeyVectorSink, control_name};
use crate::payload::{self, CustomPayload, TwsCodec};
use crate::platform::{
    CompressConfig, CompressDriver, CompressHandle, GaplessMetadata, KeyVectorPopulator, Mixer,
    MixerControl, ResourceManager, SessionGraph, Stream,
};
use crate::status::{SessionState, SessionStatus};

/// Collaborators a session is wired to.
#[derive(Clone)]
pub struct SessionDeps {
    pub rm: Arc<dyn ResourceManager>,
    pub driver: Arc<dyn CompressDriver>,
    pub graph: Arc<dyn SessionGraph>,
    pub populator: Arc<dyn KeyVectorPopulator>,
}

/// Runtime parameters accepted by [`CompressSession::set_parameters`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionParam {
    /// Re-send MFC configs for stereo speakers with a new orientation.
    DeviceRotation(SpeakerRotation),
    /// Opaque effect parameter for the module tagged `tag` on the first render backend.
    UiEffect { tag: u32, param_id: u32, data: Vec<u8> },
    TwsConfig { tag: u32, mono: bool, codec: TwsCodec },
    CodecConfiguration(DecoderParams),
    GaplessMetadata(GaplessMetadata),
    /// Parameter id this session has no handler for.
    Unknown(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Opened,
    Closing,
    Closed,
}

pub struct CompressSession {
    deps: SessionDeps,
    config: SessionConfig,
    lifecycle: Lifecycle,
    attrs: Option<StreamAttributes>,
    fe_ids: Vec<u32>,
    rx_backends: Vec<BackendRoute>,
    tx_backends: Vec<BackendRoute>,
    mixer: Option<Arc<dyn Mixer>>,
    codec: CodecDescriptor,
    format: AudioFormat,
    gapless: bool,
    io_mode: u32,
    spr_miid: Option<u32>,
    payload: CustomPayload,
    tkv: Vec<KeyValue>,
    ckv: Vec<KeyValue>,
    handle: HandleSlot,
    started: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    callback: CallbackSlot,
    dispatcher: Option<Dispatcher>,
    bytes_written: u64,
    short_writes: u64,
}

impl CompressSession {
    pub fn new(deps: SessionDeps, config: SessionConfig) -> Self {
        let codec = codec::default_descriptor(&config.codec_defaults);
        Self {
            deps,
            config,
            lifecycle: Lifecycle::Idle,
            attrs: None,
            fe_ids: Vec::new(),
            rx_backends: Vec::new(),
            tx_backends: Vec::new(),
            mixer: None,
            codec,
            format: AudioFormat::DefaultPcm,
            gapless: false,
            io_mode: 0,
            spr_miid: None,
            payload: CustomPayload::default(),
            tkv: Vec::new(),
            ckv: Vec::new(),
            handle: Arc::new(RwLock::new(None)),
            started: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            callback: CallbackSlot::default(),
            dispatcher: None,
            bytes_written: 0,
            short_writes: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.lifecycle {
            Lifecycle::Idle => SessionState::Idle,
            Lifecycle::Closing => SessionState::Closing,
            Lifecycle::Closed => SessionState::Closed,
            Lifecycle::Opened if self.paused.load(Ordering::Acquire) => SessionState::Paused,
            Lifecycle::Opened if self.started.load(Ordering::Acquire) => SessionState::Started,
            Lifecycle::Opened => SessionState::Opened,
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            fe_id: self.fe_ids.first().copied(),
            format: self.format,
            codec_id: self.codec.id,
            gapless: self.gapless,
            render_backends: self.rx_backends.clone(),
            bytes_written: self.bytes_written,
            short_writes: self.short_writes,
            dispatcher_running: self.dispatcher.is_some(),
        }
    }

    /// Codec descriptor the device is (or will be) opened with.
    pub fn codec(&self) -> &CodecDescriptor {
        &self.codec
    }

    pub fn is_gapless(&self) -> bool {
        self.gapless
    }

    pub fn render_backends(&self) -> &[BackendRoute] {
        &self.rx_backends
    }

    pub fn capture_backends(&self) -> &[BackendRoute] {
        &self.tx_backends
    }

    fn fe_id(&self) -> Result<u32> {
        self.fe_ids
            .first()
            .copied()
            .ok_or_else(|| SessionError::invalid("session has no front-end"))
    }

    fn mixer(&self) -> Result<&dyn Mixer> {
        self.mixer
            .as_deref()
            .ok_or_else(|| SessionError::invalid("session has no mixer"))
    }

    fn compress(&self) -> Option<Arc<dyn CompressHandle>> {
        self.handle
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn card_online(&self) -> bool {
        self.deps.rm.card_state() == CardState::Online
    }

    fn post(&self, msg: OffloadMsg) {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.post(msg),
            None => tracing::warn!(?msg, "offload dispatcher not running"),
        }
    }

    fn release_fe_ids(&mut self) {
        if self.fe_ids.is_empty() {
            return;
        }
        match &self.attrs {
            Some(attrs) => self.deps.rm.free_front_end_ids(&self.fe_ids, attrs),
            None => tracing::warn!(fe_ids = ?self.fe_ids, "front-end ids without stream attributes"),
        }
        tracing::debug!(fe_ids = ?self.fe_ids, "front-end ids released");
        self.fe_ids.clear();
    }

    /// Reserve a front-end, resolve backends and open the session graph.
    pub fn open(&mut self, stream: &dyn Stream) -> Result<()> {
        if !matches!(self.lifecycle, Lifecycle::Idle | Lifecycle::Closed) {
            tracing::error!(fe_ids = ?self.fe_ids, "session already open");
            return Err(SessionError::invalid("session already open"));
        }
        let attrs = stream.attributes()?;
        let io_mode = attrs.flags.io_mode();
        if io_mode == 0 {
            tracing::error!(flags = attrs.flags.0, "blocking io mode not supported");
            return Err(SessionError::invalid(format!(
                "io mode {io_mode:#x} not supported"
            )));
        }
        let devices = stream.associated_devices()?;

        let ids = self.deps.rm.allocate_front_end_ids(&attrs);
        if ids.is_empty() {
            tracing::error!("no front-end available");
            return Err(SessionError::invalid("no front-end available"));
        }
        self.io_mode = io_mode;
        self.attrs = Some(attrs);
        self.fe_ids = ids;
        tracing::debug!(fe_ids = ?self.fe_ids, "front-end ids allocated");

        if let Err(err) = self.open_graph(stream, &devices) {
            tracing::error!(error = %err, "session open failed");
            self.release_fe_ids();
            self.mixer = None;
            return Err(err);
        }

        self.format = attrs.out_media_config.format;
        self.gapless = codec::is_gapless_format(
            self.config.gapless_supported && self.deps.rm.gapless_enabled(),
            self.format,
        );
        self.lifecycle = Lifecycle::Opened;
        tracing::info!(
            fe_id = self.fe_ids[0],
            format = ?self.format,
            gapless = self.gapless,
            backends = self.rx_backends.len(),
            "compress session opened"
        );
        Ok(())
    }

    fn open_graph(&mut self, stream: &dyn Stream, devices: &[DeviceAttributes]) -> Result<()> {
        let (rx, _) = self.deps.rm.backend_names(devices);
        self.rx_backends = rx;
        self.mixer = Some(self.deps.rm.mixer()?);
        self.deps.graph.open(stream, &self.fe_ids, &self.rx_backends)
    }

    pub fn prepare(&mut self, _stream: &dyn Stream) -> Result<()> {
        Ok(())
    }

    /// Spawn the dispatcher, open the compressed device and configure the graph.
    pub fn start(&mut self, stream: &dyn Stream) -> Result<()> {
        let fe_id = self.fe_id()?;
        if self.compress().is_some() {
            tracing::error!(fe_id, "compress device already open");
            return Err(SessionError::invalid("session already started"));
        }
        if !self.card_online() {
            tracing::error!(fe_id, "sound card offline");
            return Err(SessionError::DeviceState(format!(
                "card {} offline",
                self.deps.rm.snd_card()
            )));
        }
        if self.dispatcher.is_none() {
            self.dispatcher = Some(Dispatcher::spawn(DispatchContext {
                started: self.started.clone(),
                gapless: self.gapless,
                handle: self.handle.clone(),
                rm: self.deps.rm.clone(),
                callback: self.callback.clone(),
            })?);
        }

        let attrs = stream.attributes()?;
        codec::fill_from_media_config(&mut self.codec, &attrs.out_media_config);
        let buffers = stream.buffer_info()?;
        let config = CompressConfig {
            fragment_size: buffers.out_buf_size,
            fragments: buffers.out_buf_count,
            codec: self.codec,
        };
        let handle = self
            .deps
            .driver
            .open(self.deps.rm.snd_card(), fe_id, &config)
            .inspect_err(|err| tracing::error!(error = %err, "compress open failed"))?;
        if !handle.is_ready() {
            tracing::error!(fe_id, "compress device not ready");
            handle.close();
            return Err(SessionError::invalid("compress device not ready"));
        }
        handle.set_nonblock(self.io_mode != 0);
        *self.handle.write().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        tracing::info!(
            fe_id,
            codec_id = self.codec.id,
            fragment_size = config.fragment_size,
            fragments = config.fragments,
            "compress device opened"
        );

        if attrs.direction == Direction::Output {
            self.configure_output(stream, fe_id)?;
        }

        if let Err(err) = self.set_config(stream, ConfigType::Calibration, tag::STREAM_VOLUME) {
            tracing::warn!(error = %err, "stream volume calibration not applied");
        }
        Ok(())
    }

    fn configure_output(&mut self, stream: &dyn Stream, fe_id: u32) -> Result<()> {
        let devices = stream.associated_devices()?;
        let (rx, tx) = self.deps.rm.backend_names(&devices);
        self.rx_backends = rx;
        self.tx_backends = tx;
        let Some(first) = self.rx_backends.first() else {
            tracing::error!("no backend for this stream");
            return Err(SessionError::invalid("no render backend for stream"));
        };
        let first = first.name.clone();
        self.spr_miid = Some(
            self.deps
                .graph
                .module_instance_id(fe_id, &first, tag::STREAM_SPR)?,
        );

        self.apply_custom_format(fe_id, &first)?;

        let built = self.build_device_payload(fe_id, &devices, &first);
        let blob = self.payload.take();
        built?;
        if blob.is_empty() {
            return Ok(());
        }
        tracing::debug!(fe_id, bytes = blob.len(), "sending device payload");
        self.deps
            .graph
            .set_mixer_parameter(fe_id, blob)
            .inspect_err(|err| tracing::error!(error = %err, "device payload rejected"))
    }

    fn apply_custom_format(&self, fe_id: u32, backend: &str) -> Result<()> {
        if self.format != AudioFormat::Vorbis {
            return Ok(());
        }
        let miid =
            self.deps
                .graph
                .module_instance_id(fe_id, backend, tag::STREAM_INPUT_MEDIA_FORMAT)?;
        let blob = payload::vorbis_media_format(miid, self.codec.format)?;
        self.deps.graph.set_mixer_parameter(fe_id, blob)
    }

    fn build_device_payload(
        &mut self,
        fe_id: u32,
        devices: &[DeviceAttributes],
        first_backend: &str,
    ) -> Result<()> {
        let platform_rotation = self.deps.rm.rotation();
        for (device, backend) in devices.iter().zip(&self.rx_backends) {
            let miid = self
                .deps
                .graph
                .module_instance_id(fe_id, &backend.name, tag::DEVICE_MFC_SR)?;
            let rotation = payload::rotation_for(device, platform_rotation);
            tracing::debug!(miid, backend = %backend.name, device = ?device.id, ?rotation, "mfc config");
            let record = payload::mfc_config(miid, device, rotation)?;
            self.payload.append(&record)?;
        }
        if self.gapless {
            let miid = self
                .deps
                .graph
                .module_instance_id(fe_id, first_backend, tag::MODULE_GAPLESS)?;
            let record = payload::early_eos_delay(miid, self.config.early_eos_delay_ms)?;
            self.payload.append(&record)?;
        }
        Ok(())
    }

    /// Write compressed bytes; returns how many the driver took.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(SessionError::invalid("empty write buffer"));
        }
        let handle = self
            .compress()
            .ok_or_else(|| SessionError::invalid("write without an open compress device"))?;

        let written = handle.write(buf)?;
        tracing::trace!(requested = buf.len(), written, "compress write");
        self.bytes_written += written as u64;

        if written < buf.len() && self.io_mode != 0 {
            tracing::debug!("driver buffer full, waiting for space");
            self.short_writes += 1;
            self.post(OffloadMsg::WaitForBuffer);
        }

        if !self.started.load(Ordering::Acquire) && written > 0 {
            handle
                .start()
                .inspect_err(|err| tracing::error!(error = %err, "compress start failed"))?;
            self.started.store(true, Ordering::Release);
            tracing::info!("compress playback started");
        }
        Ok(written)
    }

    /// Compressed capture is not handled here.
    pub fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    pub fn pause(&mut self) -> Result<()> {
        if let Some(handle) = self.compress() {
            if self.started.load(Ordering::Acquire) {
                handle.pause()?;
                self.paused.store(true, Ordering::Release);
            }
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if let Some(handle) = self.compress() {
            if self.paused.load(Ordering::Acquire) {
                handle.resume()?;
                self.paused.store(false, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Stop the driver. Playback stays marked as started.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(handle) = self.compress() {
            if self.started.load(Ordering::Acquire) {
                handle.stop()?;
            }
        }
        Ok(())
    }

    /// Stop the driver and drop buffered data; the next write restarts playback
    /// unpaused.
    pub fn flush(&mut self) -> Result<()> {
        let handle = self
            .compress()
            .ok_or_else(|| SessionError::invalid("flush without an open compress device"))?;
        if self.started.load(Ordering::Acquire) {
            handle.stop()?;
            self.started.store(false, Ordering::Release);
            self.paused.store(false, Ordering::Release);
        }
        tracing::debug!(started = self.started.load(Ordering::Acquire), "flushed");
        Ok(())
    }

    /// Queue a drain; completion arrives as a callback event.
    pub fn drain(&mut self, kind: DrainType) -> Result<()> {
        if self.compress().is_none() {
            return Err(SessionError::invalid("drain without an open compress device"));
        }
        tracing::debug!(?kind, "drain requested");
        self.post(match kind {
            DrainType::Full => OffloadMsg::Drain,
            DrainType::Partial => OffloadMsg::PartialDrain,
        });
        Ok(())
    }

    /// [`Self::drain`] for a raw drain type value.
    pub fn drain_raw(&mut self, raw: u32) -> Result<()> {
        if self.compress().is_none() {
            return Err(SessionError::invalid("drain without an open compress device"));
        }
        let kind = DrainType::from_raw(raw).ok_or_else(|| {
            tracing::error!(raw, "invalid drain type");
            SessionError::invalid(format!("invalid drain type {raw}"))
        })?;
        self.drain(kind)
    }

    /// Tear the session down. Always releases the front-end and stops the
    /// dispatcher; errors are reported after cleanup.
    pub fn close(&mut self, stream: &dyn Stream) -> Result<()> {
        if let Ok(attrs) = stream.attributes() {
            self.attrs = Some(attrs);
        }
        self.lifecycle = Lifecycle::Closing;
        let handle = self
            .handle
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let Some(handle) = handle else {
            if let Some(dispatcher) = self.dispatcher.take() {
                dispatcher.shutdown();
            }
            self.release_fe_ids();
            if !self.card_online() {
                self.callback.notify(OffloadEvent::Error);
            }
            self.finish_close();
            return Err(SessionError::invalid("close without an open compress device"));
        };

        let disconnected = self.disconnect_front_end();
        handle.close();
        tracing::debug!("compress device closed");
        self.release_fe_ids();
        self.payload.clear();

        if let Some(dispatcher) = self.dispatcher.take() {
            if !self.card_online() {
                dispatcher.post(OffloadMsg::Error);
            }
            dispatcher.shutdown();
        }
        self.finish_close();
        tracing::info!("compress session closed");
        disconnected
    }

    fn finish_close(&mut self) {
        self.started.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.spr_miid = None;
        self.mixer = None;
        self.lifecycle = Lifecycle::Closed;
    }

    fn disconnect_front_end(&self) -> Result<()> {
        let fe_id = self.fe_id()?;
        let name = control_name(fe_id, DISCONNECT_CONTROL);
        let ctl = self.mixer()?.control(&name).ok_or_else(|| {
            tracing::error!(control = %name, "mixer control missing");
            SessionError::invalid(format!("invalid mixer control {name}"))
        })?;
        match self.rx_backends.first() {
            Some(backend) => {
                if let Err(err) = ctl.set_enum_by_string(&backend.name) {
                    tracing::warn!(error = %err, backend = %backend.name, "disconnect failed");
                }
            }
            None => tracing::warn!("no render backend to disconnect"),
        }
        Ok(())
    }

    pub fn register_callback(&mut self, callback: EventCallback, cookie: u64) {
        self.callback.register(callback, cookie);
    }

    /// Send a client key vector (module config only).
    pub fn set_tkv(&mut self, kind: ConfigType, effect: &EffectPayload) -> Result<()> {
        let fe_id = self.fe_id()?;
        let mixer = self
            .mixer
            .as_deref()
            .ok_or_else(|| SessionError::invalid("session has no mixer"))?;
        let sink = KeyVectorSink {
            mixer,
            populator: self.deps.populator.as_ref(),
            fe_id,
        };
        sink.set_tkv(&mut self.tkv, kind, effect)
    }

    /// Send one key vector built from up to three tags.
    pub fn set_config_tags(
        &mut self,
        stream: &dyn Stream,
        kind: ConfigType,
        tag1: u32,
        tag2: u32,
        tag3: u32,
    ) -> Result<()> {
        let fe_id = self.fe_id()?;
        let mixer = self
            .mixer
            .as_deref()
            .ok_or_else(|| SessionError::invalid("session has no mixer"))?;
        let sink = KeyVectorSink {
            mixer,
            populator: self.deps.populator.as_ref(),
            fe_id,
        };
        sink.set_config_tags(stream, &mut self.tkv, kind, [tag1, tag2, tag3])
    }

    pub fn set_config(&mut self, stream: &dyn Stream, kind: ConfigType, tag: u32) -> Result<()> {
        let fe_id = self.fe_id()?;
        let mixer = self
            .mixer
            .as_deref()
            .ok_or_else(|| SessionError::invalid("session has no mixer"))?;
        let sink = KeyVectorSink {
            mixer,
            populator: self.deps.populator.as_ref(),
            fe_id,
        };
        sink.set_config(stream, &mut self.tkv, &mut self.ckv, kind, tag)
    }

    pub fn set_parameters(&mut self, param: SessionParam) -> Result<()> {
        match param {
            SessionParam::DeviceRotation(rotation) => self.apply_rotation(rotation),
            SessionParam::UiEffect {
                tag,
                param_id,
                data,
            } => {
                let fe_id = self.fe_id()?;
                let miid = self.first_backend_miid(fe_id, tag)?;
                let blob = encode_custom_param(miid, param_id, &data)?;
                let status = self.deps.graph.set_mixer_parameter(fe_id, blob);
                tracing::info!(miid, param_id, ok = status.is_ok(), "ui effect parameter sent");
                status
            }
            SessionParam::TwsConfig { tag, mono, codec } => {
                let fe_id = self.fe_id()?;
                let miid = self.first_backend_miid(fe_id, tag)?;
                if let Some(blob) = payload::tws_config(miid, mono, codec)? {
                    let status = self.deps.graph.set_mixer_parameter(fe_id, blob);
                    tracing::info!(miid, mono, ok = status.is_ok(), "tws config sent");
                }
                Ok(())
            }
            SessionParam::CodecConfiguration(params) => {
                tracing::debug!(format = ?self.format, "codec configuration");
                codec::apply_decoder_params(&mut self.codec, self.format, &params)
            }
            SessionParam::GaplessMetadata(meta) => {
                let handle = self.compress().ok_or_else(|| {
                    SessionError::invalid("gapless metadata without an open compress device")
                })?;
                if !self.gapless {
                    tracing::error!(format = ?self.format, "format is not gapless");
                    return Err(SessionError::invalid(format!(
                        "{:?} is not a gapless format",
                        self.format
                    )));
                }
                tracing::debug!(
                    encoder_delay = meta.encoder_delay,
                    encoder_padding = meta.encoder_padding,
                    "gapless metadata"
                );
                handle.set_gapless_metadata(meta)?;
                Ok(())
            }
            SessionParam::Unknown(id) => {
                tracing::info!(param_id = id, "unsupported parameter ignored");
                Ok(())
            }
        }
    }

    /// No readable parameters on a compressed session.
    pub fn get_parameters(&self, _param_id: u32) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn first_backend_miid(&self, fe_id: u32, tag: u32) -> Result<u32> {
        let backend = self
            .rx_backends
            .first()
            .ok_or_else(|| SessionError::invalid("no render backend"))?;
        self.deps
            .graph
            .module_instance_id(fe_id, &backend.name, tag)
            .inspect_err(|err| tracing::error!(tag, error = %err, "module lookup failed"))
    }

    fn apply_rotation(&mut self, rotation: SpeakerRotation) -> Result<()> {
        let fe_id = self.fe_id()?;
        for backend in &self.rx_backends {
            let Some(device) = self.deps.rm.device_for_backend(backend) else {
                continue;
            };
            if device.id != DeviceId::OutSpeaker || device.config.channels != 2 {
                continue;
            }
            let miid = self
                .deps
                .graph
                .module_instance_id(fe_id, &backend.name, tag::DEVICE_MFC_SR)?;
            let blob = payload::mfc_config(miid, &device, rotation)?;
            self.deps.graph.set_mixer_parameter(fe_id, blob)?;
            tracing::info!(backend = %backend.name, ?rotation, "speaker rotation applied");
        }
        Ok(())
    }

    /// Route the session to one more device.
    pub fn connect_device(
        &mut self,
        stream_type: StreamType,
        device: &DeviceAttributes,
    ) -> Result<()> {
        let (rx, tx) = self.deps.rm.backend_names(std::slice::from_ref(device));
        let mut status = Ok(());
        if !rx.is_empty() {
            status = status.and(self.deps.graph.connect_device(stream_type, device, &self.fe_ids, &rx));
            self.rx_backends.extend(rx);
        }
        if !tx.is_empty() {
            status = status.and(self.deps.graph.connect_device(stream_type, device, &self.fe_ids, &tx));
            self.tx_backends.extend(tx);
        }
        status
    }

    pub fn disconnect_device(
        &mut self,
        stream_type: StreamType,
        device: &DeviceAttributes,
    ) -> Result<()> {
        let (rx, tx) = self.deps.rm.backend_names(std::slice::from_ref(device));
        let mut status = Ok(());
        if !rx.is_empty() {
            status = status.and(self.deps.graph.disconnect_device(stream_type, device, &self.fe_ids, &rx));
            self.rx_backends.retain(|b| !rx.iter().any(|d| d.id == b.id));
        }
        if !tx.is_empty() {
            status = status.and(self.deps.graph.disconnect_device(stream_type, device, &self.fe_ids, &tx));
            self.tx_backends.retain(|b| !tx.iter().any(|d| d.id == b.id));
        }
        status
    }

    /// Prepare a device path before connecting it; cached backends are unchanged.
    pub fn setup_device(&mut self, stream_type: StreamType, device: &DeviceAttributes) -> Result<()> {
        let (rx, tx) = self.deps.rm.backend_names(std::slice::from_ref(device));
        let mut status = Ok(());
        if !rx.is_empty() {
            status = status.and(self.deps.graph.setup_device(stream_type, device, &self.fe_ids, &rx));
        }
        if !tx.is_empty() {
            status = status.and(self.deps.graph.setup_device(stream_type, device, &self.fe_ids, &tx));
        }
        status
    }

    /// Echo reference does not apply to compressed playback.
    pub fn set_ec_ref(&mut self, _rx_device: Option<&DeviceAttributes>, _enable: bool) -> Result<()> {
        Ok(())
    }

    pub fn get_timestamp(&self) -> Result<SessionTime> {
        let miid = self
            .spr_miid
            .ok_or_else(|| SessionError::invalid("timestamp before start"))?;
        self.deps
            .graph
            .timestamp(&self.fe_ids, miid)
            .inspect_err(|err| tracing::error!(error = %err, "timestamp query failed"))
    }

    /// Resolve `COMPRESS<fe> <name>`; returns the control and the front-end id.
    pub fn get_fe_mixer_control(&self, name: &str) -> Result<(Arc<dyn MixerControl>, u32)> {
        let fe_id = self.fe_id()?;
        let full = control_name(fe_id, name);
        let ctl = self.mixer()?.control(&full).ok_or_else(|| {
            tracing::error!(control = %full, "mixer control missing");
            SessionError::NotFound(full)
        })?;
        Ok((ctl, fe_id))
    }

    pub fn get_miid(&self, backend: &str, tag: u32) -> Result<u32> {
        let fe_id = self.fe_id()?;
        self.deps
            .graph
            .module_instance_id(fe_id, backend, tag)
            .inspect_err(|err| tracing::error!(tag, error = %err, "module lookup failed"))
    }
}

impl Drop for CompressSession {
    fn drop(&mut self) {
        let handle = self
            .handle
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            tracing::warn!("session dropped without close");
            handle.close();
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown();
        }
        self.release_fe_ids();
    }
}
