//! Tag and calibration key vectors sent over the front-end's mixer controls.

use std::ops::{Deref, DerefMut};

use compress_offload_proto::{KeyValue, encode_cal_config, encode_tag_config};

use crate::error::{Result, SessionError};
use crate::platform::{KeyVectorPopulator, Mixer, Stream};

pub const SET_PARAM_TAG_CONTROL: &str = "setParamTag";
pub const SET_CALIBRATION_CONTROL: &str = "setCalibration";
pub const DISCONNECT_CONTROL: &str = "disconnect";

/// Which control a key vector is aimed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigType {
    Module,
    Calibration,
}

/// Client-supplied tag plus the keys to send with it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EffectPayload {
    pub tag: u32,
    pub kvs: Vec<KeyValue>,
}

/// Full name of a front-end control, e.g. `COMPRESS5 setParamTag`.
pub fn control_name(fe_id: u32, control: &str) -> String {
    format!("COMPRESS{fe_id} {control}")
}

/// Clears the borrowed key vector when dropped.
struct Cleared<'a>(&'a mut Vec<KeyValue>);

impl Deref for Cleared<'_> {
    type Target = Vec<KeyValue>;
    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl DerefMut for Cleared<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0
    }
}

impl Drop for Cleared<'_> {
    fn drop(&mut self) {
        self.0.clear();
    }
}

/// Everything needed to push key vectors for one front-end.
pub struct KeyVectorSink<'a> {
    pub mixer: &'a dyn Mixer,
    pub populator: &'a dyn KeyVectorPopulator,
    pub fe_id: u32,
}

impl KeyVectorSink<'_> {
    /// Send a client-built key vector tagged with `payload.tag`.
    pub fn set_tkv(
        &self,
        tkv: &mut Vec<KeyValue>,
        kind: ConfigType,
        payload: &EffectPayload,
    ) -> Result<()> {
        let mut tkv = Cleared(tkv);
        if kind != ConfigType::Module {
            return Err(SessionError::invalid(format!("unsupported tkv config type {kind:?}")));
        }
        tkv.extend_from_slice(&payload.kvs);
        self.send_tags(payload.tag, &tkv)
    }

    /// Build one key vector from up to three tags (zero tags are skipped).
    /// Calibration requests are accepted and ignored.
    pub fn set_config_tags(
        &self,
        stream: &dyn Stream,
        tkv: &mut Vec<KeyValue>,
        kind: ConfigType,
        tags: [u32; 3],
    ) -> Result<()> {
        if kind != ConfigType::Module {
            return Ok(());
        }
        let mut tkv = Cleared(tkv);
        tkv.clear();
        let mut tag_sent = 0;
        for tag in tags.into_iter().filter(|t| *t != 0) {
            match self.populator.populate_tag_key_vector(stream, &mut tkv, tag) {
                Ok(sent) => tag_sent = sent,
                Err(err) => tracing::warn!(tag, error = %err, "tag key vector not populated"),
            }
        }
        self.send_tags(tag_sent, &tkv)
    }

    /// Populate and send the key vector for a single tag.
    pub fn set_config(
        &self,
        stream: &dyn Stream,
        tkv: &mut Vec<KeyValue>,
        ckv: &mut Vec<KeyValue>,
        kind: ConfigType,
        tag: u32,
    ) -> Result<()> {
        match kind {
            ConfigType::Module => {
                let mut tkv = Cleared(tkv);
                let tag_sent = self.populator.populate_tag_key_vector(stream, &mut tkv, tag)?;
                self.send_tags(tag_sent, &tkv)
            }
            ConfigType::Calibration => {
                let mut ckv = Cleared(ckv);
                self.populator.populate_cal_key_vector(stream, &mut ckv, tag)?;
                self.send_calibration(&ckv)
            }
        }
    }

    fn send_tags(&self, tag: u32, kvs: &[KeyValue]) -> Result<()> {
        if kvs.is_empty() {
            return Err(SessionError::invalid("empty tag key vector"));
        }
        let blob = encode_tag_config(tag, kvs)?;
        self.write(SET_PARAM_TAG_CONTROL, &blob)?;
        tracing::debug!(fe_id = self.fe_id, tag, num_kvs = kvs.len(), "tag config sent");
        Ok(())
    }

    fn send_calibration(&self, kvs: &[KeyValue]) -> Result<()> {
        if kvs.is_empty() {
            return Err(SessionError::invalid("empty calibration key vector"));
        }
        let blob = encode_cal_config(kvs)?;
        self.write(SET_CALIBRATION_CONTROL, &blob)?;
        tracing::debug!(fe_id = self.fe_id, num_kvs = kvs.len(), "calibration sent");
        Ok(())
    }

    fn write(&self, control: &str, blob: &[u8]) -> Result<()> {
        let name = control_name(self.fe_id, control);
        let ctl = self.mixer.control(&name).ok_or_else(|| {
            tracing::error!(control = %name, "mixer control missing");
            SessionError::NotFound(name.clone())
        })?;
        ctl.set_array(blob).map_err(|err| {
            tracing::error!(control = %name, error = %err, "key vector write failed");
            SessionError::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackMixer, LoopbackPopulator, LoopbackStream};
    use compress_offload_proto::{decode_cal_config, decode_tag_config};

    fn mixer_with_controls(fe_id: u32) -> LoopbackMixer {
        let mixer = LoopbackMixer::default();
        mixer.add_control(&control_name(fe_id, SET_PARAM_TAG_CONTROL));
        mixer.add_control(&control_name(fe_id, SET_CALIBRATION_CONTROL));
        mixer
    }

    #[test]
    fn control_names_use_front_end_id() {
        assert_eq!(control_name(7, SET_PARAM_TAG_CONTROL), "COMPRESS7 setParamTag");
    }

    #[test]
    fn set_tkv_sends_tag_config_and_clears() {
        let mixer = mixer_with_controls(3);
        let populator = LoopbackPopulator::default();
        let sink = KeyVectorSink {
            mixer: &mixer,
            populator: &populator,
            fe_id: 3,
        };
        let mut tkv = Vec::new();
        let payload = EffectPayload {
            tag: 0xC000_0100,
            kvs: vec![KeyValue::new(1, 10), KeyValue::new(2, 20)],
        };
        sink.set_tkv(&mut tkv, ConfigType::Module, &payload).unwrap();
        assert!(tkv.is_empty());

        let writes = mixer.array_writes("COMPRESS3 setParamTag");
        assert_eq!(writes.len(), 1);
        let (tag, kvs) = decode_tag_config(&writes[0]).unwrap();
        assert_eq!(tag, 0xC000_0100);
        assert_eq!(kvs, payload.kvs);
    }

    #[test]
    fn empty_vector_is_invalid_and_never_written() {
        let mixer = mixer_with_controls(3);
        let populator = LoopbackPopulator::default();
        let sink = KeyVectorSink {
            mixer: &mixer,
            populator: &populator,
            fe_id: 3,
        };
        let mut tkv = Vec::new();
        let err = sink
            .set_tkv(&mut tkv, ConfigType::Module, &EffectPayload::default())
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert!(mixer.array_writes("COMPRESS3 setParamTag").is_empty());
    }

    #[test]
    fn missing_control_is_not_found_and_vector_cleared() {
        let mixer = LoopbackMixer::default();
        let populator = LoopbackPopulator::default();
        let sink = KeyVectorSink {
            mixer: &mixer,
            populator: &populator,
            fe_id: 9,
        };
        let mut tkv = Vec::new();
        let payload = EffectPayload {
            tag: 1,
            kvs: vec![KeyValue::new(1, 1)],
        };
        let err = sink.set_tkv(&mut tkv, ConfigType::Module, &payload).unwrap_err();
        assert!(matches!(err, SessionError::NotFound(ref name) if name == "COMPRESS9 setParamTag"));
        assert!(tkv.is_empty());
    }

    #[test]
    fn calibration_tkv_is_rejected() {
        let mixer = mixer_with_controls(1);
        let populator = LoopbackPopulator::default();
        let sink = KeyVectorSink {
            mixer: &mixer,
            populator: &populator,
            fe_id: 1,
        };
        let mut tkv = vec![KeyValue::new(5, 5)];
        let payload = EffectPayload {
            tag: 1,
            kvs: vec![KeyValue::new(1, 1)],
        };
        assert!(sink.set_tkv(&mut tkv, ConfigType::Calibration, &payload).is_err());
        assert!(tkv.is_empty());
    }

    #[test]
    fn config_tags_skip_zero_and_use_last_sent_tag() {
        let mixer = mixer_with_controls(2);
        let populator = LoopbackPopulator::default();
        populator.add_tag(0x10, vec![KeyValue::new(1, 1)]);
        populator.add_tag(0x20, vec![KeyValue::new(2, 2)]);
        let sink = KeyVectorSink {
            mixer: &mixer,
            populator: &populator,
            fe_id: 2,
        };
        let stream = LoopbackStream::mp3_stereo();
        let mut tkv = vec![KeyValue::new(99, 99)];
        sink.set_config_tags(&stream, &mut tkv, ConfigType::Module, [0x10, 0, 0x20])
            .unwrap();
        assert!(tkv.is_empty());

        let writes = mixer.array_writes("COMPRESS2 setParamTag");
        let (tag, kvs) = decode_tag_config(&writes[0]).unwrap();
        assert_eq!(tag, 0x20);
        assert_eq!(kvs, vec![KeyValue::new(1, 1), KeyValue::new(2, 2)]);
    }

    #[test]
    fn config_tags_calibration_is_a_no_op() {
        let mixer = mixer_with_controls(2);
        let populator = LoopbackPopulator::default();
        let sink = KeyVectorSink {
            mixer: &mixer,
            populator: &populator,
            fe_id: 2,
        };
        let stream = LoopbackStream::mp3_stereo();
        let mut tkv = Vec::new();
        sink.set_config_tags(&stream, &mut tkv, ConfigType::Calibration, [1, 2, 3])
            .unwrap();
        assert!(mixer.array_writes("COMPRESS2 setParamTag").is_empty());
    }

    #[test]
    fn config_tags_with_nothing_populated_is_invalid() {
        let mixer = mixer_with_controls(2);
        let populator = LoopbackPopulator::default();
        let sink = KeyVectorSink {
            mixer: &mixer,
            populator: &populator,
            fe_id: 2,
        };
        let stream = LoopbackStream::mp3_stereo();
        let mut tkv = Vec::new();
        let err = sink
            .set_config_tags(&stream, &mut tkv, ConfigType::Module, [0, 0, 0])
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
    }

    #[test]
    fn single_calibration_tag_uses_calibration_control() {
        let mixer = mixer_with_controls(4);
        let populator = LoopbackPopulator::default();
        populator.add_calibration(0x77, vec![KeyValue::new(0xA, 0xB)]);
        let sink = KeyVectorSink {
            mixer: &mixer,
            populator: &populator,
            fe_id: 4,
        };
        let stream = LoopbackStream::mp3_stereo();
        let (mut tkv, mut ckv) = (Vec::new(), Vec::new());
        sink.set_config(&stream, &mut tkv, &mut ckv, ConfigType::Calibration, 0x77)
            .unwrap();
        assert!(ckv.is_empty());

        let writes = mixer.array_writes("COMPRESS4 setCalibration");
        assert_eq!(decode_cal_config(&writes[0]).unwrap(), vec![KeyValue::new(0xA, 0xB)]);
        assert!(mixer.array_writes("COMPRESS4 setParamTag").is_empty());
    }

    #[test]
    fn single_module_tag_with_unknown_tag_is_invalid() {
        let mixer = mixer_with_controls(4);
        let populator = LoopbackPopulator::default();
        let sink = KeyVectorSink {
            mixer: &mixer,
            populator: &populator,
            fe_id: 4,
        };
        let stream = LoopbackStream::mp3_stereo();
        let (mut tkv, mut ckv) = (Vec::new(), Vec::new());
        let err = sink
            .set_config(&stream, &mut tkv, &mut ckv, ConfigType::Module, 0x1234)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert!(mixer.array_writes("COMPRESS4 setParamTag").is_empty());
    }
}
