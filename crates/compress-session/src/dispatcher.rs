//! Offload event worker.
//!
//! Blocking driver calls (wait for space, drain, partial drain) run on a dedicated
//! thread fed through a FIFO; each finished request is reported to the registered
//! callback as an [`OffloadEvent`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use compress_offload_types::{CardState, OffloadEvent};
use crossbeam_channel::{Receiver, Sender};

use crate::error::{DriverError, Result, SessionError};
use crate::platform::{CompressHandle, ResourceManager};

/// Requests handled by the offload worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffloadMsg {
    WaitForBuffer,
    Drain,
    PartialDrain,
    Error,
    Exit,
}

/// Client callback, invoked as `callback(cookie, event)`.
pub type EventCallback = Arc<dyn Fn(u64, OffloadEvent) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    callback: EventCallback,
    cookie: u64,
}

/// Callback registration shared between the session and its worker.
#[derive(Clone, Default)]
pub struct CallbackSlot {
    inner: Arc<RwLock<Option<Registration>>>,
}

impl CallbackSlot {
    pub fn register(&self, callback: EventCallback, cookie: u64) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Registration { callback, cookie });
    }

    pub fn is_registered(&self) -> bool {
        self.inner
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Deliver one event. Dropped when nothing is registered.
    pub fn notify(&self, event: OffloadEvent) {
        let registration = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match registration {
            Some(reg) => (reg.callback)(reg.cookie, event),
            None => tracing::debug!(?event, "no callback registered, event dropped"),
        }
    }
}

/// Driver handle slot; empty until the compressed device is opened.
pub type HandleSlot = Arc<RwLock<Option<Arc<dyn CompressHandle>>>>;

/// State the worker reads while the session keeps running.
#[derive(Clone)]
pub struct DispatchContext {
    pub started: Arc<AtomicBool>,
    pub gapless: bool,
    pub handle: HandleSlot,
    pub rm: Arc<dyn ResourceManager>,
    pub callback: CallbackSlot,
}

impl DispatchContext {
    fn online(&self) -> bool {
        self.rm.card_state() == CardState::Online
    }

    fn handle(&self) -> Option<Arc<dyn CompressHandle>> {
        self.handle
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Running offload worker and its queue.
pub struct Dispatcher {
    tx: Sender<OffloadMsg>,
    rx: Receiver<OffloadMsg>,
    join: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the worker thread.
    pub fn spawn(ctx: DispatchContext) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker_rx = rx.clone();
        let join = std::thread::Builder::new()
            .name("compress-offload".into())
            .spawn(move || offload_loop(ctx, worker_rx))
            .map_err(|err| SessionError::OutOfMemory(format!("spawn offload thread: {err}")))?;
        Ok(Self {
            tx,
            rx,
            join: Some(join),
        })
    }

    pub fn post(&self, msg: OffloadMsg) {
        if self.tx.send(msg).is_err() {
            tracing::warn!(?msg, "offload worker gone, message dropped");
        }
    }

    /// Queue `Exit`, wait for the worker, then drop whatever is still queued.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        self.post(OffloadMsg::Exit);
        if join.join().is_err() {
            tracing::error!("offload worker panicked");
        }
        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded pending offload messages");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_reset(result: &std::result::Result<(), DriverError>) -> bool {
    matches!(result, Err(err) if err.is_reset())
}

fn offload_loop(ctx: DispatchContext, rx: Receiver<OffloadMsg>) {
    // A non-gapless partial drain already drained the stream; the following full
    // drain must not block again.
    let mut drain_consumed = false;

    while let Ok(msg) = rx.recv() {
        let event = match msg {
            OffloadMsg::Exit => break,
            OffloadMsg::WaitForBuffer => {
                if ctx.online() {
                    if let Some(handle) = ctx.handle() {
                        tracing::trace!("waiting for driver space");
                        if let Err(err) = handle.wait(None) {
                            tracing::debug!(error = %err, "compress wait returned error");
                        }
                    }
                }
                OffloadEvent::WriteReady
            }
            OffloadMsg::Drain => {
                let mut result = Ok(());
                if !drain_consumed && ctx.started.load(Ordering::Acquire) && ctx.online() {
                    if let Some(handle) = ctx.handle() {
                        tracing::info!("draining compress stream");
                        result = handle.drain();
                        tracing::info!(ok = result.is_ok(), "drain returned");
                    }
                }
                if is_reset(&result) {
                    tracing::warn!("drain interrupted by device reset, event suppressed");
                    continue;
                }
                drain_consumed = false;
                OffloadEvent::DrainReady
            }
            OffloadMsg::PartialDrain => {
                let mut result = Ok(());
                let event = if !ctx.started.load(Ordering::Acquire) {
                    tracing::warn!("partial drain before playback started");
                    drain_consumed = true;
                    OffloadEvent::DrainReady
                } else if ctx.gapless {
                    if ctx.online() {
                        if let Some(handle) = ctx.handle() {
                            result = handle.next_track();
                            tracing::info!(ok = result.is_ok(), "next track announced");
                            if result.is_ok() {
                                result = handle.partial_drain();
                                tracing::info!(ok = result.is_ok(), "partial drain returned");
                            }
                        }
                    }
                    OffloadEvent::PartialDrainReady
                } else {
                    if ctx.online() {
                        if let Some(handle) = ctx.handle() {
                            result = handle.drain();
                            tracing::info!(ok = result.is_ok(), "drain returned");
                            drain_consumed = true;
                        }
                    }
                    OffloadEvent::DrainReady
                };
                if is_reset(&result) {
                    tracing::warn!("partial drain interrupted by device reset, event suppressed");
                    continue;
                }
                event
            }
            OffloadMsg::Error => {
                tracing::error!("reporting offload error to client");
                OffloadEvent::Error
            }
        };
        ctx.callback.notify(event);
    }
    tracing::debug!("offload worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{DriverCall, LoopbackDriver, LoopbackResourceManager};
    use crate::platform::{CompressConfig, CompressDriver};
    use compress_offload_proto::{CodecDescriptor, CodecOptions, codec_id};
    use std::sync::Mutex;

    struct Harness {
        ctx: DispatchContext,
        rm: Arc<LoopbackResourceManager>,
        driver: LoopbackDriver,
        events: Arc<Mutex<Vec<(u64, OffloadEvent)>>>,
    }

    fn harness(gapless: bool) -> Harness {
        let rm = Arc::new(LoopbackResourceManager::new());
        let driver = LoopbackDriver::default();
        driver.set_instant_drain(true);
        let config = CompressConfig {
            fragment_size: 16,
            fragments: 2,
            codec: CodecDescriptor {
                id: codec_id::MP3,
                ch_in: 2,
                ch_out: 2,
                sample_rate: 44_100,
                bit_rate: 16,
                format: 0,
                options: CodecOptions::None,
            },
        };
        let handle = driver.open(0, 1, &config).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let callback = CallbackSlot::default();
        let sink = events.clone();
        callback.register(
            Arc::new(move |cookie, event| sink.lock().unwrap().push((cookie, event))),
            42,
        );
        let ctx = DispatchContext {
            started: Arc::new(AtomicBool::new(true)),
            gapless,
            handle: Arc::new(RwLock::new(Some(handle))),
            rm: rm.clone(),
            callback,
        };
        Harness {
            ctx,
            rm,
            driver,
            events,
        }
    }

    fn run(h: &Harness, msgs: &[OffloadMsg]) -> Vec<OffloadEvent> {
        let dispatcher = Dispatcher::spawn(h.ctx.clone()).unwrap();
        for msg in msgs {
            dispatcher.post(*msg);
        }
        dispatcher.shutdown();
        h.events.lock().unwrap().iter().map(|(_, e)| *e).collect()
    }

    #[test]
    fn events_carry_cookie_and_keep_fifo_order() {
        let h = harness(false);
        let events = run(&h, &[OffloadMsg::WaitForBuffer, OffloadMsg::Error]);
        assert_eq!(events, vec![OffloadEvent::WriteReady, OffloadEvent::Error]);
        assert!(h.events.lock().unwrap().iter().all(|(cookie, _)| *cookie == 42));
    }

    #[test]
    fn gapless_partial_drain_announces_next_track() {
        let h = harness(true);
        let events = run(&h, &[OffloadMsg::PartialDrain]);
        assert_eq!(events, vec![OffloadEvent::PartialDrainReady]);
        assert_eq!(
            h.driver.calls(),
            vec![DriverCall::NextTrack, DriverCall::PartialDrain]
        );
    }

    #[test]
    fn non_gapless_partial_drain_consumes_following_drain() {
        let h = harness(false);
        let events = run(&h, &[OffloadMsg::PartialDrain, OffloadMsg::Drain]);
        assert_eq!(events, vec![OffloadEvent::DrainReady, OffloadEvent::DrainReady]);
        assert_eq!(h.driver.calls(), vec![DriverCall::Drain]);
    }

    #[test]
    fn partial_drain_before_start_skips_driver() {
        let h = harness(true);
        h.ctx.started.store(false, Ordering::Release);
        let events = run(&h, &[OffloadMsg::PartialDrain, OffloadMsg::Drain]);
        assert_eq!(events, vec![OffloadEvent::DrainReady, OffloadEvent::DrainReady]);
        assert!(h.driver.calls().is_empty());
    }

    #[test]
    fn reset_during_drain_suppresses_event() {
        let h = harness(false);
        h.driver.fail_next_with_reset();
        let events = run(&h, &[OffloadMsg::Drain, OffloadMsg::Drain]);
        assert_eq!(events, vec![OffloadEvent::DrainReady]);
        assert_eq!(h.driver.calls(), vec![DriverCall::Drain, DriverCall::Drain]);
    }

    #[test]
    fn offline_card_skips_blocking_calls() {
        let h = harness(false);
        h.rm.set_card_state(CardState::Offline);
        let events = run(&h, &[OffloadMsg::WaitForBuffer, OffloadMsg::Drain]);
        assert_eq!(events, vec![OffloadEvent::WriteReady, OffloadEvent::DrainReady]);
        assert!(h.driver.calls().is_empty());
    }

    #[test]
    fn exit_discards_later_messages() {
        let h = harness(false);
        let events = run(&h, &[OffloadMsg::Exit, OffloadMsg::Error]);
        assert!(events.is_empty());
    }

    #[test]
    fn unregistered_callback_drops_events() {
        let mut h = harness(false);
        h.ctx.callback = CallbackSlot::default();
        let dispatcher = Dispatcher::spawn(h.ctx.clone()).unwrap();
        dispatcher.post(OffloadMsg::Error);
        dispatcher.shutdown();
        assert!(h.events.lock().unwrap().is_empty());
        assert!(!h.ctx.callback.is_registered());
    }
}
