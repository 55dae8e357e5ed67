// Real sound-server backend over libpulse
//
// All libpulse objects are confined to one worker thread that owns the
// mainloop and context; it doubles as the event-loop thread. Submissions
// arrive over a channel, the worker issues the introspection call, and the
// libpulse callback copies every field out of the server-owned structures
// (they are invalidated as soon as the callback returns) before firing the
// request's completion. In-flight operation handles are retained until the
// server reports them finished.

use std::mem;
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use libpulse_binding as pulse;
use pulse::callbacks::ListResult;
use pulse::context::introspect::{Introspector, ServerInfo, SinkInfo, SinkInputInfo, SourceInfo};
use pulse::context::{Context, FlagSet as ContextFlagSet, State};
use pulse::mainloop::standard::{IterateResult, Mainloop};
use pulse::operation;
use pulse::volume::{ChannelVolumes, Volume};
use tracing::{debug, error, warn};

use crate::bridge::{Completion, ConnectionState, StateTx};
use crate::error::{ControlError, Result};
use crate::server::{
    DeviceKind, RawDevice, ServerDefaults, ServerLink, StreamHandle,
};

const IDLE_POLL: Duration = Duration::from_millis(2);

enum Request {
    ListDevices(DeviceKind, Completion<Vec<RawDevice>>),
    DeviceByIndex(DeviceKind, u32, Completion<Option<RawDevice>>),
    DeviceIndexByCode(DeviceKind, String, Completion<Option<u32>>),
    ChannelNames(DeviceKind, u32, Completion<Vec<String>>),
    ServerDefaults(Completion<ServerDefaults>),
    SetVolume(DeviceKind, u32, Vec<u32>, Completion<()>),
    SetMute(DeviceKind, u32, bool, Completion<()>),
    SetDefault(DeviceKind, String, Completion<()>),
    ListPlaybackStreams(Completion<Vec<StreamHandle>>),
    MoveStream(u32, u32, Completion<()>),
    Shutdown,
}

struct Worker {
    tx: Sender<Request>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

/// `ServerLink` implementation over a live libpulse connection.
pub struct PulseLink {
    client_name: String,
    worker: Mutex<Option<Worker>>,
}

impl PulseLink {
    pub fn new() -> Self {
        Self::with_name("pulse-control")
    }

    /// Use a custom client name when registering with the server.
    pub fn with_name(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
            worker: Mutex::new(None),
        }
    }

    fn submit(&self, request: Request) {
        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(worker) = worker.as_ref() {
            if worker.tx.send(request).is_err() {
                // Dropped request: its completion aborts, waiters see it.
                warn!("sound server worker is gone, dropping request");
            }
        } else {
            warn!("request submitted before connect, dropping");
        }
    }
}

impl Default for PulseLink {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerLink for PulseLink {
    fn start(&self, states: StateTx) -> Result<()> {
        let (tx, rx) = unbounded();
        let client_name = self.client_name.clone();
        let handle = thread::Builder::new()
            .name("pulse-loop".to_string())
            .spawn(move || run_loop(&client_name, &rx, &states))
            .map_err(|err| ControlError::ConnectionFailed(err.to_string()))?;
        let thread_id = handle.thread().id();

        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(Worker {
            tx,
            handle: Some(handle),
            thread_id,
        });
        Ok(())
    }

    fn shutdown(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(mut worker) = worker {
            let _ = worker.tx.send(Request::Shutdown);
            drop(worker.tx);
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn in_loop_thread(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|worker| worker.thread_id == thread::current().id())
    }

    fn list_devices(&self, kind: DeviceKind, reply: Completion<Vec<RawDevice>>) {
        self.submit(Request::ListDevices(kind, reply));
    }

    fn device_by_index(&self, kind: DeviceKind, index: u32, reply: Completion<Option<RawDevice>>) {
        self.submit(Request::DeviceByIndex(kind, index, reply));
    }

    fn device_index_by_code(&self, kind: DeviceKind, code: &str, reply: Completion<Option<u32>>) {
        self.submit(Request::DeviceIndexByCode(kind, code.to_string(), reply));
    }

    fn channel_names(&self, kind: DeviceKind, index: u32, reply: Completion<Vec<String>>) {
        self.submit(Request::ChannelNames(kind, index, reply));
    }

    fn server_defaults(&self, reply: Completion<ServerDefaults>) {
        self.submit(Request::ServerDefaults(reply));
    }

    fn set_device_volume(
        &self,
        kind: DeviceKind,
        index: u32,
        volume: Vec<u32>,
        reply: Completion<()>,
    ) {
        self.submit(Request::SetVolume(kind, index, volume, reply));
    }

    fn set_device_mute(&self, kind: DeviceKind, index: u32, mute: bool, reply: Completion<()>) {
        self.submit(Request::SetMute(kind, index, mute, reply));
    }

    fn set_default_device(&self, kind: DeviceKind, code: &str, reply: Completion<()>) {
        self.submit(Request::SetDefault(kind, code.to_string(), reply));
    }

    fn list_playback_streams(&self, reply: Completion<Vec<StreamHandle>>) {
        self.submit(Request::ListPlaybackStreams(reply));
    }

    fn move_playback_stream(&self, stream: u32, device: u32, reply: Completion<()>) {
        self.submit(Request::MoveStream(stream, device, reply));
    }
}

// -- worker thread ---------------------------------------------------------

/// Pending libpulse operations, kept alive until the server finishes them.
trait LiveOp {
    fn running(&self) -> bool;
}

impl<T: ?Sized> LiveOp for operation::Operation<T> {
    fn running(&self) -> bool {
        self.get_state() == operation::State::Running
    }
}

fn run_loop(client_name: &str, rx: &Receiver<Request>, states: &StateTx) {
    let Some(mut mainloop) = Mainloop::new() else {
        error!("failed to create the libpulse mainloop");
        states.transition(ConnectionState::Failed);
        return;
    };
    let Some(mut context) = Context::new(&mainloop, client_name) else {
        error!("failed to create the libpulse context");
        states.transition(ConnectionState::Failed);
        return;
    };
    if let Err(err) = context.connect(None, ContextFlagSet::NOFLAGS, None) {
        error!(%err, "failed to start connecting to the sound server");
        states.transition(ConnectionState::Failed);
        return;
    }

    // Drive the loop until the context settles; the bridge enforces the
    // bound on how long this may take.
    loop {
        if !iterate(&mut mainloop) {
            states.transition(ConnectionState::Failed);
            return;
        }
        match context.get_state() {
            State::Ready => {
                states.transition(ConnectionState::Ready);
                break;
            }
            State::Failed | State::Terminated => {
                states.transition(ConnectionState::Failed);
                return;
            }
            _ => {}
        }
    }

    let mut live: Vec<Box<dyn LiveOp>> = Vec::new();
    loop {
        if !iterate(&mut mainloop) {
            break;
        }
        live.retain(|op| op.running());

        match rx.try_recv() {
            Ok(Request::Shutdown) | Err(TryRecvError::Disconnected) => break,
            Ok(request) => handle(&mut context, request, &mut live),
            Err(TryRecvError::Empty) => thread::sleep(IDLE_POLL),
        }
    }

    context.disconnect();
    states.transition(ConnectionState::Terminated);
    debug!("sound server loop thread stopped");
}

fn iterate(mainloop: &mut Mainloop) -> bool {
    match mainloop.iterate(false) {
        IterateResult::Success(_) => true,
        IterateResult::Quit(_) => false,
        IterateResult::Err(err) => {
            error!(%err, "mainloop iteration failed");
            false
        }
    }
}

fn handle(context: &mut Context, request: Request, live: &mut Vec<Box<dyn LiveOp>>) {
    let mut introspect = context.introspect();
    match request {
        Request::ListDevices(kind, reply) => {
            live.push(list_devices(&mut introspect, kind, reply));
        }
        Request::DeviceByIndex(kind, index, reply) => {
            live.push(device_by_index(&mut introspect, kind, index, reply));
        }
        Request::DeviceIndexByCode(kind, code, reply) => {
            live.push(index_by_code(&mut introspect, kind, &code, reply));
        }
        Request::ChannelNames(kind, index, reply) => {
            live.push(channel_names(&mut introspect, kind, index, reply));
        }
        Request::ServerDefaults(reply) => {
            let mut reply = Some(reply);
            live.push(Box::new(introspect.get_server_info(
                move |info: &ServerInfo| {
                    if let Some(reply) = reply.take() {
                        reply.resolve(ServerDefaults {
                            output: info.default_sink_name.as_ref().map(|n| n.to_string()),
                            input: info.default_source_name.as_ref().map(|n| n.to_string()),
                        });
                    }
                },
            )));
        }
        Request::SetVolume(kind, index, volume, reply) => {
            let mut channel_volumes = ChannelVolumes::default();
            channel_volumes.set_len(volume.len() as u8);
            for (slot, value) in channel_volumes.get_mut().iter_mut().zip(volume.iter()) {
                *slot = Volume(*value);
            }
            let callback = ack(reply, "volume write refused by the server");
            let op: Box<dyn LiveOp> = match kind {
                DeviceKind::Output => Box::new(introspect.set_sink_volume_by_index(
                    index,
                    &channel_volumes,
                    Some(callback),
                )),
                DeviceKind::Input => Box::new(introspect.set_source_volume_by_index(
                    index,
                    &channel_volumes,
                    Some(callback),
                )),
            };
            live.push(op);
        }
        Request::SetMute(kind, index, mute, reply) => {
            let callback = ack(reply, "mute write refused by the server");
            let op: Box<dyn LiveOp> = match kind {
                DeviceKind::Output => {
                    Box::new(introspect.set_sink_mute_by_index(index, mute, Some(callback)))
                }
                DeviceKind::Input => {
                    Box::new(introspect.set_source_mute_by_index(index, mute, Some(callback)))
                }
            };
            live.push(op);
        }
        Request::SetDefault(kind, code, reply) => {
            let mut reply = Some(reply);
            let callback = move |success: bool| {
                if let Some(reply) = reply.take() {
                    if success {
                        reply.resolve(());
                    } else {
                        reply.fail("server refused to change the default device");
                    }
                }
            };
            let op: Box<dyn LiveOp> = match kind {
                DeviceKind::Output => Box::new(context.set_default_sink(&code, callback)),
                DeviceKind::Input => Box::new(context.set_default_source(&code, callback)),
            };
            live.push(op);
        }
        Request::ListPlaybackStreams(reply) => {
            let mut streams = Vec::new();
            let mut reply = Some(reply);
            live.push(Box::new(introspect.get_sink_input_info_list(
                move |result: ListResult<&SinkInputInfo>| match result {
                    ListResult::Item(info) => streams.push(StreamHandle {
                        index: info.index,
                        device: info.sink,
                    }),
                    ListResult::End => {
                        if let Some(reply) = reply.take() {
                            reply.resolve(mem::take(&mut streams));
                        }
                    }
                    ListResult::Error => {
                        if let Some(reply) = reply.take() {
                            reply.fail("playback stream enumeration failed");
                        }
                    }
                },
            )));
        }
        Request::MoveStream(stream, device, reply) => {
            let callback = ack(reply, "server refused to move the playback stream");
            live.push(Box::new(introspect.move_sink_input_by_index(
                stream,
                device,
                Some(callback),
            )));
        }
        Request::Shutdown => {}
    }
}

/// Success/failure acknowledgement callback firing one completion.
fn ack(reply: Completion<()>, failure: &'static str) -> Box<dyn FnMut(bool)> {
    let mut reply = Some(reply);
    Box::new(move |success| {
        if let Some(reply) = reply.take() {
            if success {
                reply.resolve(());
            } else {
                reply.fail(failure);
            }
        }
    })
}

fn copy_sink(info: &SinkInfo) -> RawDevice {
    RawDevice {
        index: info.index,
        code: info.name.as_ref().map(|n| n.to_string()).unwrap_or_default(),
        label: info
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default(),
        volume: info.volume.get()[..info.volume.len() as usize]
            .iter()
            .map(|v| v.0)
            .collect(),
        mute: info.mute,
        sample_rate: info.sample_spec.rate,
        profiles: Vec::new(),
    }
}

fn copy_source(info: &SourceInfo) -> RawDevice {
    RawDevice {
        index: info.index,
        code: info.name.as_ref().map(|n| n.to_string()).unwrap_or_default(),
        label: info
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default(),
        volume: info.volume.get()[..info.volume.len() as usize]
            .iter()
            .map(|v| v.0)
            .collect(),
        mute: info.mute,
        sample_rate: info.sample_spec.rate,
        profiles: Vec::new(),
    }
}

fn list_devices(
    introspect: &mut Introspector,
    kind: DeviceKind,
    reply: Completion<Vec<RawDevice>>,
) -> Box<dyn LiveOp> {
    let mut devices = Vec::new();
    let mut reply = Some(reply);
    match kind {
        DeviceKind::Output => Box::new(introspect.get_sink_info_list(
            move |result: ListResult<&SinkInfo>| match result {
                ListResult::Item(info) => devices.push(copy_sink(info)),
                ListResult::End => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(mem::take(&mut devices));
                    }
                }
                ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        reply.fail("device enumeration failed");
                    }
                }
            },
        )),
        DeviceKind::Input => Box::new(introspect.get_source_info_list(
            move |result: ListResult<&SourceInfo>| match result {
                ListResult::Item(info) => devices.push(copy_source(info)),
                ListResult::End => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(mem::take(&mut devices));
                    }
                }
                ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        reply.fail("device enumeration failed");
                    }
                }
            },
        )),
    }
}

fn device_by_index(
    introspect: &mut Introspector,
    kind: DeviceKind,
    index: u32,
    reply: Completion<Option<RawDevice>>,
) -> Box<dyn LiveOp> {
    let mut found = None;
    let mut reply = Some(reply);
    match kind {
        DeviceKind::Output => Box::new(introspect.get_sink_info_by_index(
            index,
            move |result: ListResult<&SinkInfo>| match result {
                ListResult::Item(info) => found = Some(copy_sink(info)),
                ListResult::End => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(found.take());
                    }
                }
                ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(None);
                    }
                }
            },
        )),
        DeviceKind::Input => Box::new(introspect.get_source_info_by_index(
            index,
            move |result: ListResult<&SourceInfo>| match result {
                ListResult::Item(info) => found = Some(copy_source(info)),
                ListResult::End => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(found.take());
                    }
                }
                ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(None);
                    }
                }
            },
        )),
    }
}

fn index_by_code(
    introspect: &mut Introspector,
    kind: DeviceKind,
    code: &str,
    reply: Completion<Option<u32>>,
) -> Box<dyn LiveOp> {
    let mut found = None;
    let mut reply = Some(reply);
    match kind {
        DeviceKind::Output => Box::new(introspect.get_sink_info_by_name(
            code,
            move |result: ListResult<&SinkInfo>| match result {
                ListResult::Item(info) => found = Some(info.index),
                ListResult::End => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(found.take());
                    }
                }
                ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(None);
                    }
                }
            },
        )),
        DeviceKind::Input => Box::new(introspect.get_source_info_by_name(
            code,
            move |result: ListResult<&SourceInfo>| match result {
                ListResult::Item(info) => found = Some(info.index),
                ListResult::End => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(found.take());
                    }
                }
                ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(None);
                    }
                }
            },
        )),
    }
}

fn channel_names(
    introspect: &mut Introspector,
    kind: DeviceKind,
    index: u32,
    reply: Completion<Vec<String>>,
) -> Box<dyn LiveOp> {
    let mut names = Vec::new();
    let mut reply = Some(reply);
    match kind {
        DeviceKind::Output => Box::new(introspect.get_sink_info_by_index(
            index,
            move |result: ListResult<&SinkInfo>| match result {
                ListResult::Item(info) => {
                    names = info.channel_map.get()[..info.channel_map.len() as usize]
                        .iter()
                        .map(|position| format!("{position:?}"))
                        .collect();
                }
                ListResult::End => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(mem::take(&mut names));
                    }
                }
                ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        reply.fail("channel map lookup failed");
                    }
                }
            },
        )),
        DeviceKind::Input => Box::new(introspect.get_source_info_by_index(
            index,
            move |result: ListResult<&SourceInfo>| match result {
                ListResult::Item(info) => {
                    names = info.channel_map.get()[..info.channel_map.len() as usize]
                        .iter()
                        .map(|position| format!("{position:?}"))
                        .collect();
                }
                ListResult::End => {
                    if let Some(reply) = reply.take() {
                        reply.resolve(mem::take(&mut names));
                    }
                }
                ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        reply.fail("channel map lookup failed");
                    }
                }
            },
        )),
    }
}
