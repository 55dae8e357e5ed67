// Scriptable in-process stand-in for a sound server
//
// `MockServer` fulfils the `ServerLink` protocol from its own worker thread,
// which plays the role of the event-loop thread: every completion fires
// there, in submission order. Tests script the device/stream population,
// force failures or stalls per operation, and read back call counters to
// assert how many round-trips an operation cost.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{unbounded, Sender};
use tracing::debug;

use crate::bridge::{Completion, ConnectionState, StateTx};
use crate::error::Result;
use crate::server::{
    DeviceKind, DeviceProfile, RawDevice, ServerDefaults, ServerLink, StreamHandle, VOLUME_NORM,
};

type Task = Box<dyn FnOnce() + Send>;

/// One scripted device in the mock's population.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub index: u32,
    pub code: String,
    pub label: String,
    pub volume: Vec<u32>,
    pub mute: bool,
    pub sample_rate: u32,
    pub channel_names: Vec<String>,
    pub profiles: Vec<DeviceProfile>,
}

impl MockDevice {
    /// A stereo device at half volume with conventional channel names.
    pub fn new(index: u32, code: &str, label: &str) -> Self {
        Self {
            index,
            code: code.to_string(),
            label: label.to_string(),
            volume: vec![VOLUME_NORM / 2; 2],
            mute: false,
            sample_rate: 44100,
            channel_names: vec!["front-left".to_string(), "front-right".to_string()],
            profiles: Vec::new(),
        }
    }

    fn raw(&self) -> RawDevice {
        RawDevice {
            index: self.index,
            code: self.code.clone(),
            label: self.label.clone(),
            volume: self.volume.clone(),
            mute: self.mute,
            sample_rate: self.sample_rate,
            profiles: self.profiles.clone(),
        }
    }
}

#[derive(Default)]
struct Population {
    outputs: Vec<MockDevice>,
    inputs: Vec<MockDevice>,
    streams: Vec<StreamHandle>,
    default_output: Option<String>,
    default_input: Option<String>,
    /// Every (stream, device) move the server was asked to perform.
    moves: Vec<(u32, u32)>,
}

impl Population {
    fn devices(&self, kind: DeviceKind) -> &Vec<MockDevice> {
        match kind {
            DeviceKind::Output => &self.outputs,
            DeviceKind::Input => &self.inputs,
        }
    }

    fn devices_mut(&mut self, kind: DeviceKind) -> &mut Vec<MockDevice> {
        match kind {
            DeviceKind::Output => &mut self.outputs,
            DeviceKind::Input => &mut self.inputs,
        }
    }
}

#[derive(Default)]
struct Behavior {
    refuse_connection: bool,
    /// Operations that report failure instead of fulfilling.
    fail: Vec<&'static str>,
    /// Operations whose completion never fires (for timeout tests).
    stall: Vec<&'static str>,
    /// One-shot hook run on the worker thread while fulfilling the named
    /// operation, before its completion fires. Used to exercise reentrancy.
    hook: Option<(&'static str, Box<dyn FnOnce() + Send>)>,
}

struct Worker {
    tx: Sender<Task>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

#[derive(Default)]
struct Inner {
    population: Mutex<Population>,
    behavior: Mutex<Behavior>,
    counters: Mutex<HashMap<&'static str, usize>>,
    worker: Mutex<Option<Worker>>,
}

/// Cheaply-cloneable handle to one mock server instance.
///
/// Clone one handle into the manager under test and keep another for
/// scripting and assertions.
#[derive(Clone, Default)]
pub struct MockServer {
    inner: Arc<Inner>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    // -- scripting ---------------------------------------------------------

    pub fn add_output(&self, device: MockDevice) -> &Self {
        self.inner.population.lock().unwrap().outputs.push(device);
        self
    }

    pub fn add_input(&self, device: MockDevice) -> &Self {
        self.inner.population.lock().unwrap().inputs.push(device);
        self
    }

    pub fn add_stream(&self, index: u32, device: u32) -> &Self {
        self.inner
            .population
            .lock()
            .unwrap()
            .streams
            .push(StreamHandle { index, device });
        self
    }

    pub fn set_defaults(&self, output: Option<&str>, input: Option<&str>) -> &Self {
        let mut population = self.inner.population.lock().unwrap();
        population.default_output = output.map(str::to_string);
        population.default_input = input.map(str::to_string);
        self
    }

    /// Refuse the connection: the state notifier reports `Failed`.
    pub fn refuse_connection(&self) -> &Self {
        self.inner.behavior.lock().unwrap().refuse_connection = true;
        self
    }

    /// Make the named operation report failure instead of fulfilling.
    pub fn fail_on(&self, op: &'static str) -> &Self {
        self.inner.behavior.lock().unwrap().fail.push(op);
        self
    }

    /// Make the named operation's completion never fire.
    pub fn stall_on(&self, op: &'static str) -> &Self {
        self.inner.behavior.lock().unwrap().stall.push(op);
        self
    }

    /// Run `hook` on the worker thread while fulfilling the named operation,
    /// before its completion fires. Fires at most once.
    pub fn hook_on(&self, op: &'static str, hook: impl FnOnce() + Send + 'static) -> &Self {
        self.inner.behavior.lock().unwrap().hook = Some((op, Box::new(hook)));
        self
    }

    // -- assertions --------------------------------------------------------

    /// How many round-trips the named operation has cost so far.
    pub fn calls(&self, op: &str) -> usize {
        self.inner
            .counters
            .lock()
            .unwrap()
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    /// Total round-trips across all operations.
    pub fn total_calls(&self) -> usize {
        self.inner.counters.lock().unwrap().values().sum()
    }

    /// The server-side default code for one device kind.
    pub fn default_code(&self, kind: DeviceKind) -> Option<String> {
        let population = self.inner.population.lock().unwrap();
        match kind {
            DeviceKind::Output => population.default_output.clone(),
            DeviceKind::Input => population.default_input.clone(),
        }
    }

    /// Every (stream, device) move requested so far, in order.
    pub fn moves(&self) -> Vec<(u32, u32)> {
        self.inner.population.lock().unwrap().moves.clone()
    }

    /// Current volume vector of one scripted device.
    pub fn device_volume(&self, kind: DeviceKind, index: u32) -> Option<Vec<u32>> {
        let population = self.inner.population.lock().unwrap();
        population
            .devices(kind)
            .iter()
            .find(|d| d.index == index)
            .map(|d| d.volume.clone())
    }

    /// Current mute flag of one scripted device.
    pub fn device_mute(&self, kind: DeviceKind, index: u32) -> Option<bool> {
        let population = self.inner.population.lock().unwrap();
        population
            .devices(kind)
            .iter()
            .find(|d| d.index == index)
            .map(|d| d.mute)
    }

    // -- dispatch ----------------------------------------------------------

    fn record(&self, op: &'static str) {
        *self.inner.counters.lock().unwrap().entry(op).or_insert(0) += 1;
    }

    /// Queue one fulfilment task on the worker thread, honoring scripted
    /// stalls, failures, and the one-shot hook.
    fn dispatch<T: Send + 'static>(
        &self,
        op: &'static str,
        reply: Completion<T>,
        fulfil: impl FnOnce(&mut Population) -> std::result::Result<T, String> + Send + 'static,
    ) {
        self.record(op);
        let inner = Arc::clone(&self.inner);
        let task: Task = Box::new(move || {
            let hook = {
                let mut behavior = inner.behavior.lock().unwrap();
                if behavior.stall.contains(&op) {
                    // Leak the completion so it can never fire or abort.
                    std::mem::forget(reply);
                    return;
                }
                if behavior.fail.contains(&op) {
                    reply.fail(format!("scripted failure for {op}"));
                    return;
                }
                match behavior.hook.take() {
                    Some((hook_op, hook)) if hook_op == op => Some(hook),
                    other => {
                        behavior.hook = other;
                        None
                    }
                }
            };
            if let Some(hook) = hook {
                hook();
            }
            let outcome = {
                let mut population = inner.population.lock().unwrap();
                fulfil(&mut population)
            };
            match outcome {
                Ok(value) => reply.resolve(value),
                Err(message) => reply.fail(message),
            }
        });

        let worker = self.inner.worker.lock().unwrap();
        if let Some(worker) = worker.as_ref() {
            if worker.tx.send(task).is_err() {
                debug!(op, "mock server loop thread already stopped");
            }
        } else {
            // With no loop thread the request can never be serviced; the
            // dropped task's completion aborts, so the waiter is not stranded.
            debug!(op, "request submitted to a stopped mock server");
        }
    }
}

impl ServerLink for MockServer {
    fn start(&self, states: StateTx) -> Result<()> {
        let (tx, rx) = unbounded::<Task>();
        let refuse = self.inner.behavior.lock().unwrap().refuse_connection;

        let handle = thread::spawn(move || {
            if refuse {
                states.transition(ConnectionState::Failed);
            } else {
                states.transition(ConnectionState::Ready);
            }
            while let Ok(task) = rx.recv() {
                task();
            }
            states.transition(ConnectionState::Terminated);
        });
        let thread_id = handle.thread().id();

        *self.inner.worker.lock().unwrap() = Some(Worker {
            tx,
            handle: Some(handle),
            thread_id,
        });
        Ok(())
    }

    fn shutdown(&self) {
        let worker = self.inner.worker.lock().unwrap().take();
        if let Some(mut worker) = worker {
            drop(worker.tx);
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn in_loop_thread(&self) -> bool {
        self.inner
            .worker
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|worker| worker.thread_id == thread::current().id())
    }

    fn list_devices(&self, kind: DeviceKind, reply: Completion<Vec<RawDevice>>) {
        self.dispatch("list_devices", reply, move |population| {
            Ok(population.devices(kind).iter().map(MockDevice::raw).collect())
        });
    }

    fn device_by_index(&self, kind: DeviceKind, index: u32, reply: Completion<Option<RawDevice>>) {
        self.dispatch("device_by_index", reply, move |population| {
            Ok(population
                .devices(kind)
                .iter()
                .find(|d| d.index == index)
                .map(MockDevice::raw))
        });
    }

    fn device_index_by_code(&self, kind: DeviceKind, code: &str, reply: Completion<Option<u32>>) {
        let code = code.to_string();
        self.dispatch("device_index_by_code", reply, move |population| {
            Ok(population
                .devices(kind)
                .iter()
                .find(|d| d.code == code)
                .map(|d| d.index))
        });
    }

    fn channel_names(&self, kind: DeviceKind, index: u32, reply: Completion<Vec<String>>) {
        self.dispatch("channel_names", reply, move |population| {
            population
                .devices(kind)
                .iter()
                .find(|d| d.index == index)
                .map(|d| d.channel_names.clone())
                .ok_or_else(|| format!("no {kind} device with index {index}"))
        });
    }

    fn server_defaults(&self, reply: Completion<ServerDefaults>) {
        self.dispatch("server_defaults", reply, move |population| {
            Ok(ServerDefaults {
                output: population.default_output.clone(),
                input: population.default_input.clone(),
            })
        });
    }

    fn set_device_volume(
        &self,
        kind: DeviceKind,
        index: u32,
        volume: Vec<u32>,
        reply: Completion<()>,
    ) {
        self.dispatch("set_device_volume", reply, move |population| {
            match population
                .devices_mut(kind)
                .iter_mut()
                .find(|d| d.index == index)
            {
                Some(device) => {
                    device.volume = volume;
                    Ok(())
                }
                None => Err(format!("no {kind} device with index {index}")),
            }
        });
    }

    fn set_device_mute(&self, kind: DeviceKind, index: u32, mute: bool, reply: Completion<()>) {
        self.dispatch("set_device_mute", reply, move |population| {
            match population
                .devices_mut(kind)
                .iter_mut()
                .find(|d| d.index == index)
            {
                Some(device) => {
                    device.mute = mute;
                    Ok(())
                }
                None => Err(format!("no {kind} device with index {index}")),
            }
        });
    }

    fn set_default_device(&self, kind: DeviceKind, code: &str, reply: Completion<()>) {
        let code = code.to_string();
        self.dispatch("set_default_device", reply, move |population| {
            if !population.devices(kind).iter().any(|d| d.code == code) {
                return Err(format!("no {kind} device with code {code}"));
            }
            match kind {
                DeviceKind::Output => population.default_output = Some(code),
                DeviceKind::Input => population.default_input = Some(code),
            }
            Ok(())
        });
    }

    fn list_playback_streams(&self, reply: Completion<Vec<StreamHandle>>) {
        self.dispatch("list_playback_streams", reply, move |population| {
            Ok(population.streams.clone())
        });
    }

    fn move_playback_stream(&self, stream: u32, device: u32, reply: Completion<()>) {
        self.dispatch("move_playback_stream", reply, move |population| {
            population.moves.push((stream, device));
            match population.streams.iter_mut().find(|s| s.index == stream) {
                Some(handle) => {
                    handle.device = device;
                    Ok(())
                }
                None => Err(format!("no playback stream with index {stream}")),
            }
        });
    }
}
