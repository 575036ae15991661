//! Scripted engine, transport and executor for unit tests.

use crate::engine::{EngineResult, EngineStatus, HandshakeStatus, ProtocolEngine, SessionInfo};
use crate::error::EngineError;
use crate::listener::{Executor, Task};
use crate::transport::{ReadinessListener, Transport};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// One scripted engine response.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Step {
    result: EngineResult,
}

impl Step {
    /// Report `result` and move no bytes
    pub(crate) fn result(result: EngineResult) -> Self {
        Self { result }
    }

    /// Report `result`, writing `len` filler bytes as output
    pub(crate) fn output(result: EngineResult, len: usize) -> Self {
        Self {
            result: EngineResult {
                produced: len,
                ..result
            },
        }
    }
}

/// Engine driven by a script, falling back to an identity transform.
///
/// Scripted steps that need more source than is available report
/// `BufferUnderflow`, and steps whose output does not fit report
/// `BufferOverflow`; in both cases the step stays queued.
pub(crate) struct ScriptedEngine {
    wrap_script: VecDeque<Step>,
    unwrap_script: VecDeque<Step>,
    wrap_default: Option<EngineResult>,
    unwrap_default: Option<EngineResult>,
    packet: usize,
    app: usize,
    pub(crate) wrap_calls: usize,
    pub(crate) unwrap_calls: usize,
    pub(crate) tasks_run: usize,
    pub(crate) handshakes_begun: usize,
    pub(crate) inbound_closes: usize,
    pub(crate) close_inbound_error: Option<String>,
    inbound_done: bool,
    outbound_done: bool,
    close_notify_pending: bool,
}

const CLOSE_NOTIFY: [u8; 2] = [0x15, 0x00];

impl ScriptedEngine {
    pub(crate) fn new(packet: usize, app: usize) -> Self {
        Self {
            wrap_script: VecDeque::new(),
            unwrap_script: VecDeque::new(),
            wrap_default: None,
            unwrap_default: None,
            packet,
            app,
            wrap_calls: 0,
            unwrap_calls: 0,
            tasks_run: 0,
            handshakes_begun: 0,
            inbound_closes: 0,
            close_inbound_error: None,
            inbound_done: false,
            outbound_done: false,
            close_notify_pending: false,
        }
    }

    pub(crate) fn push_wrap(&mut self, step: Step) {
        self.wrap_script.push_back(step);
    }

    pub(crate) fn push_unwrap(&mut self, step: Step) {
        self.unwrap_script.push_back(step);
    }

    /// Response once the wrap script runs out
    pub(crate) fn set_wrap_default(&mut self, result: EngineResult) {
        self.wrap_default = Some(result);
    }

    /// Response once the unwrap script runs out
    pub(crate) fn set_unwrap_default(&mut self, result: EngineResult) {
        self.unwrap_default = Some(result);
    }

    fn overflow() -> EngineResult {
        EngineResult::new(EngineStatus::BufferOverflow, HandshakeStatus::NotHandshaking, 0, 0)
    }

    fn underflow() -> EngineResult {
        EngineResult::new(EngineStatus::BufferUnderflow, HandshakeStatus::NotHandshaking, 0, 0)
    }

    fn closed(produced: usize) -> EngineResult {
        EngineResult::new(EngineStatus::Closed, HandshakeStatus::NotHandshaking, 0, produced)
    }

    fn scripted_wrap(&mut self, dst: &mut [u8]) -> Option<EngineResult> {
        let step = *self.wrap_script.front()?;
        if step.result.produced > dst.len() {
            return Some(Self::overflow());
        }
        self.wrap_script.pop_front();
        dst[..step.result.produced].fill(0xAB);
        Some(step.result)
    }

    fn scripted_unwrap(&mut self, src: &[u8], dsts: &mut [&mut [u8]]) -> Option<EngineResult> {
        let step = *self.unwrap_script.front()?;
        if step.result.consumed > src.len() {
            return Some(Self::underflow());
        }
        let room: usize = dsts.iter().map(|dst| dst.len()).sum();
        if step.result.produced > room {
            return Some(Self::overflow());
        }
        self.unwrap_script.pop_front();
        scatter(&vec![0xCD; step.result.produced], dsts);
        Some(step.result)
    }
}

/// Copy `data` across `dsts` in order.
fn scatter(data: &[u8], dsts: &mut [&mut [u8]]) {
    let mut offset = 0;
    for dst in dsts.iter_mut() {
        if offset == data.len() {
            break;
        }
        let n = dst.len().min(data.len() - offset);
        dst[..n].copy_from_slice(&data[offset..offset + n]);
        offset += n;
    }
}

impl ProtocolEngine for ScriptedEngine {
    fn wrap(&mut self, srcs: &[&[u8]], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        self.wrap_calls += 1;
        if let Some(result) = self.scripted_wrap(dst) {
            return Ok(result);
        }
        if self.close_notify_pending {
            if dst.len() < CLOSE_NOTIFY.len() {
                return Ok(Self::overflow());
            }
            dst[..CLOSE_NOTIFY.len()].copy_from_slice(&CLOSE_NOTIFY);
            self.close_notify_pending = false;
            return Ok(Self::closed(CLOSE_NOTIFY.len()));
        }
        if self.outbound_done {
            return Ok(Self::closed(0));
        }
        if let Some(result) = self.wrap_default {
            return Ok(result);
        }

        // Identity transform, at most one fragment per call
        let available: usize = srcs.iter().map(|src| src.len()).sum();
        let n = available.min(self.app);
        if n > dst.len() {
            return Ok(Self::overflow());
        }
        let mut copied = 0;
        for src in srcs {
            let take = src.len().min(n - copied);
            dst[copied..copied + take].copy_from_slice(&src[..take]);
            copied += take;
        }
        Ok(EngineResult::new(
            EngineStatus::Ok,
            HandshakeStatus::NotHandshaking,
            n,
            n,
        ))
    }

    fn unwrap(
        &mut self,
        src: &[u8],
        dsts: &mut [&mut [u8]],
    ) -> Result<EngineResult, EngineError> {
        self.unwrap_calls += 1;
        if let Some(result) = self.scripted_unwrap(src, dsts) {
            return Ok(result);
        }
        if self.inbound_done {
            return Ok(Self::closed(0));
        }
        if let Some(result) = self.unwrap_default {
            return Ok(result);
        }

        if src.is_empty() {
            return Ok(Self::underflow());
        }
        let n = src.len().min(self.app);
        let room: usize = dsts.iter().map(|dst| dst.len()).sum();
        if n > room {
            return Ok(Self::overflow());
        }
        scatter(&src[..n], dsts);
        Ok(EngineResult::new(
            EngineStatus::Ok,
            HandshakeStatus::NotHandshaking,
            n,
            n,
        ))
    }

    fn run_delegated_task(&mut self) -> Result<(), EngineError> {
        self.tasks_run += 1;
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        HandshakeStatus::NotHandshaking
    }

    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        self.handshakes_begun += 1;
        Ok(())
    }

    fn close_inbound(&mut self) -> Result<(), EngineError> {
        self.inbound_closes += 1;
        self.inbound_done = true;
        match self.close_inbound_error.take() {
            Some(message) => Err(EngineError::msg(message)),
            None => Ok(()),
        }
    }

    fn close_outbound(&mut self) {
        if !self.outbound_done {
            self.outbound_done = true;
            self.close_notify_pending = true;
        }
    }

    fn is_inbound_done(&self) -> bool {
        self.inbound_done
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_done && !self.close_notify_pending
    }

    fn session(&self) -> SessionInfo {
        SessionInfo {
            protocol: "scripted".into(),
            cipher_suite: "identity".into(),
            packet_buffer_size: self.packet,
            application_buffer_size: self.app,
        }
    }
}

#[derive(Default)]
struct TransportState {
    inbound: VecDeque<u8>,
    eof: bool,
    outbound: Vec<u8>,
    /// Bytes the transport will still accept; `None` is unlimited
    write_budget: Option<usize>,
    read_calls: usize,
    reads_shut_down: bool,
    writes_shut_down: bool,
    closed: bool,
    close_error: Option<io::ErrorKind>,
    reads_resumed: bool,
    writes_resumed: bool,
    read_listener: Option<ReadinessListener>,
    write_listener: Option<ReadinessListener>,
    close_listener: Option<ReadinessListener>,
}

/// In-process transport whose readiness is driven by the test.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_inbound(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes);
    }

    pub(crate) fn set_eof(&self) {
        self.state.lock().eof = true;
    }

    pub(crate) fn set_write_budget(&self, budget: Option<usize>) {
        self.state.lock().write_budget = budget;
    }

    pub(crate) fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().outbound)
    }

    pub(crate) fn fail_close(&self, kind: io::ErrorKind) {
        self.state.lock().close_error = Some(kind);
    }

    pub(crate) fn read_calls(&self) -> usize {
        self.state.lock().read_calls
    }

    pub(crate) fn writes_shut_down(&self) -> bool {
        self.state.lock().writes_shut_down
    }

    pub(crate) fn reads_shut_down(&self) -> bool {
        self.state.lock().reads_shut_down
    }

    pub(crate) fn reads_resumed(&self) -> bool {
        self.state.lock().reads_resumed
    }

    pub(crate) fn writes_resumed(&self) -> bool {
        self.state.lock().writes_resumed
    }

    /// Deliver a read-readiness event on the calling thread
    pub(crate) fn fire_readable(&self) {
        let listener = {
            let mut state = self.state.lock();
            state.reads_resumed = false;
            state.read_listener.clone()
        };
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Deliver a write-readiness event on the calling thread
    pub(crate) fn fire_writable(&self) {
        let listener = {
            let mut state = self.state.lock();
            state.writes_resumed = false;
            state.write_listener.clone()
        };
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Deliver a close event on the calling thread
    pub(crate) fn fire_close(&self) {
        let listener = self.state.lock().close_listener.clone();
        if let Some(listener) = listener {
            listener();
        }
    }
}

impl Transport for ScriptedTransport {
    type Addr = &'static str;

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.read_calls += 1;
        if state.reads_shut_down || state.closed {
            return Ok(0);
        }
        if state.inbound.is_empty() {
            return if state.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.writes_shut_down || state.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let n = match state.write_budget {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => {
                let n = budget.min(buf.len());
                state.write_budget = Some(budget - n);
                n
            }
            None => buf.len(),
        };
        state.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn shutdown_reads(&self) -> io::Result<()> {
        self.state.lock().reads_shut_down = true;
        Ok(())
    }

    fn shutdown_writes(&self) -> io::Result<()> {
        self.state.lock().writes_shut_down = true;
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        match state.close_error.take() {
            Some(kind) => Err(io::Error::new(kind, "scripted close failure")),
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        !self.state.lock().closed
    }

    fn set_read_listener(&self, listener: Option<ReadinessListener>) {
        self.state.lock().read_listener = listener;
    }

    fn set_write_listener(&self, listener: Option<ReadinessListener>) {
        self.state.lock().write_listener = listener;
    }

    fn set_close_listener(&self, listener: Option<ReadinessListener>) {
        self.state.lock().close_listener = listener;
    }

    fn resume_reads(&self) {
        self.state.lock().reads_resumed = true;
    }

    fn suspend_reads(&self) {
        self.state.lock().reads_resumed = false;
    }

    fn resume_writes(&self) {
        self.state.lock().writes_resumed = true;
    }

    fn suspend_writes(&self) {
        self.state.lock().writes_resumed = false;
    }

    fn await_readable(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn await_writable(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok("scripted-local")
    }

    fn peer_addr(&self) -> io::Result<Self::Addr> {
        Ok("scripted-peer")
    }
}

/// Executor that queues tasks until the test drains them.
pub(crate) struct QueueExecutor {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

impl QueueExecutor {
    pub(crate) fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self { tx, rx })
    }

    /// Run every queued task (including tasks queued while draining)
    pub(crate) fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}

impl Executor for QueueExecutor {
    fn execute(&self, task: Task) {
        // The receiver lives as long as self
        let _ = self.tx.send(task);
    }
}
