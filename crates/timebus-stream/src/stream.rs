//! Cold, per-subscriber schedule streams.

use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use timebus::{TaskInfo, TimerBus, TimerCall};

use crate::ScheduleRequest;

/// Default number of firings buffered for a consumer that falls behind.
pub const DEFAULT_STREAM_CAPACITY: usize = 16;

/// Create a cold stream of firings for `request`.
///
/// Nothing is registered until the stream is first polled.
pub fn schedule_stream<B>(bus: B, request: ScheduleRequest) -> ScheduleStream<B>
where
    B: Deref<Target = TimerBus> + Unpin,
{
    schedule_stream_with_capacity(bus, request, DEFAULT_STREAM_CAPACITY)
}

/// Like [`schedule_stream`], buffering at most `capacity` unread firings.
/// Firings that arrive while the buffer is full are dropped.
pub fn schedule_stream_with_capacity<B>(
    bus: B,
    request: ScheduleRequest,
    capacity: usize,
) -> ScheduleStream<B>
where
    B: Deref<Target = TimerBus> + Unpin,
{
    ScheduleStream {
        bus,
        request,
        capacity: capacity.max(1),
        state: StreamState::Idle,
    }
}

/// A reusable description of a schedule. Each [`ScheduleFlow::subscribe`]
/// yields an independent stream with its own registration.
#[derive(Debug, Clone)]
pub struct ScheduleFlow<B> {
    bus: B,
    request: ScheduleRequest,
    capacity: usize,
}

impl<B> ScheduleFlow<B>
where
    B: Deref<Target = TimerBus> + Clone + Unpin,
{
    pub fn new(bus: B, request: ScheduleRequest) -> Self {
        Self::with_capacity(bus, request, DEFAULT_STREAM_CAPACITY)
    }

    pub fn with_capacity(bus: B, request: ScheduleRequest, capacity: usize) -> Self {
        Self {
            bus,
            request,
            capacity,
        }
    }

    pub fn request(&self) -> &ScheduleRequest {
        &self.request
    }

    pub fn subscribe(&self) -> ScheduleStream<B> {
        schedule_stream_with_capacity(self.bus.clone(), self.request.clone(), self.capacity)
    }
}

enum StreamState {
    Idle,
    Active {
        rx: mpsc::Receiver<TaskInfo>,
        call: TimerCall,
    },
    Done,
}

/// Stream of [`TaskInfo`] events for one registration.
///
/// Ends after a one-shot task fires, or when the scheduler exits. Dropping
/// the stream cancels the registration.
pub struct ScheduleStream<B> {
    bus: B,
    request: ScheduleRequest,
    capacity: usize,
    state: StreamState,
}

impl<B> ScheduleStream<B>
where
    B: Deref<Target = TimerBus> + Unpin,
{
    /// The registration handle, once the stream has started.
    pub fn call(&self) -> Option<&TimerCall> {
        match &self.state {
            StreamState::Active { call, .. } => Some(call),
            _ => None,
        }
    }

    fn start(&mut self) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let request = &self.request;
        let call = self.bus.schedule(
            Arc::clone(&request.name),
            request.period,
            request.delay,
            request.unit,
            move |name: &str, key| match tx.try_send(TaskInfo::new(name, key)) {
                Ok(()) => {}
                Err(TrySendError::Full(info)) => {
                    warn!(
                        name = %info.name,
                        key = %info.key,
                        "schedule stream full, firing dropped"
                    );
                }
                // Receiver gone means the stream was dropped; cancel follows
                Err(TrySendError::Closed(_)) => {}
            },
        );
        debug!(name = %request.name, key = %call.key(), "schedule stream started");
        self.state = StreamState::Active { rx, call };
    }
}

impl<B> Stream for ScheduleStream<B>
where
    B: Deref<Target = TimerBus> + Unpin,
{
    type Item = TaskInfo;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if matches!(this.state, StreamState::Idle) {
            this.start();
        }

        let StreamState::Active { rx, .. } = &mut this.state else {
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(None) => {
                this.state = StreamState::Done;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<B> Drop for ScheduleStream<B> {
    fn drop(&mut self) {
        if let StreamState::Active { call, .. } = &self.state {
            if call.cancel() {
                debug!(name = %call.name(), "schedule stream dropped, registration canceled");
            }
        }
    }
}
