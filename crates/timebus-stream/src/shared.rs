//! One registration shared by every current subscriber.

use std::ops::Deref;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, ready};

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use timebus::{TaskInfo, TimerBus, TimerCall};

use crate::ScheduleRequest;

/// Default broadcast buffer per registration.
pub const DEFAULT_SHARED_CAPACITY: usize = 16;

/// Owned by the task action; dropped together with it, which closes every
/// subscriber's channel.
struct Fanout {
    tx: broadcast::Sender<TaskInfo>,
    latest: Option<TaskInfo>,
}

impl Fanout {
    fn publish(&mut self, info: TaskInfo) {
        self.latest = Some(info.clone());
        // No receivers is fine; they may all be between subscriptions
        let _ = self.tx.send(info);
    }
}

#[derive(Default)]
struct Registration {
    subscribers: usize,
    call: Option<TimerCall>,
    fanout: Weak<Mutex<Fanout>>,
}

struct Shared<B> {
    bus: B,
    request: ScheduleRequest,
    replay: bool,
    capacity: usize,
    registration: Mutex<Registration>,
}

impl<B> Shared<B>
where
    B: Deref<Target = TimerBus>,
{
    fn start(&self, registration: &mut Registration) -> Arc<Mutex<Fanout>> {
        let (tx, _) = broadcast::channel(self.capacity);
        let fanout = Arc::new(Mutex::new(Fanout { tx, latest: None }));
        let publisher = Arc::clone(&fanout);
        let request = &self.request;
        let call = self.bus.schedule(
            Arc::clone(&request.name),
            request.period,
            request.delay,
            request.unit,
            move |name: &str, key| publisher.lock().publish(TaskInfo::new(name, key)),
        );
        debug!(name = %request.name, key = %call.key(), "shared schedule started");
        registration.call = Some(call);
        registration.fanout = Arc::downgrade(&fanout);
        fanout
    }

    fn release(&self) {
        let mut registration = self.registration.lock();
        registration.subscribers = registration.subscribers.saturating_sub(1);
        if registration.subscribers > 0 {
            return;
        }
        registration.fanout = Weak::new();
        if let Some(call) = registration.call.take() {
            if call.cancel() {
                debug!(name = %self.request.name, "last subscriber gone, shared schedule canceled");
            }
        }
    }
}

/// A schedule that runs while at least one [`SharedStream`] is alive.
///
/// The first subscriber registers the task; later ones attach to the same
/// registration. When the last subscriber is dropped the registration is
/// canceled, and the next subscriber starts a fresh one. With `replay`, a
/// subscriber joining a running registration first receives the most recent
/// event.
pub struct SharedSchedule<B> {
    inner: Arc<Shared<B>>,
}

impl<B> Clone for SharedSchedule<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> SharedSchedule<B>
where
    B: Deref<Target = TimerBus>,
{
    pub fn new(bus: B, request: ScheduleRequest, replay: bool) -> Self {
        Self::with_capacity(bus, request, replay, DEFAULT_SHARED_CAPACITY)
    }

    /// Events beyond `capacity` unread by a subscriber are skipped for it.
    pub fn with_capacity(bus: B, request: ScheduleRequest, replay: bool, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Shared {
                bus,
                request,
                replay,
                capacity: capacity.max(1),
                registration: Mutex::new(Registration::default()),
            }),
        }
    }

    pub fn request(&self) -> &ScheduleRequest {
        &self.inner.request
    }

    /// Number of live subscribers.
    pub fn subscribers(&self) -> usize {
        self.inner.registration.lock().subscribers
    }

    /// Whether a registration is currently live. False once the last
    /// subscriber is gone, a one-shot task has fired, or the scheduler exited.
    pub fn is_active(&self) -> bool {
        let registration = self.inner.registration.lock();
        registration.call.is_some() && registration.fanout.strong_count() > 0
    }

    pub fn subscribe(&self) -> SharedStream<B> {
        let mut registration = self.inner.registration.lock();
        // A finished one-shot or an exited bus leaves a dead weak reference
        let fanout = match registration.fanout.upgrade() {
            Some(fanout) => fanout,
            None => self.inner.start(&mut registration),
        };
        registration.subscribers += 1;

        // Subscribe and read the latest event under the fanout lock so the
        // replayed event is never also delivered through the channel.
        let (rx, replay) = {
            let fanout = fanout.lock();
            let replay = if self.inner.replay {
                fanout.latest.clone()
            } else {
                None
            };
            (fanout.tx.subscribe(), replay)
        };
        drop(registration);

        SharedStream {
            replay,
            events: BroadcastStream::new(rx),
            owner: Arc::clone(&self.inner),
        }
    }
}

/// One subscriber of a [`SharedSchedule`].
pub struct SharedStream<B>
where
    B: Deref<Target = TimerBus>,
{
    replay: Option<TaskInfo>,
    events: BroadcastStream<TaskInfo>,
    owner: Arc<Shared<B>>,
}

impl<B> Stream for SharedStream<B>
where
    B: Deref<Target = TimerBus>,
{
    type Item = TaskInfo;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(info) = this.replay.take() {
            return Poll::Ready(Some(info));
        }
        loop {
            match ready!(this.events.poll_next_unpin(cx)) {
                Some(Ok(info)) => return Poll::Ready(Some(info)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(
                        name = %this.owner.request.name,
                        skipped,
                        "shared schedule subscriber lagged"
                    );
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

impl<B> Drop for SharedStream<B>
where
    B: Deref<Target = TimerBus>,
{
    fn drop(&mut self) {
        self.owner.release();
    }
}
