//! `run`: the callback interface.

use std::sync::Arc;

use miette::Result;
use timebus::{TaskInfo, TimerBus};
use timebus_stream::DEFAULT_STREAM_CAPACITY;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{StopArgs, TaskArgs, consume, shutdown};

pub async fn run(bus: TimerBus, task: TaskArgs, stop: StopArgs) -> Result<()> {
    let bus = Arc::new(bus);
    let (tx, rx) = mpsc::channel(DEFAULT_STREAM_CAPACITY);

    let call = bus.schedule(
        task.name,
        task.period,
        task.delay,
        task.unit.into(),
        move |name: &str, key| {
            if let Err(TrySendError::Full(info)) = tx.try_send(TaskInfo::new(name, key)) {
                warn!(key = %info.key, "output is behind, firing dropped");
            }
        },
    );
    info!(name = %call.name(), key = %call.key(), "task scheduled");

    // The channel closes once the scheduler drops the action
    let events = ReceiverStream::new(rx).map(|firing| (None, firing));
    let printed = consume(events, stop).await?;

    call.cancel();
    info!(printed, "run finished");
    shutdown(bus).await
}
