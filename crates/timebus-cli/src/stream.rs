//! `stream`: the stream adapter.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::{BoxStream, select_all};
use miette::Result;
use timebus::{TaskInfo, TimerBus};
use timebus_stream::{ScheduleRequest, SharedSchedule, schedule_stream};
use tracing::info;

use crate::{StopArgs, TaskArgs, consume, shutdown};

pub async fn stream(
    bus: TimerBus,
    task: TaskArgs,
    stop: StopArgs,
    subscribers: usize,
    replay: bool,
) -> Result<()> {
    let bus = Arc::new(bus);
    let request = ScheduleRequest::new(task.name, task.period, task.delay, task.unit.into());

    let events: BoxStream<'static, (Option<usize>, TaskInfo)> = if subscribers <= 1 && !replay {
        info!(name = %request.name, "streaming a cold schedule");
        schedule_stream(Arc::clone(&bus), request)
            .map(|firing| (None, firing))
            .boxed()
    } else {
        let shared = SharedSchedule::new(Arc::clone(&bus), request, replay);
        let subscribers = subscribers.max(1);
        info!(name = %shared.request().name, subscribers, replay, "streaming a shared schedule");
        let streams = (0..subscribers).map(|index| {
            shared
                .subscribe()
                .map(move |firing| (Some(index), firing))
                .boxed()
        });
        select_all(streams).boxed()
    };

    let printed = consume(events, stop).await?;
    info!(printed, "stream finished");
    shutdown(bus).await
}
