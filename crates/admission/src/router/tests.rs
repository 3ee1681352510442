use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use clipdeck_core::{PipelineConfig, PriorityLevel, ProcessingError, RequestId};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::job::{Job, JobControl};
use super::{ExecutionContextRouter, Work};

fn router(toml: &str) -> ExecutionContextRouter {
    let config = PipelineConfig::from_toml(toml).unwrap();
    ExecutionContextRouter::from_config(&config).unwrap()
}

/// A job that parks its worker until the returned sender fires or drops.
fn blocker() -> (Work, mpsc::Sender<()>) {
    let (tx, rx) = mpsc::channel::<()>();
    let work: Work = Box::new(move || {
        let _ = rx.recv();
        Ok(Bytes::new())
    });
    (work, tx)
}

fn recording(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Work {
    let log = Arc::clone(log);
    Box::new(move || {
        log.lock().unwrap().push(label);
        Ok(Bytes::from_static(label.as_bytes()))
    })
}

const ONE_SHARED_CONTEXT: &str = r#"
[priority_context_map]
background = "shared"
utility = "shared"
userInitiated = "shared"
userInteractive = "shared"
"#;

#[test]
fn default_table_gives_each_level_its_own_context() {
    let r = router("");
    assert_eq!(r.contexts().len(), 4);
    assert_eq!(r.route(PriorityLevel::Background), "background");
    assert_eq!(r.route(PriorityLevel::UserInteractive), "user-interactive");
    for level in PriorityLevel::ALL {
        let ctx = r.context(r.route(level)).unwrap();
        assert!(ctx.tier() >= level, "{level} routed below its priority");
    }
}

#[test]
fn merged_context_takes_the_highest_tier() {
    let r = router(
        r#"
[priority_context_map]
background = "low"
utility = "low"
userInitiated = "high"
userInteractive = "high"
"#,
    );
    assert_eq!(r.contexts().len(), 2);
    assert_eq!(r.context("low").unwrap().tier(), PriorityLevel::Utility);
    assert_eq!(r.context("high").unwrap().tier(), PriorityLevel::UserInteractive);
    assert_eq!(r.route(PriorityLevel::Background), "low");
}

#[tokio::test]
async fn dispatch_runs_work_on_the_routed_context() {
    let r = router("");
    let work: Work = Box::new(|| {
        let name = std::thread::current().name().unwrap_or_default().to_string();
        Ok(Bytes::from(name))
    });
    let dispatched = r.dispatch(RequestId::new(), PriorityLevel::UserInitiated, work);
    assert_eq!(dispatched.context(), "user-initiated");

    let thread = dispatched.result.await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&thread).starts_with("clipdeck-user-initiated-"));
    assert_eq!(r.stats().dispatched, 1);
}

#[tokio::test]
async fn shared_context_runs_higher_priority_first() {
    let r = router(ONE_SHARED_CONTEXT);
    let log = Arc::new(Mutex::new(Vec::new()));

    let (block, gate) = blocker();
    let blocked = r.dispatch(RequestId::new(), PriorityLevel::Background, block);
    assert!(blocked.control.has_started());

    let bg = r.dispatch(RequestId::new(), PriorityLevel::Background, recording("background", &log));
    let ui = r.dispatch(RequestId::new(), PriorityLevel::UserInteractive, recording("interactive", &log));
    assert_eq!(r.queued(), 2);

    gate.send(()).unwrap();
    ui.result.await.unwrap().unwrap();
    bg.result.await.unwrap().unwrap();
    blocked.result.await.unwrap().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["interactive", "background"]);
}

#[tokio::test]
async fn withdrawn_job_never_runs() {
    let r = router(ONE_SHARED_CONTEXT);
    let (block, gate) = blocker();
    let _blocked = r.dispatch(RequestId::new(), PriorityLevel::Utility, block);

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let queued = r.dispatch(
        RequestId::new(),
        PriorityLevel::Utility,
        Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(Bytes::new())
        }),
    );

    assert!(r.withdraw(&queued.control));
    assert!(queued.control.is_cancelled());
    assert!(queued.result.await.is_err(), "reply sender dropped without a result");

    drop(gate);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(r.context("shared").unwrap().stats().skipped, 1);
}

#[tokio::test]
async fn running_job_cannot_be_withdrawn() {
    let r = router("");
    let (block, gate) = blocker();
    let running = r.dispatch(RequestId::new(), PriorityLevel::Utility, block);

    assert!(!r.withdraw(&running.control));
    gate.send(()).unwrap();
    assert!(running.result.await.unwrap().is_ok());
}

#[tokio::test]
async fn panicking_work_becomes_internal_error() {
    let r = router("");
    let boom: Work = Box::new(|| panic!("decoder exploded"));
    let dispatched = r.dispatch(RequestId::new(), PriorityLevel::UserInteractive, boom);

    match dispatched.result.await.unwrap() {
        Err(ProcessingError::Internal(msg)) => assert!(msg.contains("decoder exploded")),
        other => panic!("expected internal error, got {other:?}"),
    }

    // The context survives and keeps serving.
    let ok: Work = Box::new(|| Ok(Bytes::from_static(b"fine")));
    let next = r.dispatch(RequestId::new(), PriorityLevel::UserInteractive, ok);
    assert_eq!(next.result.await.unwrap().unwrap(), Bytes::from_static(b"fine"));

    let stats = r.context("user-interactive").unwrap().stats();
    assert_eq!(stats.panicked, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn aged_job_is_rerouted_to_the_higher_tier() {
    let r = router("aging_threshold_ms = 50");
    let (block, gate) = blocker();
    let _blocked = r.dispatch(RequestId::new(), PriorityLevel::Background, block);

    let waiting = r.dispatch(
        RequestId::new(),
        PriorityLevel::Background,
        Box::new(|| {
            let name = std::thread::current().name().unwrap_or_default().to_string();
            Ok(Bytes::from(name))
        }),
    );
    assert_eq!(r.context("background").unwrap().queued(), 1);
    assert_eq!(r.promote_aged(), 0, "not old enough yet");

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(r.promote_aged(), 1);

    let thread = waiting.result.await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&thread).starts_with("clipdeck-utility-"));

    let stats = r.stats();
    assert_eq!(stats.reroutes, 1);
    assert_eq!(r.context("background").unwrap().stats().rerouted_out, 1);
    assert_eq!(r.context("utility").unwrap().stats().rerouted_in, 1);
    drop(gate);
}

#[test]
fn job_cancelled_in_transit_is_dropped_on_arrival() {
    let r = router("");
    let dest = r.context("utility").unwrap();

    // Stands in for the admission slot a real job carries.
    let slot = Arc::new(());
    let held = Arc::clone(&slot);
    let control = Arc::new(JobControl::new(7));
    assert!(control.try_cancel());
    let (reply, mut result) = oneshot::channel();
    let job = Job {
        id: 7,
        request: RequestId::new(),
        base: PriorityLevel::Background,
        effective: PriorityLevel::Utility,
        queued_at: Instant::now(),
        control,
        work: Box::new(move || {
            let _held = held;
            Ok(Bytes::new())
        }),
        reply,
    };

    let returned = dest.accept_rerouted(job).expect("cancelled job handed back");
    assert_eq!(dest.queued(), 0);
    let stats = dest.stats();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.rerouted_in, 0);

    drop(returned);
    assert_eq!(Arc::strong_count(&slot), 1, "captures released with the job");
    assert!(result.try_recv().is_err());
}

#[tokio::test]
async fn aging_within_a_merged_context_reorders_in_place() {
    let r = router(
        r#"
aging_threshold_ms = 50

[priority_context_map]
background = "low"
utility = "low"
userInitiated = "high"
userInteractive = "high"
"#,
    );
    let (block, gate) = blocker();
    let _blocked = r.dispatch(RequestId::new(), PriorityLevel::Background, block);
    let _queued = r.dispatch(RequestId::new(), PriorityLevel::Background, Box::new(|| Ok(Bytes::new())));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(r.promote_aged(), 0, "utility is still served by 'low'");
    assert_eq!(r.context("low").unwrap().queued(), 1);
    drop(gate);
}

#[tokio::test]
async fn drain_cancels_everything_queued() {
    let r = router(ONE_SHARED_CONTEXT);
    let (block, gate) = blocker();
    let _blocked = r.dispatch(RequestId::new(), PriorityLevel::Utility, block);
    let a = r.dispatch(RequestId::new(), PriorityLevel::Utility, Box::new(|| Ok(Bytes::new())));
    let b = r.dispatch(RequestId::new(), PriorityLevel::Background, Box::new(|| Ok(Bytes::new())));

    assert_eq!(r.drain(), 2);
    assert!(a.control.is_cancelled());
    assert!(a.result.await.is_err());
    assert!(b.result.await.is_err());
    assert_eq!(r.queued(), 0);
    drop(gate);
}
