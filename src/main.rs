/*!
 * Tickflow - Demo Entry Point
 *
 * Drives a scheduler from a simulated host loop:
 * - 60 Hz frame loop (update, async, late update)
 * - 50 Hz fixed-step loop
 * - worker-thread and parallel-job processes alongside
 *
 * Configuration comes from TICKFLOW_* environment variables.
 */

use anyhow::Context as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

use tickflow::{
    init_tracing, Context, ContextMask, FrameTime, Poll, ProcessBuilder, Scheduler, Task, Tick,
};

const FRAME_STEP: Duration = Duration::from_micros(16_667);
const FIXED_STEP: Duration = Duration::from_millis(20);
const MAX_FRAMES: u64 = 600;

/// Moves toward a target in both the frame and fixed-step loops
struct Mover {
    position: f64,
    target: f64,
    fixed_steps: u64,
}

impl Task for Mover {
    fn contexts(&self) -> ContextMask {
        Context::Update | Context::FixedUpdate
    }

    fn poll(&mut self, tick: &Tick) -> Poll {
        match tick.context {
            Context::FixedUpdate => {
                self.fixed_steps += 1;
                Poll::Continue
            }
            _ => {
                self.position += tick.delta.as_secs_f64() * 2.0;
                Poll::keep_going(self.position < self.target)
            }
        }
    }

    fn on_stop(&mut self, reason: tickflow::StopReason) {
        info!(
            position = self.position,
            fixed_steps = self.fixed_steps,
            ?reason,
            "Mover stopped"
        );
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Tickflow demo starting...");
    let scheduler = Scheduler::builder()
        .with_env()
        .context("invalid TICKFLOW_* environment")?
        .build()?;

    let mover = scheduler.submit(
        ProcessBuilder::new().name("mover").task(Mover {
            position: 0.0,
            target: 4.0,
            fixed_steps: 0,
        }),
    )?;

    let mut countdown = 90u32;
    scheduler.submit(
        ProcessBuilder::new()
            .name("countdown")
            .context(Context::LateUpdate)
            .callback(move |_| {
                countdown -= 1;
                Poll::keep_going(countdown > 0)
            }),
    )?;

    let slices = Arc::new(AtomicU64::new(0));
    let deferred_slices = Arc::clone(&slices);
    scheduler.submit(
        ProcessBuilder::new()
            .name("deferred")
            .deferred(true)
            .callback(move |_| {
                let done = deferred_slices.fetch_add(1, Ordering::Relaxed) + 1;
                Poll::keep_going(done < 240)
            }),
    )?;

    let worker_ticks = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&worker_ticks);
    scheduler.run(Context::Thread, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
        Poll::Continue
    })?;

    let job = scheduler.spawn_job(|| thread::sleep(Duration::from_millis(250)))?;

    info!("Entering host loop");
    let started = Instant::now();
    let mut accumulator = Duration::ZERO;
    let mut frames = 0;
    while frames < MAX_FRAMES && !(mover.is_finished() && job.is_finished()) {
        accumulator += FRAME_STEP;
        while accumulator >= FIXED_STEP {
            scheduler.fixed_update(FrameTime::new(FIXED_STEP));
            accumulator -= FIXED_STEP;
        }
        scheduler.frame(FrameTime::new(FRAME_STEP));
        frames += 1;
        thread::sleep(FRAME_STEP);
    }

    info!(
        frames,
        wall_ms = started.elapsed().as_millis() as u64,
        deferred_slices = slices.load(Ordering::Relaxed),
        worker_ticks = worker_ticks.load(Ordering::Relaxed),
        mover = %mover.state(),
        job = %job.state(),
        "Host loop finished"
    );

    let cleared = scheduler.clear();
    scheduler.update(FrameTime::new(FRAME_STEP));
    scheduler.shutdown();
    info!(cleared, "Scheduler stopped");

    println!("{}", serde_json::to_string_pretty(&scheduler.stats())?);
    Ok(())
}
