//! Process-wide shared timer for low-frequency periodic tasks.
//!
//! One background thread ticks every second and runs every registered
//! task. Tasks report their own expiry (typically "the thing I hold a
//! weak reference to is gone") and expired tasks are pruned, so a
//! periodic task never keeps its subject alive.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

/// Tick period of the shared timer.
const PERIOD: Duration = Duration::from_secs(1);

/// A task run on every timer tick until it reports expiry.
pub trait ExpirablePeriodicTask: Send + Sync + 'static {
    /// Whether the task should be dropped instead of run.
    fn is_expired(&self) -> bool;

    /// One tick of work. Must be short; every task shares one thread.
    fn run(&self);
}

struct Registry {
    tasks: Mutex<Vec<Arc<dyn ExpirablePeriodicTask>>>,
}

static REGISTRY: OnceLock<&'static Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let live: &'static Registry = Box::leak(Box::new(Registry {
            tasks: Mutex::new(Vec::new()),
        }));
        std::thread::Builder::new()
            .name("ironwood-shared-timer".to_owned())
            .spawn(move || {
                loop {
                    std::thread::sleep(PERIOD);
                    let tasks: Vec<Arc<dyn ExpirablePeriodicTask>> = {
                        let mut tasks = live.tasks.lock();
                        tasks.retain(|task| !task.is_expired());
                        tasks.clone()
                    };
                    for task in tasks {
                        task.run();
                    }
                }
            })
            .expect("spawn shared timer thread");
        live
    })
}

/// The process-wide periodic timer.
pub struct SharedTimer;

impl SharedTimer {
    /// Register a task to run once per tick until it expires.
    pub fn register(task: Arc<dyn ExpirablePeriodicTask>) {
        debug!("registering shared-timer task");
        registry().tasks.lock().push(task);
    }

    /// Number of live registered tasks. Expired tasks linger until the
    /// next tick prunes them.
    #[must_use]
    pub fn task_count() -> usize {
        registry().tasks.lock().len()
    }
}
