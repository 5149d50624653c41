//! Multi-device scheduler.
//!
//! One worker thread per device, each owning a single-slot mailbox guarded
//! by a mutex and condition variable. The main thread is the sole
//! submitter and the sole consumer of completion via [`Device::await_idle`].

#![cfg(feature = "std")]

pub mod parallel;

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::{TensorcError, TensorcResult};

type Task = Box<dyn FnOnce() -> TensorcResult<()> + Send>;

enum MailboxState {
    Empty,
    Task(Task),
    Running,
    ShuttingDown,
}

struct Mailbox {
    state: Mutex<MailboxState>,
    cond: Condvar,
    last_error: Mutex<Option<TensorcError>>,
}

impl Mailbox {
    fn new() -> Self {
        Mailbox {
            state: Mutex::new(MailboxState::Empty),
            cond: Condvar::new(),
            last_error: Mutex::new(None),
        }
    }
}

fn worker_loop(mailbox: Arc<Mailbox>) {
    loop {
        let task = {
            let mut guard = mailbox
                .state
                .lock()
                .expect("scheduler mailbox mutex poisoned");
            loop {
                match &*guard {
                    MailboxState::Task(_) => break,
                    MailboxState::ShuttingDown => return,
                    _ => {}
                }
                guard = mailbox
                    .cond
                    .wait(guard)
                    .expect("scheduler mailbox mutex poisoned");
            }
            let task = match core::mem::replace(&mut *guard, MailboxState::Running) {
                MailboxState::Task(task) => task,
                _ => unreachable!("checked above"),
            };
            task
        };
        let result = task();
        if let Err(err) = result {
            *mailbox
                .last_error
                .lock()
                .expect("scheduler mailbox mutex poisoned") = Some(err);
        }
        let mut guard = mailbox
            .state
            .lock()
            .expect("scheduler mailbox mutex poisoned");
        *guard = MailboxState::Empty;
        mailbox.cond.notify_all();
    }
}

/// One worker thread bound to a single device ordinal.
pub struct Device {
    ordinal: usize,
    mailbox: Arc<Mailbox>,
    thread: Option<JoinHandle<()>>,
}

impl Device {
    pub fn spawn(ordinal: usize) -> Self {
        let mailbox = Arc::new(Mailbox::new());
        let thread_mailbox = mailbox.clone();
        let thread = std::thread::Builder::new()
            .name(alloc::format!("tensorc-device-{ordinal}"))
            .spawn(move || worker_loop(thread_mailbox))
            .expect("failed to spawn device worker thread");
        Device {
            ordinal,
            mailbox,
            thread: Some(thread),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Installs `task` in this device's mailbox. Blocks until the
    /// previous task (if any) has been consumed, since the mailbox holds
    /// only a single slot.
    pub fn submit(&self, task: impl FnOnce() -> TensorcResult<()> + Send + 'static) {
        let mut guard = self
            .mailbox
            .state
            .lock()
            .expect("scheduler mailbox mutex poisoned");
        while matches!(*guard, MailboxState::Task(_) | MailboxState::Running) {
            guard = self
                .mailbox
                .cond
                .wait(guard)
                .expect("scheduler mailbox mutex poisoned");
        }
        *guard = MailboxState::Task(Box::new(task));
        self.mailbox.cond.notify_all();
    }

    /// Blocks until the device's queue is drained, then surfaces the last
    /// task's error, if any — the device is considered poisoned once an
    /// error is reported, per the propagation policy the caller enforces.
    pub fn await_idle(&self) -> TensorcResult<()> {
        let mut guard = self
            .mailbox
            .state
            .lock()
            .expect("scheduler mailbox mutex poisoned");
        while matches!(*guard, MailboxState::Task(_) | MailboxState::Running) {
            guard = self
                .mailbox
                .cond
                .wait(guard)
                .expect("scheduler mailbox mutex poisoned");
        }
        drop(guard);
        self.mailbox
            .last_error
            .lock()
            .expect("scheduler mailbox mutex poisoned")
            .take()
            .map_or(Ok(()), Err)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        {
            let mut guard = match self.mailbox.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = MailboxState::ShuttingDown;
            self.mailbox.cond.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A pool of worker threads, one per device ordinal 0..N.
pub struct Scheduler {
    devices: Vec<Device>,
}

impl Scheduler {
    /// Spawns exactly `n` worker threads, one per ordinal `0..n`. The
    /// scheduler has no backend handle of its own to clamp against;
    /// callers that need `n` bounded by `Backend::num_devices()` must
    /// do that check themselves before calling this.
    pub fn new(n: usize) -> Self {
        Scheduler {
            devices: (0..n).map(Device::spawn).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, ordinal: usize) -> &Device {
        &self.devices[ordinal]
    }

    pub fn await_all(&self) -> TensorcResult<()> {
        for device in &self.devices {
            device.await_idle()?;
        }
        Ok(())
    }
}
