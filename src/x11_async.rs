//! X11 Async Event Stream
//!
//! Lets the tokio loop sleep until the X11 socket is readable, using a mio
//! poller on a blocking task.

use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use tokio::sync::{Notify, oneshot};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

/// X11 event stream with async readiness notification
pub struct X11EventStream {
    conn: Arc<RustConnection>,
    notify: Arc<Notify>,
    _task_guard: oneshot::Receiver<()>,
}

impl X11EventStream {
    /// Register the X11 socket with mio and start the polling task
    ///
    /// The task exits once the stream is dropped.
    pub fn new(conn: Arc<RustConnection>) -> Result<Self> {
        let fd = conn.stream().as_raw_fd();
        let notify = Arc::new(Notify::new());
        let task_notify = notify.clone();

        let (guard, task_guard) = oneshot::channel::<()>();
        let mut poll = mio::Poll::new()
            .context("Failed to create mio Poll")?;
        let mut events = mio::Events::with_capacity(1);

        poll.registry()
            .register(
                &mut mio::unix::SourceFd(&fd),
                mio::Token(0),
                mio::Interest::READABLE,
            )
            .context("Failed to register X11 FD with mio")?;

        let timeout = Duration::from_millis(100);
        tokio::task::spawn_blocking(move || {
            loop {
                if guard.is_closed() {
                    tracing::info!("X11 socket polling thread shutting down");
                    return;
                }

                if let Err(err) = poll.poll(&mut events, Some(timeout)) {
                    tracing::warn!("X11 socket poll failed: {:?}", err);
                    continue;
                }

                if events.iter().any(|event| event.token() == mio::Token(0)) {
                    task_notify.notify_one();
                }
            }
        });

        Ok(Self {
            conn,
            notify,
            _task_guard: task_guard,
        })
    }

    /// Every event already buffered by the connection, without blocking
    pub fn drain(&self) -> Result<Vec<Event>> {
        let mut pending = Vec::new();
        while let Some(event) = self.conn.poll_for_event()? {
            pending.push(event);
        }
        Ok(pending)
    }

    /// Resolves once the X11 socket has data
    pub async fn wait_readable(&self) {
        self.notify.notified().await;
    }

    /// Flush queued requests; called once per loop iteration to batch them
    pub fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }
}
