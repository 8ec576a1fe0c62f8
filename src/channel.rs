//! Named, single-slot message queue between instrumentation hooks and the tracer.
//!
//! The queue holds at most one pending message. A hook blocks in `send` until the tracer
//! has drained the previous event, so events arrive in emission order and none are lost.

use std::ffi::CString;

use nix::{
    errno::Errno,
    mqueue::{mq_close, mq_open, mq_receive, mq_send, mq_unlink, MqAttr, MqdT, MQ_OFlag},
    sys::stat::Mode,
};
use tracing::{debug, warn};

use crate::error::{Error, Result, ResultExt};
use crate::event::TraceEvent;

/// Rendezvous name compiled into the instrumentation hooks.
pub const CHANNEL_NAME: &str = "/calltrace";

/// Maximum size of one wire message, in bytes.
pub const MESSAGE_SIZE: usize = 64;

/// Receiving end, owned by the tracer.
///
/// The queue name is unlinked when the channel is closed or dropped.
pub struct TraceChannel {
    name: String,
    c_name: CString,
    mqd: Option<MqdT>,
    buf: Vec<u8>,
}

impl TraceChannel {
    /// Create the queue `name`, replacing any stale queue left under that name.
    pub fn open(name: &str) -> Result<Self> {
        let c_name = c_name(name)?;

        match mq_unlink(c_name.as_c_str()) {
            Ok(()) => debug!(channel = name, "replaced stale trace channel"),
            Err(Errno::ENOENT) => {},
            Err(source) => return Err(Error::Channel { name: name.to_owned(), source }),
        }

        let attr = MqAttr::new(0, 1, MESSAGE_SIZE as _, 0);
        let flags = MQ_OFlag::O_CREAT | MQ_OFlag::O_EXCL | MQ_OFlag::O_RDONLY;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;

        let mqd = mq_open(c_name.as_c_str(), flags, mode, Some(&attr))
            .map_err(|source| Error::Channel { name: name.to_owned(), source })?;

        debug!(channel = name, "opened trace channel");

        Ok(Self {
            name: name.to_owned(),
            c_name,
            mqd: Some(mqd),
            buf: vec![0; MESSAGE_SIZE],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until a message arrives, then return its payload and priority.
    ///
    /// Returns [`Error::Interrupted`] if a signal arrived while waiting.
    pub fn receive(&mut self) -> Result<(&[u8], u32)> {
        let mqd = match &self.mqd {
            Some(mqd) => mqd,
            None => return Err(Error::Channel { name: self.name.clone(), source: Errno::EBADF }),
        };

        let mut priority = 0;
        let len = mq_receive(mqd, &mut self.buf, &mut priority).channel(&self.name)?;

        Ok((&self.buf[..len], priority))
    }

    /// Close the descriptor and remove the queue name, so no process can attach anymore.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let mqd = match self.mqd.take() {
            Some(mqd) => mqd,
            None => return Ok(()),
        };

        if let Err(errno) = mq_close(mqd) {
            warn!(channel = %self.name, %errno, "unable to close trace channel");
        }

        mq_unlink(self.c_name.as_c_str()).channel(&self.name)?;
        debug!(channel = %self.name, "unlinked trace channel");

        Ok(())
    }
}

impl Drop for TraceChannel {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(channel = %self.name, %err, "unable to unlink trace channel");
        }
    }
}

/// Sending end, as used by instrumentation hooks.
pub struct TraceSender {
    name: String,
    mqd: Option<MqdT>,
}

impl TraceSender {
    /// Attach to an existing channel. Fails if the tracer has not created it.
    pub fn connect(name: &str) -> Result<Self> {
        let c_name = c_name(name)?;

        let mqd = mq_open(c_name.as_c_str(), MQ_OFlag::O_WRONLY, Mode::empty(), None)
            .map_err(|source| Error::Channel { name: name.to_owned(), source })?;

        Ok(Self { name: name.to_owned(), mqd: Some(mqd) })
    }

    /// Send one event, blocking while the slot is occupied.
    pub fn send(&self, event: &TraceEvent) -> Result<()> {
        let mqd = match &self.mqd {
            Some(mqd) => mqd,
            None => return Err(Error::Channel { name: self.name.clone(), source: Errno::EBADF }),
        };

        let message = event.encode();

        loop {
            match mq_send(mqd, message.as_bytes(), 0).channel(&self.name) {
                Err(err) if err.is_transient() => continue,
                result => return result,
            }
        }
    }
}

impl Drop for TraceSender {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take() {
            let _ = mq_close(mqd);
        }
    }
}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| Error::Channel { name: name.to_owned(), source: Errno::EINVAL })
}
