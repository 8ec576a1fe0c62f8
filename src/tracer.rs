//! Trace session supervisor.

use std::io::{self, Write};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::channel::{TraceChannel, CHANNEL_NAME};
use crate::cmd::Command;
use crate::error::Result;
use crate::event::TraceEvent;
use crate::printer::{Call, Printer, INDENT};
use crate::shutdown::{self, Shutdown, State};
use crate::symbols::{Nm, SymbolSource, SymbolTable};

/// How a trace session ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionEnd {
    /// The traced program sent the terminate sentinel.
    Terminated,

    /// The receive loop was stopped by a second interrupt.
    Forced,
}

/// Runs an instrumented program and renders its calls as they happen.
pub struct Tracer {
    channel_name: String,
    indent: String,
    source: Box<dyn SymbolSource>,
    reap_grace: Duration,
    poll_delay: Duration,
}

impl Tracer {
    pub fn new() -> Self {
        Self {
            channel_name: CHANNEL_NAME.to_owned(),
            indent: INDENT.to_owned(),
            source: Box::new(Nm::default()),
            reap_grace: Duration::from_secs(1),
            poll_delay: Duration::from_millis(10),
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Queue name to create. Must match the name compiled into the hooks.
    pub fn set_channel_name(&mut self, name: impl Into<String>) {
        self.channel_name = name.into();
    }

    pub fn set_indent(&mut self, indent: impl Into<String>) {
        self.indent = indent.into();
    }

    pub fn set_symbol_source(&mut self, source: impl SymbolSource + 'static) {
        self.source = Box::new(source);
    }

    /// Time the program gets to exit after sending the terminate sentinel, before it is killed.
    pub fn reap_grace(&self) -> Duration {
        self.reap_grace
    }

    pub fn set_reap_grace(&mut self, grace: Duration) {
        self.reap_grace = grace;
    }

    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    pub fn set_poll_delay(&mut self, poll_delay: Duration) {
        self.poll_delay = poll_delay;
    }

    /// Trace `cmd`, rendering the call tree to stderr.
    pub fn run(&mut self, cmd: &Command) -> Result<SessionEnd> {
        self.run_to(cmd, io::stderr())
    }

    /// Trace `cmd`, rendering the call tree to `out`.
    ///
    /// Fails before creating the channel or spawning anything if the program is not
    /// instrumented. Once the channel exists, it is unlinked on every return path.
    pub fn run_to<W: Write>(&mut self, cmd: &Command, out: W) -> Result<SessionEnd> {
        let cmd = cmd.clone().resolve();
        let symbols = SymbolTable::load(cmd.program(), self.source.as_ref())?;

        let session = shutdown::session();
        session.reset();
        let _interrupts = shutdown::install()?;

        let mut channel = TraceChannel::open(&self.channel_name)?;
        let mut tracee = cmd.spawn()?;
        session.set_child(Some(tracee.pid()));

        let mut printer = Printer::with_indent(out, self.indent.clone());
        let end = receive(&mut channel, &symbols, &mut printer, session);

        let finished = printer.finish();
        if let Err(err) = channel.close() {
            warn!(%err, "unable to unlink trace channel");
        }
        session.set_child(None);

        let end = end?;
        debug!(?end, "trace session ended");

        match end {
            SessionEnd::Terminated => tracee.reap(self.reap_grace, self.poll_delay)?,
            SessionEnd::Forced => tracee.kill()?,
        };

        finished?;

        Ok(end)
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

fn receive<W: Write>(
    channel: &mut TraceChannel,
    symbols: &SymbolTable,
    printer: &mut Printer<W>,
    session: &Shutdown,
) -> Result<SessionEnd> {
    let mut announced = false;

    while session.should_continue() {
        if !announced && session.state() == State::Stopping {
            printer.note("Stopping...")?;
            announced = true;
        }

        // A second interrupt landing between the check above and the start of the blocking
        // receive does not interrupt it. The loop then stops on the next message or interrupt.
        let event = match channel.receive() {
            Ok((message, _)) => TraceEvent::decode(message),
            Err(err) if err.is_transient() => {
                warn!(%err, "receive interrupted, retrying");
                continue;
            },
            Err(err) => return Err(err),
        };

        trace!(?event, "received");

        match event {
            Ok(TraceEvent::Enter(addr)) => printer.handle(Call::Enter(symbols.resolve(addr)))?,
            Ok(TraceEvent::Exit(_)) => printer.handle(Call::Exit)?,
            Ok(TraceEvent::Terminate) => return Ok(SessionEnd::Terminated),
            Err(err) => warn!(%err, "dropping trace message"),
        }
    }

    Ok(SessionEnd::Forced)
}
