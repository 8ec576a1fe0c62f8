use std::ffi::CString;
use std::path::Path;
use std::process;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::Duration;

use calltrace::symbols::MARKER;
use calltrace::{Call, Printer, Result, SymbolSource, TraceEvent, TraceSender};
use nix::errno::Errno;
use nix::mqueue::{mq_close, mq_open, mq_send, MQ_OFlag};
use nix::sys::stat::Mode;

/// Construct a printer call with a readable, test-friendly syntax.
#[allow(unused)]
macro_rules! call {
    (> $name: expr) => {
        calltrace::Call::Enter($name)
    };
    (<) => {
        calltrace::Call::Exit
    };
}

/// Queue name unique to this test process and `tag`.
#[allow(unused)]
pub fn channel_name(tag: &str) -> String {
    format!("/calltrace-test-{}-{}", process::id(), tag)
}

/// True if a queue is currently linked under `name`.
#[allow(unused)]
pub fn channel_exists(name: &str) -> bool {
    let c_name = CString::new(name).unwrap();

    match mq_open(c_name.as_c_str(), MQ_OFlag::O_RDONLY, Mode::empty(), None) {
        Ok(mqd) => {
            mq_close(mqd).unwrap();
            true
        },
        Err(Errno::ENOENT) => false,
        Err(errno) => panic!("unexpected mq_open error: {errno}"),
    }
}

/// Wait for the tracer to create `name`, then attach to it.
#[allow(unused)]
pub fn connect(name: &str) -> TraceSender {
    loop {
        match TraceSender::connect(name) {
            Ok(sender) => return sender,
            Err(_) => sleep(Duration::from_millis(5)),
        }
    }
}

#[allow(unused)]
pub fn send_all(name: &str, events: &[TraceEvent]) {
    let sender = connect(name);

    for event in events {
        sender.send(event).unwrap();
    }
}

/// Send `message` to `name` as-is, bypassing the event encoder.
#[allow(unused)]
pub fn send_raw(name: &str, message: &[u8]) {
    let c_name = CString::new(name).unwrap();
    let mqd = mq_open(c_name.as_c_str(), MQ_OFlag::O_WRONLY, Mode::empty(), None).unwrap();

    mq_send(&mqd, message, 0).unwrap();
    mq_close(mqd).unwrap();
}

/// Render `calls` and return the printed text.
#[allow(unused)]
pub fn render(calls: &[Call<'_>]) -> String {
    let mut printer = Printer::new(Vec::<u8>::new());

    for &call in calls {
        printer.handle(call).unwrap();
    }
    printer.finish().unwrap();

    String::from_utf8(printer.into_inner()).unwrap()
}

/// Symbol source serving a fixed listing and recording each request.
#[derive(Clone, Default)]
pub struct CannedSymbols {
    symbols: Vec<(u64, String)>,
    log: Arc<Mutex<Vec<String>>>,
}

#[allow(unused)]
impl CannedSymbols {
    pub fn new(symbols: &[(u64, &str)]) -> Self {
        let symbols = symbols
            .iter()
            .map(|&(addr, name)| (addr, name.to_owned()))
            .collect();

        Self { symbols, log: Default::default() }
    }

    /// Listing of an instrumented binary: `symbols` plus the hook marker.
    pub fn instrumented(symbols: &[(u64, &str)]) -> Self {
        let mut canned = Self::new(symbols);
        canned.symbols.push((0xdead_0000, MARKER.to_owned()));
        canned
    }

    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }
}

impl SymbolSource for CannedSymbols {
    fn symbols(&self, binary: &Path) -> Result<Vec<(u64, String)>> {
        self.log.lock().unwrap().push(format!("symbols {}", binary.display()));
        Ok(self.symbols.clone())
    }
}
