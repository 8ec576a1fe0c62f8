pub mod channel;
pub mod cmd;
pub mod error;
pub mod event;
pub mod printer;
pub mod shutdown;
pub mod symbols;
pub mod tracer;

pub use channel::{TraceChannel, TraceSender, CHANNEL_NAME};
pub use cmd::{Command, Tracee};
pub use error::{Error, Result};
pub use event::TraceEvent;
pub use printer::{Call, Printer};
pub use symbols::{Nm, SymbolSource, SymbolTable};
pub use tracer::{SessionEnd, Tracer};
