use std::env;
use std::ffi::OsString;
use std::process;

use anyhow::Context;
use calltrace::{Command, Nm, Tracer};
use structopt::clap::{AppSettings, ErrorKind};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

/// Render a live call tree of an instrumented program on stderr.
#[derive(Debug, StructOpt)]
#[structopt(name = "tracer", setting = AppSettings::TrailingVarArg)]
struct Opt {
    /// Trace channel name, as compiled into the instrumentation hooks.
    #[structopt(long, env = "CALLTRACE_CHANNEL", default_value = "/calltrace")]
    channel: String,

    /// Symbol listing tool.
    #[structopt(long, env = "CALLTRACE_NM", default_value = "nm", parse(from_os_str))]
    nm: OsString,

    /// Instrumented program, followed by its arguments.
    #[structopt(required = true, min_values = 1, allow_hyphen_values = true, parse(from_os_str))]
    command: Vec<OsString>,
}

fn main() -> anyhow::Result<()> {
    let opt = match Opt::from_iter_safe(env::args_os()) {
        Ok(opt) => opt,
        Err(err) if err.kind == ErrorKind::HelpDisplayed || err.kind == ErrorKind::VersionDisplayed => err.exit(),
        Err(err) => {
            println!("{}", err.message);
            process::exit(1);
        },
    };

    init_logging();

    // Clap guarantees at least one value.
    let cmd = Command::new(&opt.command[0]).args(&opt.command[1..]);

    let mut tracer = Tracer::new();
    tracer.set_channel_name(opt.channel);
    tracer.set_symbol_source(Nm::new(opt.nm));

    let end = tracer
        .run(&cmd)
        .with_context(|| format!("tracing {}", cmd.program().display()))?;

    tracing::debug!(?end, "done");

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
