//! Address to function name resolution from a binary's exported symbols.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::{Error, Result};

/// Symbol every instrumented binary defines: the function entry hook.
pub const MARKER: &str = "__cyg_profile_func_enter";

/// Name reported for addresses missing from the table.
pub const UNKNOWN: &str = "??";

/// Produces `(address, name)` pairs for a binary.
pub trait SymbolSource {
    fn symbols(&self, binary: &Path) -> Result<Vec<(u64, String)>>;
}

/// Symbols listed by an external `nm`-style tool.
#[derive(Clone, Debug)]
pub struct Nm {
    program: OsString,
    args: Vec<OsString>,
}

impl Nm {
    pub fn new(program: impl Into<OsString>) -> Self {
        let program = program.into();
        let args = vec![];

        Self { program, args }
    }

    /// Extra arguments passed before the binary path, e.g. `-C`.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn display_program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl Default for Nm {
    fn default() -> Self {
        Self::new("nm")
    }
}

impl SymbolSource for Nm {
    fn symbols(&self, binary: &Path) -> Result<Vec<(u64, String)>> {
        debug!(program = ?self.program, ?binary, "listing symbols");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(binary)
            .output()
            .map_err(|source| Error::SymbolToolSpawn { program: self.display_program(), source })?;

        if !output.status.success() {
            return Err(Error::SymbolToolFailed {
                program: self.display_program(),
                status: output.status,
            });
        }

        let listing = String::from_utf8_lossy(&output.stdout);

        Ok(parse_listing(&listing))
    }
}

/// Parse every `<hex-address> <type-char> <name...>` line, skipping the rest.
pub fn parse_listing(listing: &str) -> Vec<(u64, String)> {
    listing
        .lines()
        .filter_map(parse_line)
        .map(|(addr, name)| (addr, name.to_owned()))
        .collect()
}

/// Parse one symbol listing line. Names may contain spaces.
pub fn parse_line(line: &str) -> Option<(u64, &str)> {
    let mut fields = line.splitn(3, ' ');

    let addr = fields.next()?;
    let kind = fields.next()?;
    let name = fields.next()?;

    if addr.is_empty() || !addr.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let mut kind = kind.chars();
    match (kind.next(), kind.next()) {
        (Some(c), None) if !c.is_whitespace() => {},
        _ => return None,
    }

    let name = name.trim_end();
    if name.is_empty() {
        return None;
    }

    let addr = u64::from_str_radix(addr, 16).ok()?;

    Some((addr, name))
}

/// Immutable address to name map for one traced binary.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    names: BTreeMap<u64, String>,
}

impl SymbolTable {
    /// List the symbols of `binary` and check it carries the instrumentation hooks.
    pub fn load(binary: impl AsRef<Path>, source: &dyn SymbolSource) -> Result<Self> {
        let binary = binary.as_ref();
        let symbols = source.symbols(binary)?;

        if symbols.is_empty() {
            return Err(Error::NoSymbols { binary: binary.to_owned() });
        }

        let table = Self::build(symbols);

        if !table.contains_name(MARKER) {
            return Err(Error::NotInstrumented { binary: binary.to_owned() });
        }

        debug!(?binary, symbols = table.len(), "loaded symbol table");

        Ok(table)
    }

    /// Build a table from an in-memory listing, applying the instrumentation check.
    pub fn from_symbols<I, S>(symbols: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, S)>,
        S: Into<String>,
    {
        let table = Self::build(symbols);

        if !table.contains_name(MARKER) {
            return Err(Error::NotInstrumented { binary: Default::default() });
        }

        Ok(table)
    }

    fn build<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = (u64, S)>,
        S: Into<String>,
    {
        // Aliases at one address: the last listed name wins.
        let names = symbols
            .into_iter()
            .map(|(addr, name)| (addr, name.into()))
            .collect();

        Self { names }
    }

    pub fn resolve(&self, addr: u64) -> &str {
        self.names
            .get(&addr)
            .map(String::as_str)
            .unwrap_or(UNKNOWN)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.values().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
