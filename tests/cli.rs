use std::process::Command;

use anyhow::Result;
use ntest::timeout;

const TRACER: &str = env!("CARGO_BIN_EXE_tracer");

#[test]
#[timeout(5000)]
fn test_missing_program_is_usage_error() -> Result<()> {
    let output = Command::new(TRACER).output()?;

    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("USAGE"), "{stdout}");

    Ok(())
}

#[test]
#[timeout(5000)]
fn test_uninstrumented_program_fails_before_tracing() -> Result<()> {
    let output = Command::new(TRACER)
        .args(&["--channel", "/calltrace-cli-test", "true"])
        .output()?;

    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("Error"), "{stderr}");

    Ok(())
}
