//! Integration tests for gavel
//!
//! These tests exercise real sandboxed processes (via /bin/sh) and the full
//! judging pipeline. Run with: cargo test -p gavel --features integration-tests
//!
//! Tests that require root are marked `#[ignore]`. To include them:
//!    cargo test -p gavel --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::path::Path;

use gavel::Config;

mod pipeline_flow;
mod queue_flow;
mod sandbox_execution;

/// Language table driving the tests: a plain shell "interpreter", a
/// copy-compiled variant, and two deliberately broken toolchains.
const TEST_CONFIG: &str = r#"
compile_time = 2
source_size = 64
mem_limit = 262144
output_limit = 64
process_limit = 16
workers = 2
poll_interval_ms = 50
log_level = "debug"

[languages.shell]
name = "POSIX shell"
extension = "sh"

[languages.shell.run]
command = ["/bin/sh", "{source}"]

[languages.shc]
name = "Shell (copy-compiled)"
extension = "sh"

[languages.shc.compile]
command = ["/bin/sh", "-c", "cp {source} {output} && chmod +x {output}"]
source_name = "main.sh"
output_name = "main"

[languages.shc.run]
command = ["{artifact}"]

[languages.badc]
name = "Broken toolchain"
extension = "sh"

[languages.badc.compile]
command = ["/bin/sh", "-c", "echo 'boom: no such type' >&2; exit 1"]
source_name = "main.sh"
output_name = "main"

[languages.badc.run]
command = ["{artifact}"]

[languages.slowc]
name = "Hanging toolchain"
extension = "sh"

[languages.slowc.compile]
command = ["/bin/sh", "-c", "sleep 40"]
source_name = "main.sh"
output_name = "main"

[languages.slowc.run]
command = ["{artifact}"]
"#;

/// Build a test config rooted in a scratch directory
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::parse_toml(TEST_CONFIG).expect("test config must parse");
    config.incoming_dir = root.join("incoming");
    config.submit_dir = root.join("submissions");
    config.judge_dir = root.join("judgings");
    config.log_dir = Some(root.join("log"));
    config
}
