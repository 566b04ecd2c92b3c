mod summary;
mod tables;

use console::{style, StyledObject};
use std::fmt::Display;

use crate::providers::{PipelineKind, RequestOutcome, RunResult};

pub use summary::print_summary;

/// Bright green when `succeeded`, bright red otherwise.
fn verdict(succeeded: bool, text: impl Display) -> StyledObject<String> {
    let styled = style(text.to_string()).bright();
    if succeeded {
        styled.green()
    } else {
        styled.red()
    }
}

/// Prints the `azpipes` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        style("🚀 azpipes").magenta().bold(),
        style(env!("CARGO_PKG_VERSION")).dim(),
        style("Azure DevOps pipeline trigger").dim()
    );
}

/// Echoes a response to stdout: a note line, then the body as pretty JSON
/// or plain text.
pub fn print_response(outcome: &RequestOutcome, note: &str) {
    println!("{note}");
    println!("{}", outcome.render());
}

pub fn print_run_result(service: &str, kind: PipelineKind, result: RunResult) {
    println!(
        "Result of {service} {kind} pipeline: {}",
        verdict(result.is_success(), result)
    );
}
