use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::app::{OriginResult, PollSummary, ProgressEvent, ProgressSink, StagedSummary};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_poll(result: &PollSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_staged(result: &StagedSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_origin(result: &OriginResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress goes to the log; stdout carries only the JSON result.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => debug!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => debug!("{}", event.message),
        }
    }
}
