//! Run summary and reporting.

use std::time::Duration;

use comfy_table::{
    Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};
use genderline_core::{fmt_num, pct};

use crate::sink::SinkStats;
use crate::source::SourceStats;
use crate::types::{Gender, GenderCounts};

/// Everything a finished (or interrupted) run reports
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub source: SourceStats,
    /// Authors skipped because they were dispatched earlier in this run
    pub duplicates: usize,
    /// Authors skipped because the resumed output already has them
    pub already_written: usize,
    /// Keys loaded from the output file at start
    pub seeded: usize,
    pub dispatched: usize,
    /// Calls that failed at the transport or envelope level (no row)
    pub backend_failures: usize,
    pub worker_panics: usize,
    pub rows_written: usize,
    pub genders: GenderCounts,
    pub elapsed: Duration,
    /// Dispatch stopped early on a shutdown request
    pub interrupted: bool,
}

impl RunSummary {
    pub(crate) fn absorb_sink(&mut self, sink: SinkStats) {
        self.rows_written = sink.rows_written;
        self.genders = sink.genders;
    }

    /// Responses that could not be parsed into a gender
    pub fn unparsed(&self) -> usize {
        self.genders.get(Gender::Unknown)
    }

    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Gender inference")
                    .fg(Color::Cyan)
                    .add_attribute(Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
                Cell::new("%").fg(Color::Cyan),
            ]);

        let pairs = self.source.pairs;
        table.add_row(vec![
            Cell::new("Rows read"),
            Cell::new(fmt_num(self.source.rows_read)),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Rows skipped"),
            Cell::new(fmt_num(self.source.rows_skipped)),
            Cell::new(format!(
                "{:.1}",
                pct(self.source.rows_skipped, self.source.rows_read)
            )),
        ]);
        table.add_row(vec![
            Cell::new("Author pairs"),
            Cell::new(fmt_num(pairs)),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Duplicates"),
            Cell::new(fmt_num(self.duplicates)),
            Cell::new(format!("{:.1}", pct(self.duplicates, pairs))),
        ]);
        table.add_row(vec![
            Cell::new("Already written"),
            Cell::new(fmt_num(self.already_written)),
            Cell::new(format!("{:.1}", pct(self.already_written, pairs))),
        ]);
        table.add_row(vec![
            Cell::new("Dispatched"),
            Cell::new(fmt_num(self.dispatched)),
            Cell::new(format!("{:.1}", pct(self.dispatched, pairs))),
        ]);
        table.add_row(vec![
            Cell::new("Backend failures").fg(if self.backend_failures > 0 {
                Color::Red
            } else {
                Color::Reset
            }),
            Cell::new(fmt_num(self.backend_failures)),
            Cell::new(format!(
                "{:.1}",
                pct(self.backend_failures, self.dispatched)
            )),
        ]);
        table.add_row(vec![
            Cell::new("Rows written").fg(Color::Green),
            Cell::new(fmt_num(self.rows_written)).fg(Color::Green),
            Cell::new(format!("{:.1}", pct(self.rows_written, self.dispatched)))
                .fg(Color::Green),
        ]);
        for gender in Gender::ALL {
            table.add_row(vec![
                Cell::new(format!("  {gender}")),
                Cell::new(fmt_num(self.genders.get(gender))),
                Cell::new(format!(
                    "{:.1}",
                    pct(self.genders.get(gender), self.rows_written)
                )),
            ]);
        }
        if self.worker_panics > 0 {
            table.add_row(vec![
                Cell::new("Worker panics").fg(Color::Red),
                Cell::new(fmt_num(self.worker_panics)).fg(Color::Red),
                Cell::new(""),
            ]);
        }
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(format!("{:.1}s", self.elapsed.as_secs_f64())),
            Cell::new(""),
        ]);

        let status = if self.interrupted { " (interrupted)" } else { "" };
        format!("\n{table}{status}")
    }

    pub fn print(&self) {
        println!("{}", self.format_table());
    }

    /// Log minimal summary (non-TTY mode).
    pub fn log(&self) {
        log::info!(
            "{} rows written ({} dispatched, {} duplicates, {} already written, {} backend failures, {} unparsed) [{:.1}s]{}",
            fmt_num(self.rows_written),
            fmt_num(self.dispatched),
            fmt_num(self.duplicates),
            fmt_num(self.already_written),
            fmt_num(self.backend_failures),
            fmt_num(self.unparsed()),
            self.elapsed.as_secs_f64(),
            if self.interrupted { " interrupted" } else { "" }
        );
    }
}
