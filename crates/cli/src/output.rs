use clap::ValueEnum;
use engine::AnalysisReport;

/// Supported output formats for analysis results.
#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Sarif,
}

impl From<Format> for reporters::Format {
    fn from(fmt: Format) -> Self {
        match fmt {
            Format::Text => reporters::Format::Text,
            Format::Json => reporters::Format::Json,
            Format::Sarif => reporters::Format::Sarif,
        }
    }
}

pub fn print_report(report: &AnalysisReport, fmt: Format, stats: bool) -> anyhow::Result<()> {
    reporters::print_report(report, fmt.into(), stats)?;
    Ok(())
}
