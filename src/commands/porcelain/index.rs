use crate::areas::repository::Repository;
use crate::artifacts::indexer::Indexer;
use crate::artifacts::indexer::config::IndexerConfig;
use crate::artifacts::indexer::report::IndexReport;
use crate::artifacts::pulls::source::PullRequestSource;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

impl Repository {
    /// Index every pull request of `source` and print the report
    ///
    /// Per pull request failures are part of the report, not errors. Only
    /// reading the source or writing the output can fail.
    pub async fn index(
        &self,
        source: &mut impl PullRequestSource,
        config: IndexerConfig,
        format: OutputFormat,
        slug: Option<&str>,
        cancel: CancellationToken,
    ) -> anyhow::Result<IndexReport> {
        let pulls = source.pull_requests()?;

        let indexer = Indexer::new(self.shared_database(), config);
        let report = indexer.index_all(pulls, cancel).await;

        match format {
            OutputFormat::Json => self.print_json_report(&report)?,
            OutputFormat::Text => self.print_text_report(&report, slug)?,
        }

        Ok(report)
    }

    fn print_json_report(&self, report: &IndexReport) -> anyhow::Result<()> {
        let mut writer = self.writer();
        serde_json::to_writer_pretty(&mut *writer, report)?;
        writeln!(writer)?;

        Ok(())
    }

    fn print_text_report(&self, report: &IndexReport, slug: Option<&str>) -> anyhow::Result<()> {
        let mut writer = self.writer();

        for pull in &report.indexed {
            write!(writer, "#{}", pull.number)?;
            if !pull.title.is_empty() {
                write!(writer, " {}", pull.title)?;
            }
            if !pull.author.is_empty() {
                write!(writer, " ({})", pull.author)?;
            }
            writeln!(writer)?;

            if let Some(slug) = slug {
                writeln!(writer, "    {}", pull.link(slug))?;
            }
            for file in pull.files() {
                writeln!(writer, "\t{file}")?;
            }
        }

        for failure in &report.failures {
            writeln!(
                writer,
                "#{} failed ({}): {}",
                failure.number,
                failure.error.kind(),
                failure.error
            )?;
        }

        for number in &report.cancelled {
            writeln!(writer, "#{number} cancelled")?;
        }

        Ok(())
    }
}
