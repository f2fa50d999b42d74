use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    ArtifactReference, Classification, ModelCategory, PresenceScanner, TransferJob,
};
use crate::registry::{CivitAiClient, HuggingFaceClient, RegistryClient};
use crate::resolver::RemoteResolver;
use crate::transfer::{JobFailure, ProgressRegistry, Sleeper, TransferEngine, TransferOptions};
use crate::workflow::WorkflowParser;
use indicatif::MultiProgress;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

const MIB: f64 = 1024.0 * 1024.0;

/// What a `fetch` run did.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub references: usize,
    pub present: usize,
    pub missing: Vec<ArtifactReference>,
    pub unresolved: Vec<ArtifactReference>,
    pub downloaded: Vec<String>,
    pub failures: Vec<JobFailure>,
}

impl RunSummary {
    /// Models that could not be located are reported, not failed; only
    /// transfer failures make the run an error.
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::TransferFailed(self.failures.len()))
        }
    }
}

pub struct ModelManager {
    scanner: PresenceScanner,
    resolver: RemoteResolver,
    engine: TransferEngine,
    progress: Arc<ProgressRegistry>,
}

impl ModelManager {
    pub fn new(config: Config) -> Result<Self> {
        let huggingface: Arc<dyn RegistryClient> = Arc::new(HuggingFaceClient::new(&config)?);
        let civitai: Arc<dyn RegistryClient> = Arc::new(CivitAiClient::new(&config)?);

        let mut sources = Vec::new();
        if config.huggingface_token().is_some() {
            sources.push(huggingface.clone());
        } else {
            tracing::debug!("No Hugging Face token configured, searching CivitAI only");
        }
        sources.push(civitai.clone());

        let progress = Arc::new(ProgressRegistry::new());
        let engine = TransferEngine::new(
            vec![huggingface, civitai.clone()],
            progress.clone(),
            TransferOptions::from_config(&config),
        );

        Ok(Self {
            scanner: PresenceScanner::new(config),
            resolver: RemoteResolver::new(sources, Some(civitai)),
            engine,
            progress,
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.engine = self.engine.with_sleeper(sleeper);
        self
    }

    pub fn with_progress_bars(mut self, bars: MultiProgress) -> Self {
        self.engine = self.engine.with_progress_bars(bars);
        self
    }

    /// Parses a workflow, then downloads whatever it needs that is not on disk.
    pub async fn process_workflow(&self, path: &Path) -> Result<RunSummary> {
        println!("Processing workflow: {}", path.display());

        let (refs, classification) = self.parse_and_classify(path)?;
        let mut summary = RunSummary {
            references: refs.len(),
            present: classification.present.len(),
            missing: classification
                .missing
                .iter()
                .map(|m| m.reference.clone())
                .collect(),
            ..RunSummary::default()
        };

        if classification.missing.is_empty() {
            println!("\nAll models are present. Nothing to download.");
            return Ok(summary);
        }

        println!("\nSearching registries...");
        let resolved = self.resolver.resolve(&summary.missing).await;

        let mut jobs = Vec::new();
        let mut queued = HashSet::new();
        for local in classification.missing {
            let name = &local.reference.name;
            let Some(candidate) = resolved.get(&(local.reference.category, name.clone())) else {
                summary.unresolved.push(local.reference);
                continue;
            };
            if !queued.insert(name.clone()) {
                tracing::debug!("{} already queued", name);
                continue;
            }
            jobs.push(TransferJob {
                candidate: candidate.clone(),
                destination: local.path,
                reference: local.reference,
            });
        }

        println!("\nFound {} model(s) online:", jobs.len());
        for job in &jobs {
            println!(
                "  - {}: {} ({:.2} MB)",
                job.name(),
                job.candidate.source,
                job.candidate.declared_size as f64 / MIB
            );
        }

        if !summary.unresolved.is_empty() {
            println!("\nCould not locate:");
            for reference in &summary.unresolved {
                println!("  - {} ({})", reference.name, reference.category);
            }
        }

        if !jobs.is_empty() {
            println!("\nDownloading {} model(s)...", jobs.len());
            let report = self.engine.run(jobs).await;
            if !report.is_success() {
                tracing::warn!("{} download(s) did not complete", report.failures.len());
            }
            summary.downloaded = report.completed;
            summary.failures = report.failures;
        }

        self.print_summary(&summary);
        Ok(summary)
    }

    /// Parse and classify only.
    pub fn check_workflow(&self, path: &Path) -> Result<Classification> {
        println!("Checking workflow: {}", path.display());
        let (_, classification) = self.parse_and_classify(path)?;
        if classification.missing.is_empty() {
            println!("\nAll models are present.");
        }
        Ok(classification)
    }

    /// Prints every installed model, grouped by category.
    pub fn list_installed(&self, with_hash: bool) -> Result<()> {
        for category in ModelCategory::ALL {
            let models = self.scanner.scan_directory(category);
            println!("\n{}: {} model(s)", category, models.len());

            for model in models {
                let size_mb = model.size as f64 / MIB;
                if !with_hash {
                    println!("  - {} ({:.2} MB)", model.reference.name, size_mb);
                    continue;
                }
                match self.scanner.inspect(&model) {
                    Ok(details) => println!(
                        "  - {} ({:.2} MB) {}",
                        model.reference.name,
                        details.size as f64 / MIB,
                        details.fingerprint
                    ),
                    Err(e) => {
                        tracing::warn!("Could not hash {:?}: {}", model.path, e);
                        println!("  - {} ({:.2} MB)", model.reference.name, size_mb);
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_and_classify(&self, path: &Path) -> Result<(Vec<ArtifactReference>, Classification)> {
        let refs = WorkflowParser::parse_file(path)?;
        println!("Found {} model reference(s)", refs.len());

        let classification = self.scanner.classify(&refs)?;
        println!("Present: {}", classification.present.len());
        println!("Missing: {}", classification.missing.len());

        if !classification.missing.is_empty() {
            println!("\nMissing models:");
            for local in &classification.missing {
                println!("  - {} ({})", local.reference.name, local.reference.category);
            }
        }

        Ok((refs, classification))
    }

    fn print_summary(&self, summary: &RunSummary) {
        let states = self.progress.snapshot();
        println!("\nSummary:");
        for name in &summary.downloaded {
            match states.get(name) {
                Some(state) => println!(
                    "  ✓ {} from {} ({:.2} MB, {:.1} MiB/s)",
                    name,
                    state.source,
                    state.downloaded as f64 / MIB,
                    state.throughput_mib_s()
                ),
                None => println!("  ✓ {}", name),
            }
        }
        for failure in &summary.failures {
            let detail = match states.get(&failure.name) {
                Some(state) => match state.percent() {
                    Some(p) => format!(" ({} attempt(s), {:.0}%)", state.attempts, p),
                    None => format!(" ({} attempt(s))", state.attempts),
                },
                None => String::new(),
            };
            println!("  ✗ {}: {}{}", failure.name, failure.error, detail);
        }
        for reference in &summary.unresolved {
            println!("  ? {}: not found on any registry", reference.name);
        }
        println!(
            "{} downloaded, {} failed, {} not found",
            summary.downloaded.len(),
            summary.failures.len(),
            summary.unresolved.len()
        );
    }
}
