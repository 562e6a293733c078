use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::time::Duration;

/// Pipeline stages reported to the user, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    LoadFragments,
    AlignDays,
    Resample,
    ComputeWeights,
    Aggregate,
    Write,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineStage::LoadFragments => "Loading grid fragments",
            PipelineStage::AlignDays => "Aligning accumulation windows to days",
            PipelineStage::Resample => "Choosing upsample factor",
            PipelineStage::ComputeWeights => "Computing overlap weights",
            PipelineStage::Aggregate => "Aggregating zonal statistics",
            PipelineStage::Write => "Writing results",
        };
        f.write_str(label)
    }
}

pub struct ProgressReporter {
    progress_bar: Option<ProgressBar>,
}

impl ProgressReporter {
    pub fn new_spinner(message: &str, silent: bool) -> Self {
        if silent {
            return Self { progress_bar: None };
        }

        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            progress_bar: Some(pb),
        }
    }

    pub fn silent() -> Self {
        Self { progress_bar: None }
    }

    pub fn stage(&self, stage: PipelineStage) {
        self.set_message(&format!("{}...", stage));
    }

    pub fn set_message(&self, message: &str) {
        if let Some(ref pb) = self.progress_bar {
            pb.set_message(message.to_string());
        }
    }

    pub fn finish_with_message(&self, message: &str) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_with_message(message.to_string());
        }
    }

    pub fn is_silent(&self) -> bool {
        self.progress_bar.is_none()
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(ref pb) = self.progress_bar {
            if !pb.is_finished() {
                pb.finish_and_clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_reporter_accepts_messages() {
        let progress = ProgressReporter::silent();
        progress.stage(PipelineStage::LoadFragments);
        progress.finish_with_message("done");
        assert!(progress.is_silent());
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(
            PipelineStage::AlignDays.to_string(),
            "Aligning accumulation windows to days"
        );
    }
}
